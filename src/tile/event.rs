//! Tile change notifications and the dispatch context they are delivered on.
//!
//! Workers never call listeners directly. Every externally observable state
//! change (a tile receiving its image, an error being announced) is sent as a
//! task to an [`EventDispatcher`], and a single [`DispatchLoop`] runs those
//! tasks one at a time. Hosts that need callbacks on their own UI thread pump
//! the loop with [`DispatchLoop::run_pending`]; everyone else spawns it.
//!
//! ```text
//!  worker task ──┐
//!  worker task ──┼──► EventDispatcher ──► DispatchLoop ──► tile listeners
//!  factory     ──┘     (unbounded mpsc)    (one at a time)
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use super::grid::TileCoord;
use super::state::Tile;
use crate::error::TileError;

/// Name of the notification fired when a tile's image becomes available.
pub const LOADED: &str = "loaded";

/// Name of the notification fired after each failed load attempt.
pub const LOADING_ERROR: &str = "loading-error";

/// Name of the notification fired once a tile gives up loading.
pub const UNRECOVERABLE_ERROR: &str = "unrecoverable-error";

// =============================================================================
// Events
// =============================================================================

/// What happened to a tile.
#[derive(Debug, Clone)]
pub enum TileEventKind {
    Loaded,
    LoadingError(TileError),
    UnrecoverableError(TileError),
}

/// A change notification emitted by a tile.
#[derive(Debug, Clone)]
pub struct TileEvent {
    pub coord: TileCoord,
    pub locator: Arc<str>,
    pub kind: TileEventKind,
}

impl TileEvent {
    pub fn loaded(coord: TileCoord, locator: Arc<str>) -> Self {
        Self {
            coord,
            locator,
            kind: TileEventKind::Loaded,
        }
    }

    pub fn loading_error(coord: TileCoord, locator: Arc<str>, error: TileError) -> Self {
        Self {
            coord,
            locator,
            kind: TileEventKind::LoadingError(error),
        }
    }

    pub fn unrecoverable(coord: TileCoord, locator: Arc<str>, error: TileError) -> Self {
        Self {
            coord,
            locator,
            kind: TileEventKind::UnrecoverableError(error),
        }
    }

    /// The notification name: `loaded`, `loading-error` or `unrecoverable-error`.
    pub fn name(&self) -> &'static str {
        match self.kind {
            TileEventKind::Loaded => LOADED,
            TileEventKind::LoadingError(_) => LOADING_ERROR,
            TileEventKind::UnrecoverableError(_) => UNRECOVERABLE_ERROR,
        }
    }

    pub fn error(&self) -> Option<&TileError> {
        match &self.kind {
            TileEventKind::Loaded => None,
            TileEventKind::LoadingError(e) | TileEventKind::UnrecoverableError(e) => Some(e),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            TileEventKind::Loaded | TileEventKind::UnrecoverableError(_)
        )
    }
}

// =============================================================================
// Listeners
// =============================================================================

/// Callback invoked for each notification a tile emits.
pub type TileListener = Arc<dyn Fn(&TileEvent) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Listener registry shared by plain and composite tiles.
#[derive(Default)]
pub(crate) struct Listeners {
    entries: Mutex<Vec<(ListenerId, TileListener)>>,
}

impl Listeners {
    pub(crate) fn subscribe(&self, listener: TileListener) -> ListenerId {
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, listener));
        id
    }

    pub(crate) fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    /// Call every listener. The registry lock is released first so listeners
    /// may subscribe or unsubscribe re-entrantly.
    pub(crate) fn notify(&self, event: &TileEvent) {
        let snapshot: Vec<TileListener> = self
            .entries
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Sending half of the safe callback context.
///
/// Cheap to clone; every factory sharing a dispatcher delivers its
/// notifications through the same loop, in submission order.
#[derive(Clone)]
pub struct EventDispatcher {
    tx: mpsc::UnboundedSender<Task>,
}

/// Receiving half of the safe callback context.
pub struct DispatchLoop {
    rx: mpsc::UnboundedReceiver<Task>,
}

impl EventDispatcher {
    /// Create a dispatcher and the loop that must be driven to deliver its tasks.
    pub fn new() -> (Self, DispatchLoop) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, DispatchLoop { rx })
    }

    /// Create a dispatcher whose loop runs as a task on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, like `tokio::spawn`.
    pub fn spawn() -> Self {
        let (dispatcher, dispatch_loop) = Self::new();
        tokio::spawn(dispatch_loop.run());
        dispatcher
    }

    /// Run `task` on the dispatch context without waiting for it.
    ///
    /// Returns `false` if the loop is gone and the task was dropped.
    pub fn invoke_later(&self, task: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(task)).is_ok()
    }

    /// Run `task` on the dispatch context, or inline if the loop is gone.
    pub fn invoke_later_or_inline(&self, task: impl FnOnce() + Send + 'static) {
        if let Err(mpsc::error::SendError(task)) = self.tx.send(Box::new(task)) {
            run_task(task);
        }
    }

    /// Deliver `event` to the listeners of `tile` on the dispatch context.
    ///
    /// Delivered inline on the calling thread if the loop is gone, so a
    /// terminal notification is never lost.
    pub fn fire(&self, tile: Arc<Tile>, event: TileEvent) {
        let task: Task = Box::new(move || tile.notify(&event));
        if let Err(mpsc::error::SendError(task)) = self.tx.send(task) {
            run_task(task);
        }
    }

    /// Run `task` on the dispatch context and wait for its result.
    ///
    /// Returns `None` if the loop is gone.
    pub async fn invoke_and_wait<R: Send + 'static>(
        &self,
        task: impl FnOnce() -> R + Send + 'static,
    ) -> Option<R> {
        let (done_tx, done_rx) = oneshot::channel();
        let queued = self.invoke_later(move || {
            let _ = done_tx.send(task());
        });
        if !queued {
            return None;
        }
        done_rx.await.ok()
    }

    /// Whether the loop has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl DispatchLoop {
    /// Deliver tasks until every dispatcher handle is dropped.
    pub async fn run(mut self) {
        while let Some(task) = self.rx.recv().await {
            run_task(task);
        }
        debug!("Event dispatch loop finished");
    }

    /// Deliver every task queued so far without waiting for more.
    ///
    /// Returns the number of tasks run.
    pub fn run_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(task) = self.rx.try_recv() {
            run_task(task);
            count += 1;
        }
        count
    }
}

fn run_task(task: Task) {
    // A panicking listener must not take the loop down with it
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        error!("Tile listener panicked during dispatch");
    }
}
