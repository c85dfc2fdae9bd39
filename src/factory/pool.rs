//! Elastic worker pool shared by tile factories.
//!
//! Jobs are futures run on tokio tasks. The pool keeps between zero and
//! `max_workers` worker tasks alive:
//!
//! - while fewer than `min_workers` exist, every submission starts a worker
//! - above that, a worker is added only when none is idle, up to `max_workers`
//! - a worker idle for `idle_timeout` retires
//!
//! The job queue is bounded. A submission that finds it full is rejected:
//! every queued job is dropped and every registered [`RejectionHandler`] is
//! told to fail the tiles it had waiting, so callers re-request only what is
//! still visible.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::error::PoolError;

/// Default number of workers kept busy before the pool starts to burst.
pub const DEFAULT_MIN_WORKERS: usize = 4;

/// Default time an idle worker waits for work before retiring.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default bound on queued, not yet running, jobs.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// A unit of work accepted by the pool.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Notified when the pool drops its queue because it was full.
pub trait RejectionHandler: Send + Sync {
    fn on_rejected(&self);
}

// =============================================================================
// Configuration
// =============================================================================

/// Sizing of a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub name: String,
    pub min_workers: usize,
    pub max_workers: usize,
    pub idle_timeout: Duration,
    pub queue_capacity: usize,
}

impl PoolConfig {
    /// `min_workers` workers, bursting to twice as many.
    pub fn with_workers(min_workers: usize) -> Self {
        let min_workers = min_workers.max(1);
        Self {
            min_workers,
            max_workers: min_workers * 2,
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "tile-pool".to_string(),
            min_workers: DEFAULT_MIN_WORKERS,
            max_workers: DEFAULT_MIN_WORKERS * 2,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

// =============================================================================
// WorkerPool
// =============================================================================

#[derive(Default)]
struct PoolState {
    jobs: VecDeque<Job>,
    workers: usize,
    idle: usize,
    next_worker_id: usize,
    shutdown: bool,
}

struct Shared {
    config: PoolConfig,
    state: Mutex<PoolState>,
    wake: Notify,
    handlers: Mutex<Vec<Weak<dyn RejectionHandler>>>,
    runtime: Option<Handle>,
}

/// Bounded, elastic pool of tokio worker tasks.
///
/// No worker exists until the first job is submitted. Share one pool between
/// factories with `Arc<WorkerPool>`; call [`WorkerPool::shutdown`] to stop it.
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Create a pool whose workers run on the runtime current at submission.
    pub fn new(config: PoolConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a pool whose workers run on `runtime`, so jobs may be
    /// submitted from threads outside any runtime.
    pub fn with_runtime(config: PoolConfig, runtime: Handle) -> Self {
        Self::build(config, Some(runtime))
    }

    fn build(mut config: PoolConfig, runtime: Option<Handle>) -> Self {
        config.min_workers = config.min_workers.max(1);
        config.max_workers = config.max_workers.max(config.min_workers);
        config.queue_capacity = config.queue_capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(PoolState::default()),
                wake: Notify::new(),
                handlers: Mutex::new(Vec::new()),
                runtime,
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Register a handler to be told about rejections. Only a weak reference
    /// is kept.
    pub fn register(&self, handler: Weak<dyn RejectionHandler>) {
        let mut handlers = self.shared.handlers.lock();
        handlers.retain(|h| h.strong_count() > 0);
        handlers.push(handler);
    }

    /// Queue a job, starting a worker if needed.
    pub fn submit(&self, job: Job) -> Result<(), PoolError> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(PoolError::Shutdown);
        }

        let capacity = self.shared.config.queue_capacity;
        if state.jobs.len() >= capacity {
            let dropped = state.jobs.len();
            state.jobs.clear();
            drop(state);
            warn!(
                pool = %self.shared.config.name,
                dropped,
                "Worker pool saturated, dropping queued work"
            );
            self.notify_rejected();
            return Err(PoolError::Saturated { capacity });
        }

        let config = &self.shared.config;
        let needs_worker = state.workers < config.min_workers
            || (state.idle == 0 && state.workers < config.max_workers);

        if !needs_worker {
            state.jobs.push_back(job);
            drop(state);
            self.shared.wake.notify_one();
            return Ok(());
        }

        let runtime = match self.shared.runtime.clone() {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| PoolError::NoRuntime)?,
        };
        state.jobs.push_back(job);
        state.workers += 1;
        let worker_id = state.next_worker_id;
        state.next_worker_id += 1;
        drop(state);

        runtime.spawn(run_worker(self.shared.clone(), worker_id));
        Ok(())
    }

    /// Stop accepting work and drop queued jobs. Running jobs finish; idle
    /// workers exit.
    pub fn shutdown(&self) {
        let dropped = {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            let dropped = state.jobs.len();
            state.jobs.clear();
            dropped
        };
        self.shared.wake.notify_waiters();
        debug!(pool = %self.shared.config.name, dropped, "Worker pool shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    /// Number of live worker tasks.
    pub fn active_workers(&self) -> usize {
        self.shared.state.lock().workers
    }

    /// Number of jobs waiting for a worker.
    pub fn queued_jobs(&self) -> usize {
        self.shared.state.lock().jobs.len()
    }

    fn notify_rejected(&self) {
        let handlers: Vec<Arc<dyn RejectionHandler>> = {
            let mut handlers = self.shared.handlers.lock();
            handlers.retain(|h| h.strong_count() > 0);
            handlers.iter().filter_map(Weak::upgrade).collect()
        };
        for handler in handlers {
            handler.on_rejected();
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.shared.config)
            .field("active_workers", &self.active_workers())
            .field("queued_jobs", &self.queued_jobs())
            .finish()
    }
}

async fn run_worker(shared: Arc<Shared>, worker_id: usize) {
    let pool = shared.config.name.as_str();
    debug!(pool, worker_id, "Tile worker started");

    loop {
        let job = {
            let mut state = shared.state.lock();
            match state.jobs.pop_front() {
                Some(job) => Some(job),
                None if state.shutdown => {
                    state.workers -= 1;
                    debug!(pool, worker_id, "Tile worker stopped");
                    return;
                }
                None => {
                    state.idle += 1;
                    None
                }
            }
        };

        if let Some(job) = job {
            // Run on its own task so a panicking job does not kill the worker
            if let Err(e) = tokio::spawn(job).await {
                error!(pool, worker_id, error = %e, "Tile job failed");
            }
            continue;
        }

        let woken = tokio::time::timeout(shared.config.idle_timeout, shared.wake.notified())
            .await
            .is_ok();

        let mut state = shared.state.lock();
        state.idle -= 1;
        if !woken && state.jobs.is_empty() {
            state.workers -= 1;
            debug!(pool, worker_id, "Idle tile worker retired");
            return;
        }
    }
}
