//! Priority queue of tiles waiting for a worker.
//!
//! Ordering is strict: every `High` tile is dequeued before any `Low` tile,
//! and tiles of equal priority come out in arrival order. Promotion removes a
//! tile and re-inserts it as `High`, behind the `High` tiles already waiting.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::state::{Priority, Tile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Priority,
    seq: u64,
}

/// Tiles pending load, keyed by locator.
#[derive(Default)]
pub struct TileQueue {
    entries: BTreeMap<QueueKey, Arc<Tile>>,
    index: HashMap<Arc<str>, QueueKey>,
    next_seq: u64,
}

impl TileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a tile at its current priority.
    ///
    /// Returns `false` if a tile with the same locator is already queued.
    pub fn push(&mut self, tile: Arc<Tile>) -> bool {
        let locator = tile.locator_arc();
        if self.index.contains_key(&locator) {
            return false;
        }
        let key = QueueKey {
            priority: tile.priority(),
            seq: self.bump_seq(),
        };
        self.index.insert(locator, key);
        self.entries.insert(key, tile);
        true
    }

    /// Dequeue the highest-priority, earliest-arrived tile.
    pub fn pop(&mut self) -> Option<Arc<Tile>> {
        let (_, tile) = self.entries.pop_first()?;
        self.index.remove(tile.locator());
        Some(tile)
    }

    pub fn contains(&self, locator: &str) -> bool {
        self.index.contains_key(locator)
    }

    pub fn remove(&mut self, locator: &str) -> Option<Arc<Tile>> {
        let key = self.index.remove(locator)?;
        self.entries.remove(&key)
    }

    /// Raise a queued tile to `High`.
    ///
    /// No-op (returning `false`) if the tile is not queued or is already
    /// `High`; its position is left untouched in that case.
    pub fn promote(&mut self, locator: &str) -> bool {
        let Some(key) = self.index.get(locator).copied() else {
            return false;
        };
        if key.priority == Priority::High {
            return false;
        }
        let Some(tile) = self.entries.remove(&key) else {
            return false;
        };
        tile.set_priority(Priority::High);
        let promoted = QueueKey {
            priority: Priority::High,
            seq: self.bump_seq(),
        };
        if let Some(slot) = self.index.get_mut(locator) {
            *slot = promoted;
        }
        self.entries.insert(promoted, tile);
        true
    }

    /// Remove every queued tile, in dequeue order.
    pub fn drain(&mut self) -> Vec<Arc<Tile>> {
        self.index.clear();
        std::mem::take(&mut self.entries).into_values().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
