//! Per-key mutual exclusion.
//!
//! At most one submission per `(model, id)` is between "load current" and
//! "commit" at any time. Distinct keys never contend on a shared lock.

use crate::types::DocumentKey;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// One key's gate: a held flag and the waiters for it.
#[derive(Default)]
struct KeySlot {
    held: Mutex<bool>,
    released: Condvar,
}

impl KeySlot {
    fn enter(&self) {
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;
    }

    fn leave(&self) {
        *self.held.lock() = false;
        self.released.notify_one();
    }
}

/// Lock table keyed by document key. Slots are created on demand and
/// removed once nobody holds or waits for them.
#[derive(Default)]
pub struct KeyLocks {
    slots: DashMap<DocumentKey, Arc<KeySlot>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `key` is free and take it.
    pub fn acquire(&self, key: &DocumentKey) -> KeyGuard<'_> {
        let slot = Arc::clone(self.slots.entry(key.clone()).or_default().value());
        slot.enter();
        KeyGuard {
            table: self,
            key: key.clone(),
            slot: Some(slot),
        }
    }

    /// Number of keys currently held or waited on.
    pub fn active(&self) -> usize {
        self.slots.len()
    }
}

/// Holds a key until dropped.
pub struct KeyGuard<'a> {
    table: &'a KeyLocks,
    key: DocumentKey,
    slot: Option<Arc<KeySlot>>,
}

impl KeyGuard<'_> {
    pub fn key(&self) -> &DocumentKey {
        &self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.leave();
        }
        // Only the table's own reference left: nobody holds or waits.
        self.table
            .slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}
