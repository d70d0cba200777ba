#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use slotbook_contracts::booking::SlotKey;

/// One mutex per live Slot Key, created on demand and dropped when idle.
#[derive(Debug, Default)]
pub struct SlotLockTable {
    slots: Mutex<HashMap<SlotKey, Arc<Mutex<()>>>>,
}

impl SlotLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock for `key`.
    pub fn with_slot<T>(&self, key: &SlotKey, f: impl FnOnce() -> T) -> T {
        let lock = self
            .slots
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let out = {
            let _held = lock.lock();
            f()
        };
        let mut slots = self.slots.lock();
        // Table entry plus ours: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            slots.remove(key);
        }
        out
    }

    pub fn live_slots(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Keeps admissions off the ledger while a reconciliation run rewrites it.
#[derive(Debug, Default)]
pub struct ReconciliationGate {
    ledger: RwLock<()>,
    run: Mutex<()>,
}

impl ReconciliationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared access for one admission.
    pub fn admit(&self, wait: Duration) -> Option<RwLockReadGuard<'_, ()>> {
        self.ledger.try_read_for(wait)
    }

    /// Exclusive access for a reconciliation run.
    pub fn exclusive(&self, wait: Duration) -> Option<RwLockWriteGuard<'_, ()>> {
        self.ledger.try_write_for(wait)
    }

    /// Never blocks: an overlapping run is refused.
    pub fn try_start_run(&self) -> Option<MutexGuard<'_, ()>> {
        self.run.try_lock()
    }
}
