//! Per-run record locks.
//!
//! The worker executing a run and the request handlers cancelling or deleting
//! it both read-then-write the same run record. Every such sequence holds the
//! run's lock from this registry.
//!
//! This module uses `.unwrap()` on `Mutex` operations. Lock poisoning only
//! occurs if a thread panics while holding the lock, which indicates a bug.

use citysim_core::models::RunId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Async mutex guarding one run record
pub type RunLock = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
pub struct RunLocks {
    locks: Mutex<HashMap<RunId, RunLock>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock of a run, created on first use
    pub fn get(&self, run_id: &RunId) -> RunLock {
        let mut locks = self.locks.lock().unwrap();
        Arc::clone(locks.entry(run_id.clone()).or_default())
    }

    /// Forget the lock of a deleted run
    pub fn remove(&self, run_id: &RunId) {
        self.locks.lock().unwrap().remove(run_id);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
