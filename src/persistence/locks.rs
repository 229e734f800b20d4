//! Per-version in-process write locks.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Serializes work on the same version while letting different versions
/// proceed in parallel.
#[derive(Default)]
pub struct VersionLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl VersionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` holding the lock for `version`.
    pub fn with_lock<T>(&self, version: &str, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(version.to_string()).or_default())
        };

        let result = {
            let _guard = lock.lock();
            f()
        };

        // Drop the entry once nobody else is waiting on it.
        let mut locks = self.locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(version);
        }
        result
    }

    /// Versions currently locked or waited on.
    pub fn active(&self) -> usize {
        self.locks.lock().len()
    }
}
