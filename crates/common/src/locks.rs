//! Per-key async mutual exclusion.
//!
//! Mutations of one product's stock and allocation records must be applied
//! one at a time, while unrelated products proceed in parallel. `KeyedLocks`
//! hands out one `tokio::sync::Mutex` per key; the guard may be held across
//! `.await` points (ledger and adapter calls).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A table of lazily created per-key async locks.
///
/// Guards are acquired in FIFO order by tokio's mutex, so operations on one
/// key are applied in the order they were admitted.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Waits for exclusive access to `key`.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        self.slot(key).lock_owned().await
    }

    /// Takes exclusive access to `key` only if nobody holds it.
    pub fn try_lock(&self, key: &K) -> Option<OwnedMutexGuard<()>> {
        self.slot(key).try_lock_owned().ok()
    }

    /// Returns true if some task currently holds `key`.
    pub fn is_locked(&self, key: &K) -> bool {
        self.slot(key).try_lock().is_err()
    }

    /// Returns the number of keys that have ever been locked.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no key has been locked yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
