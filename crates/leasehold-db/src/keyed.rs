//! Per-key async mutexes
//!
//! Serializes every read-modify-write on one entity within this process.
//! Cross-process safety comes from the version check in the repositories.
//! An entry lives only while someone holds or waits on its key.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A lazily populated table of one mutex per key
pub struct KeyedLocks<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &K) -> KeyedGuard<'_, K> {
        // Clone the Arc out so the shard guard is dropped before awaiting
        let mutex = Arc::clone(
            &*self
                .locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );
        KeyedGuard {
            table: &self.locks,
            key: key.clone(),
            _guard: mutex.lock_owned().await,
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to one key; removes the table entry on drop when no
/// other task holds or waits on it
pub struct KeyedGuard<'a, K: Eq + Hash> {
    table: &'a DashMap<K, Arc<Mutex<()>>>,
    key: K,
    _guard: OwnedMutexGuard<()>,
}

impl<K: Eq + Hash> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        // the table's Arc plus the one inside our guard
        self.table
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) <= 2);
    }
}
