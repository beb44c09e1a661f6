//! In-memory ledger state using DashMap for concurrent access

use crate::key_locks::KeyLocks;
use crate::Value;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Thread-safe key/value ledger with one lock per key
///
/// Values default to 0 for unseen keys. No method here performs an atomic
/// read-modify-write; the engine provides atomicity by holding the key locks
/// from `locks()` around its reads and writes.
#[derive(Clone)]
pub struct LedgerStore {
    /// Key values
    values: Arc<DashMap<String, Value>>,
    /// Per-key locks, created lazily
    locks: Arc<KeyLocks>,
}

impl LedgerStore {
    /// Create a new empty ledger
    pub fn new() -> Self {
        Self {
            values: Arc::new(DashMap::new()),
            locks: Arc::new(KeyLocks::new()),
        }
    }

    /// Read a value (0 if the key was never written)
    pub fn read(&self, key: &str) -> Value {
        self.values.get(key).map(|v| *v).unwrap_or(0)
    }

    /// Replace a value unconditionally
    pub fn write(&self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Write a value only if the key has never been written.
    ///
    /// Used for one-time initialization before execution starts.
    /// Returns true if the value was seeded.
    pub fn seed(&self, key: impl Into<String>, value: Value) -> bool {
        let mut seeded = false;
        self.values.entry(key.into()).or_insert_with(|| {
            seeded = true;
            value
        });
        seeded
    }

    /// Make sure a lock exists for `key`. Idempotent and race-free.
    pub fn ensure_lock(&self, key: &str) {
        self.locks.ensure(key);
    }

    /// Lock table backing this store
    pub fn locks(&self) -> &KeyLocks {
        &self.locks
    }

    /// Check if a key has ever been written
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Copy of the full key/value mapping, ordered by key
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .map(|r| (r.key().clone(), *r.value()))
            .collect()
    }

    /// Get key count
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if store is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Clear all values (for testing)
    pub fn clear(&self) {
        self.values.clear();
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}
