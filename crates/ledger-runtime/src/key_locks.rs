//! Key Locks - per-key read/write locking
//!
//! One `RwLock` per ledger key, created on first reference. Creation goes
//! through the DashMap entry API, so concurrent first references to the same
//! key always observe the same lock.

use crate::error::ExecutionError;
use dashmap::DashMap;
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// How a key is held for the duration of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Per-key lock table
pub struct KeyLocks {
    locks: DashMap<String, Arc<RwLock<()>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Get or create the lock for a key
    fn get_or_create(&self, key: &str) -> Arc<RwLock<()>> {
        if let Some(lock) = self.locks.get(key) {
            return lock.clone();
        }
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Make sure a lock exists for `key`
    pub fn ensure(&self, key: &str) {
        self.get_or_create(key);
    }

    /// Lock every key of a transaction.
    ///
    /// Keys are acquired in ascending order: write keys exclusively, keys
    /// only read as shared. A key in both sets is held exclusively. With a
    /// timeout, the first key that cannot be acquired in time is reported as
    /// `ExecutionError::LockTimeout` and everything acquired so far is
    /// released.
    pub fn acquire(
        &self,
        reads: &BTreeSet<String>,
        writes: &BTreeSet<String>,
        timeout: Option<Duration>,
    ) -> Result<KeyLockGuard, ExecutionError> {
        let keys: BTreeSet<&String> = reads.iter().chain(writes.iter()).collect();
        let mut guard = KeyLockGuard {
            held: Vec::with_capacity(keys.len()),
        };

        for key in keys {
            let mode = if writes.contains(key) {
                LockMode::Exclusive
            } else {
                LockMode::Shared
            };
            let lock = self.get_or_create(key);

            let held = match (mode, timeout) {
                (LockMode::Exclusive, None) => Held::Exclusive(lock.write_arc()),
                (LockMode::Shared, None) => Held::Shared(lock.read_arc()),
                (LockMode::Exclusive, Some(t)) => match lock.try_write_arc_for(t) {
                    Some(g) => Held::Exclusive(g),
                    None => return Err(ExecutionError::LockTimeout { key: key.clone() }),
                },
                (LockMode::Shared, Some(t)) => match lock.try_read_arc_for(t) {
                    Some(g) => Held::Shared(g),
                    None => return Err(ExecutionError::LockTimeout { key: key.clone() }),
                },
            };
            guard.held.push((key.clone(), held));
        }

        Ok(guard)
    }

    /// Number of keys with a lock
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new()
    }
}

enum Held {
    Shared(ArcRwLockReadGuard<RawRwLock, ()>),
    Exclusive(ArcRwLockWriteGuard<RawRwLock, ()>),
}

/// Locks held by one transaction
///
/// Released in reverse acquisition order when dropped.
pub struct KeyLockGuard {
    held: Vec<(String, Held)>,
}

impl KeyLockGuard {
    /// Locked keys with their mode, in acquisition order
    pub fn locked_keys(&self) -> Vec<(&str, LockMode)> {
        self.held
            .iter()
            .map(|(k, h)| {
                let mode = match h {
                    Held::Shared(_) => LockMode::Shared,
                    Held::Exclusive(_) => LockMode::Exclusive,
                };
                (k.as_str(), mode)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        while let Some((_key, held)) = self.held.pop() {
            drop(held);
        }
    }
}
