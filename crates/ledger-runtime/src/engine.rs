//! Concurrency Engine
//!
//! Executes a batch of transactions against the ledger store on a bounded
//! pool of worker threads. Each transaction locks its declared keys in
//! ascending key order (write keys exclusive, read-only keys shared), reads,
//! applies its effect once and writes back, then releases in reverse order.
//!
//! Transactions with disjoint keys run fully in parallel. Transactions that
//! share a write key are serialized by that key's lock; which of them goes
//! first depends on scheduling and is not deterministic across runs. Each
//! still sees a consistent value, so no update is ever lost.

use crate::effect::{ReadSet, WriteSet};
use crate::error::ExecutionError;
use crate::ledger_store::LedgerStore;
use crate::transaction::Transaction;
use crossbeam_channel::unbounded;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum worker threads per batch (0 = available parallelism)
    pub max_workers: usize,
    /// Give up on a key lock after this many milliseconds (None = wait)
    pub lock_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 0,
            lock_timeout_ms: None,
        }
    }
}

/// Outcome of one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    /// Effect applied; these values were written
    Success { updates: WriteSet },
    /// Nothing was written for this transaction
    Failure { reason: ExecutionError },
}

impl TxOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TxOutcome::Success { .. })
    }
}

/// Result of executing a single transaction
#[derive(Debug, Clone)]
pub struct TransactionResult {
    pub tx_id: String,
    pub fee: u64,
    pub outcome: TxOutcome,
}

/// Result of executing a batch
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// Results in batch order
    pub results: Vec<TransactionResult>,
    /// Number of successful transactions
    pub successful: usize,
    /// Number of failed transactions
    pub failed: usize,
    /// Fees of successful transactions
    pub total_fees: u64,
    /// Execution time in microseconds
    pub execution_time_us: u64,
}

impl ExecutionReport {
    /// Outcome per transaction id; a repeated id maps to its last outcome
    pub fn outcomes(&self) -> HashMap<String, TxOutcome> {
        self.results
            .iter()
            .map(|r| (r.tx_id.clone(), r.outcome.clone()))
            .collect()
    }

    /// Outcome of the last transaction with this id, matching `outcomes`
    pub fn outcome(&self, tx_id: &str) -> Option<&TxOutcome> {
        self.results
            .iter()
            .rev()
            .find(|r| r.tx_id == tx_id)
            .map(|r| &r.outcome)
    }

    /// All written values, merged across successful transactions
    pub fn modified_keys(&self) -> BTreeMap<String, crate::Value> {
        let mut merged = BTreeMap::new();
        for result in &self.results {
            if let TxOutcome::Success { updates } = &result.outcome {
                merged.extend(updates.iter().map(|(k, v)| (k.clone(), *v)));
            }
        }
        merged
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Parallel transaction executor over a ledger store
pub struct ConcurrencyEngine {
    store: LedgerStore,
    config: EngineConfig,
    total_txs_processed: AtomicU64,
    total_batches_processed: AtomicU64,
}

impl ConcurrencyEngine {
    /// Create a new engine
    pub fn new(store: LedgerStore, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            total_txs_processed: AtomicU64::new(0),
            total_batches_processed: AtomicU64::new(0),
        }
    }

    /// Get reference to the ledger store
    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Transactions executed since creation
    pub fn transactions_processed(&self) -> u64 {
        self.total_txs_processed.load(Ordering::Relaxed)
    }

    /// Batches executed since creation
    pub fn batches_processed(&self) -> u64 {
        self.total_batches_processed.load(Ordering::Relaxed)
    }

    fn worker_count(&self, batch_len: usize) -> usize {
        let limit = if self.config.max_workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.config.max_workers
        };
        limit.min(batch_len).max(1)
    }

    /// Execute a batch and return an outcome for every transaction.
    ///
    /// Never short-circuits: a failed transaction writes nothing and the
    /// rest of the batch proceeds.
    pub fn execute(&self, batch: &[Transaction]) -> ExecutionReport {
        let start_time = Instant::now();

        if batch.is_empty() {
            return ExecutionReport::default();
        }

        for tx in batch {
            for key in tx.all_keys() {
                self.store.ensure_lock(key);
            }
        }

        let workers = self.worker_count(batch.len());
        let (job_sender, job_receiver) = unbounded::<usize>();
        let (result_sender, result_receiver) = unbounded::<(usize, TxOutcome)>();

        for idx in 0..batch.len() {
            if job_sender.send(idx).is_err() {
                break;
            }
        }
        drop(job_sender);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let jobs = job_receiver.clone();
                let results = result_sender.clone();
                scope.spawn(move || {
                    for idx in jobs.iter() {
                        let outcome = self.execute_one(&batch[idx]);
                        if results.send((idx, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_sender);

        let mut slots: Vec<Option<TxOutcome>> = (0..batch.len()).map(|_| None).collect();
        for (idx, outcome) in result_receiver.iter() {
            slots[idx] = Some(outcome);
        }

        let mut report = ExecutionReport {
            results: Vec::with_capacity(batch.len()),
            ..Default::default()
        };

        for (tx, slot) in batch.iter().zip(slots) {
            let outcome = slot.unwrap_or(TxOutcome::Failure {
                reason: ExecutionError::NotExecuted,
            });

            match &outcome {
                TxOutcome::Success { .. } => {
                    report.successful += 1;
                    report.total_fees = report.total_fees.saturating_add(tx.fee());
                }
                TxOutcome::Failure { reason } => {
                    report.failed += 1;
                    tracing::debug!("Transaction {} failed: {}", tx.id(), reason);
                }
            }

            report.results.push(TransactionResult {
                tx_id: tx.id().to_string(),
                fee: tx.fee(),
                outcome,
            });
        }

        self.total_txs_processed
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        self.total_batches_processed.fetch_add(1, Ordering::Relaxed);

        report.execution_time_us = start_time.elapsed().as_micros() as u64;

        tracing::debug!(
            "Executed batch: {} txs on {} workers | {} ok, {} failed | {}us",
            batch.len(),
            workers,
            report.successful,
            report.failed,
            report.execution_time_us
        );

        report
    }

    /// Lock, read, apply, write, unlock for a single transaction
    fn execute_one(&self, tx: &Transaction) -> TxOutcome {
        let timeout = self.config.lock_timeout_ms.map(Duration::from_millis);

        let _guard = match self
            .store
            .locks()
            .acquire(tx.read_keys(), tx.write_keys(), timeout)
        {
            Ok(guard) => guard,
            Err(reason) => return TxOutcome::Failure { reason },
        };

        let reads: ReadSet = tx
            .read_keys()
            .iter()
            .map(|k| (k.clone(), self.store.read(k)))
            .collect();

        let applied = panic::catch_unwind(AssertUnwindSafe(|| tx.apply(&reads)));
        let writes = match applied {
            Ok(Ok(writes)) => writes,
            Ok(Err(e)) => {
                return TxOutcome::Failure {
                    reason: ExecutionError::Effect(e),
                }
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                return TxOutcome::Failure {
                    reason: ExecutionError::EffectPanicked { message },
                };
            }
        };

        if let Some(key) = writes.keys().find(|k| !tx.write_keys().contains(*k)) {
            return TxOutcome::Failure {
                reason: ExecutionError::UndeclaredWrite { key: key.clone() },
            };
        }

        for (key, value) in &writes {
            self.store.write(key.clone(), *value);
        }

        tracing::trace!("Transaction {} wrote {} keys", tx.id(), writes.len());

        TxOutcome::Success { updates: writes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{Effect, Increment, Transfer};
    use crate::error::EffectError;

    fn increment(id: &str, key: &str, delta: i64) -> Transaction {
        Transaction::builder(id)
            .reads_writes([key])
            .effect(Increment::new(key, delta))
            .build()
    }

    #[derive(Debug)]
    struct WritesElsewhere;

    impl Effect for WritesElsewhere {
        fn apply(&self, _reads: &ReadSet) -> Result<WriteSet, EffectError> {
            let mut writes = WriteSet::new();
            writes.insert("declared".to_string(), 1);
            writes.insert("undeclared".to_string(), 1);
            Ok(writes)
        }

        fn describe(&self) -> String {
            "writes-elsewhere".to_string()
        }
    }

    #[derive(Debug)]
    struct Panics;

    impl Effect for Panics {
        fn apply(&self, _reads: &ReadSet) -> Result<WriteSet, EffectError> {
            panic!("effect blew up");
        }

        fn describe(&self) -> String {
            "panics".to_string()
        }
    }

    #[test]
    fn test_empty_batch() {
        let engine = ConcurrencyEngine::new(LedgerStore::new(), EngineConfig::default());
        let report = engine.execute(&[]);
        assert!(report.is_empty());
        assert_eq!(engine.batches_processed(), 0);
    }

    #[test]
    fn test_single_increment() {
        let engine = ConcurrencyEngine::new(LedgerStore::new(), EngineConfig::default());
        let tx = increment("tx1", "A", 10);

        let report = engine.execute(std::slice::from_ref(&tx));
        assert_eq!(engine.store().read("A"), 10);
        assert!(report.outcome("tx1").unwrap().is_success());

        engine.execute(&[tx]);
        assert_eq!(engine.store().read("A"), 20);
        assert_eq!(engine.transactions_processed(), 2);
    }

    #[test]
    fn test_failure_writes_nothing_and_siblings_proceed() {
        let store = LedgerStore::new();
        store.write("alice", 5);
        let engine = ConcurrencyEngine::new(store, EngineConfig::default());

        let overdraft = Transaction::builder("overdraft")
            .reads_writes(["alice", "bob"])
            .effect(Transfer::new("alice", "bob", 50))
            .build();
        let ok = increment("ok", "C", 1);

        let report = engine.execute(&[overdraft, ok]);
        assert_eq!(report.successful, 1);
        assert_eq!(report.failed, 1);
        assert!(matches!(
            report.outcome("overdraft"),
            Some(TxOutcome::Failure {
                reason: ExecutionError::Effect(EffectError::InsufficientFunds { .. })
            })
        ));
        assert_eq!(engine.store().read("alice"), 5);
        assert_eq!(engine.store().read("bob"), 0);
        assert_eq!(engine.store().read("C"), 1);
    }

    #[test]
    fn test_undeclared_write_rejected() {
        let engine = ConcurrencyEngine::new(LedgerStore::new(), EngineConfig::default());
        let tx = Transaction::builder("sneaky")
            .writes(["declared"])
            .effect(WritesElsewhere)
            .build();

        let report = engine.execute(&[tx]);
        assert_eq!(
            report.outcome("sneaky"),
            Some(&TxOutcome::Failure {
                reason: ExecutionError::UndeclaredWrite {
                    key: "undeclared".to_string()
                }
            })
        );
        assert!(!engine.store().contains("declared"));
        assert!(!engine.store().contains("undeclared"));
    }

    #[test]
    fn test_panicking_effect_is_contained() {
        let engine = ConcurrencyEngine::new(LedgerStore::new(), EngineConfig::default());
        let bad = Transaction::builder("bad")
            .writes(["A"])
            .effect(Panics)
            .build();
        let good = increment("good", "A", 3);

        let report = engine.execute(&[bad, good]);
        assert!(matches!(
            report.outcome("bad"),
            Some(TxOutcome::Failure {
                reason: ExecutionError::EffectPanicked { .. }
            })
        ));
        // The lock on "A" was released when the panic unwound
        assert_eq!(engine.store().read("A"), 3);
    }

    #[test]
    fn test_fees_only_count_successes() {
        let engine = ConcurrencyEngine::new(LedgerStore::new(), EngineConfig::default());
        let paid = Transaction::builder("paid")
            .reads_writes(["A"])
            .effect(Increment::new("A", 1))
            .fee(7)
            .build();
        let failed = Transaction::builder("failed")
            .reads_writes(["x", "y"])
            .effect(Transfer::new("x", "y", 1))
            .fee(100)
            .build();

        let report = engine.execute(&[paid, failed]);
        assert_eq!(report.total_fees, 7);
    }

    #[test]
    fn test_single_worker_still_completes() {
        let config = EngineConfig {
            max_workers: 1,
            ..Default::default()
        };
        let engine = ConcurrencyEngine::new(LedgerStore::new(), config);
        let batch: Vec<Transaction> = (0..20)
            .map(|i| increment(&format!("tx{}", i), "A", 1))
            .collect();

        let report = engine.execute(&batch);
        assert_eq!(report.successful, 20);
        assert_eq!(engine.store().read("A"), 20);
    }

    #[test]
    fn test_lock_timeout_reported() {
        let store = LedgerStore::new();
        let config = EngineConfig {
            lock_timeout_ms: Some(10),
            ..Default::default()
        };
        let engine = ConcurrencyEngine::new(store.clone(), config);

        let writes: std::collections::BTreeSet<String> = ["A".to_string()].into();
        let held = store
            .locks()
            .acquire(&Default::default(), &writes, None)
            .unwrap();

        let report = engine.execute(&[increment("blocked", "A", 1)]);
        assert_eq!(
            report.outcome("blocked"),
            Some(&TxOutcome::Failure {
                reason: ExecutionError::LockTimeout {
                    key: "A".to_string()
                }
            })
        );
        drop(held);
        assert_eq!(store.read("A"), 0);
    }

    #[test]
    fn test_repeated_id_reports_last_outcome() {
        let engine = ConcurrencyEngine::new(LedgerStore::new(), EngineConfig::default());
        let overdraft = Transaction::builder("dup")
            .reads_writes(["alice", "bob"])
            .effect(Transfer::new("alice", "bob", 50))
            .build();

        let report = engine.execute(&[increment("dup", "A", 1), overdraft]);
        assert_eq!(report.results.len(), 2);
        assert!(report.results[0].outcome.is_success());

        let last = report.outcome("dup").unwrap();
        assert!(!last.is_success());
        assert_eq!(report.outcomes().get("dup"), Some(last));
    }
}
