//! Ledger Runtime - transaction execution core
//!
//! This crate provides the execution side of the ledger:
//! - Transactions that declare their read/write keys up front
//! - In-memory ledger state with one lock per key
//! - A concurrency engine that runs independent transactions in parallel
//! - Batch proposers, membership epochs and batch availability commitments

pub mod availability;
pub mod batch_proposer;
pub mod effect;
pub mod engine;
pub mod epoch;
pub mod error;
pub mod key_locks;
pub mod ledger_store;
pub mod transaction;


pub use availability::{commit, Commitment};
pub use batch_proposer::{BatchProposer, Lane, OrderingHint};
pub use effect::{balance_key, Effect, Increment, ReadSet, RewardPayout, Transfer, WriteSet};
pub use engine::{ConcurrencyEngine, EngineConfig, ExecutionReport, TransactionResult, TxOutcome};
pub use epoch::{EpochManager, Groups};
pub use error::{CommitmentError, EffectError, EpochError, ExecutionError, ProposerError};
pub use key_locks::{KeyLockGuard, KeyLocks, LockMode};
pub use ledger_store::LedgerStore;
pub use transaction::{Transaction, TransactionBuilder};

/// Numeric value stored under a ledger key
pub type Value = i64;

/// Shared pool the reward payouts are drawn from
pub const ESCROW_POOL_KEY: &str = "ESCROW_POOL";

/// Initial escrow pool balance
pub const DEFAULT_ESCROW_BALANCE: Value = 1_000_000;
