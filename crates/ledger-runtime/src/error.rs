//! Runtime Errors

use crate::Value;
use thiserror::Error;

/// Errors raised by a transaction effect while computing its writes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EffectError {
    #[error("Insufficient funds in {key}: needed {needed}, available {available}")]
    InsufficientFunds {
        key: String,
        needed: Value,
        available: Value,
    },

    #[error("Arithmetic overflow on {key}")]
    Overflow { key: String },

    #[error("Effect rejected: {0}")]
    Rejected(String),
}

/// Reason a single transaction failed inside a batch
///
/// Failures are scoped to their transaction and never abort the batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error(transparent)]
    Effect(#[from] EffectError),

    #[error("Effect wrote undeclared key {key}")]
    UndeclaredWrite { key: String },

    #[error("Timed out acquiring lock on {key}")]
    LockTimeout { key: String },

    #[error("Effect panicked: {message}")]
    EffectPanicked { message: String },

    #[error("Transaction not executed")]
    NotExecuted,
}

/// Batch serialization failed while computing an availability commitment
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitmentError {
    #[error("Failed to encode batch: {0}")]
    Encoding(String),
}

/// Batch proposer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProposerError {
    #[error("Ordering hint for {proposer} is not a permutation of the pending list ({expected} pending, {actual} returned)")]
    NotAPermutation {
        proposer: String,
        expected: usize,
        actual: usize,
    },
}

/// Epoch manager errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochError {
    #[error("Group size must be at least 1")]
    InvalidGroupSize,

    #[error("No participants to partition")]
    NoParticipants,
}
