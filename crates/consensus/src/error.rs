//! Consensus Errors

use thiserror::Error;

/// Errors from block assembly and finality tracking
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("Vote for block {block_id} rejected: block {finalized_id} is already finalized on top of {prev_block_id:?}")]
    FinalityRegression {
        block_id: u64,
        prev_block_id: Option<u64>,
        finalized_id: u64,
    },

    #[error("Block {0} conflicts with a tracked block of the same id")]
    ConflictingBlock(u64),

    #[error("Unknown block {0}")]
    UnknownBlock(u64),
}
