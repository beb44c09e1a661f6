//! Ledger Consensus - event chain, block assembly and vote-based finality
//!
//! Architecture:
//! - The event chain folds every proposal into a running BLAKE3 head
//! - Block assembly packs batch commitments plus the chain head into blocks
//! - The finality tracker counts distinct votes and finalizes at quorum
//! - A finalized parent never gets a second finalized child

pub mod types;
pub mod error;
pub mod event_chain;
pub mod finality;
pub mod block_assembly;

pub use types::*;
pub use error::ConsensusError;
pub use event_chain::{genesis_head, next_head, replay, ChainEntry, EventChain};
pub use finality::FinalityTracker;
pub use block_assembly::BlockAssembly;
