//! Ledger Node - single-node round pipeline
//!
//! Wires the runtime and consensus crates together: submitted transactions
//! are staged per participant, sealed into committed batches, packed into
//! blocks on the event chain and executed once the block is finalized.

pub mod config;
pub mod demo;
pub mod producer;
pub mod rewards;

pub use config::NodeConfig;
pub use producer::{BlockProducer, ProducerHandle, RoundReport, TransactionSender};
pub use rewards::{ActivityScorer, ProfileOrdering, RewardScorer};
