//! Node Configuration

use anyhow::{Context, Result};
use ledger_consensus::ConsensusConfig;
use ledger_runtime::{EngineConfig, Value, DEFAULT_ESCROW_BALANCE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Participants that own a batch proposer
    pub participants: Vec<String>,
    /// Participants per group when an epoch starts
    pub group_size: usize,
    /// Rounds per membership epoch (0 = never reshuffle)
    pub epoch_length_rounds: u64,
    /// Round time in milliseconds
    pub block_time_ms: u64,
    /// Initial escrow pool balance
    pub escrow_balance: Value,
    /// Amount paid out per reward cycle
    pub reward_pool: Value,
    /// Rounds per reward cycle (0 = never pay out)
    pub reward_cycle_rounds: u64,
    /// Reorder primary lanes by profile affinity before sealing
    pub ordering_hint: bool,
    /// Free-text focus per participant, matched against transaction memos
    pub node_profiles: BTreeMap<String, String>,
    /// Capacity of the submission queue
    pub submit_queue_capacity: usize,
    pub engine: EngineConfig,
    pub consensus: ConsensusConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let node_profiles = [
            ("NodeA", "Focus: DeFi, financial AI"),
            ("NodeB", "Focus: NFTs, gaming synergy"),
            ("NodeC", "Focus: cross-chain bridging"),
        ]
        .into_iter()
        .map(|(node, profile)| (node.to_string(), profile.to_string()))
        .collect();

        Self {
            participants: vec!["NodeA".into(), "NodeB".into(), "NodeC".into()],
            group_size: 2,
            epoch_length_rounds: 10,
            block_time_ms: 400,
            escrow_balance: DEFAULT_ESCROW_BALANCE,
            reward_pool: 100_000,
            reward_cycle_rounds: 5,
            ordering_hint: true,
            node_profiles,
            submit_queue_capacity: 1024,
            engine: EngineConfig::default(),
            consensus: ConsensusConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load a JSON config; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Reject configs the producer cannot run with
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.participants.is_empty(), "At least one participant is required");
        anyhow::ensure!(self.group_size > 0, "group_size must be at least 1");
        anyhow::ensure!(self.block_time_ms > 0, "block_time_ms must be at least 1");
        anyhow::ensure!(self.consensus.quorum > 0, "consensus.quorum must be at least 1");
        anyhow::ensure!(self.reward_pool >= 0, "reward_pool must not be negative");
        Ok(())
    }
}
