//! Core types for block assembly and finality

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 32-byte BLAKE3 digest
pub type Digest = [u8; 32];

/// Short base58 rendering of a digest for logs
pub fn short_digest(digest: &Digest) -> String {
    let encoded = bs58::encode(digest).into_string();
    encoded.chars().take(8).collect()
}

/// A validator's vote on a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Voting participant
    pub voter: String,
    /// Block voted on
    pub block_id: u64,
    /// Hash of the block content the vote covers
    pub block_hash: Digest,
    /// Timestamp (unix millis)
    pub timestamp: u64,
}

impl Vote {
    pub fn new(voter: &str, block: &Block) -> Self {
        Self {
            voter: voter.to_string(),
            block_id: block.id,
            block_hash: block.compute_hash(),
            timestamp: chrono::Utc::now().timestamp_millis().max(0) as u64,
        }
    }
}

/// A block referencing the event chain and a set of batch commitments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Strictly increasing block id, starting at 0
    pub id: u64,
    /// Event chain head when the block was built
    pub chain_ref: Digest,
    /// Availability commitments of the batches in this block
    pub commitment_refs: Vec<Digest>,
    /// Block this one extends (None for the first block)
    pub prev_block_id: Option<u64>,
    /// Votes by voter
    pub votes: BTreeMap<String, Vote>,
}

impl Block {
    /// Create a new block with no votes
    pub fn new(
        id: u64,
        chain_ref: Digest,
        commitment_refs: Vec<Digest>,
        prev_block_id: Option<u64>,
    ) -> Self {
        Self {
            id,
            chain_ref,
            commitment_refs,
            prev_block_id,
            votes: BTreeMap::new(),
        }
    }

    /// Hash of the block content (votes excluded)
    pub fn compute_hash(&self) -> Digest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.id.to_le_bytes());
        hasher.update(&self.chain_ref);
        match self.prev_block_id {
            Some(prev) => {
                hasher.update(&[1]);
                hasher.update(&prev.to_le_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
        hasher.update(&(self.commitment_refs.len() as u64).to_le_bytes());
        for commitment in &self.commitment_refs {
            hasher.update(commitment);
        }

        *hasher.finalize().as_bytes()
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_block_id.is_none()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block {} (chain={}, {} batches, {} votes)",
            self.id,
            short_digest(&self.chain_ref),
            self.commitment_refs.len(),
            self.votes.len()
        )
    }
}

/// Finality state of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlockStatus {
    /// Built, no votes yet
    Proposed,
    /// Has votes, quorum not reached
    Voted,
    /// Irreversibly committed
    Finalized,
}

/// Configuration for block assembly and finality
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// This node's identity (used as the voter)
    pub node_id: String,
    /// Distinct voters needed to finalize a block
    pub quorum: usize,
    /// Seed hashed into the event chain's genesis head
    pub genesis_seed: String,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            node_id: "node-0".to_string(),
            quorum: 1,
            genesis_seed: "GENESIS".to_string(),
        }
    }
}

impl ConsensusConfig {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Default::default()
        }
    }

    pub fn with_quorum(mut self, quorum: usize) -> Self {
        self.quorum = quorum;
        self
    }

    pub fn with_genesis_seed(mut self, seed: impl Into<String>) -> Self {
        self.genesis_seed = seed.into();
        self
    }
}

/// Stats about block production and finality
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsensusStats {
    pub blocks_tracked: u64,
    pub votes_recorded: u64,
    pub blocks_finalized: u64,
    pub regressions_rejected: u64,
    pub last_finalized_block: Option<u64>,
}
