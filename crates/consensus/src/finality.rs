//! Finality tracker - a Tower-BFT style vote recorder
//!
//! Each block moves Proposed -> Voted -> Finalized and never back. A block is
//! finalized once `quorum` distinct voters have voted for it (a quorum of 1
//! finalizes on the first vote). Once a block is finalized on top of a
//! parent, votes for any other block extending that same parent are
//! rejected, and so are votes for any descendant of such a block.

use crate::error::ConsensusError;
use crate::types::{Block, BlockStatus, ConsensusStats, Vote};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

struct TrackedBlock {
    block: Block,
    status: BlockStatus,
}

#[derive(Default)]
struct FinalityState {
    blocks: BTreeMap<u64, TrackedBlock>,
    /// Finalized block per parent
    finalized_children: HashMap<Option<u64>, u64>,
    stats: ConsensusStats,
}

/// Records votes and decides finality; owns the canonical copy of each block
pub struct FinalityTracker {
    quorum: usize,
    state: RwLock<FinalityState>,
}

impl FinalityTracker {
    /// Create a tracker that needs `quorum` distinct voters (minimum 1)
    pub fn new(quorum: usize) -> Self {
        Self {
            quorum: quorum.max(1),
            state: RwLock::new(FinalityState::default()),
        }
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Start tracking a block in the Proposed state
    pub fn track(&self, block: Block) -> Result<(), ConsensusError> {
        let mut state = self.state.write();
        Self::track_locked(&mut state, block)
    }

    fn track_locked(state: &mut FinalityState, block: Block) -> Result<(), ConsensusError> {
        if let Some(existing) = state.blocks.get(&block.id) {
            if existing.block.compute_hash() != block.compute_hash() {
                return Err(ConsensusError::ConflictingBlock(block.id));
            }
            return Ok(());
        }

        state.stats.blocks_tracked += 1;
        state.blocks.insert(
            block.id,
            TrackedBlock {
                block,
                status: BlockStatus::Proposed,
            },
        );
        Ok(())
    }

    /// Record `voter`'s vote for `block` and return the block's status.
    ///
    /// Unknown blocks are tracked first. Voting twice is a no-op.
    pub fn vote(&self, block: &Block, voter: &str) -> Result<BlockStatus, ConsensusError> {
        let mut state = self.state.write();

        if !state.blocks.contains_key(&block.id) {
            Self::track_locked(&mut state, block.clone())?;
        }

        if let Some((prev_block_id, finalized_id)) = Self::find_regression(&state, block) {
            state.stats.regressions_rejected += 1;
            tracing::warn!(
                "Rejected vote by {} for block {}: block {} already finalized on {:?}",
                voter,
                block.id,
                finalized_id,
                prev_block_id
            );
            return Err(ConsensusError::FinalityRegression {
                block_id: block.id,
                prev_block_id,
                finalized_id,
            });
        }

        let quorum = self.quorum;
        let FinalityState {
            blocks,
            finalized_children,
            stats,
        } = &mut *state;

        let tracked = blocks
            .get_mut(&block.id)
            .ok_or(ConsensusError::UnknownBlock(block.id))?;

        if tracked.block.compute_hash() != block.compute_hash() {
            return Err(ConsensusError::ConflictingBlock(block.id));
        }

        if !tracked.block.votes.contains_key(voter) {
            let vote = Vote::new(voter, &tracked.block);
            tracked.block.votes.insert(voter.to_string(), vote);
            stats.votes_recorded += 1;
        }

        if tracked.status == BlockStatus::Finalized {
            return Ok(BlockStatus::Finalized);
        }

        if tracked.block.votes.len() >= quorum {
            tracked.status = BlockStatus::Finalized;
            finalized_children.insert(tracked.block.prev_block_id, tracked.block.id);
            stats.blocks_finalized += 1;
            stats.last_finalized_block = Some(
                stats
                    .last_finalized_block
                    .map_or(tracked.block.id, |last| last.max(tracked.block.id)),
            );
            tracing::info!(
                "Block {} finalized with {} votes",
                tracked.block.id,
                tracked.block.votes.len()
            );
        } else {
            tracked.status = BlockStatus::Voted;
            tracing::debug!(
                "Block {} has {}/{} votes",
                tracked.block.id,
                tracked.block.votes.len(),
                quorum
            );
        }

        Ok(tracked.status)
    }

    /// Walk from `block` back to its nearest finalized ancestor. Returns the
    /// first parent on that path whose finalized child is a different block,
    /// along with that child.
    fn find_regression(state: &FinalityState, block: &Block) -> Option<(Option<u64>, u64)> {
        let mut current = (block.id, block.prev_block_id);
        // Bounded by the number of tracked blocks, so a malformed cycle ends
        for _ in 0..=state.blocks.len() {
            let (id, prev) = current;
            if let Some(&finalized_id) = state.finalized_children.get(&prev) {
                if finalized_id != id {
                    return Some((prev, finalized_id));
                }
            }
            let parent = prev.and_then(|p| state.blocks.get(&p))?;
            if parent.status == BlockStatus::Finalized {
                return None;
            }
            current = (parent.block.id, parent.block.prev_block_id);
        }
        None
    }

    /// Vote for an already tracked block by id
    pub fn vote_by_id(&self, block_id: u64, voter: &str) -> Result<BlockStatus, ConsensusError> {
        let block = self
            .block(block_id)
            .ok_or(ConsensusError::UnknownBlock(block_id))?;
        self.vote(&block, voter)
    }

    /// True once the block has been finalized; never reverts
    pub fn is_finalized(&self, block_id: u64) -> bool {
        self.status(block_id) == Some(BlockStatus::Finalized)
    }

    pub fn status(&self, block_id: u64) -> Option<BlockStatus> {
        self.state.read().blocks.get(&block_id).map(|t| t.status)
    }

    /// Canonical copy of a block, including its votes
    pub fn block(&self, block_id: u64) -> Option<Block> {
        self.state
            .read()
            .blocks
            .get(&block_id)
            .map(|t| t.block.clone())
    }

    /// Ids of all finalized blocks, ascending
    pub fn finalized_ids(&self) -> Vec<u64> {
        self.state
            .read()
            .blocks
            .iter()
            .filter(|(_, t)| t.status == BlockStatus::Finalized)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn stats(&self) -> ConsensusStats {
        self.state.read().stats.clone()
    }
}

impl Default for FinalityTracker {
    fn default() -> Self {
        Self::new(1)
    }
}
