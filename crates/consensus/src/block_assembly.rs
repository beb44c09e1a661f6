//! Block assembly - packs batch commitments and the event chain head into blocks

use crate::error::ConsensusError;
use crate::event_chain::EventChain;
use crate::finality::FinalityTracker;
use crate::types::{short_digest, Block, BlockStatus, ConsensusConfig, Digest};
use parking_lot::Mutex;
use std::sync::Arc;

struct BlockIds {
    next_id: u64,
    last_block_id: Option<u64>,
}

/// Builds blocks on top of the previous one and votes on them
pub struct BlockAssembly {
    chain: Arc<EventChain>,
    finality: Arc<FinalityTracker>,
    node_id: String,
    ids: Mutex<BlockIds>,
}

impl BlockAssembly {
    pub fn new(chain: Arc<EventChain>, finality: Arc<FinalityTracker>, node_id: impl Into<String>) -> Self {
        Self {
            chain,
            finality,
            node_id: node_id.into(),
            ids: Mutex::new(BlockIds {
                next_id: 0,
                last_block_id: None,
            }),
        }
    }

    /// Fresh chain and tracker from config
    pub fn from_config(config: &ConsensusConfig) -> Self {
        Self::new(
            Arc::new(EventChain::new(config.genesis_seed.as_bytes())),
            Arc::new(FinalityTracker::new(config.quorum)),
            config.node_id.clone(),
        )
    }

    /// Build the next block over `commitments`.
    ///
    /// The block references the current event chain head and extends the
    /// last built block. It is tracked by the finality tracker in the
    /// Proposed state.
    pub fn build(&self, commitments: Vec<Digest>) -> Result<Block, ConsensusError> {
        let mut ids = self.ids.lock();

        let block = Block::new(
            ids.next_id,
            self.chain.current_head(),
            commitments,
            ids.last_block_id,
        );
        self.finality.track(block.clone())?;

        ids.last_block_id = Some(block.id);
        ids.next_id += 1;

        tracing::debug!(
            "Built block {} on {:?} (chain={}, {} commitments)",
            block.id,
            block.prev_block_id,
            short_digest(&block.chain_ref),
            block.commitment_refs.len()
        );
        Ok(block)
    }

    /// Vote for `block` as this node; true if it is now finalized
    pub fn finalize(&self, block: &Block) -> Result<bool, ConsensusError> {
        let status = self.finality.vote(block, &self.node_id)?;
        Ok(status == BlockStatus::Finalized)
    }

    /// Id of the most recently built block
    pub fn last_block_id(&self) -> Option<u64> {
        self.ids.lock().last_block_id
    }

    pub fn next_block_id(&self) -> u64 {
        self.ids.lock().next_id
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn chain(&self) -> &Arc<EventChain> {
        &self.chain
    }

    pub fn finality(&self) -> &Arc<FinalityTracker> {
        &self.finality
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_ids_increase_and_link() {
        let assembly = BlockAssembly::from_config(&ConsensusConfig::default());
        assert_eq!(assembly.last_block_id(), None);

        let b0 = assembly.build(vec![[1u8; 32]]).unwrap();
        let b1 = assembly.build(vec![]).unwrap();
        let b2 = assembly.build(vec![[2u8; 32], [3u8; 32]]).unwrap();

        assert_eq!((b0.id, b1.id, b2.id), (0, 1, 2));
        assert!(b0.is_genesis());
        assert_eq!(b1.prev_block_id, Some(0));
        assert_eq!(b2.prev_block_id, Some(1));
        assert_eq!(assembly.last_block_id(), Some(2));
        assert_eq!(assembly.next_block_id(), 3);
    }

    #[test]
    fn test_block_references_chain_head() {
        let assembly = BlockAssembly::from_config(&ConsensusConfig::default());
        assembly.chain().record(b"proposal");
        let head = assembly.chain().current_head();

        let block = assembly.build(vec![[4u8; 32]]).unwrap();
        assert_eq!(block.chain_ref, head);
        assert_eq!(assembly.finality().status(block.id), Some(BlockStatus::Proposed));
    }

    #[test]
    fn test_finalize_with_default_quorum() {
        let assembly = BlockAssembly::from_config(&ConsensusConfig::default());
        let block = assembly.build(vec![[5u8; 32]]).unwrap();

        assert!(assembly.finalize(&block).unwrap());
        assert!(assembly.finality().is_finalized(block.id));
        let stored = assembly.finality().block(block.id).unwrap();
        assert!(stored.votes.contains_key("node-0"));
    }

    #[test]
    fn test_finalize_below_quorum() {
        let config = ConsensusConfig::new("node-0")
            .with_quorum(2)
            .with_genesis_seed("TESTNET");
        let assembly = BlockAssembly::from_config(&config);
        assert_eq!(
            assembly.chain().current_head(),
            crate::event_chain::genesis_head(b"TESTNET")
        );
        let block = assembly.build(vec![]).unwrap();

        assert!(!assembly.finalize(&block).unwrap());
        assert_eq!(assembly.finality().status(block.id), Some(BlockStatus::Voted));
        assert_eq!(
            assembly.finality().vote(&block, "node-1"),
            Ok(BlockStatus::Finalized)
        );
    }

    #[test]
    fn test_concurrent_builds_never_repeat_ids() {
        let assembly = Arc::new(BlockAssembly::from_config(&ConsensusConfig::default()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let assembly = assembly.clone();
                thread::spawn(move || {
                    (0..25)
                        .map(|_| assembly.build(vec![]).unwrap().id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..100).collect::<Vec<u64>>());
    }
}
