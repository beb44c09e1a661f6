//! Block Producer - fixed-interval round loop
//!
//! Every round seals one batch per proposer, commits the batches, records the
//! proposal on the event chain, builds and votes on a block, and executes the
//! batches only once the block is finalized. Batches of a block that did not
//! finalize move to their proposer's secondary lane and are retried in the
//! next (fallback) round.

use crate::config::NodeConfig;
use crate::rewards::{ActivityScorer, ProfileOrdering, RewardScorer};
use anyhow::Result;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use ledger_consensus::{short_digest, Block, BlockAssembly};
use ledger_runtime::{
    commit, BatchProposer, ConcurrencyEngine, EpochManager, ExecutionReport, Lane, LedgerStore,
    OrderingHint, Transaction, Value,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Event published after every round
#[derive(Clone, Debug)]
pub struct RoundReport {
    pub round: u64,
    /// Membership epoch the round ran in
    pub epoch: u64,
    /// Block built this round (None when every lane was empty)
    pub block: Option<Block>,
    pub finalized: bool,
    /// Execution of the block's transactions, once finalized
    pub execution: Option<ExecutionReport>,
    /// Block carrying the reward payout, if a cycle closed
    pub reward_block: Option<Block>,
    pub reward: Option<ExecutionReport>,
    /// Round time in microseconds
    pub processing_time_us: u64,
}

impl RoundReport {
    fn empty(round: u64, epoch: u64) -> Self {
        Self {
            round,
            epoch,
            block: None,
            finalized: false,
            execution: None,
            reward_block: None,
            reward: None,
            processing_time_us: 0,
        }
    }
}

struct Submission {
    participant: String,
    lane: Lane,
    tx: Transaction,
}

/// Handle for submitting transactions to a participant's proposer
#[derive(Clone)]
pub struct TransactionSender {
    sender: Sender<Submission>,
}

impl TransactionSender {
    /// Queue a transaction on a participant's primary lane
    pub fn send(&self, participant: &str, tx: Transaction) -> Result<()> {
        self.send_to_lane(participant, Lane::Primary, tx)
    }

    pub fn send_to_lane(&self, participant: &str, lane: Lane, tx: Transaction) -> Result<()> {
        self.sender
            .try_send(Submission {
                participant: participant.to_string(),
                lane,
                tx,
            })
            .map_err(|e| anyhow::anyhow!("Failed to submit transaction: {}", e))
    }
}

/// Stops a running producer from another thread
#[derive(Clone)]
pub struct ProducerHandle {
    running: Arc<AtomicBool>,
}

impl ProducerHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Block Producer
///
/// Owns the proposers, the engine and block assembly for one node.
pub struct BlockProducer {
    proposers: BTreeMap<String, BatchProposer>,
    engine: Arc<ConcurrencyEngine>,
    assembly: Arc<BlockAssembly>,
    epochs: EpochManager,
    scorer: Box<dyn RewardScorer>,
    hint: Option<Box<dyn OrderingHint>>,
    /// Payout whose block did not finalize yet
    pending_reward: Option<Transaction>,
    tx_receiver: Receiver<Submission>,
    tx_sender: Sender<Submission>,
    update_sender: broadcast::Sender<RoundReport>,
    block_time_ms: u64,
    group_size: usize,
    epoch_length_rounds: u64,
    max_rounds: Option<u64>,
    round: u64,
    running: Arc<AtomicBool>,
}

impl BlockProducer {
    /// Create a producer over `store` from a validated config
    pub fn new(config: &NodeConfig, store: LedgerStore) -> Result<Self> {
        config.validate()?;

        let (tx_sender, tx_receiver) = bounded(config.submit_queue_capacity.max(1));
        let (update_sender, _) = broadcast::channel(64);

        let proposers = config
            .participants
            .iter()
            .map(|p| (p.clone(), BatchProposer::new(p.clone())))
            .collect();

        let hint: Option<Box<dyn OrderingHint>> = if config.ordering_hint {
            Some(Box::new(ProfileOrdering::new(&config.node_profiles)))
        } else {
            None
        };

        Ok(Self {
            proposers,
            engine: Arc::new(ConcurrencyEngine::new(store, config.engine.clone())),
            assembly: Arc::new(BlockAssembly::from_config(&config.consensus)),
            epochs: EpochManager::new(config.participants.iter().cloned()),
            scorer: Box::new(ActivityScorer::new(
                &config.node_profiles,
                config.reward_pool,
                config.reward_cycle_rounds,
            )),
            hint,
            pending_reward: None,
            tx_receiver,
            tx_sender,
            update_sender,
            block_time_ms: config.block_time_ms,
            group_size: config.group_size,
            epoch_length_rounds: config.epoch_length_rounds,
            max_rounds: None,
            round: 0,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Stop `run` after this many rounds
    pub fn with_max_rounds(mut self, max_rounds: Option<u64>) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_scorer(mut self, scorer: Box<dyn RewardScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_ordering_hint(mut self, hint: Option<Box<dyn OrderingHint>>) -> Self {
        self.hint = hint;
        self
    }

    /// Get a sender for submitting transactions
    pub fn transaction_sender(&self) -> TransactionSender {
        TransactionSender {
            sender: self.tx_sender.clone(),
        }
    }

    /// Subscribe to round reports
    pub fn subscribe(&self) -> broadcast::Receiver<RoundReport> {
        self.update_sender.subscribe()
    }

    pub fn handle(&self) -> ProducerHandle {
        ProducerHandle {
            running: self.running.clone(),
        }
    }

    pub fn engine(&self) -> &Arc<ConcurrencyEngine> {
        &self.engine
    }

    pub fn assembly(&self) -> &Arc<BlockAssembly> {
        &self.assembly
    }

    pub fn epochs(&self) -> &EpochManager {
        &self.epochs
    }

    pub fn proposer(&self, participant: &str) -> Option<&BatchProposer> {
        self.proposers.get(participant)
    }

    /// Dock a participant's reward score for the current cycle
    pub fn penalize(&mut self, participant: &str, points: Value, reason: &str) {
        self.scorer.penalize(participant, points, reason);
    }

    /// Number of rounds run so far
    pub fn current_round(&self) -> u64 {
        self.round
    }

    fn drain_submissions(&self) {
        loop {
            match self.tx_receiver.try_recv() {
                Ok(Submission {
                    participant,
                    lane,
                    tx,
                }) => match self.proposers.get(&participant) {
                    Some(proposer) => match lane {
                        Lane::Primary => proposer.add_to_primary(tx),
                        Lane::Secondary => proposer.add_to_secondary(tx),
                    },
                    None => tracing::warn!(
                        "Dropping transaction {} for unknown participant {}",
                        tx.id(),
                        participant
                    ),
                },
                // We hold a sender, so the channel is never disconnected
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Commit the batches, record them on the event chain, build and vote
    fn seal(&self, batches: &[(String, Vec<Transaction>)]) -> Result<(Block, bool)> {
        let commitments = batches
            .iter()
            .map(|(_, batch)| commit(batch))
            .collect::<Result<Vec<_>, _>>()?;

        let head = self.assembly.chain().record(&commitments.concat());
        let block = self.assembly.build(commitments)?;
        let finalized = self.assembly.finalize(&block)?;

        tracing::debug!(
            "Sealed {} on head {} (finalized: {})",
            block,
            short_digest(&head),
            finalized
        );
        Ok((block, finalized))
    }

    /// Run one round; `fallback` seals the secondary lanes instead of the primary ones
    pub fn run_round(&mut self, fallback: bool) -> Result<RoundReport> {
        let start = Instant::now();
        let round = self.round;
        self.round += 1;

        self.drain_submissions();

        if self.epoch_length_rounds > 0 && round % self.epoch_length_rounds == 0 {
            self.epochs.start_new_epoch(self.group_size)?;
        }
        let mut report = RoundReport::empty(round, self.epochs.current_epoch());

        if let Some(hint) = &self.hint {
            for proposer in self.proposers.values() {
                if let Err(e) = proposer.apply_ordering_hint(hint.as_ref()) {
                    tracing::warn!("Ignoring ordering hint: {}", e);
                }
            }
        }

        let batches: Vec<(String, Vec<Transaction>)> = self
            .proposers
            .iter()
            .map(|(id, proposer)| (id.clone(), proposer.form_batch(fallback)))
            .filter(|(_, batch)| !batch.is_empty())
            .collect();

        if !batches.is_empty() {
            let lane = if fallback { Lane::Secondary } else { Lane::Primary };
            let (block, finalized) = match self.seal(&batches) {
                Ok(sealed) => sealed,
                Err(e) => {
                    self.requeue(batches, lane);
                    return Err(e);
                }
            };

            if finalized {
                let activity: BTreeMap<String, Value> = batches
                    .iter()
                    .map(|(id, batch)| (id.clone(), batch.len() as Value))
                    .collect();
                let memos: Vec<String> = batches
                    .iter()
                    .flat_map(|(_, batch)| batch.iter())
                    .filter(|tx| !tx.memo().is_empty())
                    .map(|tx| tx.memo().to_string())
                    .collect();
                let txs: Vec<Transaction> = batches.into_iter().flat_map(|(_, b)| b).collect();

                let execution = self.engine.execute(&txs);
                tracing::info!(
                    "Round {}: block {} finalized, {} ok / {} failed, fees {}",
                    round,
                    block.id,
                    execution.successful,
                    execution.failed,
                    execution.total_fees
                );
                self.scorer.on_finalized_block(&block, &activity, &memos);
                report.execution = Some(execution);
            } else {
                tracing::warn!(
                    "Round {}: block {} not finalized, moving batches to secondary lanes",
                    round,
                    block.id
                );
                self.requeue(batches, Lane::Secondary);
            }

            report.block = Some(block);
            report.finalized = finalized;
        }

        let reward_tx = match self.pending_reward.take() {
            Some(tx) => Some(tx),
            None => self.scorer.maybe_payout(round),
        };
        if let Some(tx) = reward_tx {
            self.settle_reward(tx, &mut report)?;
        }

        report.processing_time_us = start.elapsed().as_micros() as u64;
        // No subscribers is fine
        let _ = self.update_sender.send(report.clone());
        Ok(report)
    }

    fn settle_reward(&mut self, tx: Transaction, report: &mut RoundReport) -> Result<()> {
        let batches = vec![(String::from("reward"), vec![tx.clone()])];
        let (block, finalized) = match self.seal(&batches) {
            Ok(sealed) => sealed,
            Err(e) => {
                self.pending_reward = Some(tx);
                return Err(e);
            }
        };

        if finalized {
            let execution = self.engine.execute(std::slice::from_ref(&tx));
            if let Some(outcome) = execution.outcome(tx.id()) {
                tracing::info!("Reward {} in block {}: {:?}", tx.id(), block.id, outcome);
            }
            report.reward = Some(execution);
        } else {
            tracing::warn!("Reward block {} not finalized, deferring {}", block.id, tx.id());
            self.pending_reward = Some(tx);
        }
        report.reward_block = Some(block);
        Ok(())
    }

    fn requeue(&self, batches: Vec<(String, Vec<Transaction>)>, lane: Lane) {
        for (id, batch) in batches {
            if let Some(proposer) = self.proposers.get(&id) {
                for tx in batch {
                    match lane {
                        Lane::Primary => proposer.add_to_primary(tx),
                        Lane::Secondary => proposer.add_to_secondary(tx),
                    }
                }
            }
        }
    }

    /// Run rounds until stopped (blocking)
    ///
    /// This should be spawned on a dedicated thread.
    pub fn run(&mut self) {
        let block_duration = Duration::from_millis(self.block_time_ms);
        let mut fallback = false;

        tracing::info!(
            "Block producer started ({}ms rounds, {} proposers)",
            self.block_time_ms,
            self.proposers.len()
        );

        while self.running.load(Ordering::SeqCst) {
            if self.max_rounds.is_some_and(|max| self.round >= max) {
                break;
            }
            let tick_start = Instant::now();

            fallback = match self.run_round(fallback) {
                Ok(report) => report.block.is_some() && !report.finalized,
                Err(e) => {
                    tracing::error!("Round {} failed: {:#}", self.round.saturating_sub(1), e);
                    false
                }
            };

            let processing_time = tick_start.elapsed();

            // Warn if we're falling behind
            if processing_time > block_duration {
                tracing::warn!(
                    "Round {} took {:.2}ms (target: {}ms)",
                    self.round.saturating_sub(1),
                    processing_time.as_secs_f64() * 1000.0,
                    self.block_time_ms
                );
            }

            // Sleep for remaining time
            if let Some(sleep_time) = block_duration.checked_sub(processing_time) {
                std::thread::sleep(sleep_time);
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Block producer stopped after {} rounds", self.round);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::{demo_transactions, submit_demo};
    use ledger_runtime::{balance_key, Increment, ESCROW_POOL_KEY};

    fn test_config() -> NodeConfig {
        NodeConfig {
            block_time_ms: 1,
            reward_cycle_rounds: 0,
            ..Default::default()
        }
    }

    fn producer(config: &NodeConfig) -> BlockProducer {
        let store = LedgerStore::new();
        store.seed(ESCROW_POOL_KEY, config.escrow_balance);
        BlockProducer::new(config, store).unwrap()
    }

    #[test]
    fn test_demo_round_executes_after_finality() {
        let config = test_config();
        let mut producer = producer(&config);
        submit_demo(&producer.transaction_sender(), &config.participants).unwrap();

        let report = producer.run_round(false).unwrap();

        assert!(report.finalized);
        let block = report.block.unwrap();
        assert_eq!(block.id, 0);
        // NodeA and NodeB each proposed a batch
        assert_eq!(block.commitment_refs.len(), 2);

        let execution = report.execution.unwrap();
        assert_eq!(execution.successful, 3);
        assert_eq!(execution.total_fees, 35);

        let store = producer.engine().store();
        assert_eq!(store.read("A"), 110);
        assert_eq!(store.read("B"), 15);
    }

    #[test]
    fn test_empty_round_builds_no_block() {
        let config = test_config();
        let mut producer = producer(&config);

        let report = producer.run_round(false).unwrap();
        assert!(report.block.is_none());
        assert!(!report.finalized);
        assert_eq!(producer.assembly().next_block_id(), 0);
    }

    #[test]
    fn test_unfinalized_block_is_not_executed() {
        let mut config = test_config();
        config.consensus.quorum = 2;
        let mut producer = producer(&config);
        submit_demo(&producer.transaction_sender(), &config.participants).unwrap();

        let report = producer.run_round(false).unwrap();
        assert!(!report.finalized);
        assert!(report.execution.is_none());
        assert_eq!(producer.engine().store().read("A"), 0);

        // Batches wait in the secondary lanes for the fallback round
        let proposer = producer.proposer("NodeA").unwrap();
        assert_eq!(proposer.pending(Lane::Secondary), 2);
        assert_eq!(proposer.pending(Lane::Primary), 0);

        let retry = producer.run_round(true).unwrap();
        assert_eq!(retry.block.map(|b| b.prev_block_id), Some(Some(0)));
        assert_eq!(producer.engine().store().read("A"), 0);
    }

    #[test]
    fn test_reward_cycle_pays_out() {
        let config = NodeConfig {
            reward_cycle_rounds: 1,
            ..test_config()
        };
        let mut producer = producer(&config);
        submit_demo(&producer.transaction_sender(), &config.participants).unwrap();

        let report = producer.run_round(false).unwrap();
        let reward = report.reward.unwrap();
        assert_eq!(reward.successful, 1);
        assert_eq!(report.reward_block.map(|b| b.id), Some(1));

        // NodeA: 2 txs + DeFi affinity; NodeB: 1 tx + NFT and synergy affinity
        let store = producer.engine().store();
        assert_eq!(store.read(&balance_key("NodeA")), 50_000);
        assert_eq!(store.read(&balance_key("NodeB")), 50_000);
        assert_eq!(store.read(ESCROW_POOL_KEY), 900_000);
    }

    #[test]
    fn test_epochs_rotate() {
        let config = NodeConfig {
            epoch_length_rounds: 2,
            ..test_config()
        };
        let mut producer = producer(&config);

        assert_eq!(producer.run_round(false).unwrap().epoch, 1);
        assert_eq!(producer.run_round(false).unwrap().epoch, 1);
        assert_eq!(producer.run_round(false).unwrap().epoch, 2);

        let grouped: usize = producer.epochs().current_groups().iter().map(Vec::len).sum();
        assert_eq!(grouped, config.participants.len());
    }

    #[test]
    fn test_unknown_participant_is_dropped() {
        let config = test_config();
        let mut producer = producer(&config);
        let sender = producer.transaction_sender();
        sender
            .send(
                "Nobody",
                Transaction::builder("lost")
                    .reads_writes(["Z"])
                    .effect(Increment::new("Z", 1))
                    .build(),
            )
            .unwrap();

        let report = producer.run_round(false).unwrap();
        assert!(report.block.is_none());
        assert_eq!(producer.engine().store().read("Z"), 0);
    }

    #[test]
    fn test_reports_are_broadcast() {
        let config = test_config();
        let mut producer = producer(&config);
        let mut updates = producer.subscribe();
        for tx in demo_transactions() {
            producer.transaction_sender().send("NodeC", tx).unwrap();
        }

        producer.run_round(false).unwrap();
        let update = updates.try_recv().unwrap();
        assert_eq!(update.round, 0);
        assert!(update.finalized);
    }

    #[test]
    fn test_run_stops_after_max_rounds() {
        let config = test_config();
        let mut producer = producer(&config).with_max_rounds(Some(3));
        let handle = producer.handle();

        producer.run();
        assert_eq!(producer.current_round(), 3);
        assert!(!handle.is_running());
    }

    #[test]
    fn test_failed_seal_requeues_batches() {
        let config = test_config();
        let mut producer = producer(&config);
        // Occupies id 0 with different content, so building block 0 fails
        producer
            .assembly()
            .finality()
            .track(Block::new(0, [7u8; 32], vec![], None))
            .unwrap();
        submit_demo(&producer.transaction_sender(), &config.participants).unwrap();

        assert!(producer.run_round(false).is_err());

        let node_a = producer.proposer("NodeA").unwrap();
        assert_eq!(node_a.pending(Lane::Primary), 2);
        assert_eq!(node_a.pending(Lane::Secondary), 0);
        assert_eq!(producer.proposer("NodeB").unwrap().pending(Lane::Primary), 1);

        let store = producer.engine().store();
        assert_eq!(store.read("A"), 0);
        assert_eq!(store.read("B"), 0);
        assert_eq!(store.read(ESCROW_POOL_KEY), config.escrow_balance);
        assert_eq!(producer.assembly().next_block_id(), 0);
    }

    #[test]
    fn test_failed_reward_seal_keeps_payout() {
        let config = NodeConfig {
            reward_cycle_rounds: 1,
            ..test_config()
        };
        let mut producer = producer(&config);
        producer
            .assembly()
            .finality()
            .track(Block::new(1, [7u8; 32], vec![], Some(0)))
            .unwrap();
        submit_demo(&producer.transaction_sender(), &config.participants).unwrap();

        assert!(producer.run_round(false).is_err());

        // The round's own block still executed
        let store = producer.engine().store();
        assert_eq!(store.read("A"), 110);
        assert_eq!(store.read(ESCROW_POOL_KEY), config.escrow_balance);
        assert_eq!(store.read(&balance_key("NodeA")), 0);
        assert_eq!(
            producer.pending_reward.as_ref().map(|tx| tx.id()),
            Some("reward-0")
        );
    }

    #[test]
    fn test_penalized_participant_gets_no_reward() {
        let config = NodeConfig {
            reward_cycle_rounds: 1,
            ..test_config()
        };
        let mut producer = producer(&config);
        producer.penalize("NodeB", 10, "refused transactions");
        submit_demo(&producer.transaction_sender(), &config.participants).unwrap();

        let report = producer.run_round(false).unwrap();
        assert_eq!(report.reward.map(|r| r.successful), Some(1));

        let store = producer.engine().store();
        assert_eq!(store.read(&balance_key("NodeA")), config.reward_pool);
        assert_eq!(store.read(&balance_key("NodeB")), 0);
        assert_eq!(store.read(ESCROW_POOL_KEY), config.escrow_balance - config.reward_pool);
    }
}
