//! Reward scoring and memo-based ordering
//!
//! Participants earn score for the transactions they get into finalized
//! blocks, plus a bonus when the block's memos match their declared focus.
//! At the end of each reward cycle the accumulated scores are turned into a
//! single payout transaction over the escrow pool.

use ledger_consensus::Block;
use ledger_runtime::{OrderingHint, RewardPayout, Transaction, Value, ESCROW_POOL_KEY};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

/// Largest affinity bonus a participant can earn from one block
pub const MAX_AFFINITY_BONUS: Value = 5;

/// Words that carry no focus
const STOP_WORDS: &[&str] = &["focus", "and", "the", "with", "for"];

/// Accumulates participant scores from finalized blocks and pays them out
pub trait RewardScorer: Send {
    /// Account for a finalized block
    fn on_finalized_block(
        &mut self,
        block: &Block,
        activity: &BTreeMap<String, Value>,
        memos: &[String],
    );

    /// Dock a participant's score, e.g. for refusing transactions
    fn penalize(&mut self, node: &str, points: Value, reason: &str);

    /// Called once per round; returns the payout when a cycle completes.
    /// Scores reset at every cycle boundary, paid out or not.
    fn maybe_payout(&mut self, round: u64) -> Option<Transaction>;
}

fn normalize(word: &str) -> Option<String> {
    let word = word.to_lowercase();
    if word.len() < 3 || STOP_WORDS.contains(&word.as_str()) {
        return None;
    }
    // Plural and singular forms match ("NFTs" / "NFT")
    match word.strip_suffix('s') {
        Some(stem) if stem.len() >= 3 && !stem.ends_with('s') => Some(stem.to_string()),
        _ => Some(word),
    }
}

/// Normalized terms of a piece of text
pub fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter_map(normalize)
        .collect()
}

/// Number of profile terms found in the memos, capped at `MAX_AFFINITY_BONUS`
pub fn affinity<'a>(profile: &BTreeSet<String>, memos: impl IntoIterator<Item = &'a str>) -> Value {
    let mut matched = BTreeSet::new();
    for memo in memos {
        matched.extend(terms(memo).into_iter().filter(|t| profile.contains(t)));
    }
    (matched.len() as Value).min(MAX_AFFINITY_BONUS)
}

/// Activity plus keyword affinity scoring
pub struct ActivityScorer {
    profiles: BTreeMap<String, BTreeSet<String>>,
    scores: BTreeMap<String, Value>,
    pool_amount: Value,
    cycle_rounds: u64,
    rounds_in_cycle: u64,
}

impl ActivityScorer {
    pub fn new(profiles: &BTreeMap<String, String>, pool_amount: Value, cycle_rounds: u64) -> Self {
        Self {
            profiles: profiles
                .iter()
                .map(|(node, profile)| (node.clone(), terms(profile)))
                .collect(),
            scores: BTreeMap::new(),
            pool_amount,
            cycle_rounds,
            rounds_in_cycle: 0,
        }
    }

    /// Score accumulated in the current cycle
    pub fn scores(&self) -> &BTreeMap<String, Value> {
        &self.scores
    }

    fn payout_transaction(&self, round: u64) -> Option<Transaction> {
        let shares: BTreeMap<String, Value> = self
            .scores
            .iter()
            .filter(|(_, score)| **score > 0)
            .map(|(node, score)| (node.clone(), *score))
            .collect();
        if shares.is_empty() {
            return None;
        }

        let payout = RewardPayout::new(ESCROW_POOL_KEY, self.pool_amount, shares);
        Some(
            Transaction::builder(format!("reward-{}", round))
                .reads_writes(payout.keys())
                .effect(payout)
                .memo(format!("Reward distribution for cycle ending at round {}", round))
                .build(),
        )
    }
}

impl RewardScorer for ActivityScorer {
    fn on_finalized_block(
        &mut self,
        block: &Block,
        activity: &BTreeMap<String, Value>,
        memos: &[String],
    ) {
        for (node, base) in activity {
            let bonus = self
                .profiles
                .get(node)
                .map_or(0, |profile| affinity(profile, memos.iter().map(String::as_str)));
            *self.scores.entry(node.clone()).or_default() += base + bonus;
            tracing::debug!(
                "Block {}: {} scored {} (+{} affinity)",
                block.id,
                node,
                base,
                bonus
            );
        }
    }

    fn penalize(&mut self, node: &str, points: Value, reason: &str) {
        *self.scores.entry(node.to_string()).or_default() -= points;
        tracing::warn!("Participant {} penalized by {} points: {}", node, points, reason);
    }

    fn maybe_payout(&mut self, round: u64) -> Option<Transaction> {
        if self.cycle_rounds == 0 {
            return None;
        }
        self.rounds_in_cycle += 1;
        if self.rounds_in_cycle < self.cycle_rounds {
            return None;
        }
        self.rounds_in_cycle = 0;

        let tx = self.payout_transaction(round);
        match &tx {
            Some(_) => tracing::info!("Reward cycle closed at round {}: {:?}", round, self.scores),
            None => tracing::debug!("Reward cycle closed at round {} with no positive scores", round),
        }
        self.scores.clear();
        tx
    }
}

/// Puts transactions whose memos match the proposer's focus first
pub struct ProfileOrdering {
    profiles: BTreeMap<String, BTreeSet<String>>,
}

impl ProfileOrdering {
    pub fn new(profiles: &BTreeMap<String, String>) -> Self {
        Self {
            profiles: profiles
                .iter()
                .map(|(node, profile)| (node.clone(), terms(profile)))
                .collect(),
        }
    }
}

impl OrderingHint for ProfileOrdering {
    fn reorder(&self, mut pending: Vec<Transaction>, participant: &str) -> Vec<Transaction> {
        if let Some(profile) = self.profiles.get(participant) {
            // Stable: equal affinity keeps submission order
            pending.sort_by_key(|tx| Reverse(affinity(profile, [tx.memo()])));
        }
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_runtime::{balance_key, Increment};

    fn profiles() -> BTreeMap<String, String> {
        [
            ("NodeA", "Focus: DeFi, financial AI"),
            ("NodeB", "Focus: NFTs, gaming synergy"),
        ]
        .into_iter()
        .map(|(n, p)| (n.to_string(), p.to_string()))
        .collect()
    }

    fn memo_tx(id: &str, memo: &str) -> Transaction {
        Transaction::builder(id)
            .reads_writes(["A"])
            .effect(Increment::new("A", 1))
            .memo(memo)
            .build()
    }

    fn block() -> Block {
        Block::new(0, [0u8; 32], vec![], None)
    }

    #[test]
    fn test_terms_normalize() {
        let t = terms("Focus: NFTs, gaming synergy");
        assert!(t.contains("nft"));
        assert!(t.contains("gaming"));
        assert!(!t.contains("focus"));
    }

    #[test]
    fn test_affinity_is_capped() {
        let profile = terms("alpha bravo charlie delta echo foxtrot golf");
        let memo = "alpha bravo charlie delta echo foxtrot golf";
        assert_eq!(affinity(&profile, [memo]), MAX_AFFINITY_BONUS);
        assert_eq!(affinity(&profile, ["nothing relevant"]), 0);
    }

    #[test]
    fn test_scores_accumulate_with_bonus() {
        let mut scorer = ActivityScorer::new(&profiles(), 100_000, 2);
        let activity: BTreeMap<String, Value> =
            [("NodeA".to_string(), 1), ("NodeB".to_string(), 1)].into();
        let memos = vec![
            "Deposit transaction in DeFi".to_string(),
            "An NFT mint with synergy".to_string(),
        ];

        scorer.on_finalized_block(&block(), &activity, &memos);
        assert_eq!(scorer.scores()["NodeA"], 2);
        assert_eq!(scorer.scores()["NodeB"], 3);
    }

    #[test]
    fn test_payout_at_cycle_end() {
        let mut scorer = ActivityScorer::new(&profiles(), 1_000, 2);
        let activity: BTreeMap<String, Value> =
            [("NodeA".to_string(), 3), ("NodeC".to_string(), 1)].into();
        scorer.on_finalized_block(&block(), &activity, &[]);

        assert!(scorer.maybe_payout(1).is_none());
        let tx = scorer.maybe_payout(2).unwrap();

        assert_eq!(tx.id(), "reward-2");
        assert!(tx.write_keys().contains(ESCROW_POOL_KEY));
        assert!(tx.write_keys().contains(&balance_key("NodeA")));
        assert!(tx.write_keys().contains(&balance_key("NodeC")));
        assert!(scorer.scores().is_empty());
    }

    #[test]
    fn test_no_payout_without_positive_scores() {
        let mut scorer = ActivityScorer::new(&profiles(), 1_000, 1);
        scorer.penalize("NodeB", 10, "refused transactions");
        assert!(scorer.maybe_payout(1).is_none());
        assert!(scorer.scores().is_empty());
    }

    #[test]
    fn test_penalty_does_not_carry_into_next_cycle() {
        let mut scorer = ActivityScorer::new(&profiles(), 1_000, 1);
        scorer.penalize("NodeB", 10, "censorship");
        assert!(scorer.maybe_payout(1).is_none());

        let activity: BTreeMap<String, Value> = [("NodeB".to_string(), 2)].into();
        scorer.on_finalized_block(&block(), &activity, &[]);
        let tx = scorer.maybe_payout(2).unwrap();
        assert!(tx.write_keys().contains(&balance_key("NodeB")));
    }

    #[test]
    fn test_penalized_node_excluded_from_shares() {
        let mut scorer = ActivityScorer::new(&profiles(), 1_000, 1);
        let activity: BTreeMap<String, Value> =
            [("NodeA".to_string(), 4), ("NodeB".to_string(), 4)].into();
        scorer.on_finalized_block(&block(), &activity, &[]);
        scorer.penalize("NodeB", 10, "censorship");

        let tx = scorer.maybe_payout(1).unwrap();
        assert!(tx.write_keys().contains(&balance_key("NodeA")));
        assert!(!tx.write_keys().contains(&balance_key("NodeB")));
    }

    #[test]
    fn test_profile_ordering_is_stable() {
        let ordering = ProfileOrdering::new(&profiles());
        let pending = vec![
            memo_tx("plain1", "transfer"),
            memo_tx("defi", "DeFi deposit"),
            memo_tx("plain2", "another transfer"),
        ];

        let ordered: Vec<String> = ordering
            .reorder(pending.clone(), "NodeA")
            .iter()
            .map(|tx| tx.id().to_string())
            .collect();
        assert_eq!(ordered, vec!["defi", "plain1", "plain2"]);

        // Unknown participant keeps the submitted order
        let unchanged: Vec<String> = ordering
            .reorder(pending, "NodeZ")
            .iter()
            .map(|tx| tx.id().to_string())
            .collect();
        assert_eq!(unchanged, vec!["plain1", "defi", "plain2"]);
    }
}
