//! Batch Proposer - per-participant staging of transactions
//!
//! Each participant owns a primary lane (transactions it is responsible for)
//! and a secondary lane (transactions picked up from another proposer that
//! timed out or skipped them). Detecting those timeouts is the scheduler's
//! job; the proposer only supports the hand-off.

use crate::error::ProposerError;
use crate::transaction::Transaction;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Which staging list to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Primary,
    Secondary,
}

/// Collaborator that may reorder a proposer's pending list before sealing
pub trait OrderingHint: Send + Sync {
    /// Return the same transactions in the preferred order
    fn reorder(&self, pending: Vec<Transaction>, participant: &str) -> Vec<Transaction>;
}

/// Staging area for one participant
pub struct BatchProposer {
    proposer_id: String,
    primary: Mutex<Vec<Transaction>>,
    secondary: Mutex<Vec<Transaction>>,
}

impl BatchProposer {
    pub fn new(proposer_id: impl Into<String>) -> Self {
        Self {
            proposer_id: proposer_id.into(),
            primary: Mutex::new(Vec::new()),
            secondary: Mutex::new(Vec::new()),
        }
    }

    pub fn proposer_id(&self) -> &str {
        &self.proposer_id
    }

    fn lane(&self, lane: Lane) -> &Mutex<Vec<Transaction>> {
        match lane {
            Lane::Primary => &self.primary,
            Lane::Secondary => &self.secondary,
        }
    }

    pub fn add_to_primary(&self, tx: Transaction) {
        self.primary.lock().push(tx);
    }

    pub fn add_to_secondary(&self, tx: Transaction) {
        self.secondary.lock().push(tx);
    }

    /// Number of transactions waiting in a lane
    pub fn pending(&self, lane: Lane) -> usize {
        self.lane(lane).lock().len()
    }

    /// Drain one lane and return its transactions in order.
    ///
    /// `fallback` selects the secondary lane. The other lane is untouched.
    pub fn form_batch(&self, fallback: bool) -> Vec<Transaction> {
        let lane = if fallback { Lane::Secondary } else { Lane::Primary };
        let batch = std::mem::take(&mut *self.lane(lane).lock());

        if !batch.is_empty() {
            tracing::debug!(
                "Proposer {} sealed {} txs from {:?} lane",
                self.proposer_id,
                batch.len(),
                lane
            );
        }
        batch
    }

    /// Replace the primary list with the hint's ordering.
    ///
    /// The hint must return a permutation of the pending list; otherwise the
    /// list is restored unchanged and an error is returned.
    pub fn apply_ordering_hint(&self, hint: &dyn OrderingHint) -> Result<(), ProposerError> {
        let mut primary = self.primary.lock();
        let pending = std::mem::take(&mut *primary);
        let original = pending.clone();
        let expected = pending.len();

        let reordered = hint.reorder(pending, &self.proposer_id);

        if !is_permutation(&original, &reordered) {
            let actual = reordered.len();
            *primary = original;
            return Err(ProposerError::NotAPermutation {
                proposer: self.proposer_id.clone(),
                expected,
                actual,
            });
        }

        *primary = reordered;
        Ok(())
    }
}

fn is_permutation(original: &[Transaction], reordered: &[Transaction]) -> bool {
    if original.len() != reordered.len() {
        return false;
    }

    let mut counts: HashMap<&str, i64> = HashMap::new();
    for tx in original {
        *counts.entry(tx.id()).or_default() += 1;
    }
    for tx in reordered {
        *counts.entry(tx.id()).or_default() -= 1;
    }
    counts.values().all(|c| *c == 0)
}
