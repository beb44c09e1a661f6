//! Transaction effects
//!
//! An effect is the pure state transition carried by a transaction. It sees
//! only the values of the transaction's declared read keys and returns new
//! values for (a subset of) its declared write keys. Effects must be
//! deterministic: the engine calls `apply` exactly once per execution.

use crate::error::EffectError;
use crate::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Values of the declared read keys, as seen under lock
pub type ReadSet = BTreeMap<String, Value>;

/// New values produced by an effect
pub type WriteSet = BTreeMap<String, Value>;

/// A state transition over declared keys
pub trait Effect: Send + Sync + Debug {
    /// Compute the writes for this transaction from its read snapshot
    fn apply(&self, reads: &ReadSet) -> Result<WriteSet, EffectError>;

    /// Stable description of the effect's parameters.
    ///
    /// Part of the content an availability commitment covers, so it must
    /// change whenever the effect's behavior changes.
    fn describe(&self) -> String;
}

fn read(reads: &ReadSet, key: &str) -> Value {
    reads.get(key).copied().unwrap_or(0)
}

/// Add a signed delta to each key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Increment {
    deltas: BTreeMap<String, Value>,
}

impl Increment {
    /// Increment a single key
    pub fn new(key: impl Into<String>, delta: Value) -> Self {
        let mut deltas = BTreeMap::new();
        deltas.insert(key.into(), delta);
        Self { deltas }
    }

    /// Increment several keys at once
    pub fn many<K: Into<String>>(deltas: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self {
            deltas: deltas.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.deltas.keys()
    }
}

impl Effect for Increment {
    fn apply(&self, reads: &ReadSet) -> Result<WriteSet, EffectError> {
        let mut writes = WriteSet::new();
        for (key, delta) in &self.deltas {
            let updated = read(reads, key)
                .checked_add(*delta)
                .ok_or_else(|| EffectError::Overflow { key: key.clone() })?;
            writes.insert(key.clone(), updated);
        }
        Ok(writes)
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self
            .deltas
            .iter()
            .map(|(k, d)| format!("{}{:+}", k, d))
            .collect();
        format!("increment({})", parts.join(","))
    }
}

/// Move `amount` from one key to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub from: String,
    pub to: String,
    pub amount: Value,
}

impl Transfer {
    pub fn new(from: impl Into<String>, to: impl Into<String>, amount: Value) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            amount,
        }
    }
}

impl Effect for Transfer {
    fn apply(&self, reads: &ReadSet) -> Result<WriteSet, EffectError> {
        if self.amount < 0 {
            return Err(EffectError::Rejected(format!(
                "negative transfer amount {}",
                self.amount
            )));
        }

        let from_balance = read(reads, &self.from);
        if from_balance < self.amount {
            return Err(EffectError::InsufficientFunds {
                key: self.from.clone(),
                needed: self.amount,
                available: from_balance,
            });
        }

        let mut writes = WriteSet::new();
        if self.from == self.to {
            writes.insert(self.from.clone(), from_balance);
            return Ok(writes);
        }

        let to_balance = read(reads, &self.to)
            .checked_add(self.amount)
            .ok_or_else(|| EffectError::Overflow { key: self.to.clone() })?;
        writes.insert(self.from.clone(), from_balance - self.amount);
        writes.insert(self.to.clone(), to_balance);
        Ok(writes)
    }

    fn describe(&self) -> String {
        format!("transfer({}->{}:{})", self.from, self.to, self.amount)
    }
}

/// Key holding a participant's balance
pub fn balance_key(participant: &str) -> String {
    format!("BAL_{}", participant)
}

/// Pay a pool out to participants in proportion to their shares.
///
/// Each participant receives `pool_amount * share / total_shares`, rounded
/// down. The pool is debited by the sum actually paid, so the total across
/// pool and balances is conserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardPayout {
    pub pool_key: String,
    pub pool_amount: Value,
    pub shares: BTreeMap<String, Value>,
}

impl RewardPayout {
    pub fn new(
        pool_key: impl Into<String>,
        pool_amount: Value,
        shares: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            pool_key: pool_key.into(),
            pool_amount,
            shares,
        }
    }

    /// Payout per participant, keyed by participant id
    pub fn payouts(&self) -> BTreeMap<String, Value> {
        let total: i128 = self.shares.values().map(|s| (*s).max(0) as i128).sum();
        if total == 0 {
            return BTreeMap::new();
        }

        self.shares
            .iter()
            .map(|(participant, share)| {
                let amount = self.pool_amount as i128 * (*share).max(0) as i128 / total;
                (participant.clone(), amount as Value)
            })
            .collect()
    }

    /// Keys this payout reads and writes
    pub fn keys(&self) -> Vec<String> {
        std::iter::once(self.pool_key.clone())
            .chain(self.shares.keys().map(|p| balance_key(p)))
            .collect()
    }
}

impl Effect for RewardPayout {
    fn apply(&self, reads: &ReadSet) -> Result<WriteSet, EffectError> {
        let payouts = self.payouts();
        let paid: Value = payouts.values().sum();

        let pool = read(reads, &self.pool_key);
        if pool < paid {
            return Err(EffectError::InsufficientFunds {
                key: self.pool_key.clone(),
                needed: paid,
                available: pool,
            });
        }

        let mut writes = WriteSet::new();
        writes.insert(self.pool_key.clone(), pool - paid);
        for (participant, amount) in payouts {
            let key = balance_key(&participant);
            let updated = read(reads, &key)
                .checked_add(amount)
                .ok_or_else(|| EffectError::Overflow { key: key.clone() })?;
            writes.insert(key, updated);
        }
        Ok(writes)
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self
            .shares
            .iter()
            .map(|(p, s)| format!("{}={}", p, s))
            .collect();
        format!(
            "reward({}:{};{})",
            self.pool_key,
            self.pool_amount,
            parts.join(",")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reads(pairs: &[(&str, Value)]) -> ReadSet {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_increment_defaults_missing_to_zero() {
        let writes = Increment::new("A", 10).apply(&ReadSet::new()).unwrap();
        assert_eq!(writes.get("A"), Some(&10));
    }

    #[test]
    fn test_increment_overflow() {
        let err = Increment::new("A", 1)
            .apply(&reads(&[("A", Value::MAX)]))
            .unwrap_err();
        assert_eq!(err, EffectError::Overflow { key: "A".into() });
    }

    #[test]
    fn test_transfer_insufficient_funds() {
        let err = Transfer::new("alice", "bob", 50)
            .apply(&reads(&[("alice", 20)]))
            .unwrap_err();
        assert!(matches!(err, EffectError::InsufficientFunds { available: 20, .. }));
    }

    #[test]
    fn test_transfer_moves_balance() {
        let writes = Transfer::new("alice", "bob", 30)
            .apply(&reads(&[("alice", 100), ("bob", 5)]))
            .unwrap();
        assert_eq!(writes.get("alice"), Some(&70));
        assert_eq!(writes.get("bob"), Some(&35));
    }

    #[test]
    fn test_reward_payout_is_proportional_and_conserving() {
        let mut shares = BTreeMap::new();
        shares.insert("NodeA".to_string(), 1);
        shares.insert("NodeB".to_string(), 2);
        let payout = RewardPayout::new("ESCROW_POOL", 100, shares);

        let writes = payout.apply(&reads(&[("ESCROW_POOL", 1_000)])).unwrap();
        assert_eq!(writes.get("BAL_NodeA"), Some(&33));
        assert_eq!(writes.get("BAL_NodeB"), Some(&66));
        assert_eq!(writes.get("ESCROW_POOL"), Some(&(1_000 - 99)));
    }

    #[test]
    fn test_reward_payout_underfunded_pool() {
        let mut shares = BTreeMap::new();
        shares.insert("NodeA".to_string(), 1);
        let payout = RewardPayout::new("ESCROW_POOL", 100, shares);
        assert!(payout.apply(&reads(&[("ESCROW_POOL", 10)])).is_err());
    }

    #[test]
    fn test_describe_distinguishes_parameters() {
        assert_ne!(
            Increment::new("A", 10).describe(),
            Increment::new("A", 11).describe()
        );
        assert_ne!(
            Transfer::new("a", "b", 1).describe(),
            Transfer::new("b", "a", 1).describe()
        );
    }
}
