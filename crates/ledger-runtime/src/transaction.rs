//! Transactions with declared read/write sets

use crate::effect::{Effect, ReadSet, WriteSet};
use crate::error::EffectError;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// An immutable state transition over declared keys
///
/// Cloning is cheap: the effect is shared.
#[derive(Clone)]
pub struct Transaction {
    id: String,
    read_keys: BTreeSet<String>,
    write_keys: BTreeSet<String>,
    effect: Arc<dyn Effect>,
    memo: String,
    fee: u64,
}

impl Transaction {
    /// Start building a transaction
    pub fn builder(id: impl Into<String>) -> TransactionBuilder {
        TransactionBuilder::new(id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn read_keys(&self) -> &BTreeSet<String> {
        &self.read_keys
    }

    pub fn write_keys(&self) -> &BTreeSet<String> {
        &self.write_keys
    }

    pub fn memo(&self) -> &str {
        &self.memo
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    pub fn effect(&self) -> &dyn Effect {
        self.effect.as_ref()
    }

    /// Every key this transaction touches, in lock order
    pub fn all_keys(&self) -> BTreeSet<&String> {
        self.read_keys.iter().chain(self.write_keys.iter()).collect()
    }

    /// Whether executing both transactions concurrently could interleave
    /// observably: a shared write key, or one writing what the other reads.
    pub fn conflicts_with(&self, other: &Transaction) -> bool {
        self.write_keys.iter().any(|k| {
            other.write_keys.contains(k) || other.read_keys.contains(k)
        }) || other.write_keys.iter().any(|k| self.read_keys.contains(k))
    }

    pub(crate) fn apply(&self, reads: &ReadSet) -> Result<WriteSet, EffectError> {
        self.effect.apply(reads)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("read_keys", &self.read_keys)
            .field("write_keys", &self.write_keys)
            .field("effect", &self.effect.describe())
            .field("fee", &self.fee)
            .finish()
    }
}

/// Builder for Transaction
pub struct TransactionBuilder {
    id: String,
    read_keys: BTreeSet<String>,
    write_keys: BTreeSet<String>,
    effect: Option<Arc<dyn Effect>>,
    memo: String,
    fee: u64,
}

impl TransactionBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            read_keys: BTreeSet::new(),
            write_keys: BTreeSet::new(),
            effect: None,
            memo: String::new(),
            fee: 0,
        }
    }

    pub fn reads<K: Into<String>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.read_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn writes<K: Into<String>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.write_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Declare keys that are both read and written
    pub fn reads_writes<K: Into<String>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        for key in keys {
            let key = key.into();
            self.read_keys.insert(key.clone());
            self.write_keys.insert(key);
        }
        self
    }

    pub fn effect(mut self, effect: impl Effect + 'static) -> Self {
        self.effect = Some(Arc::new(effect));
        self
    }

    pub fn shared_effect(mut self, effect: Arc<dyn Effect>) -> Self {
        self.effect = Some(effect);
        self
    }

    pub fn memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }

    pub fn fee(mut self, fee: u64) -> Self {
        self.fee = fee;
        self
    }

    /// Finish the transaction. Without an effect it writes nothing.
    pub fn build(self) -> Transaction {
        Transaction {
            id: self.id,
            read_keys: self.read_keys,
            write_keys: self.write_keys,
            effect: self.effect.unwrap_or_else(|| Arc::new(NoOp)),
            memo: self.memo,
            fee: self.fee,
        }
    }
}

/// Effect that writes nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOp;

impl Effect for NoOp {
    fn apply(&self, _reads: &ReadSet) -> Result<WriteSet, EffectError> {
        Ok(WriteSet::new())
    }

    fn describe(&self) -> String {
        "noop".to_string()
    }
}
