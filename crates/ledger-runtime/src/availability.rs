//! Availability commitments
//!
//! A fixed-size digest over the exact content and order of a batch. Stands
//! in for a full data-availability certificate: block assembly references
//! batches only through these digests.

use crate::error::CommitmentError;
use crate::transaction::Transaction;
use borsh::BorshSerialize;

/// Digest committing to a batch
pub type Commitment = [u8; 32];

const COMMITMENT_DOMAIN: &[u8] = b"ledger/batch-commitment/v1";

/// Canonical encoding of one transaction inside a commitment
#[derive(BorshSerialize)]
struct TransactionRecord {
    id: String,
    read_keys: Vec<String>,
    write_keys: Vec<String>,
    effect: String,
    memo: String,
    fee: u64,
}

impl From<&Transaction> for TransactionRecord {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id().to_string(),
            read_keys: tx.read_keys().iter().cloned().collect(),
            write_keys: tx.write_keys().iter().cloned().collect(),
            effect: tx.effect().describe(),
            memo: tx.memo().to_string(),
            fee: tx.fee(),
        }
    }
}

/// Serialize a batch deterministically
pub fn encode_batch(batch: &[Transaction]) -> Result<Vec<u8>, CommitmentError> {
    let records: Vec<TransactionRecord> = batch.iter().map(TransactionRecord::from).collect();
    borsh::to_vec(&records).map_err(|e| CommitmentError::Encoding(e.to_string()))
}

/// Commit to a batch. Pure: same content in the same order, same digest.
pub fn commit(batch: &[Transaction]) -> Result<Commitment, CommitmentError> {
    let encoded = encode_batch(batch)?;

    let mut hasher = blake3::Hasher::new();
    hasher.update(COMMITMENT_DOMAIN);
    hasher.update(&encoded);
    Ok(*hasher.finalize().as_bytes())
}
