//! Demo workload submitted at startup

use crate::producer::TransactionSender;
use anyhow::Result;
use ledger_runtime::{Increment, Transaction};

/// Deposit on `A`, mint on `B`, then a cross transaction touching both
pub fn demo_transactions() -> Vec<Transaction> {
    vec![
        Transaction::builder("demo-deposit")
            .reads_writes(["A"])
            .effect(Increment::new("A", 100))
            .memo("Deposit transaction in DeFi, user1")
            .fee(10)
            .build(),
        Transaction::builder("demo-mint")
            .reads_writes(["B"])
            .effect(Increment::new("B", 5))
            .memo("An NFT mint for user2, synergy with NodeB")
            .fee(20)
            .build(),
        Transaction::builder("demo-cross")
            .reads_writes(["A", "B"])
            .effect(Increment::many([("A", 10), ("B", 10)]))
            .memo("A cross-later transaction referencing bridging or synergy")
            .fee(5)
            .build(),
    ]
}

/// Route the demo transactions: mint to the second participant, the rest to the first
pub fn submit_demo(sender: &TransactionSender, participants: &[String]) -> Result<usize> {
    let first = participants
        .first()
        .ok_or_else(|| anyhow::anyhow!("No participants to submit to"))?;
    let second = participants.get(1).unwrap_or(first);

    let txs = demo_transactions();
    let count = txs.len();
    for tx in txs {
        let target = if tx.id() == "demo-mint" { second } else { first };
        sender.send(target, tx)?;
    }
    Ok(count)
}
