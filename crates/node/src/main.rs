//! Ledger Node
//!
//! Runs the full round pipeline on one node: batch proposers, availability
//! commitments, the event chain, block assembly with vote-based finality and
//! parallel execution of finalized blocks.

use anyhow::Result;
use clap::Parser;
use ledger_runtime::{LedgerStore, ESCROW_POOL_KEY};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ledger_node::{demo, BlockProducer, NodeConfig};

/// Parallel ledger node
#[derive(Parser, Debug)]
#[command(name = "ledger-node")]
#[command(about = "Parallel transaction execution with hash-chained blocks and vote-based finality", long_about = None)]
struct Args {
    /// JSON config file (defaults are used for missing fields)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Node identity used when voting
    #[arg(long)]
    node_id: Option<String>,

    /// Stop after this many rounds (runs until Ctrl+C if omitted)
    #[arg(long)]
    rounds: Option<u64>,

    /// Round time in milliseconds
    #[arg(long)]
    block_time_ms: Option<u64>,

    /// Participants per group when an epoch starts
    #[arg(long)]
    group_size: Option<usize>,

    /// Skip submitting the demo transactions
    #[arg(long)]
    no_demo: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(args: &Args) -> Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };

    if let Some(node_id) = &args.node_id {
        config.consensus.node_id = node_id.clone();
    }
    if let Some(block_time_ms) = args.block_time_ms {
        config.block_time_ms = block_time_ms;
    }
    if let Some(group_size) = args.group_size {
        config.group_size = group_size;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { "debug" } else { args.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&args)?;

    tracing::info!("Starting ledger node {}", config.consensus.node_id);
    tracing::info!("  Participants: {:?}", config.participants);
    tracing::info!("  Round time: {}ms", config.block_time_ms);
    tracing::info!("  Quorum: {}", config.consensus.quorum);
    tracing::info!(
        "  Epoch length: {} rounds, group size {}",
        config.epoch_length_rounds,
        config.group_size
    );
    tracing::info!(
        "  Reward cycle: {} rounds, pool {}",
        config.reward_cycle_rounds,
        config.reward_pool
    );

    let store = LedgerStore::new();
    if store.seed(ESCROW_POOL_KEY, config.escrow_balance) {
        tracing::info!("Seeded {} with {}", ESCROW_POOL_KEY, config.escrow_balance);
    }

    let mut producer = BlockProducer::new(&config, store.clone())?.with_max_rounds(args.rounds);
    let handle = producer.handle();
    let assembly = producer.assembly().clone();
    let mut reports = producer.subscribe();

    if !args.no_demo {
        let submitted = demo::submit_demo(&producer.transaction_sender(), &config.participants)?;
        tracing::info!("Submitted {} demo transactions", submitted);
    }

    let report_logger = tokio::spawn(async move {
        loop {
            match reports.recv().await {
                Ok(report) => {
                    if let Some(block) = &report.block {
                        tracing::info!(
                            "Round {} (epoch {}): {} finalized={} in {}us",
                            report.round,
                            report.epoch,
                            block,
                            report.finalized,
                            report.processing_time_us
                        );
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Report logger lagged, skipped {} rounds", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut producer_task = tokio::task::spawn_blocking(move || producer.run());

    tracing::info!("Press Ctrl+C to stop.");

    tokio::select! {
        result = &mut producer_task => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
            handle.stop();
            producer_task.await?;
        }
    }

    // Producer is dropped, so the broadcast channel closes
    report_logger.await?;

    let stats = assembly.finality().stats();
    tracing::info!(
        "Finality: {} blocks tracked, {} finalized, {} regressions rejected, last finalized {:?}",
        stats.blocks_tracked,
        stats.blocks_finalized,
        stats.regressions_rejected,
        stats.last_finalized_block
    );
    tracing::info!("Event chain: {} ticks", assembly.chain().tick_count());

    tracing::info!("Final ledger state ({} keys):", store.len());
    for (key, value) in store.snapshot() {
        tracing::info!("  {} = {}", key, value);
    }

    Ok(())
}
