//! Event chain - a Proof-of-History style hash chain
//!
//! Every recorded event folds into the running head:
//! `head' = BLAKE3(head || event || tick_count as u64 big-endian)`, then the
//! tick count increments. The head is therefore a function of the whole
//! ordered event history, and anyone holding the events can replay it.

use crate::types::{short_digest, Digest};
use parking_lot::Mutex;

/// Head of a fresh chain for a given seed
pub fn genesis_head(seed: &[u8]) -> Digest {
    *blake3::hash(seed).as_bytes()
}

/// Fold one event into a head
pub fn next_head(head: &Digest, event: &[u8], tick: u64) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(head);
    hasher.update(event);
    hasher.update(&tick.to_be_bytes());
    *hasher.finalize().as_bytes()
}

/// Replay an event sequence from a genesis head
pub fn replay<'a>(genesis: Digest, events: impl IntoIterator<Item = &'a [u8]>) -> Digest {
    events
        .into_iter()
        .enumerate()
        .fold(genesis, |head, (tick, event)| next_head(&head, event, tick as u64))
}

/// One recorded tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    /// Tick index of the event
    pub tick: u64,
    /// BLAKE3 of the event bytes
    pub event_hash: Digest,
    /// Head after folding the event
    pub head: Digest,
}

struct ChainState {
    head: Digest,
    tick_count: u64,
    entries: Vec<ChainEntry>,
}

/// Strictly ordered, single-writer event log
pub struct EventChain {
    genesis: Digest,
    state: Mutex<ChainState>,
}

impl EventChain {
    /// Create a chain whose genesis head is derived from `seed`
    pub fn new(seed: &[u8]) -> Self {
        let genesis = genesis_head(seed);
        Self {
            genesis,
            state: Mutex::new(ChainState {
                head: genesis,
                tick_count: 0,
                entries: Vec::new(),
            }),
        }
    }

    /// Record an event and return the new head.
    ///
    /// Concurrent callers are serialized; each sees the previous head.
    pub fn record(&self, event: &[u8]) -> Digest {
        let mut state = self.state.lock();
        let tick = state.tick_count;
        let head = next_head(&state.head, event, tick);

        state.head = head;
        state.tick_count += 1;
        state.entries.push(ChainEntry {
            tick,
            event_hash: *blake3::hash(event).as_bytes(),
            head,
        });

        tracing::trace!("Event chain tick {} -> {}", tick, short_digest(&head));
        head
    }

    /// Advance the chain with an empty event
    pub fn tick(&self) -> Digest {
        self.record(&[])
    }

    /// Latest head
    pub fn current_head(&self) -> Digest {
        self.state.lock().head
    }

    /// Number of events recorded
    pub fn tick_count(&self) -> u64 {
        self.state.lock().tick_count
    }

    pub fn genesis(&self) -> Digest {
        self.genesis
    }

    /// Copy of the recorded ticks
    pub fn entries(&self) -> Vec<ChainEntry> {
        self.state.lock().entries.clone()
    }
}

impl Default for EventChain {
    fn default() -> Self {
        Self::new(b"GENESIS")
    }
}
