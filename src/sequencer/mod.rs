//! Sequencer - slot claim, publish, availability query, gating-sequence
//! tracking. Single- and multi-producer variants live in `single` and
//! `multi`; both implement the [`Sequencer`] trait so `RingBuffer` and
//! `SequenceBarrier` can be generic over either.

mod multi;
mod single;

pub use multi::MultiProducerSequencer;
pub use single::SingleProducerSequencer;

use crate::error::Result;
use crate::sequence::Sequence;
use crate::wait_strategy::WaitStrategy;
use parking_lot::RwLock;
use std::sync::Arc;

/// Claim/publish/availability protocol shared by both producer modes.
///
/// Implementations never allocate on the claim/publish hot path; capacity
/// exhaustion and the wait-for-space loop are the only suspension points
/// (`spec.md` §5).
pub trait Sequencer: Send + Sync {
    /// Fixed capacity of the ring this sequencer coordinates.
    fn capacity(&self) -> usize;

    /// Highest sequence ever claimed/published, per producer mode.
    fn cursor(&self) -> i64;

    /// The live cursor `Sequence` itself, for a barrier's wait strategy to
    /// poll directly - a snapshot copy would freeze at its construction
    /// value and never observe a later publish.
    fn cursor_sequence(&self) -> Arc<Sequence>;

    /// Claim `n` sequences, blocking (spin/yield) until a gating consumer
    /// has made room. Returns the highest of the newly claimed sequences.
    fn next(&self, n: i64) -> i64;

    /// Like `next` but fails fast instead of waiting.
    fn try_next(&self, n: i64) -> Result<i64>;

    /// Make the claimed range `[lo, hi]` visible to consumers and wake
    /// anyone blocked on the wait strategy.
    fn publish(&self, lo: i64, hi: i64);

    /// Is the single sequence `s` safe to read?
    fn is_available(&self, s: i64) -> bool;

    /// Highest contiguous published sequence in `[lower, available_up_to]`.
    fn get_highest_published_sequence(&self, lower: i64, available_up_to: i64) -> i64;

    /// Register a consumer sequence the producer must never overtake by
    /// more than `capacity - 1`.
    fn add_gating_sequence(&self, sequence: Arc<Sequence>);

    /// Current gating-sequence snapshot, for barrier construction.
    fn gating_sequences(&self) -> Arc<Vec<Arc<Sequence>>>;
}

/// Immutable-on-read snapshot of consumer sequences a producer must not
/// overtake, updated by atomic replacement of the whole array (`spec.md`
/// §3, §9 - breaks the Sequencer/consumer reference cycle: the Sequencer
/// only ever reads through this handle).
pub(crate) struct GatingSequences {
    snapshot: RwLock<Arc<Vec<Arc<Sequence>>>>,
}

impl GatingSequences {
    pub(crate) fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub(crate) fn add(&self, sequence: Arc<Sequence>) {
        let mut guard = self.snapshot.write();
        let mut next = (**guard).clone();
        next.push(sequence);
        *guard = Arc::new(next);
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<Sequence>>> {
        self.snapshot.read().clone()
    }

    /// Minimum of the current snapshot, or `default` when empty (no
    /// gating consumers registered yet - the producer is unconstrained).
    pub(crate) fn min(&self, default: i64) -> i64 {
        self.snapshot()
            .iter()
            .map(|s| s.get())
            .min()
            .unwrap_or(default)
    }
}

/// Spin briefly then yield the OS thread - the producer-side "wait for a
/// gating consumer to catch up" backoff used by both sequencer variants
/// (`spec.md` §4.2/§4.3: "repeatedly yield/park briefly").
#[inline]
pub(crate) fn backoff(spins: &mut u32) {
    if *spins < 100 {
        std::hint::spin_loop();
    } else {
        std::thread::yield_now();
    }
    *spins = spins.wrapping_add(1);
}

pub(crate) fn signal(wait_strategy: &Arc<dyn WaitStrategy>) {
    wait_strategy.signal_all_when_blocking();
}
