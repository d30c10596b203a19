//! Single-producer sequencer - wait-free on the fast path because only
//! one thread is ever allowed to call `next`/`publish` (`spec.md` §4.2).

use super::{backoff, signal, GatingSequences, Sequencer};
use crate::error::{RingError, Result};
use crate::sequence::Sequence;
use crate::wait_strategy::WaitStrategy;
use std::cell::Cell;
use std::sync::Arc;

/// Claim/publish coordination for exactly one producer thread.
///
/// `next_value` and `cached_value` are plain (non-atomic) fields: the
/// single-producer contract is enforced by the caller, not by this type,
/// matching `spec.md` §9's note that accidental concurrent use is
/// undefined behaviour the implementation should only assert against in
/// debug builds.
pub struct SingleProducerSequencer {
    capacity: i64,
    cursor: Arc<Sequence>,
    gating: GatingSequences,
    wait_strategy: Arc<dyn WaitStrategy>,
    next_value: Cell<i64>,
    cached_value: Cell<i64>,
    #[cfg(debug_assertions)]
    owner: Cell<Option<std::thread::ThreadId>>,
}

// SAFETY: `next_value`/`cached_value`/`owner` are only ever touched from
// the single producer thread, which is a caller contract checked (in
// debug builds) by `assert_single_producer`.
unsafe impl Sync for SingleProducerSequencer {}

impl SingleProducerSequencer {
    pub fn new(capacity: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Self {
        Self {
            capacity: capacity as i64,
            cursor: Arc::new(Sequence::default()),
            gating: GatingSequences::new(),
            wait_strategy,
            next_value: Cell::new(crate::sequence::INITIAL_VALUE),
            cached_value: Cell::new(crate::sequence::INITIAL_VALUE),
            #[cfg(debug_assertions)]
            owner: Cell::new(None),
        }
    }

    #[cfg(debug_assertions)]
    #[inline]
    fn assert_single_producer(&self) {
        let current = std::thread::current().id();
        match self.owner.get() {
            None => self.owner.set(Some(current)),
            Some(owner) => debug_assert_eq!(
                owner, current,
                "SingleProducerSequencer::next called from more than one thread"
            ),
        }
    }

    #[inline]
    fn min_gating_or_cursor(&self) -> i64 {
        self.gating.min(self.cursor.get())
    }
}

impl Sequencer for SingleProducerSequencer {
    fn capacity(&self) -> usize {
        self.capacity as usize
    }

    fn cursor(&self) -> i64 {
        self.cursor.get()
    }

    fn cursor_sequence(&self) -> Arc<Sequence> {
        self.cursor.clone()
    }

    fn next(&self, n: i64) -> i64 {
        #[cfg(debug_assertions)]
        self.assert_single_producer();
        debug_assert!(n > 0);

        let next_seq = self.next_value.get() + n;
        let wrap_point = next_seq - self.capacity;
        let cached = self.cached_value.get();

        // OR, not AND: see "single-producer guard" in DESIGN.md. `cached`
        // is the last observed gating-consumer minimum and `cursor` is
        // this producer's own publish progress - two unrelated
        // quantities, so entering the recheck whenever *either* looks
        // stale is the condition that can't under-trigger.
        if wrap_point > cached || wrap_point > self.cursor.get() {
            let mut spins = 0u32;
            loop {
                let min_seq = self.min_gating_or_cursor();
                if wrap_point <= min_seq {
                    self.cached_value.set(min_seq);
                    break;
                }
                backoff(&mut spins);
            }
        }

        self.next_value.set(next_seq);
        crate::telemetry::record_claim(n as usize);
        next_seq
    }

    fn try_next(&self, n: i64) -> Result<i64> {
        #[cfg(debug_assertions)]
        self.assert_single_producer();
        debug_assert!(n > 0);

        let next_seq = self.next_value.get() + n;
        let wrap_point = next_seq - self.capacity;
        let cached = self.cached_value.get();

        if wrap_point > cached || wrap_point > self.cursor.get() {
            let min_seq = self.min_gating_or_cursor();
            if wrap_point > min_seq {
                return Err(RingError::capacity(n as usize));
            }
            self.cached_value.set(min_seq);
        }

        self.next_value.set(next_seq);
        crate::telemetry::record_claim(n as usize);
        Ok(next_seq)
    }

    fn publish(&self, _lo: i64, hi: i64) {
        self.cursor.set(hi);
        crate::telemetry::record_publish(_lo, hi);
        signal(&self.wait_strategy);
    }

    fn is_available(&self, s: i64) -> bool {
        s <= self.cursor.get()
    }

    fn get_highest_published_sequence(&self, _lower: i64, available_up_to: i64) -> i64 {
        // Single-producer publishes are strictly ordered with the cursor,
        // so whatever is <= cursor is trivially contiguous.
        available_up_to
    }

    fn add_gating_sequence(&self, sequence: Arc<Sequence>) {
        self.gating.add(sequence);
    }

    fn gating_sequences(&self) -> Arc<Vec<Arc<Sequence>>> {
        self.gating.snapshot()
    }
}
