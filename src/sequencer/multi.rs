//! Multi-producer sequencer - a CAS-loop claim plus a per-slot
//! availability buffer so consumers can detect out-of-order publishes
//! (`spec.md` §4.3).

use super::{backoff, signal, GatingSequences, Sequencer};
use crate::error::{RingError, Result};
use crate::sequence::Sequence;
use crate::wait_strategy::WaitStrategy;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

pub struct MultiProducerSequencer {
    capacity: i64,
    index_shift: u32,
    cursor: Arc<Sequence>,
    gating: GatingSequences,
    wait_strategy: Arc<dyn WaitStrategy>,
    /// `availability[i]` holds the "lap flag" of the sequence that most
    /// recently landed at ring index `i`, so a consumer can tell a slot
    /// was published for *this* lap rather than reading stale data left
    /// over from the previous time the ring wrapped through that index.
    availability: Box<[AtomicI64]>,
    gating_cache: AtomicI64,
}

impl MultiProducerSequencer {
    pub fn new(capacity: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Self {
        let availability: Box<[AtomicI64]> = (0..capacity)
            .map(|_| AtomicI64::new(crate::sequence::INITIAL_VALUE))
            .collect();
        Self {
            capacity: capacity as i64,
            index_shift: capacity.trailing_zeros(),
            cursor: Arc::new(Sequence::default()),
            gating: GatingSequences::new(),
            wait_strategy,
            availability,
            gating_cache: AtomicI64::new(crate::sequence::INITIAL_VALUE),
        }
    }

    #[inline]
    fn index_of(&self, sequence: i64) -> usize {
        (sequence as usize) & (self.capacity as usize - 1)
    }

    #[inline]
    fn flag_of(&self, sequence: i64) -> i64 {
        sequence >> self.index_shift
    }
}

impl Sequencer for MultiProducerSequencer {
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
        debug_assert!(n > 0);
        let mut spins = 0u32;
        loop {
            let current = self.cursor.get();
            let next_seq = current + n;
            let wrap_point = next_seq - self.capacity;
            let cached = self.gating_cache.load(Ordering::Relaxed);

            if wrap_point > cached || cached > current {
                let min_seq = self.gating.min(current);
                if wrap_point > min_seq {
                    backoff(&mut spins);
                    continue;
                }
                self.gating_cache.store(min_seq, Ordering::Relaxed);
            }

            if self.cursor.compare_and_set(current, next_seq) {
                crate::telemetry::record_claim(n as usize);
                return next_seq;
            }
        }
    }

    fn try_next(&self, n: i64) -> Result<i64> {
        debug_assert!(n > 0);
        loop {
            let current = self.cursor.get();
            let next_seq = current + n;
            let wrap_point = next_seq - self.capacity;
            let min_seq = self.gating.min(current);

            if wrap_point > min_seq {
                return Err(RingError::capacity(n as usize));
            }
            self.gating_cache.store(min_seq, Ordering::Relaxed);

            if self.cursor.compare_and_set(current, next_seq) {
                crate::telemetry::record_claim(n as usize);
                return Ok(next_seq);
            }
        }
    }

    fn publish(&self, lo: i64, hi: i64) {
        for seq in lo..=hi {
            let idx = self.index_of(seq);
            let flag = self.flag_of(seq);
            self.availability[idx].store(flag, Ordering::Release);
        }
        crate::telemetry::record_publish(lo, hi);
        signal(&self.wait_strategy);
    }

    fn is_available(&self, s: i64) -> bool {
        let idx = self.index_of(s);
        self.availability[idx].load(Ordering::Acquire) == self.flag_of(s)
    }

    fn get_highest_published_sequence(&self, lower: i64, available_up_to: i64) -> i64 {
        let mut sequence = lower;
        while sequence <= available_up_to {
            if !self.is_available(sequence) {
                return sequence - 1;
            }
            sequence += 1;
        }
        available_up_to
    }

    fn add_gating_sequence(&self, sequence: Arc<Sequence>) {
        self.gating.add(sequence);
    }

    fn gating_sequences(&self) -> Arc<Vec<Arc<Sequence>>> {
        self.gating.snapshot()
    }
}
