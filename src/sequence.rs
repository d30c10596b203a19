//! Padded monotonic sequence counter - the sole synchronisation edge
//! between producers and consumers.

use std::sync::atomic::{AtomicI64, Ordering};

/// Sequences start here; it means "nothing has been claimed or consumed yet".
pub const INITIAL_VALUE: i64 = -1;

/// A single 64-bit counter, cache-line padded on both sides so it never
/// shares a line with a neighbouring `Sequence` (false-sharing is the
/// single biggest throughput killer in a disruptor-shaped pipeline).
#[repr(align(128))]
pub struct Sequence(AtomicI64);

impl Sequence {
    pub fn new(initial: i64) -> Self {
        Self(AtomicI64::new(initial))
    }

    /// Load with acquire semantics.
    #[inline]
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    /// Store with release semantics - the edge consumers synchronise on.
    #[inline]
    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Release);
    }

    /// Store with a full fence, for callers that need readers to observe
    /// the value without any prior happens-before relationship (used when
    /// seeding a sequence before it is published into a gating snapshot).
    #[inline]
    pub fn set_volatile(&self, value: i64) {
        self.0.store(value, Ordering::SeqCst);
    }

    /// CAS: release on success (publishes the new value), relaxed on
    /// failure (the caller just retries, nothing to synchronise on yet).
    #[inline]
    pub fn compare_and_set(&self, expected: i64, new: i64) -> bool {
        self.0
            .compare_exchange(expected, new, Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    pub fn increment_and_get(&self) -> i64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline]
    pub fn add_and_get(&self, delta: i64) -> i64 {
        self.0.fetch_add(delta, Ordering::AcqRel) + delta
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(INITIAL_VALUE)
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence").field("value", &self.get()).finish()
    }
}

/// Minimum of an upstream sequence set, treating an empty set as `None`.
pub fn min_sequence(sequences: &[std::sync::Arc<Sequence>]) -> Option<i64> {
    sequences.iter().map(|s| s.get()).min()
}
