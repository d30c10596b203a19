//! Wait strategies - the policy by which a consumer blocks or spins until
//! a dependent sequence has advanced far enough to satisfy a requested
//! sequence (`spec.md` §4.6).

use crate::sequence::Sequence;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative-cancellation flag a [`crate::barrier::SequenceBarrier`]
/// raises to unstick every wait strategy at once. Checked on every
/// iteration of every strategy's wait loop (`spec.md` §5 "Cancellation").
#[derive(Default)]
pub struct AlertFlag(AtomicBool);

impl AlertFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn alert(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_alerted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome of a wait. Never allocates - cancellation and timeout are
/// ordinary variants, not exceptions (`spec.md` §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The dependent sequence reached at least the requested value.
    Ready(i64),
    /// The barrier was alerted while waiting.
    Alert,
    /// A timed wait strategy's deadline elapsed before `Ready`.
    TimedOut,
}

/// A source of "how far has progress gone" for the wait strategy to poll:
/// either the producer cursor (no declared upstream consumers) or the
/// minimum of a set of upstream consumer sequences (`spec.md` §4.5).
pub trait SequenceSource: Send + Sync {
    fn get(&self) -> i64;
}

impl SequenceSource for Sequence {
    fn get(&self) -> i64 {
        Sequence::get(self)
    }
}

/// Minimum of zero-or-more upstream sequences; an empty set means
/// "no declared dependency", represented here as `i64::MAX` so it never
/// gates anything narrower than the cursor itself.
pub struct MinOfSequences(pub Vec<Arc<Sequence>>);

impl SequenceSource for MinOfSequences {
    fn get(&self) -> i64 {
        self.0.iter().map(|s| s.get()).min().unwrap_or(i64::MAX)
    }
}

/// The dependent sequence a barrier actually waits on: the minimum of its
/// declared upstream consumers, or the producer cursor when it has none
/// (`spec.md` §4.5 - "`dependentSequence` is the min of upstreams when
/// non-empty, else the cursor").
pub struct BarrierDependency {
    pub cursor: Arc<Sequence>,
    pub upstream: Vec<Arc<Sequence>>,
}

impl SequenceSource for BarrierDependency {
    fn get(&self) -> i64 {
        if self.upstream.is_empty() {
            self.cursor.get()
        } else {
            self.upstream.iter().map(|s| s.get()).min().unwrap()
        }
    }
}

/// Policy by which a consumer waits for `dependent.get() >= sequence`.
pub trait WaitStrategy: Send + Sync {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependent: &dyn SequenceSource,
        alert: &AlertFlag,
    ) -> WaitResult;

    /// Wake any thread parked in this strategy's wait. No-op for
    /// spin/yield/sleep strategies, which never park.
    fn signal_all_when_blocking(&self);
}

#[inline]
fn poll(cursor: &Sequence, dependent: &dyn SequenceSource, sequence: i64) -> Option<i64> {
    if cursor.get() < sequence {
        return None;
    }
    let available = dependent.get();
    if available >= sequence {
        Some(available)
    } else {
        None
    }
}

/// Tight spin loop, no sleeps, no signals - lowest latency, highest CPU.
pub struct BusySpinWaitStrategy;

impl BusySpinWaitStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BusySpinWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for BusySpinWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependent: &dyn SequenceSource,
        alert: &AlertFlag,
    ) -> WaitResult {
        loop {
            if alert.is_alerted() {
                return WaitResult::Alert;
            }
            if let Some(available) = poll(cursor, dependent, sequence) {
                return WaitResult::Ready(available);
            }
            std::hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {}
}

/// Spin for a fixed number of iterations, then yield the thread on every
/// subsequent iteration - a middle ground between busy-spin and sleeping.
pub struct YieldingWaitStrategy {
    spin_tries: u32,
}

impl YieldingWaitStrategy {
    pub fn new() -> Self {
        Self { spin_tries: 100 }
    }
}

impl Default for YieldingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependent: &dyn SequenceSource,
        alert: &AlertFlag,
    ) -> WaitResult {
        let mut counter = self.spin_tries;
        loop {
            if alert.is_alerted() {
                return WaitResult::Alert;
            }
            if let Some(available) = poll(cursor, dependent, sequence) {
                return WaitResult::Ready(available);
            }
            if counter == 0 {
                std::thread::yield_now();
            } else {
                counter -= 1;
                std::hint::spin_loop();
            }
        }
    }

    fn signal_all_when_blocking(&self) {}
}

/// Spin, then progressively longer sleeps (nanoseconds up to a
/// millisecond) - trades a little latency for much lower CPU usage.
pub struct SleepingWaitStrategy {
    spin_tries: u32,
    yield_tries: u32,
}

impl SleepingWaitStrategy {
    pub fn new() -> Self {
        Self {
            spin_tries: 100,
            yield_tries: 100,
        }
    }
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleep doubles from this floor on every iteration once the spin/yield
/// prefix is exhausted, capped at `MAX_SLEEP_NANOS` (one millisecond).
const MIN_SLEEP_NANOS: u64 = 500;
const MAX_SLEEP_NANOS: u64 = 1_000_000;

impl WaitStrategy for SleepingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependent: &dyn SequenceSource,
        alert: &AlertFlag,
    ) -> WaitResult {
        let mut counter = self.spin_tries + self.yield_tries;
        let mut sleep_nanos = MIN_SLEEP_NANOS;
        loop {
            if alert.is_alerted() {
                return WaitResult::Alert;
            }
            if let Some(available) = poll(cursor, dependent, sequence) {
                return WaitResult::Ready(available);
            }
            if counter > self.yield_tries {
                std::hint::spin_loop();
                counter -= 1;
            } else if counter > 0 {
                std::thread::yield_now();
                counter -= 1;
            } else {
                std::thread::sleep(Duration::from_nanos(sleep_nanos));
                sleep_nanos = (sleep_nanos * 2).min(MAX_SLEEP_NANOS);
            }
        }
    }

    fn signal_all_when_blocking(&self) {}
}

/// Lock + condition variable. Publishers signal on every publish; the
/// waiter blocks until the cursor passes `sequence`, then busy-reads the
/// dependent sequence (which may lag the cursor when there are upstream
/// consumers) until it catches up too.
pub struct BlockingWaitStrategy {
    mutex: parking_lot::Mutex<()>,
    condvar: parking_lot::Condvar,
}

impl BlockingWaitStrategy {
    pub fn new() -> Self {
        Self {
            mutex: parking_lot::Mutex::new(()),
            condvar: parking_lot::Condvar::new(),
        }
    }
}

impl Default for BlockingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependent: &dyn SequenceSource,
        alert: &AlertFlag,
    ) -> WaitResult {
        if cursor.get() < sequence {
            let mut guard = self.mutex.lock();
            while cursor.get() < sequence {
                if alert.is_alerted() {
                    return WaitResult::Alert;
                }
                self.condvar.wait_for(&mut guard, Duration::from_millis(1));
            }
        }
        loop {
            if alert.is_alerted() {
                return WaitResult::Alert;
            }
            let available = dependent.get();
            if available >= sequence {
                return WaitResult::Ready(available);
            }
            std::hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {
        self.condvar.notify_all();
    }
}

/// Blocking variant that tracks whether anyone is actually parked, so a
/// publisher on the fast path can skip the mutex/notify entirely when no
/// consumer is waiting.
pub struct LiteBlockingWaitStrategy {
    mutex: parking_lot::Mutex<()>,
    condvar: parking_lot::Condvar,
    signal_needed: AtomicBool,
}

impl LiteBlockingWaitStrategy {
    pub fn new() -> Self {
        Self {
            mutex: parking_lot::Mutex::new(()),
            condvar: parking_lot::Condvar::new(),
            signal_needed: AtomicBool::new(false),
        }
    }
}

impl Default for LiteBlockingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for LiteBlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependent: &dyn SequenceSource,
        alert: &AlertFlag,
    ) -> WaitResult {
        if cursor.get() < sequence {
            let mut guard = self.mutex.lock();
            while cursor.get() < sequence {
                if alert.is_alerted() {
                    return WaitResult::Alert;
                }
                self.signal_needed.store(true, Ordering::Release);
                self.condvar.wait_for(&mut guard, Duration::from_millis(1));
            }
        }
        loop {
            if alert.is_alerted() {
                return WaitResult::Alert;
            }
            let available = dependent.get();
            if available >= sequence {
                return WaitResult::Ready(available);
            }
            std::hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {
        if self.signal_needed.swap(false, Ordering::AcqRel) {
            let _guard = self.mutex.lock();
            self.condvar.notify_all();
        }
    }
}

/// Like [`BlockingWaitStrategy`] but gives up after `timeout` and reports
/// it as a soft, retryable condition rather than blocking forever.
pub struct TimeoutBlockingWaitStrategy {
    mutex: parking_lot::Mutex<()>,
    condvar: parking_lot::Condvar,
    timeout: Duration,
}

impl TimeoutBlockingWaitStrategy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            mutex: parking_lot::Mutex::new(()),
            condvar: parking_lot::Condvar::new(),
            timeout,
        }
    }
}

impl WaitStrategy for TimeoutBlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependent: &dyn SequenceSource,
        alert: &AlertFlag,
    ) -> WaitResult {
        let deadline = Instant::now() + self.timeout;
        if cursor.get() < sequence {
            let mut guard = self.mutex.lock();
            while cursor.get() < sequence {
                if alert.is_alerted() {
                    return WaitResult::Alert;
                }
                let now = Instant::now();
                if now >= deadline {
                    return WaitResult::TimedOut;
                }
                self.condvar.wait_for(&mut guard, deadline - now);
            }
        }
        loop {
            if alert.is_alerted() {
                return WaitResult::Alert;
            }
            let available = dependent.get();
            if available >= sequence {
                return WaitResult::Ready(available);
            }
            if Instant::now() >= deadline {
                return WaitResult::TimedOut;
            }
            std::hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {
        self.condvar.notify_all();
    }
}
