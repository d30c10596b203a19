//! BatchEventProcessor - the consumer run loop: claim a batch through the
//! barrier, hand each event to a handler, advance the processor's own
//! checkpoint `Sequence` for upstream barriers to gate on (`spec.md` §4.7).

use crate::barrier::SequenceBarrier;
use crate::error::{RingError, Result};
use crate::ring_buffer::RingBuffer;
use crate::sequence::Sequence;
use crate::wait_strategy::WaitResult;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const HALTED: u8 = 2;

/// Everything [`ConsumerRegistry::halt_all`](crate::registry::ConsumerRegistry::halt_all)
/// needs to halt a processor without owning it - a processor is moved
/// whole onto its run thread, so halting after that has to work through a
/// shared handle rather than a method call on the original value.
#[derive(Clone)]
pub struct HaltHandle {
    state: Arc<AtomicU8>,
    barrier: Arc<SequenceBarrier>,
}

impl HaltHandle {
    pub fn halt(&self) {
        self.state.store(HALTED, Ordering::Release);
        self.barrier.alert();
    }
}

/// Outcome a handler reports for a single event. Plain handlers always
/// return `Complete`; a handler opting into rewind semantics returns
/// `Rewind` to ask the processor's [`RewindStrategy`] whether to retry the
/// whole in-progress batch from its first sequence (`spec.md` §4.7, §7
/// "Rewind signal").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewindAction {
    Complete,
    Rewind,
}

/// Per-event callback plus the lifecycle hooks a [`BatchEventProcessor`]
/// invokes around its run loop (`spec.md` §6 "Handler contract").
///
/// A handler that only cares about plain completion implements
/// [`on_event`](EventHandler::on_event); one that wants rewind semantics
/// overrides [`on_event_rewindable`](EventHandler::on_event_rewindable)
/// instead (the default forwards to `on_event` and always reports
/// `Complete`) - see [`RewindableEventHandler`] for the marker trait that
/// documents the latter case.
pub trait EventHandler<T>: Send {
    fn on_event(&mut self, event: &mut T, sequence: i64, end_of_batch: bool);

    fn on_event_rewindable(
        &mut self,
        event: &mut T,
        sequence: i64,
        end_of_batch: bool,
    ) -> RewindAction {
        self.on_event(event, sequence, end_of_batch);
        RewindAction::Complete
    }

    fn on_start(&mut self) {}
    fn on_shutdown(&mut self) {}
    fn on_batch_start(&mut self, _batch_size: i64) {}
    fn on_timeout(&mut self, _sequence: i64) {}
}

/// Marker for handlers built around [`EventHandler::on_event_rewindable`].
/// [`BatchEventProcessor::with_rewind_strategy`] requires this bound, so a
/// handler that never returns [`RewindAction::Rewind`] can't be given a
/// [`RewindStrategy`] it would never consult.
pub trait RewindableEventHandler<T>: EventHandler<T> {}

/// Receives failures a handler raises (as a caught panic) during the run
/// loop (`spec.md` §6 "Exception-handler contract").
pub trait ExceptionHandler<T>: Send {
    fn handle_event_exception(&mut self, error: &RingError, sequence: i64, event: &mut T);
    fn handle_on_start_exception(&mut self, error: &RingError) {
        let _ = error;
    }
    fn handle_on_shutdown_exception(&mut self, error: &RingError) {
        let _ = error;
    }
}

/// Decides what to do when a handler reports [`RewindAction::Rewind`].
pub trait RewindStrategy: Send + Sync {
    fn on_rewind(&self, batch_start: i64) -> RewindDecision;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewindDecision {
    Retry,
    TreatAsFailure,
}

/// Allows up to `max_attempts` rewinds of the same batch before giving up
/// and treating further rewind requests as an ordinary handler failure.
/// The attempt counter is per-batch: it resets whenever `on_rewind` is
/// called with a different `batch_start` than last time, so one bad batch
/// can never permanently disable rewinding for the consumer
/// (`spec.md` §9 rewind-accounting open question).
pub struct MaxAttemptsRewindStrategy {
    max_attempts: u32,
    batch_start: std::sync::atomic::AtomicI64,
    attempts: std::sync::atomic::AtomicU32,
}

impl MaxAttemptsRewindStrategy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            batch_start: std::sync::atomic::AtomicI64::new(crate::sequence::INITIAL_VALUE),
            attempts: std::sync::atomic::AtomicU32::new(0),
        }
    }
}

impl RewindStrategy for MaxAttemptsRewindStrategy {
    fn on_rewind(&self, batch_start: i64) -> RewindDecision {
        if self.batch_start.swap(batch_start, Ordering::Relaxed) != batch_start {
            self.attempts.store(0, Ordering::Relaxed);
        }
        let attempts = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        if attempts <= self.max_attempts {
            RewindDecision::Retry
        } else {
            RewindDecision::TreatAsFailure
        }
    }
}

/// Drives `(ring_buffer, barrier, handler)` through the claim/dispatch/
/// checkpoint loop on whatever thread calls [`run`](Self::run). One
/// `Sequence` per processor is the checkpoint downstream barriers depend
/// on - it must only ever be advanced from inside `run`.
pub struct BatchEventProcessor<T, H: EventHandler<T>> {
    ring_buffer: Arc<RingBuffer<T>>,
    barrier: Arc<SequenceBarrier>,
    handler: H,
    exception_handler: Box<dyn ExceptionHandler<T>>,
    rewind_strategy: Option<Box<dyn RewindStrategy>>,
    sequence: Arc<Sequence>,
    state: Arc<AtomicU8>,
}

/// Exception handler used when none is supplied: forwards event failures
/// nowhere. A caller is expected to replace this with a real handler for
/// anything beyond a smoke test.
struct NoopExceptionHandler;

impl<T> ExceptionHandler<T> for NoopExceptionHandler {
    fn handle_event_exception(&mut self, _error: &RingError, _sequence: i64, _event: &mut T) {}
}

impl<T, H: EventHandler<T>> BatchEventProcessor<T, H> {
    pub fn new(ring_buffer: Arc<RingBuffer<T>>, barrier: Arc<SequenceBarrier>, handler: H) -> Self {
        Self {
            ring_buffer,
            barrier,
            handler,
            exception_handler: Box::new(NoopExceptionHandler),
            rewind_strategy: None,
            sequence: Arc::new(Sequence::default()),
            state: Arc::new(AtomicU8::new(IDLE)),
        }
    }

    pub fn with_exception_handler(mut self, handler: Box<dyn ExceptionHandler<T>>) -> Self {
        self.exception_handler = handler;
        self
    }

    /// The processor's checkpoint sequence - register this as a gating
    /// sequence on the ring buffer (or as a dependent on a downstream
    /// barrier) before the first call to `run`.
    pub fn sequence(&self) -> Arc<Sequence> {
        self.sequence.clone()
    }

    pub fn halt(&self) {
        self.halt_handle().halt();
    }

    /// A cloneable handle that can halt this processor after it has been
    /// moved onto its own run thread (`spec.md` §4.8 "halt all").
    pub fn halt_handle(&self) -> HaltHandle {
        HaltHandle {
            state: self.state.clone(),
            barrier: self.barrier.clone(),
        }
    }

    /// The barrier this processor waits on, for `ConsumerRegistry` wiring
    /// downstream dependents.
    pub fn barrier(&self) -> Arc<SequenceBarrier> {
        self.barrier.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    /// Run the consumer loop until halted. Returns a lifecycle error if
    /// the processor is already running or halted and hasn't returned to
    /// idle yet (`spec.md` §4.7 "re-entry from HALTED is disallowed").
    pub fn run(&mut self) -> Result<()> {
        self.state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RingError::lifecycle("BatchEventProcessor is not idle"))?;

        self.barrier.clear_alert();
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.handler.on_start())) {
            let err = RingError::handler_failure(
                self.sequence.get(),
                RingError::describe_panic(payload.as_ref()),
            );
            self.exception_handler.handle_on_start_exception(&err);
        }

        let mut next_sequence = self.sequence.get() + 1;

        'run: loop {
            if self.state.load(Ordering::Acquire) == HALTED {
                break 'run;
            }

            match self.barrier.wait_for(next_sequence) {
                WaitResult::Ready(available_sequence) if available_sequence >= next_sequence => {
                    next_sequence = self.process_batch(next_sequence, available_sequence);
                }
                WaitResult::Ready(_) => {
                    // Barrier woke us but nothing new is actually available yet
                    // (e.g. a spurious signal); loop and wait again.
                }
                WaitResult::Alert => {
                    if self.state.load(Ordering::Acquire) == HALTED {
                        break 'run;
                    }
                }
                WaitResult::TimedOut => {
                    self.handler.on_timeout(next_sequence);
                }
            }
        }

        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.handler.on_shutdown())) {
            let err = RingError::handler_failure(
                self.sequence.get(),
                RingError::describe_panic(payload.as_ref()),
            );
            self.exception_handler.handle_on_shutdown_exception(&err);
        }
        self.state.store(IDLE, Ordering::Release);
        Ok(())
    }

    /// Process `[next_sequence, available_sequence]`, publishing the
    /// processor's checkpoint only after the whole batch completes.
    /// Returns the next sequence to wait for.
    fn process_batch(&mut self, next_sequence: i64, available_sequence: i64) -> i64 {
        let batch_size = available_sequence - next_sequence + 1;
        crate::telemetry::record_batch(batch_size);
        if let Err(payload) =
            catch_unwind(AssertUnwindSafe(|| self.handler.on_batch_start(batch_size)))
        {
            let err = RingError::handler_failure(
                next_sequence,
                RingError::describe_panic(payload.as_ref()),
            );
            self.exception_handler
                .handle_event_exception(&err, next_sequence, self.ring_buffer.get(next_sequence));
        }

        let mut sequence = next_sequence;
        while sequence <= available_sequence {
            let end_of_batch = sequence == available_sequence;
            let rewound = self.dispatch_one(next_sequence, sequence, end_of_batch);
            if rewound {
                // Restart the batch from its first sequence; the rewind
                // strategy has already decided this attempt is permitted.
                sequence = next_sequence;
                continue;
            }
            sequence += 1;
        }

        self.sequence.set(available_sequence);
        available_sequence + 1
    }

    /// Dispatch a single event. Returns `true` if the batch should be
    /// rewound from its start instead of advancing past this event.
    fn dispatch_one(&mut self, batch_start: i64, sequence: i64, end_of_batch: bool) -> bool {
        let event = self.ring_buffer.get(sequence);
        let handler = &mut self.handler;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            handler.on_event_rewindable(event, sequence, end_of_batch)
        }));

        match outcome {
            Ok(RewindAction::Complete) => false,
            Ok(RewindAction::Rewind) => match &self.rewind_strategy {
                Some(strategy) => match strategy.on_rewind(batch_start) {
                    RewindDecision::Retry => true,
                    RewindDecision::TreatAsFailure => {
                        let err = RingError::handler_failure(
                            sequence,
                            "rewind requested but retry budget exhausted",
                        );
                        self.exception_handler.handle_event_exception(
                            &err,
                            sequence,
                            self.ring_buffer.get(sequence),
                        );
                        false
                    }
                },
                None => {
                    let err = RingError::handler_failure(
                        sequence,
                        "rewind requested but no RewindStrategy configured",
                    );
                    self.exception_handler.handle_event_exception(
                        &err,
                        sequence,
                        self.ring_buffer.get(sequence),
                    );
                    false
                }
            },
            Err(payload) => {
                let err =
                    RingError::handler_failure(sequence, RingError::describe_panic(payload.as_ref()));
                self.exception_handler.handle_event_exception(
                    &err,
                    sequence,
                    self.ring_buffer.get(sequence),
                );
                false
            }
        }
    }
}

impl<T, H: RewindableEventHandler<T>> BatchEventProcessor<T, H> {
    /// Only a handler that opts into [`RewindableEventHandler`] can be
    /// given a [`RewindStrategy`] - a plain [`EventHandler`] can never
    /// return [`RewindAction::Rewind`] in a way the processor would act
    /// on differently, so attaching a rewind strategy to one would be
    /// dead configuration.
    pub fn with_rewind_strategy(mut self, strategy: Box<dyn RewindStrategy>) -> Self {
        self.rewind_strategy = Some(strategy);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RingBufferConfig;
    use crate::wait_strategy::BusySpinWaitStrategy;
    use std::sync::Mutex;

    fn ring(capacity: usize) -> Arc<RingBuffer<i64>> {
        Arc::new(
            RingBuffer::new(
                RingBufferConfig::new(capacity).unwrap(),
                Arc::new(BusySpinWaitStrategy::new()),
            )
            .unwrap(),
        )
    }

    struct SummingHandler {
        sum: Arc<Mutex<i64>>,
    }

    impl EventHandler<i64> for SummingHandler {
        fn on_event(&mut self, event: &mut i64, _sequence: i64, _end_of_batch: bool) {
            *self.sum.lock().unwrap() += *event;
        }
    }

    #[test]
    fn halt_stops_the_run_loop() {
        let rb = ring(16);
        let barrier = Arc::new(rb.new_barrier(Arc::new(BusySpinWaitStrategy::new()), Vec::new()));
        let sum = Arc::new(Mutex::new(0i64));
        let processor = Arc::new(Mutex::new(BatchEventProcessor::new(
            rb.clone(),
            barrier,
            SummingHandler { sum: sum.clone() },
        )));
        let checkpoint = processor.lock().unwrap().sequence();
        rb.add_gating_sequence(checkpoint.clone());

        for i in 1..=10i64 {
            rb.publish_event(move |slot: &mut i64, _s| *slot = i);
        }

        let run_handle = {
            let processor = processor.clone();
            std::thread::spawn(move || {
                processor.lock().unwrap().run().unwrap();
            })
        };

        while checkpoint.get() < 9 {
            std::thread::yield_now();
        }
        processor.lock().unwrap().halt();
        run_handle.join().unwrap();

        assert_eq!(*sum.lock().unwrap(), 55);
        assert_eq!(checkpoint.get(), 9);
    }

    struct RewindOnceHandler {
        rewound: std::cell::Cell<bool>,
        log: Arc<Mutex<Vec<i64>>>,
    }

    impl EventHandler<i64> for RewindOnceHandler {
        fn on_event(&mut self, event: &mut i64, sequence: i64, end_of_batch: bool) {
            let _ = self.on_event_rewindable(event, sequence, end_of_batch);
        }

        fn on_event_rewindable(
            &mut self,
            event: &mut i64,
            _sequence: i64,
            end_of_batch: bool,
        ) -> RewindAction {
            self.log.lock().unwrap().push(*event);
            // Fail on the last event of the first pass, so the restart
            // actually has to replay the earlier events of this batch
            // rather than just retrying the one that failed.
            if end_of_batch && !self.rewound.get() {
                self.rewound.set(true);
                return RewindAction::Rewind;
            }
            RewindAction::Complete
        }
    }

    impl RewindableEventHandler<i64> for RewindOnceHandler {}

    #[test]
    fn rewind_restarts_the_batch_from_its_first_sequence() {
        let rb = ring(8);
        let barrier = Arc::new(rb.new_barrier(Arc::new(BusySpinWaitStrategy::new()), Vec::new()));
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = RewindOnceHandler {
            rewound: std::cell::Cell::new(false),
            log: log.clone(),
        };
        let processor = Arc::new(Mutex::new(
            BatchEventProcessor::new(rb.clone(), barrier, handler)
                .with_rewind_strategy(Box::new(MaxAttemptsRewindStrategy::new(3))),
        ));
        let checkpoint = processor.lock().unwrap().sequence();
        rb.add_gating_sequence(checkpoint.clone());

        rb.publish_events(4, |slot: &mut i64, s| *slot = s);

        let run_handle = {
            let processor = processor.clone();
            std::thread::spawn(move || {
                processor.lock().unwrap().run().unwrap();
            })
        };

        while checkpoint.get() < 3 {
            std::thread::yield_now();
        }
        processor.lock().unwrap().halt();
        run_handle.join().unwrap();

        let seen = log.lock().unwrap();
        assert_eq!(&seen[..4], &[0, 1, 2, 3]);
        assert_eq!(&seen[4..8], &[0, 1, 2, 3]);
    }
}
