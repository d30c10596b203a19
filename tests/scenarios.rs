//! The concrete scenarios from `spec.md` §8, each built the way a real
//! caller would wire one: a `RingBuffer`, one or more `BatchEventProcessor`s
//! gated through `SequenceBarrier`s, run on their own threads.

use ringcore::{
    BatchEventProcessor, BusySpinWaitStrategy, EventHandler, ExceptionHandler,
    MaxAttemptsRewindStrategy, ProducerKind, RewindAction, RingBuffer, RingBufferConfig,
    RingError,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) {
    let deadline = std::time::Instant::now() + timeout;
    while !condition() {
        assert!(std::time::Instant::now() < deadline, "timed out waiting for condition");
        std::thread::yield_now();
    }
}

/// Scenario 1: ring of 8, single producer, one consumer summing payloads;
/// publish [1..1000]; final sum is 500500 and final sequence is 999.
#[test]
fn scenario_1_single_producer_single_consumer_sum() {
    let rb = Arc::new(
        RingBuffer::<i64>::new(
            RingBufferConfig::new(8).unwrap(),
            Arc::new(BusySpinWaitStrategy::new()),
        )
        .unwrap(),
    );
    let barrier = Arc::new(rb.new_barrier(Arc::new(BusySpinWaitStrategy::new()), Vec::new()));

    struct Summer(Arc<Mutex<i64>>);
    impl EventHandler<i64> for Summer {
        fn on_event(&mut self, event: &mut i64, _sequence: i64, _end_of_batch: bool) {
            *self.0.lock().unwrap() += *event;
        }
    }

    let sum = Arc::new(Mutex::new(0i64));
    let mut processor = BatchEventProcessor::new(rb.clone(), barrier, Summer(sum.clone()));
    let checkpoint = processor.sequence();
    rb.add_gating_sequence(checkpoint.clone());
    let halt_handle = processor.halt_handle();

    for i in 1..=1000i64 {
        rb.publish_event(move |slot: &mut i64, _s| *slot = i);
    }

    let handle = std::thread::spawn(move || processor.run().unwrap());
    wait_until(|| checkpoint.get() == 999, Duration::from_secs(5));
    halt_handle.halt();
    handle.join().unwrap();

    assert_eq!(*sum.lock().unwrap(), 500_500);
}

/// Scenario 2: ring of 4, three multi-producer threads each publishing
/// 10000 integers tagged with producer id; single consumer records order.
/// 30000 events consumed, cursor == 29999, each producer's subsequence is
/// in submission order.
#[test]
fn scenario_2_multi_producer_preserves_per_producer_order() {
    #[derive(Default, Clone, Copy)]
    struct Tagged {
        producer_id: i64,
        value: i64,
    }

    let rb = Arc::new(
        RingBuffer::<Tagged>::new(
            RingBufferConfig::new(4)
                .unwrap()
                .with_producer_kind(ProducerKind::Multi),
            Arc::new(BusySpinWaitStrategy::new()),
        )
        .unwrap(),
    );
    let barrier = Arc::new(rb.new_barrier(Arc::new(BusySpinWaitStrategy::new()), Vec::new()));

    struct Recorder(Arc<Mutex<Vec<Tagged>>>);
    impl EventHandler<Tagged> for Recorder {
        fn on_event(&mut self, event: &mut Tagged, _sequence: i64, _end_of_batch: bool) {
            self.0.lock().unwrap().push(*event);
        }
    }

    let recorded = Arc::new(Mutex::new(Vec::with_capacity(30_000)));
    let mut processor = BatchEventProcessor::new(rb.clone(), barrier, Recorder(recorded.clone()));
    let checkpoint = processor.sequence();
    rb.add_gating_sequence(checkpoint.clone());
    let halt_handle = processor.halt_handle();

    let consumer_handle = std::thread::spawn(move || processor.run().unwrap());

    std::thread::scope(|scope| {
        for producer_id in 0..3i64 {
            let rb = rb.clone();
            scope.spawn(move || {
                for value in 0..10_000i64 {
                    rb.publish_event(move |slot: &mut Tagged, _s| {
                        *slot = Tagged { producer_id, value };
                    });
                }
            });
        }
    });

    wait_until(|| checkpoint.get() == 29_999, Duration::from_secs(10));
    halt_handle.halt();
    consumer_handle.join().unwrap();

    let events = recorded.lock().unwrap();
    assert_eq!(events.len(), 30_000);
    assert_eq!(rb.cursor(), 29_999);

    for producer_id in 0..3i64 {
        let subsequence: Vec<i64> = events
            .iter()
            .filter(|e| e.producer_id == producer_id)
            .map(|e| e.value)
            .collect();
        let expected: Vec<i64> = (0..10_000).collect();
        assert_eq!(subsequence, expected, "producer {producer_id} out of order");
    }
}

/// Scenario 3: ring of 16, two consumers A and B; B depends on A. Handler
/// A multiplies by 2 in place; handler B asserts event % 2 == 0. Publish
/// [1..100]. B never asserts.
#[test]
fn scenario_3_downstream_consumer_never_observes_a_stale_value() {
    let rb = Arc::new(
        RingBuffer::<i64>::new(
            RingBufferConfig::new(16).unwrap(),
            Arc::new(BusySpinWaitStrategy::new()),
        )
        .unwrap(),
    );

    struct Doubler;
    impl EventHandler<i64> for Doubler {
        fn on_event(&mut self, event: &mut i64, _sequence: i64, _end_of_batch: bool) {
            *event *= 2;
        }
    }

    struct AssertEven(Arc<AtomicI64>);
    impl EventHandler<i64> for AssertEven {
        fn on_event(&mut self, event: &mut i64, sequence: i64, _end_of_batch: bool) {
            assert_eq!(*event % 2, 0, "sequence {sequence} was odd: {event}");
            self.0.store(sequence, Ordering::Release);
        }
    }

    let barrier_a = Arc::new(rb.new_barrier(Arc::new(BusySpinWaitStrategy::new()), Vec::new()));
    let mut processor_a = BatchEventProcessor::new(rb.clone(), barrier_a, Doubler);
    let seq_a = processor_a.sequence();

    let barrier_b = Arc::new(rb.new_barrier(
        Arc::new(BusySpinWaitStrategy::new()),
        vec![seq_a.clone()],
    ));
    let b_progress = Arc::new(AtomicI64::new(-1));
    let mut processor_b = BatchEventProcessor::new(rb.clone(), barrier_b, AssertEven(b_progress.clone()));
    let seq_b = processor_b.sequence();

    // Only B is end-of-chain: the ring must not overrun B, which can
    // never be ahead of A anyway given the dependency.
    rb.add_gating_sequence(seq_b.clone());

    let halt_a = processor_a.halt_handle();
    let halt_b = processor_b.halt_handle();
    let handle_a = std::thread::spawn(move || processor_a.run().unwrap());
    let handle_b = std::thread::spawn(move || processor_b.run().unwrap());

    for i in 1..=100i64 {
        rb.publish_event(move |slot: &mut i64, _s| *slot = i);
    }

    wait_until(|| b_progress.load(Ordering::Acquire) == 99, Duration::from_secs(5));
    halt_a.halt();
    halt_b.halt();
    handle_a.join().unwrap();
    handle_b.join().unwrap();

    assert_eq!(seq_a.get(), 99);
    assert_eq!(seq_b.get(), 99);
}

/// Scenario 4: ring of 8, one consumer with a handler that fails on
/// sequence 5. The exception handler records the failure; after
/// publishing [0..9] the consumer has advanced to 9 and the handler has
/// been invoked for every sequence including the failing one.
#[test]
fn scenario_4_handler_failure_is_recorded_and_consumer_advances_past_it() {
    let rb = Arc::new(
        RingBuffer::<i64>::new(
            RingBufferConfig::new(8).unwrap(),
            Arc::new(BusySpinWaitStrategy::new()),
        )
        .unwrap(),
    );
    let barrier = Arc::new(rb.new_barrier(Arc::new(BusySpinWaitStrategy::new()), Vec::new()));

    struct FailsOnFive(Arc<Mutex<Vec<i64>>>);
    impl EventHandler<i64> for FailsOnFive {
        fn on_event(&mut self, event: &mut i64, sequence: i64, _end_of_batch: bool) {
            self.0.lock().unwrap().push(sequence);
            if sequence == 5 {
                panic!("boom at sequence 5: {event}");
            }
        }
    }

    struct Recorder(Arc<Mutex<Vec<i64>>>);
    impl ExceptionHandler<i64> for Recorder {
        fn handle_event_exception(&mut self, _error: &RingError, sequence: i64, _event: &mut i64) {
            self.0.lock().unwrap().push(sequence);
        }
    }

    let invoked = Arc::new(Mutex::new(Vec::new()));
    let failures = Arc::new(Mutex::new(Vec::new()));
    let mut processor = BatchEventProcessor::new(rb.clone(), barrier, FailsOnFive(invoked.clone()))
        .with_exception_handler(Box::new(Recorder(failures.clone())));
    let checkpoint = processor.sequence();
    rb.add_gating_sequence(checkpoint.clone());
    let halt_handle = processor.halt_handle();

    rb.publish_events(10, |slot: &mut i64, s| *slot = s);

    let handle = std::thread::spawn(move || processor.run().unwrap());
    wait_until(|| checkpoint.get() == 9, Duration::from_secs(5));
    halt_handle.halt();
    handle.join().unwrap();

    assert_eq!(*invoked.lock().unwrap(), (0..=9i64).collect::<Vec<_>>());
    assert_eq!(*failures.lock().unwrap(), vec![5]);
}

/// Scenario 5: a rewindable handler fails with a rewind signal on the
/// first invocation of every batch; the rewind strategy allows up to 3
/// retries. Publishing 20 events in one batch invokes the handler 40
/// times (one rewind + success per event) and the consumer advances to
/// 19.
#[test]
fn scenario_5_rewind_retries_the_batch_once_then_succeeds() {
    let rb = Arc::new(
        RingBuffer::<i64>::new(
            RingBufferConfig::new(32).unwrap(),
            Arc::new(BusySpinWaitStrategy::new()),
        )
        .unwrap(),
    );
    let barrier = Arc::new(rb.new_barrier(Arc::new(BusySpinWaitStrategy::new()), Vec::new()));

    struct RewindFirstInEveryBatch {
        invocations: Arc<Mutex<Vec<i64>>>,
        rewound_this_batch: std::cell::Cell<bool>,
    }

    impl EventHandler<i64> for RewindFirstInEveryBatch {
        fn on_event(&mut self, event: &mut i64, sequence: i64, end_of_batch: bool) {
            let _ = self.on_event_rewindable(event, sequence, end_of_batch);
        }

        fn on_event_rewindable(
            &mut self,
            _event: &mut i64,
            sequence: i64,
            end_of_batch: bool,
        ) -> RewindAction {
            self.invocations.lock().unwrap().push(sequence);
            // Fail on the last event of the first pass so the restart
            // genuinely replays the rest of the batch instead of just
            // retrying the one event that failed.
            if end_of_batch && !self.rewound_this_batch.get() {
                self.rewound_this_batch.set(true);
                return RewindAction::Rewind;
            }
            RewindAction::Complete
        }
    }

    impl ringcore::RewindableEventHandler<i64> for RewindFirstInEveryBatch {}

    let invocations = Arc::new(Mutex::new(Vec::new()));
    let handler = RewindFirstInEveryBatch {
        invocations: invocations.clone(),
        rewound_this_batch: std::cell::Cell::new(false),
    };
    let mut processor = BatchEventProcessor::new(rb.clone(), barrier, handler)
        .with_rewind_strategy(Box::new(MaxAttemptsRewindStrategy::new(3)));
    let checkpoint = processor.sequence();
    rb.add_gating_sequence(checkpoint.clone());
    let halt_handle = processor.halt_handle();

    rb.publish_events(20, |slot: &mut i64, s| *slot = s);

    let handle = std::thread::spawn(move || processor.run().unwrap());
    wait_until(|| checkpoint.get() == 19, Duration::from_secs(5));
    halt_handle.halt();
    handle.join().unwrap();

    let seen = invocations.lock().unwrap();
    assert_eq!(seen.len(), 40);
    // The last event of the first pass triggers the rewind, so the whole
    // batch restarts from sequence 0 and every event is seen twice.
    let expected: Vec<i64> = (0..20i64).chain(0..20i64).collect();
    assert_eq!(&seen[..], &expected[..]);
}

/// Scenario 6: a `BlockingWaitStrategy` consumer parked on an empty ring
/// wakes within a bounded time once the producer publishes.
#[test]
fn scenario_6_blocking_consumer_wakes_on_publish() {
    let wait_strategy = Arc::new(ringcore::BlockingWaitStrategy::new());
    let rb = Arc::new(
        RingBuffer::<i64>::new(RingBufferConfig::new(8).unwrap(), wait_strategy.clone()).unwrap(),
    );
    let barrier = Arc::new(rb.new_barrier(wait_strategy, Vec::new()));

    struct Recorder(Arc<Mutex<Vec<i64>>>);
    impl EventHandler<i64> for Recorder {
        fn on_event(&mut self, event: &mut i64, _sequence: i64, _end_of_batch: bool) {
            self.0.lock().unwrap().push(*event);
        }
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut processor = BatchEventProcessor::new(rb.clone(), barrier, Recorder(seen.clone()));
    let checkpoint = processor.sequence();
    rb.add_gating_sequence(checkpoint.clone());
    let halt_handle = processor.halt_handle();

    let handle = std::thread::spawn(move || processor.run().unwrap());

    // The consumer starts parked on an empty ring; give it a moment to
    // actually reach the wait before publishing.
    std::thread::sleep(Duration::from_millis(20));
    rb.publish_event(|slot: &mut i64, _s| *slot = 7);

    wait_until(|| checkpoint.get() == 0, Duration::from_secs(5));
    halt_handle.halt();
    handle.join().unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![7]);
}
