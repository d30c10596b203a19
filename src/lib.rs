//! ringcore - sequence-coordination engine for a pre-allocated ring buffer
//!
//! This crate is the core of a high-throughput, low-latency, in-process
//! event pipeline built around a fixed-capacity slot array: producers
//! claim slots, fill them, and publish; one or more consumer pipelines
//! observe slots in publish order, optionally gated by declared
//! dependencies between consumers.
//!
//! It is wait-free on the common path, is allocation-free once a
//! [`RingBuffer`] is constructed, and relies entirely on the sequence
//! protocol (no locks guard slot contents). See each module for the
//! invariants it enforces.
//!
//! Out of scope here, by design: cross-process transport, durability,
//! dynamic resizing, and priority scheduling of consumers - a ring's
//! capacity and producer mode are fixed at construction.

pub mod barrier;
pub mod config;
pub mod error;
pub mod processor;
pub mod registry;
pub mod ring_buffer;
pub mod sequence;
pub mod sequencer;
pub mod telemetry;
pub mod wait_strategy;

pub use barrier::SequenceBarrier;
pub use config::{ProducerKind, RingBufferConfig};
pub use error::{Result, RingError};
pub use processor::{
    BatchEventProcessor, EventHandler, ExceptionHandler, HaltHandle, MaxAttemptsRewindStrategy,
    RewindAction, RewindDecision, RewindStrategy, RewindableEventHandler,
};
pub use registry::{ConsumerRegistry, ManagedConsumer, StdThreadFactory, ThreadFactory};
pub use ring_buffer::{EventTranslator, RingBuffer};
pub use sequence::Sequence;
pub use sequencer::{MultiProducerSequencer, Sequencer, SingleProducerSequencer};
pub use wait_strategy::{
    AlertFlag, BlockingWaitStrategy, BusySpinWaitStrategy, LiteBlockingWaitStrategy,
    SleepingWaitStrategy, TimeoutBlockingWaitStrategy, WaitResult, WaitStrategy,
    YieldingWaitStrategy,
};
