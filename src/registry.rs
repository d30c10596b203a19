//! ConsumerRegistry - tracks consumers, their sequences, barriers, and
//! chain-end status; starts and halts them as a group (`spec.md` §4.8).

use crate::barrier::SequenceBarrier;
use crate::error::{RingError, Result};
use crate::processor::{BatchEventProcessor, EventHandler, HaltHandle};
use crate::sequence::Sequence;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Object-safe view of a `BatchEventProcessor<T, H>` the registry can hold
/// regardless of the event type or handler it was built with.
pub trait ManagedConsumer: Send {
    /// Run to completion on the calling thread. Takes `self` by value
    /// because the registry moves the processor onto its own OS thread
    /// when starting it - after that, halting can only go through the
    /// [`HaltHandle`] captured at registration time.
    fn run_boxed(self: Box<Self>) -> Result<()>;
    fn seq(&self) -> Arc<Sequence>;
    fn halt_handle(&self) -> HaltHandle;
}

impl<T, H> ManagedConsumer for BatchEventProcessor<T, H>
where
    T: Send + 'static,
    H: EventHandler<T> + 'static,
{
    fn run_boxed(mut self: Box<Self>) -> Result<()> {
        self.run()
    }

    fn seq(&self) -> Arc<Sequence> {
        self.sequence()
    }

    fn halt_handle(&self) -> HaltHandle {
        BatchEventProcessor::halt_handle(self)
    }
}

/// Spawns the OS thread a registered consumer runs its loop on. Injected
/// so tests and embedders can substitute pooling, naming, or priority
/// policy without this crate depending on a particular runtime.
pub trait ThreadFactory: Send + Sync {
    fn spawn(&self, name: &str, task: Box<dyn FnOnce() + Send>) -> std::thread::JoinHandle<()>;
}

/// `std::thread::Builder`, one named thread per consumer - the standard
/// pattern for long-running worker loops.
pub struct StdThreadFactory;

impl ThreadFactory for StdThreadFactory {
    fn spawn(&self, name: &str, task: Box<dyn FnOnce() + Send>) -> std::thread::JoinHandle<()> {
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(task)
            .expect("failed to spawn consumer thread")
    }
}

struct Entry {
    processor: Mutex<Option<Box<dyn ManagedConsumer>>>,
    halt_handle: HaltHandle,
    sequence: Arc<Sequence>,
    barrier: Arc<SequenceBarrier>,
    /// True until some other consumer declares a dependency on this one
    /// (`spec.md` §4.8, Glossary "End-of-chain consumer").
    is_end_of_chain: AtomicBool,
}

/// Tracks every consumer wired into a topology: its processor (until
/// started), its checkpoint `Sequence`, the `SequenceBarrier` it waits
/// on, and whether anything downstream depends on it.
#[derive(Default)]
pub struct ConsumerRegistry {
    entries: HashMap<String, Entry>,
    insertion_order: Vec<String>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: Vec::new(),
        }
    }

    /// Register a consumer under `id`. Fails if `id` is already taken -
    /// this registry has no update-in-place operation, matching `spec.md`
    /// §9's "forbid removal while producers can be blocked on that
    /// consumer" by never offering removal at all.
    pub fn add_consumer(
        &mut self,
        id: impl Into<String>,
        processor: Box<dyn ManagedConsumer>,
        barrier: Arc<SequenceBarrier>,
    ) -> Result<()> {
        let id = id.into();
        if self.entries.contains_key(&id) {
            return Err(RingError::lifecycle(format!(
                "consumer '{id}' is already registered"
            )));
        }

        let sequence = processor.seq();
        let halt_handle = processor.halt_handle();
        self.entries.insert(
            id.clone(),
            Entry {
                processor: Mutex::new(Some(processor)),
                halt_handle,
                sequence,
                barrier,
                is_end_of_chain: AtomicBool::new(true),
            },
        );
        self.insertion_order.push(id);
        Ok(())
    }

    pub fn sequence(&self, id: &str) -> Option<Arc<Sequence>> {
        self.entries.get(id).map(|e| e.sequence.clone())
    }

    pub fn barrier(&self, id: &str) -> Option<Arc<SequenceBarrier>> {
        self.entries.get(id).map(|e| e.barrier.clone())
    }

    /// Declare that some other consumer now depends on `id`'s sequence -
    /// `id` is no longer an end-of-chain consumer.
    pub fn mark_used_in_barrier(&self, id: &str) {
        if let Some(entry) = self.entries.get(id) {
            entry.is_end_of_chain.store(false, Ordering::Release);
        }
    }

    pub fn is_end_of_chain(&self, id: &str) -> Option<bool> {
        self.entries
            .get(id)
            .map(|e| e.is_end_of_chain.load(Ordering::Acquire))
    }

    /// Alert every barrier, then halt every processor, in registration
    /// order. Safe to call whether or not `start_all` has run yet.
    pub fn halt_all(&self) {
        for id in &self.insertion_order {
            if let Some(entry) = self.entries.get(id) {
                entry.barrier.alert();
            }
        }
        for id in &self.insertion_order {
            if let Some(entry) = self.entries.get(id) {
                entry.halt_handle.halt();
            }
        }
    }

    /// Move each not-yet-started consumer onto its own thread via
    /// `factory`. A consumer already taken (started once before) is
    /// silently skipped - calling this twice just starts whatever is
    /// left.
    pub fn start_all(&self, factory: &dyn ThreadFactory) -> Vec<std::thread::JoinHandle<()>> {
        self.insertion_order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|entry| (id, entry)))
            .filter_map(|(id, entry)| {
                entry
                    .processor
                    .lock()
                    .expect("registry mutex poisoned")
                    .take()
                    .map(|processor| (id.clone(), processor))
            })
            .map(|(id, processor)| {
                factory.spawn(
                    id.as_str(),
                    Box::new(move || {
                        if let Err(error) = processor.run_boxed() {
                            crate::telemetry::record_lifecycle_violation(&id, &error);
                            panic!("consumer '{id}' run loop exited with a lifecycle violation: {error}");
                        }
                    }),
                )
            })
            .collect()
    }

    /// True iff some end-of-chain consumer has not yet caught up to
    /// `cursor` - the condition shutdown polls on before declaring the
    /// topology drained (`spec.md` §4.8, §5 "Timeouts").
    pub fn has_backlog(&self, cursor: i64) -> bool {
        self.entries.values().any(|entry| {
            entry.is_end_of_chain.load(Ordering::Acquire) && entry.sequence.get() < cursor
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
