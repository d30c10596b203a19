//! RingBuffer - façade over a [`Sequencer`] plus the fixed-capacity slot
//! array it coordinates access to (`spec.md` §4.4).

use crate::barrier::SequenceBarrier;
use crate::config::{ProducerKind, RingBufferConfig};
use crate::error::Result;
use crate::sequence::Sequence;
use crate::sequencer::{MultiProducerSequencer, Sequencer, SingleProducerSequencer};
use crate::wait_strategy::WaitStrategy;
use std::cell::UnsafeCell;
use std::sync::Arc;

/// Populates a freshly claimed slot. Implemented for plain closures so
/// callers rarely need to name a type; a hand-written impl is useful when
/// the same translation logic is reused across many publish call sites.
pub trait EventTranslator<T> {
    fn translate_to(&mut self, slot: &mut T, sequence: i64);
}

impl<T, F: FnMut(&mut T, i64)> EventTranslator<T> for F {
    fn translate_to(&mut self, slot: &mut T, sequence: i64) {
        self(slot, sequence)
    }
}

/// Guarantees `publish` runs on every exit path out of a claim, including
/// when the translator callback panics, so the sequence protocol can
/// never wedge a consumer behind a slot that was claimed but never made
/// visible.
struct PublishGuard {
    sequencer: Arc<dyn Sequencer>,
    lo: i64,
    hi: i64,
    armed: bool,
}

impl Drop for PublishGuard {
    fn drop(&mut self) {
        if self.armed {
            self.sequencer.publish(self.lo, self.hi);
        }
    }
}

/// Where a ring's slots actually live. `Heap` is the default; `Mapped` is
/// an anonymous, locked `mmap` region for callers who want to avoid
/// first-touch page faults on the hot path (`new_mapped`, teacher's
/// `RingBuffer::new_mapped`/`mlock` pair in `kaos::disruptor::single`).
enum SlotStorage<T> {
    Heap(Box<[UnsafeCell<T>]>),
    Mapped {
        ptr: *mut UnsafeCell<T>,
        capacity: usize,
    },
}

impl<T> SlotStorage<T> {
    #[inline]
    fn get(&self, idx: usize) -> &UnsafeCell<T> {
        match self {
            SlotStorage::Heap(slots) => &slots[idx],
            SlotStorage::Mapped { ptr, capacity } => {
                debug_assert!(idx < *capacity);
                unsafe { &*ptr.add(idx) }
            }
        }
    }
}

/// Fixed-capacity slot array plus the sequencer that coordinates claiming
/// and publishing ranges of it. `T` is pre-constructed once at creation
/// and mutated in place thereafter - no per-event allocation.
pub struct RingBuffer<T> {
    sequencer: Arc<dyn Sequencer>,
    slots: SlotStorage<T>,
    mask: usize,
}

// SAFETY: access to `slots` is mediated entirely by the sequence
// protocol - a slot is written only by whichever producer claimed its
// sequence, and read only by consumers after `is_available` confirms the
// publish happened-before the read.
unsafe impl<T: Send> Sync for RingBuffer<T> {}
unsafe impl<T: Send> Send for RingBuffer<T> {}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        if let SlotStorage::Mapped { ptr, capacity } = self.slots {
            let len = capacity * std::mem::size_of::<UnsafeCell<T>>();
            unsafe {
                libc::munmap(ptr as *mut libc::c_void, len);
            }
        }
    }
}

impl<T: Default> RingBuffer<T> {
    /// Build a ring buffer from a validated configuration, heap-allocating
    /// `capacity` pre-constructed slots via `T::default()`.
    pub fn new(config: RingBufferConfig, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        let capacity = config.capacity;
        let slots: Box<[UnsafeCell<T>]> = (0..capacity)
            .map(|_| UnsafeCell::new(T::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let sequencer: Arc<dyn Sequencer> = match config.producer_kind {
            ProducerKind::Single => Arc::new(SingleProducerSequencer::new(capacity, wait_strategy)),
            ProducerKind::Multi => Arc::new(MultiProducerSequencer::new(capacity, wait_strategy)),
        };

        Ok(Self {
            sequencer,
            slots: SlotStorage::Heap(slots),
            mask: capacity - 1,
        })
    }
}

#[cfg(feature = "unsafe-perf")]
impl<T: bytemuck::Zeroable> RingBuffer<T> {
    /// Build a ring buffer backed by an anonymous, `mlock`ed mapping
    /// instead of the heap. The mapping is zero-filled by the kernel
    /// rather than per-slot constructed, so `T` must be valid as all-zero
    /// bytes (`spec.md` §4.4 allocation strategy is otherwise unchanged -
    /// this only changes where the bytes come from).
    pub fn new_mapped(config: RingBufferConfig, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        let capacity = config.capacity;
        let len = capacity
            .checked_mul(std::mem::size_of::<UnsafeCell<T>>())
            .ok_or_else(|| crate::error::RingError::config("ring buffer size overflow"))?;

        let ptr = unsafe {
            let p = libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if p == libc::MAP_FAILED {
                return Err(crate::error::RingError::config("mmap failed"));
            }
            libc::mlock(p, len);
            p as *mut UnsafeCell<T>
        };

        let sequencer: Arc<dyn Sequencer> = match config.producer_kind {
            ProducerKind::Single => Arc::new(SingleProducerSequencer::new(capacity, wait_strategy)),
            ProducerKind::Multi => Arc::new(MultiProducerSequencer::new(capacity, wait_strategy)),
        };

        Ok(Self {
            sequencer,
            slots: SlotStorage::Mapped { ptr, capacity },
            mask: capacity - 1,
        })
    }
}

impl<T> RingBuffer<T> {
    pub fn capacity(&self) -> usize {
        self.sequencer.capacity()
    }

    pub fn cursor(&self) -> i64 {
        self.sequencer.cursor()
    }

    #[inline]
    fn index(&self, sequence: i64) -> usize {
        (sequence as usize) & self.mask
    }

    /// Claim the next `n` sequences, waiting for room if necessary.
    pub fn next(&self, n: i64) -> i64 {
        self.sequencer.next(n)
    }

    /// Claim the next `n` sequences without waiting.
    pub fn try_next(&self, n: i64) -> Result<i64> {
        self.sequencer.try_next(n)
    }

    /// Make `[lo, hi]` visible to consumers.
    pub fn publish(&self, lo: i64, hi: i64) {
        self.sequencer.publish(lo, hi);
    }

    pub fn publish_one(&self, sequence: i64) {
        self.sequencer.publish(sequence, sequence);
    }

    /// The pre-allocated slot at `sequence`. Callers are trusted to only
    /// read slots confirmed available and only write slots they claimed -
    /// that contract is the whole of this crate's synchronisation model
    /// (`spec.md` §5 "Shared resources").
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub fn get(&self, sequence: i64) -> &mut T {
        let idx = self.index(sequence);
        unsafe { &mut *self.slots.get(idx).get() }
    }

    pub fn add_gating_sequence(&self, sequence: Arc<Sequence>) {
        self.sequencer.add_gating_sequence(sequence);
    }

    pub fn is_available(&self, sequence: i64) -> bool {
        self.sequencer.is_available(sequence)
    }

    pub fn get_highest_published_sequence(&self, lower: i64, available_up_to: i64) -> i64 {
        self.sequencer
            .get_highest_published_sequence(lower, available_up_to)
    }

    /// Build a barrier gated on this ring's cursor plus `dependents`
    /// (empty means "gate only on the producer cursor").
    pub fn new_barrier(
        &self,
        wait_strategy: Arc<dyn WaitStrategy>,
        dependents: Vec<Arc<Sequence>>,
    ) -> SequenceBarrier {
        SequenceBarrier::new(self.sequencer.clone(), wait_strategy, dependents)
    }

    /// The sequencer backing this ring, for callers (e.g.
    /// `ConsumerRegistry`) that need to build barriers without a `&T`
    /// borrow of the whole ring buffer.
    pub fn sequencer(&self) -> Arc<dyn Sequencer> {
        self.sequencer.clone()
    }

    /// Claim one slot, run `translator` on it, then publish - publish
    /// runs even if `translator` panics.
    pub fn publish_event<F: EventTranslator<T>>(&self, mut translator: F) -> i64 {
        let sequence = self.next(1);
        let guard = PublishGuard {
            sequencer: self.sequencer.clone(),
            lo: sequence,
            hi: sequence,
            armed: true,
        };
        translator.translate_to(self.get(sequence), sequence);
        drop(guard);
        sequence
    }

    /// Claim `count` contiguous slots, run `translator` on each in
    /// ascending sequence order, then publish the whole range as one
    /// multi-index publish (`spec.md` §4.4 "Batch publication").
    pub fn publish_events<F: EventTranslator<T>>(&self, count: i64, mut translator: F) -> (i64, i64) {
        debug_assert!(count > 0);
        let hi = self.next(count);
        let lo = hi - count + 1;
        let guard = PublishGuard {
            sequencer: self.sequencer.clone(),
            lo,
            hi,
            armed: true,
        };
        for sequence in lo..=hi {
            translator.translate_to(self.get(sequence), sequence);
        }
        drop(guard);
        (lo, hi)
    }
}
