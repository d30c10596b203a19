//! Ring buffer configuration.

use crate::error::{RingError, Result};

/// Which sequencer variant a `RingBuffer` is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerKind {
    /// Exactly one thread ever calls `next`/`publish` - caller contract,
    /// not enforced at runtime outside debug assertions.
    Single,
    /// Any number of threads may call `next`/`publish` concurrently.
    Multi,
}

/// Validated configuration for constructing a `RingBuffer`.
#[derive(Debug, Clone)]
pub struct RingBufferConfig {
    pub capacity: usize,
    pub producer_kind: ProducerKind,
}

impl RingBufferConfig {
    /// `capacity` must be a power of two greater than zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RingError::config("ring capacity must be greater than 0"));
        }
        if !capacity.is_power_of_two() {
            return Err(RingError::config("ring capacity must be a power of 2"));
        }
        Ok(Self {
            capacity,
            producer_kind: ProducerKind::Single,
        })
    }

    pub fn with_producer_kind(mut self, kind: ProducerKind) -> Self {
        self.producer_kind = kind;
        self
    }
}
