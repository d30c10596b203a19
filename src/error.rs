//! Error types for ringcore.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RingError>;

/// Errors the sequence-coordination engine can raise.
///
/// Cooperative cancellation (alert) and timed-out waits are *not*
/// represented here — they are returned as [`crate::wait_strategy::WaitResult`]
/// variants on the hot wait path instead of allocated error objects.
#[derive(Error, Debug)]
pub enum RingError {
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("insufficient capacity to claim {requested} slot(s)")]
    InsufficientCapacity { requested: usize },

    #[error("lifecycle violation: {message}")]
    LifecycleViolation { message: String },

    #[error("handler failed at sequence {sequence}: {message}")]
    HandlerFailure { sequence: i64, message: String },
}

impl RingError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn capacity(requested: usize) -> Self {
        Self::InsufficientCapacity { requested }
    }

    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::LifecycleViolation {
            message: message.into(),
        }
    }

    pub fn handler_failure(sequence: i64, message: impl Into<String>) -> Self {
        Self::HandlerFailure {
            sequence,
            message: message.into(),
        }
    }

    /// Recover a readable message out of a caught panic payload for use in
    /// [`RingError::handler_failure`] - panics are this crate's stand-in for
    /// an arbitrary handler exception (`spec.md` §7 "Handler failure").
    pub fn describe_panic(payload: &(dyn std::any::Any + Send)) -> String {
        if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked with a non-string payload".to_string()
        }
    }
}
