//! Observability - zero-cost when the `tracing` feature is disabled.
//!
//! ```toml
//! ringcore = { version = "0.1", features = ["tracing"] }
//! ```
//! ```rust,ignore
//! tracing_subscriber::fmt::init();
//! ```

/// Record a slot claim (creates a trace span when `tracing` is enabled).
#[cfg(feature = "tracing")]
#[inline]
pub fn record_claim(count: usize) {
    let _span = tracing::trace_span!("claim", count).entered();
}

#[cfg(not(feature = "tracing"))]
#[inline(always)]
pub fn record_claim(_count: usize) {}

/// Record a publish of the range `[lo, hi]`.
#[cfg(feature = "tracing")]
#[inline]
pub fn record_publish(lo: i64, hi: i64) {
    let _span = tracing::trace_span!("publish", lo, hi).entered();
}

#[cfg(not(feature = "tracing"))]
#[inline(always)]
pub fn record_publish(_lo: i64, _hi: i64) {}

/// Record the start of a consumer batch.
#[cfg(feature = "tracing")]
#[inline]
pub fn record_batch(batch_size: i64) {
    let _span = tracing::trace_span!("batch", batch_size).entered();
}

#[cfg(not(feature = "tracing"))]
#[inline(always)]
pub fn record_batch(_batch_size: i64) {}

/// Record that a wait strategy observed an alert.
#[cfg(feature = "tracing")]
#[inline]
pub fn record_alert() {
    let _span = tracing::debug_span!("alert").entered();
}

#[cfg(not(feature = "tracing"))]
#[inline(always)]
pub fn record_alert() {}

/// Record a lifecycle violation (`spec.md` §7 "programmer error") so it
/// leaves a trace even when the caller has no `ExceptionHandler` wired up
/// to observe it - this is the one error class the sequence protocol
/// itself can raise, not a handler failure.
#[cfg(feature = "tracing")]
#[inline]
pub fn record_lifecycle_violation(consumer_id: &str, error: &crate::error::RingError) {
    tracing::error!(consumer_id, %error, "lifecycle violation");
}

#[cfg(not(feature = "tracing"))]
#[inline]
pub fn record_lifecycle_violation(consumer_id: &str, error: &crate::error::RingError) {
    eprintln!("ringcore: lifecycle violation in consumer '{consumer_id}': {error}");
}
