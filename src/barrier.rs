//! SequenceBarrier - the point of coordination a consumer waits on before
//! it may read a claimed range of slots (`spec.md` §4.5).

use crate::sequence::Sequence;
use crate::sequencer::Sequencer;
use crate::wait_strategy::{AlertFlag, BarrierDependency, WaitResult, WaitStrategy};
use std::sync::Arc;

/// Gates a consumer on the producer cursor plus zero-or-more upstream
/// consumer sequences it depends on. Alerting a barrier unsticks every
/// thread waiting on it, including through whatever [`WaitStrategy`] it
/// was built with.
pub struct SequenceBarrier {
    sequencer: Arc<dyn Sequencer>,
    cursor: Arc<Sequence>,
    wait_strategy: Arc<dyn WaitStrategy>,
    dependents: BarrierDependency,
    alert: Arc<AlertFlag>,
}

impl SequenceBarrier {
    pub fn new(
        sequencer: Arc<dyn Sequencer>,
        wait_strategy: Arc<dyn WaitStrategy>,
        dependents: Vec<Arc<Sequence>>,
    ) -> Self {
        let cursor = sequencer.cursor_sequence();
        Self {
            sequencer,
            cursor: cursor.clone(),
            wait_strategy,
            dependents: BarrierDependency {
                cursor,
                upstream: dependents,
            },
            alert: Arc::new(AlertFlag::new()),
        }
    }

    /// Wait until `sequence` is either reachable through the dependent
    /// chain or this barrier is alerted. On `Ready`, the returned value is
    /// the highest sequence actually safe to consume up to - which may be
    /// short of `available_up_to` when the sequencer has an unpublished
    /// gap (`spec.md` §4.3 "out-of-order commits").
    pub fn wait_for(&self, sequence: i64) -> WaitResult {
        match self
            .wait_strategy
            .wait_for(sequence, &self.cursor, &self.dependents, &self.alert)
        {
            WaitResult::Ready(available) => {
                let highest = self
                    .sequencer
                    .get_highest_published_sequence(sequence, available);
                WaitResult::Ready(highest)
            }
            other => other,
        }
    }

    /// Raise the alert flag, unblocking any thread currently parked in
    /// `wait_for` on this barrier.
    pub fn alert(&self) {
        self.alert.alert();
        crate::telemetry::record_alert();
        self.wait_strategy.signal_all_when_blocking();
    }

    pub fn clear_alert(&self) {
        self.alert.clear();
    }

    pub fn is_alerted(&self) -> bool {
        self.alert.is_alerted()
    }

    /// The producer cursor this barrier gates on (`spec.md` §4.5
    /// "getCursor").
    pub fn get_cursor(&self) -> i64 {
        self.cursor.get()
    }

    /// The underlying sequencer, for slot access (`RingBuffer::get`) once
    /// `wait_for` has reported a sequence as safe to consume.
    pub fn sequencer(&self) -> &Arc<dyn Sequencer> {
        &self.sequencer
    }
}
