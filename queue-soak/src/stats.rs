use std::sync::atomic::{AtomicU64, Ordering};

use queue_consumer::ConsumerError;

/// Running totals of a soak run, logged once it finishes.
#[derive(Debug, Default)]
pub struct SoakStats {
    produced: AtomicU64,
    handled: AtomicU64,
    acked: AtomicU64,
    cancelled: AtomicU64,
    fetch_errors: AtomicU64,
    renew_errors: AtomicU64,
    ack_errors: AtomicU64,
    handler_panics: AtomicU64,
}

/// A point-in-time copy of `SoakStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub produced: u64,
    pub handled: u64,
    pub acked: u64,
    pub cancelled: u64,
    pub fetch_errors: u64,
    pub renew_errors: u64,
    pub ack_errors: u64,
    pub handler_panics: u64,
}

impl SoakStats {
    pub fn record_produced(&self, count: u64) {
        self.produced.fetch_add(count, Ordering::Relaxed);
    }

    /// A handler ran to completion, and asked for an ack if `acked`.
    pub fn record_handled(&self, acked: bool) {
        self.handled.fetch_add(1, Ordering::Relaxed);
        if acked {
            self.acked.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A handler gave up on its message because its token was cancelled.
    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, error: &ConsumerError) {
        let counter = match error {
            ConsumerError::Fetch { .. } => &self.fetch_errors,
            ConsumerError::Renew { .. } => &self.renew_errors,
            ConsumerError::Ack { .. } => &self.ack_errors,
            ConsumerError::HandlerPanic { .. } => &self.handler_panics,
            ConsumerError::Cancelled => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> Summary {
        Summary {
            produced: self.produced.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            renew_errors: self.renew_errors.load(Ordering::Relaxed),
            ack_errors: self.ack_errors.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
        }
    }
}

impl Summary {
    /// One `name value` line per total.
    pub fn render(&self) -> String {
        let totals = [
            ("produced", self.produced),
            ("handled", self.handled),
            ("acked", self.acked),
            ("cancelled", self.cancelled),
            ("fetch_errors", self.fetch_errors),
            ("renew_errors", self.renew_errors),
            ("ack_errors", self.ack_errors),
            ("handler_panics", self.handler_panics),
        ];
        totals
            .iter()
            .map(|(name, value)| format!("{name} {value}\n"))
            .collect()
    }
}
