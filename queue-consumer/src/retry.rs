use std::time;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// The backoff a lease waits between failed visibility renewals.
pub struct RenewBackoff {
    /// Added to the wait for every failed attempt so far.
    step: time::Duration,
    /// The maximum possible wait between attempts. `None` lets the wait grow until the lease
    /// expires.
    maximum_interval: Option<time::Duration>,
}

impl RenewBackoff {
    pub fn new(step: time::Duration, maximum_interval: Option<time::Duration>) -> Self {
        Self {
            step,
            maximum_interval,
        }
    }

    /// Calculate how long to wait after the given number of consecutive failures.
    pub fn interval(&self, failures: u32) -> time::Duration {
        let candidate_interval = self.step.saturating_mul(failures);

        match self.maximum_interval {
            Some(max_interval) => std::cmp::min(candidate_interval, max_interval),
            None => candidate_interval,
        }
    }
}

impl Default for RenewBackoff {
    fn default() -> Self {
        Self {
            step: time::Duration::from_secs(1),
            maximum_interval: None,
        }
    }
}
