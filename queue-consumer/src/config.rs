use std::time::Duration;

use crate::RenewBackoff;

pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(20);

/// Share of the visibility timeout after which an unrenewed lease cancels its message.
pub const EXPIRY_FRACTION: f64 = 0.9;
/// Share of the visibility timeout after which a lease tries to renew itself.
pub const RENEW_FRACTION: f64 = 0.5;

pub const ACK_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const RENEW_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Fetches long-poll for `wait_time`, so their timeout is `max(this, wait_time + 1s)`.
pub const MIN_FETCH_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// When a lease renews itself and when it gives up, as fractions of the visibility timeout.
/// Renewal must come before expiry for leases to survive long-running handlers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeasePolicy {
    pub expiry_fraction: f64,
    pub renew_fraction: f64,
}

impl LeasePolicy {
    pub fn expiry_after(&self, visibility_timeout: Duration) -> Duration {
        scale(visibility_timeout, self.expiry_fraction)
    }

    pub fn renew_after(&self, visibility_timeout: Duration) -> Duration {
        scale(visibility_timeout, self.renew_fraction)
    }
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            expiry_fraction: EXPIRY_FRACTION,
            renew_fraction: RENEW_FRACTION,
        }
    }
}

fn scale(duration: Duration, fraction: f64) -> Duration {
    Duration::try_from_secs_f64(duration.as_secs_f64() * fraction).unwrap_or(Duration::ZERO)
}

/// Settings of a `Consumer`. They are read once when consumption starts.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// The queue messages are fetched from.
    pub queue_id: String,
    /// Number of concurrent workers, and the size of every fetch.
    pub num_workers: usize,
    /// Visibility timeout requested on fetch and on every renewal. Zero disables renewal.
    pub visibility_timeout: Duration,
    /// How long a fetch may long-poll an empty queue.
    pub wait_time: Duration,
    pub lease_policy: LeasePolicy,
    pub renew_backoff: RenewBackoff,
}

impl ConsumerConfig {
    pub fn new(queue_id: &str) -> Self {
        Self {
            queue_id: queue_id.to_owned(),
            num_workers: default_num_workers(),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            wait_time: DEFAULT_WAIT_TIME,
            lease_policy: LeasePolicy::default(),
            renew_backoff: RenewBackoff::default(),
        }
    }

    /// Use the provided number of workers. At least one worker always runs.
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_lease_policy(mut self, lease_policy: LeasePolicy) -> Self {
        self.lease_policy = lease_policy;
        self
    }

    pub fn with_renew_backoff(mut self, renew_backoff: RenewBackoff) -> Self {
        self.renew_backoff = renew_backoff;
        self
    }

    /// Timeout of a single fetch. Long enough that an intentional long-poll isn't mistaken
    /// for a stalled request.
    pub fn fetch_request_timeout(&self) -> Duration {
        std::cmp::max(
            MIN_FETCH_REQUEST_TIMEOUT,
            self.wait_time.saturating_add(Duration::from_secs(1)),
        )
    }
}

fn default_num_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConsumerConfig::new("default");

        assert_eq!(config.queue_id, "default");
        assert!(config.num_workers >= 1);
        assert_eq!(config.visibility_timeout, Duration::from_secs(30));
        assert_eq!(config.wait_time, Duration::from_secs(20));
        assert_eq!(config.lease_policy, LeasePolicy::default());
        assert_eq!(config.renew_backoff, RenewBackoff::default());
    }

    #[test]
    fn test_num_workers_is_at_least_one() {
        let config = ConsumerConfig::new("default").with_num_workers(0);
        assert_eq!(config.num_workers, 1);
    }

    #[test]
    fn test_fetch_request_timeout_covers_long_poll() {
        let config = ConsumerConfig::new("default");
        assert_eq!(config.fetch_request_timeout(), Duration::from_secs(30));

        let config = config.with_wait_time(Duration::from_secs(45));
        assert_eq!(config.fetch_request_timeout(), Duration::from_secs(46));

        let config = config.with_wait_time(Duration::ZERO);
        assert_eq!(config.fetch_request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_lease_policy_fractions() {
        let policy = LeasePolicy::default();
        let visibility_timeout = Duration::from_secs(30);

        let expiry = policy.expiry_after(visibility_timeout);
        let renew = policy.renew_after(visibility_timeout);

        assert!(close_to(expiry, Duration::from_secs(27)));
        assert!(close_to(renew, Duration::from_secs(15)));
    }

    fn close_to(actual: Duration, expected: Duration) -> bool {
        let diff = if actual > expected {
            actual - expected
        } else {
            expected - actual
        };
        diff < Duration::from_millis(1)
    }

    #[test]
    fn test_lease_policy_clamps_negative_fractions() {
        let policy = LeasePolicy {
            expiry_fraction: -1.0,
            renew_fraction: 0.5,
        };

        assert_eq!(policy.expiry_after(Duration::from_secs(30)), Duration::ZERO);
    }
}
