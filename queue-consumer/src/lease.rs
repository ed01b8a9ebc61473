use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::AbortHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RENEW_REQUEST_TIMEOUT;
use crate::consumer::ConsumerContext;
use crate::metrics_consts::{LEASES_EXPIRED, LEASES_IN_FLIGHT, RENEWALS};
use crate::{ConsumerError, Message, QueueError, RenewRequest};

/// A fetched message together with the token of its lifetime.
///
/// A lease is created by the poller as soon as its message is fetched and travels with the
/// message to a worker. While it is alive, two timers run in the background: a renewal timer
/// that extends the message's visibility with the queue, and an expiry timer that cancels the
/// lease's token if the visibility could not be extended in time. The token is also cancelled
/// when the consumer shuts down. Whoever owns the lease last must call
/// [`cleanup`](Lease::cleanup); dropping the lease does it as well.
pub struct Lease {
    inner: Arc<LeaseInner>,
}

struct LeaseInner {
    message: Message,
    token: CancellationToken,
    context: Arc<ConsumerContext>,
    released: AtomicBool,
    // Sync mutex, never held across an await point. Guards against a successful renewal
    // re-arming while a cleanup disarms.
    timers: Mutex<Timers>,
}

#[derive(Default)]
struct Timers {
    expiry: Option<AbortHandle>,
    renew: Option<AbortHandle>,
}

impl Timers {
    fn disarm(&mut self) {
        if let Some(expiry) = self.expiry.take() {
            expiry.abort();
        }
        if let Some(renew) = self.renew.take() {
            renew.abort();
        }
    }
}

impl Lease {
    /// Wrap a freshly fetched message. The lease's token is a child of `shutdown`.
    pub(crate) fn new(
        context: Arc<ConsumerContext>,
        message: Message,
        shutdown: &CancellationToken,
    ) -> Self {
        metrics::gauge!(LEASES_IN_FLIGHT).increment(1.0);

        Self {
            inner: Arc::new(LeaseInner {
                message,
                token: shutdown.child_token(),
                context,
                released: AtomicBool::new(false),
                timers: Mutex::new(Timers::default()),
            }),
        }
    }

    pub fn message(&self) -> &Message {
        &self.inner.message
    }

    /// Cancelled once the lease has expired, been cleaned up, or the consumer is shutting down.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// (Re)start the expiry and renewal timers, replacing any that are armed.
    pub(crate) fn arm(&self) {
        self.inner.arm();
    }

    /// Cancel the lease's token and stop both timers. Safe to call more than once.
    pub fn cleanup(&self) {
        self.inner.token.cancel();
        self.inner.timers().disarm();

        if !self.inner.released.swap(true, Ordering::SeqCst) {
            metrics::gauge!(LEASES_IN_FLIGHT).decrement(1.0);
        }
    }

    #[cfg(test)]
    fn is_armed(&self) -> bool {
        let timers = self.inner.timers();
        timers.expiry.is_some() || timers.renew.is_some()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl LeaseInner {
    fn timers(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(self: &Arc<Self>) {
        let visibility_timeout = self.context.config.visibility_timeout;
        if visibility_timeout.is_zero() {
            return;
        }

        let mut timers = self.timers();
        if self.token.is_cancelled() {
            return;
        }

        // Never leave a previous pair running.
        timers.disarm();

        let policy = self.context.config.lease_policy;

        let expiry_after = policy.expiry_after(visibility_timeout);
        let lease = Arc::clone(self);
        let expiry = tokio::spawn(async move {
            tokio::select! {
                _ = lease.token.cancelled() => {}
                _ = sleep(expiry_after) => lease.expire(),
            }
        });
        timers.expiry = Some(expiry.abort_handle());

        let renew_after = policy.renew_after(visibility_timeout);
        let lease = Arc::clone(self);
        let renew = tokio::spawn(async move {
            tokio::select! {
                _ = lease.token.cancelled() => {}
                _ = sleep(renew_after) => lease.renew().await,
            }
        });
        timers.renew = Some(renew.abort_handle());
    }

    fn expire(&self) {
        if self.token.is_cancelled() {
            return;
        }

        warn!(
            queue_id = %self.context.config.queue_id,
            message_id = %self.message.id,
            "visibility of message was not renewed in time, cancelling it"
        );
        metrics::counter!(LEASES_EXPIRED).increment(1);
        self.token.cancel();
    }

    /// Renew the message's visibility, backing off and retrying on errors until it succeeds
    /// or the lease is cancelled. Success re-arms both timers.
    async fn renew(self: &Arc<Self>) {
        // This timer has fired: it must not be aborted by the re-arm below.
        self.timers().renew = None;

        if self.token.is_cancelled() {
            return;
        }

        let mut failures: u32 = 0;
        loop {
            let request = RenewRequest {
                queue_id: self.context.config.queue_id.clone(),
                receipt_handle: self.message.receipt_handle.clone(),
                visibility_timeout: self.context.config.visibility_timeout,
            };

            let result = tokio::select! {
                _ = self.token.cancelled() => return,
                result = timeout(
                    RENEW_REQUEST_TIMEOUT,
                    self.context.queue.renew_visibility(request),
                ) => result,
            };

            let error = match result {
                Ok(Ok(())) => {
                    metrics::counter!(RENEWALS, "outcome" => "success").increment(1);
                    self.arm();
                    return;
                }
                Ok(Err(error)) => error,
                Err(_) => QueueError::Timeout {
                    operation: "renew_visibility",
                    timeout: RENEW_REQUEST_TIMEOUT,
                },
            };

            metrics::counter!(RENEWALS, "outcome" => "failure").increment(1);
            self.context.handle_error(ConsumerError::Renew {
                message_id: self.message.id.clone(),
                error,
            });

            failures = failures.saturating_add(1);
            let backoff = self.context.config.renew_backoff.interval(failures);
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = sleep(backoff) => {}
            }
        }
    }
}
