use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ACK_REQUEST_TIMEOUT;
use crate::metrics_consts::{
    CONSUMER_ERRORS, FETCH_BATCH_SIZE, HANDLER_DURATION, HANDLER_PANICS, MESSAGES_ACKED,
    MESSAGES_FETCHED, WORKER_SATURATION,
};
use crate::{
    AckRequest, ConsumerConfig, ConsumerError, FetchRequest, HandleResult, Handler, Lease,
    Message, Queue, QueueError,
};

/// Callback invoked with every error the consumer runs into while talking to the queue.
pub type ErrHandler = Arc<dyn Fn(ConsumerError) + Send + Sync>;

/// Concurrently consumes messages from a queue, keeping each message's visibility lease alive
/// while a `Handler` processes it.
pub struct Consumer {
    queue: Arc<dyn Queue>,
    config: ConsumerConfig,
    err_handler: Option<ErrHandler>,
}

/// Everything a running consumer shares between its poller, workers and leases. Built once
/// per call to `consume`, so settings can't change underneath in-flight messages.
pub(crate) struct ConsumerContext {
    pub(crate) queue: Arc<dyn Queue>,
    pub(crate) config: ConsumerConfig,
    err_handler: Option<ErrHandler>,
}

impl ConsumerContext {
    pub(crate) fn new(
        queue: Arc<dyn Queue>,
        config: ConsumerConfig,
        err_handler: Option<ErrHandler>,
    ) -> Self {
        Self {
            queue,
            config,
            err_handler,
        }
    }

    /// Route an error to the error handler. Without one, the error is only logged and counted.
    pub(crate) fn handle_error(&self, error: ConsumerError) {
        metrics::counter!(CONSUMER_ERRORS, "kind" => error.kind()).increment(1);
        debug!(queue_id = %self.config.queue_id, error = %error, "consumer error");

        if let Some(err_handler) = &self.err_handler {
            err_handler(error);
        }
    }
}

/// A leased message on its way to a worker. The permit is held until the worker is done with
/// the message, which is what bounds the number of messages in flight.
struct Dispatch {
    lease: Lease,
    permit: OwnedSemaphorePermit,
}

impl Consumer {
    pub fn new(config: ConsumerConfig, queue: impl Queue + 'static) -> Self {
        Self {
            queue: Arc::new(queue),
            config,
            err_handler: None,
        }
    }

    /// Use the provided callback for errors that occur when interacting with the queue.
    pub fn with_err_handler<F>(mut self, err_handler: F) -> Self
    where
        F: Fn(ConsumerError) + Send + Sync + 'static,
    {
        self.err_handler = Some(Arc::new(err_handler));
        self
    }

    /// The settings the next call to `consume` will run with.
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Poll the queue and invoke the handler with each message, until `shutdown` is
    /// cancelled. Returns `ConsumerError::Cancelled` once polling has stopped and every
    /// worker has finished the message it was working on.
    pub async fn consume<H>(
        &self,
        shutdown: CancellationToken,
        handler: H,
    ) -> Result<(), ConsumerError>
    where
        H: Handler + 'static,
    {
        // A number of worker tasks share a single receiver. The poller hands each lease over
        // only after acquiring one of `num_workers` permits, so it can never get ahead of the
        // workers. Once polling stops the sender is dropped, which lets the workers drain and
        // exit.
        let context = Arc::new(ConsumerContext::new(
            self.queue.clone(),
            self.config.clone(),
            self.err_handler.clone(),
        ));
        let num_workers = context.config.num_workers;
        let handler = Arc::new(handler);

        info!(
            queue_id = %context.config.queue_id,
            num_workers,
            "starting consumer"
        );

        let (tx, rx) = mpsc::channel::<Dispatch>(num_workers);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for _ in 0..num_workers {
            workers.spawn(run_worker(context.clone(), handler.clone(), rx.clone()));
        }

        let poller = Poller {
            context: context.clone(),
            shutdown,
            permits: Arc::new(Semaphore::new(num_workers)),
            tx,
        };
        poller.run().await;

        while let Some(result) = workers.join_next().await {
            if let Err(error) = result {
                error!(error = %error, "consumer worker exited abnormally");
            }
        }

        info!(queue_id = %context.config.queue_id, "consumer stopped");

        Err(ConsumerError::Cancelled)
    }
}

struct Poller {
    context: Arc<ConsumerContext>,
    shutdown: CancellationToken,
    permits: Arc<Semaphore>,
    tx: mpsc::Sender<Dispatch>,
}

impl Poller {
    /// Keep polling messages from the queue until shutdown. Consumes the poller, so the
    /// dispatch channel closes when this returns.
    async fn run(self) {
        while !self.shutdown.is_cancelled() {
            if let Err(error) = self.poll_messages().await {
                self.context.handle_error(error);
                // Polling carries on straight away, just give other tasks a turn first.
                tokio::task::yield_now().await;
            }
        }
    }

    /// Fetch one batch of messages and hand them to the workers.
    async fn poll_messages(&self) -> Result<(), ConsumerError> {
        let Some(result) = self.fetch_messages().await else {
            return Ok(());
        };
        let messages = result.map_err(|error| ConsumerError::Fetch {
            queue_id: self.context.config.queue_id.clone(),
            error,
        })?;

        metrics::histogram!(FETCH_BATCH_SIZE).record(messages.len() as f64);
        if messages.is_empty() {
            tokio::task::yield_now().await;
            return Ok(());
        }
        metrics::counter!(MESSAGES_FETCHED).increment(messages.len() as u64);

        // Every message is leased, and its timers armed, as soon as it leaves the queue. The
        // visibility timeout started ticking on the backend's side already, whether or not a
        // worker is free yet.
        let leases: Vec<Lease> = messages
            .into_iter()
            .map(|message| {
                let lease = Lease::new(self.context.clone(), message, &self.shutdown);
                lease.arm();
                lease
            })
            .collect();

        for lease in leases {
            self.dispatch(lease).await;
        }

        Ok(())
    }

    /// Fetch a batch from the queue, or `None` if shutdown interrupted the request.
    async fn fetch_messages(&self) -> Option<Result<Vec<Message>, QueueError>> {
        let config = &self.context.config;
        // Fetch as many messages as there are workers to process them.
        let request = FetchRequest {
            queue_id: config.queue_id.clone(),
            max_count: config.num_workers,
            visibility_timeout: config.visibility_timeout,
            wait_time: config.wait_time,
        };
        let request_timeout = config.fetch_request_timeout();

        tokio::select! {
            _ = self.shutdown.cancelled() => None,
            result = timeout(request_timeout, self.context.queue.fetch(request)) => {
                Some(result.unwrap_or_else(|_| Err(QueueError::Timeout {
                    operation: "fetch",
                    timeout: request_timeout,
                })))
            }
        }
    }

    /// Hand a lease to the next free worker. If shutdown starts first, the lease is cleaned up
    /// here instead, as no worker will ever see it.
    async fn dispatch(&self, lease: Lease) {
        self.report_saturation();

        let permit = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            permit = self.permits.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            lease.cleanup();
            return;
        };

        let dispatch = Dispatch { lease, permit };
        if let Err(mpsc::error::SendError(dispatch)) = self.tx.send(dispatch).await {
            dispatch.lease.cleanup();
        }
    }

    fn report_saturation(&self) {
        let num_workers = self.context.config.num_workers;
        metrics::gauge!(WORKER_SATURATION)
            .set(1f64 - self.permits.available_permits() as f64 / num_workers as f64);
    }
}

/// Process leases from the shared receiver until the poller closes the channel.
async fn run_worker<H>(
    context: Arc<ConsumerContext>,
    handler: Arc<H>,
    rx: Arc<Mutex<mpsc::Receiver<Dispatch>>>,
) where
    H: Handler + ?Sized,
{
    loop {
        let next = rx.lock().await.recv().await;
        let Some(Dispatch { lease, permit }) = next else {
            return;
        };
        consume_message(&context, handler.as_ref(), lease).await;
        drop(permit);
    }
}

/// Invoke the handler with the leased message, acknowledging it with the queue if the
/// handler asked for it.
async fn consume_message<H>(context: &ConsumerContext, handler: &H, lease: Lease)
where
    H: Handler + ?Sized,
{
    let result = handle_message(context, handler, &lease).await;
    // Renewals stop before the ack goes out; the message no longer needs to stay hidden.
    lease.cleanup();

    if !result.should_ack() {
        return;
    }

    let message = lease.message();
    match ack_message(context, &message.receipt_handle).await {
        Ok(()) => metrics::counter!(MESSAGES_ACKED).increment(1),
        Err(error) => context.handle_error(ConsumerError::Ack {
            message_id: message.id.clone(),
            error,
        }),
    }
}

async fn handle_message<H>(context: &ConsumerContext, handler: &H, lease: &Lease) -> HandleResult
where
    H: Handler + ?Sized,
{
    let start = Instant::now();
    let handling = handler.handle(lease.token().clone(), lease.message().clone());
    let outcome = AssertUnwindSafe(handling).catch_unwind().await;
    metrics::histogram!(HANDLER_DURATION).record(start.elapsed().as_secs_f64());

    match outcome {
        Ok(result) => result,
        Err(_) => {
            let message_id = lease.message().id.clone();
            error!(message_id = %message_id, "handler panicked, message will not be acknowledged");
            metrics::counter!(HANDLER_PANICS).increment(1);
            context.handle_error(ConsumerError::HandlerPanic { message_id });
            HandleResult::new()
        }
    }
}

async fn ack_message(context: &ConsumerContext, receipt_handle: &str) -> Result<(), QueueError> {
    let request = AckRequest {
        queue_id: context.config.queue_id.clone(),
        receipt_handle: receipt_handle.to_owned(),
    };

    timeout(ACK_REQUEST_TIMEOUT, context.queue.acknowledge(request))
        .await
        .unwrap_or_else(|_| {
            Err(QueueError::Timeout {
                operation: "acknowledge",
                timeout: ACK_REQUEST_TIMEOUT,
            })
        })
}
