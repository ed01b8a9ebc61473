use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{AckRequest, FetchRequest, HandleResult, Message, QueueError, RenewRequest};

/// The consumer's view of a queue backend: fetch messages, acknowledge them, and push back
/// their visibility deadline. Implementations must be safe to call concurrently, the poller
/// and every worker share one instance.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Fetch up to `max_count` messages. May block for up to `wait_time` when the queue is empty.
    async fn fetch(&self, request: FetchRequest) -> Result<Vec<Message>, QueueError>;

    async fn acknowledge(&self, request: AckRequest) -> Result<(), QueueError>;

    async fn renew_visibility(&self, request: RenewRequest) -> Result<(), QueueError>;
}

#[async_trait]
impl<T: Queue + ?Sized> Queue for Arc<T> {
    async fn fetch(&self, request: FetchRequest) -> Result<Vec<Message>, QueueError> {
        (**self).fetch(request).await
    }

    async fn acknowledge(&self, request: AckRequest) -> Result<(), QueueError> {
        (**self).acknowledge(request).await
    }

    async fn renew_visibility(&self, request: RenewRequest) -> Result<(), QueueError> {
        (**self).renew_visibility(request).await
    }
}

/// Invoked by a `Consumer` for each message it pulls from the queue.
///
/// The token is cancelled when the message's lease expires or the consumer shuts down.
/// Handlers should stop working on the message promptly once that happens, as the queue may
/// already be handing it to somebody else.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, token: CancellationToken, message: Message) -> HandleResult;
}

/// Implements `Handler` for a plain async function or closure.
pub struct HandlerFn<F>(pub F);

pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(CancellationToken, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandleResult> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(CancellationToken, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandleResult> + Send + 'static,
{
    async fn handle(&self, token: CancellationToken, message: Message) -> HandleResult {
        (self.0)(token, message).await
    }
}
