use std::time::Duration;

use thiserror::Error;

/// Enumeration of errors a queue backend can return for a single request.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("{operation} request timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("receipt handle {0} is not valid for any in-flight message")]
    ReceiptHandleInvalid(String),
    #[error("queue backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl QueueError {
    /// Wrap any backend specific error.
    pub fn backend(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        QueueError::Backend(error.into())
    }
}

/// Enumeration of errors the consumer reports through its error handler. None of them are
/// fatal: polling, renewal and handling all carry on. Only `Cancelled` is returned from
/// `Consumer::consume`.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("failed to fetch messages from queue {queue_id}: {error}")]
    Fetch { queue_id: String, error: QueueError },
    #[error("failed to renew visibility of message {message_id}: {error}")]
    Renew {
        message_id: String,
        error: QueueError,
    },
    #[error("failed to acknowledge message {message_id}: {error}")]
    Ack {
        message_id: String,
        error: QueueError,
    },
    #[error("handler panicked while processing message {message_id}")]
    HandlerPanic { message_id: String },
    #[error("consumer was cancelled")]
    Cancelled,
}

impl ConsumerError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ConsumerError::Fetch { .. } => "fetch",
            ConsumerError::Renew { .. } => "renew",
            ConsumerError::Ack { .. } => "ack",
            ConsumerError::HandlerPanic { .. } => "handler_panic",
            ConsumerError::Cancelled => "cancelled",
        }
    }
}
