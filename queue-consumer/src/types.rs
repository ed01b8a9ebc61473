use std::time::Duration;

use bytes::Bytes;

use crate::QueueError;

/// A single message received from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The message's identifier inside the queue.
    pub id: String,
    /// Opaque token used to acknowledge the message or renew its visibility. Backends may
    /// hand out a new one on every delivery.
    pub receipt_handle: String,
    /// Raw bytes of the message.
    pub body: Bytes,
    /// Total number of deliveries of this message, including this one. Zero means the
    /// backend doesn't report it.
    pub attempts: u32,
}

/// Parameters for fetching a batch of messages. Only `queue_id` is required by every backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub queue_id: String,
    pub max_count: usize,
    pub visibility_timeout: Duration,
    pub wait_time: Duration,
}

/// Parameters for acknowledging a message. Both fields are required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRequest {
    pub queue_id: String,
    pub receipt_handle: String,
}

/// Parameters for pushing back the visibility deadline of an in-flight message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewRequest {
    pub queue_id: String,
    pub receipt_handle: String,
    pub visibility_timeout: Duration,
}

/// A single message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostMessage {
    pub body: Bytes,
}

impl PostMessage {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self { body: body.into() }
    }
}

/// Parameters for publishing messages to a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostMessagesRequest {
    pub queue_id: String,
    pub messages: Vec<PostMessage>,
}

/// Outcome of publishing a single message. If `error` is set the message was not sent and
/// `id` is empty.
#[derive(Debug)]
pub struct PostMessageResult {
    pub id: String,
    pub error: Option<QueueError>,
}

/// What a handler decided about a message. The default takes no action, so the message
/// becomes visible again once its lease runs out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HandleResult {
    should_ack: bool,
}

impl HandleResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for `HandleResult::new().ack_message(true)`.
    pub fn ack() -> Self {
        Self::new().ack_message(true)
    }

    /// Set whether the consumer should acknowledge the message with the queue.
    pub fn ack_message(mut self, ack: bool) -> Self {
        self.should_ack = ack;
        self
    }

    pub fn should_ack(&self) -> bool {
        self.should_ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_result_defaults_to_no_ack() {
        assert!(!HandleResult::default().should_ack());
        assert!(!HandleResult::new().should_ack());
        assert!(HandleResult::ack().should_ack());
        assert!(!HandleResult::ack().ack_message(false).should_ack());
    }
}
