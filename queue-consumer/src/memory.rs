use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

use crate::{
    AckRequest, FetchRequest, Message, PostMessageResult, PostMessagesRequest, Queue, QueueError,
    RenewRequest,
};

/// An in-process queue with visibility timeouts, for local runs and tests.
///
/// Fetched messages stay stored but hidden until they are acknowledged or their visibility
/// runs out, at which point they are handed out again with a new receipt handle. A receipt
/// handle is only valid while its delivery is still hidden.
#[derive(Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, QueueState>>,
    // Wakes up long-polling fetches when messages are posted or become visible again.
    changed: Notify,
}

#[derive(Default)]
struct QueueState {
    // Kept in insertion order, which is also the delivery order.
    messages: VecDeque<StoredMessage>,
}

struct StoredMessage {
    id: String,
    body: Bytes,
    attempts: u32,
    delivery: Option<Delivery>,
}

struct Delivery {
    receipt_handle: String,
    hidden_until: Instant,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.delivery
            .as_ref()
            .map_or(true, |delivery| delivery.hidden_until <= now)
    }

    fn holds_receipt(&self, receipt_handle: &str, now: Instant) -> bool {
        self.delivery.as_ref().is_some_and(|delivery| {
            delivery.receipt_handle == receipt_handle && delivery.hidden_until > now
        })
    }
}

impl QueueState {
    /// Hide up to `max_count` visible messages and return them, oldest first.
    fn deliver(&mut self, request: &FetchRequest, now: Instant) -> Vec<Message> {
        let max_count = request.max_count.max(1);
        let hidden_until = now + request.visibility_timeout;

        self.messages
            .iter_mut()
            .filter(|message| message.is_visible(now))
            .take(max_count)
            .map(|message| {
                let receipt_handle = Uuid::new_v4().to_string();
                message.attempts += 1;
                message.delivery = Some(Delivery {
                    receipt_handle: receipt_handle.clone(),
                    hidden_until,
                });

                Message {
                    id: message.id.clone(),
                    receipt_handle,
                    body: message.body.clone(),
                    attempts: message.attempts,
                }
            })
            .collect()
    }

    /// When the earliest hidden message becomes visible again, if any is hidden.
    fn next_visible_at(&self, now: Instant) -> Option<Instant> {
        self.messages
            .iter()
            .filter_map(|message| message.delivery.as_ref())
            .map(|delivery| delivery.hidden_until)
            .filter(|hidden_until| *hidden_until > now)
            .min()
    }

    fn position(&self, receipt_handle: &str, now: Instant) -> Result<usize, QueueError> {
        self.messages
            .iter()
            .position(|message| message.holds_receipt(receipt_handle, now))
            .ok_or_else(|| QueueError::ReceiptHandleInvalid(receipt_handle.to_owned()))
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue messages at the back of the queue. Posting to an in-process queue can't fail,
    /// every result carries the new message's id.
    pub fn post_messages(&self, request: PostMessagesRequest) -> Vec<PostMessageResult> {
        let results: Vec<PostMessageResult> = {
            let mut queues = self.lock();
            let queue = queues.entry(request.queue_id).or_default();

            request
                .messages
                .into_iter()
                .map(|message| {
                    let id = Uuid::now_v7().to_string();
                    queue.messages.push_back(StoredMessage {
                        id: id.clone(),
                        body: message.body,
                        attempts: 0,
                        delivery: None,
                    });
                    PostMessageResult { id, error: None }
                })
                .collect()
        };

        if !results.is_empty() {
            self.changed.notify_waiters();
        }
        results
    }

    /// Number of messages stored in the queue, visible or not.
    pub fn len(&self, queue_id: &str) -> usize {
        self.lock()
            .get(queue_id)
            .map_or(0, |queue| queue.messages.len())
    }

    pub fn is_empty(&self, queue_id: &str) -> bool {
        self.len(queue_id) == 0
    }

    /// Number of messages currently hidden by a delivery.
    pub fn in_flight(&self, queue_id: &str) -> usize {
        let now = Instant::now();
        self.lock().get(queue_id).map_or(0, |queue| {
            queue
                .messages
                .iter()
                .filter(|message| !message.is_visible(now))
                .count()
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, QueueState>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn fetch(&self, request: FetchRequest) -> Result<Vec<Message>, QueueError> {
        let deadline = Instant::now() + request.wait_time;

        loop {
            // Registered before looking at the queue, so a post landing in between isn't missed.
            let changed = self.changed.notified();

            let now = Instant::now();
            let wake_at = {
                let mut queues = self.lock();
                // An unknown queue long-polls like an empty one.
                let (messages, next_visible_at) = match queues.get_mut(&request.queue_id) {
                    Some(queue) => (queue.deliver(&request, now), queue.next_visible_at(now)),
                    None => (Vec::new(), None),
                };
                if !messages.is_empty() || now >= deadline {
                    return Ok(messages);
                }

                next_visible_at.map_or(deadline, |visible_at| visible_at.min(deadline))
            };

            tokio::select! {
                _ = changed => {}
                _ = sleep_until(wake_at) => {}
            }
        }
    }

    async fn acknowledge(&self, request: AckRequest) -> Result<(), QueueError> {
        let now = Instant::now();
        let mut queues = self.lock();
        let queue = queues
            .get_mut(&request.queue_id)
            .ok_or_else(|| QueueError::ReceiptHandleInvalid(request.receipt_handle.clone()))?;

        let position = queue.position(&request.receipt_handle, now)?;
        queue.messages.remove(position);
        Ok(())
    }

    async fn renew_visibility(&self, request: RenewRequest) -> Result<(), QueueError> {
        let now = Instant::now();
        let mut queues = self.lock();
        let queue = queues
            .get_mut(&request.queue_id)
            .ok_or_else(|| QueueError::ReceiptHandleInvalid(request.receipt_handle.clone()))?;

        let position = queue.position(&request.receipt_handle, now)?;
        if let Some(delivery) = queue.messages[position].delivery.as_mut() {
            delivery.hidden_until = now + request.visibility_timeout;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;
    use crate::PostMessage;

    const QUEUE: &str = "test";

    fn post(queue: &MemoryQueue, bodies: &[&'static str]) -> Vec<String> {
        let results = queue.post_messages(PostMessagesRequest {
            queue_id: QUEUE.to_owned(),
            messages: bodies.iter().map(|body| PostMessage::new(*body)).collect(),
        });
        results
            .into_iter()
            .map(|result| {
                assert!(result.error.is_none());
                result.id
            })
            .collect()
    }

    fn fetch_request(max_count: usize, visibility_timeout: Duration) -> FetchRequest {
        FetchRequest {
            queue_id: QUEUE.to_owned(),
            max_count,
            visibility_timeout,
            wait_time: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_fetch_in_insertion_order_up_to_max_count() {
        let queue = MemoryQueue::new();
        let ids = post(&queue, &["a", "b", "c"]);

        let messages = queue
            .fetch(fetch_request(2, Duration::from_secs(30)))
            .await
            .unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, ids[0]);
        assert_eq!(messages[0].body, Bytes::from_static(b"a"));
        assert_eq!(messages[0].attempts, 1);
        assert_eq!(messages[1].id, ids[1]);
        assert_ne!(messages[0].receipt_handle, messages[1].receipt_handle);

        assert_eq!(queue.len(QUEUE), 3);
        assert_eq!(queue.in_flight(QUEUE), 2);

        let messages = queue
            .fetch(fetch_request(2, Duration::from_secs(30)))
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, ids[2]);
    }

    #[tokio::test]
    async fn test_acknowledge_deletes_message() {
        let queue = MemoryQueue::new();
        post(&queue, &["a"]);

        let message = queue
            .fetch(fetch_request(1, Duration::from_secs(30)))
            .await
            .unwrap()
            .remove(0);

        queue
            .acknowledge(AckRequest {
                queue_id: QUEUE.to_owned(),
                receipt_handle: message.receipt_handle.clone(),
            })
            .await
            .unwrap();
        assert!(queue.is_empty(QUEUE));

        let error = queue
            .acknowledge(AckRequest {
                queue_id: QUEUE.to_owned(),
                receipt_handle: message.receipt_handle,
            })
            .await
            .unwrap_err();
        assert!(matches!(error, QueueError::ReceiptHandleInvalid(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivered_after_visibility_runs_out() {
        let queue = MemoryQueue::new();
        let ids = post(&queue, &["a"]);

        let first = queue
            .fetch(fetch_request(1, Duration::from_secs(10)))
            .await
            .unwrap()
            .remove(0);

        sleep(Duration::from_secs(5)).await;
        assert!(queue
            .fetch(fetch_request(1, Duration::from_secs(10)))
            .await
            .unwrap()
            .is_empty());

        sleep(Duration::from_secs(6)).await;
        let second = queue
            .fetch(fetch_request(1, Duration::from_secs(10)))
            .await
            .unwrap()
            .remove(0);

        assert_eq!(second.id, ids[0]);
        assert_eq!(second.attempts, 2);
        assert_ne!(second.receipt_handle, first.receipt_handle);

        // The first delivery's receipt is stale now.
        let error = queue
            .acknowledge(AckRequest {
                queue_id: QUEUE.to_owned(),
                receipt_handle: first.receipt_handle,
            })
            .await
            .unwrap_err();
        assert!(matches!(error, QueueError::ReceiptHandleInvalid(_)));
        assert_eq!(queue.len(QUEUE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_visibility_extends_hidden_deadline() {
        let queue = MemoryQueue::new();
        post(&queue, &["a"]);

        let message = queue
            .fetch(fetch_request(1, Duration::from_secs(10)))
            .await
            .unwrap()
            .remove(0);

        sleep(Duration::from_secs(8)).await;
        queue
            .renew_visibility(RenewRequest {
                queue_id: QUEUE.to_owned(),
                receipt_handle: message.receipt_handle.clone(),
                visibility_timeout: Duration::from_secs(10),
            })
            .await
            .unwrap();

        // Would have been visible again at 10s without the renewal.
        sleep(Duration::from_secs(9)).await;
        assert_eq!(queue.in_flight(QUEUE), 1);
        assert!(queue
            .fetch(fetch_request(1, Duration::from_secs(10)))
            .await
            .unwrap()
            .is_empty());

        sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.in_flight(QUEUE), 0);
        let error = queue
            .renew_visibility(RenewRequest {
                queue_id: QUEUE.to_owned(),
                receipt_handle: message.receipt_handle,
                visibility_timeout: Duration::from_secs(10),
            })
            .await
            .unwrap_err();
        assert!(matches!(error, QueueError::ReceiptHandleInvalid(_)));
    }

    #[tokio::test]
    async fn test_unknown_queue_or_receipt() {
        let queue = MemoryQueue::new();

        let error = queue
            .acknowledge(AckRequest {
                queue_id: "missing".to_owned(),
                receipt_handle: "nope".to_owned(),
            })
            .await
            .unwrap_err();
        assert!(matches!(error, QueueError::ReceiptHandleInvalid(handle) if handle == "nope"));

        post(&queue, &["a"]);
        let error = queue
            .renew_visibility(RenewRequest {
                queue_id: QUEUE.to_owned(),
                receipt_handle: "nope".to_owned(),
                visibility_timeout: Duration::from_secs(10),
            })
            .await
            .unwrap_err();
        assert!(matches!(error, QueueError::ReceiptHandleInvalid(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_long_polls_until_wait_time() {
        let queue = MemoryQueue::new();
        let start = Instant::now();

        let messages = queue
            .fetch(FetchRequest {
                wait_time: Duration::from_secs(20),
                ..fetch_request(1, Duration::from_secs(30))
            })
            .await
            .unwrap();

        assert!(messages.is_empty());
        assert!(start.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_from_unknown_queue_leaves_no_state() {
        let queue = MemoryQueue::new();
        let start = Instant::now();

        let messages = queue
            .fetch(FetchRequest {
                queue_id: "unknown".to_owned(),
                wait_time: Duration::from_secs(5),
                ..fetch_request(1, Duration::from_secs(30))
            })
            .await
            .unwrap();

        assert!(messages.is_empty());
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(queue.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_wakes_long_poll() {
        let queue = Arc::new(MemoryQueue::new());
        let start = Instant::now();

        let fetch = tokio::spawn({
            let queue = queue.clone();
            async move {
                queue
                    .fetch(FetchRequest {
                        wait_time: Duration::from_secs(20),
                        ..fetch_request(1, Duration::from_secs(30))
                    })
                    .await
            }
        });

        sleep(Duration::from_secs(3)).await;
        post(&queue, &["a"]);

        let messages = fetch.await.unwrap().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(start.elapsed() < Duration::from_secs(4));
    }
}
