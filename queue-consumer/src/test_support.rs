//! Scriptable `Queue` for tests. Not part of the stable API.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::time::{sleep, Instant};

use crate::{AckRequest, FetchRequest, Message, Queue, QueueError, RenewRequest};

type FetchFn =
    Box<dyn Fn(FetchRequest) -> BoxFuture<'static, Result<Vec<Message>, QueueError>> + Send + Sync>;
type AckFn = Box<dyn Fn(AckRequest) -> BoxFuture<'static, Result<(), QueueError>> + Send + Sync>;
type RenewFn =
    Box<dyn Fn(RenewRequest) -> BoxFuture<'static, Result<(), QueueError>> + Send + Sync>;

/// A request the mock received, and when.
#[derive(Debug, Clone)]
pub struct Recorded<T> {
    pub at: Instant,
    pub request: T,
}

/// A `Queue` whose operations are provided as closures. Every request is recorded before the
/// closure runs.
///
/// Unless overridden, a fetch long-polls for its `wait_time` and returns nothing, while
/// acknowledgements and renewals succeed immediately.
pub struct MockQueue {
    fetch: FetchFn,
    ack: AckFn,
    renew: RenewFn,
    fetches: Mutex<Vec<Recorded<FetchRequest>>>,
    acks: Mutex<Vec<Recorded<AckRequest>>>,
    renewals: Mutex<Vec<Recorded<RenewRequest>>>,
}

impl MockQueue {
    pub fn new() -> Self {
        Self {
            fetch: Box::new(|request: FetchRequest| {
                async move {
                    sleep(request.wait_time).await;
                    Ok(Vec::new())
                }
                .boxed()
            }),
            ack: Box::new(|_| async { Ok(()) }.boxed()),
            renew: Box::new(|_| async { Ok(()) }.boxed()),
            fetches: Mutex::new(Vec::new()),
            acks: Mutex::new(Vec::new()),
            renewals: Mutex::new(Vec::new()),
        }
    }

    pub fn on_fetch<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(FetchRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Message>, QueueError>> + Send + 'static,
    {
        self.fetch = Box::new(move |request| f(request).boxed());
        self
    }

    pub fn on_ack<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AckRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), QueueError>> + Send + 'static,
    {
        self.ack = Box::new(move |request| f(request).boxed());
        self
    }

    pub fn on_renew<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(RenewRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), QueueError>> + Send + 'static,
    {
        self.renew = Box::new(move |request| f(request).boxed());
        self
    }

    pub fn fetches(&self) -> Vec<Recorded<FetchRequest>> {
        lock(&self.fetches).clone()
    }

    pub fn acks(&self) -> Vec<Recorded<AckRequest>> {
        lock(&self.acks).clone()
    }

    pub fn renewals(&self) -> Vec<Recorded<RenewRequest>> {
        lock(&self.renewals).clone()
    }
}

impl Default for MockQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Queue for MockQueue {
    async fn fetch(&self, request: FetchRequest) -> Result<Vec<Message>, QueueError> {
        record(&self.fetches, &request);
        (self.fetch)(request).await
    }

    async fn acknowledge(&self, request: AckRequest) -> Result<(), QueueError> {
        record(&self.acks, &request);
        (self.ack)(request).await
    }

    async fn renew_visibility(&self, request: RenewRequest) -> Result<(), QueueError> {
        record(&self.renewals, &request);
        (self.renew)(request).await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn record<T: Clone>(log: &Mutex<Vec<Recorded<T>>>, request: &T) {
    lock(log).push(Recorded {
        at: Instant::now(),
        request: request.clone(),
    });
}

/// A message as a backend would deliver it the first time: id `msg-{n}`, receipt handle
/// `receipt-{n}`.
pub fn test_message(n: usize) -> Message {
    Message {
        id: format!("msg-{n}"),
        receipt_handle: format!("receipt-{n}"),
        body: Bytes::from(format!("body-{n}")),
        attempts: 1,
    }
}
