use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use queue_consumer::test_support::test_message;
use queue_consumer::{
    Consumer, ConsumerConfig, ConsumerError, FetchRequest, Handler, Message, QueueError,
};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub type FetchResult = Result<Vec<Message>, QueueError>;

#[allow(dead_code)]
pub fn test_config(num_workers: usize) -> ConsumerConfig {
    ConsumerConfig::new("test")
        .with_num_workers(num_workers)
        .with_visibility_timeout(Duration::from_secs(30))
        .with_wait_time(Duration::from_secs(1))
}

#[allow(dead_code)]
pub fn test_messages(count: usize) -> Vec<Message> {
    (0..count).map(test_message).collect()
}

/// A fetch that hands out the given messages, at most `max_count` at a time, and long-polls
/// once they have run out.
#[allow(dead_code)]
pub fn serve_from(
    messages: Vec<Message>,
) -> impl Fn(FetchRequest) -> BoxFuture<'static, FetchResult> + Send + Sync + 'static {
    let pool = Arc::new(Mutex::new(VecDeque::from(messages)));

    move |request: FetchRequest| {
        let pool = pool.clone();
        async move {
            let batch: Vec<Message> = {
                let mut pool = pool.lock().unwrap();
                let count = request.max_count.min(pool.len());
                pool.drain(..count).collect()
            };
            if batch.is_empty() {
                sleep(request.wait_time).await;
            }
            Ok(batch)
        }
        .boxed()
    }
}

/// An error handler that keeps everything it is given.
#[allow(dead_code)]
pub fn collect_errors() -> (
    Arc<Mutex<Vec<ConsumerError>>>,
    impl Fn(ConsumerError) + Send + Sync + 'static,
) {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    (errors, move |error| sink.lock().unwrap().push(error))
}

#[allow(dead_code)]
pub fn start<H>(
    consumer: Consumer,
    shutdown: CancellationToken,
    handler: H,
) -> JoinHandle<Result<(), ConsumerError>>
where
    H: Handler + 'static,
{
    tokio::spawn(async move { consumer.consume(shutdown, handler).await })
}

/// Poll `condition` until it holds, failing the test after a minute.
#[allow(dead_code)]
pub async fn wait_for<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let waiting = async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(60), waiting)
        .await
        .expect("condition was not met in time");
}

/// Cancel `shutdown` and wait for the consumer to stop.
#[allow(dead_code)]
pub async fn stop(
    shutdown: CancellationToken,
    consumer: JoinHandle<Result<(), ConsumerError>>,
) -> Result<(), ConsumerError> {
    shutdown.cancel();
    consumer.await.expect("consumer task panicked")
}
