use std::sync::Arc;

use queue_consumer::{MemoryQueue, PostMessage, PostMessagesRequest};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::ProducerConfig;
use crate::stats::SoakStats;

pub const MESSAGES_PRODUCED: &str = "queue_soak_messages_produced";

/// Post a batch of messages every `interval`, until shutdown.
pub async fn produce(
    queue: Arc<MemoryQueue>,
    queue_id: String,
    config: ProducerConfig,
    stats: Arc<SoakStats>,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(config.interval.0);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sequence: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let messages = (0..config.batch_size)
            .map(|_| {
                sequence += 1;
                PostMessage::new(format!("soak message {sequence}"))
            })
            .collect();
        let results = queue.post_messages(PostMessagesRequest {
            queue_id: queue_id.clone(),
            messages,
        });

        let mut posted = 0;
        for result in results {
            match result.error {
                None => posted += 1,
                Some(error) => warn!(error = %error, "failed to post message"),
            }
        }

        stats.record_produced(posted);
        metrics::counter!(MESSAGES_PRODUCED).increment(posted);
    }
}
