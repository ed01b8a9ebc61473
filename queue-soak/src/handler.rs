use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use queue_consumer::{HandleResult, Handler, Message};
use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::HandlerConfig;
use crate::stats::SoakStats;

/// Pretends to work on each message for a random while, then acks a share of them.
pub struct SimulatedHandler {
    min_latency: Duration,
    max_latency: Duration,
    ack_ratio: f64,
    stats: Arc<SoakStats>,
}

impl SimulatedHandler {
    /// Expects a validated `HandlerConfig`: `min_latency <= max_latency` and an `ack_ratio`
    /// within `0.0..=1.0`.
    pub fn new(config: &HandlerConfig, stats: Arc<SoakStats>) -> Self {
        Self {
            min_latency: config.min_latency.0,
            max_latency: config.max_latency.0,
            ack_ratio: config.ack_ratio,
            stats,
        }
    }

    fn latency(&self) -> Duration {
        rand::thread_rng().gen_range(self.min_latency..=self.max_latency)
    }

    fn should_ack(&self) -> bool {
        rand::thread_rng().gen_bool(self.ack_ratio)
    }
}

#[async_trait]
impl Handler for SimulatedHandler {
    async fn handle(&self, token: CancellationToken, message: Message) -> HandleResult {
        let latency = self.latency();

        tokio::select! {
            _ = token.cancelled() => {
                debug!(message_id = %message.id, "handling cancelled");
                self.stats.record_cancelled();
                HandleResult::new()
            }
            _ = sleep(latency) => {
                let ack = self.should_ack();
                self.stats.record_handled(ack);
                HandleResult::new().ack_message(ack)
            }
        }
    }
}
