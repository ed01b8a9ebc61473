//! Run a `Consumer` against an in-process queue under steady load, and report what happened.
use std::sync::Arc;

use envconfig::Envconfig;
use queue_consumer::{Consumer, ConsumerError, MemoryQueue};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::Config;
use crate::error::SoakError;
use crate::handler::SimulatedHandler;
use crate::metrics::{serve, setup_metrics_recorder, soak_router, SoakState};
use crate::producer::produce;
use crate::stats::SoakStats;

mod config;
mod error;
mod handler;
mod metrics;
mod producer;
mod stats;

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_layer = tracing_subscriber::fmt::layer().with_filter(filter);
    tracing_subscriber::registry().with(log_layer).init();
}

/// Cancels the returned token on ctrl-c, or once `run_duration` has passed if it is set.
fn shutdown_signal(config: &Config) -> CancellationToken {
    let shutdown = CancellationToken::new();
    let run_duration = config.run_duration.map(|duration| duration.0);

    let token = shutdown.clone();
    tokio::spawn(async move {
        let deadline = async {
            match run_duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("received ctrl-c, shutting down"),
                Err(error) => error!(error = %error, "failed to listen for ctrl-c, shutting down"),
            },
            _ = deadline => info!("run duration elapsed, shutting down"),
        }
        token.cancel();
    });

    shutdown
}

#[tokio::main]
async fn main() -> Result<(), SoakError> {
    setup_tracing();

    let config = Config::init_from_env()?;
    config.validate()?;

    let recorder = setup_metrics_recorder()?;
    let queue = Arc::new(MemoryQueue::new());
    let stats = Arc::new(SoakStats::default());

    let router = soak_router(SoakState {
        recorder,
        stats: stats.clone(),
        queue: queue.clone(),
        queue_id: config.queue_id.as_str().to_owned(),
    });
    let bind = config.bind();
    tokio::task::spawn(async move {
        if let Err(error) = serve(router, &bind).await {
            error!(error = %error, bind = %bind, "failed to serve metrics");
        }
    });

    let shutdown = shutdown_signal(&config);
    let consumer = Consumer::new(config.consumer_config(), queue.clone()).with_err_handler({
        let stats = stats.clone();
        move |error| stats.record_error(&error)
    });
    let handler = SimulatedHandler::new(&config.handler, stats.clone());

    let consumer_config = consumer.config();
    info!(
        queue_id = %consumer_config.queue_id,
        num_workers = consumer_config.num_workers,
        visibility_timeout = ?consumer_config.visibility_timeout,
        wait_time = ?consumer_config.wait_time,
        "starting soak run"
    );

    let producer = tokio::spawn(produce(
        queue.clone(),
        consumer_config.queue_id.clone(),
        config.producer.clone(),
        stats.clone(),
        shutdown.clone(),
    ));

    match consumer.consume(shutdown, handler).await {
        Ok(()) | Err(ConsumerError::Cancelled) => {}
        Err(error) => return Err(error.into()),
    }

    if let Err(error) = producer.await {
        error!(error = %error, "producer exited abnormally");
    }

    let queue_id = config.queue_id.as_str();
    let summary = stats.summary();
    info!(
        produced = summary.produced,
        handled = summary.handled,
        acked = summary.acked,
        cancelled = summary.cancelled,
        fetch_errors = summary.fetch_errors,
        renew_errors = summary.renew_errors,
        ack_errors = summary.ack_errors,
        handler_panics = summary.handler_panics,
        remaining = queue.len(queue_id),
        in_flight = queue.in_flight(queue_id),
        "soak run finished"
    );

    Ok(())
}
