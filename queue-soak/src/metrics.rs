use std::sync::Arc;

use axum::{extract::State, routing::get, Router};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use queue_consumer::MemoryQueue;

use crate::stats::SoakStats;

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    // Handler latencies in a soak run sit between a few milliseconds and a few visibility
    // timeouts.
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_SECONDS)?
        .install_recorder()
}

#[derive(Clone)]
pub struct SoakState {
    pub recorder: PrometheusHandle,
    pub stats: Arc<SoakStats>,
    pub queue: Arc<MemoryQueue>,
    pub queue_id: String,
}

/// `/metrics` for Prometheus, and `/stats` with the run totals so far as plain text.
pub fn soak_router(state: SoakState) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .route("/stats", get(render_stats))
        .with_state(state)
}

async fn render_metrics(State(state): State<SoakState>) -> String {
    state.recorder.render()
}

async fn render_stats(State(state): State<SoakState>) -> String {
    let queue_id = state.queue_id.as_str();
    format!(
        "{}remaining {}\nin_flight {}\n",
        state.stats.summary().render(),
        state.queue.len(queue_id),
        state.queue.in_flight(queue_id),
    )
}
