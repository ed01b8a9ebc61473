use metrics_exporter_prometheus::BuildError;
use queue_consumer::ConsumerError;
use thiserror::Error;

/// Enumeration of errors that stop a soak run.
#[derive(Error, Debug)]
pub enum SoakError {
    #[error("failed to read configuration from the environment: {0}")]
    EnvConfig(#[from] envconfig::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to install the metrics recorder: {0}")]
    MetricsRecorder(#[from] BuildError),
    #[error("consumer stopped unexpectedly: {0}")]
    Consumer(#[from] ConsumerError),
}
