use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use queue_consumer::{ConsumerConfig, RenewBackoff};

use crate::error::SoakError;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(default = "soak")]
    pub queue_id: NonEmptyString,

    #[envconfig(default = "16")]
    pub num_workers: usize,

    #[envconfig(default = "30000")]
    pub visibility_timeout: EnvMsDuration,

    #[envconfig(default = "1000")]
    pub wait_time: EnvMsDuration,

    #[envconfig(nested = true)]
    pub renew_backoff: RenewBackoffConfig,

    #[envconfig(nested = true)]
    pub producer: ProducerConfig,

    #[envconfig(nested = true)]
    pub handler: HandlerConfig,

    /// Stop by ourselves after this long. Runs until interrupted when unset.
    pub run_duration: Option<EnvMsDuration>,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::new(self.queue_id.as_str())
            .with_num_workers(self.num_workers)
            .with_visibility_timeout(self.visibility_timeout.0)
            .with_wait_time(self.wait_time.0)
            .with_renew_backoff(RenewBackoff::new(
                self.renew_backoff.step.0,
                self.renew_backoff.maximum_interval.map(|interval| interval.0),
            ))
    }

    /// Reject settings that parse fine but make no sense together.
    pub fn validate(&self) -> Result<(), SoakError> {
        if !(0.0..=1.0).contains(&self.handler.ack_ratio) {
            return Err(SoakError::InvalidConfig(format!(
                "HANDLER_ACK_RATIO must be between 0 and 1, got {}",
                self.handler.ack_ratio
            )));
        }
        if self.handler.min_latency.0 > self.handler.max_latency.0 {
            return Err(SoakError::InvalidConfig(
                "HANDLER_MIN_LATENCY must not exceed HANDLER_MAX_LATENCY".to_owned(),
            ));
        }
        if self.producer.interval.0.is_zero() {
            return Err(SoakError::InvalidConfig(
                "PRODUCER_INTERVAL must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }
}

#[derive(Envconfig, Clone)]
pub struct RenewBackoffConfig {
    #[envconfig(from = "RENEW_BACKOFF_STEP", default = "1000")]
    pub step: EnvMsDuration,

    #[envconfig(from = "RENEW_BACKOFF_MAXIMUM_INTERVAL")]
    pub maximum_interval: Option<EnvMsDuration>,
}

#[derive(Envconfig, Clone)]
pub struct ProducerConfig {
    #[envconfig(from = "PRODUCER_INTERVAL", default = "100")]
    pub interval: EnvMsDuration,

    #[envconfig(from = "PRODUCER_BATCH_SIZE", default = "10")]
    pub batch_size: usize,
}

#[derive(Envconfig, Clone)]
pub struct HandlerConfig {
    #[envconfig(from = "HANDLER_MIN_LATENCY", default = "10")]
    pub min_latency: EnvMsDuration,

    #[envconfig(from = "HANDLER_MAX_LATENCY", default = "1000")]
    pub max_latency: EnvMsDuration,

    /// Share of handled messages that get acknowledged. The rest come back after their
    /// visibility timeout.
    #[envconfig(from = "HANDLER_ACK_RATIO", default = "0.95")]
    pub ack_ratio: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, envconfig::Error> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::init_from_hashmap(&vars)
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        config.validate().unwrap();

        assert_eq!(config.bind(), "0.0.0.0:3302");
        assert_eq!(config.run_duration.map(|d| d.0), None);

        let consumer_config = config.consumer_config();
        assert_eq!(consumer_config.queue_id, "soak");
        assert_eq!(consumer_config.num_workers, 16);
        assert_eq!(consumer_config.visibility_timeout, time::Duration::from_secs(30));
        assert_eq!(consumer_config.wait_time, time::Duration::from_secs(1));
        assert_eq!(consumer_config.renew_backoff, RenewBackoff::default());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("QUEUE_ID", "jobs"),
            ("NUM_WORKERS", "0"),
            ("VISIBILITY_TIMEOUT", "0"),
            ("RENEW_BACKOFF_MAXIMUM_INTERVAL", "5000"),
            ("RUN_DURATION", "60000"),
        ])
        .unwrap();

        let consumer_config = config.consumer_config();
        assert_eq!(consumer_config.queue_id, "jobs");
        assert_eq!(consumer_config.num_workers, 1);
        assert!(consumer_config.visibility_timeout.is_zero());
        assert_eq!(
            consumer_config.renew_backoff.interval(10),
            time::Duration::from_secs(5)
        );
        assert_eq!(
            config.run_duration.map(|d| d.0),
            Some(time::Duration::from_secs(60))
        );
    }

    #[test]
    fn test_rejects_empty_queue_id() {
        assert!(config_from(&[("QUEUE_ID", "")]).is_err());
    }

    #[test]
    fn test_validate() {
        let config = config_from(&[("HANDLER_ACK_RATIO", "1.5")]).unwrap();
        assert!(config.validate().is_err());

        let config = config_from(&[
            ("HANDLER_MIN_LATENCY", "500"),
            ("HANDLER_MAX_LATENCY", "100"),
        ])
        .unwrap();
        assert!(config.validate().is_err());

        let config = config_from(&[("PRODUCER_INTERVAL", "0")]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_ms_duration() {
        assert_eq!(
            "250".parse::<EnvMsDuration>().unwrap().0,
            time::Duration::from_millis(250)
        );
        assert_eq!(
            "soon".parse::<EnvMsDuration>().unwrap_err(),
            ParseEnvMsDurationError
        );
    }
}
