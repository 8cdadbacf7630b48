//! Pipeline configuration
//!
//! All knobs come from environment variables with working defaults, so a
//! bare `beacon` invocation runs a standalone scheduler+worker pair against
//! the in-memory store.
//!
//! Environment variables:
//! - `BEACON_DISTRIBUTED`: route jobs through Kafka instead of the local
//!   queue (default: false)
//! - `BEACON_ENABLE_SCHEDULER`: run the dispatcher on this instance
//!   (default: true)
//! - `BEACON_ENABLE_WORKER`: run the executor on this instance
//!   (default: true)
//! - `BEACON_KAFKA_BROKERS`: comma-separated broker list
//!   (default: localhost:9092)
//! - `BEACON_KAFKA_TOPIC`: job topic (default: beacon-alert-jobs)
//! - `BEACON_KAFKA_GROUP_ID`: consumer group (default: beacon-alerts)
//! - `BEACON_JOB_QUEUE_SIZE`: local job queue capacity (default: 1000)
//! - `BEACON_RESULT_QUEUE_SIZE`: state tracker queue capacity
//!   (default: 1000)
//! - `BEACON_DEDUP_CACHE_SIZE`: dedup cache capacity (default: 100000)
//! - `BEACON_STALE_AFTER_SECS`: drop jobs older than this (default: 600)
//! - `BEACON_GRAPHITE_URL`: render endpoint base URL
//!   (default: http://localhost:8080)
//! - `BEACON_HOST` / `BEACON_PORT`: ops API bind address
//!   (default: 0.0.0.0:3300)

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "standalone mode requires a scheduler and a worker \
         (BEACON_ENABLE_SCHEDULER=true and BEACON_ENABLE_WORKER=true)"
    )]
    StandaloneNeedsBoth,

    #[error("at least one of scheduler or worker must be enabled")]
    NoRoleEnabled,

    #[error("distributed mode requires a build with the `kafka` feature")]
    KafkaNotCompiled,
}

/// Kafka transport settings for distributed mode.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Comma-separated broker addresses.
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic: "beacon-alert-jobs".to_string(),
            group_id: "beacon-alerts".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Route jobs through the partitioned broker instead of the in-process
    /// queue.
    pub distributed: bool,
    /// Run the per-second dispatcher on this instance.
    pub enable_scheduler: bool,
    /// Run the executor pool on this instance.
    pub enable_worker: bool,
    pub kafka: KafkaConfig,
    pub job_queue_size: usize,
    pub result_queue_size: usize,
    pub dedup_cache_size: u64,
    /// Jobs older than this never execute.
    pub stale_after: Duration,
    pub graphite_url: String,
    pub host: String,
    pub port: u16,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            distributed: false,
            enable_scheduler: true,
            enable_worker: true,
            kafka: KafkaConfig::default(),
            job_queue_size: 1000,
            result_queue_size: 1000,
            dedup_cache_size: 100_000,
            stale_after: Duration::from_secs(600),
            graphite_url: "http://localhost:8080".to_string(),
            host: "0.0.0.0".to_string(),
            port: 3300,
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl PipelineConfig {
    /// Build the configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            distributed: env_bool("BEACON_DISTRIBUTED", defaults.distributed),
            enable_scheduler: env_bool("BEACON_ENABLE_SCHEDULER", defaults.enable_scheduler),
            enable_worker: env_bool("BEACON_ENABLE_WORKER", defaults.enable_worker),
            kafka: KafkaConfig {
                brokers: std::env::var("BEACON_KAFKA_BROKERS")
                    .unwrap_or(defaults.kafka.brokers),
                topic: std::env::var("BEACON_KAFKA_TOPIC").unwrap_or(defaults.kafka.topic),
                group_id: std::env::var("BEACON_KAFKA_GROUP_ID")
                    .unwrap_or(defaults.kafka.group_id),
            },
            job_queue_size: env_parse("BEACON_JOB_QUEUE_SIZE", defaults.job_queue_size),
            result_queue_size: env_parse("BEACON_RESULT_QUEUE_SIZE", defaults.result_queue_size),
            dedup_cache_size: env_parse("BEACON_DEDUP_CACHE_SIZE", defaults.dedup_cache_size),
            stale_after: Duration::from_secs(env_parse(
                "BEACON_STALE_AFTER_SECS",
                defaults.stale_after.as_secs(),
            )),
            graphite_url: std::env::var("BEACON_GRAPHITE_URL").unwrap_or(defaults.graphite_url),
            host: std::env::var("BEACON_HOST").unwrap_or(defaults.host),
            port: env_parse("BEACON_PORT", defaults.port),
        }
    }

    /// Reject configurations that cannot make progress. Called once at
    /// pipeline construction; the process refuses to start on error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enable_scheduler && !self.enable_worker {
            return Err(ConfigError::NoRoleEnabled);
        }
        if !self.distributed && !(self.enable_scheduler && self.enable_worker) {
            return Err(ConfigError::StandaloneNeedsBoth);
        }
        if self.distributed && !cfg!(feature = "kafka") {
            return Err(ConfigError::KafkaNotCompiled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert!(!config.distributed);
        assert!(config.enable_scheduler);
        assert!(config.enable_worker);
        assert_eq!(config.kafka.brokers, "localhost:9092");
        assert_eq!(config.stale_after.as_secs(), 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_standalone_requires_both_roles() {
        let config = PipelineConfig {
            enable_worker: false,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::StandaloneNeedsBoth)
        ));

        let config = PipelineConfig {
            enable_scheduler: false,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::StandaloneNeedsBoth)
        ));
    }

    #[test]
    fn test_some_role_must_be_enabled() {
        let config = PipelineConfig {
            enable_scheduler: false,
            enable_worker: false,
            distributed: true,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoRoleEnabled)));
    }

    #[cfg(not(feature = "kafka"))]
    #[test]
    fn test_distributed_requires_kafka_feature() {
        let config = PipelineConfig {
            distributed: true,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::KafkaNotCompiled)
        ));
    }
}
