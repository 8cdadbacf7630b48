//! Beacon: distributed endpoint-health alerting pipeline
//!
//! Evaluates the health of monitored endpoints from time-series results
//! produced by independent, geographically distributed probes, turning
//! streaks of failing data points into OK/CRITICAL/UNKNOWN health states
//! and triggering notifications on state transitions.
//!
//! # Architecture
//!
//! - **Dispatcher**: ticks once per second, selects due checks and turns
//!   them into alerting jobs
//! - **Job queue**: bounded in-process channel, or a partitioned Kafka
//!   topic for horizontally scaled deployments (`kafka` feature)
//! - **Executor**: suppresses stale and duplicate jobs, queries each
//!   check's evaluation window and evaluates failing streaks
//! - **State tracker**: persists debounced state transitions with bounded
//!   retries and hands real flips to the notification dispatcher
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use beacon::config::PipelineConfig;
//! use beacon::graphite::GraphiteClient;
//! use beacon::metrics::LogSink;
//! use beacon::notify::LogDispatcher;
//! use beacon::pipeline::Pipeline;
//! use beacon::store::MemStore;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::from_env();
//! let pipeline = Pipeline::new(
//!     config.clone(),
//!     Arc::new(MemStore::new()),
//!     Arc::new(GraphiteClient::new(config.graphite_url.clone())),
//!     Arc::new(LogSink),
//!     Arc::new(LogDispatcher),
//! )?;
//! let handle = pipeline.start().await?;
//! // ... run until shutdown ...
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod check;
pub mod config;
pub mod dispatcher;
pub mod evaluator;
pub mod executor;
pub mod graphite;
pub mod job;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod queue;
pub mod store;
pub mod tracker;

// Re-export commonly used types
pub use check::{CheckDescriptor, CheckState, CheckType, HealthSettings};
pub use config::PipelineConfig;
pub use job::AlertingJob;
pub use pipeline::{Pipeline, PipelineHandle};
