//! Beacon alerting server
//!
//! Run with: cargo run
//!
//! The pipeline configuration comes from the environment; see
//! [`beacon::config`] for the full list of variables. `RUST_LOG` controls
//! log filtering (default: info).
//!
//! A bare invocation runs a standalone scheduler+worker pair against the
//! in-memory store; point `BEACON_GRAPHITE_URL` at the render endpoint
//! probes report into, and set `BEACON_DISTRIBUTED=true` (with a `kafka`
//! build) to fan work out across instances.

use std::sync::Arc;

use beacon::api::run_ops_server;
use beacon::config::PipelineConfig;
use beacon::graphite::GraphiteClient;
use beacon::metrics::LogSink;
use beacon::notify::{LogDispatcher, NotificationDispatcher, WebhookDispatcher};
use beacon::pipeline::Pipeline;
use beacon::store::MemStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PipelineConfig::from_env();

    tracing::info!("Beacon configuration:");
    tracing::info!("  Mode: {}", if config.distributed { "distributed" } else { "standalone" });
    tracing::info!("  Scheduler: {}", config.enable_scheduler);
    tracing::info!("  Worker: {}", config.enable_worker);
    tracing::info!("  Graphite: {}", config.graphite_url);
    tracing::info!("  Ops API: {}:{}", config.host, config.port);
    if config.distributed {
        tracing::info!("  Kafka brokers: {}", config.kafka.brokers);
        tracing::info!("  Kafka topic: {}", config.kafka.topic);
    }

    let store = Arc::new(MemStore::new());
    let source = Arc::new(GraphiteClient::new(config.graphite_url.clone()));
    let notifier: Arc<dyn NotificationDispatcher> =
        if std::env::var("BEACON_WEBHOOK_NOTIFICATIONS").is_ok() {
            Arc::new(WebhookDispatcher::new())
        } else {
            Arc::new(LogDispatcher)
        };

    let pipeline = Pipeline::new(config.clone(), store, source, Arc::new(LogSink), notifier)?;
    let handle = pipeline.start().await?;

    let ops = tokio::spawn(run_ops_server(
        config.host.clone(),
        config.port,
        handle.metrics(),
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("received ctrl-c, shutting down");

    ops.abort();
    handle.shutdown().await;
    Ok(())
}
