//! Pipeline assembly
//!
//! One [`Pipeline`] object owns the queue, dedup cache, counters and
//! component tasks; it is constructed once at startup and refuses to start
//! on a configuration that cannot make progress. Shutdown closes the queue
//! and lets each stage drain: dispatcher stops enqueueing, the executor
//! finishes in-flight jobs, then the state tracker flushes its backlog.

use std::sync::atomic::AtomicI64;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{ConfigError, PipelineConfig};
use crate::dispatcher::{load_or_set_offset, refresh_offset, Dispatcher};
use crate::executor::Executor;
use crate::graphite::SeriesSource;
use crate::metrics::{MetricsSink, PipelineMetrics};
use crate::notify::NotificationDispatcher;
use crate::queue::{JobQueue, QueueError};
use crate::store::StoreAdapter;
use crate::tracker::StateTracker;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<dyn StoreAdapter>,
    source: Arc<dyn SeriesSource>,
    sink: Arc<dyn MetricsSink>,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl Pipeline {
    /// Validate the configuration and assemble the pipeline. Fatal
    /// configuration errors surface here, before anything is spawned.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn StoreAdapter>,
        source: Arc<dyn SeriesSource>,
        sink: Arc<dyn MetricsSink>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            source,
            sink,
            notifier,
        })
    }

    /// Spawn the configured components and hand back their handle.
    pub async fn start(self) -> Result<PipelineHandle, PipelineError> {
        let metrics = Arc::new(PipelineMetrics::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        let queue = Arc::new(self.build_queue(&metrics)?);

        if self.config.enable_scheduler {
            let offset = Arc::new(AtomicI64::new(load_or_set_offset(self.store.as_ref()).await));

            handles.push(tokio::spawn(refresh_offset(
                Arc::clone(&self.store),
                Arc::clone(&offset),
                shutdown_rx.clone(),
            )));

            tracing::info!("starting job dispatcher");
            let dispatcher = Dispatcher::new(
                Arc::clone(&self.store),
                Arc::clone(&queue),
                offset,
                Arc::clone(&metrics),
            );
            handles.push(tokio::spawn(dispatcher.run(shutdown_rx.clone())));
        }

        if self.config.enable_worker {
            let (result_tx, result_rx) = mpsc::channel(self.config.result_queue_size);

            let tracker = StateTracker::new(
                Arc::clone(&self.store),
                Arc::clone(&self.notifier),
                Arc::clone(&metrics),
            );
            handles.push(tokio::spawn(tracker.run(result_rx)));

            tracing::info!("starting job executor");
            let executor = Executor::new(
                Arc::clone(&self.source),
                Arc::clone(&self.sink),
                result_tx,
                Arc::clone(&metrics),
                self.config.dedup_cache_size,
                self.config.stale_after,
            );
            // jobs() can only have been taken by a previous worker; the
            // pipeline is the sole owner of this queue
            if let Some(jobs) = queue.jobs() {
                handles.push(tokio::spawn(executor.run(jobs)));
            }
        }

        Ok(PipelineHandle {
            shutdown: shutdown_tx,
            queue,
            handles,
            metrics,
        })
    }

    fn build_queue(&self, metrics: &Arc<PipelineMetrics>) -> Result<JobQueue, PipelineError> {
        if self.config.distributed {
            #[cfg(feature = "kafka")]
            {
                tracing::info!(
                    brokers = %self.config.kafka.brokers,
                    topic = %self.config.kafka.topic,
                    "using distributed job queue"
                );
                return Ok(JobQueue::distributed(
                    &self.config.kafka,
                    self.config.job_queue_size,
                    self.config.enable_worker,
                    Arc::clone(metrics),
                )?);
            }
            #[cfg(not(feature = "kafka"))]
            return Err(ConfigError::KafkaNotCompiled.into());
        }
        let _ = metrics;
        Ok(JobQueue::local(self.config.job_queue_size))
    }
}

/// Handle over a running pipeline.
pub struct PipelineHandle {
    shutdown: watch::Sender<bool>,
    queue: Arc<JobQueue>,
    handles: Vec<JoinHandle<()>>,
    metrics: Arc<PipelineMetrics>,
}

impl PipelineHandle {
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Stop intake and wait for every stage to drain.
    pub async fn shutdown(self) {
        tracing::info!("pipeline shutting down");
        let _ = self.shutdown.send(true);
        self.queue.close().await;
        for handle in self.handles {
            let _ = handle.await;
        }
        tracing::info!("pipeline stopped");
    }
}
