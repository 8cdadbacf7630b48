//! Kafka transport for distributed job delivery
//!
//! Delivery semantics: at-least-once into and out of the broker, with
//! duplicates handled by the executor's dedup cache rather than here.
//! Publishes wait for broker confirmation (`acks=all`) and unconfirmed
//! sends are retried instead of dropped; the consumer commits offsets
//! manually, only after a record has been handed to the local decode pool,
//! so records in flight during a connection loss are redelivered.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message as KafkaMessage;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;

use super::QueueError;
use crate::config::KafkaConfig;
use crate::job::AlertingJob;
use crate::metrics::PipelineMetrics;

/// A serialized job with its partition routing key.
#[derive(Debug, Clone)]
pub struct Message {
    pub key: String,
    pub payload: Vec<u8>,
}

/// Retry pacing for publishes and broker probes. A pure value type so
/// policies are testable without timers.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay before the next attempt; doubles up to the cap.
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(10))
    }
}

/// Inbound records decoded concurrently. Bounds the work a burst of
/// deliveries can create while keeping one bad record from blocking the
/// rest.
const DECODE_POOL_SIZE: usize = 32;

pub struct KafkaPubSub {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl KafkaPubSub {
    /// Connect and spawn the publish/consume loops. With `consume` false
    /// only the publisher runs.
    pub fn start(
        config: &KafkaConfig,
        pub_rx: mpsc::Receiver<Message>,
        sub_tx: mpsc::Sender<AlertingJob>,
        consume: bool,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, QueueError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("acks", "all")
            .set("compression.type", "snappy")
            .set("message.timeout.ms", "10000")
            .create()?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        handles.push(tokio::spawn(publish_loop(
            producer,
            config.topic.clone(),
            pub_rx,
            shutdown_rx.clone(),
            Arc::clone(&metrics),
        )));

        if consume {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &config.brokers)
                .set("group.id", &config.group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", "latest")
                .set("session.timeout.ms", "30000")
                .set("fetch.min.bytes", "1024")
                .set("fetch.max.wait.ms", "100")
                .create()?;
            consumer.subscribe(&[config.topic.as_str()])?;
            handles.push(tokio::spawn(consume_loop(
                consumer,
                sub_tx,
                shutdown_rx,
                metrics,
            )));
        }

        Ok(Self { shutdown, handles })
    }

    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Block until broker metadata confirms the topic exists. Returns false if
/// shutdown arrives first.
async fn ensure_topic(
    producer: &FutureProducer,
    topic: &str,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let mut backoff = Backoff::default();
    loop {
        // the metadata fetch blocks its worker thread briefly
        match producer
            .client()
            .fetch_metadata(Some(topic), Duration::from_secs(5))
        {
            Ok(metadata)
                if metadata
                    .topics()
                    .iter()
                    .any(|t| t.name() == topic && t.error().is_none()) =>
            {
                tracing::info!(topic, "kafka topic ready");
                return true;
            }
            Ok(_) => tracing::warn!(topic, "kafka topic not available yet"),
            Err(e) => tracing::warn!(error = %e, "kafka metadata fetch failed"),
        }
        tokio::select! {
            _ = tokio::time::sleep(backoff.next()) => {}
            _ = shutdown.changed() => return false,
        }
    }
}

async fn publish_loop(
    producer: FutureProducer,
    topic: String,
    mut pub_rx: mpsc::Receiver<Message>,
    mut shutdown: watch::Receiver<bool>,
    metrics: Arc<PipelineMetrics>,
) {
    if !ensure_topic(&producer, &topic, &mut shutdown).await {
        return;
    }
    loop {
        tokio::select! {
            maybe_message = pub_rx.recv() => match maybe_message {
                Some(message) => {
                    publish_confirmed(&producer, &topic, &message, &mut shutdown, &metrics).await;
                }
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    let _ = producer.flush(Duration::from_secs(5));
    tracing::info!("kafka publisher stopped");
}

/// Publish one record, retrying until the broker confirms it. A job is
/// only abandoned when shutdown interrupts the retry loop.
async fn publish_confirmed(
    producer: &FutureProducer,
    topic: &str,
    message: &Message,
    shutdown: &mut watch::Receiver<bool>,
    metrics: &PipelineMetrics,
) {
    let mut backoff = Backoff::default();
    loop {
        let record = FutureRecord::to(topic)
            .key(&message.key)
            .payload(&message.payload);
        match producer.send(record, Duration::from_secs(5)).await {
            Ok((partition, offset)) => {
                tracing::debug!(partition, offset, key = %message.key, "job published");
                metrics.jobs_published.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err((e, _)) => {
                tracing::error!(error = %e, key = %message.key, "failed to publish job, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(backoff.next()) => {}
                    _ = shutdown.changed() => {
                        tracing::warn!(key = %message.key, "dropping unconfirmed job at shutdown");
                        return;
                    }
                }
            }
        }
    }
}

async fn consume_loop(
    consumer: StreamConsumer,
    sub_tx: mpsc::Sender<AlertingJob>,
    mut shutdown: watch::Receiver<bool>,
    metrics: Arc<PipelineMetrics>,
) {
    let decode_pool = Arc::new(Semaphore::new(DECODE_POOL_SIZE));
    let mut backoff = Backoff::default();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = consumer.recv() => match result {
                Ok(message) => {
                    backoff.reset();
                    if let Some(payload) = message.payload() {
                        let payload = payload.to_vec();
                        let Ok(permit) = Arc::clone(&decode_pool).acquire_owned().await else {
                            break;
                        };
                        let tx = sub_tx.clone();
                        let metrics = Arc::clone(&metrics);
                        // one supervised task per record: a record that fails
                        // to decode is dropped without blocking the rest
                        tokio::spawn(async move {
                            let _permit = permit;
                            match serde_json::from_slice::<AlertingJob>(&payload) {
                                Ok(job) => {
                                    if tx.send(job).await.is_ok() {
                                        metrics.jobs_consumed.fetch_add(1, Ordering::Relaxed);
                                    }
                                }
                                Err(e) => {
                                    metrics.jobs_dropped.fetch_add(1, Ordering::Relaxed);
                                    tracing::error!(error = %e, "dropping undecodable job record");
                                }
                            }
                        });
                    }
                    if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                        tracing::error!(error = %e, "failed to commit offset");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "kafka receive error");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff.next()) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }
    }
    tracing::info!("kafka consumer stopped");
}
