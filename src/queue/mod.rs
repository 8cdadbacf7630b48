//! Job queue
//!
//! Transport-agnostic bounded conduit between the dispatcher and the
//! executor pool. The local backend is a single bounded channel whose full
//! state blocks the producer (explicit backpressure); the distributed
//! backend serializes jobs and routes them through a partitioned Kafka
//! topic keyed by check id, so all jobs for one check reach whichever
//! single consumer owns that partition, in order.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::job::AlertingJob;

#[cfg(feature = "kafka")]
pub mod kafka;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("job queue is closed")]
    Closed,

    #[error("job serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[cfg(feature = "kafka")]
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

enum Backend {
    Local(mpsc::Sender<AlertingJob>),
    #[cfg(feature = "kafka")]
    Distributed {
        tx: mpsc::Sender<kafka::Message>,
        transport: kafka::KafkaPubSub,
    },
}

pub struct JobQueue {
    backend: Mutex<Option<Backend>>,
    rx: Mutex<Option<mpsc::Receiver<AlertingJob>>>,
}

impl JobQueue {
    /// In-process queue: enqueue and dequeue share one bounded channel.
    pub fn local(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            backend: Mutex::new(Some(Backend::Local(tx))),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Kafka-backed queue. Enqueued jobs are published to the topic; a
    /// background consumer feeds the local receiver. With `consume` false
    /// this instance only publishes (scheduler-only deployment).
    #[cfg(feature = "kafka")]
    pub fn distributed(
        config: &crate::config::KafkaConfig,
        capacity: usize,
        consume: bool,
        metrics: std::sync::Arc<crate::metrics::PipelineMetrics>,
    ) -> Result<Self, QueueError> {
        let (pub_tx, pub_rx) = mpsc::channel(capacity);
        let (sub_tx, sub_rx) = mpsc::channel(capacity);
        let transport = kafka::KafkaPubSub::start(config, pub_rx, sub_tx, consume, metrics)?;
        Ok(Self {
            backend: Mutex::new(Some(Backend::Distributed {
                tx: pub_tx,
                transport,
            })),
            rx: Mutex::new(Some(sub_rx)),
        })
    }

    /// Hand a job to the queue. Awaits while the queue is full; returns an
    /// error once the queue is closed or the job cannot be serialized for
    /// the wire.
    pub async fn enqueue(&self, job: AlertingJob) -> Result<(), QueueError> {
        enum Slot {
            Local(mpsc::Sender<AlertingJob>),
            #[cfg(feature = "kafka")]
            Distributed(mpsc::Sender<kafka::Message>),
        }

        let slot = {
            let backend = self.backend.lock();
            match backend.as_ref() {
                None => return Err(QueueError::Closed),
                Some(Backend::Local(tx)) => Slot::Local(tx.clone()),
                #[cfg(feature = "kafka")]
                Some(Backend::Distributed { tx, .. }) => Slot::Distributed(tx.clone()),
            }
        };

        match slot {
            Slot::Local(tx) => tx.send(job).await.map_err(|_| QueueError::Closed),
            #[cfg(feature = "kafka")]
            Slot::Distributed(tx) => {
                let message = kafka::Message {
                    key: job.routing_key(),
                    payload: serde_json::to_vec(&job)?,
                };
                tx.send(message).await.map_err(|_| QueueError::Closed)
            }
        }
    }

    /// Take the consumer end of the queue. Yields until the queue is
    /// closed and drained; can only be taken once.
    pub fn jobs(&self) -> Option<mpsc::Receiver<AlertingJob>> {
        self.rx.lock().take()
    }

    /// Stop accepting new jobs and shut the transport down. Jobs already
    /// queued remain available to the consumer.
    pub async fn close(&self) {
        let backend = self.backend.lock().take();
        match backend {
            None | Some(Backend::Local(_)) => {}
            #[cfg(feature = "kafka")]
            Some(Backend::Distributed { tx, transport }) => {
                drop(tx);
                transport.close().await;
            }
        }
    }
}
