//! Job executor
//!
//! Consumes alerting jobs, suppresses stale and duplicate deliveries,
//! queries the evaluation window, evaluates, and forwards verdicts to the
//! state tracker. One task per inbound job, tracked so a queue shutdown
//! drains in-flight work before the pipeline reports stopped.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use moka::sync::Cache;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::check::CheckState;
use crate::evaluator::{evaluate, EvalError};
use crate::graphite::{RenderRequest, SeriesSource};
use crate::job::AlertingJob;
use crate::metrics::{MetricsSink, PipelineMetrics};

/// Bounded recency cache over dedup keys.
///
/// Suppresses duplicate deliveries from the at-least-once transport and
/// from operator re-publishes. Memory-bounded with LRU-style eviction, so
/// it only guarantees suppression while an entry is resident; end-to-end
/// idempotence rests on the state tracker's conditional write.
pub struct DedupCache {
    cache: Cache<(i64, i64), ()>,
}

impl DedupCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(capacity).build(),
        }
    }

    /// Atomically record the key. Returns true when it was already
    /// present.
    pub fn seen(&self, key: (i64, i64)) -> bool {
        !self.cache.entry(key).or_insert(()).is_fresh()
    }
}

pub struct Executor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    source: Arc<dyn SeriesSource>,
    sink: Arc<dyn MetricsSink>,
    results: mpsc::Sender<AlertingJob>,
    cache: DedupCache,
    metrics: Arc<PipelineMetrics>,
    stale_after: chrono::Duration,
}

impl Executor {
    pub fn new(
        source: Arc<dyn SeriesSource>,
        sink: Arc<dyn MetricsSink>,
        results: mpsc::Sender<AlertingJob>,
        metrics: Arc<PipelineMetrics>,
        cache_capacity: u64,
        stale_after: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                source,
                sink,
                results,
                cache: DedupCache::new(cache_capacity),
                metrics,
                stale_after: chrono::Duration::from_std(stale_after)
                    .unwrap_or_else(|_| chrono::Duration::seconds(600)),
            }),
        }
    }

    /// Consume jobs until the queue closes, then drain in-flight work.
    pub async fn run(self, mut jobs: mpsc::Receiver<AlertingJob>) {
        let mut tasks = JoinSet::new();
        tracing::info!("executor started");

        loop {
            tokio::select! {
                maybe_job = jobs.recv() => match maybe_job {
                    Some(job) => {
                        let inner = Arc::clone(&self.inner);
                        tasks.spawn(async move { execute(inner, job).await });
                    }
                    None => break,
                },
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}
        tracing::info!("executor stopped");
    }
}

async fn execute(inner: Arc<ExecutorInner>, mut job: AlertingJob) {
    let now = Utc::now();

    // a backlog storm after an outage must not produce a wave of outdated
    // verdicts
    if now.signed_duration_since(job.generated_at) > inner.stale_after {
        inner.metrics.jobs_too_old.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(job = %job, "dropping stale job");
        return;
    }

    if inner.cache.seen(job.dedup_key()) {
        inner.metrics.jobs_already_done.fetch_add(1, Ordering::Relaxed);
        return;
    }
    inner.metrics.jobs_executed.fetch_add(1, Ordering::Relaxed);

    let Some(settings) = job.check.health_settings.clone() else {
        tracing::error!(job = %job, "job without health settings reached executor");
        return;
    };

    let request = RenderRequest {
        targets: vec![job.query_target()],
        from: job.last_point_ts - job.check.frequency * settings.steps as i64,
        until: job.last_point_ts,
        org_id: job.check.org_id,
    };

    let series = match inner.source.query(&request).await {
        Ok(series) => series,
        Err(e) => {
            // the next scheduled tick retries naturally
            inner.metrics.query_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(job = %job, error = %e, "render query failed");
            return;
        }
    };

    let time_exec = Utc::now();
    let new_state = match evaluate(&series, &settings) {
        Ok(state) => state,
        Err(EvalError::NoData) => {
            tracing::debug!(job = %job, "no data for evaluation window");
            CheckState::Unknown
        }
        Err(e) => {
            inner.metrics.eval_errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(job = %job, error = %e, "evaluation failed");
            return;
        }
    };

    inner.metrics.record_outcome(new_state);
    job.new_state = new_state;
    job.time_exec = time_exec;

    let samples = job.result_samples();

    // write a real transition when the verdict differs; otherwise refresh
    // the last-checked heartbeat at half the check's frequency
    let heartbeat_due =
        time_exec.timestamp() - job.check.state_check > 2 * job.check.frequency;
    if new_state != job.check.state || heartbeat_due {
        if inner.results.send(job).await.is_err() {
            tracing::warn!("state tracker queue closed, dropping verdict");
        }
    }

    inner.sink.record(&samples);
}
