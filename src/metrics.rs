//! Pipeline instrumentation
//!
//! Atomic counters covering every drop/skip/outcome path in the pipeline,
//! plus the sink contract for the per-execution result samples written back
//! for historical graphing. Counters are the only way failures in this core
//! become observable; there is no end-user error surface.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::check::CheckState;

/// One gauge sample recorded for an executed job.
#[derive(Debug, Clone, Serialize)]
pub struct ResultSample {
    pub org_id: i64,
    /// Fully-qualified series name, e.g. `health.my-site.http.error_state`.
    pub name: String,
    /// Org-relative metric name, e.g. `health.http.error_state`.
    pub metric: String,
    /// Seconds between samples (the check frequency).
    pub interval: i64,
    pub value: f64,
    pub unit: String,
    /// Unix second of the evaluated point, not of execution.
    pub time: i64,
    pub tags: Vec<String>,
}

/// Sink for result samples. The production sink publishes to the metrics
/// backend; the default just logs.
pub trait MetricsSink: Send + Sync {
    fn record(&self, samples: &[ResultSample]);
}

/// Sink that logs samples at debug level. Useful standalone and in tests.
#[derive(Debug, Default)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn record(&self, samples: &[ResultSample]) {
        for sample in samples {
            tracing::debug!(
                name = %sample.name,
                value = sample.value,
                time = sample.time,
                "result sample"
            );
        }
    }
}

/// Counters shared by the pipeline components.
///
/// Owned by the pipeline object and handed to each component by reference;
/// all fields use relaxed atomics and are safe for arbitrarily many
/// concurrent executor workers.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Jobs handed to the job queue by the dispatcher.
    pub jobs_scheduled: AtomicU64,
    /// Ticks abandoned because the due-check query failed.
    pub ticks_skipped: AtomicU64,
    /// Jobs published to the distributed transport.
    pub jobs_published: AtomicU64,
    /// Jobs received from the distributed transport.
    pub jobs_consumed: AtomicU64,
    /// Inbound records dropped (bad serialization).
    pub jobs_dropped: AtomicU64,
    /// Jobs dropped by the staleness gate.
    pub jobs_too_old: AtomicU64,
    /// Jobs suppressed by the dedup cache.
    pub jobs_already_done: AtomicU64,
    /// Jobs that reached the query step.
    pub jobs_executed: AtomicU64,
    pub outcomes_ok: AtomicU64,
    pub outcomes_critical: AtomicU64,
    pub outcomes_unknown: AtomicU64,
    /// Evaluations aborted on malformed data.
    pub eval_errors: AtomicU64,
    /// Render queries that failed.
    pub query_errors: AtomicU64,
    /// Successful state persistence calls (flip or heartbeat).
    pub state_updates: AtomicU64,
    /// Persisted genuine state transitions.
    pub state_changes: AtomicU64,
    /// Updates dropped after exhausting retries.
    pub update_failures: AtomicU64,
    pub notifications_sent: AtomicU64,
    pub notification_failures: AtomicU64,
}

impl PipelineMetrics {
    pub fn record_outcome(&self, state: CheckState) {
        let counter = match state {
            CheckState::Ok => &self.outcomes_ok,
            CheckState::Critical => &self.outcomes_critical,
            CheckState::Unknown => &self.outcomes_unknown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_scheduled: self.jobs_scheduled.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            jobs_published: self.jobs_published.load(Ordering::Relaxed),
            jobs_consumed: self.jobs_consumed.load(Ordering::Relaxed),
            jobs_dropped: self.jobs_dropped.load(Ordering::Relaxed),
            jobs_too_old: self.jobs_too_old.load(Ordering::Relaxed),
            jobs_already_done: self.jobs_already_done.load(Ordering::Relaxed),
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
            outcomes_ok: self.outcomes_ok.load(Ordering::Relaxed),
            outcomes_critical: self.outcomes_critical.load(Ordering::Relaxed),
            outcomes_unknown: self.outcomes_unknown.load(Ordering::Relaxed),
            eval_errors: self.eval_errors.load(Ordering::Relaxed),
            query_errors: self.query_errors.load(Ordering::Relaxed),
            state_updates: self.state_updates.load(Ordering::Relaxed),
            state_changes: self.state_changes.load(Ordering::Relaxed),
            update_failures: self.update_failures.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notification_failures: self.notification_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values, served by the ops API.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_scheduled: u64,
    pub ticks_skipped: u64,
    pub jobs_published: u64,
    pub jobs_consumed: u64,
    pub jobs_dropped: u64,
    pub jobs_too_old: u64,
    pub jobs_already_done: u64,
    pub jobs_executed: u64,
    pub outcomes_ok: u64,
    pub outcomes_critical: u64,
    pub outcomes_unknown: u64,
    pub eval_errors: u64,
    pub query_errors: u64,
    pub state_updates: u64,
    pub state_changes: u64,
    pub update_failures: u64,
    pub notifications_sent: u64,
    pub notification_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_counters() {
        let metrics = PipelineMetrics::default();
        metrics.record_outcome(CheckState::Ok);
        metrics.record_outcome(CheckState::Ok);
        metrics.record_outcome(CheckState::Critical);
        metrics.record_outcome(CheckState::Unknown);

        let snap = metrics.snapshot();
        assert_eq!(snap.outcomes_ok, 2);
        assert_eq!(snap.outcomes_critical, 1);
        assert_eq!(snap.outcomes_unknown, 1);
    }
}
