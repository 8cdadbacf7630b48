//! Alerting jobs
//!
//! An [`AlertingJob`] is a point-in-time evaluation request. `last_point_ts`
//! is the timestamp of the last data point the evaluation must cover, so a
//! delayed pipeline still evaluates the correct window irrespective of when
//! the job actually runs; `generated_at` is tracked for staleness checks.
//! Jobs are immutable once enqueued except for the verdict fields the
//! executor fills in, and are discarded after the state tracker consumes
//! them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::check::{CheckDescriptor, CheckState, RESULT_SLOTS};
use crate::metrics::ResultSample;

fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertingJob {
    pub check: CheckDescriptor,
    /// Wall-clock time the dispatcher created this job.
    pub generated_at: DateTime<Utc>,
    /// Unix second of the last closed data point to evaluate against.
    pub last_point_ts: i64,
    /// Verdict computed by the executor. Meaningless until executed.
    #[serde(default)]
    pub new_state: CheckState,
    /// When the evaluation ran. Meaningless until executed.
    #[serde(default = "unix_epoch")]
    pub time_exec: DateTime<Utc>,
}

impl AlertingJob {
    pub fn new(check: CheckDescriptor, generated_at: DateTime<Utc>, last_point_ts: i64) -> Self {
        Self {
            check,
            generated_at,
            last_point_ts,
            new_state: CheckState::Unknown,
            time_exec: unix_epoch(),
        }
    }

    /// Identifies one logically unique evaluation regardless of how many
    /// times it was enqueued.
    pub fn dedup_key(&self) -> (i64, i64) {
        (self.check.id, self.last_point_ts)
    }

    /// Routing key for partitioned transports: all jobs for one check land
    /// on the same partition, in publish order.
    pub fn routing_key(&self) -> String {
        self.check.id.to_string()
    }

    /// Series target covering the error-state gauges of every probe
    /// reporting for this check.
    pub fn query_target(&self) -> String {
        format!(
            "beacon.{}.*.{}.error_state",
            self.check.slug, self.check.check_type
        )
    }

    /// Three mutually-exclusive gauges (ok/warn/error) recorded for every
    /// execution, for historical graphing. The slot matching the verdict
    /// reads 1.0; an unknown verdict leaves all three at 0.
    pub fn result_samples(&self) -> Vec<ResultSample> {
        let check_type = self.check.check_type.as_str();
        let lit = self.new_state.metric_slot();
        RESULT_SLOTS
            .iter()
            .enumerate()
            .map(|(slot, name)| ResultSample {
                org_id: self.check.org_id,
                name: format!("health.{}.{}.{}", self.check.slug, check_type, name),
                metric: format!("health.{}.{}", check_type, name),
                interval: self.check.frequency,
                value: if lit == Some(slot) { 1.0 } else { 0.0 },
                unit: "state".to_string(),
                time: self.last_point_ts,
                tags: vec![
                    format!("endpoint_id:{}", self.check.endpoint_id),
                    format!("monitor_id:{}", self.check.id),
                ],
            })
            .collect()
    }
}

impl std::fmt::Display for AlertingJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<Job> check_id={} generated_at={} last_point_ts={}",
            self.check.id, self.generated_at, self.last_point_ts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckType, HealthSettings};

    fn test_check(id: i64) -> CheckDescriptor {
        CheckDescriptor {
            id,
            org_id: 1,
            endpoint_id: 7,
            slug: "test_endpoint".to_string(),
            name: "Test Endpoint".to_string(),
            check_type: CheckType::Http,
            frequency: 10,
            offset: 0,
            enabled: true,
            health_settings: Some(HealthSettings {
                num_probes: 1,
                steps: 3,
                notifications: Default::default(),
            }),
            settings: serde_json::Value::Null,
            state: CheckState::Unknown,
            state_check: 0,
            state_change: 0,
        }
    }

    #[test]
    fn test_dedup_key() {
        let job = AlertingJob::new(test_check(42), Utc::now(), 1000);
        assert_eq!(job.dedup_key(), (42, 1000));
        assert_eq!(job.routing_key(), "42");
    }

    #[test]
    fn test_query_target() {
        let job = AlertingJob::new(test_check(1), Utc::now(), 1000);
        assert_eq!(job.query_target(), "beacon.test_endpoint.*.http.error_state");
    }

    #[test]
    fn test_result_samples_mark_verdict_slot() {
        let mut job = AlertingJob::new(test_check(1), Utc::now(), 990);
        job.new_state = CheckState::Critical;

        let samples = job.result_samples();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].value, 0.0);
        assert_eq!(samples[1].value, 0.0);
        assert_eq!(samples[2].value, 1.0);
        assert_eq!(samples[2].name, "health.test_endpoint.http.error_state");
        assert_eq!(samples[2].time, 990);
    }

    #[test]
    fn test_result_samples_unknown_sets_nothing() {
        let job = AlertingJob::new(test_check(1), Utc::now(), 990);
        assert!(job.result_samples().iter().all(|s| s.value == 0.0));
    }
}
