//! State tracker
//!
//! Single persistence pipeline for executed jobs, decoupled from the
//! executor by a bounded queue so slow database writes never block
//! evaluation. Persistence is attempted a bounded number of times; a
//! genuine state flip hands the job to the notification dispatcher on a
//! detached task so a slow outbound path cannot delay subsequent state
//! writes.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::job::AlertingJob;
use crate::metrics::PipelineMetrics;
use crate::notify::{NotificationDispatcher, StateChange};
use crate::store::StoreAdapter;

const MAX_UPDATE_ATTEMPTS: usize = 3;

pub struct StateTracker {
    store: Arc<dyn StoreAdapter>,
    notifier: Arc<dyn NotificationDispatcher>,
    metrics: Arc<PipelineMetrics>,
}

impl StateTracker {
    pub fn new(
        store: Arc<dyn StoreAdapter>,
        notifier: Arc<dyn NotificationDispatcher>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            store,
            notifier,
            metrics,
        }
    }

    /// Consume executed jobs until the executor side closes.
    pub async fn run(self, mut results: mpsc::Receiver<AlertingJob>) {
        tracing::info!("state tracker started");
        while let Some(job) = results.recv().await {
            self.process(job).await;
        }
        tracing::info!("state tracker stopped");
    }

    async fn process(&self, job: AlertingJob) {
        let mut changed = None;
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            match self.store.update_check_state(&job).await {
                Ok(flipped) => {
                    changed = Some(flipped);
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        job = %job,
                        attempt,
                        error = %e,
                        "check state update failed"
                    );
                }
            }
        }

        let Some(changed) = changed else {
            // the next half-frequency heartbeat retries the write naturally
            self.metrics.update_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(job = %job, "dropping state update after {} attempts", MAX_UPDATE_ATTEMPTS);
            return;
        };
        self.metrics.state_updates.fetch_add(1, Ordering::Relaxed);

        if !changed {
            return;
        }
        self.metrics.state_changes.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            check_id = job.check.id,
            org_id = job.check.org_id,
            endpoint_slug = %job.check.slug,
            state = %job.new_state,
            "state change"
        );

        let Some(health) = &job.check.health_settings else {
            return;
        };
        if !health.notifications.enabled {
            return;
        }
        let recipients = health.notifications.recipients();
        if recipients.is_empty() {
            tracing::debug!(
                check_id = job.check.id,
                org_id = job.check.org_id,
                "no notification addresses provided"
            );
            return;
        }

        let change = StateChange::from_job(&job, recipients);
        let notifier = Arc::clone(&self.notifier);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            match notifier.notify(&change).await {
                Ok(()) => {
                    metrics.notifications_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    metrics.notification_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        check_id = change.check_id,
                        org_id = change.org_id,
                        error = %e,
                        "failed to dispatch state change notification"
                    );
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckDescriptor, CheckState, CheckType, HealthSettings, NotificationSettings};
    use crate::notify::NotifyError;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    struct CountingStore {
        calls: AtomicUsize,
        fail_first: usize,
        flip: bool,
    }

    impl CountingStore {
        fn new(fail_first: usize, flip: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first,
                flip,
            }
        }
    }

    #[async_trait]
    impl StoreAdapter for CountingStore {
        async fn checks_due_at(
            &self,
            _tick: i64,
        ) -> Result<Vec<CheckDescriptor>, StoreError> {
            Ok(vec![])
        }

        async fn update_check_state(&self, _job: &AlertingJob) -> Result<bool, StoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(StoreError::Backend("deadlock".to_string()))
            } else {
                Ok(self.flip)
            }
        }

        async fn get_scheduler_offset(&self) -> Result<Option<i64>, StoreError> {
            Ok(None)
        }

        async fn set_scheduler_offset(&self, _offset: i64) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        changes: Mutex<Vec<StateChange>>,
    }

    #[async_trait]
    impl NotificationDispatcher for RecordingNotifier {
        async fn notify(&self, change: &StateChange) -> Result<(), NotifyError> {
            self.changes.lock().push(change.clone());
            Ok(())
        }
    }

    fn job(notify: bool) -> AlertingJob {
        let check = CheckDescriptor {
            id: 1,
            org_id: 1,
            endpoint_id: 1,
            slug: "test".to_string(),
            name: "Test".to_string(),
            check_type: CheckType::Http,
            frequency: 10,
            offset: 0,
            enabled: true,
            health_settings: Some(HealthSettings {
                num_probes: 1,
                steps: 3,
                notifications: NotificationSettings {
                    enabled: notify,
                    addresses: "ops@example.com".to_string(),
                },
            }),
            settings: serde_json::Value::Null,
            state: CheckState::Ok,
            state_check: 0,
            state_change: 0,
        };
        let mut job = AlertingJob::new(check, Utc::now(), 1000);
        job.new_state = CheckState::Critical;
        job.time_exec = Utc::now();
        job
    }

    async fn run_one(store: Arc<CountingStore>, notifier: Arc<RecordingNotifier>, job: AlertingJob) -> Arc<PipelineMetrics> {
        let metrics = Arc::new(PipelineMetrics::default());
        let tracker = StateTracker::new(store, notifier, Arc::clone(&metrics));
        let (tx, rx) = mpsc::channel(10);
        let handle = tokio::spawn(tracker.run(rx));
        tx.send(job).await.unwrap();
        drop(tx);
        handle.await.unwrap();
        // allow the detached notification task to finish
        tokio::task::yield_now().await;
        metrics
    }

    #[tokio::test]
    async fn test_flip_triggers_notification() {
        let store = Arc::new(CountingStore::new(0, true));
        let notifier = Arc::new(RecordingNotifier::default());
        let metrics = run_one(Arc::clone(&store), Arc::clone(&notifier), job(true)).await;

        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.snapshot().state_changes, 1);

        // detached task; poll briefly for the recorded change
        for _ in 0..100 {
            if !notifier.changes.lock().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        let changes = notifier.changes.lock();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].recipients, vec!["ops@example.com".to_string()]);
        assert_eq!(changes[0].new_state, CheckState::Critical);
    }

    #[tokio::test]
    async fn test_heartbeat_write_does_not_notify() {
        let store = Arc::new(CountingStore::new(0, false));
        let notifier = Arc::new(RecordingNotifier::default());
        let metrics = run_one(Arc::clone(&store), Arc::clone(&notifier), job(true)).await;

        assert_eq!(metrics.snapshot().state_updates, 1);
        assert_eq!(metrics.snapshot().state_changes, 0);
        assert!(notifier.changes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let store = Arc::new(CountingStore::new(2, true));
        let notifier = Arc::new(RecordingNotifier::default());
        let metrics = run_one(Arc::clone(&store), notifier, job(false)).await;

        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.snapshot().state_updates, 1);
        assert_eq!(metrics.snapshot().update_failures, 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_drop_the_update() {
        let store = Arc::new(CountingStore::new(10, true));
        let notifier = Arc::new(RecordingNotifier::default());
        let metrics = run_one(Arc::clone(&store), Arc::clone(&notifier), job(true)).await;

        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.snapshot().update_failures, 1);
        assert_eq!(metrics.snapshot().state_changes, 0);
        assert!(notifier.changes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_notifications_stay_silent() {
        let store = Arc::new(CountingStore::new(0, true));
        let notifier = Arc::new(RecordingNotifier::default());
        let metrics = run_one(store, Arc::clone(&notifier), job(false)).await;

        assert_eq!(metrics.snapshot().state_changes, 1);
        assert!(notifier.changes.lock().is_empty());
    }
}
