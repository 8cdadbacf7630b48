//! Job dispatcher
//!
//! Ticks once per second and turns due checks into alerting jobs. `next`
//! tracks the next unevaluated tick; the loop catches up as many ticks as
//! the wall clock has passed, so scheduling jitter or a stall never skips a
//! tick (at the cost of bursting jobs afterwards). The global scheduler
//! offset phase-shifts the due query away from exact clock boundaries and
//! is re-read from the store every minute on its own task, so a slow store
//! cannot stall ticking.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::interval;

use crate::check::CheckDescriptor;
use crate::job::AlertingJob;
use crate::metrics::PipelineMetrics;
use crate::queue::JobQueue;
use crate::store::StoreAdapter;

/// Offset persisted on first run when none exists yet.
pub const DEFAULT_OFFSET_SECS: i64 = 30;

/// How often the persisted offset is re-read.
const OFFSET_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Read the persisted scheduler offset, creating it with the default when
/// absent. Store errors fall back to the default without persisting it;
/// the refresh task will pick up the stored value once the store recovers.
pub async fn load_or_set_offset(store: &dyn StoreAdapter) -> i64 {
    match store.get_scheduler_offset().await {
        Ok(Some(offset)) => offset,
        Ok(None) => {
            tracing::debug!(
                offset = DEFAULT_OFFSET_SECS,
                "initializing scheduler offset to default"
            );
            if let Err(e) = store.set_scheduler_offset(DEFAULT_OFFSET_SECS).await {
                tracing::error!(error = %e, "could not persist scheduler offset");
            }
            DEFAULT_OFFSET_SECS
        }
        Err(e) => {
            tracing::error!(error = %e, "failure querying for current offset");
            DEFAULT_OFFSET_SECS
        }
    }
}

/// Re-read the persisted offset every minute and apply changes. Errors
/// leave the previous offset in effect.
pub async fn refresh_offset(
    store: Arc<dyn StoreAdapter>,
    offset: Arc<AtomicI64>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(OFFSET_REFRESH_INTERVAL);
    ticker.tick().await; // first tick fires immediately; offset was just loaded
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match store.get_scheduler_offset().await {
                    Ok(Some(fresh)) => {
                        let current = offset.load(Ordering::Relaxed);
                        if fresh != current {
                            tracing::info!(from = current, to = fresh, "scheduler offset changed");
                            offset.store(fresh, Ordering::Relaxed);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "offset refresh failed"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("offset refresh task stopped");
}

/// Build the job for one due check, or `None` for checks that cannot
/// produce a verdict (disabled, zero frequency, or missing health
/// settings). `last_point_ts` is the last fully closed second before the
/// tick.
pub fn build_job(
    check: CheckDescriptor,
    tick: i64,
    generated_at: DateTime<Utc>,
) -> Option<AlertingJob> {
    let health = check.health_settings.as_ref()?;
    if !check.enabled
        || check.frequency == 0
        || health.steps == 0
        || health.num_probes == 0
    {
        return None;
    }
    Some(AlertingJob::new(check, generated_at, tick - 1))
}

pub struct Dispatcher {
    store: Arc<dyn StoreAdapter>,
    queue: Arc<JobQueue>,
    offset: Arc<AtomicI64>,
    metrics: Arc<PipelineMetrics>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn StoreAdapter>,
        queue: Arc<JobQueue>,
        offset: Arc<AtomicI64>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            store,
            queue,
            offset,
            metrics,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut next = Utc::now().timestamp() - self.offset.load(Ordering::Relaxed);
        let mut ticker = interval(Duration::from_secs(1));
        tracing::info!(next, "dispatcher started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.dispatch_due(&mut next).await {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("dispatcher stopped");
    }

    /// Emit jobs for every tick that has become due. Returns false once
    /// the queue is closed.
    async fn dispatch_due(&self, next: &mut i64) -> bool {
        let now = Utc::now().timestamp();
        let offset = self.offset.load(Ordering::Relaxed);

        while *next <= now - offset {
            let tick = *next;
            *next += 1;

            let checks = match self.store.checks_due_at(tick).await {
                Ok(checks) => checks,
                Err(e) => {
                    // deliberate best-effort: the tick is not retried
                    self.metrics.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(tick, error = %e, "due-check query failed, skipping tick");
                    continue;
                }
            };

            let generated_at = Utc::now();
            for check in checks {
                let Some(job) = build_job(check, tick, generated_at) else {
                    continue;
                };
                if let Err(e) = self.queue.enqueue(job).await {
                    tracing::warn!(error = %e, "job queue rejected job, stopping dispatch");
                    return false;
                }
                self.metrics.jobs_scheduled.fetch_add(1, Ordering::Relaxed);
            }
        }
        true
    }
}
