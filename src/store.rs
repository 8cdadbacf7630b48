//! Store adapter
//!
//! Read/write contract the pipeline needs from the relational store: the
//! due-check query, the conditional state update, and the persisted
//! scheduler offset. The administrative layer owning the schema lives
//! elsewhere; [`MemStore`] is a process-local implementation backing the
//! standalone binary and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::check::{CheckDescriptor, CheckState};
use crate::job::AlertingJob;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// All enabled checks due at `tick`, i.e. those where
    /// `tick % frequency == offset`.
    async fn checks_due_at(&self, tick: i64) -> Result<Vec<CheckDescriptor>, StoreError>;

    /// Persist an executed job's verdict.
    ///
    /// The state flip is conditional: it takes effect only when the stored
    /// state differs from the job's verdict AND the stored state-checked
    /// timestamp is older than the job's execution time, which guards
    /// against out-of-order redelivery un-flipping a more recent verdict.
    /// The state-checked heartbeat is renewed unconditionally. Returns
    /// whether the visible state flipped.
    async fn update_check_state(&self, job: &AlertingJob) -> Result<bool, StoreError>;

    /// The persisted scheduler offset in seconds, if one exists.
    async fn get_scheduler_offset(&self) -> Result<Option<i64>, StoreError>;

    async fn set_scheduler_offset(&self, offset: i64) -> Result<(), StoreError>;
}

/// Stored per-check alerting state.
#[derive(Debug, Clone)]
struct StoredCheck {
    descriptor: CheckDescriptor,
    state: CheckState,
    state_check: i64,
    state_change: i64,
}

/// In-memory store adapter.
#[derive(Default)]
pub struct MemStore {
    checks: DashMap<i64, StoredCheck>,
    scheduler_offset: Mutex<Option<i64>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check. The stored state starts from the descriptor's
    /// `state`/`state_check`/`state_change` fields.
    pub fn put_check(&self, descriptor: CheckDescriptor) {
        let stored = StoredCheck {
            state: descriptor.state,
            state_check: descriptor.state_check,
            state_change: descriptor.state_change,
            descriptor,
        };
        self.checks.insert(stored.descriptor.id, stored);
    }

    pub fn remove_check(&self, id: i64) {
        self.checks.remove(&id);
    }

    /// Current persisted verdict for a check, if known.
    pub fn check_state(&self, id: i64) -> Option<(CheckState, i64, i64)> {
        self.checks
            .get(&id)
            .map(|c| (c.state, c.state_check, c.state_change))
    }
}

#[async_trait]
impl StoreAdapter for MemStore {
    async fn checks_due_at(&self, tick: i64) -> Result<Vec<CheckDescriptor>, StoreError> {
        let due = self
            .checks
            .iter()
            .filter(|entry| {
                let c = &entry.descriptor;
                c.enabled && c.frequency > 0 && tick % c.frequency == c.offset
            })
            .map(|entry| {
                // refresh the dispatch-time snapshot of the stored state
                let mut descriptor = entry.descriptor.clone();
                descriptor.state = entry.state;
                descriptor.state_check = entry.state_check;
                descriptor.state_change = entry.state_change;
                descriptor
            })
            .collect();
        Ok(due)
    }

    async fn update_check_state(&self, job: &AlertingJob) -> Result<bool, StoreError> {
        let Some(mut stored) = self.checks.get_mut(&job.check.id) else {
            return Ok(false);
        };
        let time_exec = job.time_exec.timestamp();

        let changed = stored.state != job.new_state && stored.state_check < time_exec;
        if changed {
            stored.state = job.new_state;
            stored.state_change = time_exec;
        }
        stored.state_check = time_exec;
        Ok(changed)
    }

    async fn get_scheduler_offset(&self) -> Result<Option<i64>, StoreError> {
        Ok(*self.scheduler_offset.lock())
    }

    async fn set_scheduler_offset(&self, offset: i64) -> Result<(), StoreError> {
        *self.scheduler_offset.lock() = Some(offset);
        Ok(())
    }
}
