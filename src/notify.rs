//! Notification dispatch
//!
//! Invoked by the state tracker only on a real, persisted state transition.
//! Rendering and delivery of the outbound message is the dispatcher's
//! problem; the pipeline hands over the transition context and moves on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::check::CheckState;
use crate::job::AlertingJob;

/// Context handed to the notification dispatcher for one state transition.
#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub check_id: i64,
    pub org_id: i64,
    pub endpoint_id: i64,
    pub endpoint_name: String,
    pub endpoint_slug: String,
    pub check_type: String,
    pub new_state: CheckState,
    pub recipients: Vec<String>,
    /// Timestamp of the most recent data the verdict used.
    pub last_point_ts: i64,
    /// When the verdict was made.
    pub time_exec: DateTime<Utc>,
    pub settings: serde_json::Value,
}

impl StateChange {
    pub fn from_job(job: &AlertingJob, recipients: Vec<String>) -> Self {
        Self {
            check_id: job.check.id,
            org_id: job.check.org_id,
            endpoint_id: job.check.endpoint_id,
            endpoint_name: job.check.name.clone(),
            endpoint_slug: job.check.slug.clone(),
            check_type: job.check.check_type.as_str().to_string(),
            new_state: job.new_state,
            recipients,
            last_point_ts: job.last_point_ts,
            time_exec: job.time_exec,
            settings: job.check.settings.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("webhook error: {0}")]
    Webhook(String),

    #[error("multiple notification failures: {0:?}")]
    Multiple(Vec<NotifyError>),
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, change: &StateChange) -> Result<(), NotifyError>;
}

/// Dispatcher that records transitions in the log. The default for
/// standalone deployments without an outbound notification path.
#[derive(Debug, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn notify(&self, change: &StateChange) -> Result<(), NotifyError> {
        tracing::warn!(
            check_id = change.check_id,
            org_id = change.org_id,
            endpoint_slug = %change.endpoint_slug,
            state = %change.new_state,
            recipients = ?change.recipients,
            "state change notification"
        );
        Ok(())
    }
}

/// Dispatcher that posts the transition to an HTTP webhook per recipient
/// address.
pub struct WebhookDispatcher {
    client: reqwest::Client,
    headers: HashMap<String, String>,
}

impl WebhookDispatcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            headers: HashMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    async fn post(&self, url: &str, change: &StateChange) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "check_id": change.check_id,
            "endpoint_name": change.endpoint_name,
            "endpoint_slug": change.endpoint_slug,
            "check_type": change.check_type,
            "state": change.new_state,
            "time_last_data": change.last_point_ts,
            "time_exec": change.time_exec.to_rfc3339(),
            "settings": change.settings,
        });

        let mut request = self.client.post(url).json(&payload);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Webhook(format!("failed to send webhook: {e}")))?;

        if !response.status().is_success() {
            return Err(NotifyError::Webhook(format!(
                "webhook returned status {}",
                response.status()
            )));
        }

        tracing::debug!(
            check_id = change.check_id,
            url = %url,
            "webhook notification sent"
        );
        Ok(())
    }
}

impl Default for WebhookDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    /// Each recipient address is treated as a webhook URL; all are posted
    /// concurrently and failures are collected.
    async fn notify(&self, change: &StateChange) -> Result<(), NotifyError> {
        let posts: Vec<_> = change
            .recipients
            .iter()
            .map(|url| self.post(url, change))
            .collect();

        let errors: Vec<NotifyError> = futures::future::join_all(posts)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::Multiple(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckDescriptor, CheckType, HealthSettings};

    fn job() -> AlertingJob {
        let check = CheckDescriptor {
            id: 5,
            org_id: 2,
            endpoint_id: 9,
            slug: "api".to_string(),
            name: "API".to_string(),
            check_type: CheckType::Https,
            frequency: 30,
            offset: 0,
            enabled: true,
            health_settings: Some(HealthSettings::default()),
            settings: serde_json::json!({"host": "api.example.com"}),
            state: CheckState::Ok,
            state_check: 0,
            state_change: 0,
        };
        let mut job = AlertingJob::new(check, Utc::now(), 1000);
        job.new_state = CheckState::Critical;
        job.time_exec = Utc::now();
        job
    }

    #[test]
    fn test_state_change_from_job() {
        let change = StateChange::from_job(&job(), vec!["http://hook.local".to_string()]);
        assert_eq!(change.check_id, 5);
        assert_eq!(change.new_state, CheckState::Critical);
        assert_eq!(change.check_type, "https");
        assert_eq!(change.last_point_ts, 1000);
    }

    #[tokio::test]
    async fn test_log_dispatcher_always_succeeds() {
        let change = StateChange::from_job(&job(), vec![]);
        assert!(LogDispatcher.notify(&change).await.is_ok());
    }
}
