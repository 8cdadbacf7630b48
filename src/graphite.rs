//! Time-series query client
//!
//! Executes one windowed render query per evaluation against the metrics
//! backend and returns one series per probe that reported data. Point
//! values are kept as raw JSON so the evaluator can distinguish null,
//! numeric and malformed values instead of defaulting them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One `(value, timestamp)` point. The value is `null` when the probe had
/// no sample for that second.
pub type DataPoint = (serde_json::Value, i64);

/// One probe's series for the queried window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    pub target: String,
    pub datapoints: Vec<DataPoint>,
}

/// A windowed render request.
///
/// `from` is exclusive and `until` inclusive, so a window of
/// `steps * frequency` seconds ending at the last point timestamp returns
/// exactly `steps` points per probe.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub targets: Vec<String>,
    pub from: i64,
    pub until: i64,
    pub org_id: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("query transport error: {0}")]
    Transport(String),

    #[error("query backend returned status {0}")]
    Status(u16),

    #[error("query response malformed: {0}")]
    Malformed(String),
}

/// Source of probe time series for the executor. The production
/// implementation talks to a graphite-compatible render endpoint; tests
/// substitute a canned source.
#[async_trait]
pub trait SeriesSource: Send + Sync {
    async fn query(&self, request: &RenderRequest) -> Result<Vec<Series>, QueryError>;
}

/// Render client for a graphite-compatible backend.
#[derive(Debug, Clone)]
pub struct GraphiteClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl GraphiteClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl SeriesSource for GraphiteClient {
    async fn query(&self, request: &RenderRequest) -> Result<Vec<Series>, QueryError> {
        let url = format!("{}/render", self.base_url);

        let mut req = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .header("X-Org-Id", request.org_id.to_string())
            .header(reqwest::header::USER_AGENT, "beacon alert-executor")
            .query(&[
                ("from", request.from.to_string()),
                ("until", request.until.to_string()),
                ("format", "json".to_string()),
            ]);
        for target in &request.targets {
            req = req.query(&[("target", target)]);
        }

        tracing::debug!(
            targets = ?request.targets,
            from = request.from,
            until = request.until,
            org_id = request.org_id,
            "issuing render query"
        );

        let response = req
            .send()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(QueryError::Status(status.as_u16()));
        }

        response
            .json::<Vec<Series>>()
            .await
            .map_err(|e| QueryError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let client = GraphiteClient::new("http://graphite:8080/");
        assert_eq!(client.base_url, "http://graphite:8080");
    }

    #[test]
    fn test_series_deserialization() {
        let body = r#"[
            {"target": "endpoint1", "datapoints": [[0, 1], [0, 2], [0, 3]]},
            {"target": "endpoint2", "datapoints": [[null, 1], [1, 2], [1, 3]]}
        ]"#;
        let series: Vec<Series> = serde_json::from_str(body).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].target, "endpoint1");
        assert_eq!(series[1].datapoints[0].0, serde_json::Value::Null);
        assert_eq!(series[1].datapoints[1].1, 2);
    }
}
