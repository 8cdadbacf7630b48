//! Check descriptors and health-state types
//!
//! A check is a single monitor configuration (protocol + target + frequency)
//! attached to an endpoint. Probes execute checks independently and report
//! time-series results; the pipeline only consumes the fields below.

use serde::{Deserialize, Serialize};

/// Protocol a check monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Http,
    Https,
    Ping,
    Dns,
}

impl CheckType {
    /// Lowercase name used in metric paths and query targets.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::Http => "http",
            CheckType::Https => "https",
            CheckType::Ping => "ping",
            CheckType::Dns => "dns",
        }
    }
}

impl std::fmt::Display for CheckType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health verdict for a check.
///
/// Verdicts are compared only for equality; there is no ordering between
/// them. `Unknown` means "no data", which is distinct from "no failures".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckState {
    Ok,
    Critical,
    #[default]
    Unknown,
}

/// Result-sample gauge names, one slot per sample. The `warn_state` slot is
/// carried for historical graph compatibility and is never set by this
/// pipeline.
pub const RESULT_SLOTS: [&str; 3] = ["ok_state", "warn_state", "error_state"];

impl CheckState {
    /// Index into [`RESULT_SLOTS`] whose gauge reads 1.0 for this verdict.
    /// `Unknown` maps to no slot, so all three gauges read 0.
    pub fn metric_slot(self) -> Option<usize> {
        match self {
            CheckState::Ok => Some(0),
            CheckState::Critical => Some(2),
            CheckState::Unknown => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CheckState::Ok => "ok",
            CheckState::Critical => "critical",
            CheckState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for CheckState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification configuration attached to a check's health settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub enabled: bool,
    /// Comma-separated recipient addresses.
    #[serde(default)]
    pub addresses: String,
}

impl NotificationSettings {
    /// Parsed recipient list; empty entries are dropped.
    pub fn recipients(&self) -> Vec<String> {
        self.addresses
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Alerting thresholds for a check.
///
/// A probe is failing when it reports `steps` consecutive failing points;
/// the check goes critical when at least `num_probes` probes are failing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthSettings {
    pub num_probes: usize,
    pub steps: usize,
    #[serde(default)]
    pub notifications: NotificationSettings,
}

/// A check as read from the store for alerting purposes.
///
/// `state`, `state_check` and `state_change` are the values known at read
/// time; the executor compares its fresh verdict against them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckDescriptor {
    pub id: i64,
    pub org_id: i64,
    pub endpoint_id: i64,
    pub slug: String,
    pub name: String,
    #[serde(rename = "type")]
    pub check_type: CheckType,
    /// Seconds between evaluations; must divide evenly into the tick.
    pub frequency: i64,
    /// Check-specific phase within its frequency, in seconds.
    pub offset: i64,
    pub enabled: bool,
    pub health_settings: Option<HealthSettings>,
    /// Protocol-specific settings, opaque to the pipeline.
    #[serde(default)]
    pub settings: serde_json::Value,
    /// Last persisted verdict.
    #[serde(default)]
    pub state: CheckState,
    /// Unix second the state was last checked.
    #[serde(default)]
    pub state_check: i64,
    /// Unix second the state last flipped.
    #[serde(default)]
    pub state_change: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_slot_lookup() {
        assert_eq!(CheckState::Ok.metric_slot(), Some(0));
        assert_eq!(CheckState::Critical.metric_slot(), Some(2));
        assert_eq!(CheckState::Unknown.metric_slot(), None);
        assert_eq!(RESULT_SLOTS[2], "error_state");
    }

    #[test]
    fn test_recipients_parsing() {
        let settings = NotificationSettings {
            enabled: true,
            addresses: "ops@example.com, , oncall@example.com,".to_string(),
        };
        assert_eq!(
            settings.recipients(),
            vec!["ops@example.com".to_string(), "oncall@example.com".to_string()]
        );

        let empty = NotificationSettings {
            enabled: true,
            addresses: " ".to_string(),
        };
        assert!(empty.recipients().is_empty());
    }

    #[test]
    fn test_check_type_names() {
        assert_eq!(CheckType::Http.as_str(), "http");
        assert_eq!(CheckType::Dns.to_string(), "dns");
    }

    #[test]
    fn test_state_serde_names() {
        let state: CheckState = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(state, CheckState::Critical);
        assert_eq!(serde_json::to_string(&CheckState::Ok).unwrap(), "\"ok\"");
    }
}
