//! Streak evaluator
//!
//! Maps the time series returned for a check's evaluation window to a
//! health verdict. Each probe contributes one series; a probe is failing
//! when its longest run of consecutive positive points reaches the `steps`
//! threshold, and the check is critical when enough probes are failing.
//!
//! Null points are excluded from consideration entirely: they neither
//! extend nor close a run, matching how the upstream store drops nulls
//! before streak analysis.

use crate::check::{CheckState, HealthSettings};
use crate::graphite::Series;

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// No probe returned any non-null data point for the window. Distinct
    /// from "no failures": the caller maps this to an unknown verdict.
    #[error("no data for evaluation window")]
    NoData,

    /// A point carried a non-numeric, non-null value. Malformed backend
    /// data must never silently produce a wrong verdict.
    #[error("non-numeric value {value} in series {target}")]
    BadValue { target: String, value: String },
}

/// Evaluate one window of probe series against the check's thresholds.
///
/// Returns `Err(EvalError::NoData)` when zero probes reported data; any
/// other error aborts the evaluation without a verdict.
pub fn evaluate(series: &[Series], settings: &HealthSettings) -> Result<CheckState, EvalError> {
    let mut probes_with_data = 0usize;
    let mut bad_probes = 0usize;

    for s in series {
        let mut longest = 0usize;
        let mut current = 0usize;
        let mut has_data = false;

        for (value, _ts) in &s.datapoints {
            let value = match value {
                serde_json::Value::Null => continue,
                serde_json::Value::Number(n) => n.as_f64().ok_or_else(|| EvalError::BadValue {
                    target: s.target.clone(),
                    value: n.to_string(),
                })?,
                other => {
                    return Err(EvalError::BadValue {
                        target: s.target.clone(),
                        value: other.to_string(),
                    })
                }
            };
            has_data = true;
            if value > 0.0 {
                current += 1;
                longest = longest.max(current);
            } else {
                current = 0;
            }
        }

        if has_data {
            probes_with_data += 1;
            if settings.steps > 0 && longest >= settings.steps {
                bad_probes += 1;
            }
        }
    }

    if probes_with_data == 0 {
        return Err(EvalError::NoData);
    }

    if bad_probes >= settings.num_probes {
        Ok(CheckState::Critical)
    } else {
        Ok(CheckState::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(vals: &[i64]) -> Series {
        Series {
            target: "test".to_string(),
            datapoints: vals
                .iter()
                .enumerate()
                .map(|(i, v)| (serde_json::json!(v), i as i64))
                .collect(),
        }
    }

    fn check(series_list: Vec<Series>, steps: usize, num_probes: usize) -> CheckState {
        let settings = HealthSettings {
            num_probes,
            steps,
            notifications: Default::default(),
        };
        evaluate(&series_list, &settings).unwrap()
    }

    #[test]
    fn test_steps_3_num_probes_1() {
        assert_eq!(check(vec![series(&[0, 0, 0])], 3, 1), CheckState::Ok);
        assert_eq!(check(vec![series(&[0, 1, 1])], 3, 1), CheckState::Ok);
        assert_eq!(check(vec![series(&[1, 1, 1])], 3, 1), CheckState::Critical);
        // a streak never reaching 3 cannot fail by length
        assert_eq!(check(vec![series(&[1, 1])], 3, 1), CheckState::Ok);
        assert_eq!(check(vec![series(&[1, 1, 0, 1])], 3, 1), CheckState::Ok);
        assert_eq!(
            check(vec![series(&[1, 1, 1]), series(&[0, 0, 0])], 3, 1),
            CheckState::Critical
        );
        assert_eq!(
            check(vec![series(&[1, 1, 1]), series(&[1, 1, 1])], 3, 1),
            CheckState::Critical
        );
    }

    #[test]
    fn test_steps_3_num_probes_2() {
        // only one bad probe
        assert_eq!(
            check(vec![series(&[0, 0, 0]), series(&[1, 1, 1])], 3, 2),
            CheckState::Ok
        );
        assert_eq!(
            check(vec![series(&[1, 1, 1]), series(&[1, 1, 1])], 3, 2),
            CheckState::Critical
        );
        assert_eq!(
            check(
                vec![series(&[1, 1, 1]), series(&[1, 1, 1]), series(&[1, 1, 1])],
                3,
                2
            ),
            CheckState::Critical
        );
        // streak length 1 < 3 on every probe
        assert_eq!(
            check(
                vec![series(&[1, 0, 1]), series(&[1, 0, 1]), series(&[1, 0, 1])],
                3,
                2
            ),
            CheckState::Ok
        );
        // five mixed probes, three bad
        assert_eq!(
            check(
                vec![
                    series(&[1, 1, 1]),
                    series(&[0, 0, 0]),
                    series(&[0, 1, 1]),
                    series(&[1, 1, 1]),
                    series(&[1, 1, 1]),
                ],
                3,
                2
            ),
            CheckState::Critical
        );
    }

    #[test]
    fn test_trailing_streak_counts_without_closing_point() {
        assert_eq!(check(vec![series(&[0, 1, 1, 1])], 3, 1), CheckState::Critical);
    }

    #[test]
    fn test_no_data_is_an_explicit_error() {
        let settings = HealthSettings {
            num_probes: 1,
            steps: 3,
            notifications: Default::default(),
        };
        assert!(matches!(
            evaluate(&[], &settings),
            Err(EvalError::NoData)
        ));
    }

    #[test]
    fn test_all_null_series_does_not_count_as_data() {
        let s = Series {
            target: "test".to_string(),
            datapoints: vec![(serde_json::Value::Null, 1), (serde_json::Value::Null, 2)],
        };
        let settings = HealthSettings {
            num_probes: 1,
            steps: 3,
            notifications: Default::default(),
        };
        assert!(matches!(
            evaluate(&[s], &settings),
            Err(EvalError::NoData)
        ));
    }

    #[test]
    fn test_nulls_are_skipped_not_streak_breaking() {
        let s = Series {
            target: "test".to_string(),
            datapoints: vec![
                (serde_json::json!(1), 1),
                (serde_json::Value::Null, 2),
                (serde_json::json!(1), 3),
                (serde_json::json!(1), 4),
            ],
        };
        let settings = HealthSettings {
            num_probes: 1,
            steps: 3,
            notifications: Default::default(),
        };
        assert_eq!(evaluate(&[s], &settings).unwrap(), CheckState::Critical);
    }

    #[test]
    fn test_non_numeric_value_fails_evaluation() {
        let s = Series {
            target: "test".to_string(),
            datapoints: vec![(serde_json::json!("broken"), 1)],
        };
        let settings = HealthSettings {
            num_probes: 1,
            steps: 3,
            notifications: Default::default(),
        };
        assert!(matches!(
            evaluate(&[s], &settings),
            Err(EvalError::BadValue { .. })
        ));
    }

    #[test]
    fn test_mixed_probe_with_and_without_data() {
        // an empty-after-null-filtering series does not count toward
        // "probes with data", but the other probe still produces a verdict
        let empty = Series {
            target: "empty".to_string(),
            datapoints: vec![(serde_json::Value::Null, 1)],
        };
        assert_eq!(
            check(vec![empty, series(&[1, 1, 1])], 3, 1),
            CheckState::Critical
        );
    }
}
