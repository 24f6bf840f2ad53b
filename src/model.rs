//! Record types from the landings and component-connections artifacts, plus
//! the derived-metric helpers that ride on them.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::calendar;

/// One change record from the landings report.
#[derive(Debug, Clone, Deserialize)]
pub struct BugSummary {
    pub id: i64,
    pub component: String,
    pub team: String,
    #[serde(default)]
    pub whiteboard: String,
    #[serde(deserialize_with = "calendar::date_from_str")]
    pub creation_date: NaiveDate,
    /// Fix/landing date; `None` while unresolved.
    #[serde(default, deserialize_with = "calendar::opt_date_from_str")]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub meta_ids: Vec<i64>,
    /// Releases the fix shipped in; empty if unfixed.
    #[serde(default)]
    pub versions: Vec<u32>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub severity: String,
    /// "l" / "a" / "h"; `None` when the model did not score the change.
    #[serde(default)]
    pub risk_band: Option<String>,
    #[serde(default)]
    pub regression: bool,
    #[serde(default)]
    pub fixed: bool,
    /// Days from landing to the regression it caused, when known.
    #[serde(default)]
    pub time_to_bug: Option<f64>,
    /// Hours to confirmation, when known.
    #[serde(default)]
    pub time_to_confirm: Option<f64>,
    #[serde(default)]
    pub commits: Vec<Commit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Commit {
    /// Testing-classification tag; `None` = unknown.
    pub testing: Option<String>,
    /// [lines_added, lines_covered, lines_unknown]
    #[serde(default)]
    pub coverage: Option<[i64; 3]>,
}

/// One row of the component-connections report.
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentConnection {
    pub component: String,
    pub most_common_regression_components: HashMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureMetaBug {
    pub id: i64,
    #[serde(default)]
    pub summary: String,
}

/// Sum of commit coverage triples across a record's commits; commits without
/// coverage data contribute nothing.
pub fn summarize_coverage(summary: &BugSummary) -> [i64; 3] {
    let mut totals = [0i64; 3];
    for commit in &summary.commits {
        if let Some(coverage) = commit.coverage {
            totals[0] += coverage[0];
            totals[1] += coverage[1];
            totals[2] += coverage[2];
        }
    }
    totals
}

/// Probabilities below this are noise in the connections report.
pub const REGRESSION_PROBABILITY_THRESHOLD: f64 = 0.05;

/// Map each component to the components most likely to cause regressions in
/// it, dropping causing-components whose probability is below `threshold`.
pub fn component_regression_map(
    connections: &[ComponentConnection],
    threshold: f64,
) -> HashMap<String, HashMap<String, f64>> {
    let mut map: HashMap<String, HashMap<String, f64>> = HashMap::new();
    for connection in connections {
        for (regressed, probability) in &connection.most_common_regression_components {
            if *probability < threshold {
                continue;
            }
            map.entry(regressed.clone())
                .or_default()
                .insert(connection.component.clone(), *probability);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(testing: Option<&str>, coverage: Option<[i64; 3]>) -> Commit {
        Commit {
            testing: testing.map(str::to_string),
            coverage,
        }
    }

    #[test]
    fn test_summarize_coverage_sums_triples() {
        let summary = BugSummary {
            id: 1,
            component: "Core".to_string(),
            team: "Layout".to_string(),
            whiteboard: String::new(),
            creation_date: "2021-01-01".parse().unwrap(),
            date: None,
            meta_ids: Vec::new(),
            versions: Vec::new(),
            types: Vec::new(),
            severity: String::new(),
            risk_band: None,
            regression: false,
            fixed: false,
            time_to_bug: None,
            time_to_confirm: None,
            commits: vec![
                commit(None, Some([10, 7, 1])),
                commit(None, None), // no coverage data: contributes nothing
                commit(None, Some([5, 5, 0])),
            ],
        };
        assert_eq!(summarize_coverage(&summary), [15, 12, 1]);
    }

    #[test]
    fn test_regression_map_drops_below_threshold() {
        let connections = vec![
            ComponentConnection {
                component: "Graphics".to_string(),
                most_common_regression_components: HashMap::from([
                    ("Layout".to_string(), 0.2),
                    ("DOM".to_string(), 0.01),
                ]),
            },
            ComponentConnection {
                component: "JavaScript".to_string(),
                most_common_regression_components: HashMap::from([(
                    "Layout".to_string(),
                    0.08,
                )]),
            },
        ];

        let map = component_regression_map(&connections, REGRESSION_PROBABILITY_THRESHOLD);

        let layout = map.get("Layout").unwrap();
        assert_eq!(layout.get("Graphics"), Some(&0.2));
        assert_eq!(layout.get("JavaScript"), Some(&0.08));
        // DOM only appeared below the threshold
        assert!(!map.contains_key("DOM"));
    }

    #[test]
    fn test_summary_deserializes_from_artifact_shape() {
        let raw = serde_json::json!({
            "id": 1700000,
            "component": "Core::Layout",
            "team": "Layout",
            "whiteboard": "[perf]",
            "creation_date": "2021-01-02",
            "date": "2021-01-10",
            "meta_ids": [12, 34],
            "versions": [86],
            "types": ["crash"],
            "severity": "S2",
            "risk_band": "l",
            "regression": true,
            "fixed": true,
            "time_to_bug": null,
            "time_to_confirm": 4.5,
            "commits": [{"testing": "testing-approved", "coverage": [3, 2, 0]}]
        });
        let summary: BugSummary = serde_json::from_value(raw).unwrap();
        assert_eq!(summary.date, Some("2021-01-10".parse().unwrap()));
        assert_eq!(summary.versions, vec![86]);
        assert_eq!(summary.commits.len(), 1);
    }
}
