//! Chart series builders on top of the aggregation engine.
//!
//! Each builder pairs an accumulator with a bucketing key and flattens the
//! resulting series into renderer-agnostic `ChartData`. Actual drawing is a
//! collaborator behind [`ChartRenderer`].

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;

use crate::aggregate::{summary_data, BucketSeries, Grouping};
use crate::artifacts::ReleaseSource;
use crate::calendar;
use crate::counter::SparseCounter;
use crate::logging::{json_log, obj};
use crate::model::BugSummary;

#[derive(Debug, Clone, Serialize)]
pub struct Series {
    pub name: String,
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartData {
    pub title: String,
    pub y_label: String,
    pub categories: Vec<String>,
    pub series: Vec<Series>,
}

/// Rendering collaborator; correctness stops at the ChartData shape.
pub trait ChartRenderer {
    fn render(&self, chart: &ChartData);
}

/// Emits each chart as one structured log line.
pub struct JsonRenderer;

impl ChartRenderer for JsonRenderer {
    fn render(&self, chart: &ChartData) {
        let payload = match serde_json::to_value(chart) {
            Ok(payload) => payload,
            Err(_) => return,
        };
        let mut fields = obj(&[]);
        fields.insert("chart".to_string(), payload);
        json_log("chart", fields);
    }
}

/// Display label for a commit testing-classification tag.
pub fn testing_tag_label(tag: &str) -> &'static str {
    match tag {
        "testing-approved" => "approved",
        "testing-exception-unchanged" => "unchanged",
        "testing-exception-elsewhere" => "elsewhere",
        "testing-exception-ui" => "ui",
        "testing-exception-other" => "other",
        "missing" => "missing",
        _ => "unknown",
    }
}

fn earliest_creation(summaries: &[&BugSummary]) -> Option<NaiveDate> {
    summaries.iter().map(|s| s.creation_date).min()
}

/// Evolution of lower/average/higher risk changes, keyed by landing date.
/// History is clamped to two months before `today`; older patches were in the
/// scoring model's training set.
pub async fn risk_chart(
    summaries: &[&BugSummary],
    grouping: Grouping,
    today: NaiveDate,
    releases: &dyn ReleaseSource,
) -> Result<Option<ChartData>> {
    let scored: Vec<&BugSummary> = summaries
        .iter()
        .copied()
        .filter(|s| s.risk_band.is_some())
        .collect();
    let mut min_date = match scored.iter().filter_map(|s| s.date).min() {
        Some(date) => date,
        None => return Ok(None),
    };

    let two_months_ago = calendar::months_back(today, 2);
    if two_months_ago > min_date {
        min_date = two_months_ago;
    }

    let data = summary_data(
        &scored,
        grouping,
        min_date,
        |counter, summary| match summary.risk_band.as_deref() {
            Some("l") => counter.incr("low"),
            Some("a") => counter.incr("medium"),
            _ => counter.incr("high"),
        },
        None,
        |s| s.date,
        releases,
    )
    .await?;

    let mut categories = Vec::new();
    let (mut low, mut medium, mut high) = (Vec::new(), Vec::new(), Vec::new());
    for (key, counter) in data.iter() {
        categories.push(key.to_string());
        low.push(counter.get("low"));
        medium.push(counter.get("medium"));
        high.push(counter.get("high"));
    }

    Ok(Some(ChartData {
        title: "Evolution of lower/average/higher risk changes".to_string(),
        y_label: "# of patches".to_string(),
        categories,
        series: vec![
            Series {
                name: "Higher".to_string(),
                data: high,
            },
            Series {
                name: "Average".to_string(),
                data: medium,
            },
            Series {
                name: "Lower".to_string(),
                data: low,
            },
        ],
    }))
}

/// Regressions and fixed regressions, keyed by creation date.
pub async fn regressions_chart(
    summaries: &[&BugSummary],
    grouping: Grouping,
    releases: &dyn ReleaseSource,
) -> Result<Option<ChartData>> {
    let min_date = match earliest_creation(summaries) {
        Some(date) => date,
        None => return Ok(None),
    };

    let data = summary_data(
        summaries,
        grouping,
        min_date,
        |counter, summary| {
            if summary.regression {
                counter.incr("regressions");
                if summary.fixed {
                    counter.incr("fixed_regressions");
                }
            }
        },
        None,
        |s| Some(s.creation_date),
        releases,
    )
    .await?;

    let mut categories = Vec::new();
    let (mut regressions, mut fixed) = (Vec::new(), Vec::new());
    for (key, counter) in data.iter() {
        categories.push(key.to_string());
        regressions.push(counter.get("regressions"));
        fixed.push(counter.get("fixed_regressions"));
    }

    Ok(Some(ChartData {
        title: "Number of regressions".to_string(),
        y_label: "# of regressions".to_string(),
        categories,
        series: vec![
            Series {
                name: "Regressions".to_string(),
                data: regressions,
            },
            Series {
                name: "Fixed regressions".to_string(),
                data: fixed,
            },
        ],
    }))
}

/// Bugs by type, keyed by creation date; one series per known type except
/// the "unknown" placeholder.
pub async fn types_chart(
    summaries: &[&BugSummary],
    grouping: Grouping,
    known_types: &[String],
    releases: &dyn ReleaseSource,
) -> Result<Option<ChartData>> {
    let min_date = match earliest_creation(summaries) {
        Some(date) => date,
        None => return Ok(None),
    };

    let data = summary_data(
        summaries,
        grouping,
        min_date,
        |counter, summary| {
            for t in &summary.types {
                counter.incr(t);
            }
        },
        None,
        |s| Some(s.creation_date),
        releases,
    )
    .await?;

    let mut series: Vec<Series> = known_types
        .iter()
        .filter(|t| t.as_str() != "unknown")
        .map(|t| Series {
            name: t.clone(),
            data: Vec::new(),
        })
        .collect();

    let mut categories = Vec::new();
    for (key, counter) in data.iter() {
        categories.push(key.to_string());
        for s in series.iter_mut() {
            s.data.push(counter.get(&s.name));
        }
    }

    Ok(Some(ChartData {
        title: "Number of bugs by type".to_string(),
        y_label: "# of bugs".to_string(),
        categories,
        series,
    }))
}

/// One-series average chart: per bucket, ceil(sum / count).
async fn average_chart(
    summaries: Vec<&BugSummary>,
    grouping: Grouping,
    releases: &dyn ReleaseSource,
    accumulate: impl FnMut(&mut SparseCounter, &BugSummary),
    title: &str,
    y_label: &str,
    value_key: &str,
) -> Result<Option<ChartData>> {
    let min_date = match earliest_creation(&summaries) {
        Some(date) => date,
        None => return Ok(None),
    };

    let data = summary_data(
        &summaries,
        grouping,
        min_date,
        accumulate,
        None,
        |s| Some(s.creation_date),
        releases,
    )
    .await?;

    let mut categories = Vec::new();
    let mut averages = Vec::new();
    for (key, counter) in data.iter() {
        categories.push(key.to_string());
        let bugs = counter.get("bugs");
        let average = if bugs > 0.0 {
            (counter.get(value_key) / bugs).ceil()
        } else {
            0.0
        };
        averages.push(average);
    }

    Ok(Some(ChartData {
        title: title.to_string(),
        y_label: y_label.to_string(),
        categories,
        series: vec![Series {
            name: title.to_string(),
            data: averages,
        }],
    }))
}

/// Average days from creation to fix, over fixed records only.
pub async fn fix_times_chart(
    summaries: &[&BugSummary],
    grouping: Grouping,
    releases: &dyn ReleaseSource,
) -> Result<Option<ChartData>> {
    let fixed: Vec<&BugSummary> = summaries
        .iter()
        .copied()
        .filter(|s| s.date.is_some())
        .collect();
    average_chart(
        fixed,
        grouping,
        releases,
        |counter, summary| {
            if let Some(date) = summary.date {
                counter.add(
                    "fix_time",
                    calendar::days_between(summary.creation_date, date) as f64,
                );
                counter.incr("bugs");
            }
        },
        "Average fix time",
        "Time",
        "fix_time",
    )
    .await
}

/// Average days from a change landing to the bug it caused being filed.
pub async fn time_to_bug_chart(
    summaries: &[&BugSummary],
    grouping: Grouping,
    releases: &dyn ReleaseSource,
) -> Result<Option<ChartData>> {
    let known: Vec<&BugSummary> = summaries
        .iter()
        .copied()
        .filter(|s| s.time_to_bug.is_some())
        .collect();
    average_chart(
        known,
        grouping,
        releases,
        |counter, summary| {
            if let Some(days) = summary.time_to_bug {
                counter.add("time_to_bug", days);
                counter.incr("bugs");
            }
        },
        "Average time to bug (in days)",
        "Time",
        "time_to_bug",
    )
    .await
}

/// Average hours from filing to confirmation.
pub async fn time_to_confirm_chart(
    summaries: &[&BugSummary],
    grouping: Grouping,
    releases: &dyn ReleaseSource,
) -> Result<Option<ChartData>> {
    let known: Vec<&BugSummary> = summaries
        .iter()
        .copied()
        .filter(|s| s.time_to_confirm.is_some())
        .collect();
    average_chart(
        known,
        grouping,
        releases,
        |counter, summary| {
            if let Some(hours) = summary.time_to_confirm {
                counter.add("time_to_confirm", hours);
                counter.incr("bugs");
            }
        },
        "Average time to confirm (in hours)",
        "Time",
        "time_to_confirm",
    )
    .await
}

/// Tally of commit testing tags across the filtered set; not a time series.
pub fn testing_chart(summaries: &[&BugSummary]) -> Option<ChartData> {
    let mut counts = SparseCounter::new();
    for summary in summaries {
        for commit in &summary.commits {
            match &commit.testing {
                None => counts.incr("unknown"),
                Some(tag) => counts.incr(tag),
            }
        }
    }
    if counts.is_empty() {
        return None;
    }

    let mut tags: Vec<&str> = counts.keys().collect();
    tags.sort_unstable();

    let mut categories = Vec::new();
    let mut data = Vec::new();
    for tag in tags {
        categories.push(testing_tag_label(tag).to_string());
        data.push(counts.get(tag));
    }

    Some(ChartData {
        title: "Testing tags".to_string(),
        y_label: "# of commits".to_string(),
        categories,
        series: vec![Series {
            name: "Tags".to_string(),
            data,
        }],
    })
}

/// Per-commit testing-tag evolution since the testing policy took effect;
/// only fixed records participate (the series is keyed by landing date).
pub async fn testing_policy_summary(
    summaries: &[&BugSummary],
    grouping: Grouping,
    filter: Option<&dyn Fn(&BugSummary) -> bool>,
    releases: &dyn ReleaseSource,
) -> Result<BucketSeries> {
    let fixed: Vec<&BugSummary> = summaries
        .iter()
        .copied()
        .filter(|s| s.date.is_some())
        .collect();

    // the testing policy took effect on this date; earlier data is noise
    let policy_start = calendar::parse_date("2020-09-01")?;

    summary_data(
        &fixed,
        grouping,
        policy_start,
        |counter, summary| {
            for commit in &summary.commits {
                match &commit.testing {
                    None => counter.incr("unknown"),
                    Some(tag) => counter.incr(tag),
                }
            }
        },
        filter,
        |s| s.date,
        releases,
    )
    .await
}
