//! Calendar bucketing of change records into chart-ready counter series.
//!
//! Records are first bucketed per day, then regrouped to the requested
//! granularity. The caller supplies the accumulator; the engine owns only the
//! bucketing. The input record list is never mutated.

use std::collections::{HashMap, HashSet};
use std::fmt;

use anyhow::Result;
use chrono::NaiveDate;

use crate::artifacts::ReleaseSource;
use crate::calendar;
use crate::counter::SparseCounter;
use crate::model::BugSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    Daily,
    Weekly,
    Monthly,
    ByRelease,
}

impl Grouping {
    /// Radio values from the query string; anything unrecognized is daily.
    pub fn parse(text: &str) -> Self {
        match text {
            "weekly" => Grouping::Weekly,
            "monthly" => Grouping::Monthly,
            "by_release" => Grouping::ByRelease,
            _ => Grouping::Daily,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grouping::Daily => "daily",
            Grouping::Weekly => "weekly",
            Grouping::Monthly => "monthly",
            Grouping::ByRelease => "by_release",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BucketKey {
    Day(NaiveDate),
    /// The ISO week's Monday.
    Week(NaiveDate),
    Month {
        year: i32,
        month: u32,
    },
    /// `None` for dates preceding the earliest known release.
    Release(Option<String>),
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::Day(date) | BucketKey::Week(date) => write!(f, "{date}"),
            BucketKey::Month { year, month } => write!(f, "{year:04}-{month:02}"),
            BucketKey::Release(Some(version)) => write!(f, "{version}"),
            BucketKey::Release(None) => write!(f, "unknown"),
        }
    }
}

/// Insertion-ordered bucket → counter mapping.
#[derive(Debug, Default)]
pub struct BucketSeries {
    index: HashMap<BucketKey, usize>,
    buckets: Vec<(BucketKey, SparseCounter)>,
}

impl BucketSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bucket for `key`, created empty at the end on first use.
    pub fn entry(&mut self, key: BucketKey) -> &mut SparseCounter {
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => {
                let slot = self.buckets.len();
                self.index.insert(key.clone(), slot);
                self.buckets.push((key, SparseCounter::new()));
                slot
            }
        };
        &mut self.buckets[slot].1
    }

    pub fn contains(&self, key: &BucketKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &BucketKey) -> Option<&SparseCounter> {
        self.index.get(key).map(|&slot| &self.buckets[slot].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BucketKey, &SparseCounter)> {
        self.buckets.iter().map(|(key, counter)| (key, counter))
    }

    pub fn keys(&self) -> impl Iterator<Item = &BucketKey> {
        self.buckets.iter().map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Bucket `summaries` into `grouping` periods starting at `start_date`.
///
/// Distinct record dates become daily buckets in ascending calendar order;
/// dates before `start_date` are skipped entirely and never reappear in a
/// coarser bucket. Each record lands in its day's bucket via `accumulate`
/// unless `filter` rejects it; a bucket whose records were all rejected still
/// appears, empty. Regrouping sums every counter key observed anywhere.
///
/// Suspends only for the release-history fetch, and only under by-release
/// grouping.
pub async fn summary_data<'a, A, D>(
    summaries: &[&'a BugSummary],
    grouping: Grouping,
    start_date: NaiveDate,
    mut accumulate: A,
    filter: Option<&dyn Fn(&BugSummary) -> bool>,
    date_getter: D,
    releases: &dyn ReleaseSource,
) -> Result<BucketSeries>
where
    A: FnMut(&mut SparseCounter, &BugSummary),
    D: Fn(&BugSummary) -> Option<NaiveDate>,
{
    let distinct: HashSet<NaiveDate> = summaries.iter().filter_map(|s| date_getter(s)).collect();
    let mut dates: Vec<NaiveDate> = distinct.into_iter().collect();
    dates.sort_unstable();

    let mut daily = BucketSeries::new();
    for date in dates {
        if date < start_date {
            continue;
        }
        daily.entry(BucketKey::Day(date));
    }

    for summary in summaries {
        let date = match date_getter(summary) {
            Some(date) => date,
            None => continue,
        };
        if !daily.contains(&BucketKey::Day(date)) {
            continue;
        }
        if let Some(filter) = filter {
            if !filter(summary) {
                continue;
            }
        }
        accumulate(daily.entry(BucketKey::Day(date)), summary);
    }

    // regrouping copies every key observed in any daily bucket
    let mut labels: Vec<String> = daily
        .iter()
        .flat_map(|(_, counter)| counter.keys())
        .map(str::to_string)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    labels.sort_unstable();

    let regrouped = match grouping {
        Grouping::Daily => daily,
        Grouping::Weekly => regroup(&daily, &labels, |date| {
            BucketKey::Week(calendar::week_start(date))
        }),
        Grouping::Monthly => regroup(&daily, &labels, |date| {
            let (year, month) = calendar::year_month(date);
            BucketKey::Month { year, month }
        }),
        Grouping::ByRelease => {
            let history = releases.releases().await?;
            regroup(&daily, &labels, |date| {
                BucketKey::Release(history.version_for(date).map(str::to_string))
            })
        }
    };

    Ok(regrouped)
}

fn regroup(
    daily: &BucketSeries,
    labels: &[String],
    rekey: impl Fn(NaiveDate) -> BucketKey,
) -> BucketSeries {
    let mut out = BucketSeries::new();
    for (key, counter) in daily.iter() {
        let date = match key {
            BucketKey::Day(date) => *date,
            _ => continue,
        };
        let bucket = out.entry(rekey(date));
        for label in labels {
            bucket.add(label, counter.get(label));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{ReleaseHistory, StaticReleases};

    fn d(text: &str) -> NaiveDate {
        calendar::parse_date(text).unwrap()
    }

    fn summary(id: i64, creation: &str, date: Option<&str>, risk_band: Option<&str>) -> BugSummary {
        BugSummary {
            id,
            component: "Core".to_string(),
            team: "Layout".to_string(),
            whiteboard: String::new(),
            creation_date: d(creation),
            date: date.map(d),
            meta_ids: Vec::new(),
            versions: Vec::new(),
            types: Vec::new(),
            severity: String::new(),
            risk_band: risk_band.map(str::to_string),
            regression: false,
            fixed: false,
            time_to_bug: None,
            time_to_confirm: None,
            commits: Vec::new(),
        }
    }

    fn no_releases() -> StaticReleases {
        StaticReleases(ReleaseHistory::default())
    }

    fn count_risk(counter: &mut SparseCounter, summary: &BugSummary) {
        match summary.risk_band.as_deref() {
            Some("l") => counter.incr("low"),
            Some("a") => counter.incr("medium"),
            _ => counter.incr("high"),
        }
    }

    #[tokio::test]
    async fn test_daily_buckets_keyed_by_fix_date() {
        let a = summary(1, "2021-01-01", Some("2021-01-10"), Some("l"));
        let b = summary(2, "2021-01-02", None, Some("h"));
        let all = vec![&a, &b];

        let series = summary_data(
            &all,
            Grouping::Daily,
            d("2021-01-01"),
            count_risk,
            None,
            |s| s.date,
            &no_releases(),
        )
        .await
        .unwrap();

        assert_eq!(series.len(), 1);
        let bucket = series.get(&BucketKey::Day(d("2021-01-10"))).unwrap();
        assert_eq!(bucket.get("low"), 1.0);
        // the unresolved record yielded no date and was skipped
        assert_eq!(bucket.get("high"), 0.0);
    }

    #[tokio::test]
    async fn test_dates_before_start_never_appear() {
        let a = summary(1, "2021-01-01", Some("2021-01-02"), Some("l"));
        let b = summary(2, "2021-01-01", Some("2021-03-05"), Some("l"));
        let all = vec![&a, &b];

        let series = summary_data(
            &all,
            Grouping::Monthly,
            d("2021-02-01"),
            count_risk,
            None,
            |s| s.date,
            &no_releases(),
        )
        .await
        .unwrap();

        // January's record is gone even from the coarser bucket
        let keys: Vec<String> = series.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, ["2021-03"]);
        assert_eq!(series.iter().map(|(_, c)| c.get("low")).sum::<f64>(), 1.0);
    }

    #[tokio::test]
    async fn test_start_date_is_inclusive() {
        let a = summary(1, "2021-01-01", Some("2021-01-01"), Some("l"));
        let all = vec![&a];

        let series = summary_data(
            &all,
            Grouping::Daily,
            d("2021-01-01"),
            count_risk,
            None,
            |s| s.date,
            &no_releases(),
        )
        .await
        .unwrap();

        assert!(series.contains(&BucketKey::Day(d("2021-01-01"))));
    }

    #[tokio::test]
    async fn test_filtered_out_records_leave_empty_bucket() {
        let a = summary(1, "2021-01-01", Some("2021-01-05"), Some("l"));
        let all = vec![&a];
        let reject_all: &dyn Fn(&BugSummary) -> bool = &|_| false;

        let series = summary_data(
            &all,
            Grouping::Daily,
            d("2021-01-01"),
            count_risk,
            Some(reject_all),
            |s| s.date,
            &no_releases(),
        )
        .await
        .unwrap();

        let bucket = series.get(&BucketKey::Day(d("2021-01-05"))).unwrap();
        assert!(bucket.is_empty());
    }

    #[tokio::test]
    async fn test_weekly_collapses_one_iso_week_onto_monday() {
        // 2021-01-04 is a Monday, 2021-01-06 the Wednesday of the same week
        let a = summary(1, "2021-01-01", Some("2021-01-04"), Some("l"));
        let b = summary(2, "2021-01-01", Some("2021-01-06"), Some("l"));
        let all = vec![&a, &b];

        let series = summary_data(
            &all,
            Grouping::Weekly,
            d("2021-01-01"),
            count_risk,
            None,
            |s| s.date,
            &no_releases(),
        )
        .await
        .unwrap();

        assert_eq!(series.len(), 1);
        let bucket = series.get(&BucketKey::Week(d("2021-01-04"))).unwrap();
        assert_eq!(bucket.get("low"), 2.0);
    }

    #[tokio::test]
    async fn test_weekly_sum_preserves_daily_totals() {
        let summaries = vec![
            summary(1, "2021-01-01", Some("2021-01-04"), Some("l")),
            summary(2, "2021-01-01", Some("2021-01-05"), Some("a")),
            summary(3, "2021-01-01", Some("2021-01-06"), Some("h")),
            summary(4, "2021-01-01", Some("2021-01-12"), Some("l")),
        ];
        let all: Vec<&BugSummary> = summaries.iter().collect();

        let daily = summary_data(
            &all,
            Grouping::Daily,
            d("2021-01-01"),
            count_risk,
            None,
            |s| s.date,
            &no_releases(),
        )
        .await
        .unwrap();
        let weekly = summary_data(
            &all,
            Grouping::Weekly,
            d("2021-01-01"),
            count_risk,
            None,
            |s| s.date,
            &no_releases(),
        )
        .await
        .unwrap();

        for label in ["low", "medium", "high"] {
            let daily_total: f64 = daily.iter().map(|(_, c)| c.get(label)).sum();
            let weekly_total: f64 = weekly.iter().map(|(_, c)| c.get(label)).sum();
            assert_eq!(daily_total, weekly_total, "label {label}");
        }
        assert_eq!(weekly.len(), 2);
    }

    #[tokio::test]
    async fn test_by_release_buckets_in_encounter_order() {
        let releases = StaticReleases(
            ReleaseHistory::from_dates(
                [
                    ("85".to_string(), "2021-01-26".to_string()),
                    ("86".to_string(), "2021-02-23".to_string()),
                ]
                .into(),
            )
            .unwrap(),
        );

        let summaries = vec![
            summary(1, "2021-01-01", Some("2021-01-10"), Some("l")), // before 85
            summary(2, "2021-01-01", Some("2021-02-01"), Some("l")), // 85
            summary(3, "2021-01-01", Some("2021-02-23"), Some("l")), // 86 release day
            summary(4, "2021-01-01", Some("2021-03-01"), Some("l")), // 86
        ];
        let all: Vec<&BugSummary> = summaries.iter().collect();

        let series = summary_data(
            &all,
            Grouping::ByRelease,
            d("2021-01-01"),
            count_risk,
            None,
            |s| s.date,
            &releases,
        )
        .await
        .unwrap();

        let keys: Vec<String> = series.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, ["unknown", "85", "86"]);
        assert_eq!(
            series
                .get(&BucketKey::Release(Some("86".to_string())))
                .unwrap()
                .get("low"),
            2.0
        );
        assert_eq!(
            series.get(&BucketKey::Release(None)).unwrap().get("low"),
            1.0
        );
    }

    #[tokio::test]
    async fn test_empty_input_yields_empty_series() {
        let all: Vec<&BugSummary> = Vec::new();
        let series = summary_data(
            &all,
            Grouping::Weekly,
            d("2021-01-01"),
            count_risk,
            None,
            |s| s.date,
            &no_releases(),
        )
        .await
        .unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn test_grouping_parse_defaults_to_daily() {
        assert_eq!(Grouping::parse("weekly"), Grouping::Weekly);
        assert_eq!(Grouping::parse("by_release"), Grouping::ByRelease);
        assert_eq!(Grouping::parse("anything"), Grouping::Daily);
    }

    #[test]
    fn test_bucket_key_display() {
        assert_eq!(BucketKey::Day(d("2021-01-05")).to_string(), "2021-01-05");
        assert_eq!(
            BucketKey::Month {
                year: 2021,
                month: 3
            }
            .to_string(),
            "2021-03"
        );
        assert_eq!(
            BucketKey::Release(Some("86".to_string())).to_string(),
            "86"
        );
        assert_eq!(BucketKey::Release(None).to_string(), "unknown");
    }
}
