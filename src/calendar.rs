//! Date-only calendar helpers shared by filtering and aggregation.
//!
//! Report artifacts carry dates as literal `YYYY-MM-DD` strings, and the same
//! few hundred strings repeat across tens of thousands of records, so parsing
//! goes through a process-wide memo cache keyed by the literal string.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::{Deserialize, Deserializer};

static PARSE_CACHE: OnceLock<Mutex<HashMap<String, NaiveDate>>> = OnceLock::new();

/// Parse a `YYYY-MM-DD` string, memoized on the literal text.
pub fn parse_date(text: &str) -> Result<NaiveDate> {
    let cache = PARSE_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    if let Ok(map) = cache.lock() {
        if let Some(date) = map.get(text) {
            return Ok(*date);
        }
    }

    let parsed: NaiveDate = text
        .parse()
        .with_context(|| format!("invalid date {:?}", text))?;

    if let Ok(mut map) = cache.lock() {
        map.insert(text.to_string(), parsed);
    }

    Ok(parsed)
}

/// The Monday of the ISO week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// (year, month) bucket key for monthly grouping.
pub fn year_month(date: NaiveDate) -> (i32, u32) {
    (date.year(), date.month())
}

/// Whole days from `from` to `to` (negative if `to` precedes `from`).
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

/// `date` minus a number of calendar months, clamped to a valid day.
pub fn months_back(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_sub_months(Months::new(months)).unwrap_or(date)
}

// Serde adapters so record date fields run through the memo cache.

pub fn date_from_str<'de, D>(deserializer: D) -> std::result::Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_date(&text).map_err(serde::de::Error::custom)
}

pub fn opt_date_from_str<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(text) => parse_date(&text).map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}
