//! Predicate filtering of change records by the active option set.
//!
//! Predicates are conjunctive: every enabled filter must pass. A filter is
//! enabled when its option holds a non-empty value. Order of the input is
//! preserved; the input itself is never mutated.

use anyhow::Result;

use crate::calendar;
use crate::model::BugSummary;
use crate::state::OptionStore;

/// Commit-less records pass the testing-tags predicate only when the release
/// filter carries the "N/A" choice. testingTags is coupled to releaseVersions
/// here; kept as-is pending confirmation against real data.
pub fn commitless_pass_allowed(release_versions: Option<&[String]>) -> bool {
    release_versions.is_some_and(|versions| versions.iter().any(|v| v == "N/A"))
}

pub fn filter_summaries<'a>(
    summaries: &[&'a BugSummary],
    options: &OptionStore,
) -> Result<Vec<&'a BugSummary>> {
    let mut kept: Vec<&BugSummary> = summaries.to_vec();

    if let Some(meta) = options.get("metaBugID").as_text() {
        // a non-numeric ID matches nothing
        let wanted = meta.parse::<i64>().ok();
        kept.retain(|s| wanted.is_some_and(|id| s.meta_ids.contains(&id)));
    }

    if let Some(text) = options.get("fixStartDate").as_text() {
        let start = calendar::parse_date(text)?;
        kept.retain(|s| s.date.is_some_and(|d| d >= start));
    }

    if let Some(text) = options.get("fixEndDate").as_text() {
        let end = calendar::parse_date(text)?;
        kept.retain(|s| s.date.is_some_and(|d| d <= end));
    }

    if let Some(text) = options.get("createStartDate").as_text() {
        let start = calendar::parse_date(text)?;
        kept.retain(|s| s.creation_date >= start);
    }

    if let Some(text) = options.get("createEndDate").as_text() {
        let end = calendar::parse_date(text)?;
        kept.retain(|s| s.creation_date <= end);
    }

    if let Some(tags) = options.get("testingTags").as_multi() {
        let include_unknown = tags.iter().any(|t| t == "unknown");
        let commitless_ok = commitless_pass_allowed(options.get("releaseVersions").as_multi());
        kept.retain(|s| {
            (commitless_ok && s.commits.is_empty())
                || s.commits.iter().any(|c| match &c.testing {
                    None => include_unknown,
                    Some(tag) => tags.contains(tag),
                })
        });
    }

    if let Some(components) = options.get("components").as_multi() {
        kept.retain(|s| components.contains(&s.component));
    }

    if let Some(teams) = options.get("teams").as_multi() {
        kept.retain(|s| teams.contains(&s.team));
    }

    if let Some(text) = options.get("whiteBoard").as_text() {
        kept.retain(|s| s.whiteboard.contains(text));
    }

    if let Some(versions) = options.get("releaseVersions").as_multi() {
        let include_unfixed = options.get("includeUnfixed").as_flag();
        kept.retain(|s| {
            (include_unfixed && s.versions.is_empty())
                || versions
                    .iter()
                    .any(|v| v.parse::<u32>().is_ok_and(|v| s.versions.contains(&v)))
        });
    }

    if let Some(types) = options.get("types").as_multi() {
        // selecting "unknown" turns the type filter into a pass-through
        if !types.iter().any(|t| t == "unknown") {
            kept.retain(|s| s.types.iter().any(|t| types.contains(t)));
        }
    }

    if let Some(severities) = options.get("severities").as_multi() {
        kept.retain(|s| severities.contains(&s.severity));
    }

    if let Some(riskiness) = options.get("riskiness").as_multi() {
        let include_unscored = riskiness.iter().any(|r| r == "N/A");
        kept.retain(|s| match &s.risk_band {
            None => include_unscored,
            Some(band) => riskiness.contains(band),
        });
    }

    Ok(kept)
}
