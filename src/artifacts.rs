//! Remote report artifacts: cached fetches, exactly-once memoization, and the
//! release-history collaborator.
//!
//! The two report fetches are process-wide singletons: the first caller
//! starts the fetch, every caller (before or after completion) observes the
//! same outcome, success or failure. The TTL cache in front of them is what
//! keeps a restarted process off the network for half an hour.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use crate::cache::{CacheStore, ExpireCache};
use crate::calendar;
use crate::logging::{json_log, obj, v_num, v_str};
use crate::model::{BugSummary, ComponentConnection, FeatureMetaBug};
use crate::state::Config;

const LANDINGS_KEY: &str = "landings_by_date";
const CONNECTIONS_KEY: &str = "component_connections";

#[derive(Debug, Deserialize)]
struct RawLandings {
    summaries: HashMap<String, Vec<BugSummary>>,
    #[serde(rename = "featureMetaBugs", default)]
    feature_meta_bugs: Vec<FeatureMetaBug>,
}

/// Landings report with its dates parsed and ordered ascending.
#[derive(Debug)]
pub struct LandingsReport {
    pub summaries: Vec<(NaiveDate, Vec<BugSummary>)>,
    pub feature_meta_bugs: Vec<FeatureMetaBug>,
}

impl LandingsReport {
    fn from_raw(raw: RawLandings) -> Result<Self> {
        let mut summaries = raw
            .summaries
            .into_iter()
            .map(|(date, bugs)| Ok((calendar::parse_date(&date)?, bugs)))
            .collect::<Result<Vec<_>>>()?;
        // calendar order, not string order
        summaries.sort_by_key(|(date, _)| *date);
        Ok(Self {
            summaries,
            feature_meta_bugs: raw.feature_meta_bugs,
        })
    }

    /// All records, flattened in ascending landing-date order.
    pub fn all_summaries(&self) -> impl Iterator<Item = &BugSummary> {
        self.summaries.iter().flat_map(|(_, bugs)| bugs.iter())
    }
}

// =============================================================================
// Release history
// =============================================================================

/// (version, release date) pairs ordered by release date ascending.
#[derive(Debug, Clone, Default)]
pub struct ReleaseHistory {
    releases: Vec<(String, NaiveDate)>,
}

impl ReleaseHistory {
    pub fn from_dates(dates: HashMap<String, String>) -> Result<Self> {
        let mut releases = dates
            .into_iter()
            .map(|(version, date)| Ok((version, calendar::parse_date(&date)?)))
            .collect::<Result<Vec<_>>>()?;
        releases.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(Self { releases })
    }

    /// The latest version released on or before `date`; `None` when `date`
    /// precedes the earliest known release.
    pub fn version_for(&self, date: NaiveDate) -> Option<&str> {
        let mut version = None;
        for (candidate, released) in &self.releases {
            if *released > date {
                break;
            }
            version = Some(candidate.as_str());
        }
        version
    }

    pub fn len(&self) -> usize {
        self.releases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }
}

#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn releases(&self) -> Result<ReleaseHistory>;
}

/// Fixed history, for tests and offline runs.
pub struct StaticReleases(pub ReleaseHistory);

#[async_trait]
impl ReleaseSource for StaticReleases {
    async fn releases(&self) -> Result<ReleaseHistory> {
        Ok(self.0.clone())
    }
}

// =============================================================================
// Artifact client
// =============================================================================

pub struct ArtifactClient<S> {
    http: Client,
    cache: ExpireCache<S>,
    cfg: Config,
    landings: OnceCell<std::result::Result<Arc<LandingsReport>, String>>,
    connections: OnceCell<std::result::Result<Arc<Vec<ComponentConnection>>, String>>,
}

impl<S: CacheStore> ArtifactClient<S> {
    pub fn new(cfg: Config, store: S) -> Self {
        Self {
            http: Client::new(),
            cache: ExpireCache::new(store),
            cfg,
            landings: OnceCell::new(),
            connections: OnceCell::new(),
        }
    }

    /// The landings report singleton.
    pub async fn landings(&self) -> Result<Arc<LandingsReport>> {
        let outcome = self
            .landings
            .get_or_init(|| async {
                match self.load_landings().await {
                    Ok(report) => Ok(Arc::new(report)),
                    Err(err) => Err(format!("{err:#}")),
                }
            })
            .await;
        outcome
            .clone()
            .map_err(|err| anyhow!("landings artifact failed: {err}"))
    }

    /// The component-connections report singleton.
    pub async fn connections(&self) -> Result<Arc<Vec<ComponentConnection>>> {
        let outcome = self
            .connections
            .get_or_init(|| async {
                match self.load_connections().await {
                    Ok(connections) => Ok(Arc::new(connections)),
                    Err(err) => Err(format!("{err:#}")),
                }
            })
            .await;
        outcome
            .clone()
            .map_err(|err| anyhow!("component connections artifact failed: {err}"))
    }

    async fn load_landings(&self) -> Result<LandingsReport> {
        let json = self
            .fetch_cached(LANDINGS_KEY, &self.cfg.landings_url)
            .await?;
        let raw: RawLandings =
            serde_json::from_value(json).context("unexpected landings artifact shape")?;
        LandingsReport::from_raw(raw)
    }

    async fn load_connections(&self) -> Result<Vec<ComponentConnection>> {
        let json = self
            .fetch_cached(CONNECTIONS_KEY, &self.cfg.connections_url)
            .await?;
        serde_json::from_value(json).context("unexpected component connections shape")
    }

    /// Cache-through fetch of one artifact. Reports regenerate upstream a few
    /// times a day; `cache_ttl_secs` (30 minutes by default) bounds reuse.
    async fn fetch_cached(&self, key: &str, url: &str) -> Result<Value> {
        if let Some(hit) = self.cache.get(key).await {
            json_log(
                "artifact",
                obj(&[("artifact", v_str(key)), ("source", v_str("cache"))]),
            );
            return Ok(hit);
        }

        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("fetching {url}"))?;
        let body = response.error_for_status()?.bytes().await?;
        json_log(
            "artifact",
            obj(&[
                ("artifact", v_str(key)),
                ("source", v_str("fetch")),
                ("bytes", v_num(body.len() as f64)),
                ("sha256", v_str(&payload_sha256(&body))),
            ]),
        );

        let json: Value = serde_json::from_slice(&body).context("artifact is not JSON")?;
        self.cache
            .set(key, json.clone(), Some(self.cfg.cache_ttl_secs))
            .await;
        Ok(json)
    }
}

#[async_trait]
impl<S: CacheStore> ReleaseSource for ArtifactClient<S> {
    // The release-history service is cheap and versioned by its publisher;
    // it is fetched fresh on every by-release aggregation.
    async fn releases(&self) -> Result<ReleaseHistory> {
        let response = self
            .http
            .get(&self.cfg.releases_url)
            .send()
            .await
            .with_context(|| format!("fetching {}", self.cfg.releases_url))?;
        let dates: HashMap<String, String> = response.error_for_status()?.json().await?;
        ReleaseHistory::from_dates(dates)
    }
}

fn payload_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
