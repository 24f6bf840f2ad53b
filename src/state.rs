//! Process configuration and the dashboard option registry.
//!
//! Options are declared once, populated from the URL query string and/or
//! data-derived defaults, and mutated on user interaction. The query string
//! is the only persisted option state: every change is re-encoded into it,
//! and a fresh process reads it back losslessly.

use std::collections::{BTreeSet, HashMap};

use url::Url;

use crate::logging::{json_log, obj, v_str};
use crate::model::BugSummary;

#[derive(Clone)]
pub struct Config {
    pub landings_url: String,
    pub connections_url: String,
    pub releases_url: String,
    pub sqlite_path: String,
    pub cache_ttl_secs: u64,
    /// Dashboard query string, e.g. "grouping=weekly&components=Core".
    pub query: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            landings_url: std::env::var("LANDINGS_URL").unwrap_or_else(|_| "https://community-tc.services.mozilla.com/api/index/v1/task/project.bugbug.landings_risk_report.latest/artifacts/public/landings_by_date.json".to_string()),
            connections_url: std::env::var("COMPONENT_CONNECTIONS_URL").unwrap_or_else(|_| "https://community-tc.services.mozilla.com/api/index/v1/task/project.bugbug.landings_risk_report.latest/artifacts/public/component_connections.json".to_string()),
            releases_url: std::env::var("RELEASES_URL").unwrap_or_else(|_| "https://product-details.mozilla.org/1.0/firefox_history_major_releases.json".to_string()),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./riskboard.sqlite".to_string()),
            cache_ttl_secs: std::env::var("CACHE_TTL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(60 * 30),
            query: std::env::var("QUERY").unwrap_or_default(),
        }
    }
}

// =============================================================================
// Options
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Text,
    Checkbox,
    Select,
    Radio,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Unset,
    Text(String),
    Flag(bool),
    Multi(Vec<String>),
}

impl OptionValue {
    /// Non-empty text; an unset or empty option disables its filter.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            OptionValue::Text(text) if !text.is_empty() => Some(text),
            _ => None,
        }
    }

    /// Non-empty selection; an unset or empty option disables its filter.
    pub fn as_multi(&self) -> Option<&[String]> {
        match self {
            OptionValue::Multi(values) if !values.is_empty() => Some(values),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> bool {
        matches!(self, OptionValue::Flag(true))
    }
}

struct OptionEntry {
    kind: OptionKind,
    value: OptionValue,
}

const OPTION_DEFS: &[(&str, OptionKind)] = &[
    ("metaBugID", OptionKind::Text),
    ("testingTags", OptionKind::Select),
    ("fixStartDate", OptionKind::Text),
    ("fixEndDate", OptionKind::Text),
    ("createStartDate", OptionKind::Text),
    ("createEndDate", OptionKind::Text),
    ("whiteBoard", OptionKind::Text),
    ("components", OptionKind::Select),
    ("teams", OptionKind::Select),
    ("grouping", OptionKind::Radio),
    ("releaseVersions", OptionKind::Select),
    ("includeUnfixed", OptionKind::Checkbox),
    ("types", OptionKind::Select),
    ("severities", OptionKind::Select),
    ("riskiness", OptionKind::Select),
    ("changeGrouping", OptionKind::Select),
];

static UNSET: OptionValue = OptionValue::Unset;

type ChangeCallback = Box<dyn Fn(&str) + Send + Sync>;

pub struct OptionStore {
    entries: HashMap<&'static str, OptionEntry>,
    on_change: Option<ChangeCallback>,
}

impl Default for OptionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionStore {
    pub fn new() -> Self {
        let entries = OPTION_DEFS
            .iter()
            .map(|&(name, kind)| {
                (
                    name,
                    OptionEntry {
                        kind,
                        value: OptionValue::Unset,
                    },
                )
            })
            .collect();
        Self {
            entries,
            on_change: None,
        }
    }

    /// Callback fired after every user-driven change.
    pub fn on_change(&mut self, callback: ChangeCallback) {
        self.on_change = Some(callback);
    }

    pub fn get(&self, name: &str) -> &OptionValue {
        match self.entries.get(name) {
            Some(entry) => &entry.value,
            None => &UNSET,
        }
    }

    pub fn kind(&self, name: &str) -> Option<OptionKind> {
        self.entries.get(name).map(|entry| entry.kind)
    }

    /// Set a value without touching the URL or firing the callback; used for
    /// setup-time population.
    pub fn set(&mut self, name: &str, value: OptionValue) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.value = value;
        }
    }

    /// User-driven change: update the value, rewrite the query string in
    /// place, then fire the change callback.
    pub fn update(&mut self, name: &str, value: OptionValue, url: &mut Url) {
        let entry = match self.entries.get_mut(name) {
            Some(entry) => entry,
            None => return,
        };
        entry.value = value;
        let encoded = encode(entry.kind, &entry.value);
        replace_query_param(url, name, &encoded);
        json_log(
            "options",
            obj(&[("option", v_str(name)), ("query", v_str(url.query().unwrap_or("")))]),
        );
        if let Some(callback) = &self.on_change {
            callback(name);
        }
    }

    /// Populate values from a URL's query parameters. Absent parameters leave
    /// the current (default) value alone.
    pub fn apply_query(&mut self, url: &Url) {
        for &(name, kind) in OPTION_DEFS {
            let values: Vec<String> = url
                .query_pairs()
                .filter(|(key, _)| key == name)
                .map(|(_, value)| value.into_owned())
                .collect();
            if values.is_empty() {
                continue;
            }
            let decoded = decode(kind, &values);
            self.set(name, decoded);
        }
    }

    /// Data-derived defaults, applied before the query string so explicit
    /// parameters win: every observed component/team/severity selected, every
    /// observed type plus "unknown" selected, the two most recent release
    /// versions selected, daily grouping.
    pub fn seed_defaults<'a>(&mut self, summaries: impl Iterator<Item = &'a BugSummary>) {
        let mut components = BTreeSet::new();
        let mut teams = BTreeSet::new();
        let mut types = BTreeSet::new();
        let mut severities = BTreeSet::new();
        let mut versions = BTreeSet::new();

        for summary in summaries {
            components.insert(summary.component.clone());
            teams.insert(summary.team.clone());
            severities.insert(summary.severity.clone());
            for t in &summary.types {
                types.insert(t.clone());
            }
            for v in &summary.versions {
                versions.insert(*v);
            }
        }
        types.insert("unknown".to_string());

        self.set("components", OptionValue::Multi(components.into_iter().collect()));
        self.set("teams", OptionValue::Multi(teams.into_iter().collect()));
        self.set("types", OptionValue::Multi(types.into_iter().collect()));
        self.set("severities", OptionValue::Multi(severities.into_iter().collect()));

        // the two most recent releases by default
        let recent: Vec<String> = versions
            .into_iter()
            .rev()
            .take(2)
            .map(|v| v.to_string())
            .collect();
        self.set("releaseVersions", OptionValue::Multi(recent));

        if self.get("grouping") == &OptionValue::Unset {
            self.set("grouping", OptionValue::Text("daily".to_string()));
        }
    }
}

fn encode(kind: OptionKind, value: &OptionValue) -> Vec<String> {
    match (kind, value) {
        (OptionKind::Text | OptionKind::Radio, OptionValue::Text(text)) => vec![text.clone()],
        (OptionKind::Checkbox, OptionValue::Flag(flag)) => {
            vec![if *flag { "1" } else { "0" }.to_string()]
        }
        (OptionKind::Select, OptionValue::Multi(values)) => values.clone(),
        _ => Vec::new(),
    }
}

fn decode(kind: OptionKind, values: &[String]) -> OptionValue {
    match kind {
        OptionKind::Text | OptionKind::Radio => values
            .first()
            .map(|v| OptionValue::Text(v.clone()))
            .unwrap_or(OptionValue::Unset),
        OptionKind::Checkbox => values
            .first()
            .map(|v| OptionValue::Flag(v != "0" && v != "false"))
            .unwrap_or(OptionValue::Unset),
        OptionKind::Select => OptionValue::Multi(values.to_vec()),
    }
}

/// Replace every `name` parameter in the URL with the given values.
fn replace_query_param(url: &mut Url, name: &str, values: &[String]) {
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != name)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (key, value) in &retained {
            pairs.append_pair(key, value);
        }
        for value in values {
            pairs.append_pair(name, value);
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn base_url() -> Url {
        Url::parse("http://localhost/").unwrap()
    }

    #[test]
    fn test_declared_options_start_unset() {
        let store = OptionStore::new();
        assert_eq!(store.get("metaBugID"), &OptionValue::Unset);
        assert_eq!(store.kind("includeUnfixed"), Some(OptionKind::Checkbox));
        assert_eq!(store.kind("nonexistent"), None);
    }

    #[test]
    fn test_select_round_trips_through_url() {
        let mut url = base_url();
        let mut store = OptionStore::new();
        store.update(
            "components",
            OptionValue::Multi(vec!["a".to_string(), "b".to_string()]),
            &mut url,
        );

        let mut fresh = OptionStore::new();
        fresh.apply_query(&url);
        let values = fresh.get("components").as_multi().unwrap();
        assert_eq!(values, ["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_checkbox_encodes_one_zero() {
        let mut url = base_url();
        let mut store = OptionStore::new();
        store.update("includeUnfixed", OptionValue::Flag(true), &mut url);
        assert_eq!(url.query(), Some("includeUnfixed=1"));

        let mut fresh = OptionStore::new();
        fresh.apply_query(&url);
        assert!(fresh.get("includeUnfixed").as_flag());

        store.update("includeUnfixed", OptionValue::Flag(false), &mut url);
        let mut fresh = OptionStore::new();
        fresh.apply_query(&url);
        assert!(!fresh.get("includeUnfixed").as_flag());
    }

    #[test]
    fn test_checkbox_decodes_false_spellings() {
        let mut store = OptionStore::new();
        store.apply_query(&Url::parse("http://localhost/?includeUnfixed=false").unwrap());
        assert!(!store.get("includeUnfixed").as_flag());

        let mut store = OptionStore::new();
        store.apply_query(&Url::parse("http://localhost/?includeUnfixed=yes").unwrap());
        assert!(store.get("includeUnfixed").as_flag());
    }

    #[test]
    fn test_update_replaces_instead_of_appending() {
        let mut url = base_url();
        let mut store = OptionStore::new();
        store.update("whiteBoard", OptionValue::Text("perf".to_string()), &mut url);
        store.update("whiteBoard", OptionValue::Text("sec".to_string()), &mut url);
        assert_eq!(url.query(), Some("whiteBoard=sec"));
    }

    #[test]
    fn test_update_fires_callback() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let mut store = OptionStore::new();
        store.on_change(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let mut url = base_url();
        store.update("grouping", OptionValue::Text("weekly".to_string()), &mut url);
        store.update("includeUnfixed", OptionValue::Flag(true), &mut url);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_empty_values_disable_filters() {
        assert_eq!(OptionValue::Text(String::new()).as_text(), None);
        assert_eq!(OptionValue::Multi(Vec::new()).as_multi(), None);
        assert_eq!(OptionValue::Unset.as_text(), None);
    }

    #[test]
    fn test_query_parameters_override_defaults() {
        let mut store = OptionStore::new();
        store.set(
            "components",
            OptionValue::Multi(vec!["Core".to_string(), "DOM".to_string()]),
        );
        store.apply_query(&Url::parse("http://localhost/?components=Core").unwrap());
        assert_eq!(
            store.get("components").as_multi().unwrap(),
            ["Core".to_string()]
        );
    }
}
