use anyhow::Result;
use chrono::Utc;
use url::Url;

use riskboard::aggregate::Grouping;
use riskboard::artifacts::ArtifactClient;
use riskboard::cache::SqliteStore;
use riskboard::charts::{self, ChartRenderer, JsonRenderer};
use riskboard::filters::filter_summaries;
use riskboard::logging::{json_log, obj, v_num, v_str};
use riskboard::model::{component_regression_map, BugSummary, REGRESSION_PROBABILITY_THRESHOLD};
use riskboard::state::{Config, OptionStore};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let store = SqliteStore::new(&cfg.sqlite_path)?;
    store.init()?;
    let client = ArtifactClient::new(cfg.clone(), store);

    let report = client.landings().await?;
    json_log(
        "system",
        obj(&[
            ("event", v_str("landings_loaded")),
            ("days", v_num(report.summaries.len() as f64)),
            ("feature_metabugs", v_num(report.feature_meta_bugs.len() as f64)),
        ]),
    );

    let mut options = OptionStore::new();
    options.seed_defaults(report.all_summaries());
    let url = Url::parse(&format!("http://localhost/?{}", cfg.query))?;
    options.apply_query(&url);

    let all: Vec<&BugSummary> = report.all_summaries().collect();
    let filtered = filter_summaries(&all, &options)?;
    json_log(
        "filter",
        obj(&[
            ("total", v_num(all.len() as f64)),
            ("kept", v_num(filtered.len() as f64)),
        ]),
    );

    let grouping = Grouping::parse(options.get("grouping").as_text().unwrap_or("daily"));
    let today = Utc::now().date_naive();
    let renderer = JsonRenderer;

    if let Some(chart) = charts::risk_chart(&filtered, grouping, today, &client).await? {
        renderer.render(&chart);
    }
    if let Some(chart) = charts::regressions_chart(&filtered, grouping, &client).await? {
        renderer.render(&chart);
    }
    let known_types: Vec<String> = options
        .get("types")
        .as_multi()
        .map(|types| types.to_vec())
        .unwrap_or_default();
    if let Some(chart) = charts::types_chart(&filtered, grouping, &known_types, &client).await? {
        renderer.render(&chart);
    }
    if let Some(chart) = charts::fix_times_chart(&filtered, grouping, &client).await? {
        renderer.render(&chart);
    }
    if let Some(chart) = charts::time_to_bug_chart(&filtered, grouping, &client).await? {
        renderer.render(&chart);
    }
    if let Some(chart) = charts::time_to_confirm_chart(&filtered, grouping, &client).await? {
        renderer.render(&chart);
    }
    if let Some(chart) = charts::testing_chart(&filtered) {
        renderer.render(&chart);
    }

    let connections = client.connections().await?;
    let regression_map = component_regression_map(&connections, REGRESSION_PROBABILITY_THRESHOLD);
    json_log(
        "system",
        obj(&[
            ("event", v_str("component_regression_map")),
            ("components", v_num(regression_map.len() as f64)),
        ]),
    );

    Ok(())
}
