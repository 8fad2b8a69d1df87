//! Trend run pipeline: configuration, discovery, aggregation, persistence and reports.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;
use trendscout_adapters::{BrowserlessConfig, BrowserlessSession, FixtureSession, PageSession};
use trendscout_core::{CategoryRule, CategoryTable};
use trendscout_storage::{BackoffPolicy, PgTableStore, RestStoreConfig, RestTableStore, TrendStore};

mod aggregate;
mod collector;
mod config;
mod diagnostics;
mod orchestrator;
mod report;
mod schedule;
mod upsert;

pub use aggregate::{EngagementAggregator, EstimationPolicy, FixedMultiplier, NoEstimation, RandomEstimation};
pub use collector::{collect, normalize_tag, DiscoverySettings};
pub use config::{load_scout_config_from_env, ConfigError, ScoutConfig, StoreBackend};
pub use diagnostics::{
    check_store, latest_summary, LatestRow, LatestSummary, ProbeResult, ProbeStep, PROBE_HASHTAG,
};
pub use orchestrator::{
    ExtractionNote, FailureKind, HashtagFailure, PacingDelay, RunError, RunOrchestrator, RunReport,
    RunState, TrendResult,
};
pub use report::{render_brief, write_run_reports, ParquetManifest, ParquetManifestFile};
pub use schedule::{build_scheduler, cron_for_hours};
pub use upsert::{upsert, UpsertOutcome, WriteFailed};

pub const CRATE_NAME: &str = "trendscout-sync";

const PAGE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct CategoryRulesFile {
    rules: Vec<CategoryRule>,
}

/// Load the ordered category table, or the built-in one if `path` does not exist.
pub fn load_category_table(path: &Path) -> Result<CategoryTable> {
    if !path.exists() {
        info!(path = %path.display(), "no category rules file; using built-in table");
        return Ok(CategoryTable::builtin());
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let file: CategoryRulesFile =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    anyhow::ensure!(!file.rules.is_empty(), "{} defines no categories", path.display());
    Ok(CategoryTable { rules: file.rules })
}

pub async fn build_store(config: &ScoutConfig) -> Result<Arc<dyn TrendStore>, RunError> {
    match config.store_backend() {
        StoreBackend::Postgres => {
            let store = PgTableStore::connect(config.store_url.trim(), &config.store_table)
                .await
                .map_err(|e| RunError::unavailable("postgres store", e))?;
            Ok(Arc::new(store))
        }
        StoreBackend::Rest => {
            let store = RestTableStore::new(RestStoreConfig {
                base_url: config.store_url.clone(),
                api_key: config.store_key.clone(),
                table: config.store_table.clone(),
                timeout: config.store_timeout,
                backoff: BackoffPolicy::default(),
            })
            .map_err(|e| RunError::unavailable("rest store", e))?;
            Ok(Arc::new(store))
        }
    }
}

/// Replay captured pages when `PAGE_FIXTURES_DIR` is set, otherwise drive Browserless.
pub fn build_session(config: &ScoutConfig) -> Result<Arc<dyn PageSession>, RunError> {
    if let Some(root) = &config.page_fixtures_dir {
        return Ok(Arc::new(FixtureSession::new(root.clone())));
    }
    let session = BrowserlessSession::new(BrowserlessConfig {
        base_url: config.browserless_url.clone(),
        token: config.browserless_token.clone(),
        options: config.browser.clone(),
        timeout: PAGE_TIMEOUT,
    })
    .map_err(|e| RunError::unavailable("browserless", e))?;
    Ok(Arc::new(session))
}

/// Validate the configuration and wire the production collaborators.
pub async fn build_orchestrator(config: ScoutConfig) -> Result<RunOrchestrator, RunError> {
    config.validate()?;
    let categories = load_category_table(&config.category_rules_path).map_err(|err| {
        ConfigError::InvalidEnvVar {
            var: "CATEGORY_RULES_PATH".to_string(),
            reason: format!("{err:#}"),
        }
    })?;
    let session = build_session(&config)?;
    let store = build_store(&config).await?;
    Ok(RunOrchestrator::new(config, session, store).with_categories(categories))
}

pub async fn run_once(config: ScoutConfig) -> Result<RunReport, RunError> {
    build_orchestrator(config).await?.run().await
}

pub async fn run_once_from_env() -> Result<RunReport, RunError> {
    run_once(load_scout_config_from_env()?).await
}
