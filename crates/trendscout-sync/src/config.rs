use std::env::VarError;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use trendscout_adapters::{BrowserOptions, Credentials};
use trendscout_core::DiscoveryParameters;
use trendscout_storage::DEFAULT_TABLE;

use crate::collector::DiscoverySettings;
use crate::orchestrator::PacingDelay;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// PostgREST endpoint (Supabase project URL).
    Rest,
    /// Direct Postgres connection string.
    Postgres,
}

#[derive(Debug, Clone)]
pub struct ScoutConfig {
    pub credentials: Credentials,
    pub discovery: DiscoverySettings,
    pub store_url: String,
    pub store_key: String,
    pub store_table: String,
    pub store_timeout: Duration,
    pub schedule_hours: u32,
    pub browser: BrowserOptions,
    pub browserless_url: String,
    pub browserless_token: Option<String>,
    pub page_fixtures_dir: Option<PathBuf>,
    pub artifacts_dir: Option<PathBuf>,
    pub reports_dir: PathBuf,
    pub category_rules_path: PathBuf,
    pub hashtag_delay: PacingDelay,
}

impl ScoutConfig {
    pub fn store_backend(&self) -> StoreBackend {
        let url = self.store_url.trim();
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            StoreBackend::Postgres
        } else {
            StoreBackend::Rest
        }
    }

    pub fn discovery_parameters(&self) -> DiscoveryParameters {
        DiscoveryParameters {
            posts_per_hashtag: self.discovery.sample_size,
            posts_to_scan: self.discovery.posts_to_scan,
            scroll_count: self.discovery.scroll_count,
            min_frequency: self.discovery.min_frequency,
        }
    }

    /// Fail closed on anything a run cannot proceed without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.credentials.username.trim().is_empty() {
            problems.push("INSTAGRAM_USERNAME is blank".to_string());
        }
        if self.credentials.password.trim().is_empty() {
            problems.push("INSTAGRAM_PASSWORD is blank".to_string());
        }
        if self.store_url.trim().is_empty() {
            problems.push("SUPABASE_URL is blank".to_string());
        }
        if self.store_backend() == StoreBackend::Rest && self.store_key.trim().is_empty() {
            problems.push("SUPABASE_KEY is blank".to_string());
        }
        if self.discovery.scroll_count < 1 {
            problems.push("SCROLL_COUNT must be at least 1".to_string());
        }
        if self.discovery.posts_to_scan < 1 {
            problems.push("POSTS_TO_SCAN must be at least 1".to_string());
        }
        if !(1..=23).contains(&self.schedule_hours) {
            problems.push(format!(
                "SCHEDULE_HOURS must be between 1 and 23, got {}",
                self.schedule_hours
            ));
        }
        if self.hashtag_delay.min > self.hashtag_delay.max {
            problems.push("HASHTAG_DELAY_MIN_MS exceeds HASHTAG_DELAY_MAX_MS".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(problems))
        }
    }
}

/// Read configuration from the process environment.
///
/// Parsing only; call [`ScoutConfig::validate`] before using it for a run.
pub fn load_scout_config_from_env() -> Result<ScoutConfig, ConfigError> {
    build_scout_config(|key| std::env::var(key))
}

pub(crate) fn build_scout_config<F>(lookup: F) -> Result<ScoutConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let optional = |var: &str| -> Option<String> {
        lookup(var).ok().filter(|v| !v.trim().is_empty())
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        let raw = or_default(var, default);
        raw.trim().parse::<u32>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        let raw = or_default(var, default);
        raw.trim().parse::<usize>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_bool = |var: &str, default: &str| -> Result<bool, ConfigError> {
        let raw = or_default(var, default);
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" | "" => Ok(false),
            other => Err(ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: format!("expected true/false, got {other:?}"),
            }),
        }
    };

    let credentials = Credentials {
        username: or_default("INSTAGRAM_USERNAME", ""),
        password: or_default("INSTAGRAM_PASSWORD", ""),
    };

    let discovery = DiscoverySettings {
        scroll_count: parse_u32("SCROLL_COUNT", "15")?,
        posts_to_scan: parse_usize("POSTS_TO_SCAN", "400")?,
        min_frequency: parse_u32("MIN_HASHTAG_FREQUENCY", "1")?,
        top_n: parse_usize("TOP_HASHTAGS_TO_SAVE", "10")?,
        sample_size: parse_usize("POSTS_PER_HASHTAG", "3")?,
    };

    let browser = BrowserOptions {
        headless: parse_bool("HEADLESS", "false")?,
        viewport_width: parse_u32("VIEWPORT_WIDTH", "1920")?,
        viewport_height: parse_u32("VIEWPORT_HEIGHT", "1080")?,
        locale: or_default("BROWSER_LOCALE", "en-US"),
        timezone: or_default("BROWSER_TIMEZONE", "Asia/Kolkata"),
    };

    Ok(ScoutConfig {
        credentials,
        discovery,
        store_url: or_default("SUPABASE_URL", ""),
        store_key: or_default("SUPABASE_KEY", ""),
        store_table: or_default("SUPABASE_TABLE", DEFAULT_TABLE),
        store_timeout: Duration::from_secs(parse_u64("STORE_TIMEOUT_SECS", "20")?),
        schedule_hours: parse_u32("SCHEDULE_HOURS", "3")?,
        browser,
        browserless_url: or_default("BROWSERLESS_URL", "http://localhost:3000"),
        browserless_token: optional("BROWSERLESS_TOKEN"),
        page_fixtures_dir: optional("PAGE_FIXTURES_DIR").map(PathBuf::from),
        artifacts_dir: optional("ARTIFACTS_DIR").map(PathBuf::from),
        reports_dir: PathBuf::from(or_default("REPORTS_DIR", "./reports")),
        category_rules_path: PathBuf::from(or_default(
            "CATEGORY_RULES_PATH",
            "./rules/categories.yaml",
        )),
        hashtag_delay: PacingDelay {
            min: Duration::from_millis(parse_u64("HASHTAG_DELAY_MIN_MS", "3000")?),
            max: Duration::from_millis(parse_u64("HASHTAG_DELAY_MAX_MS", "5000")?),
        },
    })
}
