//! Trend table storage backends + raw page capture storage for trendscout.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use trendscout_core::{lenient_utc, RunVersion, TrendMetadata, TrendRecord};
use uuid::Uuid;

mod capture;
mod memory;
mod postgres;
mod rest;
mod retry;

pub use capture::{CaptureKind, CaptureStore, StoredCapture};
pub use memory::MemoryTableStore;
pub use postgres::PgTableStore;
pub use rest::{RestStoreConfig, RestTableStore};
pub use retry::{classify_reqwest_error, classify_status, BackoffPolicy, RetryDisposition};

pub const CRATE_NAME: &str = "trendscout-storage";

pub const DEFAULT_TABLE: &str = "instagram";
pub const NEUTRAL_SENTIMENT_LABEL: &str = "neutral";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("network error: {0}")]
    Network(String),
    #[error("store API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("could not decode store response: {0}")]
    Decode(String),
    #[error("no row for topic_hashtag={0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("invalid store configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Network(err.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// JSON document stored in the `metadata` column.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RowMetadata {
    pub url: String,
    pub hashtags: Vec<String>,
    pub likes: u64,
    pub comments: u64,
    pub language: String,
    #[serde(deserialize_with = "lenient_utc::option::deserialize")]
    pub timestamp: Option<DateTime<Utc>>,
    pub version: Option<RunVersion>,
    #[serde(deserialize_with = "lenient_utc::option::deserialize")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_utc::option::deserialize")]
    pub last_seen: Option<DateTime<Utc>>,
    pub raw_blob: Option<TrendMetadata>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, JsonValue>,
}

/// Column set of the trend table as written by the pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrendRow {
    pub platform: String,
    pub topic_hashtag: String,
    pub engagement_score: f64,
    pub sentiment_polarity: f64,
    pub sentiment_label: String,
    pub posts: i64,
    pub views: i64,
    pub metadata: RowMetadata,
    #[serde(deserialize_with = "lenient_utc::deserialize")]
    pub scraped_at: DateTime<Utc>,
    pub version_id: Uuid,
}

/// Mutable columns overwritten when a hashtag is seen again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRowUpdate {
    pub engagement_score: f64,
    pub posts: i64,
    pub views: i64,
    pub metadata: RowMetadata,
    pub scraped_at: DateTime<Utc>,
    pub version_id: Uuid,
}

/// A row as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTrendRow {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(flatten)]
    pub row: TrendRow,
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl TrendRow {
    pub fn from_record(record: &TrendRecord) -> Self {
        Self {
            platform: record.platform.clone(),
            topic_hashtag: record.key().to_string(),
            engagement_score: record.engagement_score,
            sentiment_polarity: 0.0,
            sentiment_label: NEUTRAL_SENTIMENT_LABEL.to_string(),
            posts: clamp_i64(record.raw_blob.posts_count as u64),
            views: clamp_i64(record.views),
            metadata: RowMetadata {
                url: record.url.clone(),
                hashtags: record.hashtags.clone(),
                likes: record.likes,
                comments: record.comments,
                language: record.language.clone(),
                timestamp: Some(record.timestamp),
                version: Some(record.version),
                first_seen: record.first_seen,
                last_seen: record.last_seen,
                raw_blob: Some(record.raw_blob.clone()),
                extras: BTreeMap::new(),
            },
            scraped_at: record.timestamp,
            version_id: record.version.as_uuid(),
        }
    }

    pub fn to_update(&self) -> TrendRowUpdate {
        TrendRowUpdate {
            engagement_score: self.engagement_score,
            posts: self.posts,
            views: self.views,
            metadata: self.metadata.clone(),
            scraped_at: self.scraped_at,
            version_id: self.version_id,
        }
    }

    pub fn apply_update(&mut self, update: &TrendRowUpdate) {
        self.engagement_score = update.engagement_score;
        self.posts = update.posts;
        self.views = update.views;
        self.metadata = update.metadata.clone();
        self.scraped_at = update.scraped_at;
        self.version_id = update.version_id;
    }
}

/// Keyed trend table. Rows are keyed by the literal `#tag` string.
#[async_trait]
pub trait TrendStore: Send + Sync {
    /// Human-readable target, used in logs and reports.
    fn describe(&self) -> String;

    async fn select_by_key(&self, topic_hashtag: &str) -> Result<Option<StoredTrendRow>, StoreError>;

    /// Most recently scraped rows first.
    async fn select_latest(&self, limit: usize) -> Result<Vec<StoredTrendRow>, StoreError>;

    async fn insert(&self, row: &TrendRow) -> Result<StoredTrendRow, StoreError>;

    async fn update(
        &self,
        topic_hashtag: &str,
        update: &TrendRowUpdate,
    ) -> Result<StoredTrendRow, StoreError>;

    /// Returns the number of rows removed.
    async fn delete(&self, topic_hashtag: &str) -> Result<usize, StoreError>;
}
