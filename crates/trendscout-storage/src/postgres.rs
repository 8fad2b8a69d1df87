use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::{RowMetadata, StoreError, StoredTrendRow, TrendRow, TrendRowUpdate, TrendStore};

const COLUMNS: &str = "id, platform, topic_hashtag, engagement_score, sentiment_polarity, \
     sentiment_label, posts, views, metadata, scraped_at, version_id";

/// Direct Postgres access to the trend table, for self-hosted deployments.
#[derive(Debug, Clone)]
pub struct PgTableStore {
    pool: PgPool,
    table: String,
}

fn valid_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl PgTableStore {
    pub async fn connect(database_url: &str, table: &str) -> Result<Self, StoreError> {
        if !valid_identifier(table) {
            return Err(StoreError::Config(format!("invalid table name {table:?}")));
        }
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!(table = %self.table, "migrations applied");
        Ok(())
    }

    fn decode(row: &PgRow) -> Result<StoredTrendRow, StoreError> {
        let metadata: Json<RowMetadata> = row.try_get("metadata")?;
        Ok(StoredTrendRow {
            id: row.try_get("id")?,
            row: TrendRow {
                platform: row.try_get("platform")?,
                topic_hashtag: row.try_get("topic_hashtag")?,
                engagement_score: row.try_get("engagement_score")?,
                sentiment_polarity: row.try_get("sentiment_polarity")?,
                sentiment_label: row.try_get("sentiment_label")?,
                posts: row.try_get("posts")?,
                views: row.try_get("views")?,
                metadata: metadata.0,
                scraped_at: row.try_get::<DateTime<Utc>, _>("scraped_at")?,
                version_id: row.try_get::<Uuid, _>("version_id")?,
            },
        })
    }
}

#[async_trait]
impl TrendStore for PgTableStore {
    fn describe(&self) -> String {
        format!("postgres table {}", self.table)
    }

    async fn select_by_key(&self, topic_hashtag: &str) -> Result<Option<StoredTrendRow>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM {} WHERE topic_hashtag = $1 LIMIT 1", self.table);
        let row = sqlx::query(&sql)
            .bind(topic_hashtag)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::decode).transpose()
    }

    async fn select_latest(&self, limit: usize) -> Result<Vec<StoredTrendRow>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM {} ORDER BY scraped_at DESC LIMIT $1", self.table);
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::decode).collect()
    }

    async fn insert(&self, row: &TrendRow) -> Result<StoredTrendRow, StoreError> {
        let sql = format!(
            "INSERT INTO {} (platform, topic_hashtag, engagement_score, sentiment_polarity, \
             sentiment_label, posts, views, metadata, scraped_at, version_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {COLUMNS}",
            self.table
        );
        let inserted = sqlx::query(&sql)
            .bind(&row.platform)
            .bind(&row.topic_hashtag)
            .bind(row.engagement_score)
            .bind(row.sentiment_polarity)
            .bind(&row.sentiment_label)
            .bind(row.posts)
            .bind(row.views)
            .bind(Json(&row.metadata))
            .bind(row.scraped_at)
            .bind(row.version_id)
            .fetch_one(&self.pool)
            .await?;
        Self::decode(&inserted)
    }

    async fn update(
        &self,
        topic_hashtag: &str,
        update: &TrendRowUpdate,
    ) -> Result<StoredTrendRow, StoreError> {
        let sql = format!(
            "UPDATE {} SET engagement_score = $1, posts = $2, views = $3, metadata = $4, \
             scraped_at = $5, version_id = $6 WHERE topic_hashtag = $7 RETURNING {COLUMNS}",
            self.table
        );
        let updated = sqlx::query(&sql)
            .bind(update.engagement_score)
            .bind(update.posts)
            .bind(update.views)
            .bind(Json(&update.metadata))
            .bind(update.scraped_at)
            .bind(update.version_id)
            .bind(topic_hashtag)
            .fetch_optional(&self.pool)
            .await?;
        match updated {
            Some(row) => Self::decode(&row),
            None => Err(StoreError::NotFound(topic_hashtag.to_string())),
        }
    }

    async fn delete(&self, topic_hashtag: &str) -> Result<usize, StoreError> {
        let sql = format!("DELETE FROM {} WHERE topic_hashtag = $1", self.table);
        let result = sqlx::query(&sql)
            .bind(topic_hashtag)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}
