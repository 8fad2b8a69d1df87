use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::retry::{classify_reqwest_error, classify_status, BackoffPolicy, RetryDisposition};
use crate::{StoreError, StoredTrendRow, TrendRow, TrendRowUpdate, TrendStore};

#[derive(Debug, Clone)]
pub struct RestStoreConfig {
    pub base_url: String,
    pub api_key: String,
    pub table: String,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
}

/// PostgREST table client (Supabase `/rest/v1/<table>`).
#[derive(Debug)]
pub struct RestTableStore {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    backoff: BackoffPolicy,
}

impl RestTableStore {
    pub fn new(config: RestStoreConfig) -> Result<Self, StoreError> {
        let base_url = config.base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(StoreError::Config("store URL is empty".to_string()));
        }
        if config.table.trim().is_empty() {
            return Err(StoreError::Config("table name is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{base_url}/rest/v1/{}", config.table.trim()),
            api_key: config.api_key,
            backoff: config.backoff,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one request and decode the returned row array.
    ///
    /// Only idempotent calls pass `retry = true`; inserts are sent once.
    async fn send(
        &self,
        method: Method,
        query: &[(&str, String)],
        body: Option<&JsonValue>,
        retry: bool,
    ) -> Result<Vec<StoredTrendRow>, StoreError> {
        let max_retries = if retry { self.backoff.max_retries } else { 0 };

        for attempt in 0..=max_retries {
            let mut request = self
                .client
                .request(method.clone(), &self.endpoint)
                .query(query)
                .header("apikey", &self.api_key)
                .bearer_auth(&self.api_key)
                .header("Prefer", "return=representation");
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let text = resp.text().await?;
                        if text.trim().is_empty() {
                            return Ok(Vec::new());
                        }
                        return serde_json::from_str(&text)
                            .map_err(|e| StoreError::Decode(e.to_string()));
                    }

                    if classify_status(status) == RetryDisposition::Retryable && attempt < max_retries {
                        warn!(%method, status = status.as_u16(), attempt, "store request failed; retrying");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    let message = resp.text().await.unwrap_or_default();
                    return Err(StoreError::Api {
                        status: status.as_u16(),
                        message,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable && attempt < max_retries {
                        warn!(%method, error = %err, attempt, "store request errored; retrying");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }

        Err(StoreError::Network(format!(
            "{method} {} exhausted {max_retries} retries",
            self.endpoint
        )))
    }
}

fn key_filter(topic_hashtag: &str) -> (&'static str, String) {
    ("topic_hashtag", format!("eq.{topic_hashtag}"))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<JsonValue, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Decode(e.to_string()))
}

#[async_trait]
impl TrendStore for RestTableStore {
    fn describe(&self) -> String {
        self.endpoint.clone()
    }

    async fn select_by_key(&self, topic_hashtag: &str) -> Result<Option<StoredTrendRow>, StoreError> {
        let query = [("select", "*".to_string()), key_filter(topic_hashtag)];
        let rows = self.send(Method::GET, &query, None, true).await?;
        debug!(topic_hashtag, found = rows.len(), "selected trend by key");
        Ok(rows.into_iter().next())
    }

    async fn select_latest(&self, limit: usize) -> Result<Vec<StoredTrendRow>, StoreError> {
        let query = [
            ("select", "*".to_string()),
            ("order", "scraped_at.desc".to_string()),
            ("limit", limit.to_string()),
        ];
        self.send(Method::GET, &query, None, true).await
    }

    async fn insert(&self, row: &TrendRow) -> Result<StoredTrendRow, StoreError> {
        let body = to_json(row)?;
        let rows = self.send(Method::POST, &[], Some(&body), false).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode(format!("insert of {} returned no rows", row.topic_hashtag)))
    }

    async fn update(
        &self,
        topic_hashtag: &str,
        update: &TrendRowUpdate,
    ) -> Result<StoredTrendRow, StoreError> {
        let body = to_json(update)?;
        let rows = self
            .send(Method::PATCH, &[key_filter(topic_hashtag)], Some(&body), true)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(topic_hashtag.to_string()))
    }

    async fn delete(&self, topic_hashtag: &str) -> Result<usize, StoreError> {
        let rows = self
            .send(Method::DELETE, &[key_filter(topic_hashtag)], None, true)
            .await?;
        Ok(rows.len())
    }
}
