use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{StoreError, StoredTrendRow, TrendRow, TrendRowUpdate, TrendStore};

/// In-process trend table. Backs tests and offline replays.
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: Vec<StoredTrendRow>,
    next_id: i64,
    rejected_keys: HashSet<String>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every insert/update for `topic_hashtag` fail, like a constraint violation would.
    pub async fn reject_writes_for(&self, topic_hashtag: &str) {
        self.state
            .lock()
            .await
            .rejected_keys
            .insert(topic_hashtag.to_string());
    }

    pub async fn rows(&self) -> Vec<StoredTrendRow> {
        self.state.lock().await.rows.clone()
    }
}

impl MemoryState {
    fn check_writable(&self, topic_hashtag: &str) -> Result<(), StoreError> {
        if self.rejected_keys.contains(topic_hashtag) {
            return Err(StoreError::Api {
                status: 409,
                message: format!("write rejected for {topic_hashtag}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TrendStore for MemoryTableStore {
    fn describe(&self) -> String {
        "in-memory table".to_string()
    }

    async fn select_by_key(&self, topic_hashtag: &str) -> Result<Option<StoredTrendRow>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .iter()
            .find(|r| r.row.topic_hashtag == topic_hashtag)
            .cloned())
    }

    async fn select_latest(&self, limit: usize) -> Result<Vec<StoredTrendRow>, StoreError> {
        let state = self.state.lock().await;
        let mut rows = state.rows.clone();
        rows.sort_by(|a, b| b.row.scraped_at.cmp(&a.row.scraped_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn insert(&self, row: &TrendRow) -> Result<StoredTrendRow, StoreError> {
        let mut state = self.state.lock().await;
        state.check_writable(&row.topic_hashtag)?;
        if state.rows.iter().any(|r| r.row.topic_hashtag == row.topic_hashtag) {
            return Err(StoreError::Api {
                status: 409,
                message: format!("duplicate topic_hashtag {}", row.topic_hashtag),
            });
        }
        state.next_id += 1;
        let stored = StoredTrendRow {
            id: Some(state.next_id),
            row: row.clone(),
        };
        state.rows.push(stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        topic_hashtag: &str,
        update: &TrendRowUpdate,
    ) -> Result<StoredTrendRow, StoreError> {
        let mut state = self.state.lock().await;
        state.check_writable(topic_hashtag)?;
        let existing = state
            .rows
            .iter_mut()
            .find(|r| r.row.topic_hashtag == topic_hashtag)
            .ok_or_else(|| StoreError::NotFound(topic_hashtag.to_string()))?;
        existing.row.apply_update(update);
        Ok(existing.clone())
    }

    async fn delete(&self, topic_hashtag: &str) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.rows.len();
        state.rows.retain(|r| r.row.topic_hashtag != topic_hashtag);
        Ok(before - state.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn row(tag: &str, minutes_ago: i64) -> TrendRow {
        TrendRow {
            platform: "Instagram".into(),
            topic_hashtag: tag.into(),
            scraped_at: Utc::now() - Duration::minutes(minutes_ago),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn latest_orders_by_scraped_at_desc() {
        let store = MemoryTableStore::new();
        store.insert(&row("#old", 60)).await.unwrap();
        store.insert(&row("#new", 1)).await.unwrap();
        store.insert(&row("#mid", 30)).await.unwrap();

        let latest = store.select_latest(2).await.unwrap();
        let keys: Vec<_> = latest.iter().map(|r| r.row.topic_hashtag.as_str()).collect();
        assert_eq!(keys, vec!["#new", "#mid"]);
    }

    #[tokio::test]
    async fn duplicate_insert_and_missing_update_fail() {
        let store = MemoryTableStore::new();
        store.insert(&row("#a", 0)).await.unwrap();
        assert!(matches!(
            store.insert(&row("#a", 0)).await,
            Err(StoreError::Api { status: 409, .. })
        ));

        let update = row("#b", 0).to_update();
        assert!(matches!(
            store.update("#b", &update).await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.delete("#a").await.unwrap(), 1);
        assert_eq!(store.delete("#a").await.unwrap(), 0);
    }
}
