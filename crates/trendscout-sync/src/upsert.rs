use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use trendscout_core::TrendRecord;
use trendscout_storage::{StoreError, TrendRow, TrendStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Error)]
#[error("write failed for {hashtag}: {reason}")]
pub struct WriteFailed {
    pub hashtag: String,
    pub reason: String,
}

impl WriteFailed {
    fn new(hashtag: &str, err: &StoreError) -> Self {
        Self {
            hashtag: hashtag.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Insert the record, or overwrite the live row with the same `#tag` key.
///
/// An overwrite keeps the stored `first_seen` and moves `last_seen` to the
/// record's timestamp. Lookup then write is not atomic.
pub async fn upsert(
    store: &dyn TrendStore,
    record: &TrendRecord,
) -> Result<UpsertOutcome, WriteFailed> {
    let key = record.key();
    let mut row = TrendRow::from_record(record);

    let existing = store
        .select_by_key(key)
        .await
        .map_err(|e| WriteFailed::new(key, &e))?;

    match existing {
        Some(stored) => {
            if let Some(first_seen) = stored.row.metadata.first_seen {
                row.metadata.first_seen = Some(first_seen);
            }
            row.metadata.last_seen = Some(record.timestamp);
            store
                .update(key, &row.to_update())
                .await
                .map_err(|e| WriteFailed::new(key, &e))?;
            debug!(hashtag = key, id = ?stored.id, "updated trend row");
            Ok(UpsertOutcome::Updated)
        }
        None => {
            store
                .insert(&row)
                .await
                .map_err(|e| WriteFailed::new(key, &e))?;
            debug!(hashtag = key, "inserted trend row");
            Ok(UpsertOutcome::Inserted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use trendscout_core::{
        DiscoveryParameters, EngagementSummary, HashtagObservation, RunVersion,
    };
    use trendscout_storage::MemoryTableStore;

    fn record(tag: &str, engagement: f64, at: chrono::DateTime<Utc>, version: RunVersion) -> TrendRecord {
        let observation = HashtagObservation {
            hashtag: tag.to_string(),
            frequency: 2,
            category: "general".into(),
            sample_posts: vec!["/p/a/".into()],
            posts_count: 2,
        };
        let summary = EngagementSummary {
            avg_likes: engagement,
            avg_engagement: engagement,
            total_engagement: engagement,
            ..Default::default()
        };
        let params = DiscoveryParameters {
            posts_per_hashtag: 3,
            posts_to_scan: 400,
            scroll_count: 15,
            min_frequency: 1,
        };
        TrendRecord::build(&observation, &summary, version, at, &params).unwrap()
    }

    #[tokio::test]
    async fn second_run_updates_in_place_and_keeps_first_seen() {
        let store = MemoryTableStore::new();
        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().unwrap();
        let t2 = t1 + Duration::hours(3);
        let v1 = RunVersion::mint();
        let v2 = RunVersion::mint();

        let first = upsert(&store, &record("sunset", 100.0, t1, v1)).await.unwrap();
        let second = upsert(&store, &record("sunset", 250.0, t2, v2)).await.unwrap();

        assert_eq!(first, UpsertOutcome::Inserted);
        assert_eq!(second, UpsertOutcome::Updated);

        let rows = store.rows().await;
        assert_eq!(rows.len(), 1);
        let row = &rows[0].row;
        assert_eq!(row.topic_hashtag, "#sunset");
        assert_eq!(row.engagement_score, 250.0);
        assert_eq!(row.version_id, v2.as_uuid());
        assert_eq!(row.scraped_at, t2);
        assert_eq!(row.metadata.first_seen, Some(t1));
        assert_eq!(row.metadata.last_seen, Some(t2));
    }

    #[tokio::test]
    async fn store_failure_becomes_write_failed() {
        let store = MemoryTableStore::new();
        store.reject_writes_for("#sunset").await;

        let err = upsert(&store, &record("sunset", 1.0, Utc::now(), RunVersion::mint()))
            .await
            .unwrap_err();
        assert_eq!(err.hashtag, "#sunset");
        assert!(err.reason.contains("rejected"));
    }
}
