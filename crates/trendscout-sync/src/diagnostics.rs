//! Read-only views of the trend table and a write probe for connectivity checks.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use trendscout_core::PLATFORM_NAME;
use trendscout_storage::{RowMetadata, StoreError, TrendRow, TrendStore};
use uuid::Uuid;

/// Upper bound on rows read when counting per day and per version.
pub const SCAN_LIMIT: usize = 1000;
pub const PROBE_HASHTAG: &str = "#test_hashtag";
const DAYS_SHOWN: usize = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestRow {
    pub topic_hashtag: String,
    pub engagement_score: f64,
    pub posts: i64,
    pub views: i64,
    pub scraped_at: DateTime<Utc>,
    pub version_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestSummary {
    pub rows: Vec<LatestRow>,
    pub scanned: usize,
    /// The scan hit its bound, so older rows are missing from the counts.
    pub truncated: bool,
    /// Most recent day first, at most seven days.
    pub per_day: Vec<(NaiveDate, usize)>,
    /// Distinct run versions, most recently scraped first.
    pub versions: Vec<Uuid>,
}

pub async fn latest_summary(store: &dyn TrendStore, limit: usize) -> Result<LatestSummary, StoreError> {
    let bound = limit.max(SCAN_LIMIT);
    let scanned = store.select_latest(bound).await?;

    let rows = scanned
        .iter()
        .take(limit)
        .map(|stored| LatestRow {
            topic_hashtag: stored.row.topic_hashtag.clone(),
            engagement_score: stored.row.engagement_score,
            posts: stored.row.posts,
            views: stored.row.views,
            scraped_at: stored.row.scraped_at,
            version_id: stored.row.version_id,
        })
        .collect();

    let mut days: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    let mut seen = HashSet::new();
    let mut versions = Vec::new();
    for stored in &scanned {
        *days.entry(stored.row.scraped_at.date_naive()).or_default() += 1;
        if seen.insert(stored.row.version_id) {
            versions.push(stored.row.version_id);
        }
    }

    Ok(LatestSummary {
        rows,
        scanned: scanned.len(),
        truncated: scanned.len() >= bound,
        per_day: days.into_iter().rev().take(DAYS_SHOWN).collect(),
        versions,
    })
}

fn age(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    let hours = (now - then).num_minutes() as f64 / 60.0;
    if hours < 24.0 {
        format!("{hours:.1} hours ago")
    } else {
        format!("{:.1} days ago", hours / 24.0)
    }
}

impl LatestSummary {
    pub fn render(&self, now: DateTime<Utc>) -> String {
        let mut lines = vec![format!("Latest {} rows (scanned {}):", self.rows.len(), self.scanned)];
        if self.rows.is_empty() {
            lines.push("  no rows".to_string());
        }
        for (i, row) in self.rows.iter().enumerate() {
            lines.push(format!(
                "[{}] {}  engagement {:.0} | posts {} | views {}",
                i + 1,
                row.topic_hashtag,
                row.engagement_score,
                row.posts,
                row.views
            ));
            lines.push(format!(
                "    scraped {} ({}) | version {}",
                row.scraped_at.to_rfc3339(),
                age(now, row.scraped_at),
                row.version_id
            ));
        }

        lines.push(String::new());
        lines.push(format!("Rows by day (newest {} rows):", self.scanned));
        for (day, count) in &self.per_day {
            lines.push(format!("  {day}: {count}"));
        }

        lines.push(String::new());
        lines.push(format!("Distinct run versions: {}", self.versions.len()));
        for version in self.versions.iter().take(5) {
            lines.push(format!("  - {version}"));
        }
        if self.truncated {
            lines.push(String::new());
            lines.push(format!(
                "Counts stop at the newest {} rows; older rows are not included.",
                self.scanned
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStep {
    Select,
    Insert,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub step: ProbeStep,
    pub ok: bool,
    pub detail: String,
}

impl ProbeResult {
    fn ok(step: ProbeStep, detail: impl Into<String>) -> Self {
        Self {
            step,
            ok: true,
            detail: detail.into(),
        }
    }

    fn failed(step: ProbeStep, err: &StoreError) -> Self {
        Self {
            step,
            ok: false,
            detail: err.to_string(),
        }
    }
}

fn probe_row(now: DateTime<Utc>) -> TrendRow {
    let mut metadata = RowMetadata::default();
    metadata.extras.insert("test".to_string(), json!(true));
    metadata
        .extras
        .insert("created_by".to_string(), json!("trendscout check-store"));
    TrendRow {
        platform: PLATFORM_NAME.to_string(),
        topic_hashtag: PROBE_HASHTAG.to_string(),
        engagement_score: 1000.0,
        sentiment_polarity: 0.0,
        sentiment_label: trendscout_storage::NEUTRAL_SENTIMENT_LABEL.to_string(),
        posts: 1,
        views: 5000,
        metadata,
        scraped_at: now,
        version_id: Uuid::new_v4(),
    }
}

/// Read one row, insert a probe row, then delete it.
///
/// The delete step is skipped when the insert failed.
pub async fn check_store(store: &dyn TrendStore) -> Vec<ProbeResult> {
    let mut results = Vec::new();
    info!(store = %store.describe(), "checking store");

    match store.select_latest(1).await {
        Ok(rows) => results.push(ProbeResult::ok(
            ProbeStep::Select,
            format!("found {} existing row(s)", rows.len()),
        )),
        Err(err) => {
            warn!(error = %err, "select probe failed");
            results.push(ProbeResult::failed(ProbeStep::Select, &err));
        }
    }

    match store.insert(&probe_row(Utc::now())).await {
        Ok(stored) => {
            let id = stored.id.map_or_else(|| "unknown".to_string(), |id| id.to_string());
            results.push(ProbeResult::ok(ProbeStep::Insert, format!("inserted row id {id}")));
        }
        Err(err) => {
            warn!(error = %err, "insert probe failed");
            results.push(ProbeResult::failed(ProbeStep::Insert, &err));
            return results;
        }
    }

    match store.delete(PROBE_HASHTAG).await {
        Ok(n) => results.push(ProbeResult::ok(ProbeStep::Delete, format!("removed {n} probe row(s)"))),
        Err(err) => {
            warn!(error = %err, "probe cleanup failed");
            results.push(ProbeResult::failed(ProbeStep::Delete, &err));
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use trendscout_storage::MemoryTableStore;

    fn row(tag: &str, at: DateTime<Utc>, version: Uuid) -> TrendRow {
        TrendRow {
            platform: "Instagram".into(),
            topic_hashtag: tag.into(),
            engagement_score: 10.0,
            posts: 1,
            views: 100,
            scraped_at: at,
            version_id: version,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn latest_orders_rows_and_counts_days_and_versions() {
        let store = MemoryTableStore::new();
        let day1 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().unwrap();
        let day2 = day1 + Duration::days(1);
        let v1 = Uuid::new_v4();
        let v2 = Uuid::new_v4();
        store.insert(&row("#sunset", day1, v1)).await.unwrap();
        store.insert(&row("#foodie", day1 + Duration::hours(1), v1)).await.unwrap();
        store.insert(&row("#gymlife", day2, v2)).await.unwrap();

        let summary = latest_summary(&store, 2).await.unwrap();
        let tags: Vec<_> = summary.rows.iter().map(|r| r.topic_hashtag.as_str()).collect();
        assert_eq!(tags, vec!["#gymlife", "#foodie"]);
        assert_eq!(summary.scanned, 3);
        assert_eq!(
            summary.per_day,
            vec![(day2.date_naive(), 1), (day1.date_naive(), 2)]
        );
        assert_eq!(summary.versions, vec![v2, v1]);

        let text = summary.render(day2 + Duration::hours(2));
        assert!(text.contains("[1] #gymlife"));
        assert!(text.contains("2.0 hours ago"));
        assert!(text.contains("Distinct run versions: 2"));
        assert!(!summary.truncated);
        assert!(!text.contains("older rows are not included"));
    }

    #[tokio::test]
    async fn counts_past_the_scan_bound_are_flagged() {
        let store = MemoryTableStore::new();
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).single().unwrap();
        let version = Uuid::new_v4();
        for i in 0..SCAN_LIMIT + 5 {
            let tag = format!("#tag{i}");
            store
                .insert(&row(&tag, start + Duration::minutes(i as i64), version))
                .await
                .unwrap();
        }

        let summary = latest_summary(&store, 10).await.unwrap();
        assert_eq!(summary.scanned, SCAN_LIMIT);
        assert!(summary.truncated);
        let counted: usize = summary.per_day.iter().map(|(_, n)| n).sum();
        assert_eq!(counted, SCAN_LIMIT);

        let text = summary.render(start + Duration::days(1));
        assert!(text.contains(&format!("Rows by day (newest {SCAN_LIMIT} rows):")));
        assert!(text.contains(&format!(
            "Counts stop at the newest {SCAN_LIMIT} rows; older rows are not included."
        )));
    }

    #[tokio::test]
    async fn empty_store_renders_no_rows() {
        let store = MemoryTableStore::new();
        let summary = latest_summary(&store, 10).await.unwrap();
        assert!(summary.rows.is_empty());
        assert!(summary.render(Utc::now()).contains("no rows"));
    }

    #[tokio::test]
    async fn probe_inserts_then_cleans_up() {
        let store = MemoryTableStore::new();
        let results = check_store(&store).await;

        let steps: Vec<_> = results.iter().map(|r| (r.step, r.ok)).collect();
        assert_eq!(
            steps,
            vec![
                (ProbeStep::Select, true),
                (ProbeStep::Insert, true),
                (ProbeStep::Delete, true)
            ]
        );
        assert!(store.rows().await.is_empty());
    }

    #[tokio::test]
    async fn rejected_probe_skips_cleanup() {
        let store = MemoryTableStore::new();
        store.reject_writes_for(PROBE_HASHTAG).await;

        let results = check_store(&store).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].step, ProbeStep::Insert);
        assert!(!results[1].ok);
        assert!(results[1].detail.contains("409"));
    }
}
