use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{BooleanArray, Float64Array, RecordBatch, StringArray, UInt32Array, UInt64Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::orchestrator::{RunReport, TrendResult};
use crate::upsert::UpsertOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Write `run_report.json`, `run_brief.md` and the Parquet snapshot for a run.
///
/// Returns the run's report directory, `<reports_dir>/<version>`.
pub async fn write_run_reports(reports_dir: &Path, report: &RunReport) -> Result<PathBuf> {
    let run_dir = reports_dir.join(report.version.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let json = serde_json::to_vec_pretty(report).context("serializing run report")?;
    fs::write(run_dir.join("run_report.json"), json)
        .await
        .context("writing run_report.json")?;

    fs::write(run_dir.join("run_brief.md"), render_brief(report))
        .await
        .context("writing run_brief.md")?;

    export_parquet_snapshot(&run_dir, &report.trends).await?;
    Ok(run_dir)
}

fn outcome_label(outcome: Option<UpsertOutcome>) -> &'static str {
    match outcome {
        Some(UpsertOutcome::Inserted) => "inserted",
        Some(UpsertOutcome::Updated) => "updated",
        None => "failed",
    }
}

pub fn render_brief(report: &RunReport) -> String {
    let mut by_category: BTreeMap<&str, Vec<&TrendResult>> = BTreeMap::new();
    for trend in &report.trends {
        by_category
            .entry(trend.record.raw_blob.category.as_str())
            .or_default()
            .push(trend);
    }

    let mut lines = vec![
        "# Instagram Trend Brief".to_string(),
        String::new(),
        format!("- Version: `{}`", report.version),
        format!("- Started: {}", report.started_at.to_rfc3339()),
        format!("- Finished: {}", report.finished_at.to_rfc3339()),
        format!("- Store: {}", report.store),
        format!("- Estimation policy: {}", report.estimation_policy),
        format!(
            "- Hashtag sightings: {} | candidates: {}",
            report.sightings, report.candidates
        ),
        format!(
            "- Inserted: {} | Updated: {} | Failed: {}",
            report.inserted, report.updated, report.failed
        ),
    ];
    if let Some(reason) = &report.stop_reason {
        lines.push(format!("- Stopped early: {reason}"));
    }

    for (category, trends) in &by_category {
        lines.push(String::new());
        lines.push(format!("## {} ({})", category.to_uppercase(), trends.len()));
        for trend in trends {
            let record = &trend.record;
            let blob = &record.raw_blob;
            lines.push(format!(
                "- `{}` x{} | engagement {:.0} | likes {} | comments {} | views {} | videos {} | {}",
                record.key(),
                blob.frequency,
                record.engagement_score,
                record.likes,
                record.comments,
                record.views,
                blob.video_count,
                outcome_label(trend.outcome)
            ));
        }
    }

    if !report.failures.is_empty() {
        lines.push(String::new());
        lines.push("## Failures".to_string());
        for failure in &report.failures {
            lines.push(format!(
                "- `{}` ({:?}): {}",
                failure.hashtag,
                failure.kind,
                failure.reason
            ));
        }
    }

    if !report.notes.is_empty() {
        lines.push(String::new());
        lines.push("## Unread posts".to_string());
        for note in &report.notes {
            lines.push(format!("- `{}` {}: {}", note.hashtag, note.post_url, note.reason));
        }
    }

    lines.push(String::new());
    lines.join("\n")
}

async fn export_parquet_snapshot(run_dir: &Path, trends: &[TrendResult]) -> Result<PathBuf> {
    let snapshot_dir = run_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let trends_path = snapshot_dir.join("trends.parquet");
    write_trends_parquet(&trends_path, trends)?;

    let manifest = ParquetManifest {
        schema_version: 1,
        files: vec![manifest_entry("trends", run_dir, &trends_path)?],
    };

    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_trends_parquet(path: &Path, trends: &[TrendResult]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("topic_hashtag", DataType::Utf8, false),
        ArrowField::new("category", DataType::Utf8, false),
        ArrowField::new("frequency", DataType::UInt32, false),
        ArrowField::new("posts_count", DataType::UInt64, false),
        ArrowField::new("engagement_score", DataType::Float64, false),
        ArrowField::new("likes", DataType::UInt64, false),
        ArrowField::new("comments", DataType::UInt64, false),
        ArrowField::new("views", DataType::UInt64, false),
        ArrowField::new("video_count", DataType::UInt32, false),
        ArrowField::new("estimated", DataType::Boolean, false),
        ArrowField::new("outcome", DataType::Utf8, false),
        ArrowField::new("scraped_at", DataType::Utf8, false),
    ]));

    let records = trends.iter().map(|t| &t.record);
    let hashtags = StringArray::from(records.clone().map(|r| Some(r.key())).collect::<Vec<_>>());
    let categories = StringArray::from(
        records
            .clone()
            .map(|r| Some(r.raw_blob.category.as_str()))
            .collect::<Vec<_>>(),
    );
    let frequencies = UInt32Array::from(records.clone().map(|r| r.raw_blob.frequency).collect::<Vec<_>>());
    let posts_counts = UInt64Array::from(
        records
            .clone()
            .map(|r| r.raw_blob.posts_count as u64)
            .collect::<Vec<_>>(),
    );
    let scores = Float64Array::from(records.clone().map(|r| r.engagement_score).collect::<Vec<_>>());
    let likes = UInt64Array::from(records.clone().map(|r| r.likes).collect::<Vec<_>>());
    let comments = UInt64Array::from(records.clone().map(|r| r.comments).collect::<Vec<_>>());
    let views = UInt64Array::from(records.clone().map(|r| r.views).collect::<Vec<_>>());
    let video_counts = UInt32Array::from(records.clone().map(|r| r.raw_blob.video_count).collect::<Vec<_>>());
    let estimated = BooleanArray::from(
        records
            .clone()
            .map(|r| r.raw_blob.estimation.is_some())
            .collect::<Vec<_>>(),
    );
    let outcomes = StringArray::from(
        trends
            .iter()
            .map(|t| Some(outcome_label(t.outcome)))
            .collect::<Vec<_>>(),
    );
    let scraped_at = StringArray::from(
        records
            .map(|r| Some(r.timestamp.to_rfc3339()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(hashtags),
            Arc::new(categories),
            Arc::new(frequencies),
            Arc::new(posts_counts),
            Arc::new(scores),
            Arc::new(likes),
            Arc::new(comments),
            Arc::new(views),
            Arc::new(video_counts),
            Arc::new(estimated),
            Arc::new(outcomes),
            Arc::new(scraped_at),
        ],
    )
    .context("building trends record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, base_dir: &Path, path: &Path) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path
        .strip_prefix(base_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;
    use trendscout_core::{
        categorize, DiscoveryParameters, EngagementSummary, HashtagObservation, RunVersion,
        TrendRecord,
    };

    use crate::orchestrator::{FailureKind, HashtagFailure, RunState};

    fn trend(tag: &str, outcome: Option<UpsertOutcome>, version: RunVersion) -> TrendResult {
        let observation = HashtagObservation {
            hashtag: tag.to_string(),
            frequency: 3,
            category: categorize(tag).to_string(),
            sample_posts: vec![],
            posts_count: 3,
        };
        let summary = EngagementSummary {
            avg_likes: 120.0,
            avg_comments: 8.0,
            avg_engagement: 128.0,
            avg_views: 2560.0,
            total_engagement: 384.0,
            total_views: 7680.0,
            video_count: 0,
            estimation: None,
        };
        let params = DiscoveryParameters {
            posts_per_hashtag: 3,
            posts_to_scan: 400,
            scroll_count: 15,
            min_frequency: 1,
        };
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().unwrap();
        TrendResult {
            record: TrendRecord::build(&observation, &summary, version, at, &params).unwrap(),
            outcome,
        }
    }

    fn report() -> RunReport {
        let version = RunVersion::mint();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().unwrap();
        RunReport {
            version,
            started_at: at,
            finished_at: at,
            final_state: RunState::Done,
            session: "captured pages".into(),
            store: "in-memory table".into(),
            estimation_policy: "fixed".into(),
            sightings: 12,
            candidates: 3,
            inserted: 1,
            updated: 1,
            failed: 1,
            stop_reason: None,
            trends: vec![
                trend("gymlife", Some(UpsertOutcome::Inserted), version),
                trend("techlife", Some(UpsertOutcome::Updated), version),
                trend("foodie", None, version),
            ],
            failures: vec![HashtagFailure {
                hashtag: "#foodie".into(),
                kind: FailureKind::Write,
                reason: "store API error (status 409)".into(),
            }],
            notes: vec![],
            report_dir: None,
        }
    }

    #[test]
    fn brief_groups_trends_by_category() {
        let brief = render_brief(&report());
        assert!(brief.contains("## FITNESS (1)"));
        assert!(brief.contains("## TECHNOLOGY (1)"));
        assert!(brief.contains("`#foodie` x3"));
        assert!(brief.contains("| failed"));
        assert!(brief.contains("## Failures"));
        let food = brief.find("## FOOD").unwrap();
        let tech = brief.find("## TECHNOLOGY").unwrap();
        assert!(food < tech);
    }

    #[tokio::test]
    async fn reports_and_manifest_are_written() {
        let dir = tempdir().expect("tempdir");
        let report = report();

        let run_dir = write_run_reports(dir.path(), &report).await.expect("reports");
        assert_eq!(run_dir, dir.path().join(report.version.to_string()));
        assert!(run_dir.join("run_report.json").exists());
        assert!(run_dir.join("run_brief.md").exists());

        let manifest: ParquetManifest = serde_json::from_slice(
            &std::fs::read(run_dir.join("snapshots/manifest.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest.files.len(), 1);
        let entry = &manifest.files[0];
        assert_eq!(entry.path, "snapshots/trends.parquet");
        let bytes = std::fs::read(run_dir.join(&entry.path)).unwrap();
        assert_eq!(entry.bytes, bytes.len() as u64);
        assert_eq!(entry.sha256, hex::encode(Sha256::digest(&bytes)));

        let back: RunReport = serde_json::from_slice(
            &std::fs::read(run_dir.join("run_report.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(back.trends.len(), 3);
        assert_eq!(back.version, report.version);
    }
}
