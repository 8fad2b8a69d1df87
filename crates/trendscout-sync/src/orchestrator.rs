use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};
use trendscout_adapters::{extract_explore_sightings, extract_post_metrics, PageSession};
use trendscout_core::{CategoryTable, HashtagObservation, PostMetrics, RunVersion, TrendRecord};
use trendscout_storage::{CaptureKind, CaptureStore, TrendStore};

use crate::aggregate::{EngagementAggregator, RandomEstimation};
use crate::collector::collect;
use crate::config::{ConfigError, ScoutConfig};
use crate::report::write_run_reports;
use crate::upsert::{upsert, UpsertOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Validating,
    Discovering,
    PerHashtagLoop,
    Reporting,
    Done,
    Failed,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(#[from] ConfigError),
    #[error("{collaborator} unavailable: {reason}")]
    CollaboratorUnavailable { collaborator: String, reason: String },
}

impl RunError {
    pub(crate) fn unavailable(collaborator: &str, reason: impl ToString) -> Self {
        RunError::CollaboratorUnavailable {
            collaborator: collaborator.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Random wait between hashtags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingDelay {
    pub min: Duration,
    pub max: Duration,
}

impl PacingDelay {
    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn pick(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        rand::rng().random_range(self.min..=self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The record could not be built from the gathered figures.
    Run,
    /// The store rejected the write.
    Write,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashtagFailure {
    /// Store key form, `#tag`.
    pub hashtag: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// A post that could not be read; its hashtag was aggregated without it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionNote {
    /// Store key form, `#tag`.
    pub hashtag: String,
    pub post_url: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub record: TrendRecord,
    /// `None` when the write failed.
    pub outcome: Option<UpsertOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub version: RunVersion,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub final_state: RunState,
    pub session: String,
    pub store: String,
    pub estimation_policy: String,
    pub sightings: usize,
    pub candidates: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    pub stop_reason: Option<String>,
    pub trends: Vec<TrendResult>,
    pub failures: Vec<HashtagFailure>,
    pub notes: Vec<ExtractionNote>,
    pub report_dir: Option<PathBuf>,
}

impl RunReport {
    pub fn summary_line(&self) -> String {
        format!(
            "run {}: inserted={} updated={} failed={} notes={}",
            self.version,
            self.inserted,
            self.updated,
            self.failed,
            self.notes.len()
        )
    }
}

/// Sequences one discovery, aggregation and persistence run.
pub struct RunOrchestrator {
    config: ScoutConfig,
    session: Arc<dyn PageSession>,
    store: Arc<dyn TrendStore>,
    aggregator: EngagementAggregator,
    categories: CategoryTable,
    captures: Option<CaptureStore>,
    write_reports: bool,
}

fn hashtag_key(observation: &HashtagObservation) -> String {
    format!("#{}", observation.hashtag.trim_start_matches('#'))
}

fn transition(state: &mut RunState, next: RunState) {
    debug!(from = ?*state, to = ?next, "run state");
    *state = next;
}

impl RunOrchestrator {
    pub fn new(config: ScoutConfig, session: Arc<dyn PageSession>, store: Arc<dyn TrendStore>) -> Self {
        let captures = config.artifacts_dir.clone().map(CaptureStore::new);
        Self {
            config,
            session,
            store,
            aggregator: EngagementAggregator::new(Box::new(RandomEstimation::from_entropy())),
            categories: CategoryTable::builtin(),
            captures,
            write_reports: true,
        }
    }

    pub fn with_aggregator(mut self, aggregator: EngagementAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_categories(mut self, categories: CategoryTable) -> Self {
        self.categories = categories;
        self
    }

    pub fn without_reports(mut self) -> Self {
        self.write_reports = false;
        self
    }

    pub async fn run(&self) -> Result<RunReport, RunError> {
        let mut state = RunState::Idle;
        let version = RunVersion::mint();
        let started_at = Utc::now();
        info!(%version, session = %self.session.describe(), store = %self.store.describe(), "starting run");

        transition(&mut state, RunState::Validating);
        if let Err(err) = self.config.validate() {
            transition(&mut state, RunState::Failed);
            error!(%version, error = %err, "configuration validation failed");
            return Err(err.into());
        }

        transition(&mut state, RunState::Discovering);
        let (sightings, observations) = match self.discover(version).await {
            Ok(found) => found,
            Err(err) => {
                transition(&mut state, RunState::Failed);
                error!(%version, error = %err, "discovery failed; nothing saved");
                return Err(err);
            }
        };

        let mut report = RunReport {
            version,
            started_at,
            finished_at: started_at,
            final_state: state,
            session: self.session.describe(),
            store: self.store.describe(),
            estimation_policy: self.aggregator.policy_name().to_string(),
            sightings,
            candidates: observations.len(),
            inserted: 0,
            updated: 0,
            failed: 0,
            stop_reason: None,
            trends: Vec::new(),
            failures: Vec::new(),
            notes: Vec::new(),
            report_dir: None,
        };

        if observations.is_empty() {
            info!(%version, "no hashtags met the minimum frequency");
            report.stop_reason = Some("no hashtags met the minimum frequency".to_string());
        } else {
            transition(&mut state, RunState::PerHashtagLoop);
            let total = observations.len();
            for (idx, observation) in observations.iter().enumerate() {
                let span = info_span!("hashtag", tag = %observation.hashtag, n = idx + 1, of = total);
                self.process_hashtag(version, observation, &mut report)
                    .instrument(span)
                    .await;

                if idx + 1 < total {
                    let wait = self.config.hashtag_delay.pick();
                    if !wait.is_zero() {
                        debug!(wait_ms = wait.as_millis() as u64, "pacing");
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        transition(&mut state, RunState::Reporting);
        report.finished_at = Utc::now();
        report.final_state = RunState::Done;
        if self.write_reports {
            match write_run_reports(&self.config.reports_dir, &report).await {
                Ok(dir) => report.report_dir = Some(dir),
                Err(err) => warn!(%version, error = %err, "could not write run reports"),
            }
        }
        for failure in &report.failures {
            warn!(hashtag = %failure.hashtag, kind = ?failure.kind, reason = %failure.reason, "hashtag failed");
        }
        info!(
            %version,
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failed,
            notes = report.notes.len(),
            "run complete"
        );

        transition(&mut state, RunState::Done);
        Ok(report)
    }

    async fn discover(&self, version: RunVersion) -> Result<(usize, Vec<HashtagObservation>), RunError> {
        self.session
            .login(&self.config.credentials)
            .await
            .map_err(|e| RunError::unavailable("page session login", e))?;

        let explore = self
            .session
            .explore(self.config.discovery.scroll_count)
            .await
            .map_err(|e| RunError::unavailable("explore page", e))?;
        self.store_capture(version, CaptureKind::Explore, &explore.html, explore.captured_at)
            .await;

        let sightings = extract_explore_sightings(&explore.html, self.config.discovery.posts_to_scan)
            .map_err(|e| RunError::unavailable("explore page", e))?;
        let observations = collect(&sightings, &self.config.discovery, &self.categories);
        info!(
            sightings = sightings.len(),
            candidates = observations.len(),
            "explore page tallied"
        );
        for observation in &observations {
            debug!(
                hashtag = %observation.hashtag,
                frequency = observation.frequency,
                category = %observation.category,
                "candidate"
            );
        }
        Ok((sightings.len(), observations))
    }

    async fn sample_posts(
        &self,
        version: RunVersion,
        observation: &HashtagObservation,
        notes: &mut Vec<ExtractionNote>,
    ) -> Vec<PostMetrics> {
        let mut samples = Vec::new();
        for post_url in &observation.sample_posts {
            let note = |reason: String| ExtractionNote {
                hashtag: hashtag_key(observation),
                post_url: post_url.clone(),
                reason,
            };
            let page = match self.session.post(post_url).await {
                Ok(page) => page,
                Err(err) => {
                    warn!(post_url = %post_url, error = %err, "post page unavailable");
                    notes.push(note(err.to_string()));
                    continue;
                }
            };
            self.store_capture(version, CaptureKind::Post, &page.html, page.captured_at)
                .await;
            match extract_post_metrics(&page.html) {
                Ok(metrics) => {
                    debug!(post_url = %post_url, likes = metrics.likes, comments = metrics.comments, views = ?metrics.views, video = metrics.is_video, "post sampled");
                    samples.push(metrics);
                }
                Err(err) => {
                    warn!(post_url = %post_url, error = %err, "could not read post metrics");
                    notes.push(note(err.to_string()));
                }
            }
        }
        samples
    }

    async fn process_hashtag(
        &self,
        version: RunVersion,
        observation: &HashtagObservation,
        report: &mut RunReport,
    ) {
        let samples = self.sample_posts(version, observation, &mut report.notes).await;
        let summary = self.aggregator.aggregate(observation.frequency, &samples);
        if let Some(estimation) = &summary.estimation {
            debug!(?estimation, "figures estimated");
        }

        let record = match TrendRecord::build(
            observation,
            &summary,
            version,
            Utc::now(),
            &self.config.discovery_parameters(),
        ) {
            Ok(record) => record,
            Err(err) => {
                report.failed += 1;
                report.failures.push(HashtagFailure {
                    hashtag: hashtag_key(observation),
                    kind: FailureKind::Run,
                    reason: err.to_string(),
                });
                return;
            }
        };

        let outcome = match upsert(self.store.as_ref(), &record).await {
            Ok(outcome) => {
                match outcome {
                    UpsertOutcome::Inserted => report.inserted += 1,
                    UpsertOutcome::Updated => report.updated += 1,
                }
                info!(
                    ?outcome,
                    engagement = record.engagement_score,
                    views = record.views,
                    "saved"
                );
                Some(outcome)
            }
            Err(err) => {
                report.failed += 1;
                report.failures.push(HashtagFailure {
                    hashtag: err.hashtag.clone(),
                    kind: FailureKind::Write,
                    reason: err.reason.clone(),
                });
                None
            }
        };
        report.trends.push(TrendResult { record, outcome });
    }

    async fn store_capture(
        &self,
        version: RunVersion,
        kind: CaptureKind,
        html: &str,
        captured_at: DateTime<Utc>,
    ) {
        let Some(captures) = &self.captures else {
            return;
        };
        match captures.store_capture(captured_at, version, kind, html).await {
            Ok(stored) => debug!(
                path = %stored.relative_path.display(),
                deduplicated = stored.deduplicated,
                "page captured"
            ),
            Err(err) => warn!(error = %err, "could not store captured page"),
        }
    }
}
