//! Core domain model for trendscout: observations, engagement, trend records.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

pub mod lenient_utc;

pub const CRATE_NAME: &str = "trendscout-core";

pub const PLATFORM_NAME: &str = "Instagram";
pub const DEFAULT_LANGUAGE: &str = "en";
pub const INSTAGRAM_BASE_URL: &str = "https://www.instagram.com";
pub const INSTAGRAM_LOGIN_URL: &str = "https://www.instagram.com/accounts/login/";
pub const INSTAGRAM_EXPLORE_URL: &str = "https://www.instagram.com/explore/";
pub const DISCOVERY_METHOD: &str = "explore_page";
pub const DEFAULT_CATEGORY: &str = "general";

#[derive(Debug, Error, PartialEq)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Identifier minted once per run and stamped on every record that run writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunVersion(Uuid);

impl RunVersion {
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for RunVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

const BUILTIN_CATEGORIES: &[(&str, &[&str])] = &[
    (
        "fashion",
        &[
            "fashion", "style", "ootd", "outfit", "fashionista", "stylish", "beauty", "makeup",
            "clothing", "dress", "shoes", "accessories",
        ],
    ),
    (
        "fitness",
        &[
            "fitness", "gym", "workout", "health", "fit", "exercise", "training", "muscle",
            "bodybuilding", "yoga", "running", "cycling",
        ],
    ),
    (
        "food",
        &[
            "food", "foodie", "cooking", "recipe", "delicious", "yummy", "instafood", "foodporn",
            "chef", "restaurant", "dinner", "lunch", "breakfast",
        ],
    ),
    (
        "travel",
        &[
            "travel", "wanderlust", "vacation", "adventure", "explore", "trip", "tourism", "beach",
            "nature", "mountains", "travelgram",
        ],
    ),
    (
        "technology",
        &[
            "tech", "technology", "gadget", "innovation", "digital", "coding", "programming", "ai",
            "software", "hardware", "app",
        ],
    ),
    (
        "business",
        &[
            "business", "entrepreneur", "startup", "marketing", "finance", "investing", "money",
            "success", "motivation", "hustle",
        ],
    ),
    (
        "entertainment",
        &[
            "entertainment", "movie", "music", "celebrity", "artist", "actor", "singer", "concert",
            "film", "show", "viral", "trending", "funny", "meme",
        ],
    ),
    (
        "lifestyle",
        &[
            "lifestyle", "life", "happy", "love", "instagood", "photooftheday", "picoftheday",
            "instagram", "insta", "daily", "inspiration",
        ],
    ),
    (
        "photography",
        &[
            "photography", "photo", "photographer", "camera", "portrait", "landscape", "art",
            "creative", "photoshoot",
        ],
    ),
    (
        "sports",
        &[
            "sports", "football", "soccer", "basketball", "cricket", "tennis", "athlete", "game",
            "player", "team", "championship",
        ],
    ),
];

/// Categorize a hashtag against the built-in table. First category (in
/// declaration order) with a keyword contained in the lowercased tag wins.
pub fn categorize(tag: &str) -> &'static str {
    let lower = tag.to_lowercase();
    BUILTIN_CATEGORIES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(DEFAULT_CATEGORY)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category: String,
    pub keywords: Vec<String>,
}

/// Ordered category table; rule order is match order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTable {
    pub rules: Vec<CategoryRule>,
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CategoryTable {
    pub fn builtin() -> Self {
        Self {
            rules: BUILTIN_CATEGORIES
                .iter()
                .map(|(category, keywords)| CategoryRule {
                    category: (*category).to_string(),
                    keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
                })
                .collect(),
        }
    }

    pub fn categorize(&self, tag: &str) -> &str {
        let lower = tag.to_lowercase();
        self.rules
            .iter()
            .find(|rule| {
                rule.keywords
                    .iter()
                    .any(|needle| lower.contains(&needle.to_lowercase()))
            })
            .map(|rule| rule.category.as_str())
            .unwrap_or(DEFAULT_CATEGORY)
    }
}

/// One hashtag seen on one post of the explore page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSighting {
    pub tag: String,
    pub post_id: String,
}

impl TagSighting {
    pub fn new(tag: impl Into<String>, post_id: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            post_id: post_id.into(),
        }
    }
}

/// Ranked hashtag candidate produced by discovery, consumed once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashtagObservation {
    pub hashtag: String,
    pub frequency: u32,
    pub category: String,
    pub sample_posts: Vec<String>,
    /// Every post the tag was seen on; may exceed `sample_posts.len()`.
    pub posts_count: usize,
}

/// Metrics read from a single post page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PostMetrics {
    pub likes: u64,
    pub comments: u64,
    /// `None` when the page showed no view counter.
    #[serde(default)]
    pub views: Option<u64>,
    pub is_video: bool,
}

impl PostMetrics {
    pub fn engagement(&self) -> u64 {
        self.likes.saturating_add(self.comments)
    }
}

/// Which synthetic-value policy produced part of a summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Estimation {
    FrequencyScaled { frequency: u32 },
    ViewsFromEngagement { multiplier: f64 },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngagementSummary {
    pub avg_likes: f64,
    pub avg_comments: f64,
    pub avg_engagement: f64,
    pub avg_views: f64,
    pub total_engagement: f64,
    pub total_views: f64,
    pub video_count: u32,
    pub estimation: Option<Estimation>,
}

impl EngagementSummary {
    fn validate(&self) -> Result<(), CoreError> {
        let figures = [
            ("avg_likes", self.avg_likes),
            ("avg_comments", self.avg_comments),
            ("avg_engagement", self.avg_engagement),
            ("avg_views", self.avg_views),
            ("total_engagement", self.total_engagement),
            ("total_views", self.total_views),
        ];
        for (name, value) in figures {
            if !value.is_finite() || value < 0.0 {
                return Err(CoreError::InvalidInput(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Run-wide discovery knobs recorded in every record's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryParameters {
    pub posts_per_hashtag: usize,
    pub posts_to_scan: usize,
    pub scroll_count: u32,
    pub min_frequency: u32,
}

/// Auxiliary fields carried alongside a trend record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendMetadata {
    pub category: String,
    pub frequency: u32,
    pub posts_count: usize,
    pub sample_posts: Vec<String>,
    pub discovery_method: String,
    pub avg_likes: f64,
    pub avg_comments: f64,
    pub total_engagement: f64,
    pub total_views: f64,
    pub video_count: u32,
    pub posts_analyzed: usize,
    pub total_posts_scanned: usize,
    pub scroll_count: u32,
    pub min_frequency_threshold: u32,
    #[serde(deserialize_with = "lenient_utc::deserialize")]
    pub discovered_at: DateTime<Utc>,
    pub estimation: Option<Estimation>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, JsonValue>,
}

/// Normalized snapshot of one hashtag at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRecord {
    pub platform: String,
    pub url: String,
    pub hashtags: Vec<String>,
    pub likes: u64,
    pub comments: u64,
    pub views: u64,
    pub language: String,
    pub timestamp: DateTime<Utc>,
    pub engagement_score: f64,
    pub version: RunVersion,
    pub raw_blob: TrendMetadata,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl TrendRecord {
    /// Combine an observation and its engagement into a record.
    ///
    /// `first_seen` and `last_seen` are both set to `now`; keeping a stored
    /// `first_seen` intact is the writer's job.
    pub fn build(
        observation: &HashtagObservation,
        summary: &EngagementSummary,
        version: RunVersion,
        now: DateTime<Utc>,
        parameters: &DiscoveryParameters,
    ) -> Result<Self, CoreError> {
        let tag = observation.hashtag.trim().trim_start_matches('#');
        if tag.is_empty() {
            return Err(CoreError::InvalidInput("hashtag must not be empty".to_string()));
        }
        summary.validate()?;

        Ok(Self {
            platform: PLATFORM_NAME.to_string(),
            url: format!("{INSTAGRAM_EXPLORE_URL}tags/{tag}/"),
            hashtags: vec![format!("#{tag}")],
            likes: summary.avg_likes as u64,
            comments: summary.avg_comments as u64,
            views: summary.avg_views as u64,
            language: DEFAULT_LANGUAGE.to_string(),
            timestamp: now,
            engagement_score: summary.avg_engagement,
            version,
            raw_blob: TrendMetadata {
                category: observation.category.clone(),
                frequency: observation.frequency,
                posts_count: observation.posts_count,
                sample_posts: observation.sample_posts.clone(),
                discovery_method: DISCOVERY_METHOD.to_string(),
                avg_likes: summary.avg_likes,
                avg_comments: summary.avg_comments,
                total_engagement: summary.total_engagement,
                total_views: summary.total_views,
                video_count: summary.video_count,
                posts_analyzed: parameters.posts_per_hashtag,
                total_posts_scanned: parameters.posts_to_scan,
                scroll_count: parameters.scroll_count,
                min_frequency_threshold: parameters.min_frequency,
                discovered_at: now,
                estimation: summary.estimation,
                extras: BTreeMap::new(),
            },
            first_seen: Some(now),
            last_seen: Some(now),
        })
    }

    /// Store key: the single `#tag` string.
    pub fn key(&self) -> &str {
        self.hashtags.first().map(String::as_str).unwrap_or_default()
    }
}
