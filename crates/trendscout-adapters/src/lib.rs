//! Page automation contracts, session implementations, and HTML extraction.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use trendscout_core::INSTAGRAM_BASE_URL;

mod browserless;
mod extract;
mod fixture;

pub use browserless::{BrowserlessConfig, BrowserlessSession};
pub use extract::{
    extract_explore_sightings, extract_post_metrics, parse_compact_count, parse_view_count,
};
pub use fixture::FixtureSession;

pub const CRATE_NAME: &str = "trendscout-adapters";

pub const POST_LINK_SELECTOR: &str = "a[href*='/p/']";
pub const HOME_SELECTOR: &str = "svg[aria-label='Home']";

#[derive(Debug, Error)]
pub enum PageError {
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("browser API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("login failed: {0}")]
    Login(String),
    #[error("page script failed: {0}")]
    Script(String),
}

impl From<reqwest::Error> for PageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PageError::Timeout(err.to_string())
        } else {
            PageError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("invalid selector {selector}: {message}")]
    Selector { selector: String, message: String },
    #[error("no like counter found on post page")]
    MissingLikes,
}

/// Rendered HTML of one page, as captured by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedPage {
    pub url: String,
    pub html: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserOptions {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub locale: String,
    pub timezone: String,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: false,
            viewport_width: 1920,
            viewport_height: 1080,
            locale: "en-US".to_string(),
            timezone: "Asia/Kolkata".to_string(),
        }
    }
}

/// One logged-in browsing session, reused for discovery and post sampling.
#[async_trait]
pub trait PageSession: Send + Sync {
    fn describe(&self) -> String;

    async fn login(&self, credentials: &Credentials) -> Result<(), PageError>;

    /// Explore page HTML after `scroll_count` scrolls to the bottom.
    async fn explore(&self, scroll_count: u32) -> Result<CapturedPage, PageError>;

    /// A single post page. `post_url` may be site-relative (`/p/<code>/`).
    async fn post(&self, post_url: &str) -> Result<CapturedPage, PageError>;
}

pub fn absolute_post_url(post_url: &str) -> String {
    if post_url.starts_with("http") {
        post_url.to_string()
    } else {
        format!("{INSTAGRAM_BASE_URL}{post_url}")
    }
}

/// Shortcode segment following `/p/` in a post URL.
pub fn post_shortcode(post_url: &str) -> Option<&str> {
    let (_, rest) = post_url.split_once("/p/")?;
    rest.split(['/', '?', '#']).next().filter(|code| !code.is_empty())
}
