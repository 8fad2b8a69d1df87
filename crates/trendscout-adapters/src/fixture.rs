use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};
use trendscout_core::INSTAGRAM_EXPLORE_URL;

use crate::{absolute_post_url, post_shortcode, CapturedPage, Credentials, PageError, PageSession};

/// Replays previously captured pages from disk.
///
/// Layout: `<root>/explore.html` and `<root>/posts/<shortcode>.html`.
#[derive(Debug, Clone)]
pub struct FixtureSession {
    root: PathBuf,
}

impl FixtureSession {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read_page(&self, url: String, path: PathBuf) -> Result<CapturedPage, PageError> {
        let html = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| PageError::Navigation {
                url: url.clone(),
                message: format!("no captured page at {}: {e}", path.display()),
            })?;
        debug!(path = %path.display(), bytes = html.len(), "replayed captured page");
        Ok(CapturedPage {
            url,
            html,
            captured_at: Utc::now(),
        })
    }
}

#[async_trait]
impl PageSession for FixtureSession {
    fn describe(&self) -> String {
        format!("captured pages in {}", self.root.display())
    }

    async fn login(&self, credentials: &Credentials) -> Result<(), PageError> {
        info!(username = %credentials.username, "replay session; login skipped");
        Ok(())
    }

    async fn explore(&self, _scroll_count: u32) -> Result<CapturedPage, PageError> {
        self.read_page(INSTAGRAM_EXPLORE_URL.to_string(), self.root.join("explore.html"))
            .await
    }

    async fn post(&self, post_url: &str) -> Result<CapturedPage, PageError> {
        let url = absolute_post_url(post_url);
        let Some(code) = post_shortcode(post_url) else {
            return Err(PageError::Navigation {
                url,
                message: "not a post URL".to_string(),
            });
        };
        let path = self.root.join("posts").join(format!("{code}.html"));
        self.read_page(url, path).await
    }
}
