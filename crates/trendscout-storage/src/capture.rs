use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use trendscout_core::RunVersion;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Explore,
    Post,
}

impl fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureKind::Explore => f.write_str("explore"),
            CaptureKind::Post => f.write_str("posts"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredCapture {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Hash-addressed, write-once storage for captured page HTML.
#[derive(Debug, Clone)]
pub struct CaptureStore {
    root: PathBuf,
}

impl CaptureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn capture_relative_path(
        &self,
        captured_at: DateTime<Utc>,
        run: RunVersion,
        kind: CaptureKind,
        content_hash: &str,
    ) -> PathBuf {
        PathBuf::from(captured_at.format("%Y%m%d").to_string())
            .join(run.to_string())
            .join(kind.to_string())
            .join(format!("{content_hash}.html"))
    }

    /// Write `html` under its content hash; identical captures are stored once.
    pub async fn store_capture(
        &self,
        captured_at: DateTime<Utc>,
        run: RunVersion,
        kind: CaptureKind,
        html: &str,
    ) -> anyhow::Result<StoredCapture> {
        let bytes = html.as_bytes();
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.capture_relative_path(captured_at, run, kind, &content_hash);
        let absolute_path = self.root.join(&relative_path);
        let Some(parent) = absolute_path.parent().map(Path::to_path_buf) else {
            anyhow::bail!("capture path {} has no parent", absolute_path.display());
        };

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating capture directory {}", parent.display()))?;

        let stored = |deduplicated| StoredCapture {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking capture path {}", absolute_path.display()))?
        {
            return Ok(stored(true));
        }

        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp capture file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp capture file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp capture file {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(stored(false)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(stored(true))
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "renaming temp capture {} -> {}",
                        temp_path.display(),
                        absolute_path.display()
                    )
                })
            }
        }
    }
}
