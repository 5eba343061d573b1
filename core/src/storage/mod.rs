//! Snapshot storage on an object store
//!
//! Snapshots live under `{app_name}/{env}/mysql/{timestamp}/{filename}`.
//! Timestamps are zero-padded `YYYYMMDDHHMMSS`, so the lexically greatest
//! one is the most recent.

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::domain::SnapshotKey;
use crate::error::{CoreError, Result};
use crate::export::remove_files;

pub mod s3;

pub use s3::S3ObjectStore;

/// Lifetime of download links
pub const PRESIGNED_URL_TTL: Duration = Duration::from_secs(600);

/// The object-storage collaborator
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human-readable location for log lines
    fn location(&self) -> String;

    /// Upload a local file to `key`
    async fn put_object(&self, key: &str, path: &Path) -> Result<()>;

    /// Keys under `prefix`, in store order
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Time-limited GET link for `key`
    async fn presigned_get_url(&self, key: &str, expires_in: Duration) -> Result<String>;
}

/// Timestamp segment of a key directly under `prefix`
pub fn timestamp_from_key(prefix: &str, key: &str) -> Option<String> {
    let pattern = format!(r"^{}/(\d{{14}})/", regex::escape(prefix));
    let re = Regex::new(&pattern).ok()?;
    re.captures(key)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Most recent snapshot timestamp among `keys`
pub fn latest_timestamp<'a>(
    prefix: &str,
    keys: impl IntoIterator<Item = &'a str>,
) -> Option<String> {
    keys.into_iter()
        .filter_map(|key| timestamp_from_key(prefix, key))
        .max()
}

/// Uploads and locates snapshots of one application
#[derive(Clone)]
pub struct SnapshotStore {
    store: Arc<dyn ObjectStore>,
    http: reqwest::Client,
    app_name: String,
}

impl SnapshotStore {
    pub fn new(store: Arc<dyn ObjectStore>, app_name: &str) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            app_name: app_name.to_string(),
        }
    }

    /// Upload a compressed dump under a fresh timestamp, then delete the
    /// local file.
    pub async fn upload(&self, env: &str, compressed_path: &Path) -> Result<SnapshotKey> {
        let filename = compressed_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                CoreError::Upload(format!("Invalid snapshot path {}", compressed_path.display()))
            })?;

        let key = SnapshotKey::new(&self.app_name, env, Utc::now(), filename);
        info!(
            key = %key,
            "Uploading to {}",
            self.store.location()
        );

        self.store.put_object(&key.to_string(), compressed_path).await?;
        // The snapshot is stored; a leftover local file is not a failure
        remove_files(&[compressed_path]).await;

        Ok(key)
    }

    /// Latest snapshot timestamp for `env`, if any exists
    pub async fn resolve_latest(&self, env: &str) -> Result<Option<String>> {
        let prefix = SnapshotKey::env_prefix(&self.app_name, env);
        let keys = self.store.list_keys(&prefix).await?;
        Ok(latest_timestamp(&prefix, keys.iter().map(String::as_str)))
    }

    /// Download the first file of a snapshot to `destination`
    pub async fn fetch(&self, env: &str, timestamp: &str, destination: &Path) -> Result<PathBuf> {
        let prefix = format!(
            "{}/",
            SnapshotKey::snapshot_prefix(&self.app_name, env, timestamp)
        );
        let key = self
            .store
            .list_keys(&prefix)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::SnapshotNotFound(prefix.clone()))?;

        let url = self
            .store
            .presigned_get_url(&key, PRESIGNED_URL_TTL)
            .await?;

        info!(key = %key, "Downloading snapshot to {}", destination.display());
        self.download(&url, destination).await?;
        Ok(destination.to_path_buf())
    }

    async fn download(&self, url: &str, destination: &Path) -> Result<()> {
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CoreError::Download(e.to_string()))?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(destination).await?;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| CoreError::Download(e.to_string()))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(())
    }
}
