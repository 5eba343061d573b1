//! S3 object store

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;
use std::time::Duration;

use super::ObjectStore;
use crate::config::Settings;
use crate::error::{CoreError, Result};

/// Region used when none is configured
const DEFAULT_REGION: &str = "us-east-1";

/// Snapshot bucket on S3 or an S3-compatible service
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(
        bucket: &str,
        region: Option<&str>,
        endpoint: Option<&str>,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Result<Self> {
        if bucket.trim().is_empty() {
            return Err(CoreError::Config("s3_bucket must not be empty".to_string()));
        }

        let credentials = aws_sdk_s3::config::Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "snapscrub",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(aws_sdk_s3::config::Region::new(
                region.unwrap_or(DEFAULT_REGION).to_string(),
            ))
            .behavior_version_latest();

        if let Some(endpoint) = endpoint {
            // MinIO and friends need path-style addressing
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: bucket.to_string(),
        })
    }

    /// Build from settings; `None` when uploads are not configured
    pub fn from_settings(settings: &Settings) -> Result<Option<Self>> {
        if !settings.upload_enabled() {
            return Ok(None);
        }
        let (Some(key_id), Some(secret)) = (
            settings.aws_access_key_id.as_deref(),
            settings.aws_secret_access_key.as_deref(),
        ) else {
            return Ok(None);
        };

        Self::new(
            &settings.s3_bucket,
            settings.s3_bucket_region.as_deref(),
            settings.s3_endpoint.as_deref(),
            key_id,
            secret,
        )
        .map(Some)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn location(&self) -> String {
        format!("s3://{}", self.bucket)
    }

    async fn put_object(&self, key: &str, path: &Path) -> Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| CoreError::Upload(format!("Failed to read {}: {}", path.display(), e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| CoreError::Upload(format!("S3 put {} failed: {}", key, e)))?;

        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let output = request
                .send()
                .await
                .map_err(|e| CoreError::Storage(format!("S3 list {} failed: {}", prefix, e)))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter(|key| !key.ends_with('/'))
                    .map(str::to_string),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }

    async fn presigned_get_url(&self, key: &str, expires_in: Duration) -> Result<String> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| CoreError::Storage(format!("Invalid presign duration: {}", e)))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| CoreError::Storage(format!("S3 presign {} failed: {}", key, e)))?;

        Ok(request.uri().to_string())
    }
}
