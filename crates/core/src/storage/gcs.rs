use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{sign_url_token, Bucket, ObjectStore, StorageError, StoredObject};

/// Connection settings for the Google Cloud Storage backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcsConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Base URL baked into signed download/upload links.
    #[serde(default = "default_download_base")]
    pub download_base: String,
    /// OAuth bearer token issued by the deployment environment.
    pub access_token: String,
    /// Key for signing URL query parameters.
    pub signing_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://storage.googleapis.com".to_string()
}

fn default_download_base() -> String {
    "https://storage.googleapis.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// [`ObjectStore`] backed by the GCS JSON API.
pub struct GcsObjectStore {
    client: reqwest::Client,
    config: GcsConfig,
    uploads_bucket: String,
    outputs_bucket: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<GcsObjectInfo>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GcsObjectInfo {
    name: String,
    // The JSON API serializes sizes as strings.
    size: Option<String>,
    updated: Option<String>,
}

impl GcsObjectStore {
    pub fn new(
        config: GcsConfig,
        uploads_bucket: impl Into<String>,
        outputs_bucket: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            config,
            uploads_bucket: uploads_bucket.into(),
            outputs_bucket: outputs_bucket.into(),
        }
    }

    fn bucket_name(&self, bucket: Bucket) -> &str {
        match bucket {
            Bucket::Uploads => &self.uploads_bucket,
            Bucket::Outputs => &self.outputs_bucket,
        }
    }

    fn api_base(&self) -> &str {
        self.config.api_base.trim_end_matches('/')
    }

    fn map_error(err: reqwest::Error) -> StorageError {
        if err.is_timeout() {
            StorageError::Timeout
        } else if err.is_connect() {
            StorageError::Backend(format!("Connection failed: {}", err))
        } else {
            StorageError::Backend(err.to_string())
        }
    }

    fn signed_url(
        &self,
        method: &str,
        bucket: Bucket,
        path: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> String {
        let bucket_name = self.bucket_name(bucket);
        let expires_at = Utc::now().timestamp() + expires_in.as_secs() as i64;
        let signature = sign_url_token(
            &self.config.signing_key,
            method,
            bucket_name,
            path,
            content_type,
            expires_at,
        );
        format!(
            "{}/{}/{}?expires={}&signature={}",
            self.config.download_base.trim_end_matches('/'),
            bucket_name,
            path,
            expires_at,
            signature
        )
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn list(&self, bucket: Bucket, prefix: &str) -> Result<Vec<StoredObject>, StorageError> {
        let bucket_name = self.bucket_name(bucket);
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/storage/v1/b/{}/o?prefix={}",
                self.api_base(),
                bucket_name,
                urlencoding::encode(prefix)
            );
            if let Some(token) = &page_token {
                url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
            }

            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.config.access_token)
                .send()
                .await
                .map_err(Self::map_error)?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(StorageError::Backend(format!(
                    "List failed with status {}: {}",
                    status, body
                )));
            }

            let page: ListResponse = response.json().await.map_err(Self::map_error)?;
            debug!(
                "Listed {} objects from {}/{}",
                page.items.len(),
                bucket_name,
                prefix
            );
            for item in page.items {
                objects.push(StoredObject {
                    size: item.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0),
                    updated: item
                        .updated
                        .as_deref()
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map(|dt| dt.with_timezone(&Utc)),
                    name: item.name,
                });
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(objects)
    }

    async fn put(
        &self,
        bucket: Bucket,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let url = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.api_base(),
            self.bucket_name(bucket),
            urlencoding::encode(path)
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .header("Content-Type", content_type)
            .body(data)
            .send()
            .await
            .map_err(Self::map_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Backend(format!(
                "Upload failed with status {}: {}",
                status, body
            )));
        }
        Ok(())
    }

    async fn signed_upload_url(
        &self,
        bucket: Bucket,
        path: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        Ok(self.signed_url("PUT", bucket, path, content_type, expires_in))
    }

    async fn signed_download_url(
        &self,
        bucket: Bucket,
        path: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        Ok(self.signed_url("GET", bucket, path, "", expires_in))
    }
}
