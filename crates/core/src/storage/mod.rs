//! Object storage abstraction for uploaded images and result artifacts.

mod gcs;
mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use gcs::{GcsConfig, GcsObjectStore};
pub use memory::MemoryObjectStore;

/// Logical bucket roles; concrete bucket names are configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Uploads,
    Outputs,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Uploads => "uploads",
            Bucket::Outputs => "outputs",
        }
    }
}

impl std::str::FromStr for Bucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploads" => Ok(Bucket::Uploads),
            "outputs" => Ok(Bucket::Outputs),
            other => Err(format!("Unknown bucket: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    /// Full object path within the bucket, e.g. `{project_id}/{filename}`.
    pub name: String,
    pub size: u64,
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Storage request timed out")]
    Timeout,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lists objects under `prefix`, non-recursive semantics are not
    /// needed here so all nested objects are returned.
    async fn list(&self, bucket: Bucket, prefix: &str) -> Result<Vec<StoredObject>, StorageError>;

    async fn put(
        &self,
        bucket: Bucket,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Returns a pre-signed URL a client can PUT the object to directly.
    async fn signed_upload_url(
        &self,
        bucket: Bucket,
        path: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError>;

    /// Returns a pre-signed URL for downloading the object.
    async fn signed_download_url(
        &self,
        bucket: Bucket,
        path: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError>;
}

const HMAC_BLOCK_SIZE: usize = 64;

/// HMAC-SHA256 over the canonical request string, hex encoded. Used by
/// both backends to sign URL query parameters. Upload signatures bind
/// the content type the client declared; downloads pass an empty one.
pub(crate) fn sign_url_token(
    key: &str,
    method: &str,
    bucket: &str,
    path: &str,
    content_type: &str,
    expires_at: i64,
) -> String {
    let message = format!(
        "{}\n{}\n{}\n{}\n{}",
        method, bucket, path, content_type, expires_at
    );

    let mut key_block = [0u8; HMAC_BLOCK_SIZE];
    let key_bytes = key.as_bytes();
    if key_bytes.len() > HMAC_BLOCK_SIZE {
        let digest = Sha256::digest(key_bytes);
        key_block[..digest.len()].copy_from_slice(&digest);
    } else {
        key_block[..key_bytes.len()].copy_from_slice(key_bytes);
    }

    let mut inner = Sha256::new();
    let ipad: Vec<u8> = key_block.iter().map(|b| b ^ 0x36).collect();
    inner.update(&ipad);
    inner.update(message.as_bytes());
    let inner_hash = inner.finalize();

    let mut outer = Sha256::new();
    let opad: Vec<u8> = key_block.iter().map(|b| b ^ 0x5c).collect();
    outer.update(&opad);
    outer.update(inner_hash);

    outer
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
