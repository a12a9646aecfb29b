use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{sign_url_token, Bucket, ObjectStore, StorageError, StoredObject};

struct StoredEntry {
    data: Vec<u8>,
    content_type: String,
    updated: chrono::DateTime<Utc>,
}

/// In-memory [`ObjectStore`] for local development and tests.
///
/// Signed URLs point back at the server's dev storage route, so clients
/// can exercise the real upload flow against this backend.
pub struct MemoryObjectStore {
    base_url: String,
    signing_key: String,
    objects: RwLock<HashMap<(Bucket, String), StoredEntry>>,
}

impl MemoryObjectStore {
    pub fn new(base_url: impl Into<String>, signing_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signing_key: signing_key.into(),
            objects: RwLock::new(HashMap::new()),
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
        let expires_at = Utc::now().timestamp() + expires_in.as_secs() as i64;
        let signature = sign_url_token(
            &self.signing_key,
            method,
            bucket.as_str(),
            path,
            content_type,
            expires_at,
        );
        format!(
            "{}/{}/{}?expires={}&signature={}",
            self.base_url,
            bucket.as_str(),
            path,
            expires_at,
            signature
        )
    }

    pub fn content_type(&self, bucket: Bucket, path: &str) -> Option<String> {
        self.objects
            .read()
            .unwrap()
            .get(&(bucket, path.to_string()))
            .map(|entry| entry.content_type.clone())
    }

    pub fn object_count(&self, bucket: Bucket) -> usize {
        self.objects
            .read()
            .unwrap()
            .keys()
            .filter(|(b, _)| *b == bucket)
            .count()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, bucket: Bucket, prefix: &str) -> Result<Vec<StoredObject>, StorageError> {
        let objects = self.objects.read().unwrap();
        let mut listed: Vec<StoredObject> = objects
            .iter()
            .filter(|((b, name), _)| *b == bucket && name.starts_with(prefix))
            .map(|((_, name), entry)| StoredObject {
                name: name.clone(),
                size: entry.data.len() as u64,
                updated: Some(entry.updated),
            })
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }

    async fn put(
        &self,
        bucket: Bucket,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let mut objects = self.objects.write().unwrap();
        objects.insert(
            (bucket, path.to_string()),
            StoredEntry {
                data,
                content_type: content_type.to_string(),
                updated: Utc::now(),
            },
        );
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
