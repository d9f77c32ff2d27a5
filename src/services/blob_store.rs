//! Blob store client
//!
//! Document bytes live in the storage service, addressed by the upload's
//! `blob_ref`. Only reads are needed here; uploads reach storage directly.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{GateError, Result};

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a blob by reference. Missing → `NotFound`.
    async fn get(&self, blob_ref: &str) -> Result<Bytes>;
}

/// Reads from `{storage_url}/blob/{blob_ref}`
pub struct HttpBlobStore {
    storage_url: String,
    http_client: reqwest::Client,
}

impl HttpBlobStore {
    pub fn new(storage_url: &str, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("evidence-gate/0.1")
            .build()
            .unwrap_or_default();

        Self {
            storage_url: storage_url.trim_end_matches('/').to_string(),
            http_client,
        }
    }

    fn blob_url(&self, blob_ref: &str) -> String {
        format!(
            "{}/blob/{}",
            self.storage_url,
            urlencoding::encode(blob_ref)
        )
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn get(&self, blob_ref: &str) -> Result<Bytes> {
        let url = self.blob_url(blob_ref);
        let response = self.http_client.get(&url).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(GateError::NotFound(format!("blob {}", blob_ref)));
        }
        if !status.is_success() {
            warn!(blob = %blob_ref, status = %status, "storage returned an error");
            return Err(GateError::Upstream(format!("storage returned {}", status)));
        }

        let data = response.bytes().await?;
        debug!(blob = %blob_ref, size = data.len(), "blob fetched from storage");
        Ok(data)
    }
}

/// In-memory blobs for dev mode and tests
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Bytes>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, blob_ref: &str, data: impl Into<Bytes>) {
        self.blobs.insert(blob_ref.to_string(), data.into());
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, blob_ref: &str) -> Result<Bytes> {
        self.blobs
            .get(blob_ref)
            .map(|b| b.clone())
            .ok_or_else(|| GateError::NotFound(format!("blob {}", blob_ref)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_blob_store() {
        let store = MemoryBlobStore::new();
        store.put("sha256-abc", Bytes::from_static(b"%PDF-1.7"));

        assert_eq!(store.get("sha256-abc").await.unwrap(), Bytes::from_static(b"%PDF-1.7"));
        assert!(matches!(
            store.get("sha256-missing").await,
            Err(GateError::NotFound(_))
        ));
    }

    #[test]
    fn test_blob_url() {
        let store = HttpBlobStore::new("http://storage:8090/", Duration::from_secs(5));
        assert_eq!(store.blob_url("sha256-abc"), "http://storage:8090/blob/sha256-abc");
        assert_eq!(store.blob_url("a/b"), "http://storage:8090/blob/a%2Fb");
    }
}
