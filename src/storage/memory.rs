//! In-memory storage
//!
//! Backend-owned map of assets, served back under `/assets/` like the local
//! disk store. Nothing is evicted implicitly.

use super::{AssetStream, FetchedAsset, StorageBackend, StorageError, StoredAsset};
use crate::upload::naming::StorageKey;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::StreamExt;

#[derive(Debug)]
struct HeldAsset {
    content_type: String,
    bytes: Bytes,
}

/// In-memory storage backend
#[derive(Debug)]
pub struct InMemoryStore {
    public_url: String,
    objects: DashMap<String, HeldAsset>,
}

impl InMemoryStore {
    pub fn new(public_url: &str) -> Self {
        Self {
            public_url: public_url.trim_end_matches('/').to_string(),
            objects: DashMap::new(),
        }
    }

    /// Remove an asset, returning whether it was present
    pub fn evict(&self, key: &str) -> bool {
        self.objects.remove(key).is_some()
    }

    /// Raw bytes of a stored asset
    pub fn bytes(&self, key: &str) -> Option<Bytes> {
        self.objects.get(key).map(|entry| entry.bytes.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl StorageBackend for InMemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn store(
        &self,
        key: &StorageKey,
        content_type: &str,
        mut body: AssetStream,
    ) -> Result<StoredAsset, StorageError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk.map_err(StorageError::BodyRead)?);
        }
        if buf.is_empty() {
            return Err(StorageError::Empty);
        }

        let key = key.to_string();
        let bytes_written = buf.len() as u64;
        self.objects.insert(
            key.clone(),
            HeldAsset {
                content_type: content_type.to_string(),
                bytes: buf.freeze(),
            },
        );
        tracing::debug!(key = %key, bytes_written, "Asset held in memory");

        Ok(StoredAsset {
            url: format!("{}/assets/{}", self.public_url, key),
            key,
            bytes_written,
        })
    }

    async fn fetch(&self, key: &str) -> Result<Option<FetchedAsset>, StorageError> {
        Ok(self.objects.get(key).map(|entry| {
            FetchedAsset::from_bytes(entry.content_type.clone(), entry.bytes.clone())
        }))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new("http://localhost:8091")
    }
}
