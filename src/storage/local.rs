//! Local filesystem storage
//!
//! Assets are written flat under `assets_root` and served back by this
//! process under `/assets/`.

use super::{copy_body, AssetStream, FetchedAsset, StorageBackend, StorageError, StoredAsset};
use crate::media::media_type_for_key;
use crate::upload::naming::{is_well_formed_key, StorageKey};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::io::ReaderStream;

/// Local filesystem storage backend
#[derive(Debug, Clone)]
pub struct LocalDiskStore {
    assets_root: PathBuf,
    public_url: String,
}

impl LocalDiskStore {
    /// Create a new LocalDiskStore, creating `assets_root` if needed
    ///
    /// # Arguments
    /// * `assets_root` - Directory assets are written to (e.g. "./assets")
    /// * `public_url` - Base URL of this server (e.g. "http://localhost:8091")
    pub async fn new(
        assets_root: impl Into<PathBuf>,
        public_url: &str,
    ) -> Result<Self, StorageError> {
        let assets_root = assets_root.into();

        fs::create_dir_all(&assets_root).await.map_err(|e| {
            StorageError::Config(format!(
                "Failed to create assets directory {}: {}",
                assets_root.display(),
                e
            ))
        })?;

        Ok(Self {
            assets_root,
            public_url: public_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn assets_root(&self) -> &Path {
        &self.assets_root
    }

    /// Public URL for a stored key
    pub fn url_for(&self, key: &str) -> String {
        format!("{}/assets/{}", self.public_url, key)
    }

    async fn discard(path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to remove partial asset"
            );
        }
    }
}

#[async_trait]
impl StorageBackend for LocalDiskStore {
    fn name(&self) -> &'static str {
        "local"
    }

    #[tracing::instrument(
        name = "storage.local.store",
        skip(self, body),
        fields(
            storage.backend = "local",
            storage.key = %key,
            upload.bytes_written = tracing::field::Empty
        ),
        err
    )]
    async fn store(
        &self,
        key: &StorageKey,
        _content_type: &str,
        body: AssetStream,
    ) -> Result<StoredAsset, StorageError> {
        let key = key.to_string();
        let path = self.assets_root.join(&key);

        let mut file = fs::File::create(&path)
            .await
            .map_err(|source| StorageError::Create {
                path: path.clone(),
                source,
            })?;

        let copied = match copy_body(body, &mut file).await {
            Ok(0) => Err(StorageError::Empty),
            Ok(n) => file.sync_all().await.map(|_| n).map_err(StorageError::Write),
            Err(e) => Err(e),
        };
        drop(file);

        let bytes_written = match copied {
            Ok(n) => n,
            Err(e) => {
                Self::discard(&path).await;
                return Err(e);
            }
        };

        tracing::Span::current().record("upload.bytes_written", bytes_written);
        tracing::info!(path = %path.display(), bytes_written, "Asset written to disk");

        Ok(StoredAsset {
            url: self.url_for(&key),
            key,
            bytes_written,
        })
    }

    async fn fetch(&self, key: &str) -> Result<Option<FetchedAsset>, StorageError> {
        if !is_well_formed_key(key) {
            return Ok(None);
        }

        let path = self.assets_root.join(key);
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };
        let content_length = file.metadata().await?.len();

        Ok(Some(FetchedAsset {
            content_type: media_type_for_key(key)
                .unwrap_or("application/octet-stream")
                .to_string(),
            content_length,
            body: Box::pin(ReaderStream::new(file)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::body_from;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_store_writes_file_and_builds_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path(), "http://localhost:8091/")
            .await
            .unwrap();
        let key = StorageKey::generate(".png");

        let stored = store
            .store(&key, "image/png", body_from(&["\u{89}PNG", "rest"]))
            .await
            .unwrap();

        assert_eq!(stored.key, key.to_string());
        assert_eq!(
            stored.url,
            format!("http://localhost:8091/assets/{}", key)
        );
        let on_disk = std::fs::read(dir.path().join(key.to_string())).unwrap();
        assert_eq!(on_disk, "\u{89}PNGrest".as_bytes());
        assert_eq!(stored.bytes_written, on_disk.len() as u64);
    }

    #[tokio::test]
    async fn test_empty_body_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path(), "http://localhost:8091")
            .await
            .unwrap();
        let key = StorageKey::generate(".jpg");

        let result = store.store(&key, "image/jpeg", body_from(&[])).await;

        assert!(matches!(result, Err(StorageError::Empty)));
        assert!(!dir.path().join(key.to_string()).exists());
    }

    #[tokio::test]
    async fn test_missing_root_fails_create() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path().join("assets"), "http://localhost:8091")
            .await
            .unwrap();
        std::fs::remove_dir(store.assets_root()).unwrap();

        let result = store
            .store(&StorageKey::generate(".png"), "image/png", body_from(&["x"]))
            .await;
        assert!(matches!(result, Err(StorageError::Create { .. })));
    }

    #[tokio::test]
    async fn test_fetch_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path(), "http://localhost:8091")
            .await
            .unwrap();
        let key = StorageKey::generate(".jpg");
        store
            .store(&key, "image/jpeg", body_from(&["jpeg bytes"]))
            .await
            .unwrap();

        let fetched = store.fetch(&key.to_string()).await.unwrap().unwrap();
        assert_eq!(fetched.content_type, "image/jpeg");
        assert_eq!(fetched.content_length, 10);
        assert_eq!(fetched.into_bytes().await.unwrap().as_ref(), b"jpeg bytes");

        assert!(store.fetch("../Cargo.toml").await.unwrap().is_none());
        let unknown = StorageKey::generate(".png").to_string();
        assert!(store.fetch(&unknown).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_streams_large_asset_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path(), "http://localhost:8091")
            .await
            .unwrap();
        let key = StorageKey::generate(".mp4").to_string();
        let data: Vec<u8> = (0..64 * 1024 * 4).map(|i| (i % 251) as u8).collect();
        std::fs::write(dir.path().join(&key), &data).unwrap();

        let mut fetched = store.fetch(&key).await.unwrap().unwrap();
        assert_eq!(fetched.content_type, "video/mp4");
        assert_eq!(fetched.content_length, data.len() as u64);

        let mut chunks = 0;
        let mut received = Vec::new();
        while let Some(chunk) = fetched.body.next().await {
            let chunk = chunk.unwrap();
            assert!(chunk.len() < data.len());
            received.extend_from_slice(&chunk);
            chunks += 1;
        }
        assert!(chunks > 1);
        assert_eq!(received, data);
    }
}
