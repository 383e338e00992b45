//! Remote object storage
//!
//! Spools the asset to a private temp file, then issues exactly one
//! PutObject with the file as body. The spool file is removed before
//! `store` returns, whatever the outcome.

use super::spool::SpoolFile;
use super::{AssetStream, FetchedAsset, StorageBackend, StorageError, StoredAsset};
use crate::s3::{ObjectPutter, PutObjectInput, S3ClientConfig};
use crate::upload::naming::StorageKey;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// S3-backed storage
pub struct RemoteObjectStore {
    putter: Arc<dyn ObjectPutter>,
    config: S3ClientConfig,
    spool_dir: PathBuf,
}

impl RemoteObjectStore {
    pub fn new(
        putter: Arc<dyn ObjectPutter>,
        config: S3ClientConfig,
        spool_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            putter,
            config,
            spool_dir: spool_dir.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    pub fn url_for(&self, key: &str) -> String {
        self.config.object_url(key)
    }
}

#[async_trait]
impl StorageBackend for RemoteObjectStore {
    fn name(&self) -> &'static str {
        "s3"
    }

    #[tracing::instrument(
        name = "storage.s3.store",
        skip(self, body),
        fields(
            storage.backend = "s3",
            storage.key = %key,
            s3.bucket = %self.config.bucket,
            upload.bytes_written = tracing::field::Empty
        ),
        err
    )]
    async fn store(
        &self,
        key: &StorageKey,
        content_type: &str,
        body: AssetStream,
    ) -> Result<StoredAsset, StorageError> {
        let spool = SpoolFile::from_stream(&self.spool_dir, body).await?;
        tracing::debug!(
            path = %spool.path().display(),
            size = spool.size(),
            sha256 = %spool.checksum_sha256(),
            "Upload spooled"
        );

        let key = key.to_string();
        let input = PutObjectInput {
            bucket: self.config.bucket.clone(),
            key: key.clone(),
            content_type: content_type.to_string(),
            content_length: spool.size(),
            checksum_sha256: spool.checksum_sha256().to_string(),
            body: spool.reader().await?,
            body_path: spool.path().to_path_buf(),
        };

        let result = self.putter.put_object(input).await;
        let bytes_written = spool.size();
        drop(spool);
        let output = result?;

        tracing::Span::current().record("upload.bytes_written", bytes_written);
        tracing::info!(etag = ?output.etag, bytes_written, "Asset stored in bucket");

        Ok(StoredAsset {
            url: self.url_for(&key),
            key,
            bytes_written,
        })
    }

    async fn fetch(&self, _key: &str) -> Result<Option<FetchedAsset>, StorageError> {
        // Served by the bucket, not by us
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::{PutObjectOutput, S3ClientError};
    use crate::storage::body_from;
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;

    #[derive(Debug, Clone, PartialEq)]
    struct SeenPut {
        bucket: String,
        key: String,
        content_type: String,
        content_length: u64,
        checksum_sha256: String,
        body: Vec<u8>,
        spool_existed: bool,
        path: PathBuf,
    }

    #[derive(Default)]
    struct RecordingPutter {
        seen: Mutex<Vec<SeenPut>>,
        fail: bool,
    }

    #[async_trait]
    impl ObjectPutter for RecordingPutter {
        async fn put_object(
            &self,
            mut input: PutObjectInput,
        ) -> Result<PutObjectOutput, S3ClientError> {
            let mut body = Vec::new();
            input.body.read_to_end(&mut body).await.unwrap();
            self.seen.lock().unwrap().push(SeenPut {
                bucket: input.bucket,
                key: input.key,
                content_type: input.content_type,
                content_length: input.content_length,
                checksum_sha256: input.checksum_sha256,
                body,
                spool_existed: input.body_path.exists(),
                path: input.body_path,
            });
            if self.fail {
                Err(S3ClientError::RequestError("AccessDenied".into()))
            } else {
                Ok(PutObjectOutput {
                    etag: Some("\"abc\"".into()),
                })
            }
        }
    }

    fn client_config() -> S3ClientConfig {
        S3ClientConfig {
            bucket: "tubely-private".into(),
            region: "us-east-2".into(),
            endpoint: None,
            access_key: None,
            secret_key: None,
        }
    }

    #[tokio::test]
    async fn test_single_put_and_spool_removed() {
        let dir = tempfile::tempdir().unwrap();
        let putter = Arc::new(RecordingPutter::default());
        let store = RemoteObjectStore::new(putter.clone(), client_config(), dir.path());
        let key = StorageKey::generate(".mp4");

        let stored = store
            .store(&key, "video/mp4", body_from(&["0123", "456789"]))
            .await
            .unwrap();

        assert_eq!(
            stored.url,
            format!("https://tubely-private.s3.us-east-2.amazonaws.com/{}", key)
        );
        assert_eq!(stored.bytes_written, 10);

        let seen = putter.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].bucket, "tubely-private");
        assert_eq!(seen[0].key, key.to_string());
        assert_eq!(seen[0].content_type, "video/mp4");
        assert_eq!(seen[0].content_length, 10);
        assert_eq!(
            seen[0].checksum_sha256,
            "hNiYd/DUBB77a/kaFvAkjy/Vc+avBcGflr7bn4gveII="
        );
        assert_eq!(seen[0].body, b"0123456789");
        assert!(seen[0].spool_existed);
        assert!(!seen[0].path.exists());
    }

    #[tokio::test]
    async fn test_failed_put_removes_spool() {
        let dir = tempfile::tempdir().unwrap();
        let putter = Arc::new(RecordingPutter {
            fail: true,
            ..Default::default()
        });
        let store = RemoteObjectStore::new(putter.clone(), client_config(), dir.path());

        let result = store
            .store(&StorageKey::generate(".mp4"), "video/mp4", body_from(&["data"]))
            .await;

        assert!(matches!(result, Err(StorageError::Put(_))));
        assert_eq!(putter.seen.lock().unwrap().len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_empty_body_never_puts() {
        let dir = tempfile::tempdir().unwrap();
        let putter = Arc::new(RecordingPutter::default());
        let store = RemoteObjectStore::new(putter.clone(), client_config(), dir.path());

        let result = store
            .store(&StorageKey::generate(".mp4"), "video/mp4", body_from(&[]))
            .await;

        assert!(matches!(result, Err(StorageError::Empty)));
        assert!(putter.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_is_not_served_locally() {
        let dir = tempfile::tempdir().unwrap();
        let store = RemoteObjectStore::new(
            Arc::new(RecordingPutter::default()),
            client_config(),
            dir.path(),
        );
        assert!(store.fetch("anything.mp4").await.unwrap().is_none());
    }
}
