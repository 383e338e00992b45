//! Asset storage backends
//!
//! Every backend implements [`StorageBackend::store`]: consume the validated
//! asset stream, persist it under a generated key and return the public URL.
//!
//! | Backend | Persists to | URL |
//! |---------|-------------|-----|
//! | [`LocalDiskStore`] | `assets_root/<key>` | `<public_url>/assets/<key>` |
//! | [`RemoteObjectStore`] | spool file, then one PutObject | `https://<bucket>.s3.<region>...` |
//! | [`InMemoryStore`] | backend-owned map | `<public_url>/assets/<key>` |

use crate::config::{StorageBackendKind, StorageConfig};
use crate::s3::{S3Client, S3ClientConfig, S3ClientError};
use crate::upload::naming::StorageKey;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub mod local;
pub mod memory;
pub mod s3;
pub mod spool;

pub use local::LocalDiskStore;
pub use memory::InMemoryStore;
pub use s3::RemoteObjectStore;
pub use spool::SpoolFile;

/// The asset body handed to a backend
pub type AssetStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create {}: {source}", .path.display())]
    Create { path: PathBuf, source: io::Error },

    #[error("Failed to write asset: {0}")]
    Write(io::Error),

    #[error("Failed to read upload body: {0}")]
    BodyRead(io::Error),

    #[error("No bytes were written")]
    Empty,

    #[error("Spool file error: {0}")]
    Spool(String),

    #[error("Object store put failed: {0}")]
    Put(#[from] S3ClientError),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result of a durable write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub key: String,
    pub url: String,
    pub bytes_written: u64,
}

/// An asset served back by this process
///
/// The body is streamed; `content_length` is known up front so the response
/// can carry a `Content-Length` header.
pub struct FetchedAsset {
    pub content_type: String,
    pub content_length: u64,
    pub body: AssetStream,
}

impl FetchedAsset {
    /// Wrap bytes that are already in memory
    pub fn from_bytes(content_type: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            content_type: content_type.into(),
            content_length: bytes.len() as u64,
            body: Box::pin(futures::stream::once(async move { Ok(bytes) })),
        }
    }

    /// Drain the body into one buffer
    pub async fn into_bytes(mut self) -> Result<Bytes, io::Error> {
        let mut buf = bytes::BytesMut::with_capacity(self.content_length as usize);
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl std::fmt::Debug for FetchedAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedAsset")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Storage backend trait
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name for logs and metrics
    fn name(&self) -> &'static str;

    /// Persist `body` under `key`
    ///
    /// Returns only once the bytes are durably stored. Fails with
    /// [`StorageError::Empty`] if the stream yields no bytes.
    async fn store(
        &self,
        key: &StorageKey,
        content_type: &str,
        body: AssetStream,
    ) -> Result<StoredAsset, StorageError>;

    /// Read back an asset this process serves itself
    ///
    /// `Ok(None)` when the key is unknown or the backend's assets are served
    /// elsewhere.
    async fn fetch(&self, key: &str) -> Result<Option<FetchedAsset>, StorageError>;
}

/// Copy a body stream into `writer`, returning the byte count.
///
/// Read failures and write failures are reported separately so callers can
/// tell a broken upload from a broken disk.
pub(crate) async fn copy_body<W>(mut body: AssetStream, writer: &mut W) -> Result<u64, StorageError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(StorageError::BodyRead)?;
        writer.write_all(&chunk).await.map_err(StorageError::Write)?;
        written += chunk.len() as u64;
    }
    writer.flush().await.map_err(StorageError::Write)?;
    Ok(written)
}

/// Build the configured storage backend
pub async fn from_config(
    config: &StorageConfig,
    public_url: &str,
) -> Result<Arc<dyn StorageBackend>, StorageError> {
    match config.backend {
        StorageBackendKind::Local => {
            let root = config
                .assets_root
                .clone()
                .ok_or_else(|| StorageError::Config("missing assets_root".into()))?;
            Ok(Arc::new(LocalDiskStore::new(root, public_url).await?))
        }
        StorageBackendKind::S3 => {
            let client_config = S3ClientConfig {
                bucket: config.bucket.clone().unwrap_or_default(),
                region: config.region.clone().unwrap_or_default(),
                endpoint: config.endpoint.clone(),
                access_key: config.access_key.clone(),
                secret_key: config.secret_key.clone(),
            };
            let client = S3Client::new(client_config.clone())
                .await
                .map_err(|e| StorageError::Config(e.to_string()))?;
            Ok(Arc::new(RemoteObjectStore::new(
                Arc::new(client),
                client_config,
                config.spool_dir(),
            )))
        }
        StorageBackendKind::Memory => Ok(Arc::new(InMemoryStore::new(public_url))),
    }
}

#[cfg(test)]
pub(crate) fn body_from(chunks: &[&'static str]) -> AssetStream {
    let chunks: Vec<Result<Bytes, io::Error>> = chunks
        .iter()
        .map(|c| Ok(Bytes::from_static(c.as_bytes())))
        .collect();
    Box::pin(futures::stream::iter(chunks))
}
