//! Spool files for object store uploads
//!
//! The object store client wants a seekable body of known length, so the
//! upload stream is first written to a private temporary file (mode 0600 on
//! unix).
//!
//! # Flow
//!
//! 1. Stream the body into a fresh file under the spool directory
//! 2. Compute SHA256 while writing; the put sends it as the object checksum
//! 3. Seek back to the start and verify the position
//! 4. Hand a duplicate handle to the put call
//!
//! The file is removed when the [`SpoolFile`] is dropped, on success and on
//! every error path.

use super::{AssetStream, StorageError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

/// Temporary file holding one spooled upload
///
/// Automatically cleaned up when dropped (RAII pattern).
pub struct SpoolFile {
    path: PathBuf,
    file: File,
    size: u64,
    checksum_sha256: String,
}

impl SpoolFile {
    /// Spool `body` into a new file under `dir`
    ///
    /// Fails with [`StorageError::Empty`] if the stream carried no bytes.
    pub async fn from_stream(dir: &Path, mut body: AssetStream) -> Result<Self, StorageError> {
        let path = dir.join(format!("tubely-upload-{}.tmp", uuid::Uuid::new_v4()));

        let mut options = OpenOptions::new();
        options.read(true).write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let file = options
            .open(&path)
            .await
            .map_err(|source| StorageError::Create {
                path: path.clone(),
                source,
            })?;
        crate::metrics::SPOOL_FILES_ACTIVE.inc();

        // From here on, Drop owns cleanup.
        let mut spool = Self {
            path,
            file,
            size: 0,
            checksum_sha256: String::new(),
        };

        let mut hasher = Sha256::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(StorageError::BodyRead)?;
            hasher.update(&chunk);
            spool
                .file
                .write_all(&chunk)
                .await
                .map_err(StorageError::Write)?;
            spool.size += chunk.len() as u64;
        }
        spool.file.flush().await.map_err(StorageError::Write)?;

        if spool.size == 0 {
            return Err(StorageError::Empty);
        }
        spool.checksum_sha256 = STANDARD.encode(hasher.finalize());

        spool.rewind().await?;
        Ok(spool)
    }

    /// Seek back to the start and confirm the position actually moved
    async fn rewind(&mut self) -> Result<(), StorageError> {
        let pos = self
            .file
            .seek(SeekFrom::Start(0))
            .await
            .map_err(|e| StorageError::Spool(format!("seek failed: {}", e)))?;

        if pos != 0 {
            return Err(StorageError::Spool(format!(
                "file pointer at {} after rewind",
                pos
            )));
        }
        Ok(())
    }

    /// Get the path to the spool file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the size of the file in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// SHA256 of the content, base64 encoded as S3 expects it
    pub fn checksum_sha256(&self) -> &str {
        &self.checksum_sha256
    }

    /// A second handle positioned at the start of the content
    ///
    /// The handle shares this file's cursor, which sits at offset 0 after
    /// spooling.
    pub async fn reader(&self) -> Result<File, StorageError> {
        self.file
            .try_clone()
            .await
            .map_err(|e| StorageError::Spool(format!("failed to duplicate handle: {}", e)))
    }
}

impl Drop for SpoolFile {
    fn drop(&mut self) {
        crate::metrics::SPOOL_FILES_ACTIVE.dec();
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to clean up spool file"
                );
            }
        }
    }
}
