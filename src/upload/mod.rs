//! Upload module
//!
//! Runs one asset upload from request headers and body to an updated video
//! record:
//!
//! ```text
//! authenticate -> authorize -> parse -> validate -> store -> persist
//! ```
//!
//! Every stage fails fast and nothing is retried. A failure in `persist`
//! leaves the stored asset in place with no record pointing at it.

use crate::auth::{AuthError, AuthGate};
use crate::authz::{AuthzError, OwnershipGate};
use crate::config::UploadConfig;
use crate::media::{validate_content_type, AssetKind, ContentTypeError};
use crate::storage::{AssetStream, StorageBackend, StorageError};
use crate::store::{StoreError, Video, VideoStore};
use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use hyper::header::CONTENT_TYPE;
use hyper::{HeaderMap, StatusCode};
use multer::{Constraints, Multipart, SizeLimit};
use naming::StorageKey;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

pub mod naming;

/// Request validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("invalid video id '{0}'")]
    InvalidVideoId(String),

    #[error("request is not multipart/form-data: {0}")]
    NotMultipart(String),

    #[error("malformed multipart body: {0}")]
    Multipart(String),

    #[error("missing form field '{0}'")]
    MissingField(&'static str),

    #[error(transparent)]
    ContentType(#[from] ContentTypeError),

    #[error("file part is empty")]
    EmptyPayload,

    #[error("upload exceeds {0} bytes")]
    PayloadTooLarge(u64),
}

/// Upload pipeline errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Authorization(#[from] AuthzError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("stored {key} but failed to update video: {source}")]
    Persistence { key: String, source: StoreError },
}

impl UploadError {
    /// HTTP status for this failure
    pub fn status_code(&self) -> StatusCode {
        match self {
            UploadError::Auth(_) => StatusCode::UNAUTHORIZED,
            UploadError::Authorization(AuthzError::NotOwner { .. }) => StatusCode::UNAUTHORIZED,
            UploadError::Authorization(_) => StatusCode::BAD_REQUEST,
            UploadError::Validation(ValidationError::PayloadTooLarge(_)) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            UploadError::Validation(_) => StatusCode::BAD_REQUEST,
            UploadError::Storage(_) => StatusCode::BAD_REQUEST,
            UploadError::Persistence { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// Short client-facing message; the Display output is the cause
    pub fn message(&self) -> &'static str {
        match self {
            UploadError::Auth(AuthError::MissingCredential) => "Couldn't find JWT",
            UploadError::Auth(_) => "Couldn't validate JWT",
            UploadError::Authorization(AuthzError::NotOwner { .. }) => {
                "User is not the owner of this video"
            }
            UploadError::Authorization(_) => "Couldn't get video",
            UploadError::Validation(ValidationError::InvalidVideoId(_)) => "Invalid ID",
            UploadError::Validation(ValidationError::ContentType(_)) => "Invalid content type",
            UploadError::Validation(ValidationError::EmptyPayload) => "Empty file",
            UploadError::Validation(ValidationError::PayloadTooLarge(_)) => "File too large",
            UploadError::Validation(_) => "Couldn't parse form",
            UploadError::Storage(_) => "Couldn't store file",
            UploadError::Persistence { .. } => "Couldn't update video",
        }
    }
}

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Authenticate,
    Authorize,
    Parse,
    Validate,
    Store,
    Persist,
}

impl UploadStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStage::Authenticate => "authenticate",
            UploadStage::Authorize => "authorize",
            UploadStage::Parse => "parse",
            UploadStage::Validate => "validate",
            UploadStage::Store => "store",
            UploadStage::Persist => "persist",
        }
    }
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated, owner-checked asset upload
#[derive(Clone)]
pub struct UploadPipeline {
    auth: AuthGate,
    ownership: OwnershipGate,
    videos: Arc<dyn VideoStore>,
    storage: Arc<dyn StorageBackend>,
    limits: UploadConfig,
}

impl UploadPipeline {
    pub fn new(
        auth: AuthGate,
        videos: Arc<dyn VideoStore>,
        storage: Arc<dyn StorageBackend>,
        limits: UploadConfig,
    ) -> Self {
        Self {
            auth,
            ownership: OwnershipGate::new(videos.clone()),
            videos,
            storage,
            limits,
        }
    }

    fn size_limit(&self, kind: AssetKind) -> u64 {
        match kind {
            AssetKind::Thumbnail => self.limits.max_thumbnail_bytes,
            AssetKind::Video => self.limits.max_video_bytes,
        }
    }

    /// Run one upload
    ///
    /// `headers` are the request headers (bearer credential and multipart
    /// boundary); `body` is the raw request body. Returns the updated record.
    pub async fn upload<S, E>(
        &self,
        kind: AssetKind,
        video_id: &str,
        headers: &HeaderMap,
        body: S,
    ) -> Result<Video, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        let span = tracing::info_span!(
            "upload.pipeline",
            upload.kind = %kind,
            video.id = %video_id,
            user.id = tracing::field::Empty,
            upload.stage = tracing::field::Empty,
            storage.key = tracing::field::Empty,
        );

        async move {
            let start = Instant::now();
            let mut stage = UploadStage::Authenticate;

            match self.run(kind, video_id, headers, body, &mut stage).await {
                Ok(video) => {
                    crate::metrics::record_upload_duration(
                        kind.as_str(),
                        self.storage.name(),
                        start.elapsed().as_secs_f64(),
                    );
                    tracing::info!(
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Upload completed"
                    );
                    Ok(video)
                }
                Err(e) => {
                    crate::metrics::record_upload_failure(kind.as_str(), stage.as_str());
                    tracing::Span::current().record("upload.stage", stage.as_str());
                    if let UploadError::Persistence { ref key, .. } = e {
                        tracing::warn!(
                            storage.key = %key,
                            "Stored asset orphaned by failed video update"
                        );
                    }
                    tracing::warn!(stage = %stage, error = %e, "Upload failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run<S, E>(
        &self,
        kind: AssetKind,
        video_id: &str,
        headers: &HeaderMap,
        body: S,
        stage: &mut UploadStage,
    ) -> Result<Video, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        let span = tracing::Span::current();

        let video_id = Uuid::parse_str(video_id)
            .map_err(|_| ValidationError::InvalidVideoId(video_id.to_string()))?;

        let user_id = self.auth.authenticate(headers).await?;
        span.record("user.id", tracing::field::display(user_id));

        *stage = UploadStage::Authorize;
        let mut video = self.ownership.authorize(video_id, user_id).await?;

        *stage = UploadStage::Parse;
        let limit = self.size_limit(kind);
        let mut field = next_named_field(headers, body, kind, limit).await?;

        *stage = UploadStage::Validate;
        let raw_type = match field.headers().get(CONTENT_TYPE) {
            None => "",
            Some(value) => value.to_str().map_err(|_| {
                ValidationError::ContentType(ContentTypeError::Malformed(
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                ))
            })?,
        };
        let media = validate_content_type(raw_type, kind).map_err(ValidationError::from)?;

        // Zero-byte parts are rejected before any backend sees them
        let first = loop {
            match field.chunk().await {
                Ok(Some(chunk)) if chunk.is_empty() => continue,
                Ok(Some(chunk)) => break chunk,
                Ok(None) => return Err(ValidationError::EmptyPayload.into()),
                Err(e) => return Err(multipart_error(e).into()),
            }
        };

        *stage = UploadStage::Store;
        let key = StorageKey::generate(media.extension);
        span.record("storage.key", tracing::field::display(&key));

        let rest = field.map(|chunk| chunk.map_err(io::Error::other));
        let head = stream::once(async move { Ok::<_, io::Error>(first) });
        let asset: AssetStream = Box::pin(head.chain(rest));

        let stored = self
            .storage
            .store(&key, &media.media_type, asset)
            .await
            .map_err(size_exceeded_or_storage)?;

        *stage = UploadStage::Persist;
        match kind {
            AssetKind::Thumbnail => video.thumbnail_url = Some(stored.url.clone()),
            AssetKind::Video => video.video_url = Some(stored.url.clone()),
        }
        let updated = self
            .videos
            .update_video(&video)
            .await
            .map_err(|source| UploadError::Persistence {
                key: stored.key.clone(),
                source,
            })?;

        crate::metrics::record_upload_success(kind.as_str(), stored.bytes_written);
        tracing::debug!(url = %stored.url, bytes = stored.bytes_written, "Video record updated");
        Ok(updated)
    }
}

/// Parse the multipart body up to the part named for `kind`
async fn next_named_field<S, E>(
    headers: &HeaderMap,
    body: S,
    kind: AssetKind,
    limit: u64,
) -> Result<multer::Field<'static>, ValidationError>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| ValidationError::NotMultipart(e.to_string()))?;

    let constraints = Constraints::new().size_limit(SizeLimit::new().whole_stream(limit));
    let mut multipart = Multipart::with_constraints(body, boundary, constraints);

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some(kind.field_name()) {
            return Ok(field);
        }
        tracing::debug!(field = ?field.name(), "Skipping form field");
    }

    Err(ValidationError::MissingField(kind.field_name()))
}

fn multipart_error(err: multer::Error) -> ValidationError {
    match exceeded_limit(&err) {
        Some(limit) => ValidationError::PayloadTooLarge(limit),
        None => ValidationError::Multipart(err.to_string()),
    }
}

/// The size cap behind `err`, if the cap is what stopped the stream
///
/// multer may report the cap directly or wrapped in `StreamReadFailed`.
fn exceeded_limit(err: &multer::Error) -> Option<u64> {
    match err {
        multer::Error::StreamSizeExceeded { limit }
        | multer::Error::FieldSizeExceeded { limit, .. } => Some(*limit),
        multer::Error::StreamReadFailed(inner) => inner
            .downcast_ref::<multer::Error>()
            .and_then(exceeded_limit),
        _ => None,
    }
}

/// Body read failures caused by the size cap are reported as such
fn size_exceeded_or_storage(err: StorageError) -> UploadError {
    if let StorageError::BodyRead(ref io_err) = err {
        let limit = io_err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<multer::Error>())
            .and_then(exceeded_limit);
        if let Some(limit) = limit {
            return ValidationError::PayloadTooLarge(limit).into();
        }
    }
    UploadError::Storage(err)
}
