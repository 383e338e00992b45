//! Content-type validation
//!
//! A single ordered table maps base media types to the asset kind that may
//! carry them and the file extension used for the storage key.

use std::fmt;
use thiserror::Error;

/// The kind of asset an upload operation accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Thumbnail,
    Video,
}

impl AssetKind {
    /// Multipart field that carries the file part
    pub fn field_name(&self) -> &'static str {
        match self {
            AssetKind::Thumbnail => "thumbnail",
            AssetKind::Video => "video",
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.field_name()
    }

    /// Base media types accepted for this kind, in table order
    pub fn allowed_media_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        MEDIA_TABLE
            .iter()
            .filter(move |rule| rule.kind == *self)
            .map(|rule| rule.media_type)
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the media table
#[derive(Debug, Clone, Copy)]
pub struct MediaRule {
    pub media_type: &'static str,
    pub extension: &'static str,
    pub kind: AssetKind,
}

/// Allowed media types, consulted once per upload
pub const MEDIA_TABLE: &[MediaRule] = &[
    MediaRule {
        media_type: "image/png",
        extension: ".png",
        kind: AssetKind::Thumbnail,
    },
    MediaRule {
        media_type: "image/jpeg",
        extension: ".jpg",
        kind: AssetKind::Thumbnail,
    },
    MediaRule {
        media_type: "video/mp4",
        extension: ".mp4",
        kind: AssetKind::Video,
    },
];

/// Content-type validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentTypeError {
    #[error("missing Content-Type")]
    Missing,

    #[error("malformed Content-Type '{0}'")]
    Malformed(String),

    #[error("unsupported media type '{media_type}' for {kind} upload")]
    Unsupported { media_type: String, kind: AssetKind },
}

/// A content type that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedMedia {
    /// Lower-cased base media type, parameters stripped
    pub media_type: String,
    pub extension: &'static str,
}

/// Validate a raw `Content-Type` header value for an upload kind
///
/// ```
/// use tubely_uploadr::media::{validate_content_type, AssetKind};
///
/// let media = validate_content_type("image/jpeg; q=0.9", AssetKind::Thumbnail).unwrap();
/// assert_eq!(media.extension, ".jpg");
/// ```
pub fn validate_content_type(
    raw: &str,
    kind: AssetKind,
) -> Result<ValidatedMedia, ContentTypeError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ContentTypeError::Missing);
    }

    let parsed: mime::Mime = raw
        .parse()
        .map_err(|_| ContentTypeError::Malformed(raw.to_string()))?;
    let media_type = parsed.essence_str().to_ascii_lowercase();

    MEDIA_TABLE
        .iter()
        .find(|rule| rule.kind == kind && rule.media_type == media_type)
        .map(|rule| ValidatedMedia {
            media_type: rule.media_type.to_string(),
            extension: rule.extension,
        })
        .ok_or(ContentTypeError::Unsupported { media_type, kind })
}

/// Media type for a storage key, looked up by its extension
pub fn media_type_for_key(key: &str) -> Option<&'static str> {
    MEDIA_TABLE
        .iter()
        .find(|rule| key.ends_with(rule.extension))
        .map(|rule| rule.media_type)
}
