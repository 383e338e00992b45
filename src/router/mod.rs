//! API Router
//!
//! Maps a request method and path onto a [`Route`]. Path parameters are
//! returned raw; the handlers parse and validate them.

use thiserror::Error;

/// Router errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("No route for path: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Method {method} not allowed for {path}")]
    MethodNotAllowed { method: String, path: String },
}

/// Routes served by the API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// POST /api/thumbnail_upload/{videoID}
    UploadThumbnail { video_id: String },
    /// POST /api/video_upload/{videoID}
    UploadVideo { video_id: String },
    /// POST /api/videos
    CreateVideo,
    /// GET /api/videos/{videoID}
    GetVideo { video_id: String },
    /// GET /assets/{key}
    Asset { key: String },
    /// GET /health
    Health,
}

/// Request line parser
pub struct RouteParser;

impl RouteParser {
    /// Parse a method and path into a route
    pub fn parse(method: &str, path: &str) -> Result<Route, RouterError> {
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();

        let (allowed, route) = match segments.as_slice() {
            ["health"] => ("GET", Route::Health),
            ["api", "videos"] => ("POST", Route::CreateVideo),
            ["api", "videos", id] => (
                "GET",
                Route::GetVideo {
                    video_id: Self::param(id, path)?,
                },
            ),
            ["api", "thumbnail_upload", id] => (
                "POST",
                Route::UploadThumbnail {
                    video_id: Self::param(id, path)?,
                },
            ),
            ["api", "video_upload", id] => (
                "POST",
                Route::UploadVideo {
                    video_id: Self::param(id, path)?,
                },
            ),
            ["assets", key] => (
                "GET",
                Route::Asset {
                    key: Self::param(key, path)?,
                },
            ),
            _ => return Err(RouterError::NotFound(path.to_string())),
        };

        if method != allowed {
            return Err(RouterError::MethodNotAllowed {
                method: method.to_string(),
                path: path.to_string(),
            });
        }

        Ok(route)
    }

    fn param(segment: &str, path: &str) -> Result<String, RouterError> {
        if segment.is_empty() {
            return Err(RouterError::InvalidPath(format!("empty segment in {}", path)));
        }
        Ok(segment.to_string())
    }
}
