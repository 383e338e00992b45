//! Authorization module
//!
//! Ownership is the only policy: the authenticated user must own the video
//! an asset is uploaded for.

use crate::store::{StoreError, Video, VideoStore};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Authorization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("Video not found: {0}")]
    RecordNotFound(Uuid),

    #[error("User {user} does not own video {video}")]
    NotOwner { user: Uuid, video: Uuid },

    #[error("Record store error: {0}")]
    BackendError(String),
}

impl From<StoreError> for AuthzError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => AuthzError::RecordNotFound(id),
            StoreError::Backend(msg) => AuthzError::BackendError(msg),
        }
    }
}

/// Checks that a user owns the video they are uploading for
#[derive(Clone)]
pub struct OwnershipGate {
    videos: Arc<dyn VideoStore>,
}

impl OwnershipGate {
    pub fn new(videos: Arc<dyn VideoStore>) -> Self {
        Self { videos }
    }

    /// Fetch the video and verify `user_id` owns it
    ///
    /// Returns the fetched record for the caller to mutate.
    #[tracing::instrument(name = "authz.ownership", skip(self), err)]
    pub async fn authorize(&self, video_id: Uuid, user_id: Uuid) -> Result<Video, AuthzError> {
        let video = self.videos.get_video(video_id).await?;

        if video.user_id != user_id {
            return Err(AuthzError::NotOwner {
                user: user_id,
                video: video_id,
            });
        }

        Ok(video)
    }
}
