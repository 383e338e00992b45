//! Video record store
//!
//! The upload pipeline only needs to fetch a record by id and write it back
//! once an asset has been stored. [`InMemoryVideoStore`] backs the binary and
//! the tests; a database-backed store plugs in through [`VideoStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Record store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Video not found: {0}")]
    NotFound(Uuid),

    #[error("Record store backend error: {0}")]
    Backend(String),
}

/// A video record that uploaded assets attach to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub user_id: Uuid,
    pub thumbnail_url: Option<String>,
    pub video_url: Option<String>,
}

/// Parameters for creating a video record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVideo {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Video record store
#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Fetch a record by id
    async fn get_video(&self, id: Uuid) -> Result<Video, StoreError>;

    /// Replace a stored record; `updated_at` is set by the store
    async fn update_video(&self, video: &Video) -> Result<Video, StoreError>;

    /// Create a record owned by `user_id`
    async fn create_video(&self, user_id: Uuid, params: NewVideo) -> Result<Video, StoreError>;
}

/// Process-local record store
#[derive(Default)]
pub struct InMemoryVideoStore {
    videos: DashMap<Uuid, Video>,
}

impl InMemoryVideoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }
}

#[async_trait]
impl VideoStore for InMemoryVideoStore {
    async fn get_video(&self, id: Uuid) -> Result<Video, StoreError> {
        self.videos
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_video(&self, video: &Video) -> Result<Video, StoreError> {
        let mut entry = self
            .videos
            .get_mut(&video.id)
            .ok_or(StoreError::NotFound(video.id))?;

        let mut updated = video.clone();
        updated.updated_at = Utc::now();
        *entry = updated.clone();
        Ok(updated)
    }

    async fn create_video(&self, user_id: Uuid, params: NewVideo) -> Result<Video, StoreError> {
        let now = Utc::now();
        let video = Video {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            title: params.title,
            description: params.description,
            user_id,
            thumbnail_url: None,
            video_url: None,
        };
        self.videos.insert(video.id, video.clone());
        Ok(video)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_video(title: &str) -> NewVideo {
        NewVideo {
            title: title.into(),
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryVideoStore::new();
        let owner = Uuid::new_v4();
        let created = store.create_video(owner, new_video("boots")).await.unwrap();

        let fetched = store.get_video(created.id).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.user_id, owner);
        assert!(fetched.thumbnail_url.is_none());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = InMemoryVideoStore::new();
        let id = Uuid::new_v4();
        assert_eq!(store.get_video(id).await, Err(StoreError::NotFound(id)));
    }

    #[tokio::test]
    async fn test_update_bumps_timestamp() {
        let store = InMemoryVideoStore::new();
        let mut video = store
            .create_video(Uuid::new_v4(), new_video("boots"))
            .await
            .unwrap();
        video.video_url = Some("https://bucket.s3.us-east-2.amazonaws.com/x.mp4".into());

        let updated = store.update_video(&video).await.unwrap();
        assert_eq!(updated.video_url, video.video_url);
        assert!(updated.updated_at >= video.updated_at);
        assert_eq!(store.get_video(video.id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn test_update_missing() {
        let store = InMemoryVideoStore::new();
        let now = Utc::now();
        let video = Video {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            title: "ghost".into(),
            description: String::new(),
            user_id: Uuid::new_v4(),
            thumbnail_url: None,
            video_url: None,
        };
        assert!(matches!(
            store.update_video(&video).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
