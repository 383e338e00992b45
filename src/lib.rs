//! Tubely Uploadr Library
//!
//! Authenticated thumbnail and video uploads for video records.
//!
//! # Features
//!
//! - **Ownership checks**: only the owner of a video can attach assets to it
//! - **Strict media types**: PNG/JPEG thumbnails, MP4 videos
//! - **Pluggable storage**: local disk, S3 (spooled single PUT), or in-memory
//! - **Unguessable keys**: 256-bit random storage keys
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tubely_uploadr::{config::Config, server::Server, storage, store::InMemoryVideoStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let backend = storage::from_config(&config.storage, &config.server.public_url).await?;
//!     let server = Server::new(&config, Arc::new(InMemoryVideoStore::new()), backend).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod authz;
pub mod config;
pub mod media;
pub mod metrics;
pub mod router;
pub mod s3;
pub mod server;
pub mod storage;
pub mod store;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use server::Server;
pub use upload::{UploadError, UploadPipeline};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
