//! Configuration module for Tubely Uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and comprehensive validation.
//!
//! Every component receives the slice of configuration it needs at
//! construction time; nothing here is read lazily from the environment once
//! the file has been loaded.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// True if `value` still holds a `${VAR}` placeholder the loader could not expand
fn has_unexpanded_var(value: &str) -> bool {
    value.contains("${")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_http_url(&self.server.public_url) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid public_url '{}': must start with http:// or https://",
                self.server.public_url
            )));
        }

        if self.auth.jwt.secret.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "JWT secret cannot be empty".into(),
            ));
        }
        if has_unexpanded_var(&self.auth.jwt.secret) {
            return Err(ConfigError::ValidationError(
                "JWT secret references an unset environment variable".into(),
            ));
        }

        match self.auth.jwt.algorithm.to_uppercase().as_str() {
            "HS256" | "RS256" | "ES256" => {}
            alg => {
                return Err(ConfigError::ValidationError(format!(
                    "Unsupported JWT algorithm '{}': must be HS256, RS256 or ES256",
                    alg
                )))
            }
        }

        match &self.storage.backend {
            StorageBackendKind::Local => {
                let root = self.storage.assets_root.as_ref().ok_or_else(|| {
                    ConfigError::ValidationError(
                        "Local storage requires 'assets_root'".into(),
                    )
                })?;
                if root.as_os_str().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "Local storage 'assets_root' cannot be empty".into(),
                    ));
                }
            }
            StorageBackendKind::S3 => {
                let bucket = self.storage.bucket.as_deref().unwrap_or_default();
                let region = self.storage.region.as_deref().unwrap_or_default();
                if bucket.trim().is_empty() || region.trim().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "S3 storage requires non-empty 'bucket' and 'region'".into(),
                    ));
                }
                let keys = [&self.storage.access_key, &self.storage.secret_key];
                if keys.iter().filter_map(|k| k.as_deref()).any(has_unexpanded_var) {
                    return Err(ConfigError::ValidationError(
                        "S3 credentials reference an unset environment variable".into(),
                    ));
                }
                if let Some(ref endpoint) = self.storage.endpoint {
                    if !is_valid_http_url(endpoint) {
                        return Err(ConfigError::ValidationError(format!(
                            "Invalid S3 endpoint '{}': must start with http:// or https://",
                            endpoint
                        )));
                    }
                }
            }
            StorageBackendKind::Memory => {}
        }

        if self.upload.max_thumbnail_bytes == 0 || self.upload.max_video_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "Upload size limits must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    /// Base URL under which `/assets/` is reachable by clients
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

fn default_public_url() -> String {
    "http://localhost:8091".to_string()
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt: JwtConfig,
}

/// JWT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Shared secret for HS256, PEM public key for RS256/ES256
    pub secret: String,
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,
    #[serde(default)]
    pub issuer: Option<String>,
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

/// Which storage backend holds uploaded assets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    Local,
    S3,
    Memory,
}

/// Storage configuration
///
/// A flat section: only the keys relevant to `backend` are consulted.
///
/// ```yaml
/// storage:
///   backend: "s3"
///   bucket: "tubely-videos"
///   region: "us-east-2"
///   spool_dir: "/var/tmp/tubely"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    #[serde(default)]
    pub assets_root: Option<PathBuf>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Directory for spooled uploads. Defaults to the OS temp dir.
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Local disk storage rooted at `assets_root`
    pub fn local(assets_root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendKind::Local,
            assets_root: Some(assets_root.into()),
            bucket: None,
            region: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
            spool_dir: None,
        }
    }

    /// Process-local in-memory storage
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendKind::Memory,
            ..Self::local(PathBuf::new())
        }
    }

    /// S3 storage for `bucket` in `region`
    pub fn s3(bucket: &str, region: &str) -> Self {
        Self {
            backend: StorageBackendKind::S3,
            assets_root: None,
            bucket: Some(bucket.to_string()),
            region: Some(region.to_string()),
            ..Self::local(PathBuf::new())
        }
    }

    /// Resolved spool directory
    pub fn spool_dir(&self) -> PathBuf {
        self.spool_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Upload limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_thumbnail_bytes")]
    pub max_thumbnail_bytes: u64,
    #[serde(default = "default_max_video_bytes")]
    pub max_video_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_thumbnail_bytes: default_max_thumbnail_bytes(),
            max_video_bytes: default_max_video_bytes(),
        }
    }
}

fn default_max_thumbnail_bytes() -> u64 {
    10 << 20 // 10MiB
}

fn default_max_video_bytes() -> u64 {
    1 << 30 // 1GiB
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}
