//! Authentication module
//!
//! The [`AuthGate`] turns request headers into an authenticated user id:
//! it extracts the `Authorization: Bearer <token>` credential and hands it to
//! a [`CredentialValidator`]. JWT validation is the only validator shipped.

use async_trait::async_trait;
use hyper::HeaderMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub mod bearer;
pub mod jwt;

pub use bearer::bearer_token;
pub use jwt::JwtValidator;

/// Why a presented credential was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    #[error("token expired")]
    Expired,

    #[error("signature mismatch")]
    BadSignature,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("subject is not a user id: {0}")]
    BadSubject(String),
}

/// Authentication errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing bearer credential")]
    MissingCredential,

    #[error("Invalid credential: {0}")]
    InvalidCredential(InvalidReason),
}

/// Validates a raw token and yields the user it was issued to
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Uuid, AuthError>;
}

/// Bearer-credential gate in front of every upload
#[derive(Clone)]
pub struct AuthGate {
    validator: Arc<dyn CredentialValidator>,
}

impl AuthGate {
    pub fn new(validator: Arc<dyn CredentialValidator>) -> Self {
        Self { validator }
    }

    /// Authenticate a request from its headers
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Uuid, AuthError> {
        let token = bearer_token(headers)?;
        let result = self.validator.validate(token).await;
        crate::metrics::record_auth_attempt(result.is_ok());
        result
    }
}
