//! JWT credential validation
//!
//! Supports HS256, RS256 and ES256. The `sub` claim must carry the user's
//! UUID; anything else is rejected as an invalid credential.

use super::{AuthError, CredentialValidator, InvalidReason};
use crate::config::JwtConfig;
use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT Claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub iat: Option<usize>,
    #[serde(default)]
    pub iss: Option<String>,
}

/// JWT Validator
///
/// # Example
///
/// ```
/// use tubely_uploadr::auth::jwt::JwtValidator;
///
/// // HS256 with secret
/// let validator = JwtValidator::new_hs256("my-secret");
///
/// // With issuer validation
/// let validator = JwtValidator::new_hs256("my-secret").with_issuer("tubely-access");
/// ```
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    /// Create a new JWT validator with a secret key (HS256)
    pub fn new_hs256(secret: &str) -> Self {
        Self::with_key(
            DecodingKey::from_secret(secret.as_bytes()),
            Algorithm::HS256,
        )
    }

    /// Create a new JWT validator with an RSA public key (RS256)
    pub fn new_rs256(public_key_pem: &str) -> Result<Self, AuthError> {
        let key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| AuthError::InvalidCredential(InvalidReason::Malformed(e.to_string())))?;
        Ok(Self::with_key(key, Algorithm::RS256))
    }

    /// Create a new JWT validator with an EC public key (ES256)
    pub fn new_es256(public_key_pem: &str) -> Result<Self, AuthError> {
        let key = DecodingKey::from_ec_pem(public_key_pem.as_bytes())
            .map_err(|e| AuthError::InvalidCredential(InvalidReason::Malformed(e.to_string())))?;
        Ok(Self::with_key(key, Algorithm::ES256))
    }

    /// Build a validator from configuration
    pub fn from_config(config: &JwtConfig) -> Result<Self, AuthError> {
        let validator = match config.algorithm.to_uppercase().as_str() {
            "RS256" => Self::new_rs256(&config.secret)?,
            "ES256" => Self::new_es256(&config.secret)?,
            _ => Self::new_hs256(&config.secret),
        };

        Ok(match config.issuer {
            Some(ref issuer) => validator.with_issuer(issuer),
            None => validator,
        })
    }

    fn with_key(decoding_key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.leeway = 0;

        Self {
            decoding_key,
            validation,
        }
    }

    /// Set the required issuer (`iss` claim)
    #[must_use]
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    /// Decode and verify a token, returning the subject's user id
    pub fn decode_user(&self, token: &str) -> Result<Uuid, AuthError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                let reason = match e.kind() {
                    ErrorKind::ExpiredSignature => InvalidReason::Expired,
                    ErrorKind::InvalidSignature => InvalidReason::BadSignature,
                    _ => InvalidReason::Malformed(e.to_string()),
                };
                AuthError::InvalidCredential(reason)
            })?;

        Uuid::parse_str(&token_data.claims.sub).map_err(|_| {
            AuthError::InvalidCredential(InvalidReason::BadSubject(token_data.claims.sub))
        })
    }
}

#[async_trait]
impl CredentialValidator for JwtValidator {
    #[tracing::instrument(name = "auth.jwt", skip(self, token), fields(auth.method = "jwt"), err)]
    async fn validate(&self, token: &str) -> Result<Uuid, AuthError> {
        let user_id = self.decode_user(token)?;
        tracing::debug!(user.id = %user_id, "JWT validated");
        Ok(user_id)
    }
}
