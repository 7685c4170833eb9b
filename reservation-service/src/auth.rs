//! Caller verification for the reservation endpoint.
//!
//! Two independent checks, both required: a bearer JWT identifying the user
//! and a shared secret in `x-internal-token` identifying the calling service.

use axum::http::HeaderMap;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingHeader,

    #[error("Invalid Authorization format")]
    MalformedHeader,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Missing internal token")]
    InternalTokenMismatch,
}

/// Identity claims. Issuers may encode the subject as a string or a number,
/// and `exp` is checked only when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

fn claim_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl Claims {
    /// `sub` wins over `user_id`.
    pub fn subject(&self) -> Option<String> {
        self.sub
            .as_ref()
            .or(self.user_id.as_ref())
            .and_then(claim_text)
    }
}

#[derive(Clone)]
pub struct Authenticator {
    decoding_key: DecodingKey,
    validation: Validation,
    internal_token: String,
}

impl Authenticator {
    pub fn new(jwt_secret: &str, algorithm: Algorithm, internal_token: impl Into<String>) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.leeway = 0;
        validation.required_spec_claims.clear();
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation,
            internal_token: internal_token.into(),
        }
    }

    /// Resolves the user behind the `Authorization: Bearer <jwt>` header.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Uuid, AuthError> {
        let header = headers
            .get(axum::http::header::AUTHORIZATION)
            .ok_or(AuthError::MissingHeader)?
            .to_str()
            .map_err(|_| AuthError::MalformedHeader)?;

        let mut parts = header.split_whitespace();
        let token = match (parts.next(), parts.next(), parts.next()) {
            (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => token,
            _ => return Err(AuthError::MalformedHeader),
        };

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::InvalidToken,
        })?;

        data.claims
            .subject()
            .and_then(|s| Uuid::parse_str(&s).ok())
            .ok_or(AuthError::InvalidToken)
    }

    pub fn verify_internal_token(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        match headers.get(INTERNAL_TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
            Some(token) if token == self.internal_token => Ok(()),
            _ => Err(AuthError::InternalTokenMismatch),
        }
    }
}
