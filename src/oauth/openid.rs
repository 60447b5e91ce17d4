//! OpenID Connect support for ID token generation.

use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::OAuthError;
use crate::oauth::issuer::{IssuedToken, TokenIssuer};

/// OpenID Connect ID Token Claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer - The URL of the authorization server
    pub iss: String,
    /// Subject - Unique identifier for the end user
    pub sub: String,
    /// Audience - Client ID that this token is intended for
    pub aud: String,
    /// Expiration time - Unix timestamp when token expires
    pub exp: i64,
    /// Issued at - Unix timestamp when token was issued
    pub iat: i64,
    /// Authentication time - Unix timestamp when user authenticated (optional)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub auth_time: Option<i64>,
    /// Nonce - String value used to associate a client session with an ID token (optional)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub nonce: Option<String>,
    /// Access token hash (optional)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub at_hash: Option<String>,
}

impl IdTokenClaims {
    /// ID token accompanying `access_token`, sharing its issue and expiry times.
    pub fn for_access_token(access_token: &IssuedToken, audience: &str) -> Self {
        Self {
            iss: access_token.claims.iss.clone(),
            sub: access_token.claims.sub.clone(),
            aud: audience.to_string(),
            exp: access_token.claims.exp,
            iat: access_token.claims.iat,
            auth_time: None,
            nonce: None,
            at_hash: Some(calculate_at_hash(&access_token.token)),
        }
    }

    /// Set authentication time
    pub fn with_auth_time(mut self, auth_time: DateTime<Utc>) -> Self {
        self.auth_time = Some(auth_time.timestamp());
        self
    }

    /// Set nonce value
    pub fn with_nonce(mut self, nonce: Option<String>) -> Self {
        self.nonce = nonce;
        self
    }
}

/// Sign an ID token with the issuer's active key.
pub fn generate_id_token(issuer: &TokenIssuer, claims: &IdTokenClaims) -> Result<String, OAuthError> {
    let id_token = issuer.sign(claims)?;
    tracing::debug!(sub = %claims.sub, aud = %claims.aud, "issued id token");
    Ok(id_token)
}

/// `at_hash`: base64url of the left half of SHA-256 over the access token.
pub fn calculate_at_hash(access_token: &str) -> String {
    let digest = Sha256::digest(access_token.as_bytes());
    BASE64_URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
}
