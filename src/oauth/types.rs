//! OAuth 2.0 core types and data structures.
//!
//! Defines grant types, token endpoint requests and responses, authorization
//! codes, and the scope helpers shared by issuance and validation.

use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OAuth 2.0 Grant Types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    ClientCredentials,
}

impl GrantType {
    /// Wire value used in `grant_type` parameters.
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::ClientCredentials => "client_credentials",
        }
    }

    /// Parse a `grant_type` parameter, `None` when unsupported.
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "authorization_code" => Some(GrantType::AuthorizationCode),
            "client_credentials" => Some(GrantType::ClientCredentials),
            _ => None,
        }
    }
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OAuth 2.0 Token Types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    Bearer,
}

/// Credentials presented by a client at the token endpoint
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Token Exchange Request
#[derive(Debug, Clone)]
pub enum TokenRequest {
    ClientCredentials {
        credentials: ClientCredentials,
        scope: Option<String>,
    },
    AuthorizationCode {
        credentials: ClientCredentials,
        code: String,
        redirect_uri: String,
        code_verifier: Option<String>,
    },
}

impl TokenRequest {
    pub fn grant_type(&self) -> GrantType {
        match self {
            TokenRequest::ClientCredentials { .. } => GrantType::ClientCredentials,
            TokenRequest::AuthorizationCode { .. } => GrantType::AuthorizationCode,
        }
    }

    pub fn client_id(&self) -> &str {
        match self {
            TokenRequest::ClientCredentials { credentials, .. }
            | TokenRequest::AuthorizationCode { credentials, .. } => &credentials.client_id,
        }
    }
}

/// Token Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token
    pub access_token: String,
    /// Token type
    pub token_type: TokenType,
    /// Expires in seconds
    pub expires_in: u64,
    /// Granted scope
    pub scope: String,
    /// OpenID Connect ID token, present when `openid` was granted
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id_token: Option<String>,
}

/// OAuth Error Response
#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthErrorResponse {
    /// Error code
    pub error: String,
    /// Error description
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_description: Option<String>,
}

/// Authorization code awaiting exchange at the token endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    /// The authorization code
    pub code: String,
    /// Client ID that requested this code
    pub client_id: String,
    /// Authenticated end user
    pub subject: String,
    /// Redirect URI used in the authorization request
    pub redirect_uri: String,
    /// Granted scopes, in request order
    pub scopes: Vec<String>,
    /// PKCE S256 code challenge
    pub code_challenge: Option<String>,
    /// OpenID Connect nonce
    pub nonce: Option<String>,
    /// When the end user authenticated
    pub auth_time: DateTime<Utc>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Expiration timestamp
    pub expires_at: DateTime<Utc>,
}

impl AuthorizationCode {
    /// Codes expire at `expires_at`, inclusive.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Scope value granting OpenID Connect identity claims.
pub const OPENID_SCOPE: &str = "openid";

/// Generate a secure random token
pub fn generate_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// RFC 6749 `scope-token`: one or more of %x21 / %x23-5B / %x5D-7E.
pub fn is_valid_scope_token(scope: &str) -> bool {
    !scope.is_empty()
        && scope
            .bytes()
            .all(|b| b == 0x21 || (0x23..=0x5B).contains(&b) || (0x5D..=0x7E).contains(&b))
}

/// Parse a space-delimited scope string, keeping first occurrence order.
pub fn parse_scope(scope: &str) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for item in scope.split_whitespace() {
        if !scopes.iter().any(|existing| existing == item) {
            scopes.push(item.to_string());
        }
    }
    scopes
}

/// Join scopes into a space-separated string, preserving order
pub fn join_scopes(scopes: &[String]) -> String {
    scopes.join(" ")
}
