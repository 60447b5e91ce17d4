//! Standardized error types following the `error-tollgate-<domain>-<number>` format.

use axum::response::{IntoResponse, Response};
use http::StatusCode;
use thiserror::Error;

/// Configuration errors that occur during application startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when a required environment variable is not set
    #[error("error-tollgate-config-1 {0} must be set")]
    EnvVarRequired(String),

    /// Error when PORT cannot be parsed
    #[error("error-tollgate-config-2 Parsing PORT into u16 failed: {0:?}")]
    PortParsingFailed(std::num::ParseIntError),

    /// Error when version information is not available
    #[error("error-tollgate-config-3 One of GIT_HASH or CARGO_PKG_VERSION must be set")]
    VersionNotSet,

    /// Error when duration string cannot be parsed
    #[error("error-tollgate-config-4 Failed to parse duration '{0}': {1}")]
    DurationParsingFailed(String, String),

    /// Error when a numeric setting cannot be parsed
    #[error("error-tollgate-config-5 Failed to parse {0} '{1}': {2}")]
    NumberParsingFailed(String, String, std::num::ParseIntError),

    /// Error when the issuer is not an absolute http(s) URL
    #[error("error-tollgate-config-6 Invalid issuer '{0}': {1}")]
    InvalidIssuer(String, String),

    /// Error when the configured RSA key size is too weak
    #[error("error-tollgate-config-7 RSA key size {0} is below the 2048 bit minimum")]
    KeySizeTooSmall(usize),

    /// Error when a configuration file cannot be read
    #[error("error-tollgate-config-8 Failed to read {0}: {1}")]
    FileReadFailed(String, String),

    /// Error when the client definitions file is malformed
    #[error("error-tollgate-config-9 Failed to parse client definitions in {0}: {1}")]
    ClientsFileParsingFailed(String, String),

    /// Error when a value must be positive
    #[error("error-tollgate-config-10 {0} must be greater than zero")]
    MustBePositive(String),
}

/// HTTP server errors
#[derive(Debug, Error)]
pub enum HttpError {
    /// Error when response serialization fails
    #[error("error-tollgate-http-1 Response serialization failed: {0}")]
    SerializationFailed(String),
}

/// OAuth protocol errors surfaced at the token endpoint.
///
/// The wrapped string carries internal detail for logs. It is never sent to
/// the caller; see [`OAuthError::public_description`].
#[derive(Debug, Error)]
pub enum OAuthError {
    /// Unknown client or bad secret
    #[error("error-tollgate-oauth-1 Invalid client credentials: {0}")]
    InvalidClient(String),

    /// Unknown, used, expired or mismatched grant; grant type not permitted
    #[error("error-tollgate-oauth-2 Invalid grant: {0}")]
    InvalidGrant(String),

    /// Unsupported grant type
    #[error("error-tollgate-oauth-3 Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// Requested scope exceeds the allowed set
    #[error("error-tollgate-oauth-4 Invalid scope: {0}")]
    InvalidScope(String),

    /// Missing or malformed request parameter
    #[error("error-tollgate-oauth-5 Invalid request: {0}")]
    InvalidRequest(String),

    /// Resource owner consent was not granted
    #[error("error-tollgate-oauth-6 Access denied: {0}")]
    AccessDenied(String),

    /// Server error
    #[error("error-tollgate-oauth-7 Server error: {0}")]
    ServerError(String),
}

impl OAuthError {
    /// RFC 6749 error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            OAuthError::InvalidClient(_) => "invalid_client",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            OAuthError::InvalidScope(_) => "invalid_scope",
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::AccessDenied(_) => "access_denied",
            OAuthError::ServerError(_) => "server_error",
        }
    }

    /// Fixed description safe to return to any caller.
    pub fn public_description(&self) -> &'static str {
        match self {
            OAuthError::InvalidClient(_) => "Client authentication failed",
            OAuthError::InvalidGrant(_) => "The provided grant is invalid or not permitted",
            OAuthError::UnsupportedGrantType(_) => "The grant type is not supported",
            OAuthError::InvalidScope(_) => "The requested scope exceeds the allowed scope",
            OAuthError::InvalidRequest(_) => "The request is missing a parameter or is malformed",
            OAuthError::AccessDenied(_) => "The resource owner denied the request",
            OAuthError::ServerError(_) => "The server encountered an unexpected condition",
        }
    }

    /// HTTP status for the token endpoint response.
    pub fn status_code(&self) -> StatusCode {
        match self {
            OAuthError::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            OAuthError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Signing key errors
#[derive(Debug, Error)]
pub enum KeyError {
    /// RSA modulus below the supported minimum
    #[error("error-tollgate-key-1 RSA key of {0} bits is below the 2048 bit minimum")]
    KeyTooSmall(usize),

    /// Error when key generation fails
    #[error("error-tollgate-key-2 Key generation failed: {0}")]
    GenerationFailed(String),

    /// Error when a PEM document cannot be parsed
    #[error("error-tollgate-key-3 Failed to parse private key PEM: {0}")]
    PemParsingFailed(String),

    /// Error when a JWK cannot be converted into a verification key
    #[error("error-tollgate-key-4 Invalid JSON web key '{0}': {1}")]
    InvalidJwk(String, String),

    /// Error when signing fails
    #[error("error-tollgate-key-5 Signing failed: {0}")]
    SigningFailed(String),

    /// Error when a private key cannot be re-encoded for signing
    #[error("error-tollgate-key-6 Private key encoding failed: {0}")]
    EncodingFailed(String),
}

/// Remote key set errors
#[derive(Debug, Error)]
pub enum KeySetError {
    /// Error when the key set request cannot be sent
    #[error("error-tollgate-keyset-1 Key set request to {0} failed: {1}")]
    RequestFailed(String, String),

    /// Error when the key set endpoint answers with a non-success status
    #[error("error-tollgate-keyset-2 Key set endpoint {0} returned status {1}")]
    UnexpectedStatus(String, u16),

    /// Error when the key set document cannot be parsed
    #[error("error-tollgate-keyset-3 Key set document from {0} is invalid: {1}")]
    InvalidDocument(String, String),

    /// Error when a fetched key set contains no usable RS256 key
    #[error("error-tollgate-keyset-4 Key set from {0} contains no usable signing keys")]
    NoUsableKeys(String),
}

/// Client registration errors
#[derive(Debug, Error)]
pub enum ClientRegistrationError {
    /// Client id already registered
    #[error("error-tollgate-client-1 Client '{0}' is already registered")]
    DuplicateClientId(String),

    /// Client id is empty or contains whitespace
    #[error("error-tollgate-client-2 Invalid client id: '{0}'")]
    InvalidClientId(String),

    /// No allowed scopes
    #[error("error-tollgate-client-3 Client '{0}' must allow at least one scope")]
    EmptyScopes(String),

    /// Malformed or repeated scope token
    #[error("error-tollgate-client-4 Client '{0}' has invalid scope '{1}'")]
    InvalidScope(String, String),

    /// No allowed grant types
    #[error("error-tollgate-client-5 Client '{0}' must allow at least one grant type")]
    NoGrantTypes(String),

    /// Invalid redirect URI
    #[error("error-tollgate-client-6 Client '{0}' has invalid redirect URI '{1}'")]
    InvalidRedirectUri(String, String),

    /// Authorization code clients need a redirect URI
    #[error("error-tollgate-client-7 Client '{0}' allows authorization_code but has no redirect URIs")]
    MissingRedirectUri(String),

    /// Access token lifetime must be positive
    #[error("error-tollgate-client-8 Client '{0}' has a non-positive access token lifetime")]
    InvalidTokenLifetime(String),

    /// Empty client secret
    #[error("error-tollgate-client-9 Client '{0}' has an empty secret")]
    EmptySecret(String),

    /// Error when the backing store fails
    #[error("error-tollgate-client-10 Client store failed: {0}")]
    Storage(#[from] StorageError),
}

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error when a lock guarding in-memory state is poisoned
    #[error("error-tollgate-storage-1 Lock poisoned: {0}")]
    LockPoisoned(String),

    /// Error when an entry already exists
    #[error("error-tollgate-storage-2 Duplicate entry: {0}")]
    Duplicate(String),
}

/// Errors raised by the token-acquiring client
#[derive(Debug, Error)]
pub enum ClientError {
    /// Error when a request cannot be sent
    #[error("error-tollgate-http-client-1 Request to {0} failed: {1}")]
    RequestFailed(String, String),

    /// Error when the token endpoint rejects the request
    #[error("error-tollgate-http-client-2 Token endpoint rejected request with {0}: {1}")]
    TokenRejected(u16, String),

    /// Error when the token response cannot be parsed
    #[error("error-tollgate-http-client-3 Invalid token response: {0}")]
    InvalidTokenResponse(String),
}

pub type Result<T> = std::result::Result<T, HttpError>;

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        tracing::error!(error = ?self, "internal server error");
        (StatusCode::INTERNAL_SERVER_ERROR).into_response()
    }
}
