//! Bearer token enforcement for protected routes.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::collections::HashMap;

use crate::oauth::jwt::UnverifiedToken;
use crate::oauth::keys::KeyResolution;
use crate::oauth::validator::{TokenValidator, ValidationResult};

/// Caller identity attached to requests that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal {
    pub subject: String,
    pub scopes: Vec<String>,
}

impl AuthenticatedPrincipal {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Why a request was refused.
///
/// The response only distinguishes "no usable token" from "token lacks the
/// scope"; the detailed reason stays in the logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationFailure {
    MissingToken,
    InvalidToken(ValidationResult),
    InsufficientScope,
}

impl IntoResponse for AuthorizationFailure {
    fn into_response(self) -> Response {
        let (status, error, challenge) = match self {
            AuthorizationFailure::InsufficientScope => (
                StatusCode::FORBIDDEN,
                "insufficient_scope",
                "Bearer error=\"insufficient_scope\"",
            ),
            AuthorizationFailure::MissingToken => (StatusCode::UNAUTHORIZED, "invalid_token", "Bearer"),
            AuthorizationFailure::InvalidToken(_) => (
                StatusCode::UNAUTHORIZED,
                "invalid_token",
                "Bearer error=\"invalid_token\"",
            ),
        };

        let mut response = (status, axum::Json(json!({ "error": error }))).into_response();
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
        response
    }
}

/// Token validator plus the scope each protected route requires.
pub struct ResourceServer {
    validator: TokenValidator,
    scope_requirements: HashMap<String, String>,
}

impl ResourceServer {
    pub fn new(validator: TokenValidator) -> Self {
        Self {
            validator,
            scope_requirements: HashMap::new(),
        }
    }

    /// Require `scope` on the route registered as `path`, e.g. `/api/stock/{product_id}`.
    pub fn require_scope(mut self, path: impl Into<String>, scope: impl Into<String>) -> Self {
        self.scope_requirements.insert(path.into(), scope.into());
        self
    }

    pub fn required_scope(&self, path: &str) -> Option<&str> {
        self.scope_requirements.get(path).map(String::as_str)
    }

    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    /// Token from an `Authorization` header value using the Bearer scheme.
    pub fn extract_bearer(authorization: &str) -> Option<&str> {
        let (scheme, token) = authorization.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = token.trim();
        if token.is_empty() { None } else { Some(token) }
    }

    pub async fn authorize(
        &self,
        authorization: Option<&str>,
        path: &str,
    ) -> Result<AuthenticatedPrincipal, AuthorizationFailure> {
        let Some(token) = authorization.and_then(Self::extract_bearer) else {
            tracing::debug!(path = %path, "request without bearer token");
            return Err(AuthorizationFailure::MissingToken);
        };

        self.refresh_if_unknown_key(token).await;

        let required_scope = self.required_scope(path);
        match self.validator.validate(token, required_scope) {
            ValidationResult::Valid { subject, scopes } => {
                tracing::debug!(sub = %subject, path = %path, "request authorized");
                Ok(AuthenticatedPrincipal { subject, scopes })
            }
            ValidationResult::InsufficientScope => {
                tracing::warn!(path = %path, required = ?required_scope, "insufficient scope");
                Err(AuthorizationFailure::InsufficientScope)
            }
            other => {
                tracing::warn!(path = %path, reason = ?other, "bearer token rejected");
                Err(AuthorizationFailure::InvalidToken(other))
            }
        }
    }

    async fn refresh_if_unknown_key(&self, token: &str) {
        let Ok(parsed) = UnverifiedToken::parse(token) else {
            return;
        };
        let keys = self.validator.keys();
        match keys.resolve(parsed.key_id()) {
            KeyResolution::Found(_) => {}
            KeyResolution::Unknown | KeyResolution::Unavailable => {
                let refreshed = keys.refresh_for_unknown_key(parsed.key_id()).await;
                tracing::debug!(kid = %parsed.key_id(), refreshed, "unknown signing key");
            }
        }
    }
}
