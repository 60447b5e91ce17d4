//! Bearer token validation.
//!
//! Checks run in a fixed order and stop at the first failure:
//! structure, key lookup, signature, issuer, expiry, scope. Validation is
//! pure over the token, the key source, and the supplied clock.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::oauth::issuer::AccessTokenClaims;
use crate::oauth::jwt::UnverifiedToken;
use crate::oauth::keys::{KeyResolution, VerificationKeys};

/// Outcome of validating a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid { subject: String, scopes: Vec<String> },
    /// Malformed token, unknown `kid`, or bad signature
    InvalidSignature,
    Expired,
    WrongIssuer,
    InsufficientScope,
    /// No key set has been loaded, so nothing can be verified
    KeyUnavailable,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid { .. })
    }
}

pub struct TokenValidator {
    issuer: String,
    keys: Arc<dyn VerificationKeys>,
    leeway: chrono::Duration,
}

impl TokenValidator {
    pub fn new(issuer: impl Into<String>, keys: Arc<dyn VerificationKeys>) -> Self {
        Self {
            issuer: issuer.into(),
            keys,
            leeway: chrono::Duration::zero(),
        }
    }

    /// Accept tokens up to `leeway` past their `exp`.
    pub fn with_leeway(mut self, leeway: chrono::Duration) -> Self {
        self.leeway = leeway;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn keys(&self) -> &Arc<dyn VerificationKeys> {
        &self.keys
    }

    pub fn validate(&self, token: &str, required_scope: Option<&str>) -> ValidationResult {
        self.validate_at(token, required_scope, Utc::now())
    }

    pub fn validate_at(
        &self,
        token: &str,
        required_scope: Option<&str>,
        now: DateTime<Utc>,
    ) -> ValidationResult {
        let parsed = match UnverifiedToken::parse(token) {
            Ok(parsed) => parsed,
            Err(reason) => {
                tracing::debug!(?reason, "malformed bearer token");
                return ValidationResult::InvalidSignature;
            }
        };

        let key = match self.keys.resolve(parsed.key_id()) {
            KeyResolution::Found(key) => key,
            KeyResolution::Unknown => {
                tracing::debug!(kid = %parsed.key_id(), "unknown signing key");
                return ValidationResult::InvalidSignature;
            }
            KeyResolution::Unavailable => {
                tracing::warn!(kid = %parsed.key_id(), "no verification keys loaded");
                return ValidationResult::KeyUnavailable;
            }
        };

        let claims: AccessTokenClaims = match parsed.verify(&key) {
            Ok(claims) => claims,
            Err(err) => {
                tracing::debug!(kid = %parsed.key_id(), error = %err, "signature or claims rejected");
                return ValidationResult::InvalidSignature;
            }
        };

        if claims.iss != self.issuer {
            tracing::debug!(iss = %claims.iss, expected = %self.issuer, "issuer mismatch");
            return ValidationResult::WrongIssuer;
        }

        // A token is expired from the instant `now >= exp`.
        if now.timestamp() >= claims.exp.saturating_add(self.leeway.num_seconds()) {
            tracing::debug!(exp = claims.exp, jti = ?claims.jti, "token expired");
            return ValidationResult::Expired;
        }

        let scopes = claims.scopes();
        if let Some(required) = required_scope {
            if !scopes.iter().any(|scope| scope == required) {
                tracing::debug!(required = %required, scope = %claims.scope, "insufficient scope");
                return ValidationResult::InsufficientScope;
            }
        }

        ValidationResult::Valid {
            subject: claims.sub,
            scopes,
        }
    }
}
