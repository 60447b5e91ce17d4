//! RS256 JWT encoding and verification on top of `jsonwebtoken`.
//!
//! Tokens always carry a `kid` header so validators can pick the key before
//! checking the signature. Registered claim checks (`iss`, `exp`, `aud`) are
//! left to [`crate::oauth::validator::TokenValidator`], which runs them in its
//! own order.

use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::KeyError;
use crate::oauth::keys::{SigningKeyPair, VerificationKey};

/// Why a compact token could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    Malformed,
    UnsupportedAlgorithm,
    MissingKeyId,
}

/// A structurally valid token whose signature has not been checked.
#[derive(Debug)]
pub struct UnverifiedToken<'a> {
    pub header: Header,
    token: &'a str,
}

impl<'a> UnverifiedToken<'a> {
    /// Decode the header of a compact token.
    ///
    /// Only RS256 headers that name a `kid` are accepted.
    pub fn parse(token: &'a str) -> Result<Self, FormatError> {
        let header = decode_header(token).map_err(|_| FormatError::Malformed)?;
        if header.alg != Algorithm::RS256 {
            return Err(FormatError::UnsupportedAlgorithm);
        }
        if header.kid.as_deref().is_none_or(str::is_empty) {
            return Err(FormatError::MissingKeyId);
        }
        Ok(Self { header, token })
    }

    pub fn key_id(&self) -> &str {
        self.header.kid.as_deref().unwrap_or_default()
    }

    /// Check the signature with `key` and decode the claims.
    ///
    /// No registered claim is validated here, not even `exp`.
    pub fn verify<C: DeserializeOwned>(
        &self,
        key: &VerificationKey,
    ) -> Result<C, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        decode::<C>(self.token, key.decoding_key(), &validation).map(|data| data.claims)
    }
}

/// Serialize `claims` and sign them with `key`.
pub fn encode<C: Serialize>(key: &SigningKeyPair, claims: &C) -> Result<String, KeyError> {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(key.key_id().to_string());
    jsonwebtoken::encode(&header, claims, key.encoding_key())
        .map_err(|e| KeyError::SigningFailed(e.to_string()))
}
