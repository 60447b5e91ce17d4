//! RSA signing key management and JSON Web Key Set publication.
//!
//! The authorization server holds exactly one active [`SigningKeyPair`].
//! Validators resolve public keys by `kid` through [`VerificationKeys`], which
//! is implemented locally by [`KeyManager`] and remotely by
//! [`crate::oauth::remote_keys::RemoteKeySet`].
//!
//! Rotation is not implemented. Adding it means keeping retired public keys
//! in [`KeyManager::public_key_set`] until every token they signed expires.

use async_trait::async_trait;
use base64::prelude::*;
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::MIN_RSA_KEY_SIZE;
use crate::errors::KeyError;

/// The only signature algorithm issued or accepted.
pub const RS256: &str = "RS256";

/// JWK (JSON Web Key) representation for the key set endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    /// Key type
    pub kty: String,
    /// Public key use
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// Key ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Algorithm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// RSA modulus (base64url encoded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent (base64url encoded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

/// JWKS (JSON Web Key Set) container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

/// Public half of a signing key, able to check RS256 signatures.
#[derive(Clone)]
pub struct VerificationKey {
    key_id: String,
    public_key: RsaPublicKey,
    decoding_key: DecodingKey,
}

impl VerificationKey {
    fn new(key_id: String, public_key: RsaPublicKey) -> Result<Self, KeyError> {
        let bits = public_key.size() * 8;
        if bits < MIN_RSA_KEY_SIZE {
            return Err(KeyError::KeyTooSmall(bits));
        }
        let decoding_key = DecodingKey::from_rsa_components(
            &BASE64_URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            &BASE64_URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        )
        .map_err(|e| KeyError::InvalidJwk(key_id.clone(), e.to_string()))?;
        Ok(Self {
            key_id,
            public_key,
            decoding_key,
        })
    }

    /// Build a verification key from a published RSA signing JWK.
    pub fn from_jwk(jwk: &JsonWebKey) -> Result<Self, KeyError> {
        let kid = jwk.kid.clone().unwrap_or_default();
        let invalid = |reason: &str| KeyError::InvalidJwk(kid.clone(), reason.to_string());

        if kid.is_empty() {
            return Err(invalid("missing kid"));
        }
        if jwk.kty != "RSA" {
            return Err(invalid("kty is not RSA"));
        }
        if jwk.key_use.as_deref().is_some_and(|key_use| key_use != "sig") {
            return Err(invalid("use is not sig"));
        }
        if jwk.alg.as_deref().is_some_and(|alg| alg != RS256) {
            return Err(invalid("alg is not RS256"));
        }

        let decode = |value: &Option<String>, name: &str| {
            value
                .as_deref()
                .and_then(|encoded| BASE64_URL_SAFE_NO_PAD.decode(encoded).ok())
                .filter(|bytes| !bytes.is_empty())
                .ok_or_else(|| invalid(&format!("missing or malformed {}", name)))
        };
        let n = decode(&jwk.n, "n")?;
        let e = decode(&jwk.e, "e")?;

        let public_key =
            RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
                .map_err(|e| invalid(&e.to_string()))?;
        Self::new(kid, public_key)
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    pub fn to_jwk(&self) -> JsonWebKey {
        JsonWebKey {
            kty: "RSA".to_string(),
            key_use: Some("sig".to_string()),
            kid: Some(self.key_id.clone()),
            alg: Some(RS256.to_string()),
            n: Some(BASE64_URL_SAFE_NO_PAD.encode(self.public_key.n().to_bytes_be())),
            e: Some(BASE64_URL_SAFE_NO_PAD.encode(self.public_key.e().to_bytes_be())),
        }
    }
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("key_id", &self.key_id)
            .field("bits", &(self.public_key.size() * 8))
            .finish()
    }
}

/// RSA key pair used to sign tokens. The private half never leaves this struct.
#[derive(Clone)]
pub struct SigningKeyPair {
    key_id: String,
    encoding_key: EncodingKey,
    verification_key: Arc<VerificationKey>,
    created_at: DateTime<Utc>,
}

impl SigningKeyPair {
    /// Generate a key pair from the operating system's CSPRNG.
    pub fn generate(key_id: impl Into<String>, key_size_bits: usize) -> Result<Self, KeyError> {
        if key_size_bits < MIN_RSA_KEY_SIZE {
            return Err(KeyError::KeyTooSmall(key_size_bits));
        }
        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, key_size_bits)
            .map_err(|e| KeyError::GenerationFailed(e.to_string()))?;
        Self::from_private_key(key_id.into(), private_key)
    }

    /// Load a PKCS#8 or PKCS#1 PEM encoded RSA private key.
    pub fn from_pem(key_id: impl Into<String>, pem: &str) -> Result<Self, KeyError> {
        use rsa::pkcs1::DecodeRsaPrivateKey;
        use rsa::pkcs8::DecodePrivateKey;

        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| KeyError::PemParsingFailed(e.to_string()))?;
        Self::from_private_key(key_id.into(), private_key)
    }

    fn from_private_key(key_id: String, private_key: RsaPrivateKey) -> Result<Self, KeyError> {
        let verification_key = VerificationKey::new(key_id.clone(), private_key.to_public_key())?;
        let der = private_key
            .to_pkcs1_der()
            .map_err(|e| KeyError::EncodingFailed(e.to_string()))?;
        Ok(Self {
            key_id,
            encoding_key: EncodingKey::from_rsa_der(der.as_bytes()),
            verification_key: Arc::new(verification_key),
            created_at: Utc::now(),
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn algorithm(&self) -> &'static str {
        RS256
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    pub fn verification_key(&self) -> Arc<VerificationKey> {
        self.verification_key.clone()
    }

    pub fn to_jwk(&self) -> JsonWebKey {
        self.verification_key.to_jwk()
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("key_id", &self.key_id)
            .field("algorithm", &RS256)
            .field("private_key", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Outcome of resolving a `kid` against a key source.
#[derive(Debug, Clone)]
pub enum KeyResolution {
    Found(Arc<VerificationKey>),
    /// Keys are loaded but none carries this id
    Unknown,
    /// No key set has ever been loaded
    Unavailable,
}

/// Source of public keys for token validation.
#[async_trait]
pub trait VerificationKeys: Send + Sync {
    fn resolve(&self, key_id: &str) -> KeyResolution;

    /// Give the source a chance to pick up a key it has not seen yet.
    /// Returns true when the key set changed.
    async fn refresh_for_unknown_key(&self, _key_id: &str) -> bool {
        false
    }
}

/// Verification keys indexed by `kid`.
#[derive(Debug, Clone, Default)]
pub struct VerificationKeySet {
    keys: HashMap<String, Arc<VerificationKey>>,
}

impl VerificationKeySet {
    /// Keep every usable RS256 signing key, logging and skipping the rest.
    pub fn from_jwks(set: &JsonWebKeySet) -> Self {
        let mut keys = HashMap::new();
        for jwk in &set.keys {
            match VerificationKey::from_jwk(jwk) {
                Ok(key) => {
                    keys.insert(key.key_id().to_string(), Arc::new(key));
                }
                Err(err) => tracing::warn!(error = %err, "skipping unusable key set entry"),
            }
        }
        Self { keys }
    }

    pub fn insert(&mut self, key: Arc<VerificationKey>) {
        self.keys.insert(key.key_id().to_string(), key);
    }

    pub fn get(&self, key_id: &str) -> Option<Arc<VerificationKey>> {
        self.keys.get(key_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.keys.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl VerificationKeys for VerificationKeySet {
    fn resolve(&self, key_id: &str) -> KeyResolution {
        if self.keys.is_empty() {
            return KeyResolution::Unavailable;
        }
        match self.get(key_id) {
            Some(key) => KeyResolution::Found(key),
            None => KeyResolution::Unknown,
        }
    }
}

/// Owner of the authorization server's single active signing key.
#[derive(Debug)]
pub struct KeyManager {
    active: SigningKeyPair,
}

impl KeyManager {
    pub fn new(active: SigningKeyPair) -> Self {
        tracing::info!(kid = %active.key_id(), alg = RS256, "signing key active");
        Self { active }
    }

    /// Generate a fresh key with a random UUID `kid`.
    pub fn generate(key_size_bits: usize) -> Result<Self, KeyError> {
        let key_id = uuid::Uuid::new_v4().to_string();
        Ok(Self::new(SigningKeyPair::generate(key_id, key_size_bits)?))
    }

    pub fn current_signing_key(&self) -> &SigningKeyPair {
        &self.active
    }

    /// Public keys able to verify every token this manager has signed.
    pub fn public_key_set(&self) -> JsonWebKeySet {
        JsonWebKeySet {
            keys: vec![self.active.to_jwk()],
        }
    }
}

#[async_trait]
impl VerificationKeys for KeyManager {
    fn resolve(&self, key_id: &str) -> KeyResolution {
        if key_id == self.active.key_id() {
            KeyResolution::Found(self.active.verification_key())
        } else {
            KeyResolution::Unknown
        }
    }
}
