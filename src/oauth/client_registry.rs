//! Registered client identities and credential verification.
//!
//! Clients are registered once at startup from [`ClientDefinition`]s and are
//! read-only afterwards. Secrets are kept only as salted SHA-256 digests and
//! compared in constant time.

use base64::prelude::*;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::errors::{ClientRegistrationError, ConfigError, OAuthError, StorageError};
use crate::oauth::types::{ClientCredentials, GrantType, is_valid_scope_token};
use crate::storage::traits::ClientStore;

const SECRET_HASH_PREFIX: &str = "sha256";
const SALT_LEN: usize = 16;

/// Salted SHA-256 digest of a client secret.
#[derive(Clone)]
pub struct ClientSecretHash {
    salt: [u8; SALT_LEN],
    digest: [u8; 32],
}

impl ClientSecretHash {
    /// Hash a secret with a fresh random salt.
    pub fn new(secret: &str) -> Self {
        let mut salt = [0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let digest = Self::compute(&salt, secret);
        Self { salt, digest }
    }

    /// Parse the `sha256:<salt>:<digest>` form produced by [`ClientSecretHash::encode`].
    pub fn parse(encoded: &str) -> Option<Self> {
        let mut parts = encoded.split(':');
        if parts.next()? != SECRET_HASH_PREFIX {
            return None;
        }
        let salt: [u8; SALT_LEN] = BASE64_URL_SAFE_NO_PAD
            .decode(parts.next()?)
            .ok()?
            .try_into()
            .ok()?;
        let digest: [u8; 32] = BASE64_URL_SAFE_NO_PAD
            .decode(parts.next()?)
            .ok()?
            .try_into()
            .ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { salt, digest })
    }

    pub fn encode(&self) -> String {
        format!(
            "{}:{}:{}",
            SECRET_HASH_PREFIX,
            BASE64_URL_SAFE_NO_PAD.encode(self.salt),
            BASE64_URL_SAFE_NO_PAD.encode(self.digest)
        )
    }

    /// Constant-time comparison of `secret` against the stored digest.
    pub fn verify(&self, secret: &str) -> bool {
        let candidate = Self::compute(&self.salt, secret);
        candidate.ct_eq(&self.digest).into()
    }

    fn compute(salt: &[u8], secret: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(secret.as_bytes());
        hasher.finalize().into()
    }
}

impl std::fmt::Debug for ClientSecretHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ClientSecretHash([REDACTED])")
    }
}

/// A client known to the authorization server.
#[derive(Debug, Clone)]
pub struct RegisteredClient {
    pub client_id: String,
    pub client_name: Option<String>,
    pub client_secret_hash: ClientSecretHash,
    pub allowed_grant_types: Vec<GrantType>,
    /// Ordered and unique; the default grant when a request names no scope.
    pub allowed_scopes: Vec<String>,
    pub access_token_ttl: chrono::Duration,
    pub requires_consent: bool,
    pub redirect_uris: Vec<String>,
}

impl RegisteredClient {
    pub fn allows_grant(&self, grant_type: GrantType) -> bool {
        self.allowed_grant_types.contains(&grant_type)
    }

    pub fn allows_scope(&self, scope: &str) -> bool {
        self.allowed_scopes.iter().any(|allowed| allowed == scope)
    }

    /// Exact string comparison, no normalization.
    pub fn has_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }
}

/// Client registration as loaded from a client definitions file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientDefinition {
    pub client_id: String,
    #[serde(default)]
    pub client_name: Option<String>,
    /// Plaintext secret, hashed during registration
    #[serde(default, skip_serializing)]
    pub client_secret: Option<String>,
    /// Pre-hashed secret in `sha256:<salt>:<digest>` form
    #[serde(default)]
    pub client_secret_hash: Option<String>,
    pub grant_types: Vec<GrantType>,
    pub scopes: Vec<String>,
    /// Access token lifetime such as `1h` or `30m`
    pub access_token_ttl: String,
    #[serde(default)]
    pub requires_consent: bool,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

impl ClientDefinition {
    /// Read a JSON array of client definitions.
    pub async fn load_file(path: &str) -> anyhow::Result<Vec<ClientDefinition>> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::FileReadFailed(path.to_string(), e.to_string()))?;
        let definitions = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::ClientsFileParsingFailed(path.to_string(), e.to_string()))?;
        Ok(definitions)
    }
}

impl TryFrom<ClientDefinition> for RegisteredClient {
    type Error = ClientRegistrationError;

    fn try_from(definition: ClientDefinition) -> Result<Self, Self::Error> {
        let client_id = definition.client_id;
        if client_id.is_empty() || client_id.chars().any(char::is_whitespace) {
            return Err(ClientRegistrationError::InvalidClientId(client_id));
        }

        let client_secret_hash = match (definition.client_secret, definition.client_secret_hash) {
            (Some(secret), _) if !secret.is_empty() => ClientSecretHash::new(&secret),
            (_, Some(encoded)) => ClientSecretHash::parse(&encoded)
                .ok_or_else(|| ClientRegistrationError::EmptySecret(client_id.clone()))?,
            _ => return Err(ClientRegistrationError::EmptySecret(client_id)),
        };

        if definition.scopes.is_empty() {
            return Err(ClientRegistrationError::EmptyScopes(client_id));
        }
        let mut allowed_scopes: Vec<String> = Vec::with_capacity(definition.scopes.len());
        for scope in definition.scopes {
            if !is_valid_scope_token(&scope) || allowed_scopes.contains(&scope) {
                return Err(ClientRegistrationError::InvalidScope(client_id, scope));
            }
            allowed_scopes.push(scope);
        }

        let mut allowed_grant_types: Vec<GrantType> = Vec::new();
        for grant_type in definition.grant_types {
            if !allowed_grant_types.contains(&grant_type) {
                allowed_grant_types.push(grant_type);
            }
        }
        if allowed_grant_types.is_empty() {
            return Err(ClientRegistrationError::NoGrantTypes(client_id));
        }

        for redirect_uri in &definition.redirect_uris {
            let valid = url::Url::parse(redirect_uri)
                .map(|parsed| parsed.fragment().is_none())
                .unwrap_or(false);
            if !valid {
                return Err(ClientRegistrationError::InvalidRedirectUri(
                    client_id,
                    redirect_uri.clone(),
                ));
            }
        }
        if allowed_grant_types.contains(&GrantType::AuthorizationCode)
            && definition.redirect_uris.is_empty()
        {
            return Err(ClientRegistrationError::MissingRedirectUri(client_id));
        }

        let access_token_ttl = duration_str::parse(&definition.access_token_ttl)
            .ok()
            .and_then(|duration| chrono::Duration::from_std(duration).ok())
            .filter(|duration| duration.num_seconds() > 0)
            .ok_or_else(|| ClientRegistrationError::InvalidTokenLifetime(client_id.clone()))?;

        Ok(Self {
            client_id,
            client_name: definition.client_name,
            client_secret_hash,
            allowed_grant_types,
            allowed_scopes,
            access_token_ttl,
            requires_consent: definition.requires_consent,
            redirect_uris: definition.redirect_uris,
        })
    }
}

/// Lookup and authentication over a pluggable [`ClientStore`].
pub struct ClientRegistry {
    store: Arc<dyn ClientStore>,
    /// Verified against when the client id is unknown so both paths cost the same.
    dummy_hash: ClientSecretHash,
}

impl ClientRegistry {
    pub fn new(store: Arc<dyn ClientStore>) -> Self {
        Self {
            store,
            dummy_hash: ClientSecretHash::new("tollgate-unknown-client"),
        }
    }

    /// Validate and add a client.
    pub async fn register(
        &self,
        definition: ClientDefinition,
    ) -> Result<RegisteredClient, ClientRegistrationError> {
        let client = RegisteredClient::try_from(definition)?;
        match self.store.insert_client(client.clone()).await {
            Ok(()) => {}
            Err(StorageError::Duplicate(_)) => {
                return Err(ClientRegistrationError::DuplicateClientId(client.client_id));
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(
            client_id = %client.client_id,
            grant_types = ?client.allowed_grant_types,
            scopes = ?client.allowed_scopes,
            "registered client"
        );
        Ok(client)
    }

    /// `Ok(None)` when the client is not registered.
    pub async fn lookup(&self, client_id: &str) -> Result<Option<RegisteredClient>, StorageError> {
        self.store.get_client(client_id).await
    }

    pub async fn list(&self) -> Result<Vec<RegisteredClient>, StorageError> {
        self.store.list_clients().await
    }

    /// Whether `presented_secret` matches the stored secret of `client_id`.
    pub async fn authenticate(&self, client_id: &str, presented_secret: &str) -> bool {
        self.authenticate_client(client_id, presented_secret)
            .await
            .is_ok()
    }

    /// Authenticate and return the client.
    ///
    /// Unknown clients and wrong secrets fail with the same `invalid_client` error.
    pub async fn authenticate_client(
        &self,
        client_id: &str,
        presented_secret: &str,
    ) -> Result<RegisteredClient, OAuthError> {
        let client = self
            .lookup(client_id)
            .await
            .map_err(|e| OAuthError::ServerError(e.to_string()))?;

        match client {
            Some(client) if client.client_secret_hash.verify(presented_secret) => Ok(client),
            Some(_) => {
                tracing::debug!(client_id = %client_id, "client secret mismatch");
                Err(OAuthError::InvalidClient(
                    "client authentication failed".to_string(),
                ))
            }
            None => {
                let _ = self.dummy_hash.verify(presented_secret);
                tracing::debug!(client_id = %client_id, "unknown client");
                Err(OAuthError::InvalidClient(
                    "client authentication failed".to_string(),
                ))
            }
        }
    }

    pub async fn authenticate_credentials(
        &self,
        credentials: &ClientCredentials,
    ) -> Result<RegisteredClient, OAuthError> {
        self.authenticate_client(&credentials.client_id, &credentials.client_secret)
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::inmemory::MemoryClientStore;

    pub(crate) fn order_service_definition() -> ClientDefinition {
        ClientDefinition {
            client_id: "order-service".to_string(),
            client_name: Some("Order Service".to_string()),
            client_secret: Some("order-service-secret".to_string()),
            client_secret_hash: None,
            grant_types: vec![GrantType::ClientCredentials],
            scopes: vec!["read:inventory".to_string(), "write:orders".to_string()],
            access_token_ttl: "1h".to_string(),
            requires_consent: false,
            redirect_uris: vec![],
        }
    }

    pub(crate) fn web_app_definition() -> ClientDefinition {
        ClientDefinition {
            client_id: "web-app".to_string(),
            client_name: None,
            client_secret: Some("web-app-secret".to_string()),
            client_secret_hash: None,
            grant_types: vec![GrantType::AuthorizationCode],
            scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "read:inventory".to_string(),
            ],
            access_token_ttl: "15m".to_string(),
            requires_consent: false,
            redirect_uris: vec!["https://app.example.com/callback".to_string()],
        }
    }

    pub(crate) fn order_service() -> RegisteredClient {
        RegisteredClient::try_from(order_service_definition()).unwrap()
    }

    #[test]
    fn test_secret_hash_verifies_only_matching_secret() {
        let hash = ClientSecretHash::new("order-service-secret");
        assert!(hash.verify("order-service-secret"));
        assert!(!hash.verify("order-service-secreT"));
        assert!(!hash.verify(""));
    }

    #[test]
    fn test_secret_hash_is_salted() {
        let first = ClientSecretHash::new("same-secret");
        let second = ClientSecretHash::new("same-secret");
        assert_ne!(first.encode(), second.encode());
    }

    #[test]
    fn test_secret_hash_encoding() {
        let hash = ClientSecretHash::new("s3cret");
        let parsed = ClientSecretHash::parse(&hash.encode()).unwrap();
        assert!(parsed.verify("s3cret"));

        assert!(ClientSecretHash::parse("md5:abc:def").is_none());
        assert!(ClientSecretHash::parse("sha256:abc").is_none());
        assert!(ClientSecretHash::parse(&format!("{}:extra", hash.encode())).is_none());
    }

    #[test]
    fn test_debug_never_prints_secret_material() {
        let client = order_service();
        let rendered = format!("{:?}", client);
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("order-service-secret"));
    }

    #[test]
    fn test_definition_validation() {
        let mut definition = order_service_definition();
        definition.scopes.clear();
        assert!(matches!(
            RegisteredClient::try_from(definition),
            Err(ClientRegistrationError::EmptyScopes(_))
        ));

        let mut definition = order_service_definition();
        definition.scopes.push("read:inventory".to_string());
        assert!(matches!(
            RegisteredClient::try_from(definition),
            Err(ClientRegistrationError::InvalidScope(_, _))
        ));

        let mut definition = order_service_definition();
        definition.grant_types.clear();
        assert!(matches!(
            RegisteredClient::try_from(definition),
            Err(ClientRegistrationError::NoGrantTypes(_))
        ));

        let mut definition = order_service_definition();
        definition.grant_types.push(GrantType::AuthorizationCode);
        assert!(matches!(
            RegisteredClient::try_from(definition),
            Err(ClientRegistrationError::MissingRedirectUri(_))
        ));

        let mut definition = web_app_definition();
        definition.redirect_uris = vec!["https://app.example.com/cb#frag".to_string()];
        assert!(matches!(
            RegisteredClient::try_from(definition),
            Err(ClientRegistrationError::InvalidRedirectUri(_, _))
        ));

        for ttl in ["0s", "500ms", "soon"] {
            let mut definition = order_service_definition();
            definition.access_token_ttl = ttl.to_string();
            assert!(matches!(
                RegisteredClient::try_from(definition),
                Err(ClientRegistrationError::InvalidTokenLifetime(_))
            ));
        }

        let mut definition = order_service_definition();
        definition.client_secret = None;
        assert!(matches!(
            RegisteredClient::try_from(definition),
            Err(ClientRegistrationError::EmptySecret(_))
        ));

        let mut definition = order_service_definition();
        definition.client_id = "order service".to_string();
        assert!(matches!(
            RegisteredClient::try_from(definition),
            Err(ClientRegistrationError::InvalidClientId(_))
        ));
    }

    #[test]
    fn test_definition_with_prehashed_secret() {
        let mut definition = order_service_definition();
        definition.client_secret = None;
        definition.client_secret_hash = Some(ClientSecretHash::new("hashed-secret").encode());
        let client = RegisteredClient::try_from(definition).unwrap();
        assert!(client.client_secret_hash.verify("hashed-secret"));
    }

    #[test]
    fn test_definition_parses_from_json() {
        let definitions: Vec<ClientDefinition> = serde_json::from_str(
            r#"[{
                "client_id": "notification-service",
                "client_secret": "notification-service-secret",
                "grant_types": ["client_credentials"],
                "scopes": ["send:email", "send:sms"],
                "access_token_ttl": "30m"
            }]"#,
        )
        .unwrap();
        let client = RegisteredClient::try_from(definitions[0].clone()).unwrap();
        assert_eq!(client.access_token_ttl, chrono::Duration::minutes(30));
        assert!(!client.requires_consent);
        assert!(client.allows_grant(GrantType::ClientCredentials));
        assert!(!client.allows_grant(GrantType::AuthorizationCode));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_client_id() {
        let registry = ClientRegistry::new(Arc::new(MemoryClientStore::new()));
        registry.register(order_service_definition()).await.unwrap();
        let result = registry.register(order_service_definition()).await;
        assert!(matches!(
            result,
            Err(ClientRegistrationError::DuplicateClientId(id)) if id == "order-service"
        ));
    }

    #[tokio::test]
    async fn test_lookup_and_authenticate() {
        let registry = ClientRegistry::new(Arc::new(MemoryClientStore::new()));
        registry.register(order_service_definition()).await.unwrap();

        let client = registry.lookup("order-service").await.unwrap().unwrap();
        assert_eq!(client.allowed_scopes, vec!["read:inventory", "write:orders"]);
        assert!(registry.lookup("missing").await.unwrap().is_none());

        assert!(registry.authenticate("order-service", "order-service-secret").await);
        assert!(!registry.authenticate("order-service", "wrong").await);
        assert!(!registry.authenticate("missing", "order-service-secret").await);
    }

    #[tokio::test]
    async fn test_unknown_client_and_bad_secret_are_indistinguishable() {
        let registry = ClientRegistry::new(Arc::new(MemoryClientStore::new()));
        registry.register(order_service_definition()).await.unwrap();

        let unknown = registry
            .authenticate_client("missing", "whatever")
            .await
            .unwrap_err();
        let wrong_secret = registry
            .authenticate_client("order-service", "whatever")
            .await
            .unwrap_err();
        assert_eq!(unknown.to_string(), wrong_secret.to_string());
        assert_eq!(unknown.error_code(), "invalid_client");
    }
}
