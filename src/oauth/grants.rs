//! Grant orchestration for the token endpoint.
//!
//! Each token request walks `Received -> Authenticating -> Issuing` and ends in
//! `Completed` or `Rejected`. Every accepted request mints a fresh token.

use base64::prelude::*;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::errors::{OAuthError, StorageError};
use crate::oauth::client_registry::{ClientRegistry, RegisteredClient};
use crate::oauth::issuer::{IssuedToken, TokenIssuer};
use crate::oauth::openid::{IdTokenClaims, generate_id_token};
use crate::oauth::types::{
    AuthorizationCode, GrantType, OPENID_SCOPE, TokenRequest, TokenResponse, TokenType,
    generate_token, join_scopes, parse_scope,
};
use crate::storage::traits::AuthorizationCodeStore;

/// Only S256 code challenges are accepted.
pub const PKCE_METHOD_S256: &str = "S256";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantState {
    Received,
    Authenticating,
    Issuing,
    Completed,
    Rejected,
}

struct GrantFlow<'a> {
    grant_type: GrantType,
    client_id: &'a str,
    state: GrantState,
}

impl<'a> GrantFlow<'a> {
    fn received(request: &'a TokenRequest) -> Self {
        let flow = Self {
            grant_type: request.grant_type(),
            client_id: request.client_id(),
            state: GrantState::Received,
        };
        tracing::debug!(
            grant_type = %flow.grant_type,
            client_id = %flow.client_id,
            "token request received"
        );
        flow
    }

    fn advance(&mut self, next: GrantState) {
        tracing::debug!(
            grant_type = %self.grant_type,
            client_id = %self.client_id,
            from = ?self.state,
            to = ?next,
            "grant state transition"
        );
        self.state = next;
    }

    fn reject(&mut self, error: OAuthError) -> OAuthError {
        self.advance(GrantState::Rejected);
        tracing::warn!(
            grant_type = %self.grant_type,
            client_id = %self.client_id,
            error = %error,
            "token request rejected"
        );
        error
    }
}

/// Tokens produced by a successful grant.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: IssuedToken,
    pub id_token: Option<String>,
}

impl TokenGrant {
    pub fn to_response(&self) -> TokenResponse {
        TokenResponse {
            access_token: self.access_token.token.clone(),
            token_type: TokenType::Bearer,
            expires_in: self.access_token.expires_in(),
            scope: self.access_token.claims.scope.clone(),
            id_token: self.id_token.clone(),
        }
    }
}

/// Authorization already granted by an authenticated end user, handed over by
/// the login and consent layer in front of the authorization endpoint.
#[derive(Debug, Clone)]
pub struct AuthorizationGrant {
    pub client_id: String,
    pub subject: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
    pub consent_granted: bool,
    pub auth_time: DateTime<Utc>,
}

pub struct GrantHandler {
    registry: Arc<ClientRegistry>,
    issuer: Arc<TokenIssuer>,
    codes: Arc<dyn AuthorizationCodeStore>,
    code_lifetime: chrono::Duration,
}

impl GrantHandler {
    pub fn new(
        registry: Arc<ClientRegistry>,
        issuer: Arc<TokenIssuer>,
        codes: Arc<dyn AuthorizationCodeStore>,
    ) -> Self {
        Self {
            registry,
            issuer,
            codes,
            code_lifetime: chrono::Duration::minutes(10),
        }
    }

    pub fn with_code_lifetime(mut self, code_lifetime: chrono::Duration) -> Self {
        self.code_lifetime = code_lifetime;
        self
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn issuer(&self) -> &Arc<TokenIssuer> {
        &self.issuer
    }

    /// Run a token request to completion.
    pub async fn handle(&self, request: TokenRequest) -> Result<TokenGrant, OAuthError> {
        let mut flow = GrantFlow::received(&request);

        flow.advance(GrantState::Authenticating);
        let credentials = match &request {
            TokenRequest::ClientCredentials { credentials, .. }
            | TokenRequest::AuthorizationCode { credentials, .. } => credentials,
        };
        let client = match self.registry.authenticate_credentials(credentials).await {
            Ok(client) => client,
            Err(e) => return Err(flow.reject(e)),
        };

        let result = match &request {
            TokenRequest::ClientCredentials { scope, .. } => {
                let requested = scope.as_deref().map(parse_scope).unwrap_or_default();
                flow.advance(GrantState::Issuing);
                self.issuer
                    .issue(&client, &requested, GrantType::ClientCredentials)
                    .map(|access_token| TokenGrant {
                        access_token,
                        id_token: None,
                    })
            }
            TokenRequest::AuthorizationCode {
                code,
                redirect_uri,
                code_verifier,
                ..
            } => match self
                .redeem_code(&client.client_id, code, redirect_uri, code_verifier.as_deref())
                .await
            {
                Ok(authorization) => {
                    flow.advance(GrantState::Issuing);
                    self.issue_for_code(&client, &authorization)
                }
                Err(e) => Err(e),
            },
        };

        match result {
            Ok(grant) => {
                flow.advance(GrantState::Completed);
                Ok(grant)
            }
            Err(e) => Err(flow.reject(e)),
        }
    }

    async fn redeem_code(
        &self,
        client_id: &str,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<AuthorizationCode, OAuthError> {
        let authorization = self
            .codes
            .consume_code(code)
            .await
            .map_err(|e| OAuthError::ServerError(e.to_string()))?
            .ok_or_else(|| OAuthError::InvalidGrant("unknown or already used code".to_string()))?;

        if authorization.client_id != client_id {
            return Err(OAuthError::InvalidGrant(format!(
                "code was issued to {}",
                authorization.client_id
            )));
        }
        if authorization.is_expired_at(Utc::now()) {
            return Err(OAuthError::InvalidGrant("code expired".to_string()));
        }
        if authorization.redirect_uri != redirect_uri {
            return Err(OAuthError::InvalidGrant("redirect URI mismatch".to_string()));
        }

        match (&authorization.code_challenge, code_verifier) {
            (Some(challenge), Some(verifier)) => {
                if !verify_pkce_s256(verifier, challenge) {
                    return Err(OAuthError::InvalidGrant(
                        "PKCE verification failed".to_string(),
                    ));
                }
            }
            (Some(_), None) => {
                return Err(OAuthError::InvalidGrant("missing code verifier".to_string()));
            }
            (None, Some(_)) => {
                return Err(OAuthError::InvalidGrant(
                    "code verifier without code challenge".to_string(),
                ));
            }
            (None, None) => {}
        }

        Ok(authorization)
    }

    fn issue_for_code(
        &self,
        client: &RegisteredClient,
        authorization: &AuthorizationCode,
    ) -> Result<TokenGrant, OAuthError> {
        let access_token = self.issuer.issue_for_subject(
            client,
            &authorization.subject,
            &authorization.scopes,
            GrantType::AuthorizationCode,
        )?;

        let id_token = if authorization.scopes.iter().any(|s| s == OPENID_SCOPE) {
            let claims = IdTokenClaims::for_access_token(&access_token, &client.client_id)
                .with_auth_time(authorization.auth_time)
                .with_nonce(authorization.nonce.clone());
            Some(generate_id_token(&self.issuer, &claims)?)
        } else {
            None
        };

        Ok(TokenGrant {
            access_token,
            id_token,
        })
    }

    /// Record an end user's authorization and return the code to deliver to
    /// the client's redirect URI.
    pub async fn create_authorization_code(
        &self,
        grant: AuthorizationGrant,
    ) -> Result<AuthorizationCode, OAuthError> {
        let client = self
            .registry
            .lookup(&grant.client_id)
            .await
            .map_err(|e| OAuthError::ServerError(e.to_string()))?
            .ok_or_else(|| OAuthError::InvalidClient("client authentication failed".to_string()))?;

        if !client.allows_grant(GrantType::AuthorizationCode) {
            return Err(OAuthError::InvalidGrant(format!(
                "client {} is not allowed the authorization_code grant",
                client.client_id
            )));
        }
        if !client.has_redirect_uri(&grant.redirect_uri) {
            return Err(OAuthError::InvalidRequest(
                "redirect URI is not registered".to_string(),
            ));
        }

        let requested = grant.scope.as_deref().map(parse_scope).unwrap_or_default();
        let scopes = TokenIssuer::resolve_scopes(&client, &requested)?;

        if client.requires_consent && !grant.consent_granted {
            return Err(OAuthError::AccessDenied(format!(
                "{} did not consent to {}",
                grant.subject, client.client_id
            )));
        }

        let code_challenge = match (grant.code_challenge, grant.code_challenge_method.as_deref()) {
            (None, None) => None,
            (Some(challenge), Some(PKCE_METHOD_S256)) if is_valid_s256_challenge(&challenge) => {
                Some(challenge)
            }
            (Some(_), Some(PKCE_METHOD_S256)) => {
                return Err(OAuthError::InvalidRequest(
                    "malformed code challenge".to_string(),
                ));
            }
            (_, method) => {
                return Err(OAuthError::InvalidRequest(format!(
                    "unsupported code challenge method {:?}",
                    method
                )));
            }
        };

        let now = Utc::now();
        let authorization = AuthorizationCode {
            code: generate_token(),
            client_id: client.client_id.clone(),
            subject: grant.subject,
            redirect_uri: grant.redirect_uri,
            scopes,
            code_challenge,
            nonce: grant.nonce,
            auth_time: grant.auth_time,
            created_at: now,
            expires_at: now + self.code_lifetime,
        };

        self.codes
            .store_code(&authorization)
            .await
            .map_err(|e| OAuthError::ServerError(e.to_string()))?;

        tracing::info!(
            client_id = %authorization.client_id,
            sub = %authorization.subject,
            scope = %join_scopes(&authorization.scopes),
            pkce = authorization.code_challenge.is_some(),
            "authorization code created"
        );
        Ok(authorization)
    }

    /// Drop expired authorization codes.
    pub async fn cleanup_expired_codes(&self) -> Result<usize, StorageError> {
        self.codes.cleanup_expired_codes(Utc::now()).await
    }
}

/// `BASE64URL(SHA256(verifier)) == challenge`, compared in constant time.
pub fn verify_pkce_s256(code_verifier: &str, code_challenge: &str) -> bool {
    let computed = pkce_s256_challenge(code_verifier);
    computed.as_bytes().ct_eq(code_challenge.as_bytes()).into()
}

pub fn pkce_s256_challenge(code_verifier: &str) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

fn is_valid_s256_challenge(challenge: &str) -> bool {
    challenge.len() == 43
        && challenge
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::client_registry::tests::{order_service_definition, web_app_definition};
    use crate::oauth::issuer::tests::{ISSUER, issuer};
    use crate::oauth::jwt::UnverifiedToken;
    use crate::oauth::openid::calculate_at_hash;
    use crate::oauth::types::ClientCredentials;
    use crate::oauth::validator::{TokenValidator, ValidationResult};
    use crate::storage::inmemory::{MemoryAuthorizationCodeStore, MemoryClientStore};

    const REDIRECT: &str = "https://app.example.com/callback";

    async fn handler() -> GrantHandler {
        let registry = Arc::new(ClientRegistry::new(Arc::new(MemoryClientStore::new())));
        registry.register(order_service_definition()).await.unwrap();
        registry.register(web_app_definition()).await.unwrap();

        let mut consenting = web_app_definition();
        consenting.client_id = "consenting-app".to_string();
        consenting.requires_consent = true;
        registry.register(consenting).await.unwrap();

        GrantHandler::new(
            registry,
            Arc::new(issuer()),
            Arc::new(MemoryAuthorizationCodeStore::new()),
        )
    }

    fn credentials(client_id: &str, client_secret: &str) -> ClientCredentials {
        ClientCredentials {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }
    }

    fn client_credentials(client_id: &str, secret: &str, scope: Option<&str>) -> TokenRequest {
        TokenRequest::ClientCredentials {
            credentials: credentials(client_id, secret),
            scope: scope.map(str::to_string),
        }
    }

    fn authorization(scope: &str) -> AuthorizationGrant {
        AuthorizationGrant {
            client_id: "web-app".to_string(),
            subject: "alice".to_string(),
            redirect_uri: REDIRECT.to_string(),
            scope: Some(scope.to_string()),
            code_challenge: None,
            code_challenge_method: None,
            nonce: None,
            consent_granted: false,
            auth_time: Utc::now(),
        }
    }

    fn exchange(code: &str, verifier: Option<&str>) -> TokenRequest {
        TokenRequest::AuthorizationCode {
            credentials: credentials("web-app", "web-app-secret"),
            code: code.to_string(),
            redirect_uri: REDIRECT.to_string(),
            code_verifier: verifier.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_client_credentials_grant() {
        let handler = handler().await;
        let grant = handler
            .handle(client_credentials("order-service", "order-service-secret", None))
            .await
            .unwrap();

        let response = grant.to_response();
        assert_eq!(response.scope, "read:inventory write:orders");
        assert_eq!(response.expires_in, 3600);
        assert_eq!(response.token_type, TokenType::Bearer);
        assert!(response.id_token.is_none());

        let validator = TokenValidator::new(ISSUER, handler.issuer().keys().clone());
        assert!(validator.validate(&response.access_token, Some("write:orders")).is_valid());
    }

    #[tokio::test]
    async fn test_client_credentials_replay_always_succeeds() {
        let handler = handler().await;
        for _ in 0..3 {
            handler
                .handle(client_credentials(
                    "order-service",
                    "order-service-secret",
                    Some("read:inventory"),
                ))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_bad_credentials_are_invalid_client() {
        let handler = handler().await;
        let wrong_secret = handler
            .handle(client_credentials("order-service", "nope", None))
            .await
            .unwrap_err();
        let unknown = handler
            .handle(client_credentials("ghost", "nope", None))
            .await
            .unwrap_err();
        assert_eq!(wrong_secret.error_code(), "invalid_client");
        assert_eq!(unknown.error_code(), "invalid_client");
        assert_eq!(wrong_secret.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn test_scope_and_grant_type_errors() {
        let handler = handler().await;
        let err = handler
            .handle(client_credentials(
                "order-service",
                "order-service-secret",
                Some("read:inventory send:email"),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_scope");

        let err = handler
            .handle(client_credentials("web-app", "web-app-secret", None))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_authorization_code_flow_with_openid() {
        let handler = handler().await;
        let mut grant = authorization("openid read:inventory");
        grant.nonce = Some("nonce-123".to_string());
        let code = handler.create_authorization_code(grant).await.unwrap();
        assert_eq!(code.scopes, vec!["openid", "read:inventory"]);

        let token_grant = handler.handle(exchange(&code.code, None)).await.unwrap();
        let access = &token_grant.access_token;
        assert_eq!(access.claims.sub, "alice");
        assert_eq!(access.claims.client_id.as_deref(), Some("web-app"));
        assert_eq!(access.expires_in(), 900);

        let id_token = token_grant.id_token.as_deref().unwrap();
        let key = handler.issuer().keys().current_signing_key().verification_key();
        let claims: IdTokenClaims = UnverifiedToken::parse(id_token).unwrap().verify(&key).unwrap();
        assert_eq!(claims.aud, "web-app");
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.iss, ISSUER);
        assert_eq!(claims.nonce.as_deref(), Some("nonce-123"));
        assert_eq!(claims.at_hash, Some(calculate_at_hash(&access.token)));
    }

    #[tokio::test]
    async fn test_authorization_code_without_openid_has_no_id_token() {
        let handler = handler().await;
        let code = handler
            .create_authorization_code(authorization("read:inventory"))
            .await
            .unwrap();
        let grant = handler.handle(exchange(&code.code, None)).await.unwrap();
        assert!(grant.id_token.is_none());
        assert_eq!(grant.access_token.claims.scope, "read:inventory");
    }

    #[tokio::test]
    async fn test_authorization_code_is_single_use() {
        let handler = handler().await;
        let code = handler
            .create_authorization_code(authorization("openid"))
            .await
            .unwrap();
        handler.handle(exchange(&code.code, None)).await.unwrap();
        let replay = handler.handle(exchange(&code.code, None)).await.unwrap_err();
        assert_eq!(replay.error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_redirect_uri_must_match_exactly() {
        let handler = handler().await;
        let code = handler
            .create_authorization_code(authorization("openid"))
            .await
            .unwrap();
        let request = TokenRequest::AuthorizationCode {
            credentials: credentials("web-app", "web-app-secret"),
            code: code.code.clone(),
            redirect_uri: format!("{}/", REDIRECT),
            code_verifier: None,
        };
        assert_eq!(
            handler.handle(request).await.unwrap_err().error_code(),
            "invalid_grant"
        );
        // The failed attempt consumed the code.
        assert_eq!(
            handler
                .handle(exchange(&code.code, None))
                .await
                .unwrap_err()
                .error_code(),
            "invalid_grant"
        );
    }

    #[tokio::test]
    async fn test_code_is_bound_to_its_client() {
        let handler = handler().await;
        let code = handler
            .create_authorization_code(authorization("openid"))
            .await
            .unwrap();
        let request = TokenRequest::AuthorizationCode {
            credentials: credentials("consenting-app", "web-app-secret"),
            code: code.code,
            redirect_uri: REDIRECT.to_string(),
            code_verifier: None,
        };
        assert_eq!(
            handler.handle(request).await.unwrap_err().error_code(),
            "invalid_grant"
        );
    }

    #[tokio::test]
    async fn test_expired_code_is_rejected() {
        let handler = handler().await.with_code_lifetime(chrono::Duration::zero());
        let code = handler
            .create_authorization_code(authorization("openid"))
            .await
            .unwrap();
        assert_eq!(
            handler
                .handle(exchange(&code.code, None))
                .await
                .unwrap_err()
                .error_code(),
            "invalid_grant"
        );
    }

    #[tokio::test]
    async fn test_pkce_s256() {
        let handler = handler().await;
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            pkce_s256_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );

        let mut grant = authorization("openid");
        grant.code_challenge = Some(pkce_s256_challenge(verifier));
        grant.code_challenge_method = Some("S256".to_string());

        let code = handler.create_authorization_code(grant.clone()).await.unwrap();
        let err = handler
            .handle(exchange(&code.code, Some("wrong-verifier")))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_grant");

        let code = handler.create_authorization_code(grant.clone()).await.unwrap();
        let err = handler.handle(exchange(&code.code, None)).await.unwrap_err();
        assert_eq!(err.error_code(), "invalid_grant");

        let code = handler.create_authorization_code(grant).await.unwrap();
        assert!(handler.handle(exchange(&code.code, Some(verifier))).await.is_ok());
    }

    #[tokio::test]
    async fn test_pkce_plain_is_rejected() {
        let handler = handler().await;
        let mut grant = authorization("openid");
        grant.code_challenge = Some("plain-challenge".to_string());
        grant.code_challenge_method = Some("plain".to_string());
        let err = handler.create_authorization_code(grant).await.unwrap_err();
        assert_eq!(err.error_code(), "invalid_request");
    }

    #[tokio::test]
    async fn test_authorization_checks() {
        let handler = handler().await;

        let mut grant = authorization("openid");
        grant.redirect_uri = "https://evil.example.com/callback".to_string();
        assert_eq!(
            handler.create_authorization_code(grant).await.unwrap_err().error_code(),
            "invalid_request"
        );

        let grant = authorization("openid write:orders");
        assert_eq!(
            handler.create_authorization_code(grant).await.unwrap_err().error_code(),
            "invalid_scope"
        );

        let mut grant = authorization("read:inventory");
        grant.client_id = "order-service".to_string();
        assert_eq!(
            handler.create_authorization_code(grant).await.unwrap_err().error_code(),
            "invalid_grant"
        );

        let mut grant = authorization("openid");
        grant.client_id = "consenting-app".to_string();
        assert_eq!(
            handler.create_authorization_code(grant.clone()).await.unwrap_err().error_code(),
            "access_denied"
        );
        grant.consent_granted = true;
        assert!(handler.create_authorization_code(grant).await.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_expired_codes() {
        let handler = handler().await.with_code_lifetime(chrono::Duration::zero());
        handler
            .create_authorization_code(authorization("openid"))
            .await
            .unwrap();
        assert_eq!(handler.cleanup_expired_codes().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_issued_token_fails_validation_after_expiry() {
        let handler = handler().await;
        let grant = handler
            .handle(client_credentials("order-service", "order-service-secret", None))
            .await
            .unwrap();
        let validator = TokenValidator::new(ISSUER, handler.issuer().keys().clone());
        let after_expiry = grant.access_token.expires_at() + chrono::Duration::seconds(1);
        assert_eq!(
            validator.validate_at(&grant.access_token.token, None, after_expiry),
            ValidationResult::Expired
        );
    }
}
