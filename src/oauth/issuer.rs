//! Access token minting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::OAuthError;
use crate::oauth::client_registry::RegisteredClient;
use crate::oauth::jwt;
use crate::oauth::keys::KeyManager;
use crate::oauth::types::{GrantType, join_scopes, parse_scope};

/// Claims carried by every access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Space-delimited, in issue order
    pub scope: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl AccessTokenClaims {
    pub fn scopes(&self) -> Vec<String> {
        parse_scope(&self.scope)
    }
}

/// A signed access token and the claims it carries.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Compact JWT
    pub token: String,
    pub claims: AccessTokenClaims,
    pub key_id: String,
    pub grant_type: GrantType,
}

impl IssuedToken {
    pub fn scopes(&self) -> Vec<String> {
        self.claims.scopes()
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.claims.iat, 0).unwrap_or_default()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.claims.exp, 0).unwrap_or_default()
    }

    /// Lifetime in seconds as reported by the token endpoint.
    pub fn expires_in(&self) -> u64 {
        (self.claims.exp - self.claims.iat).max(0) as u64
    }
}

/// Mints RS256 access tokens for registered clients.
pub struct TokenIssuer {
    issuer: String,
    audience: Option<String>,
    keys: Arc<KeyManager>,
}

impl TokenIssuer {
    pub fn new(issuer: impl Into<String>, keys: Arc<KeyManager>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: None,
            keys,
        }
    }

    /// Stamp every token with this `aud` claim.
    pub fn with_audience(mut self, audience: Option<String>) -> Self {
        self.audience = audience;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Scopes a client receives for a request.
    ///
    /// An empty request yields every allowed scope in registration order.
    /// Otherwise the requested scopes are kept in request order without
    /// duplicates, and any scope outside the allowed set is an error.
    pub fn resolve_scopes(
        client: &RegisteredClient,
        requested_scopes: &[String],
    ) -> Result<Vec<String>, OAuthError> {
        if requested_scopes.is_empty() {
            return Ok(client.allowed_scopes.clone());
        }

        let mut granted: Vec<String> = Vec::with_capacity(requested_scopes.len());
        for scope in requested_scopes {
            if !client.allows_scope(scope) {
                return Err(OAuthError::InvalidScope(format!(
                    "client {} may not request scope {}",
                    client.client_id, scope
                )));
            }
            if !granted.contains(scope) {
                granted.push(scope.clone());
            }
        }
        Ok(granted)
    }

    /// Issue a token whose subject is the client itself.
    pub fn issue(
        &self,
        client: &RegisteredClient,
        requested_scopes: &[String],
        grant_type: GrantType,
    ) -> Result<IssuedToken, OAuthError> {
        self.issue_at(
            client,
            &client.client_id,
            requested_scopes,
            grant_type,
            Utc::now(),
        )
    }

    /// Issue a token on behalf of an end user.
    pub fn issue_for_subject(
        &self,
        client: &RegisteredClient,
        subject: &str,
        requested_scopes: &[String],
        grant_type: GrantType,
    ) -> Result<IssuedToken, OAuthError> {
        self.issue_at(client, subject, requested_scopes, grant_type, Utc::now())
    }

    pub fn issue_at(
        &self,
        client: &RegisteredClient,
        subject: &str,
        requested_scopes: &[String],
        grant_type: GrantType,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, OAuthError> {
        if !client.allows_grant(grant_type) {
            return Err(OAuthError::InvalidGrant(format!(
                "client {} is not allowed the {} grant",
                client.client_id, grant_type
            )));
        }
        let scopes = Self::resolve_scopes(client, requested_scopes)?;

        let iat = now.timestamp();
        let claims = AccessTokenClaims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            aud: self.audience.clone(),
            scope: join_scopes(&scopes),
            iat,
            exp: iat + client.access_token_ttl.num_seconds(),
            jti: Some(ulid::Ulid::new().to_string()),
            client_id: Some(client.client_id.clone()),
        };

        let key = self.keys.current_signing_key();
        let token = jwt::encode(key, &claims).map_err(|e| OAuthError::ServerError(e.to_string()))?;

        tracing::info!(
            client_id = %client.client_id,
            sub = %claims.sub,
            scope = %claims.scope,
            jti = ?claims.jti,
            kid = %key.key_id(),
            grant_type = %grant_type,
            "issued access token"
        );

        Ok(IssuedToken {
            token,
            claims,
            key_id: key.key_id().to_string(),
            grant_type,
        })
    }

    /// Sign arbitrary claims with the active key, e.g. an ID token.
    pub fn sign<C: Serialize>(&self, claims: &C) -> Result<String, OAuthError> {
        jwt::encode(self.keys.current_signing_key(), claims)
            .map_err(|e| OAuthError::ServerError(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::oauth::client_registry::tests::{order_service, order_service_definition};
    use crate::oauth::jwt::UnverifiedToken;
    use crate::oauth::keys::test_keys::key_manager;

    pub(crate) const ISSUER: &str = "http://localhost:9000";

    pub(crate) fn issuer() -> TokenIssuer {
        TokenIssuer::new(ISSUER, key_manager("issuer-key"))
    }

    fn scopes(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_order_service_default_scopes_and_expiry() {
        let issued = issuer()
            .issue(&order_service(), &[], GrantType::ClientCredentials)
            .unwrap();

        assert_eq!(issued.claims.scope, "read:inventory write:orders");
        assert_eq!(issued.claims.exp, issued.claims.iat + 3600);
        assert_eq!(issued.expires_in(), 3600);
        assert_eq!(issued.claims.sub, "order-service");
        assert_eq!(issued.claims.client_id.as_deref(), Some("order-service"));
        assert_eq!(issued.claims.iss, ISSUER);
        assert!(issued.claims.aud.is_none());
        assert!(ulid::Ulid::from_string(issued.claims.jti.as_deref().unwrap()).is_ok());
    }

    #[test]
    fn test_requested_subset_is_granted_in_request_order() {
        let issuer = issuer();
        let client = order_service();

        let issued = issuer
            .issue(&client, &scopes(&["write:orders"]), GrantType::ClientCredentials)
            .unwrap();
        assert_eq!(issued.scopes(), scopes(&["write:orders"]));

        let issued = issuer
            .issue(
                &client,
                &scopes(&["write:orders", "read:inventory", "write:orders"]),
                GrantType::ClientCredentials,
            )
            .unwrap();
        assert_eq!(issued.claims.scope, "write:orders read:inventory");
    }

    #[test]
    fn test_superset_request_is_invalid_scope() {
        let result = issuer().issue(
            &order_service(),
            &scopes(&["read:inventory", "send:email"]),
            GrantType::ClientCredentials,
        );
        assert!(matches!(result, Err(OAuthError::InvalidScope(_))));
    }

    #[test]
    fn test_disallowed_grant_type_is_invalid_grant() {
        let result = issuer().issue(&order_service(), &[], GrantType::AuthorizationCode);
        assert!(matches!(result, Err(OAuthError::InvalidGrant(_))));
    }

    #[test]
    fn test_every_subset_of_allowed_scopes_is_issued_exactly() {
        let mut definition = order_service_definition();
        definition.scopes = scopes(&["a", "b", "c"]);
        let client = RegisteredClient::try_from(definition).unwrap();
        let issuer = issuer();

        for mask in 1u8..8 {
            let requested: Vec<String> = ["a", "b", "c"]
                .iter()
                .enumerate()
                .filter(|(index, _)| mask & (1u8 << *index) != 0)
                .map(|(_, scope)| scope.to_string())
                .collect();
            let issued = issuer
                .issue(&client, &requested, GrantType::ClientCredentials)
                .unwrap();
            assert_eq!(issued.scopes(), requested);
        }
    }

    #[test]
    fn test_token_header_and_audience() {
        let issuer = issuer().with_audience(Some("inventory-service".to_string()));
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let issued = issuer
            .issue_at(
                &order_service(),
                "order-service",
                &[],
                GrantType::ClientCredentials,
                now,
            )
            .unwrap();

        assert_eq!(issued.claims.iat, 1_700_000_000);
        assert_eq!(issued.issued_at(), now);
        assert_eq!(issued.expires_at(), now + chrono::Duration::hours(1));
        assert_eq!(issued.claims.aud.as_deref(), Some("inventory-service"));

        let parsed = UnverifiedToken::parse(&issued.token).unwrap();
        assert_eq!(parsed.header.alg, jsonwebtoken::Algorithm::RS256);
        assert_eq!(parsed.key_id(), "issuer-key");
        assert_eq!(issued.key_id, "issuer-key");
        let claims: AccessTokenClaims = parsed
            .verify(&issuer.keys().current_signing_key().verification_key())
            .unwrap();
        assert_eq!(claims, issued.claims);
    }

    #[test]
    fn test_each_issue_mints_a_fresh_token() {
        let issuer = issuer();
        let client = order_service();
        let first = issuer.issue(&client, &[], GrantType::ClientCredentials).unwrap();
        let second = issuer.issue(&client, &[], GrantType::ClientCredentials).unwrap();
        assert_ne!(first.claims.jti, second.claims.jti);
        assert_ne!(first.token, second.token);
    }
}
