//! Handles well-known discovery endpoints - authorization server metadata, OpenID configuration, and JWKS

use axum::{extract::State, response::Json};
use serde_json::{Value, json};

use super::context::AppState;
use crate::errors::{HttpError, Result};
use crate::oauth::keys::RS256;

/// OAuth 2.0 Authorization Server Metadata handler
/// GET /.well-known/oauth-authorization-server
///
/// Returns metadata about the OAuth authorization server as specified by RFC 8414.
pub async fn oauth_authorization_server_handler(State(state): State<AppState>) -> Json<Value> {
    let base = &state.external_base;
    Json(json!({
        "issuer": base,
        "authorization_endpoint": state.authorization_endpoint,
        "token_endpoint": format!("{}/oauth/token", base),
        "jwks_uri": format!("{}/.well-known/jwks.json", base),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "client_credentials"],
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post"],
        "code_challenge_methods_supported": ["S256"]
    }))
}

/// OpenID Connect Configuration handler
/// GET /.well-known/openid-configuration
///
/// Returns OpenID Provider metadata as specified by OpenID Connect Discovery 1.0.
pub async fn openid_configuration_handler(State(state): State<AppState>) -> Json<Value> {
    let base = &state.external_base;
    Json(json!({
        "issuer": base,
        "authorization_endpoint": state.authorization_endpoint,
        "token_endpoint": format!("{}/oauth/token", base),
        "jwks_uri": format!("{}/.well-known/jwks.json", base),
        "response_types_supported": ["code"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": [RS256],
        "scopes_supported": ["openid"],
        "claims_supported": ["iss", "sub", "aud", "exp", "iat", "auth_time", "nonce", "at_hash"],
        "grant_types_supported": ["authorization_code", "client_credentials"],
        "code_challenge_methods_supported": ["S256"]
    }))
}

/// JWKS (JSON Web Key Set) handler
/// GET /.well-known/jwks.json
///
/// Returns the public keys used by the authorization server for signing tokens.
pub async fn jwks_handler(State(state): State<AppState>) -> Result<Json<Value>> {
    let jwks = serde_json::to_value(state.key_manager().public_key_set())
        .map_err(|e| HttpError::SerializationFailed(e.to_string()))?;
    Ok(Json(jwks))
}
