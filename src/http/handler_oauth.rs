//! Handles POST /oauth/token - Exchanges client credentials or authorization codes for RS256 access tokens

use axum::{
    Form, Json,
    extract::State,
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use base64::prelude::*;
use serde::Deserialize;
use std::sync::Arc;

use crate::errors::OAuthError;
use crate::oauth::{ClientCredentials, GrantHandler, GrantType, OAuthErrorResponse, TokenRequest};

/// Form body of a token request (`application/x-www-form-urlencoded`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenForm {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
}

/// Client credentials from HTTP Basic authentication, falling back to the
/// `client_id`/`client_secret` form parameters.
///
/// Both halves of the Basic credentials are form-urlencoded by the client
/// (RFC 6749 section 2.3.1) and decoded here.
pub fn extract_client_auth(headers: &HeaderMap, form: &TokenForm) -> Option<ClientCredentials> {
    if let Some(credentials) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("basic"))
        .and_then(|(_, encoded)| BASE64_STANDARD.decode(encoded.trim()).ok())
        .and_then(|decoded| String::from_utf8(decoded).ok())
    {
        if let Some((client_id, client_secret)) = credentials.split_once(':') {
            return Some(ClientCredentials {
                client_id: form_urldecode(client_id),
                client_secret: form_urldecode(client_secret),
            });
        }
    }

    match (&form.client_id, &form.client_secret) {
        (Some(client_id), Some(client_secret)) => Some(ClientCredentials {
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
        }),
        _ => None,
    }
}

/// Decode one `application/x-www-form-urlencoded` value.
fn form_urldecode(value: &str) -> String {
    // Literal separators are kept as data rather than splitting the value.
    let escaped = value.replace('&', "%26").replace('=', "%3D");
    url::form_urlencoded::parse(escaped.as_bytes())
        .next()
        .map(|(decoded, _)| decoded.into_owned())
        .unwrap_or_default()
}

/// Build a typed token request from the form and the extracted credentials.
pub fn token_request(
    form: TokenForm,
    credentials: Option<ClientCredentials>,
) -> Result<TokenRequest, OAuthError> {
    let grant_type = GrantType::from_param(&form.grant_type)
        .ok_or_else(|| OAuthError::UnsupportedGrantType(form.grant_type.clone()))?;
    let credentials = credentials
        .ok_or_else(|| OAuthError::InvalidClient("no client credentials presented".to_string()))?;

    match grant_type {
        GrantType::ClientCredentials => Ok(TokenRequest::ClientCredentials {
            credentials,
            scope: form.scope.filter(|scope| !scope.trim().is_empty()),
        }),
        GrantType::AuthorizationCode => {
            let code = form
                .code
                .ok_or_else(|| OAuthError::InvalidRequest("code is required".to_string()))?;
            let redirect_uri = form
                .redirect_uri
                .ok_or_else(|| OAuthError::InvalidRequest("redirect_uri is required".to_string()))?;
            Ok(TokenRequest::AuthorizationCode {
                credentials,
                code,
                redirect_uri,
                code_verifier: form.code_verifier,
            })
        }
    }
}

fn no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

/// Error body with a fixed description per error code.
pub fn oauth_error_response(error: &OAuthError) -> Response {
    let body = OAuthErrorResponse {
        error: error.error_code().to_string(),
        error_description: Some(error.public_description().to_string()),
    };
    no_store((error.status_code(), Json(body)).into_response())
}

/// Handle OAuth token requests
/// POST /oauth/token
pub async fn handle_oauth_token(
    State(grant_handler): State<Arc<GrantHandler>>,
    headers: HeaderMap,
    Form(form): Form<TokenForm>,
) -> Response {
    let credentials = extract_client_auth(&headers, &form);

    let request = match token_request(form, credentials) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "malformed token request");
            return oauth_error_response(&e);
        }
    };

    match grant_handler.handle(request).await {
        Ok(grant) => no_store(Json(grant.to_response()).into_response()),
        Err(e) => oauth_error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(grant_type: &str) -> TokenForm {
        TokenForm {
            grant_type: grant_type.to_string(),
            ..Default::default()
        }
    }

    fn basic(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", BASE64_STANDARD.encode(value))).unwrap(),
        );
        headers
    }

    #[test]
    fn test_extract_client_auth_prefers_basic() {
        let mut form = form("client_credentials");
        form.client_id = Some("form-client".to_string());
        form.client_secret = Some("form-secret".to_string());

        let credentials = extract_client_auth(&basic("order-service:s3cr:et"), &form).unwrap();
        assert_eq!(credentials.client_id, "order-service");
        assert_eq!(credentials.client_secret, "s3cr:et");

        let credentials = extract_client_auth(&HeaderMap::new(), &form).unwrap();
        assert_eq!(credentials.client_id, "form-client");
        assert_eq!(credentials.client_secret, "form-secret");
    }

    #[test]
    fn test_extract_client_auth_decodes_basic_credentials() {
        let form = form("client_credentials");

        let credentials =
            extract_client_auth(&basic("order-service:s3cr%2Bt%2F%3D%25"), &form).unwrap();
        assert_eq!(credentials.client_id, "order-service");
        assert_eq!(credentials.client_secret, "s3cr+t/=%");

        let credentials = extract_client_auth(&basic("billing%3Aeu:a+b"), &form).unwrap();
        assert_eq!(credentials.client_id, "billing:eu");
        assert_eq!(credentials.client_secret, "a b");

        let credentials = extract_client_auth(&basic("order-service:pad=="), &form).unwrap();
        assert_eq!(credentials.client_secret, "pad==");
    }

    #[test]
    fn test_extract_client_auth_scheme_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!(
                "basic {}",
                BASE64_STANDARD.encode("order-service:secret")
            ))
            .unwrap(),
        );
        let credentials = extract_client_auth(&headers, &form("client_credentials")).unwrap();
        assert_eq!(credentials.client_id, "order-service");
        assert_eq!(credentials.client_secret, "secret");
    }

    #[test]
    fn test_extract_client_auth_requires_both_parts() {
        let mut form = form("client_credentials");
        assert!(extract_client_auth(&HeaderMap::new(), &form).is_none());
        form.client_id = Some("order-service".to_string());
        assert!(extract_client_auth(&HeaderMap::new(), &form).is_none());
        assert!(extract_client_auth(&basic("no-colon"), &form).is_none());
    }

    #[test]
    fn test_token_request_conversion() {
        let credentials = || {
            Some(ClientCredentials {
                client_id: "web-app".to_string(),
                client_secret: "secret".to_string(),
            })
        };

        let err = token_request(form("password"), credentials()).unwrap_err();
        assert_eq!(err.error_code(), "unsupported_grant_type");

        let err = token_request(form("client_credentials"), None).unwrap_err();
        assert_eq!(err.error_code(), "invalid_client");

        let err = token_request(form("authorization_code"), credentials()).unwrap_err();
        assert_eq!(err.error_code(), "invalid_request");

        let mut code_form = form("authorization_code");
        code_form.code = Some("abc".to_string());
        code_form.redirect_uri = Some("https://app.example.com/callback".to_string());
        let request = token_request(code_form, credentials()).unwrap();
        assert_eq!(request.grant_type(), GrantType::AuthorizationCode);
        assert_eq!(request.client_id(), "web-app");

        let mut scoped = form("client_credentials");
        scoped.scope = Some("   ".to_string());
        match token_request(scoped, credentials()).unwrap() {
            TokenRequest::ClientCredentials { scope, .. } => assert!(scope.is_none()),
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_error_response_hides_detail() {
        let response = oauth_error_response(&OAuthError::InvalidClient(
            "unknown client ghost".to_string(),
        ));
        assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    }
}
