//! Client credentials token acquisition with caching.

use reqwest::StatusCode;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::errors::ClientError;
use crate::oauth::types::{OAuthErrorResponse, TokenResponse};

struct CachedToken {
    response: TokenResponse,
    refresh_at: Instant,
}

/// Obtains access tokens with the client credentials grant and reuses them
/// until shortly before they expire.
pub struct ClientCredentialsClient {
    http_client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
    refresh_skew: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientCredentialsClient {
    pub fn new(
        http_client: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: None,
            refresh_skew: Duration::from_secs(30),
            cached: Mutex::new(None),
        }
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    /// Treat cached tokens as stale this long before `expires_in` elapses.
    pub fn with_refresh_skew(mut self, refresh_skew: Duration) -> Self {
        self.refresh_skew = refresh_skew;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Request a new token, bypassing the cache.
    pub async fn request_token(&self) -> Result<TokenResponse, ClientError> {
        let mut form = vec![("grant_type", "client_credentials")];
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.as_str()));
        }

        let response = self
            .http_client
            .post(&self.token_url)
            .basic_auth(
                form_urlencode(&self.client_id),
                Some(form_urlencode(&self.client_secret)),
            )
            .form(&form)
            .send()
            .await
            .map_err(|e| ClientError::RequestFailed(self.token_url.clone(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error = response
                .json::<OAuthErrorResponse>()
                .await
                .map(|body| body.error)
                .unwrap_or_else(|_| "unknown_error".to_string());
            tracing::warn!(client_id = %self.client_id, status = status.as_u16(), error = %error, "token request rejected");
            return Err(ClientError::TokenRejected(status.as_u16(), error));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidTokenResponse(e.to_string()))?;

        tracing::debug!(
            client_id = %self.client_id,
            scope = %token.scope,
            expires_in = token.expires_in,
            "obtained access token"
        );
        Ok(token)
    }

    /// A current access token, from the cache when still fresh.
    pub async fn access_token(&self) -> Result<String, ClientError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.response.access_token.clone());
            }
        }

        let response = self.request_token().await?;
        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(self.refresh_skew);
        let access_token = response.access_token.clone();
        *cached = Some(CachedToken {
            response,
            refresh_at: Instant::now() + lifetime,
        });
        Ok(access_token)
    }

    /// Drop the cached token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    /// GET a protected resource. A 401 drops the cached token and retries once
    /// with a fresh one.
    pub async fn get(&self, url: &str) -> Result<reqwest::Response, ClientError> {
        let response = self.send_get(url).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::info!(client_id = %self.client_id, url = %url, "resource rejected token, retrying with a new one");
        self.invalidate().await;
        self.send_get(url).await
    }

    async fn send_get(&self, url: &str) -> Result<reqwest::Response, ClientError> {
        let access_token = self.access_token().await?;
        self.http_client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ClientError::RequestFailed(url.to_string(), e.to_string()))
    }
}

/// Basic credentials are form-urlencoded before base64 (RFC 6749 section 2.3.1).
fn form_urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
