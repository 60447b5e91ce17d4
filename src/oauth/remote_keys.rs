//! Resource-server side cache of the authorization server's key set.
//!
//! Keys are fetched at startup and refreshed on an interval. A refresh that
//! fails after all retries leaves the last good key set in place. Until a key
//! set has been loaded once, every lookup reports [`KeyResolution::Unavailable`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::errors::KeySetError;
use crate::oauth::keys::{JsonWebKeySet, KeyResolution, VerificationKeySet, VerificationKeys};

/// Retry schedule for a single refresh.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, doubling from the initial backoff.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

struct CachedKeys {
    keys: VerificationKeySet,
    fetched_at: DateTime<Utc>,
}

pub struct RemoteKeySet {
    http_client: reqwest::Client,
    jwks_uri: String,
    policy: RetryPolicy,
    min_refresh_interval: Duration,
    cache: RwLock<Option<CachedKeys>>,
    last_unknown_key_refresh: Mutex<Option<Instant>>,
}

impl RemoteKeySet {
    pub fn new(http_client: reqwest::Client, jwks_uri: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            http_client,
            jwks_uri: jwks_uri.into(),
            policy,
            min_refresh_interval: Duration::from_secs(30),
            cache: RwLock::new(None),
            last_unknown_key_refresh: Mutex::new(None),
        }
    }

    /// Minimum spacing between refreshes triggered by unknown key ids.
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    pub fn is_loaded(&self) -> bool {
        self.cache
            .read()
            .map(|cache| cache.is_some())
            .unwrap_or(false)
    }

    pub fn key_ids(&self) -> Vec<String> {
        self.cache
            .read()
            .ok()
            .and_then(|cache| cache.as_ref().map(|cached| cached.keys.key_ids()))
            .unwrap_or_default()
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.cache
            .read()
            .ok()
            .and_then(|cache| cache.as_ref().map(|cached| cached.fetched_at))
    }

    /// Fetch the key set, retrying with backoff. On success the cache is
    /// replaced and the number of usable keys returned; on failure the
    /// previous key set stays in place.
    pub async fn refresh(&self) -> Result<usize, KeySetError> {
        let mut attempt = 1;
        loop {
            match self.fetch_once().await {
                Ok(keys) => {
                    let count = keys.len();
                    self.store(keys);
                    tracing::info!(jwks_uri = %self.jwks_uri, keys = count, "key set refreshed");
                    return Ok(count);
                }
                Err(err) if attempt < self.policy.attempts => {
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        error = %err,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "key set fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(
                        error = %err,
                        attempts = attempt,
                        has_cached_keys = self.is_loaded(),
                        "key set refresh failed"
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn fetch_once(&self) -> Result<VerificationKeySet, KeySetError> {
        let response = self
            .http_client
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| KeySetError::RequestFailed(self.jwks_uri.clone(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeySetError::UnexpectedStatus(
                self.jwks_uri.clone(),
                status.as_u16(),
            ));
        }

        let document: JsonWebKeySet = response
            .json()
            .await
            .map_err(|e| KeySetError::InvalidDocument(self.jwks_uri.clone(), e.to_string()))?;

        let keys = VerificationKeySet::from_jwks(&document);
        if keys.is_empty() {
            return Err(KeySetError::NoUsableKeys(self.jwks_uri.clone()));
        }
        Ok(keys)
    }

    fn store(&self, keys: VerificationKeySet) {
        match self.cache.write() {
            Ok(mut cache) => {
                *cache = Some(CachedKeys {
                    keys,
                    fetched_at: Utc::now(),
                });
            }
            Err(e) => tracing::error!(error = %e, "key set cache lock poisoned"),
        }
    }

    /// Refresh every `interval` until `cancellation_token` fires.
    pub fn spawn_refresh_task(
        self: &Arc<Self>,
        tracker: &TaskTracker,
        interval: Duration,
        cancellation_token: CancellationToken,
    ) {
        let keys = self.clone();
        tracker.spawn(async move {
            loop {
                tokio::select! {
                    () = cancellation_token.cancelled() => {
                        tracing::debug!("key set refresh task stopping");
                        break;
                    }
                    () = tokio::time::sleep(interval) => {
                        // Failures are logged by refresh and the cache is kept.
                        let _ = keys.refresh().await;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl VerificationKeys for RemoteKeySet {
    fn resolve(&self, key_id: &str) -> KeyResolution {
        match self.cache.read() {
            Ok(cache) => match cache.as_ref() {
                Some(cached) => cached.keys.resolve(key_id),
                None => KeyResolution::Unavailable,
            },
            Err(_) => KeyResolution::Unavailable,
        }
    }

    /// Requests arriving while a triggered refresh is in flight fall inside
    /// the interval and return immediately.
    async fn refresh_for_unknown_key(&self, key_id: &str) -> bool {
        {
            let mut last = match self.last_unknown_key_refresh.lock() {
                Ok(last) => last,
                Err(e) => {
                    tracing::error!(error = %e, "unknown key refresh lock poisoned");
                    return false;
                }
            };
            if let Some(previous) = *last {
                if previous.elapsed() < self.min_refresh_interval {
                    tracing::debug!(kid = %key_id, "unknown key refresh suppressed");
                    return false;
                }
            }
            *last = Some(Instant::now());
        }

        tracing::info!(kid = %key_id, "refreshing key set for unknown key id");
        self.refresh().await.is_ok()
    }
}
