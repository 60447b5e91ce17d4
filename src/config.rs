//! Environment-based configuration types for the authorization and resource servers.

use anyhow::Result;
use std::time::Duration;

use crate::errors::ConfigError;

/// Smallest RSA modulus accepted for signing keys.
pub const MIN_RSA_KEY_SIZE: usize = 2048;

/// HTTP server port configuration
#[derive(Clone, Debug)]
pub struct HttpPort(u16);

/// HTTP client timeout configuration
#[derive(Clone, Debug)]
pub struct HttpClientTimeout(Duration);

/// Canonical issuer identifier, an absolute http(s) URL without a trailing slash
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Issuer(String);

/// RSA signing key size in bits
#[derive(Clone, Debug)]
pub struct RsaKeySize(usize);

/// Lifetime of authorization codes
#[derive(Clone, Debug)]
pub struct AuthorizationCodeLifetime(chrono::Duration);

/// Interval between key set refreshes
#[derive(Clone, Debug)]
pub struct RefreshInterval(Duration);

/// Number of attempts for a single key set refresh
#[derive(Clone, Debug)]
pub struct FetchAttempts(u32);

/// Initial delay between key set fetch attempts
#[derive(Clone, Debug)]
pub struct FetchBackoff(Duration);

/// Tolerated clock difference when checking token expiry
#[derive(Clone, Debug)]
pub struct ClockSkew(chrono::Duration);

/// Authorization server configuration
#[derive(Clone)]
pub struct Config {
    pub version: String,
    pub http_port: HttpPort,
    pub external_base: Issuer,
    pub oauth_signing_key_file: Option<String>,
    pub oauth_signing_key_id: Option<String>,
    pub oauth_rsa_key_size: RsaKeySize,
    pub oauth_token_audience: Option<String>,
    pub clients_file: Option<String>,
    pub authorization_code_lifetime: AuthorizationCodeLifetime,
    pub authorization_endpoint: Option<String>,
}

impl Config {
    /// Create a new configuration from environment variables
    pub fn new() -> Result<Self> {
        let external_base: Issuer = require_env("EXTERNAL_BASE")?.try_into()?;
        let http_port: HttpPort = default_env("HTTP_PORT", "9000").try_into()?;
        let oauth_signing_key_file = optional_env("OAUTH_SIGNING_KEY_FILE");
        let oauth_signing_key_id = optional_env("OAUTH_SIGNING_KEY_ID");
        let oauth_rsa_key_size: RsaKeySize = default_env("OAUTH_RSA_KEY_SIZE", "2048").try_into()?;
        let oauth_token_audience = optional_env("OAUTH_TOKEN_AUDIENCE");
        let clients_file = optional_env("CLIENTS_FILE");
        let authorization_code_lifetime: AuthorizationCodeLifetime =
            default_env("AUTHORIZATION_CODE_LIFETIME", "10m").try_into()?;
        let authorization_endpoint = optional_env("AUTHORIZATION_ENDPOINT")
            .map(|value| url::Url::parse(&value).map(|_| value))
            .transpose()?;

        Ok(Self {
            version: version()?,
            http_port,
            external_base,
            oauth_signing_key_file,
            oauth_signing_key_id,
            oauth_rsa_key_size,
            oauth_token_audience,
            clients_file,
            authorization_code_lifetime,
            authorization_endpoint,
        })
    }
}

/// Resource server configuration
#[derive(Clone)]
pub struct ResourceConfig {
    pub version: String,
    pub http_port: HttpPort,
    pub issuer: Issuer,
    pub jwks_uri: String,
    pub jwks_refresh_interval: RefreshInterval,
    pub jwks_min_refresh_interval: RefreshInterval,
    pub jwks_fetch_attempts: FetchAttempts,
    pub jwks_fetch_backoff: FetchBackoff,
    pub token_clock_skew: ClockSkew,
    pub http_client_timeout: HttpClientTimeout,
    pub user_agent: String,
}

impl ResourceConfig {
    /// Create a new resource server configuration from environment variables
    pub fn new() -> Result<Self> {
        let issuer: Issuer = require_env("ISSUER")?.try_into()?;
        let jwks_uri = optional_env("JWKS_URI").unwrap_or_else(|| issuer.jwks_uri());
        let http_port: HttpPort = default_env("HTTP_PORT", "8081").try_into()?;
        let jwks_refresh_interval: RefreshInterval =
            default_env("JWKS_REFRESH_INTERVAL", "5m").try_into()?;
        let jwks_min_refresh_interval: RefreshInterval =
            default_env("JWKS_MIN_REFRESH_INTERVAL", "30s").try_into()?;
        let jwks_fetch_attempts: FetchAttempts = default_env("JWKS_FETCH_ATTEMPTS", "3").try_into()?;
        let jwks_fetch_backoff: FetchBackoff =
            default_env("JWKS_FETCH_BACKOFF", "250ms").try_into()?;
        let token_clock_skew: ClockSkew = default_env("TOKEN_CLOCK_SKEW", "0s").try_into()?;
        let http_client_timeout: HttpClientTimeout =
            default_env("HTTP_CLIENT_TIMEOUT", "10s").try_into()?;
        let default_user_agent = format!("tollgate-resource/{}", version()?);
        let user_agent = default_env("USER_AGENT", &default_user_agent);

        Ok(Self {
            version: version()?,
            http_port,
            issuer,
            jwks_uri,
            jwks_refresh_interval,
            jwks_min_refresh_interval,
            jwks_fetch_attempts,
            jwks_fetch_backoff,
            token_clock_skew,
            http_client_timeout,
            user_agent,
        })
    }
}

/// Get application version from build environment
pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(ConfigError::VersionNotSet.into())
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| ConfigError::EnvVarRequired(name.to_string()).into())
}

pub(crate) fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn default_env(name: &str, default_value: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default_value.to_string())
}

fn parse_duration(value: String) -> Result<Duration, ConfigError> {
    duration_str::parse(&value).map_err(|e| ConfigError::DurationParsingFailed(value, e.to_string()))
}

impl TryFrom<String> for HttpPort {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value
            .parse::<u16>()
            .map(Self)
            .map_err(|err| ConfigError::PortParsingFailed(err).into())
    }
}

impl AsRef<u16> for HttpPort {
    fn as_ref(&self) -> &u16 {
        &self.0
    }
}

impl TryFrom<String> for HttpClientTimeout {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let duration = parse_duration(value)?;
        if duration.is_zero() {
            return Err(ConfigError::MustBePositive("HTTP_CLIENT_TIMEOUT".to_string()));
        }
        Ok(Self(duration))
    }
}

impl AsRef<Duration> for HttpClientTimeout {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}

impl Issuer {
    /// Default key set location published by an authorization server at this issuer.
    pub fn jwks_uri(&self) -> String {
        format!("{}/.well-known/jwks.json", self.0)
    }
}

impl TryFrom<String> for Issuer {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim().trim_end_matches('/').to_string();
        let parsed = url::Url::parse(&trimmed)
            .map_err(|e| ConfigError::InvalidIssuer(value.clone(), e.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ConfigError::InvalidIssuer(
                    value,
                    format!("unsupported scheme {}", other),
                ));
            }
        }
        if parsed.query().is_some() || parsed.fragment().is_some() {
            return Err(ConfigError::InvalidIssuer(
                value,
                "query and fragment components are not allowed".to_string(),
            ));
        }
        Ok(Self(trimmed))
    }
}

impl AsRef<str> for Issuer {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RsaKeySize {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let bits = value.parse::<usize>().map_err(|e| {
            ConfigError::NumberParsingFailed("OAUTH_RSA_KEY_SIZE".to_string(), value.clone(), e)
        })?;
        if bits < MIN_RSA_KEY_SIZE {
            return Err(ConfigError::KeySizeTooSmall(bits));
        }
        Ok(Self(bits))
    }
}

impl AsRef<usize> for RsaKeySize {
    fn as_ref(&self) -> &usize {
        &self.0
    }
}

impl TryFrom<String> for AuthorizationCodeLifetime {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let duration = parse_duration(value)?;
        if duration.is_zero() {
            return Err(ConfigError::MustBePositive("AUTHORIZATION_CODE_LIFETIME".to_string()).into());
        }
        Ok(Self(chrono::Duration::from_std(duration)?))
    }
}

impl AsRef<chrono::Duration> for AuthorizationCodeLifetime {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

impl TryFrom<String> for RefreshInterval {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_duration(value).map(Self)
    }
}

impl AsRef<Duration> for RefreshInterval {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}

impl TryFrom<String> for FetchAttempts {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let attempts = value.parse::<u32>().map_err(|e| {
            ConfigError::NumberParsingFailed("JWKS_FETCH_ATTEMPTS".to_string(), value.clone(), e)
        })?;
        if attempts == 0 {
            return Err(ConfigError::MustBePositive("JWKS_FETCH_ATTEMPTS".to_string()));
        }
        Ok(Self(attempts))
    }
}

impl AsRef<u32> for FetchAttempts {
    fn as_ref(&self) -> &u32 {
        &self.0
    }
}

impl TryFrom<String> for FetchBackoff {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_duration(value).map(Self)
    }
}

impl AsRef<Duration> for FetchBackoff {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}

impl TryFrom<String> for ClockSkew {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let duration = parse_duration(value)?;
        Ok(Self(chrono::Duration::from_std(duration)?))
    }
}

impl AsRef<chrono::Duration> for ClockSkew {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}
