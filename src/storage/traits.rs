//! Storage trait definitions for registered clients and authorization codes.
//!
//! Defines async storage interfaces that can be implemented by various
//! backend providers. Only the in-memory backend ships with the crate.

use crate::errors::StorageError;
use crate::oauth::client_registry::RegisteredClient;
use crate::oauth::types::AuthorizationCode;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub type Result<T> = std::result::Result<T, StorageError>;

/// Trait for storing and retrieving registered clients
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Store a new client, failing with [`StorageError::Duplicate`] if the id exists
    async fn insert_client(&self, client: RegisteredClient) -> Result<()>;

    /// Retrieve a client by ID
    async fn get_client(&self, client_id: &str) -> Result<Option<RegisteredClient>>;

    /// List all clients ordered by client id
    async fn list_clients(&self) -> Result<Vec<RegisteredClient>>;
}

/// Trait for storing and retrieving authorization codes
#[async_trait]
pub trait AuthorizationCodeStore: Send + Sync {
    /// Store a new authorization code
    async fn store_code(&self, code: &AuthorizationCode) -> Result<()>;

    /// Remove and return an authorization code.
    ///
    /// A code is returned at most once, whether or not it has expired.
    async fn consume_code(&self, code: &str) -> Result<Option<AuthorizationCode>>;

    /// Remove codes that expired at or before `now`
    async fn cleanup_expired_codes(&self, now: DateTime<Utc>) -> Result<usize>;
}
