//! In-memory client and authorization code storage

use crate::errors::StorageError;
use crate::oauth::client_registry::RegisteredClient;
use crate::oauth::types::AuthorizationCode;
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

/// Read-mostly client table guarded by a single-writer/many-reader lock
#[derive(Default)]
pub struct MemoryClientStore {
    clients: RwLock<HashMap<String, RegisteredClient>>,
}

impl MemoryClientStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientStore for MemoryClientStore {
    async fn insert_client(&self, client: RegisteredClient) -> Result<()> {
        let mut clients = self
            .clients
            .write()
            .map_err(|e| StorageError::LockPoisoned(format!("Lock error: {}", e)))?;
        if clients.contains_key(&client.client_id) {
            return Err(StorageError::Duplicate(client.client_id));
        }
        clients.insert(client.client_id.clone(), client);
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<RegisteredClient>> {
        let clients = self
            .clients
            .read()
            .map_err(|e| StorageError::LockPoisoned(format!("Lock error: {}", e)))?;
        Ok(clients.get(client_id).cloned())
    }

    async fn list_clients(&self) -> Result<Vec<RegisteredClient>> {
        let clients = self
            .clients
            .read()
            .map_err(|e| StorageError::LockPoisoned(format!("Lock error: {}", e)))?;
        let mut listed: Vec<RegisteredClient> = clients.values().cloned().collect();
        listed.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        Ok(listed)
    }
}

/// Pending authorization codes keyed by code value
#[derive(Default)]
pub struct MemoryAuthorizationCodeStore {
    codes: Mutex<HashMap<String, AuthorizationCode>>,
}

impl MemoryAuthorizationCodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthorizationCodeStore for MemoryAuthorizationCodeStore {
    async fn store_code(&self, code: &AuthorizationCode) -> Result<()> {
        let mut codes = self
            .codes
            .lock()
            .map_err(|e| StorageError::LockPoisoned(format!("Lock error: {}", e)))?;
        if codes.contains_key(&code.code) {
            return Err(StorageError::Duplicate("authorization code".to_string()));
        }
        codes.insert(code.code.clone(), code.clone());
        Ok(())
    }

    async fn consume_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        let mut codes = self
            .codes
            .lock()
            .map_err(|e| StorageError::LockPoisoned(format!("Lock error: {}", e)))?;
        Ok(codes.remove(code))
    }

    async fn cleanup_expired_codes(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut codes = self
            .codes
            .lock()
            .map_err(|e| StorageError::LockPoisoned(format!("Lock error: {}", e)))?;

        let initial_count = codes.len();
        codes.retain(|_, code| !code.is_expired_at(now));

        Ok(initial_count - codes.len())
    }
}
