//! Application state shared by the authorization and resource server routers.

use axum::extract::FromRef;
use std::sync::Arc;

use crate::http::handler_resource::Inventory;
use crate::oauth::{GrantHandler, KeyManager, ResourceServer, TokenIssuer};

/// State of the authorization server router.
#[derive(Clone)]
pub struct AppState {
    /// Issuer identifier advertised in discovery documents and token claims
    pub external_base: String,
    /// Login and consent front end that calls
    /// [`GrantHandler::create_authorization_code`]
    pub authorization_endpoint: String,
    pub grant_handler: Arc<GrantHandler>,
}

impl AppState {
    pub fn new(grant_handler: Arc<GrantHandler>) -> Self {
        let external_base = grant_handler.issuer().issuer().to_string();
        Self {
            authorization_endpoint: format!("{}/oauth/authorize", external_base),
            external_base,
            grant_handler,
        }
    }

    /// Advertise a front end hosted elsewhere instead of `{issuer}/oauth/authorize`.
    pub fn with_authorization_endpoint(mut self, authorization_endpoint: Option<String>) -> Self {
        if let Some(authorization_endpoint) = authorization_endpoint {
            self.authorization_endpoint = authorization_endpoint;
        }
        self
    }

    pub fn token_issuer(&self) -> &Arc<TokenIssuer> {
        self.grant_handler.issuer()
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        self.token_issuer().keys()
    }
}

impl FromRef<AppState> for Arc<GrantHandler> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.grant_handler.clone()
    }
}

/// State of the resource server router.
#[derive(Clone)]
pub struct ResourceState {
    pub resource_server: Arc<ResourceServer>,
    pub inventory: Arc<Inventory>,
}

impl FromRef<ResourceState> for Arc<ResourceServer> {
    fn from_ref(state: &ResourceState) -> Self {
        state.resource_server.clone()
    }
}

impl FromRef<ResourceState> for Arc<Inventory> {
    fn from_ref(state: &ResourceState) -> Self {
        state.inventory.clone()
    }
}
