//! Router configuration for the authorization server and the resource server.

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use super::{
    context::{AppState, ResourceState},
    handler_oauth::handle_oauth_token,
    handler_resource::{handle_stock, handle_whoami},
    handler_well_known::{
        jwks_handler, oauth_authorization_server_handler, openid_configuration_handler,
    },
    middleware_auth::require_bearer,
};

/// Build the authorization server router
pub fn build_router(ctx: AppState) -> Router {
    let well_known_routes = Router::new()
        .route(
            "/oauth-authorization-server",
            get(oauth_authorization_server_handler),
        )
        .route("/openid-configuration", get(openid_configuration_handler))
        .route("/jwks.json", get(jwks_handler));

    Router::new()
        .route("/oauth/token", post(handle_oauth_token))
        .nest("/.well-known", well_known_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Route template of the stock endpoint, also used as its scope requirement key.
pub const STOCK_ROUTE: &str = "/api/stock/{product_id}";

/// Build the resource server router. Every route requires a bearer token.
pub fn build_resource_router(ctx: ResourceState) -> Router {
    Router::new()
        .route("/api/whoami", get(handle_whoami))
        .route(STOCK_ROUTE, get(handle_stock))
        .route_layer(middleware::from_fn_with_state(
            ctx.resource_server.clone(),
            require_bearer,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
