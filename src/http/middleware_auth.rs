//! Bearer token authentication middleware.
//!
//! Validates `Authorization: Bearer` tokens for protected routes and makes the
//! authenticated principal available to handlers as a request extension.

use axum::{
    extract::{MatchedPath, Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::oauth::ResourceServer;

/// Reject requests without a valid token for the matched route.
///
/// Register with `route_layer` so the matched route template, rather than the
/// concrete request path, selects the required scope.
pub async fn require_bearer(
    State(resource_server): State<Arc<ResourceServer>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match resource_server.authorize(authorization, &path).await {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(failure) => failure.into_response(),
    }
}
