//! Axum HTTP handlers and middleware for the token, discovery and protected API endpoints.

pub mod context;
pub mod handler_oauth;
pub mod handler_resource;
mod handler_well_known;
pub mod middleware_auth;
pub mod server;

pub use context::{AppState, ResourceState};
pub use server::{build_resource_router, build_router};
