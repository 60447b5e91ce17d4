//! Tollgate library crate.
//!
//! OAuth2 client credentials and authorization code grants with RS256 access
//! tokens, OpenID Connect ID tokens, and a resource-server validation pipeline
//! backed by a cached remote JWKS.

pub mod client;
pub mod config;
pub mod errors;
pub mod http;
pub mod oauth;
pub mod storage;
