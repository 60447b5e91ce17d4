//! In-memory storage implementations
//!
//! This module provides in-memory implementations of the storage traits.
//! Nothing survives a restart; clients are reloaded from their definitions.

mod oauth;

pub use oauth::{MemoryAuthorizationCodeStore, MemoryClientStore};
