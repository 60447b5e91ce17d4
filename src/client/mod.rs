//! Client-side helpers for obtaining tokens and calling protected APIs.

pub mod token_client;

pub use token_client::ClientCredentialsClient;
