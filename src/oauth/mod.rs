//! OAuth2 token lifecycle: client registry, RS256 key material, issuance,
//! validation, grant flows and OpenID Connect ID tokens.

pub mod client_registry;
pub mod grants;
pub mod issuer;
pub mod jwt;
pub mod keys;
pub mod openid;
pub mod remote_keys;
pub mod resource_server;
pub mod types;
pub mod validator;

// Re-export frequently used items from each module
pub use client_registry::{ClientDefinition, ClientRegistry, ClientSecretHash, RegisteredClient};
pub use grants::{AuthorizationGrant, GrantHandler, GrantState, TokenGrant};
pub use issuer::{AccessTokenClaims, IssuedToken, TokenIssuer};
pub use keys::{
    JsonWebKey, JsonWebKeySet, KeyManager, KeyResolution, SigningKeyPair, VerificationKey,
    VerificationKeySet, VerificationKeys,
};
pub use openid::{IdTokenClaims, calculate_at_hash, generate_id_token};
pub use remote_keys::{RemoteKeySet, RetryPolicy};
pub use resource_server::{AuthenticatedPrincipal, AuthorizationFailure, ResourceServer};
pub use types::{
    AuthorizationCode, ClientCredentials, GrantType, OAuthErrorResponse, TokenRequest,
    TokenResponse, TokenType, parse_scope,
};
pub use validator::{TokenValidator, ValidationResult};
