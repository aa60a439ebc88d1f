//! JWT issuance and offline JWKS validation for the authkestra
//! authentication core.

pub mod manager;
pub mod offline_validation;

pub use manager::{AccessTokenClaims, TokenManager};
pub use offline_validation::{Claims, Jwk, Jwks, JwksCache, OidcValidator, ValidationError};
