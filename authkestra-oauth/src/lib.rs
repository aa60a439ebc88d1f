//! OAuth2 / OIDC authorization-code state machine (spec §4.6).

pub mod discovery;
pub mod flow;

pub use authkestra_core::ProviderMetadata;
pub use flow::{AuthorizationRequest, CallbackOutcome, OAuthFlow};
