use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A unified identity structure returned by all providers.
///
/// Produced by a provider plugin's `profile()`/`authorize()` callback and
/// consumed by the Account & User Linker, which decides whether it merges
/// into an existing user or creates a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Provider identifier, e.g. `"github"`, `"password"`, `"resend-otp"`.
    pub provider_id: String,
    /// The provider's external unique id for this identity (OAuth subject,
    /// email address, phone number).
    pub external_id: String,
    /// Email address, if the provider asserts one.
    pub email: Option<String>,
    /// Whether the provider asserts the email above as already verified.
    pub email_verified: bool,
    /// Phone number, if the provider asserts one.
    pub phone: Option<String>,
    /// Whether the provider asserts the phone above as already verified.
    pub phone_verified: bool,
    /// Display name, if any.
    pub name: Option<String>,
    /// Avatar/profile image URL, if any.
    pub image: Option<String>,
    /// Extra provider-specific claims not promoted to a named field.
    pub attributes: HashMap<String, String>,
}

impl Identity {
    /// A minimal identity carrying only a provider and external id.
    pub fn new(provider_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            external_id: external_id.into(),
            email: None,
            email_verified: false,
            phone: None,
            phone_verified: false,
            name: None,
            image: None,
            attributes: HashMap::new(),
        }
    }
}

/// The token set returned by an OAuth2/OIDC token-endpoint exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    /// Bearer access token usable against the provider's APIs.
    pub access_token: String,
    /// Refresh token, if the provider issued one.
    pub refresh_token: Option<String>,
    /// OIDC ID token (JWT), if the provider issued one.
    pub id_token: Option<String>,
    /// Lifetime of `access_token` in seconds, if advertised.
    pub expires_in: Option<i64>,
    /// Token type, normally `"Bearer"`.
    pub token_type: Option<String>,
    /// Space-delimited scopes actually granted.
    pub scope: Option<String>,
}
