//! # Authkestra Core
//!
//! `authkestra-core` provides the foundational traits and types for the Authkestra authentication framework.
//! It defines the core abstractions for identities, authentication flows and providers that are used across the entire ecosystem.

#![warn(missing_docs)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// PKCE (Proof Key for Code Exchange) utilities.
pub mod pkce;

/// Errors that can occur during the authentication process.
pub mod error;
pub use crate::error::AuthError;

/// A unified identity structure returned by all providers.
pub mod state;
pub use crate::state::{Identity, OAuthToken};

/// Discovery utilities for OAuth2 providers.
pub mod discovery;
pub use discovery::ProviderMetadata;

/// Request-authentication strategies (Basic, Bearer, session, custom
/// header) for resource-server middleware such as `authkestra-guard`.
pub mod strategy;

/// Controls whether a cookie is sent with cross-site requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    /// The cookie is sent with "safe" cross-site requests (e.g., following a link).
    Lax,
    /// The cookie is only sent for same-site requests.
    Strict,
    /// The cookie is sent with all requests, including cross-site. Requires `Secure`.
    None,
}

/// Trait for an OAuth2-compatible provider.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Get the provider identifier.
    fn provider_id(&self) -> &str;

    /// The CSRF/PKCE checks this provider's flow is configured with (§6).
    fn checks(&self) -> &[ProviderCheck] {
        &[ProviderCheck::State]
    }

    /// Whether an OAuth identity may be linked onto an existing user found
    /// by matching, unverified email — opt-in because it allows account
    /// takeover if the provider doesn't itself verify email ownership.
    fn allow_dangerous_email_account_linking(&self) -> bool {
        false
    }

    /// Helper to get the authorization URL.
    fn get_authorization_url(
        &self,
        state: &str,
        scopes: &[&str],
        code_challenge: Option<&str>,
    ) -> String;

    /// Exchange an authorization code for an Identity.
    async fn exchange_code_for_identity(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<(Identity, OAuthToken), AuthError>;

    /// Refresh an access token using a refresh token.
    async fn refresh_token(&self, _refresh_token: &str) -> Result<OAuthToken, AuthError> {
        Err(AuthError::Provider(
            "Token refresh not supported by this provider".into(),
        ))
    }

    /// Revoke an access token.
    async fn revoke_token(&self, _token: &str) -> Result<(), AuthError> {
        Err(AuthError::Provider(
            "Token revocation not supported by this provider".into(),
        ))
    }
}

/// Subset of PKCE/CSRF checks a provider advertises for its flow (§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderCheck {
    /// Authorization code exchange is protected with a PKCE verifier.
    Pkce,
    /// Authorization request carries a CSRF `state` parameter.
    State,
    /// Authorization request carries an OIDC `nonce`.
    Nonce,
}

/// Supertrait over [`OAuthProvider`] adding ID-token validation for
/// providers that are OpenID Connect compliant rather than plain OAuth2.
#[async_trait]
pub trait OidcProvider: OAuthProvider {
    /// The provider's issuer URL, used to locate its discovery document and
    /// JWKS for ID-token signature validation.
    fn issuer(&self) -> &str;

    /// Validate an ID token's signature and standard claims, returning the
    /// asserted subject.
    async fn validate_id_token(&self, id_token: &str, nonce: Option<&str>) -> Result<String, AuthError>;
}

/// The resolved outcome of a successful credentials check (spec §4.1 rule
/// 4, §6): the provider has already decided which user this is without
/// going through the Account & User Linker.
#[derive(Clone, Debug)]
pub struct CredentialsOutcome {
    /// Opaque `UserId` as a string; the caller parses it into its own id
    /// newtype (this crate does not depend on the store).
    pub user_id: String,
    /// An existing session to mint a fresh access token for, if the
    /// provider wants to resume one rather than start a new one.
    pub session_id: Option<String>,
}

/// Object-safe credentials contract (spec §6): `authorize(params, ctx) ->
/// {userId, sessionId?} | null`. This trait is for providers that resolve
/// the user themselves (e.g. password-against-stored-hash) and skip the
/// Account & User Linker entirely.
#[async_trait]
pub trait CredentialsAuthorizer: Send + Sync {
    /// The provider identifier, e.g. `"password"`.
    fn provider_id(&self) -> &str;

    /// Validate `params` and resolve the signed-in user, or `None` to
    /// signal `{tokens: null}` (spec §7's silent-failure policy).
    async fn authorize(
        &self,
        params: &std::collections::HashMap<String, String>,
    ) -> Result<Option<CredentialsOutcome>, AuthError>;
}

/// Trait for an email-based (magic-link/OTP) provider.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// The provider identifier, e.g. `"email"`.
    fn provider_id(&self) -> &str;

    /// Maximum age, in seconds, of a code issued by this provider.
    fn max_age(&self) -> i64;

    /// Deliver the verification code/link to the user out of band.
    async fn send_verification_request(
        &self,
        identifier: &str,
        url: &str,
        token: &str,
        expires: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), AuthError>;

    /// Canonicalize a raw identifier before storage/lookup, e.g.
    /// lower-casing an email address. Defaults to a no-op.
    fn normalize_identifier(&self, raw: &str) -> String {
        raw.to_string()
    }
}

/// Trait for a phone-based (SMS OTP) provider. Mirrors [`EmailProvider`]
/// with a phone-shaped identifier instead of an email address.
#[async_trait]
pub trait PhoneProvider: Send + Sync {
    /// The provider identifier, e.g. `"phone"`.
    fn provider_id(&self) -> &str;

    /// Maximum age, in seconds, of a code issued by this provider.
    fn max_age(&self) -> i64;

    /// Deliver the one-time code to the user out of band.
    async fn send_verification_request(
        &self,
        identifier: &str,
        token: &str,
        expires: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), AuthError>;

    /// Canonicalize a raw identifier before storage/lookup, e.g. stripping
    /// formatting from a phone number. Defaults to a no-op.
    fn normalize_identifier(&self, raw: &str) -> String {
        raw.to_string()
    }
}

