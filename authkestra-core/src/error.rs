use thiserror::Error;

/// The error taxonomy thrown by the authentication core.
///
/// Silent failure modes (expired sessions, expired refresh tokens under
/// normal use, failing OAuth callback exchanges, `credentials.authorize`
/// returning `None`) are *not* represented here — they surface as `Option`/
/// result-enum variants further up the call chain so that a client cannot
/// distinguish them from an ordinary "please sign in again" state.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A password or other shared secret did not match.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// No account exists for the identifier supplied.
    #[error("account not found")]
    AccountNotFound,
    /// The verification code presented does not match any issued code.
    #[error("invalid code")]
    InvalidCode,
    /// The verification code matched but has expired.
    #[error("expired code")]
    ExpiredCode,
    /// A PKCE verifier, state, or nonce did not match what was issued.
    #[error("invalid verifier")]
    InvalidVerifier,
    /// The verification code was issued for a different provider.
    #[error("provider mismatch")]
    ProviderMismatch,
    /// The account the code was issued for no longer exists.
    #[error("account deleted")]
    AccountDeleted,
    /// The identifier's rate-limit bucket is empty.
    #[error("rate limited")]
    RateLimited,
    /// A refresh-token envelope failed tamper detection.
    #[error("invalid refresh token")]
    InvalidRefreshToken,
    /// The session backing a refresh token has expired.
    #[error("expired session")]
    ExpiredSession,
    /// The OAuth authorization-code exchange or callback failed.
    #[error("oauth failed: {0}")]
    OauthFailed(String),
    /// CSRF `state` returned by the provider did not match the one issued.
    #[error("csrf state mismatch")]
    CsrfMismatch,
    /// A provider-plugin call failed for a reason not covered above.
    #[error("provider error: {0}")]
    Provider(String),
    /// A session-layer failure not covered by a more specific variant.
    #[error("session error: {0}")]
    Session(String),
    /// A token-layer failure not covered by a more specific variant.
    #[error("token error: {0}")]
    Token(String),
    /// An unexpected internal failure (datastore, serialization, etc).
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// The stable error code carried alongside the message (spec §7).
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::AccountNotFound => "ACCOUNT_NOT_FOUND",
            AuthError::InvalidCode => "INVALID_CODE",
            AuthError::ExpiredCode => "EXPIRED_CODE",
            AuthError::InvalidVerifier => "INVALID_VERIFIER",
            AuthError::ProviderMismatch => "PROVIDER_MISMATCH",
            AuthError::AccountDeleted => "ACCOUNT_DELETED",
            AuthError::RateLimited => "RATE_LIMITED",
            AuthError::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            AuthError::ExpiredSession => "EXPIRED_SESSION",
            AuthError::OauthFailed(_) => "OAUTH_FAILED",
            AuthError::CsrfMismatch => "OAUTH_FAILED",
            AuthError::Provider(_) => "INTERNAL_ERROR",
            AuthError::Session(_) => "INTERNAL_ERROR",
            AuthError::Token(_) => "INTERNAL_ERROR",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
