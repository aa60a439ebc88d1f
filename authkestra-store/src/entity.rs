use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(UserId);
opaque_id!(AccountId);
opaque_id!(SessionId);
opaque_id!(RefreshTokenId);
opaque_id!(VerificationCodeId);
opaque_id!(VerifierId);

/// Application identity. The core never deletes users.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: Option<String>,
    pub email_verification_time: Option<DateTime<Utc>>,
    pub phone: Option<String>,
    pub phone_verification_time: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub is_anonymous: bool,
    pub created_at: DateTime<Utc>,
}

/// Binds an external identity (provider + provider account id) to a `User`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub user_id: UserId,
    pub provider: String,
    pub provider_account_id: String,
    pub secret: Option<String>,
    pub email_verified: Option<DateTime<Utc>>,
    pub phone_verified: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A long-lived authentication grant; parent of a refresh-token tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub expiration_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A node in a per-session refresh-token tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshToken {
    pub id: RefreshTokenId,
    pub session_id: SessionId,
    pub expiration_time: DateTime<Utc>,
    pub first_used_time: Option<DateTime<Utc>>,
    pub parent_refresh_token_id: Option<RefreshTokenId>,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    /// Active iff unused and unexpired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.first_used_time.is_none() && self.expiration_time > now
    }
}

/// A single-use challenge: OTP, magic-link token, or OAuth handoff code.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerificationCode {
    pub id: VerificationCodeId,
    pub account_id: AccountId,
    pub provider: String,
    /// HMAC digest for short human-readable codes, raw material for long PKCE-style verifiers.
    pub code_hash: String,
    pub expiration_time: DateTime<Utc>,
    pub pkce_verifier: Option<String>,
    pub email_to_verify: Option<String>,
    pub phone_to_verify: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Transient PKCE + state + nonce holder for an in-flight OAuth redirect.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Verifier {
    pub id: VerifierId,
    pub signature: String,
    pub session_id: Option<SessionId>,
    pub code_verifier: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub provider: String,
    pub created_at: DateTime<Utc>,
}

/// Sliding-window counter for failed verification / password attempts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimit {
    pub identifier: String,
    pub attempts_remaining: f64,
    pub last_attempt_time: DateTime<Utc>,
}
