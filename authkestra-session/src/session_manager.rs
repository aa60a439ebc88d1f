//! Session lifecycle (spec §4.4).

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use authkestra_core::AuthError;
use authkestra_store::{AuthTransaction, NewSession, Session, SessionId, UserId};
use authkestra_token::TokenManager;

/// Default total session lifetime: 30 days.
pub const DEFAULT_SESSION_TTL_MS: i64 = 30 * 24 * 60 * 60 * 1000;
/// Default access-token lifetime: 1 hour.
pub const DEFAULT_JWT_TTL_MS: i64 = 60 * 60 * 1000;

pub struct SessionManager<'a> {
    token_manager: &'a TokenManager,
    session_ttl: ChronoDuration,
    jwt_ttl: ChronoDuration,
}

impl<'a> SessionManager<'a> {
    pub fn new(token_manager: &'a TokenManager) -> Self {
        Self {
            token_manager,
            session_ttl: ChronoDuration::milliseconds(
                std::env::var("SESSION_TOTAL_DURATION_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_SESSION_TTL_MS),
            ),
            jwt_ttl: ChronoDuration::milliseconds(
                std::env::var("JWT_DURATION_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_JWT_TTL_MS),
            ),
        }
    }

    pub fn jwt_ttl(&self) -> ChronoDuration {
        self.jwt_ttl
    }

    /// Create a new session for `user_id`, expiring `session_ttl` from now.
    pub async fn create(
        &self,
        tx: &mut dyn AuthTransaction,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Session, AuthError> {
        tx.insert_session(NewSession {
            user_id,
            expiration_time: now + self.session_ttl,
        })
        .await
        .map_err(|e| AuthError::Internal(e.to_string()))
    }

    /// Mint an access token for an existing session.
    pub fn mint_access_token(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let sub = format!("{user_id}|{session_id}");
        self.token_manager.mint(&sub, now, self.jwt_ttl)
    }

    /// Recover the session id from the `sub` claim of a validated access
    /// token (`"{userId}|{sessionId}"`).
    pub fn current(sub: &str) -> Option<SessionId> {
        sub.split_once('|').map(|(_, session)| SessionId::new(session))
    }

    /// Delete a session and its entire refresh-token tree (sign-out).
    pub async fn delete(&self, tx: &mut dyn AuthTransaction, session_id: &SessionId) -> Result<(), AuthError> {
        tx.delete_refresh_tokens_for_session(session_id)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        tx.delete_session(session_id)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))
    }
}
