//! Refresh-token tree exchange (spec §4.3 — "the hard part").
//!
//! Each session owns a forest of refresh tokens rooted at session
//! creation. `exchange` is the single operation on that tree: it advances
//! the active branch on first use, replays idempotently inside a short
//! reuse window, and nukes an entire subtree the moment reuse outside
//! that window signals token theft.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use authkestra_core::AuthError;
use authkestra_store::{AuthTransaction, NewRefreshToken, RefreshToken, RefreshTokenId, SessionId};
use authkestra_token::TokenManager;

use crate::envelope::{EnvelopeCodec, RefreshTokenEnvelope};

/// Window during which a replayed (already-used) refresh token is treated
/// as a racing duplicate rather than theft.
pub const REUSE_WINDOW: ChronoDuration = ChronoDuration::seconds(10);

/// The outcome of one `exchange` call.
pub struct ExchangeResult {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct RefreshTokenTree<'a> {
    codec: &'a EnvelopeCodec,
    token_manager: &'a TokenManager,
    jwt_ttl: ChronoDuration,
}

impl<'a> RefreshTokenTree<'a> {
    pub fn new(codec: &'a EnvelopeCodec, token_manager: &'a TokenManager, jwt_ttl: ChronoDuration) -> Self {
        Self {
            codec,
            token_manager,
            jwt_ttl,
        }
    }

    /// Exchange a presented refresh-token string for a fresh access token
    /// and successor refresh token. Returns `Ok(None)` for every silent
    /// failure mode (tampering, missing session, expired session, expired
    /// token — e.g. an invalidated-but-unused descendant of a dead subtree,
    /// theft detected) per spec §4.1's "silent failure" policy.
    pub async fn exchange(
        &self,
        tx: &mut dyn AuthTransaction,
        presented: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ExchangeResult>, AuthError> {
        let Some(envelope) = self.codec.decode(presented) else {
            return Ok(None);
        };

        let token = tx
            .get_refresh_token(&envelope.token_id)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        let session = tx
            .get_session(&envelope.session_id)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;

        let (token, session) = match (token, session) {
            (Some(t), Some(s)) => (t, s),
            _ => {
                self.destroy_hostile_remnants(tx, &envelope).await?;
                return Ok(None);
            }
        };

        if session.expiration_time <= now {
            return Ok(None);
        }

        if token.expiration_time <= now {
            return Ok(None);
        }

        let sub = format!("{}|{}", session.user_id, session.id);

        match token.first_used_time {
            None => {
                tx.mark_refresh_token_used(&token.id, now)
                    .await
                    .map_err(|e| AuthError::Internal(e.to_string()))?;
                let child = self.mint_child(tx, &session.id, now, Some(token.id.clone())).await?;
                let access_token = self.token_manager.mint(&sub, now, self.jwt_ttl)?;
                Ok(Some(ExchangeResult {
                    access_token,
                    refresh_token: self.codec.encode(&RefreshTokenEnvelope {
                        session_id: session.id,
                        token_id: child.id,
                    }),
                }))
            }
            Some(first_used_time) => {
                let siblings = tx
                    .refresh_tokens_by_session(&session.id)
                    .await
                    .map_err(|e| AuthError::Internal(e.to_string()))?;
                let active = siblings
                    .iter()
                    .filter(|t| t.first_used_time.is_none() && t.expiration_time > now)
                    .max_by_key(|t| t.created_at);

                if let Some(active) = active {
                    if active.parent_refresh_token_id.as_ref() == Some(&token.id) {
                        let access_token = self.token_manager.mint(&sub, now, self.jwt_ttl)?;
                        return Ok(Some(ExchangeResult {
                            access_token,
                            refresh_token: self.codec.encode(&RefreshTokenEnvelope {
                                session_id: session.id,
                                token_id: active.id.clone(),
                            }),
                        }));
                    }
                }

                if now - first_used_time < REUSE_WINDOW {
                    let child = self.mint_child(tx, &session.id, now, Some(token.id.clone())).await?;
                    let access_token = self.token_manager.mint(&sub, now, self.jwt_ttl)?;
                    return Ok(Some(ExchangeResult {
                        access_token,
                        refresh_token: self.codec.encode(&RefreshTokenEnvelope {
                            session_id: session.id,
                            token_id: child.id,
                        }),
                    }));
                }

                self.invalidate_subtree(tx, &siblings, &token.id, now).await?;
                Ok(None)
            }
        }
    }

    async fn mint_child(
        &self,
        tx: &mut dyn AuthTransaction,
        session_id: &SessionId,
        now: DateTime<Utc>,
        parent: Option<RefreshTokenId>,
    ) -> Result<RefreshToken, AuthError> {
        let session = tx
            .get_session(session_id)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?
            .ok_or_else(|| AuthError::Internal("session vanished mid-exchange".into()))?;
        tx.insert_refresh_token(NewRefreshToken {
            session_id: session_id.clone(),
            expiration_time: session.expiration_time,
            parent_refresh_token_id: parent,
        })
        .await
        .map_err(|e| AuthError::Internal(e.to_string()))
    }

    async fn destroy_hostile_remnants(
        &self,
        tx: &mut dyn AuthTransaction,
        envelope: &RefreshTokenEnvelope,
    ) -> Result<(), AuthError> {
        tx.delete_refresh_tokens_for_session(&envelope.session_id)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        tx.delete_session(&envelope.session_id)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        Ok(())
    }

    /// Set an expiration in the past on `root` and every descendant
    /// reachable through `parent_refresh_token_id` edges, confined to the
    /// set already loaded for this session. Ancestors and sibling
    /// branches are left untouched.
    async fn invalidate_subtree(
        &self,
        tx: &mut dyn AuthTransaction,
        all_tokens: &[RefreshToken],
        root: &RefreshTokenId,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let mut subtree = vec![root.clone()];
        let mut frontier = vec![root.clone()];
        while !frontier.is_empty() {
            let mut next_frontier = Vec::new();
            for parent in &frontier {
                for child in all_tokens
                    .iter()
                    .filter(|t| t.parent_refresh_token_id.as_ref() == Some(parent))
                {
                    subtree.push(child.id.clone());
                    next_frontier.push(child.id.clone());
                }
            }
            frontier = next_frontier;
        }

        tx.expire_refresh_tokens(&subtree, now - ChronoDuration::seconds(1))
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))
    }
}
