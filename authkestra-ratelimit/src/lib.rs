//! Per-identifier sliding-window rate limiter with continuous refill.
//!
//! Guards wrong-password and wrong-OTP attempts (spec §4.7). Failures drain
//! the bucket; a successful verification resets it. The bucket refills
//! continuously rather than on a fixed tick, so `attempts_remaining` is a
//! real number recomputed from elapsed wall-clock time on every check.

use authkestra_core::error::AuthError;
use authkestra_store::{AuthTransaction, RateLimit};
use chrono::{DateTime, Utc};

/// Default bucket capacity (spec §4.7's `MAX`).
pub const DEFAULT_MAX: f64 = 10.0;
/// Refill window the bucket fully replenishes over.
pub const REFILL_WINDOW_MS: f64 = 60.0 * 60.0 * 1000.0;

/// A rate limiter backed by an open [`AuthTransaction`].
///
/// Construct one per request with the transaction it should read/write
/// through; it never owns a connection itself.
pub struct RateLimiter {
    max: f64,
    refill_window_ms: f64,
}

impl RateLimiter {
    pub fn new(max: f64) -> Self {
        Self {
            max,
            refill_window_ms: REFILL_WINDOW_MS,
        }
    }

    /// Recompute the refilled bucket state for `identifier` as of `now`,
    /// without consuming an attempt. A never-seen identifier starts full.
    fn load(&self, stored: Option<RateLimit>, now: DateTime<Utc>) -> RateLimit {
        match stored {
            Some(rl) => {
                let elapsed_ms = (now - rl.last_attempt_time).num_milliseconds().max(0) as f64;
                let refilled = rl.attempts_remaining + elapsed_ms * self.max / self.refill_window_ms;
                RateLimit {
                    identifier: rl.identifier,
                    attempts_remaining: refilled.min(self.max),
                    last_attempt_time: now,
                }
            }
            None => RateLimit {
                identifier: String::new(),
                attempts_remaining: self.max,
                last_attempt_time: now,
            },
        }
    }

    /// Record a failure for `identifier`. Returns [`AuthError::RateLimited`]
    /// if the bucket was already empty; otherwise decrements it by one and
    /// persists the new state.
    pub async fn record_failure(
        &self,
        tx: &mut dyn AuthTransaction,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let stored = tx
            .get_rate_limit(identifier)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        let mut refilled = self.load(stored, now);
        refilled.identifier = identifier.to_string();
        if refilled.attempts_remaining < 1.0 {
            tx.put_rate_limit(refilled)
                .await
                .map_err(|e| AuthError::Internal(e.to_string()))?;
            return Err(AuthError::RateLimited);
        }
        refilled.attempts_remaining -= 1.0;
        tx.put_rate_limit(refilled)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        Ok(())
    }

    /// Reset `identifier`'s bucket to full, e.g. after a successful
    /// verification.
    pub async fn reset(
        &self,
        tx: &mut dyn AuthTransaction,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        tx.put_rate_limit(RateLimit {
            identifier: identifier.to_string(),
            attempts_remaining: self.max,
            last_attempt_time: now,
        })
        .await
        .map_err(|e| AuthError::Internal(e.to_string()))
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authkestra_store::MemoryStore;
    use authkestra_store::AuthStore;

    #[tokio::test]
    async fn drains_and_rejects_once_empty() {
        let store = MemoryStore::new();
        let limiter = RateLimiter::new(2.0);
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        limiter.record_failure(&mut *tx, "user@example.com", now).await.unwrap();
        limiter.record_failure(&mut *tx, "user@example.com", now).await.unwrap();
        let err = limiter
            .record_failure(&mut *tx, "user@example.com", now)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RateLimited));
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn refills_continuously_over_time() {
        let store = MemoryStore::new();
        let limiter = RateLimiter::new(2.0);
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        limiter.record_failure(&mut *tx, "id", now).await.unwrap();
        limiter.record_failure(&mut *tx, "id", now).await.unwrap();

        let later = now + chrono::Duration::milliseconds((REFILL_WINDOW_MS / 2.0) as i64);
        limiter.record_failure(&mut *tx, "id", later).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn reset_restores_full_bucket() {
        let store = MemoryStore::new();
        let limiter = RateLimiter::new(1.0);
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        limiter.record_failure(&mut *tx, "id", now).await.unwrap();
        limiter.reset(&mut *tx, "id", now).await.unwrap();
        limiter.record_failure(&mut *tx, "id", now).await.unwrap();
        tx.commit().await.unwrap();
    }
}
