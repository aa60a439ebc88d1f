//! Verification-code issuance and consumption (spec §4.2).
//!
//! Backs OTP, magic-link, and OAuth-handoff codes with one table. Short
//! codes (`<= 24` chars — human-typed OTPs) are stored as a keyed HMAC
//! digest; long ones (PKCE-style verifiers, 32+ chars of entropy) are
//! stored raw, since they are already unguessable and a digest buys
//! nothing but an extra round trip.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::distr::Alphanumeric;
use rand::Rng;
use sha2::Sha256;

use authkestra_core::error::AuthError;
use authkestra_ratelimit::RateLimiter;
use authkestra_store::{Account, AccountId, AuthTransaction, NewVerificationCode};

type HmacSha256 = Hmac<Sha256>;

const SHORT_CODE_MAX_LEN: usize = 24;

/// Generate a 6-digit numeric OTP.
pub fn generate_otp() -> String {
    let n: u32 = rand::rng().random_range(0..1_000_000);
    format!("{n:06}")
}

/// Generate a long, high-entropy magic-link token.
pub fn generate_link_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Issues and consumes verification codes, keyed-HMAC'd with a process-wide
/// server secret.
pub struct VerificationCodeStore {
    hmac_secret: Vec<u8>,
}

impl VerificationCodeStore {
    pub fn new(hmac_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            hmac_secret: hmac_secret.into(),
        }
    }

    fn digest(&self, material: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.hmac_secret).expect("HMAC accepts a key of any length");
        mac.update(material.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// The stable lookup key for `code_hash`: a keyed digest for short,
    /// human-typed material, or the material itself for long verifiers.
    fn lookup_key(&self, material: &str) -> String {
        if material.len() <= SHORT_CODE_MAX_LEN {
            self.digest(material)
        } else {
            material.to_string()
        }
    }

    /// Issue a new code for `account_id`, deleting any prior unconsumed
    /// code for that account first. Returns the identifier (email/phone)
    /// the caller should deliver the code to.
    #[allow(clippy::too_many_arguments)]
    pub async fn issue(
        &self,
        tx: &mut dyn AuthTransaction,
        account_id: &AccountId,
        provider: &str,
        code_material: &str,
        expiration_time: DateTime<Utc>,
        pkce_verifier: Option<String>,
        email_to_verify: Option<String>,
        phone_to_verify: Option<String>,
    ) -> Result<String, AuthError> {
        tx.delete_verification_codes_for_account(account_id)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;

        let identifier = email_to_verify
            .clone()
            .or_else(|| phone_to_verify.clone())
            .unwrap_or_else(|| account_id.to_string());

        tx.insert_verification_code(NewVerificationCode {
            account_id: account_id.clone(),
            provider: provider.to_string(),
            code_hash: self.lookup_key(code_material),
            expiration_time,
            pkce_verifier,
            email_to_verify,
            phone_to_verify,
        })
        .await
        .map_err(|e| AuthError::Internal(e.to_string()))?;

        Ok(identifier)
    }

    /// Consume a presented code. Verifies provider, expiry, and any
    /// email/phone confirmation carried by the row; deletes the row on
    /// success. Every rejection path increments the rate-limit bucket for
    /// the owning account before returning its error.
    pub async fn consume(
        &self,
        tx: &mut dyn AuthTransaction,
        rate_limiter: &RateLimiter,
        provider: &str,
        code: &str,
        now: DateTime<Utc>,
        confirm_email: Option<&str>,
        confirm_phone: Option<&str>,
    ) -> Result<Account, AuthError> {
        let lookup_key = self.lookup_key(code);
        let row = tx
            .verification_code_by_hash(&lookup_key)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?
            .ok_or(AuthError::InvalidCode)?;

        let rate_limit_identifier = row.account_id.to_string();

        let verdict: Result<Account, AuthError> = async {
            if row.provider != provider {
                return Err(AuthError::ProviderMismatch);
            }
            if row.expiration_time <= now {
                return Err(AuthError::ExpiredCode);
            }
            if let Some(expected_email) = &row.email_to_verify {
                let matches = confirm_email
                    .map(|given| given.eq_ignore_ascii_case(expected_email))
                    .unwrap_or(false);
                if !matches {
                    return Err(AuthError::InvalidCode);
                }
            }
            if let Some(expected_phone) = &row.phone_to_verify {
                let matches = confirm_phone.map(|given| given == expected_phone).unwrap_or(false);
                if !matches {
                    return Err(AuthError::InvalidCode);
                }
            }
            tx.get_account(&row.account_id)
                .await
                .map_err(|e| AuthError::Internal(e.to_string()))?
                .ok_or(AuthError::AccountDeleted)
        }
        .await;

        match verdict {
            Ok(account) => {
                tx.delete_verification_code(&row.id)
                    .await
                    .map_err(|e| AuthError::Internal(e.to_string()))?;
                rate_limiter.reset(tx, &rate_limit_identifier, now).await?;
                Ok(account)
            }
            Err(err) => {
                rate_limiter.record_failure(tx, &rate_limit_identifier, now).await?;
                Err(err)
            }
        }
    }

    /// Like [`consume`](Self::consume), but for call sites that don't know
    /// in advance which provider issued the code (SignIn Orchestrator
    /// dispatch rule 2, spec §4.1: `provider == nil && params.code != nil`).
    /// The row's own `provider` field is trusted instead of cross-checked.
    pub async fn consume_any_provider(
        &self,
        tx: &mut dyn AuthTransaction,
        rate_limiter: &RateLimiter,
        code: &str,
        now: DateTime<Utc>,
        confirm_email: Option<&str>,
        confirm_phone: Option<&str>,
    ) -> Result<(String, Account), AuthError> {
        let lookup_key = self.lookup_key(code);
        let provider = tx
            .verification_code_by_hash(&lookup_key)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?
            .ok_or(AuthError::InvalidCode)?
            .provider;

        let account = self
            .consume(tx, rate_limiter, &provider, code, now, confirm_email, confirm_phone)
            .await?;
        Ok((provider, account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authkestra_store::{AuthStore, MemoryStore, NewAccount, NewUser};

    async fn seed_account(store: &MemoryStore) -> AccountId {
        let mut tx = store.begin().await.unwrap();
        let user = tx
            .insert_user(NewUser {
                email: Some("tom@gmail.com".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let account = tx
            .insert_account(NewAccount {
                user_id: user.id,
                provider: "email".into(),
                provider_account_id: "tom@gmail.com".into(),
                secret: None,
                email_verified: None,
                phone_verified: None,
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        account.id
    }

    #[tokio::test]
    async fn issues_and_consumes_a_short_code() {
        let store = MemoryStore::new();
        let account_id = seed_account(&store).await;
        let codes = VerificationCodeStore::new(b"server-secret".to_vec());
        let limiter = RateLimiter::default();
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        let otp = generate_otp();
        codes
            .issue(
                &mut *tx,
                &account_id,
                "email",
                &otp,
                now + chrono::Duration::minutes(10),
                None,
                Some("tom@gmail.com".into()),
                None,
            )
            .await
            .unwrap();
        let account = codes
            .consume(&mut *tx, &limiter, "email", &otp, now, Some("Tom@Gmail.COM"), None)
            .await
            .unwrap();
        assert_eq!(account.id, account_id);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn rejects_expired_code() {
        let store = MemoryStore::new();
        let account_id = seed_account(&store).await;
        let codes = VerificationCodeStore::new(b"server-secret".to_vec());
        let limiter = RateLimiter::default();
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        let otp = generate_otp();
        codes
            .issue(
                &mut *tx,
                &account_id,
                "email",
                &otp,
                now - chrono::Duration::seconds(1),
                None,
                Some("tom@gmail.com".into()),
                None,
            )
            .await
            .unwrap();
        let err = codes
            .consume(&mut *tx, &limiter, "email", &otp, now, Some("tom@gmail.com"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ExpiredCode));
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn wrong_code_drains_rate_limit() {
        let store = MemoryStore::new();
        let account_id = seed_account(&store).await;
        let codes = VerificationCodeStore::new(b"server-secret".to_vec());
        let limiter = RateLimiter::new(1.0);
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        codes
            .issue(
                &mut *tx,
                &account_id,
                "email",
                "123456",
                now + chrono::Duration::minutes(10),
                None,
                Some("tom@gmail.com".into()),
                None,
            )
            .await
            .unwrap();
        let first = codes
            .consume(&mut *tx, &limiter, "email", "000000", now, Some("tom@gmail.com"), None)
            .await
            .unwrap_err();
        assert!(matches!(first, AuthError::InvalidCode));
        let second = codes
            .consume(&mut *tx, &limiter, "email", "000000", now, Some("tom@gmail.com"), None)
            .await
            .unwrap_err();
        assert!(matches!(second, AuthError::RateLimited));
        tx.commit().await.unwrap();
    }
}
