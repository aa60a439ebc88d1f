//! Postgres-backed [`AuthStore`] implementation.
//!
//! Every [`AuthStore::begin`] call checks out a connection from the pool and
//! starts a real `BEGIN ... COMMIT/ROLLBACK` transaction, matching the
//! in-memory store's one-transaction-per-request contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Row};

use crate::entity::{
    Account, AccountId, RateLimit, RefreshToken, RefreshTokenId, Session, SessionId,
    VerificationCode, VerificationCodeId, Verifier, VerifierId, User, UserId,
};
use crate::error::StoreError;
use crate::transaction::{
    AccountPatch, AuthStore, AuthTransaction, NewAccount, NewRefreshToken, NewSession, NewUser,
    NewVerificationCode, NewVerifier, UserPatch,
};

/// A Postgres-backed datastore. Expects the schema created by this crate's
/// migrations (users, accounts, sessions, refresh_tokens, verification_codes,
/// verifiers, rate_limits tables) to already exist.
#[derive(Clone)]
pub struct SqlStore {
    pool: sqlx::Pool<Postgres>,
}

impl SqlStore {
    pub fn new(pool: sqlx::Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthStore for SqlStore {
    async fn begin(&self) -> Result<Box<dyn AuthTransaction>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(format!("begin transaction: {e}")))?;
        Ok(Box::new(SqlTransaction { tx: Some(tx) }))
    }
}

pub struct SqlTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl SqlTransaction {
    fn tx(&mut self) -> &mut sqlx::Transaction<'static, Postgres> {
        self.tx.as_mut().expect("transaction used after commit/rollback")
    }
}

fn row_to_user(row: sqlx::postgres::PgRow) -> Result<User, StoreError> {
    Ok(User {
        id: UserId::new(row.try_get::<String, _>("id")?),
        email: row.try_get("email")?,
        email_verification_time: row.try_get("email_verification_time")?,
        phone: row.try_get("phone")?,
        phone_verification_time: row.try_get("phone_verification_time")?,
        name: row.try_get("name")?,
        image: row.try_get("image")?,
        is_anonymous: row.try_get("is_anonymous")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_account(row: sqlx::postgres::PgRow) -> Result<Account, StoreError> {
    Ok(Account {
        id: AccountId::new(row.try_get::<String, _>("id")?),
        user_id: UserId::new(row.try_get::<String, _>("user_id")?),
        provider: row.try_get("provider")?,
        provider_account_id: row.try_get("provider_account_id")?,
        secret: row.try_get("secret")?,
        email_verified: row.try_get("email_verified")?,
        phone_verified: row.try_get("phone_verified")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_session(row: sqlx::postgres::PgRow) -> Result<Session, StoreError> {
    Ok(Session {
        id: SessionId::new(row.try_get::<String, _>("id")?),
        user_id: UserId::new(row.try_get::<String, _>("user_id")?),
        expiration_time: row.try_get("expiration_time")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_refresh_token(row: sqlx::postgres::PgRow) -> Result<RefreshToken, StoreError> {
    let parent: Option<String> = row.try_get("parent_refresh_token_id")?;
    Ok(RefreshToken {
        id: RefreshTokenId::new(row.try_get::<String, _>("id")?),
        session_id: SessionId::new(row.try_get::<String, _>("session_id")?),
        expiration_time: row.try_get("expiration_time")?,
        first_used_time: row.try_get("first_used_time")?,
        parent_refresh_token_id: parent.map(RefreshTokenId::new),
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_verification_code(row: sqlx::postgres::PgRow) -> Result<VerificationCode, StoreError> {
    Ok(VerificationCode {
        id: VerificationCodeId::new(row.try_get::<String, _>("id")?),
        account_id: AccountId::new(row.try_get::<String, _>("account_id")?),
        provider: row.try_get("provider")?,
        code_hash: row.try_get("code_hash")?,
        expiration_time: row.try_get("expiration_time")?,
        pkce_verifier: row.try_get("pkce_verifier")?,
        email_to_verify: row.try_get("email_to_verify")?,
        phone_to_verify: row.try_get("phone_to_verify")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_verifier(row: sqlx::postgres::PgRow) -> Result<Verifier, StoreError> {
    Ok(Verifier {
        id: VerifierId::new(row.try_get::<String, _>("id")?),
        signature: row.try_get("signature")?,
        session_id: row
            .try_get::<Option<String>, _>("session_id")?
            .map(SessionId::new),
        code_verifier: row.try_get("code_verifier")?,
        state: row.try_get("state")?,
        nonce: row.try_get("nonce")?,
        provider: row.try_get("provider")?,
        created_at: row.try_get("created_at")?,
    })
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(format!("sql: {e}"))
    }
}

#[async_trait]
impl AuthTransaction for SqlTransaction {
    async fn insert_user(&mut self, new_user: NewUser) -> Result<User, StoreError> {
        let id = UserId::generate();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO users (id, email, email_verification_time, phone, phone_verification_time, name, image, is_anonymous, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(id.as_str())
        .bind(&new_user.email)
        .bind(new_user.email_verification_time)
        .bind(&new_user.phone)
        .bind(new_user.phone_verification_time)
        .bind(&new_user.name)
        .bind(&new_user.image)
        .bind(new_user.is_anonymous)
        .bind(now)
        .execute(&mut **self.tx())
        .await?;
        Ok(User {
            id,
            email: new_user.email,
            email_verification_time: new_user.email_verification_time,
            phone: new_user.phone,
            phone_verification_time: new_user.phone_verification_time,
            name: new_user.name,
            image: new_user.image,
            is_anonymous: new_user.is_anonymous,
            created_at: now,
        })
    }

    async fn get_user(&mut self, id: &UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&mut **self.tx())
            .await?;
        row.map(row_to_user).transpose()
    }

    async fn patch_user(&mut self, id: &UserId, patch: UserPatch) -> Result<User, StoreError> {
        let current = self
            .get_user(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let email = patch.email.unwrap_or(current.email);
        let email_verification_time = patch
            .email_verification_time
            .unwrap_or(current.email_verification_time);
        let phone = patch.phone.unwrap_or(current.phone);
        let phone_verification_time = patch
            .phone_verification_time
            .unwrap_or(current.phone_verification_time);
        let name = patch.name.unwrap_or(current.name);
        let image = patch.image.unwrap_or(current.image);
        sqlx::query(
            "UPDATE users SET email = $2, email_verification_time = $3, phone = $4, phone_verification_time = $5, name = $6, image = $7 WHERE id = $1",
        )
        .bind(id.as_str())
        .bind(&email)
        .bind(email_verification_time)
        .bind(&phone)
        .bind(phone_verification_time)
        .bind(&name)
        .bind(&image)
        .execute(&mut **self.tx())
        .await?;
        Ok(User {
            id: id.clone(),
            email,
            email_verification_time,
            phone,
            phone_verification_time,
            name,
            image,
            is_anonymous: current.is_anonymous,
            created_at: current.created_at,
        })
    }

    async fn users_by_email(&mut self, email: &str) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_all(&mut **self.tx())
            .await?;
        rows.into_iter().map(row_to_user).collect()
    }

    async fn users_by_phone(&mut self, phone: &str) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query("SELECT * FROM users WHERE phone = $1")
            .bind(phone)
            .fetch_all(&mut **self.tx())
            .await?;
        rows.into_iter().map(row_to_user).collect()
    }

    async fn insert_account(&mut self, new_account: NewAccount) -> Result<Account, StoreError> {
        let id = AccountId::generate();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO accounts (id, user_id, provider, provider_account_id, secret, email_verified, phone_verified, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(id.as_str())
        .bind(new_account.user_id.as_str())
        .bind(&new_account.provider)
        .bind(&new_account.provider_account_id)
        .bind(&new_account.secret)
        .bind(new_account.email_verified)
        .bind(new_account.phone_verified)
        .bind(now)
        .execute(&mut **self.tx())
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::UniqueViolation {
                index: "provider_account".into(),
                value: format!("{}:{}", new_account.provider, new_account.provider_account_id),
            },
            _ => StoreError::from(e),
        })?;
        Ok(Account {
            id,
            user_id: new_account.user_id,
            provider: new_account.provider,
            provider_account_id: new_account.provider_account_id,
            secret: new_account.secret,
            email_verified: new_account.email_verified,
            phone_verified: new_account.phone_verified,
            created_at: now,
        })
    }

    async fn get_account(&mut self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&mut **self.tx())
            .await?;
        row.map(row_to_account).transpose()
    }

    async fn account_by_provider(
        &mut self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query("SELECT * FROM accounts WHERE provider = $1 AND provider_account_id = $2")
            .bind(provider)
            .bind(provider_account_id)
            .fetch_optional(&mut **self.tx())
            .await?;
        row.map(row_to_account).transpose()
    }

    async fn accounts_by_user(&mut self, user_id: &UserId) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query("SELECT * FROM accounts WHERE user_id = $1")
            .bind(user_id.as_str())
            .fetch_all(&mut **self.tx())
            .await?;
        rows.into_iter().map(row_to_account).collect()
    }

    async fn patch_account(
        &mut self,
        id: &AccountId,
        patch: AccountPatch,
    ) -> Result<Account, StoreError> {
        let current = self
            .get_account(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let user_id = patch.user_id.unwrap_or(current.user_id);
        let secret = patch.secret.unwrap_or(current.secret);
        let email_verified = patch.email_verified.unwrap_or(current.email_verified);
        let phone_verified = patch.phone_verified.unwrap_or(current.phone_verified);
        sqlx::query(
            "UPDATE accounts SET user_id = $2, secret = $3, email_verified = $4, phone_verified = $5 WHERE id = $1",
        )
        .bind(id.as_str())
        .bind(user_id.as_str())
        .bind(&secret)
        .bind(email_verified)
        .bind(phone_verified)
        .execute(&mut **self.tx())
        .await?;
        Ok(Account {
            id: id.clone(),
            user_id,
            provider: current.provider,
            provider_account_id: current.provider_account_id,
            secret,
            email_verified,
            phone_verified,
            created_at: current.created_at,
        })
    }

    async fn insert_session(&mut self, new_session: NewSession) -> Result<Session, StoreError> {
        let id = SessionId::generate();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO sessions (id, user_id, expiration_time, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(id.as_str())
        .bind(new_session.user_id.as_str())
        .bind(new_session.expiration_time)
        .bind(now)
        .execute(&mut **self.tx())
        .await?;
        Ok(Session {
            id,
            user_id: new_session.user_id,
            expiration_time: new_session.expiration_time,
            created_at: now,
        })
    }

    async fn get_session(&mut self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&mut **self.tx())
            .await?;
        row.map(row_to_session).transpose()
    }

    async fn delete_session(&mut self, id: &SessionId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id.as_str())
            .execute(&mut **self.tx())
            .await?;
        Ok(())
    }

    async fn insert_refresh_token(
        &mut self,
        new: NewRefreshToken,
    ) -> Result<RefreshToken, StoreError> {
        let id = RefreshTokenId::generate();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO refresh_tokens (id, session_id, expiration_time, first_used_time, parent_refresh_token_id, created_at)
             VALUES ($1, $2, $3, NULL, $4, $5)",
        )
        .bind(id.as_str())
        .bind(new.session_id.as_str())
        .bind(new.expiration_time)
        .bind(new.parent_refresh_token_id.as_ref().map(|p| p.as_str()))
        .bind(now)
        .execute(&mut **self.tx())
        .await?;
        Ok(RefreshToken {
            id,
            session_id: new.session_id,
            expiration_time: new.expiration_time,
            first_used_time: None,
            parent_refresh_token_id: new.parent_refresh_token_id,
            created_at: now,
        })
    }

    async fn get_refresh_token(
        &mut self,
        id: &RefreshTokenId,
    ) -> Result<Option<RefreshToken>, StoreError> {
        let row = sqlx::query("SELECT * FROM refresh_tokens WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&mut **self.tx())
            .await?;
        row.map(row_to_refresh_token).transpose()
    }

    async fn refresh_tokens_by_session(
        &mut self,
        session_id: &SessionId,
    ) -> Result<Vec<RefreshToken>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM refresh_tokens WHERE session_id = $1 ORDER BY created_at ASC",
        )
        .bind(session_id.as_str())
        .fetch_all(&mut **self.tx())
        .await?;
        rows.into_iter().map(row_to_refresh_token).collect()
    }

    async fn refresh_tokens_by_parent(
        &mut self,
        session_id: &SessionId,
        parent_id: &RefreshTokenId,
    ) -> Result<Vec<RefreshToken>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM refresh_tokens WHERE session_id = $1 AND parent_refresh_token_id = $2 ORDER BY created_at ASC",
        )
        .bind(session_id.as_str())
        .bind(parent_id.as_str())
        .fetch_all(&mut **self.tx())
        .await?;
        rows.into_iter().map(row_to_refresh_token).collect()
    }

    async fn mark_refresh_token_used(
        &mut self,
        id: &RefreshTokenId,
        used_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE refresh_tokens SET first_used_time = $2 WHERE id = $1")
            .bind(id.as_str())
            .bind(used_at)
            .execute(&mut **self.tx())
            .await?;
        Ok(())
    }

    async fn expire_refresh_tokens(
        &mut self,
        ids: &[RefreshTokenId],
        expiration_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let ids: Vec<&str> = ids.iter().map(|i| i.as_str()).collect();
        sqlx::query("UPDATE refresh_tokens SET expiration_time = $2 WHERE id = ANY($1)")
            .bind(&ids[..])
            .bind(expiration_time)
            .execute(&mut **self.tx())
            .await?;
        Ok(())
    }

    async fn delete_refresh_tokens_for_session(
        &mut self,
        session_id: &SessionId,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM refresh_tokens WHERE session_id = $1")
            .bind(session_id.as_str())
            .execute(&mut **self.tx())
            .await?;
        Ok(())
    }

    async fn insert_verification_code(
        &mut self,
        new: NewVerificationCode,
    ) -> Result<VerificationCode, StoreError> {
        let id = VerificationCodeId::generate();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO verification_codes (id, account_id, provider, code_hash, expiration_time, pkce_verifier, email_to_verify, phone_to_verify, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(id.as_str())
        .bind(new.account_id.as_str())
        .bind(&new.provider)
        .bind(&new.code_hash)
        .bind(new.expiration_time)
        .bind(&new.pkce_verifier)
        .bind(&new.email_to_verify)
        .bind(&new.phone_to_verify)
        .bind(now)
        .execute(&mut **self.tx())
        .await?;
        Ok(VerificationCode {
            id,
            account_id: new.account_id,
            provider: new.provider,
            code_hash: new.code_hash,
            expiration_time: new.expiration_time,
            pkce_verifier: new.pkce_verifier,
            email_to_verify: new.email_to_verify,
            phone_to_verify: new.phone_to_verify,
            created_at: now,
        })
    }

    async fn delete_verification_codes_for_account(
        &mut self,
        account_id: &AccountId,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM verification_codes WHERE account_id = $1")
            .bind(account_id.as_str())
            .execute(&mut **self.tx())
            .await?;
        Ok(())
    }

    async fn verification_code_by_hash(
        &mut self,
        code_hash: &str,
    ) -> Result<Option<VerificationCode>, StoreError> {
        let row = sqlx::query("SELECT * FROM verification_codes WHERE code_hash = $1")
            .bind(code_hash)
            .fetch_optional(&mut **self.tx())
            .await?;
        row.map(row_to_verification_code).transpose()
    }

    async fn delete_verification_code(
        &mut self,
        id: &VerificationCodeId,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM verification_codes WHERE id = $1")
            .bind(id.as_str())
            .execute(&mut **self.tx())
            .await?;
        Ok(())
    }

    async fn insert_verifier(&mut self, new: NewVerifier) -> Result<Verifier, StoreError> {
        let id = VerifierId::generate();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO verifiers (id, signature, session_id, code_verifier, state, nonce, provider, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(id.as_str())
        .bind(&new.signature)
        .bind(new.session_id.as_ref().map(|s| s.as_str()))
        .bind(&new.code_verifier)
        .bind(&new.state)
        .bind(&new.nonce)
        .bind(&new.provider)
        .bind(now)
        .execute(&mut **self.tx())
        .await?;
        Ok(Verifier {
            id,
            signature: new.signature,
            session_id: new.session_id,
            code_verifier: new.code_verifier,
            state: new.state,
            nonce: new.nonce,
            provider: new.provider,
            created_at: now,
        })
    }

    async fn verifier_by_signature(
        &mut self,
        signature: &str,
    ) -> Result<Option<Verifier>, StoreError> {
        let row = sqlx::query("SELECT * FROM verifiers WHERE signature = $1")
            .bind(signature)
            .fetch_optional(&mut **self.tx())
            .await?;
        row.map(row_to_verifier).transpose()
    }

    async fn delete_verifier(&mut self, id: &VerifierId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM verifiers WHERE id = $1")
            .bind(id.as_str())
            .execute(&mut **self.tx())
            .await?;
        Ok(())
    }

    async fn get_rate_limit(&mut self, identifier: &str) -> Result<Option<RateLimit>, StoreError> {
        let row = sqlx::query("SELECT * FROM rate_limits WHERE identifier = $1")
            .bind(identifier)
            .fetch_optional(&mut **self.tx())
            .await?;
        row.map(|row: sqlx::postgres::PgRow| {
            Ok(RateLimit {
                identifier: row.try_get("identifier")?,
                attempts_remaining: row.try_get("attempts_remaining")?,
                last_attempt_time: row.try_get("last_attempt_time")?,
            })
        })
        .transpose()
    }

    async fn put_rate_limit(&mut self, rate_limit: RateLimit) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO rate_limits (identifier, attempts_remaining, last_attempt_time)
             VALUES ($1, $2, $3)
             ON CONFLICT (identifier) DO UPDATE SET
             attempts_remaining = $2, last_attempt_time = $3",
        )
        .bind(&rate_limit.identifier)
        .bind(rate_limit.attempts_remaining)
        .bind(rate_limit.last_attempt_time)
        .execute(&mut **self.tx())
        .await?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let tx = self.tx.take().expect("transaction used after commit/rollback");
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        let tx = self.tx.take().expect("transaction used after commit/rollback");
        tx.rollback().await?;
        Ok(())
    }
}
