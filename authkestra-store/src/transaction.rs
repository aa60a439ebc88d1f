use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entity::{
    Account, AccountId, RateLimit, RefreshToken, RefreshTokenId, Session, SessionId, User, UserId,
    Verifier, VerifierId, VerificationCode, VerificationCodeId,
};
use crate::error::StoreError;

#[derive(Clone, Debug, Default)]
pub struct NewUser {
    pub email: Option<String>,
    pub email_verification_time: Option<DateTime<Utc>>,
    pub phone: Option<String>,
    pub phone_verification_time: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub is_anonymous: bool,
}

#[derive(Clone, Debug, Default)]
pub struct UserPatch {
    pub email: Option<Option<String>>,
    pub email_verification_time: Option<Option<DateTime<Utc>>>,
    pub phone: Option<Option<String>>,
    pub phone_verification_time: Option<Option<DateTime<Utc>>>,
    pub name: Option<Option<String>>,
    pub image: Option<Option<String>>,
}

#[derive(Clone, Debug)]
pub struct NewAccount {
    pub user_id: UserId,
    pub provider: String,
    pub provider_account_id: String,
    pub secret: Option<String>,
    pub email_verified: Option<DateTime<Utc>>,
    pub phone_verified: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default)]
pub struct AccountPatch {
    pub user_id: Option<UserId>,
    pub secret: Option<Option<String>>,
    pub email_verified: Option<Option<DateTime<Utc>>>,
    pub phone_verified: Option<Option<DateTime<Utc>>>,
}

#[derive(Clone, Debug)]
pub struct NewSession {
    pub user_id: UserId,
    pub expiration_time: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewRefreshToken {
    pub session_id: SessionId,
    pub expiration_time: DateTime<Utc>,
    pub parent_refresh_token_id: Option<RefreshTokenId>,
}

#[derive(Clone, Debug)]
pub struct NewVerificationCode {
    pub account_id: AccountId,
    pub provider: String,
    pub code_hash: String,
    pub expiration_time: DateTime<Utc>,
    pub pkce_verifier: Option<String>,
    pub email_to_verify: Option<String>,
    pub phone_to_verify: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NewVerifier {
    pub signature: String,
    pub session_id: Option<SessionId>,
    pub code_verifier: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub provider: String,
}

/// A single serializable transaction over the auth entity set.
///
/// Every mutating operation defined by the core runs inside one of these per
/// request; `commit` or `rollback` closes it out. Implementations must make
/// writes atomic and reads within the transaction see a consistent snapshot.
#[async_trait]
pub trait AuthTransaction: Send {
    async fn insert_user(&mut self, new_user: NewUser) -> Result<User, StoreError>;
    async fn get_user(&mut self, id: &UserId) -> Result<Option<User>, StoreError>;
    async fn patch_user(&mut self, id: &UserId, patch: UserPatch) -> Result<User, StoreError>;
    async fn users_by_email(&mut self, email: &str) -> Result<Vec<User>, StoreError>;
    async fn users_by_phone(&mut self, phone: &str) -> Result<Vec<User>, StoreError>;

    async fn insert_account(&mut self, new_account: NewAccount) -> Result<Account, StoreError>;
    async fn get_account(&mut self, id: &AccountId) -> Result<Option<Account>, StoreError>;
    async fn account_by_provider(
        &mut self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<Account>, StoreError>;
    async fn accounts_by_user(&mut self, user_id: &UserId) -> Result<Vec<Account>, StoreError>;
    async fn patch_account(
        &mut self,
        id: &AccountId,
        patch: AccountPatch,
    ) -> Result<Account, StoreError>;

    async fn insert_session(&mut self, new_session: NewSession) -> Result<Session, StoreError>;
    async fn get_session(&mut self, id: &SessionId) -> Result<Option<Session>, StoreError>;
    async fn delete_session(&mut self, id: &SessionId) -> Result<(), StoreError>;

    async fn insert_refresh_token(
        &mut self,
        new: NewRefreshToken,
    ) -> Result<RefreshToken, StoreError>;
    async fn get_refresh_token(
        &mut self,
        id: &RefreshTokenId,
    ) -> Result<Option<RefreshToken>, StoreError>;
    /// Ordered by creation time, oldest first.
    async fn refresh_tokens_by_session(
        &mut self,
        session_id: &SessionId,
    ) -> Result<Vec<RefreshToken>, StoreError>;
    async fn refresh_tokens_by_parent(
        &mut self,
        session_id: &SessionId,
        parent_id: &RefreshTokenId,
    ) -> Result<Vec<RefreshToken>, StoreError>;
    async fn mark_refresh_token_used(
        &mut self,
        id: &RefreshTokenId,
        used_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn expire_refresh_tokens(
        &mut self,
        ids: &[RefreshTokenId],
        expiration_time: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn delete_refresh_tokens_for_session(
        &mut self,
        session_id: &SessionId,
    ) -> Result<(), StoreError>;

    async fn insert_verification_code(
        &mut self,
        new: NewVerificationCode,
    ) -> Result<VerificationCode, StoreError>;
    async fn delete_verification_codes_for_account(
        &mut self,
        account_id: &AccountId,
    ) -> Result<(), StoreError>;
    async fn verification_code_by_hash(
        &mut self,
        code_hash: &str,
    ) -> Result<Option<VerificationCode>, StoreError>;
    async fn delete_verification_code(
        &mut self,
        id: &VerificationCodeId,
    ) -> Result<(), StoreError>;

    async fn insert_verifier(&mut self, new: NewVerifier) -> Result<Verifier, StoreError>;
    async fn verifier_by_signature(
        &mut self,
        signature: &str,
    ) -> Result<Option<Verifier>, StoreError>;
    async fn delete_verifier(&mut self, id: &VerifierId) -> Result<(), StoreError>;

    async fn get_rate_limit(&mut self, identifier: &str) -> Result<Option<RateLimit>, StoreError>;
    async fn put_rate_limit(&mut self, rate_limit: RateLimit) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Opens a new serializable transaction. Implemented once per storage backend.
#[async_trait]
pub trait AuthStore: Send + Sync + 'static {
    async fn begin(&self) -> Result<Box<dyn AuthTransaction>, StoreError>;
}
