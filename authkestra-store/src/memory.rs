use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::entity::{
    Account, AccountId, RateLimit, RefreshToken, RefreshTokenId, Session, SessionId, User, UserId,
    Verifier, VerifierId, VerificationCode, VerificationCodeId,
};
use crate::error::StoreError;
use crate::transaction::{
    AccountPatch, AuthStore, AuthTransaction, NewAccount, NewRefreshToken, NewSession, NewUser,
    NewVerificationCode, NewVerifier, UserPatch,
};

#[derive(Clone, Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    accounts: HashMap<AccountId, Account>,
    sessions: HashMap<SessionId, Session>,
    refresh_tokens: HashMap<RefreshTokenId, RefreshToken>,
    verification_codes: HashMap<VerificationCodeId, VerificationCode>,
    verifiers: HashMap<VerifierId, Verifier>,
    rate_limits: HashMap<String, RateLimit>,
}

/// In-process reference implementation of [`AuthStore`], used by tests and
/// single-instance deployments. Holds the whole transaction behind one
/// exclusive lock for its lifetime, which trivially satisfies serializability.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn AuthTransaction>, StoreError> {
        let guard = self.inner.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard: Some(guard),
            snapshot,
        }))
    }
}

pub struct MemoryTransaction {
    guard: Option<OwnedMutexGuard<Tables>>,
    snapshot: Tables,
}

impl MemoryTransaction {
    fn tables(&mut self) -> &mut Tables {
        self.guard.as_mut().expect("transaction already closed")
    }
}

#[async_trait]
impl AuthTransaction for MemoryTransaction {
    async fn insert_user(&mut self, new_user: NewUser) -> Result<User, StoreError> {
        let user = User {
            id: UserId::generate(),
            email: new_user.email,
            email_verification_time: new_user.email_verification_time,
            phone: new_user.phone,
            phone_verification_time: new_user.phone_verification_time,
            name: new_user.name,
            image: new_user.image,
            is_anonymous: new_user.is_anonymous,
            created_at: Utc::now(),
        };
        self.tables().users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn get_user(&mut self, id: &UserId) -> Result<Option<User>, StoreError> {
        Ok(self.tables().users.get(id).cloned())
    }

    async fn patch_user(&mut self, id: &UserId, patch: UserPatch) -> Result<User, StoreError> {
        let tables = self.tables();
        let user = tables
            .users
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
        if let Some(email) = patch.email {
            user.email = email;
        }
        if let Some(t) = patch.email_verification_time {
            user.email_verification_time = t;
        }
        if let Some(phone) = patch.phone {
            user.phone = phone;
        }
        if let Some(t) = patch.phone_verification_time {
            user.phone_verification_time = t;
        }
        if let Some(name) = patch.name {
            user.name = name;
        }
        if let Some(image) = patch.image {
            user.image = image;
        }
        Ok(user.clone())
    }

    async fn users_by_email(&mut self, email: &str) -> Result<Vec<User>, StoreError> {
        Ok(self
            .tables()
            .users
            .values()
            .filter(|u| u.email.as_deref() == Some(email))
            .cloned()
            .collect())
    }

    async fn users_by_phone(&mut self, phone: &str) -> Result<Vec<User>, StoreError> {
        Ok(self
            .tables()
            .users
            .values()
            .filter(|u| u.phone.as_deref() == Some(phone))
            .cloned()
            .collect())
    }

    async fn insert_account(&mut self, new_account: NewAccount) -> Result<Account, StoreError> {
        let exists = self.tables().accounts.values().any(|a| {
            a.provider == new_account.provider
                && a.provider_account_id == new_account.provider_account_id
        });
        if exists {
            return Err(StoreError::UniqueViolation {
                index: "(provider, provider_account_id)".into(),
                value: format!(
                    "{}:{}",
                    new_account.provider, new_account.provider_account_id
                ),
            });
        }
        let account = Account {
            id: AccountId::generate(),
            user_id: new_account.user_id,
            provider: new_account.provider,
            provider_account_id: new_account.provider_account_id,
            secret: new_account.secret,
            email_verified: new_account.email_verified,
            phone_verified: new_account.phone_verified,
            created_at: Utc::now(),
        };
        self.tables()
            .accounts
            .insert(account.id.clone(), account.clone());
        Ok(account)
    }

    async fn get_account(&mut self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.tables().accounts.get(id).cloned())
    }

    async fn account_by_provider(
        &mut self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<Account>, StoreError> {
        Ok(self
            .tables()
            .accounts
            .values()
            .find(|a| a.provider == provider && a.provider_account_id == provider_account_id)
            .cloned())
    }

    async fn accounts_by_user(&mut self, user_id: &UserId) -> Result<Vec<Account>, StoreError> {
        Ok(self
            .tables()
            .accounts
            .values()
            .filter(|a| &a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn patch_account(
        &mut self,
        id: &AccountId,
        patch: AccountPatch,
    ) -> Result<Account, StoreError> {
        let tables = self.tables();
        let account = tables
            .accounts
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))?;
        if let Some(user_id) = patch.user_id {
            account.user_id = user_id;
        }
        if let Some(secret) = patch.secret {
            account.secret = secret;
        }
        if let Some(v) = patch.email_verified {
            account.email_verified = v;
        }
        if let Some(v) = patch.phone_verified {
            account.phone_verified = v;
        }
        Ok(account.clone())
    }

    async fn insert_session(&mut self, new_session: NewSession) -> Result<Session, StoreError> {
        let session = Session {
            id: SessionId::generate(),
            user_id: new_session.user_id,
            expiration_time: new_session.expiration_time,
            created_at: Utc::now(),
        };
        self.tables()
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get_session(&mut self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.tables().sessions.get(id).cloned())
    }

    async fn delete_session(&mut self, id: &SessionId) -> Result<(), StoreError> {
        self.tables().sessions.remove(id);
        Ok(())
    }

    async fn insert_refresh_token(
        &mut self,
        new: NewRefreshToken,
    ) -> Result<RefreshToken, StoreError> {
        let token = RefreshToken {
            id: RefreshTokenId::generate(),
            session_id: new.session_id,
            expiration_time: new.expiration_time,
            first_used_time: None,
            parent_refresh_token_id: new.parent_refresh_token_id,
            created_at: Utc::now(),
        };
        self.tables()
            .refresh_tokens
            .insert(token.id.clone(), token.clone());
        Ok(token)
    }

    async fn get_refresh_token(
        &mut self,
        id: &RefreshTokenId,
    ) -> Result<Option<RefreshToken>, StoreError> {
        Ok(self.tables().refresh_tokens.get(id).cloned())
    }

    async fn refresh_tokens_by_session(
        &mut self,
        session_id: &SessionId,
    ) -> Result<Vec<RefreshToken>, StoreError> {
        let mut tokens: Vec<RefreshToken> = self
            .tables()
            .refresh_tokens
            .values()
            .filter(|t| &t.session_id == session_id)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.created_at);
        Ok(tokens)
    }

    async fn refresh_tokens_by_parent(
        &mut self,
        session_id: &SessionId,
        parent_id: &RefreshTokenId,
    ) -> Result<Vec<RefreshToken>, StoreError> {
        let mut tokens: Vec<RefreshToken> = self
            .tables()
            .refresh_tokens
            .values()
            .filter(|t| {
                &t.session_id == session_id && t.parent_refresh_token_id.as_ref() == Some(parent_id)
            })
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.created_at);
        Ok(tokens)
    }

    async fn mark_refresh_token_used(
        &mut self,
        id: &RefreshTokenId,
        used_at: chrono::DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let tables = self.tables();
        let token = tables
            .refresh_tokens
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("refresh token {id}")))?;
        token.first_used_time = Some(used_at);
        Ok(())
    }

    async fn expire_refresh_tokens(
        &mut self,
        ids: &[RefreshTokenId],
        expiration_time: chrono::DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let tables = self.tables();
        for id in ids {
            if let Some(token) = tables.refresh_tokens.get_mut(id) {
                token.expiration_time = expiration_time;
            }
        }
        Ok(())
    }

    async fn delete_refresh_tokens_for_session(
        &mut self,
        session_id: &SessionId,
    ) -> Result<(), StoreError> {
        self.tables()
            .refresh_tokens
            .retain(|_, t| &t.session_id != session_id);
        Ok(())
    }

    async fn insert_verification_code(
        &mut self,
        new: NewVerificationCode,
    ) -> Result<VerificationCode, StoreError> {
        let code = VerificationCode {
            id: VerificationCodeId::generate(),
            account_id: new.account_id,
            provider: new.provider,
            code_hash: new.code_hash,
            expiration_time: new.expiration_time,
            pkce_verifier: new.pkce_verifier,
            email_to_verify: new.email_to_verify,
            phone_to_verify: new.phone_to_verify,
            created_at: Utc::now(),
        };
        self.tables()
            .verification_codes
            .insert(code.id.clone(), code.clone());
        Ok(code)
    }

    async fn delete_verification_codes_for_account(
        &mut self,
        account_id: &AccountId,
    ) -> Result<(), StoreError> {
        self.tables()
            .verification_codes
            .retain(|_, c| &c.account_id != account_id);
        Ok(())
    }

    async fn verification_code_by_hash(
        &mut self,
        code_hash: &str,
    ) -> Result<Option<VerificationCode>, StoreError> {
        Ok(self
            .tables()
            .verification_codes
            .values()
            .find(|c| c.code_hash == code_hash)
            .cloned())
    }

    async fn delete_verification_code(
        &mut self,
        id: &VerificationCodeId,
    ) -> Result<(), StoreError> {
        self.tables().verification_codes.remove(id);
        Ok(())
    }

    async fn insert_verifier(&mut self, new: NewVerifier) -> Result<Verifier, StoreError> {
        let verifier = Verifier {
            id: VerifierId::generate(),
            signature: new.signature,
            session_id: new.session_id,
            code_verifier: new.code_verifier,
            state: new.state,
            nonce: new.nonce,
            provider: new.provider,
            created_at: Utc::now(),
        };
        self.tables()
            .verifiers
            .insert(verifier.id.clone(), verifier.clone());
        Ok(verifier)
    }

    async fn verifier_by_signature(
        &mut self,
        signature: &str,
    ) -> Result<Option<Verifier>, StoreError> {
        Ok(self
            .tables()
            .verifiers
            .values()
            .find(|v| v.signature == signature)
            .cloned())
    }

    async fn delete_verifier(&mut self, id: &VerifierId) -> Result<(), StoreError> {
        self.tables().verifiers.remove(id);
        Ok(())
    }

    async fn get_rate_limit(&mut self, identifier: &str) -> Result<Option<RateLimit>, StoreError> {
        Ok(self.tables().rate_limits.get(identifier).cloned())
    }

    async fn put_rate_limit(&mut self, rate_limit: RateLimit) -> Result<(), StoreError> {
        self.tables()
            .rate_limits
            .insert(rate_limit.identifier.clone(), rate_limit);
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.guard.take();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        if let Some(mut guard) = self.guard.take() {
            *guard = self.snapshot.clone();
        }
        Ok(())
    }
}
