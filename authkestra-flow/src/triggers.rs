//! Trigger Dispatcher (spec §4.8).
//!
//! Wraps a transaction and fires `on_create`/`on_update`/`on_delete` hooks
//! synchronously, inside the same transaction as the write that produced
//! them. Hooks run against the *unwrapped* inner transaction, so a trigger
//! that itself calls back into the store cannot recursively retrigger.

use async_trait::async_trait;
use serde_json::Value;

use authkestra_store::{
    Account, AccountId, AccountPatch, AuthTransaction, NewAccount, NewRefreshToken, NewSession,
    NewUser, NewVerificationCode, NewVerifier, RateLimit, RefreshToken, RefreshTokenId, Session,
    SessionId, StoreError, User, UserId, UserPatch, VerificationCode, VerificationCodeId,
    Verifier, VerifierId,
};

/// Observes writes to the seven auth tables. Default bodies are no-ops, so
/// implementors only override the events they care about.
#[async_trait]
pub trait Trigger: Send + Sync {
    async fn on_create(&self, _table: &str, _doc: &Value) {}
    async fn on_update(&self, _table: &str, _new_doc: &Value, _old_doc: &Value) {}
    async fn on_delete(&self, _table: &str, _id: &str, _doc: &Value) {}
}

fn to_value<T: serde::Serialize>(row: &T) -> Value {
    serde_json::to_value(row).unwrap_or(Value::Null)
}

/// An [`AuthTransaction`] that fires a [`Trigger`] around every write,
/// forwarding to the owned inner transaction it wraps.
///
/// Bulk operations (`expire_refresh_tokens`, `delete_refresh_tokens_for_session`,
/// `delete_verification_codes_for_account`) do not fire per-row triggers —
/// the store contract has no generic get-by-id to reconstruct the rows they
/// touch.
pub struct TriggerDispatcher<'a> {
    inner: Box<dyn AuthTransaction>,
    trigger: &'a dyn Trigger,
}

impl<'a> TriggerDispatcher<'a> {
    pub fn new(inner: Box<dyn AuthTransaction>, trigger: &'a dyn Trigger) -> Self {
        Self { inner, trigger }
    }
}

#[async_trait]
impl<'a> AuthTransaction for TriggerDispatcher<'a> {
    async fn insert_user(&mut self, new_user: NewUser) -> Result<User, StoreError> {
        let user = self.inner.insert_user(new_user).await?;
        self.trigger.on_create("users", &to_value(&user)).await;
        Ok(user)
    }

    async fn get_user(&mut self, id: &UserId) -> Result<Option<User>, StoreError> {
        self.inner.get_user(id).await
    }

    async fn patch_user(&mut self, id: &UserId, patch: UserPatch) -> Result<User, StoreError> {
        let old = self.inner.get_user(id).await?;
        let new = self.inner.patch_user(id, patch).await?;
        if let Some(old) = old {
            self.trigger.on_update("users", &to_value(&new), &to_value(&old)).await;
        }
        Ok(new)
    }

    async fn users_by_email(&mut self, email: &str) -> Result<Vec<User>, StoreError> {
        self.inner.users_by_email(email).await
    }

    async fn users_by_phone(&mut self, phone: &str) -> Result<Vec<User>, StoreError> {
        self.inner.users_by_phone(phone).await
    }

    async fn insert_account(&mut self, new_account: NewAccount) -> Result<Account, StoreError> {
        let account = self.inner.insert_account(new_account).await?;
        self.trigger.on_create("accounts", &to_value(&account)).await;
        Ok(account)
    }

    async fn get_account(&mut self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        self.inner.get_account(id).await
    }

    async fn account_by_provider(
        &mut self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<Account>, StoreError> {
        self.inner.account_by_provider(provider, provider_account_id).await
    }

    async fn accounts_by_user(&mut self, user_id: &UserId) -> Result<Vec<Account>, StoreError> {
        self.inner.accounts_by_user(user_id).await
    }

    async fn patch_account(
        &mut self,
        id: &AccountId,
        patch: AccountPatch,
    ) -> Result<Account, StoreError> {
        let old = self.inner.get_account(id).await?;
        let new = self.inner.patch_account(id, patch).await?;
        if let Some(old) = old {
            self.trigger.on_update("accounts", &to_value(&new), &to_value(&old)).await;
        }
        Ok(new)
    }

    async fn insert_session(&mut self, new_session: NewSession) -> Result<Session, StoreError> {
        let session = self.inner.insert_session(new_session).await?;
        self.trigger.on_create("sessions", &to_value(&session)).await;
        Ok(session)
    }

    async fn get_session(&mut self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        self.inner.get_session(id).await
    }

    async fn delete_session(&mut self, id: &SessionId) -> Result<(), StoreError> {
        let old = self.inner.get_session(id).await?;
        self.inner.delete_session(id).await?;
        if let Some(old) = old {
            self.trigger.on_delete("sessions", id.as_str(), &to_value(&old)).await;
        }
        Ok(())
    }

    async fn insert_refresh_token(
        &mut self,
        new: NewRefreshToken,
    ) -> Result<RefreshToken, StoreError> {
        let token = self.inner.insert_refresh_token(new).await?;
        self.trigger.on_create("refresh_tokens", &to_value(&token)).await;
        Ok(token)
    }

    async fn get_refresh_token(
        &mut self,
        id: &RefreshTokenId,
    ) -> Result<Option<RefreshToken>, StoreError> {
        self.inner.get_refresh_token(id).await
    }

    async fn refresh_tokens_by_session(
        &mut self,
        session_id: &SessionId,
    ) -> Result<Vec<RefreshToken>, StoreError> {
        self.inner.refresh_tokens_by_session(session_id).await
    }

    async fn refresh_tokens_by_parent(
        &mut self,
        session_id: &SessionId,
        parent_id: &RefreshTokenId,
    ) -> Result<Vec<RefreshToken>, StoreError> {
        self.inner.refresh_tokens_by_parent(session_id, parent_id).await
    }

    async fn mark_refresh_token_used(
        &mut self,
        id: &RefreshTokenId,
        used_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        let old = self.inner.get_refresh_token(id).await?;
        self.inner.mark_refresh_token_used(id, used_at).await?;
        if let Some(old) = old {
            let new = self.inner.get_refresh_token(id).await?;
            if let Some(new) = new {
                self.trigger
                    .on_update("refresh_tokens", &to_value(&new), &to_value(&old))
                    .await;
            }
        }
        Ok(())
    }

    async fn expire_refresh_tokens(
        &mut self,
        ids: &[RefreshTokenId],
        expiration_time: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        self.inner.expire_refresh_tokens(ids, expiration_time).await
    }

    async fn delete_refresh_tokens_for_session(
        &mut self,
        session_id: &SessionId,
    ) -> Result<(), StoreError> {
        self.inner.delete_refresh_tokens_for_session(session_id).await
    }

    async fn insert_verification_code(
        &mut self,
        new: NewVerificationCode,
    ) -> Result<VerificationCode, StoreError> {
        let code = self.inner.insert_verification_code(new).await?;
        self.trigger.on_create("verification_codes", &to_value(&code)).await;
        Ok(code)
    }

    async fn delete_verification_codes_for_account(
        &mut self,
        account_id: &AccountId,
    ) -> Result<(), StoreError> {
        self.inner.delete_verification_codes_for_account(account_id).await
    }

    async fn verification_code_by_hash(
        &mut self,
        code_hash: &str,
    ) -> Result<Option<VerificationCode>, StoreError> {
        self.inner.verification_code_by_hash(code_hash).await
    }

    async fn delete_verification_code(
        &mut self,
        id: &VerificationCodeId,
    ) -> Result<(), StoreError> {
        // No get-by-id exists for verification codes (only by hash), so the
        // deleted doc can't be reconstructed here; fires with a null doc.
        self.inner.delete_verification_code(id).await?;
        self.trigger.on_delete("verification_codes", id.as_str(), &Value::Null).await;
        Ok(())
    }

    async fn insert_verifier(&mut self, new: NewVerifier) -> Result<Verifier, StoreError> {
        let verifier = self.inner.insert_verifier(new).await?;
        self.trigger.on_create("verifiers", &to_value(&verifier)).await;
        Ok(verifier)
    }

    async fn verifier_by_signature(
        &mut self,
        signature: &str,
    ) -> Result<Option<Verifier>, StoreError> {
        self.inner.verifier_by_signature(signature).await
    }

    async fn delete_verifier(&mut self, id: &VerifierId) -> Result<(), StoreError> {
        // No get-by-id exists for verifiers (only by signature), so the
        // deleted doc can't be reconstructed here; fires with a null doc.
        self.inner.delete_verifier(id).await?;
        self.trigger.on_delete("verifiers", id.as_str(), &Value::Null).await;
        Ok(())
    }

    async fn get_rate_limit(&mut self, identifier: &str) -> Result<Option<RateLimit>, StoreError> {
        self.inner.get_rate_limit(identifier).await
    }

    async fn put_rate_limit(&mut self, rate_limit: RateLimit) -> Result<(), StoreError> {
        let old = self.inner.get_rate_limit(&rate_limit.identifier).await?;
        self.inner.put_rate_limit(rate_limit.clone()).await?;
        match old {
            Some(old) => {
                self.trigger
                    .on_update("rate_limits", &to_value(&rate_limit), &to_value(&old))
                    .await
            }
            None => self.trigger.on_create("rate_limits", &to_value(&rate_limit)).await,
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authkestra_store::{AuthStore, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingTrigger {
        creates: AtomicUsize,
        last_table: Mutex<Option<String>>,
    }

    #[async_trait]
    impl Trigger for CountingTrigger {
        async fn on_create(&self, table: &str, _doc: &Value) {
            self.creates.fetch_add(1, Ordering::SeqCst);
            *self.last_table.lock().unwrap() = Some(table.to_string());
        }
    }

    #[tokio::test]
    async fn fires_on_create_for_a_user_insert() {
        let store = MemoryStore::new();
        let trigger = CountingTrigger::default();
        let tx = store.begin().await.unwrap();
        let mut dispatched = TriggerDispatcher::new(tx, &trigger);

        dispatched.insert_user(NewUser::default()).await.unwrap();
        Box::new(dispatched).commit().await.unwrap();

        assert_eq!(trigger.creates.load(Ordering::SeqCst), 1);
        assert_eq!(trigger.last_table.lock().unwrap().as_deref(), Some("users"));
    }
}
