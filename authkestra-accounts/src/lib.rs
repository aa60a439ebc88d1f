//! Account & User Linker (spec §4.5).
//!
//! Decides whether an incoming identity merges into an existing user (by
//! verified email or phone) or creates a new one, then upserts the
//! `Account` row binding the identity to the resolved user.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use authkestra_core::error::AuthError;
use authkestra_store::{
    Account, AccountId, AccountPatch, AuthTransaction, NewAccount, NewUser, User, UserId,
    UserPatch,
};

/// How this linking call should treat an asserted email/phone as already
/// verified, per the provider-type rules in §4.5 step 2.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    Oauth,
    Oidc,
    Email,
    Phone,
    Credentials,
}

/// The normalized identity handed to the linker after a provider's
/// `profile()`/`authorize()` callback ran.
#[derive(Clone, Debug, Default)]
pub struct IncomingProfile {
    pub email: Option<String>,
    pub email_verified: bool,
    pub phone: Option<String>,
    pub phone_verified: bool,
    pub name: Option<String>,
    pub image: Option<String>,
}

/// Arguments for one linking call.
pub struct LinkArgs {
    /// Set when the caller already resolved an `Account` row (e.g. a
    /// returning OAuth user); linking steps 2/3 are skipped in that case.
    pub existing_account: Option<Account>,
    pub provider: String,
    pub provider_kind: ProviderKind,
    pub provider_account_id: String,
    pub secret: Option<String>,
    pub profile: IncomingProfile,
    /// Only meaningful for `Oauth`/`Oidc`: allow linking onto a user found
    /// by unverified email match.
    pub allow_dangerous_email_account_linking: bool,
}

pub struct LinkResult {
    pub user_id: UserId,
    pub account_id: AccountId,
}

/// Overrides steps 2-6 of the linking algorithm entirely, receiving the
/// same inputs and returning the resolved user id.
#[async_trait]
pub trait CreateOrUpdateUserHook: Send + Sync {
    async fn call(
        &self,
        tx: &mut dyn AuthTransaction,
        existing_user_id: Option<&UserId>,
        profile: &IncomingProfile,
        now: DateTime<Utc>,
    ) -> Result<UserId, AuthError>;
}

/// Invoked after the user has been created or updated, before the account
/// upsert.
#[async_trait]
pub trait AfterUserCreatedOrUpdatedHook: Send + Sync {
    async fn call(
        &self,
        tx: &mut dyn AuthTransaction,
        user_id: &UserId,
        existing_or_linked_user_id: Option<&UserId>,
        profile: &IncomingProfile,
    ) -> Result<(), AuthError>;
}

#[derive(Default)]
pub struct UserAccountLinker {
    create_or_update_user: Option<Box<dyn CreateOrUpdateUserHook>>,
    after_user_created_or_updated: Option<Box<dyn AfterUserCreatedOrUpdatedHook>>,
}

impl UserAccountLinker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create_or_update_user_hook(mut self, hook: Box<dyn CreateOrUpdateUserHook>) -> Self {
        self.create_or_update_user = Some(hook);
        self
    }

    pub fn with_after_user_created_or_updated_hook(
        mut self,
        hook: Box<dyn AfterUserCreatedOrUpdatedHook>,
    ) -> Self {
        self.after_user_created_or_updated = Some(hook);
        self
    }

    pub async fn upsert_user_and_account(
        &self,
        tx: &mut dyn AuthTransaction,
        args: LinkArgs,
        now: DateTime<Utc>,
    ) -> Result<LinkResult, AuthError> {
        let existing_user_id = args.existing_account.as_ref().map(|a| a.user_id.clone());

        let linked_user_id = if existing_user_id.is_none() {
            self.find_link_candidate(tx, &args).await?
        } else {
            None
        };

        let resolved_user_id = if let Some(hook) = &self.create_or_update_user {
            hook.call(
                tx,
                existing_user_id.as_ref().or(linked_user_id.as_ref()),
                &args.profile,
                now,
            )
            .await?
        } else {
            self.create_or_update_user_default(
                tx,
                existing_user_id.as_ref().or(linked_user_id.as_ref()),
                &args.profile,
                self.email_treated_as_verified(&args),
                self.phone_treated_as_verified(&args),
                now,
            )
            .await?
        };

        if let Some(hook) = &self.after_user_created_or_updated {
            hook.call(
                tx,
                &resolved_user_id,
                existing_user_id.as_ref().or(linked_user_id.as_ref()),
                &args.profile,
            )
            .await?;
        }

        let account_id = self
            .upsert_account(tx, &resolved_user_id, &args, now)
            .await?;

        Ok(LinkResult {
            user_id: resolved_user_id,
            account_id,
        })
    }

    /// Steps 2-4: resolve a linking candidate by verified email or phone.
    async fn find_link_candidate(
        &self,
        tx: &mut dyn AuthTransaction,
        args: &LinkArgs,
    ) -> Result<Option<UserId>, AuthError> {
        let email_candidate = if let Some(email) = &args.profile.email {
            if self.email_treated_as_verified(args) {
                self.unique_verified_candidate(tx, &email.to_lowercase(), true)
                    .await?
            } else {
                None
            }
        } else {
            None
        };

        let phone_candidate = if let Some(phone) = &args.profile.phone {
            if self.phone_treated_as_verified(args) {
                self.unique_verified_candidate(tx, phone, false).await?
            } else {
                None
            }
        } else {
            None
        };

        match (email_candidate, phone_candidate) {
            (Some(a), Some(b)) if a != b => Ok(None),
            (Some(a), Some(_)) => Ok(Some(a)),
            (Some(a), None) => Ok(Some(a)),
            (None, Some(b)) => Ok(Some(b)),
            (None, None) => Ok(None),
        }
    }

    fn email_treated_as_verified(&self, args: &LinkArgs) -> bool {
        args.profile.email_verified
            || args.provider_kind == ProviderKind::Email
            || ((args.provider_kind == ProviderKind::Oauth || args.provider_kind == ProviderKind::Oidc)
                && args.allow_dangerous_email_account_linking)
    }

    fn phone_treated_as_verified(&self, args: &LinkArgs) -> bool {
        args.profile.phone_verified
            || args.provider_kind == ProviderKind::Phone
            || ((args.provider_kind == ProviderKind::Oauth || args.provider_kind == ProviderKind::Oidc)
                && args.allow_dangerous_email_account_linking)
    }

    async fn unique_verified_candidate(
        &self,
        tx: &mut dyn AuthTransaction,
        identifier: &str,
        by_email: bool,
    ) -> Result<Option<UserId>, AuthError> {
        let candidates = if by_email {
            tx.users_by_email(identifier).await
        } else {
            tx.users_by_phone(identifier).await
        }
        .map_err(|e| AuthError::Internal(e.to_string()))?;

        let verified: Vec<User> = candidates
            .into_iter()
            .filter(|u| {
                if by_email {
                    u.email_verification_time.is_some()
                } else {
                    u.phone_verification_time.is_some()
                }
            })
            .take(2)
            .collect();

        match verified.len() {
            1 => Ok(Some(verified[0].id.clone())),
            _ => Ok(None),
        }
    }

    /// Steps 5-6: the default merge-and-upsert, used when no custom
    /// `create_or_update_user` hook is configured.
    async fn create_or_update_user_default(
        &self,
        tx: &mut dyn AuthTransaction,
        user_id: Option<&UserId>,
        profile: &IncomingProfile,
        email_treated_as_verified: bool,
        phone_treated_as_verified: bool,
        now: DateTime<Utc>,
    ) -> Result<UserId, AuthError> {
        let email_verified_at = profile.email.is_some().then_some(now).filter(|_| email_treated_as_verified);
        let phone_verified_at = profile.phone.is_some().then_some(now).filter(|_| phone_treated_as_verified);

        match user_id {
            Some(id) => {
                let patch = UserPatch {
                    email: profile.email.clone().map(|e| Some(e.to_lowercase())),
                    email_verification_time: email_verified_at.map(Some),
                    phone: profile.phone.clone().map(Some),
                    phone_verification_time: phone_verified_at.map(Some),
                    name: profile.name.clone().map(Some),
                    image: profile.image.clone().map(Some),
                };
                let user = tx
                    .patch_user(id, patch)
                    .await
                    .map_err(|e| AuthError::Internal(e.to_string()))?;
                Ok(user.id)
            }
            None => {
                let new_user = NewUser {
                    email: profile.email.clone().map(|e| e.to_lowercase()),
                    email_verification_time: email_verified_at,
                    phone: profile.phone.clone(),
                    phone_verification_time: phone_verified_at,
                    name: profile.name.clone(),
                    image: profile.image.clone(),
                    is_anonymous: false,
                };
                let user = tx
                    .insert_user(new_user)
                    .await
                    .map_err(|e| AuthError::Internal(e.to_string()))?;
                Ok(user.id)
            }
        }
    }

    /// Step 9: upsert the account row itself.
    async fn upsert_account(
        &self,
        tx: &mut dyn AuthTransaction,
        user_id: &UserId,
        args: &LinkArgs,
        now: DateTime<Utc>,
    ) -> Result<AccountId, AuthError> {
        let provider_account_id = if args.provider_kind == ProviderKind::Email {
            args.provider_account_id.to_lowercase()
        } else {
            args.provider_account_id.clone()
        };

        if let Some(existing) = &args.existing_account {
            if existing.user_id != *user_id {
                tx.patch_account(
                    &existing.id,
                    AccountPatch {
                        user_id: Some(user_id.clone()),
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| AuthError::Internal(e.to_string()))?;
            }

            let mut verified_patch = AccountPatch::default();
            if args.profile.email_verified {
                verified_patch.email_verified = Some(Some(now));
            }
            if args.profile.phone_verified {
                verified_patch.phone_verified = Some(Some(now));
            }
            if verified_patch.email_verified.is_some() || verified_patch.phone_verified.is_some() {
                tx.patch_account(&existing.id, verified_patch)
                    .await
                    .map_err(|e| AuthError::Internal(e.to_string()))?;
            }

            return Ok(existing.id.clone());
        }

        let account = tx
            .insert_account(NewAccount {
                user_id: user_id.clone(),
                provider: args.provider.clone(),
                provider_account_id,
                secret: args.secret.clone(),
                email_verified: args.profile.email_verified.then_some(now),
                phone_verified: args.profile.phone_verified.then_some(now),
            })
            .await
            .map_err(|e| match e {
                authkestra_store::StoreError::UniqueViolation { index, value } => {
                    AuthError::Internal(format!("account already linked ({index}: {value})"))
                }
                other => AuthError::Internal(other.to_string()),
            })?;

        Ok(account.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authkestra_store::{AuthStore, MemoryStore};

    #[tokio::test]
    async fn creates_a_new_user_when_no_candidate_links() {
        let store = MemoryStore::new();
        let linker = UserAccountLinker::new();
        let now = Utc::now();
        let mut tx = store.begin().await.unwrap();

        let result = linker
            .upsert_user_and_account(
                &mut *tx,
                LinkArgs {
                    existing_account: None,
                    provider: "github".into(),
                    provider_kind: ProviderKind::Oauth,
                    provider_account_id: "12345".into(),
                    secret: None,
                    profile: IncomingProfile {
                        email: Some("tom@gmail.com".into()),
                        email_verified: true,
                        ..Default::default()
                    },
                    allow_dangerous_email_account_linking: false,
                },
                now,
            )
            .await
            .unwrap();

        let user = tx.get_user(&result.user_id).await.unwrap().unwrap();
        assert_eq!(user.email.as_deref(), Some("tom@gmail.com"));
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn links_onto_existing_user_by_verified_email_case_insensitively() {
        let store = MemoryStore::new();
        let linker = UserAccountLinker::new();
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        let first = linker
            .upsert_user_and_account(
                &mut *tx,
                LinkArgs {
                    existing_account: None,
                    provider: "credentials".into(),
                    provider_kind: ProviderKind::Credentials,
                    provider_account_id: "tom@gmail.com".into(),
                    secret: Some("hashed".into()),
                    profile: IncomingProfile {
                        email: Some("tom@gmail.com".into()),
                        email_verified: true,
                        ..Default::default()
                    },
                    allow_dangerous_email_account_linking: false,
                },
                now,
            )
            .await
            .unwrap();

        let second = linker
            .upsert_user_and_account(
                &mut *tx,
                LinkArgs {
                    existing_account: None,
                    provider: "github".into(),
                    provider_kind: ProviderKind::Oauth,
                    provider_account_id: "99".into(),
                    secret: None,
                    profile: IncomingProfile {
                        email: Some("Tom@Gmail.COM".into()),
                        email_verified: true,
                        ..Default::default()
                    },
                    allow_dangerous_email_account_linking: false,
                },
                now,
            )
            .await
            .unwrap();

        assert_eq!(first.user_id, second.user_id);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn does_not_link_when_email_and_phone_candidates_differ() {
        let store = MemoryStore::new();
        let linker = UserAccountLinker::new();
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        let user_a = linker
            .upsert_user_and_account(
                &mut *tx,
                LinkArgs {
                    existing_account: None,
                    provider: "email".into(),
                    provider_kind: ProviderKind::Email,
                    provider_account_id: "a@example.com".into(),
                    secret: None,
                    profile: IncomingProfile {
                        email: Some("a@example.com".into()),
                        email_verified: true,
                        ..Default::default()
                    },
                    allow_dangerous_email_account_linking: false,
                },
                now,
            )
            .await
            .unwrap();

        let user_b = linker
            .upsert_user_and_account(
                &mut *tx,
                LinkArgs {
                    existing_account: None,
                    provider: "phone".into(),
                    provider_kind: ProviderKind::Phone,
                    provider_account_id: "+15551234567".into(),
                    secret: None,
                    profile: IncomingProfile {
                        phone: Some("+15551234567".into()),
                        phone_verified: true,
                        ..Default::default()
                    },
                    allow_dangerous_email_account_linking: false,
                },
                now,
            )
            .await
            .unwrap();

        let ambiguous = linker
            .upsert_user_and_account(
                &mut *tx,
                LinkArgs {
                    existing_account: None,
                    provider: "github".into(),
                    provider_kind: ProviderKind::Oauth,
                    provider_account_id: "77".into(),
                    secret: None,
                    profile: IncomingProfile {
                        email: Some("a@example.com".into()),
                        email_verified: true,
                        phone: Some("+15551234567".into()),
                        phone_verified: true,
                        ..Default::default()
                    },
                    allow_dangerous_email_account_linking: false,
                },
                now,
            )
            .await
            .unwrap();

        assert_ne!(ambiguous.user_id, user_a.user_id);
        assert_ne!(ambiguous.user_id, user_b.user_id);
        tx.commit().await.unwrap();
    }
}
