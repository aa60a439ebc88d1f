//! SignIn Orchestrator (spec §4.1): the single entry point that dispatches
//! across OAuth/OIDC, email, phone, credentials, and refresh-token
//! exchange, composing every other crate in the workspace.

pub mod triggers;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use authkestra_accounts::{IncomingProfile, LinkArgs, ProviderKind, UserAccountLinker};
use authkestra_core::{AuthError, CredentialsAuthorizer, EmailProvider, OAuthProvider, PhoneProvider};
use authkestra_oauth::{CallbackOutcome, OAuthFlow};
use authkestra_ratelimit::RateLimiter;
use authkestra_session::{EnvelopeCodec, RefreshTokenEnvelope, RefreshTokenTree, SessionManager};
use authkestra_store::{AuthTransaction, NewRefreshToken, SessionId, UserId};
use authkestra_token::TokenManager;
use authkestra_verification::{generate_otp, VerificationCodeStore};

/// The outcome of a [`Authkestra::sign_in`] call (spec §4.1's four result
/// shapes).
pub enum SignInResult {
    /// A fresh access token, plus a refresh token when one was minted.
    Tokens {
        access_token: String,
        refresh_token: Option<String>,
    },
    /// A verification code was issued and delivered out of band.
    Started,
    /// The client should navigate to `url`; `verifier` is the state the
    /// eventual callback must be completed with.
    Redirect { url: String, verifier: String },
    /// Silent failure (spec §7): expired session, unconsumable refresh
    /// token, or a credentials provider that rejected the attempt.
    NoTokens,
}

/// Inputs to one [`Authkestra::sign_in`] call. Fields not relevant to the
/// dispatched provider are simply ignored; `extra` carries anything a
/// provider-specific `CredentialsAuthorizer` needs (e.g. `password`).
#[derive(Clone, Debug, Default)]
pub struct SignInParams {
    pub code: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub confirm_email: Option<String>,
    pub confirm_phone: Option<String>,
    pub redirect_to: Option<String>,
    pub extra: HashMap<String, String>,
}

impl SignInParams {
    /// Flatten into the `HashMap<String, String>` a [`CredentialsAuthorizer`]
    /// expects, folding the named fields in alongside `extra`.
    fn as_map(&self) -> HashMap<String, String> {
        let mut map = self.extra.clone();
        if let Some(v) = &self.code {
            map.insert("code".into(), v.clone());
        }
        if let Some(v) = &self.email {
            map.insert("email".into(), v.clone());
        }
        if let Some(v) = &self.phone {
            map.insert("phone".into(), v.clone());
        }
        map
    }
}

enum RegisteredProvider {
    OAuth {
        provider: Arc<dyn OAuthProvider>,
        kind: ProviderKind,
    },
    Email(Arc<dyn EmailProvider>),
    Phone(Arc<dyn PhoneProvider>),
    Credentials(Arc<dyn CredentialsAuthorizer>),
}

/// Default OIDC authorization scopes (spec §4.6 step 2).
const DEFAULT_OIDC_SCOPES: &[&str] = &["openid", "profile", "email"];

/// Composes every leaf component into the single `signIn` entry point.
pub struct Authkestra {
    providers: HashMap<String, RegisteredProvider>,
    verification_codes: VerificationCodeStore,
    linker: UserAccountLinker,
    rate_limiter: RateLimiter,
    envelope_codec: EnvelopeCodec,
    token_manager: TokenManager,
    site_url: String,
}

impl Authkestra {
    pub fn new(
        token_manager: TokenManager,
        hmac_secret: impl Into<Vec<u8>>,
        site_url: impl Into<String>,
    ) -> Self {
        let hmac_secret = hmac_secret.into();
        Self {
            providers: HashMap::new(),
            verification_codes: VerificationCodeStore::new(hmac_secret.clone()),
            linker: UserAccountLinker::new(),
            rate_limiter: RateLimiter::default(),
            envelope_codec: EnvelopeCodec::new(hmac_secret),
            token_manager,
            site_url: site_url.into(),
        }
    }

    /// Build from the environment (spec §6): `CONVEX_SITE_URL` for the
    /// issuer/redirect base, `JWT_PRIVATE_KEY`/`JWKS` for token signing, and
    /// `AUTH_VERIFICATION_SECRET` (falling back to `JWT_PRIVATE_KEY`) as the
    /// HMAC key shared by the verification-code store and the refresh-token
    /// envelope codec.
    pub fn from_env() -> Result<Self, AuthError> {
        let site_url = std::env::var("CONVEX_SITE_URL")
            .map_err(|_| AuthError::Internal("CONVEX_SITE_URL is not set".into()))?;
        let token_manager = TokenManager::from_env(&site_url, "convex")?;
        let hmac_secret = std::env::var("AUTH_VERIFICATION_SECRET")
            .or_else(|_| std::env::var("JWT_PRIVATE_KEY"))
            .map_err(|_| AuthError::Internal("AUTH_VERIFICATION_SECRET is not set".into()))?;
        Ok(Self::new(token_manager, hmac_secret.into_bytes(), site_url))
    }

    /// Accessor for the `/.well-known/*` HTTP adapters, which serve the
    /// JWKS/issuer this instance signs access tokens with.
    pub fn token_manager(&self) -> &TokenManager {
        &self.token_manager
    }

    pub fn register_oauth(mut self, provider: Arc<dyn OAuthProvider>, kind: ProviderKind) -> Self {
        self.providers.insert(
            provider.provider_id().to_string(),
            RegisteredProvider::OAuth { provider, kind },
        );
        self
    }

    pub fn register_email(mut self, provider: Arc<dyn EmailProvider>) -> Self {
        self.providers
            .insert(provider.provider_id().to_string(), RegisteredProvider::Email(provider));
        self
    }

    pub fn register_phone(mut self, provider: Arc<dyn PhoneProvider>) -> Self {
        self.providers
            .insert(provider.provider_id().to_string(), RegisteredProvider::Phone(provider));
        self
    }

    pub fn register_credentials(mut self, provider: Arc<dyn CredentialsAuthorizer>) -> Self {
        self.providers.insert(
            provider.provider_id().to_string(),
            RegisteredProvider::Credentials(provider),
        );
        self
    }

    /// The single entry point unifying all five sign-in flows (spec §4.1).
    pub async fn sign_in(
        &self,
        tx: &mut dyn AuthTransaction,
        provider_id: Option<&str>,
        params: SignInParams,
        refresh_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SignInResult, AuthError> {
        let session_manager = SessionManager::new(&self.token_manager);

        // Rule 1: provider == nil && refreshToken != nil.
        if provider_id.is_none() {
            if let Some(presented) = refresh_token {
                let tree = RefreshTokenTree::new(
                    &self.envelope_codec,
                    &self.token_manager,
                    session_manager.jwt_ttl(),
                );
                return match tree.exchange(tx, presented, now).await? {
                    Some(result) => Ok(SignInResult::Tokens {
                        access_token: result.access_token,
                        refresh_token: Some(result.refresh_token),
                    }),
                    None => Ok(SignInResult::NoTokens),
                };
            }

            // Rule 2: provider == nil && params.code != nil.
            if let Some(code) = &params.code {
                let (_provider, account) = self
                    .verification_codes
                    .consume_any_provider(
                        tx,
                        &self.rate_limiter,
                        code,
                        now,
                        params.confirm_email.as_deref(),
                        params.confirm_phone.as_deref(),
                    )
                    .await?;
                return self.finish_sign_in(tx, account.user_id, now, &session_manager).await;
            }

            return Err(AuthError::Internal(
                "sign_in requires a provider, a code, or a refresh token".into(),
            ));
        }

        let provider_id = provider_id.unwrap();
        let provider = self
            .providers
            .get(provider_id)
            .ok_or(AuthError::AccountNotFound)?;

        match provider {
            RegisteredProvider::Email(email_provider) => {
                self.sign_in_email(tx, email_provider.as_ref(), &params, now, &session_manager)
                    .await
            }
            RegisteredProvider::Phone(phone_provider) => {
                self.sign_in_phone(tx, phone_provider.as_ref(), &params, now, &session_manager)
                    .await
            }
            RegisteredProvider::Credentials(authorizer) => {
                self.sign_in_credentials(tx, authorizer.as_ref(), &params, now, &session_manager)
                    .await
            }
            RegisteredProvider::OAuth { provider, kind } => {
                self.sign_in_oauth(tx, provider.as_ref(), *kind, &params, now, &session_manager)
                    .await
            }
        }
    }

    /// Complete an OAuth/OIDC callback (spec §4.6). Invoked by the HTTP
    /// surface, not through `sign_in` — the resulting hand-off code is
    /// redeemed by a subsequent `sign_in(None, {code}, ...)` call (rule 2).
    pub async fn complete_oauth_callback(
        &self,
        tx: &mut dyn AuthTransaction,
        provider_id: &str,
        verifier_signature: &str,
        received_state: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> CallbackOutcome {
        let Some(RegisteredProvider::OAuth { provider, kind }) = self.providers.get(provider_id) else {
            log::error!("oauth callback for unregistered provider {provider_id}");
            return CallbackOutcome::Failure;
        };

        OAuthFlow::complete_callback(
            tx,
            &self.verification_codes,
            &self.linker,
            provider.as_ref(),
            *kind,
            verifier_signature,
            received_state,
            code,
            now,
        )
        .await
    }

    /// Sign-out (spec §4.4): delete a session and its entire refresh-token
    /// tree.
    pub async fn sign_out(
        &self,
        tx: &mut dyn AuthTransaction,
        session_id: &SessionId,
    ) -> Result<(), AuthError> {
        SessionManager::new(&self.token_manager).delete(tx, session_id).await
    }

    /// Recover the session id carried by a validated access token's `sub`
    /// claim.
    pub fn current_session(sub: &str) -> Option<SessionId> {
        SessionManager::current(sub)
    }

    async fn sign_in_email(
        &self,
        tx: &mut dyn AuthTransaction,
        provider: &dyn EmailProvider,
        params: &SignInParams,
        now: DateTime<Utc>,
        session_manager: &SessionManager<'_>,
    ) -> Result<SignInResult, AuthError> {
        if let Some(code) = &params.code {
            let account = self
                .verification_codes
                .consume(
                    tx,
                    &self.rate_limiter,
                    provider.provider_id(),
                    code,
                    now,
                    params.email.as_deref(),
                    None,
                )
                .await?;
            return self.finish_sign_in(tx, account.user_id, now, session_manager).await;
        }

        let raw_email = params
            .email
            .as_deref()
            .ok_or_else(|| AuthError::Internal("email is required to sign in".into()))?;
        let identifier = provider.normalize_identifier(raw_email);

        let existing_account = tx
            .account_by_provider(provider.provider_id(), &identifier)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        let link_result = self
            .linker
            .upsert_user_and_account(
                tx,
                LinkArgs {
                    existing_account,
                    provider: provider.provider_id().to_string(),
                    provider_kind: ProviderKind::Email,
                    provider_account_id: identifier.clone(),
                    secret: None,
                    profile: IncomingProfile {
                        email: Some(identifier.clone()),
                        ..Default::default()
                    },
                    allow_dangerous_email_account_linking: false,
                },
                now,
            )
            .await?;

        let code_material = generate_otp();
        let expires = now + chrono::Duration::seconds(provider.max_age());
        self.verification_codes
            .issue(
                tx,
                &link_result.account_id,
                provider.provider_id(),
                &code_material,
                expires,
                None,
                Some(identifier.clone()),
                None,
            )
            .await?;

        let url = format!(
            "{}/api/auth/callback/{}?code={code_material}",
            self.site_url,
            provider.provider_id()
        );
        provider
            .send_verification_request(&identifier, &url, &code_material, expires)
            .await?;

        Ok(SignInResult::Started)
    }

    async fn sign_in_phone(
        &self,
        tx: &mut dyn AuthTransaction,
        provider: &dyn PhoneProvider,
        params: &SignInParams,
        now: DateTime<Utc>,
        session_manager: &SessionManager<'_>,
    ) -> Result<SignInResult, AuthError> {
        if let Some(code) = &params.code {
            let account = self
                .verification_codes
                .consume(
                    tx,
                    &self.rate_limiter,
                    provider.provider_id(),
                    code,
                    now,
                    None,
                    params.phone.as_deref(),
                )
                .await?;
            return self.finish_sign_in(tx, account.user_id, now, session_manager).await;
        }

        let raw_phone = params
            .phone
            .as_deref()
            .ok_or_else(|| AuthError::Internal("phone is required to sign in".into()))?;
        let identifier = provider.normalize_identifier(raw_phone);

        let existing_account = tx
            .account_by_provider(provider.provider_id(), &identifier)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        let link_result = self
            .linker
            .upsert_user_and_account(
                tx,
                LinkArgs {
                    existing_account,
                    provider: provider.provider_id().to_string(),
                    provider_kind: ProviderKind::Phone,
                    provider_account_id: identifier.clone(),
                    secret: None,
                    profile: IncomingProfile {
                        phone: Some(identifier.clone()),
                        ..Default::default()
                    },
                    allow_dangerous_email_account_linking: false,
                },
                now,
            )
            .await?;

        let code_material = generate_otp();
        let expires = now + chrono::Duration::seconds(provider.max_age());
        self.verification_codes
            .issue(
                tx,
                &link_result.account_id,
                provider.provider_id(),
                &code_material,
                expires,
                None,
                None,
                Some(identifier.clone()),
            )
            .await?;

        provider
            .send_verification_request(&identifier, &code_material, expires)
            .await?;

        Ok(SignInResult::Started)
    }

    async fn sign_in_credentials(
        &self,
        tx: &mut dyn AuthTransaction,
        authorizer: &dyn CredentialsAuthorizer,
        params: &SignInParams,
        now: DateTime<Utc>,
        session_manager: &SessionManager<'_>,
    ) -> Result<SignInResult, AuthError> {
        match authorizer.authorize(&params.as_map()).await? {
            None => Ok(SignInResult::NoTokens),
            Some(outcome) => match outcome.session_id {
                // The provider asked to resume an existing session: mint a
                // fresh access token only, leaving the refresh-token tree
                // untouched rather than rooting a second tree on one session.
                Some(session_id) => {
                    let session_id = SessionId::new(session_id);
                    let session = tx
                        .get_session(&session_id)
                        .await
                        .map_err(|e| AuthError::Internal(e.to_string()))?
                        .ok_or(AuthError::ExpiredSession)?;
                    if session.expiration_time <= now {
                        return Ok(SignInResult::NoTokens);
                    }
                    let access_token =
                        session_manager.mint_access_token(&session.user_id, &session.id, now)?;
                    Ok(SignInResult::Tokens {
                        access_token,
                        refresh_token: None,
                    })
                }
                None => {
                    self.finish_sign_in(tx, UserId::new(outcome.user_id), now, session_manager)
                        .await
                }
            },
        }
    }

    async fn sign_in_oauth(
        &self,
        tx: &mut dyn AuthTransaction,
        provider: &dyn OAuthProvider,
        _kind: ProviderKind,
        params: &SignInParams,
        now: DateTime<Utc>,
        session_manager: &SessionManager<'_>,
    ) -> Result<SignInResult, AuthError> {
        if let Some(code) = &params.code {
            let account = self
                .verification_codes
                .consume(tx, &self.rate_limiter, provider.provider_id(), code, now, None, None)
                .await?;
            return self.finish_sign_in(tx, account.user_id, now, session_manager).await;
        }

        let request = OAuthFlow::begin(tx, provider, DEFAULT_OIDC_SCOPES).await?;
        Ok(SignInResult::Redirect {
            url: request.url,
            verifier: request.verifier_signature,
        })
    }

    /// Mint a brand-new session, root refresh token, and access token for
    /// `user_id` — the common tail of every successful flow except refresh
    /// exchange and session-reuse credentials.
    async fn finish_sign_in(
        &self,
        tx: &mut dyn AuthTransaction,
        user_id: UserId,
        now: DateTime<Utc>,
        session_manager: &SessionManager<'_>,
    ) -> Result<SignInResult, AuthError> {
        let session = session_manager.create(tx, user_id.clone(), now).await?;
        let root = tx
            .insert_refresh_token(NewRefreshToken {
                session_id: session.id.clone(),
                expiration_time: session.expiration_time,
                parent_refresh_token_id: None,
            })
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        let access_token = session_manager.mint_access_token(&user_id, &session.id, now)?;
        let refresh_token = self.envelope_codec.encode(&RefreshTokenEnvelope {
            session_id: session.id,
            token_id: root.id,
        });
        Ok(SignInResult::Tokens {
            access_token,
            refresh_token: Some(refresh_token),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use authkestra_core::{CredentialsOutcome, Identity, OAuthToken};
    use authkestra_store::{AuthStore, MemoryStore};

    fn test_authkestra() -> Authkestra {
        let token_manager =
            TokenManager::for_testing(b"test-signing-secret", "https://auth.example.com", "convex");
        Authkestra::new(token_manager, b"hmac-secret".to_vec(), "https://auth.example.com")
    }

    struct StubEmail;

    #[async_trait]
    impl EmailProvider for StubEmail {
        fn provider_id(&self) -> &str {
            "email"
        }
        fn max_age(&self) -> i64 {
            600
        }
        async fn send_verification_request(
            &self,
            _identifier: &str,
            _url: &str,
            _token: &str,
            _expires: DateTime<Utc>,
        ) -> Result<(), AuthError> {
            Ok(())
        }
        fn normalize_identifier(&self, raw: &str) -> String {
            raw.to_lowercase()
        }
    }

    struct StubPassword;

    #[async_trait]
    impl CredentialsAuthorizer for StubPassword {
        fn provider_id(&self) -> &str {
            "password"
        }
        async fn authorize(
            &self,
            params: &HashMap<String, String>,
        ) -> Result<Option<CredentialsOutcome>, AuthError> {
            if params.get("password").map(String::as_str) == Some("correct-horse") {
                Ok(Some(CredentialsOutcome {
                    user_id: params.get("user_id").cloned().unwrap_or_default(),
                    session_id: None,
                }))
            } else {
                Ok(None)
            }
        }
    }

    struct StubGithub;

    #[async_trait]
    impl OAuthProvider for StubGithub {
        fn provider_id(&self) -> &str {
            "github"
        }
        fn get_authorization_url(&self, state: &str, _scopes: &[&str], _code_challenge: Option<&str>) -> String {
            format!("https://github.com/login/oauth/authorize?state={state}")
        }
        async fn exchange_code_for_identity(
            &self,
            _code: &str,
            _code_verifier: Option<&str>,
        ) -> Result<(Identity, OAuthToken), AuthError> {
            let mut identity = Identity::new("github", "12345");
            identity.email = Some("octocat@github.com".into());
            identity.email_verified = true;
            let token = OAuthToken {
                access_token: "gho_token".into(),
                refresh_token: None,
                id_token: None,
                expires_in: Some(3600),
                token_type: Some("bearer".into()),
                scope: None,
            };
            Ok((identity, token))
        }
    }

    #[tokio::test]
    async fn rule_3_email_sign_in_starts_then_completes_with_the_delivered_code() {
        let store = MemoryStore::new();
        let auth = test_authkestra().register_email(Arc::new(StubEmail));
        let mut tx = store.begin().await.unwrap();
        let now = Utc::now();

        let started = auth
            .sign_in(
                &mut *tx,
                Some("email"),
                SignInParams {
                    email: Some("tom@gmail.com".into()),
                    ..Default::default()
                },
                None,
                now,
            )
            .await
            .unwrap();
        assert!(matches!(started, SignInResult::Started));
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn rule_4_credentials_rejects_wrong_password_silently() {
        let store = MemoryStore::new();
        let auth = test_authkestra().register_credentials(Arc::new(StubPassword));
        let mut tx = store.begin().await.unwrap();
        let now = Utc::now();

        let mut params = SignInParams::default();
        params.extra.insert("password".into(), "wrong".into());
        let result = auth
            .sign_in(&mut *tx, Some("password"), params, None, now)
            .await
            .unwrap();
        assert!(matches!(result, SignInResult::NoTokens));
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn rule_5_oauth_begin_returns_a_redirect_and_verifier() {
        let store = MemoryStore::new();
        let auth = test_authkestra().register_oauth(Arc::new(StubGithub), ProviderKind::Oauth);
        let mut tx = store.begin().await.unwrap();
        let now = Utc::now();

        let result = auth
            .sign_in(&mut *tx, Some("github"), SignInParams::default(), None, now)
            .await
            .unwrap();
        match result {
            SignInResult::Redirect { url, verifier } => assert!(url.contains(&verifier)),
            _ => panic!("expected a redirect"),
        }
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn full_oauth_round_trip_yields_tokens() {
        let store = MemoryStore::new();
        let auth = test_authkestra().register_oauth(Arc::new(StubGithub), ProviderKind::Oauth);
        let mut tx = store.begin().await.unwrap();
        let now = Utc::now();

        let begin = auth
            .sign_in(&mut *tx, Some("github"), SignInParams::default(), None, now)
            .await
            .unwrap();
        let verifier = match begin {
            SignInResult::Redirect { verifier, .. } => verifier,
            _ => panic!("expected a redirect"),
        };

        let outcome = auth
            .complete_oauth_callback(&mut *tx, "github", &verifier, &verifier, "any-code", now)
            .await;
        let handoff_code = match outcome {
            CallbackOutcome::Success { verification_code } => verification_code,
            CallbackOutcome::Failure => panic!("expected a successful callback"),
        };

        let signed_in = auth
            .sign_in(
                &mut *tx,
                None,
                SignInParams {
                    code: Some(handoff_code),
                    ..Default::default()
                },
                None,
                now,
            )
            .await
            .unwrap();
        match signed_in {
            SignInResult::Tokens { access_token, refresh_token } => {
                assert!(!access_token.is_empty());
                assert!(refresh_token.is_some());
            }
            SignInResult::NoTokens => panic!("expected tokens"),
            _ => panic!("unexpected result shape"),
        }
        tx.commit().await.unwrap();
    }
}
