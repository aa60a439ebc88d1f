//! Authorization-URL construction and callback completion (spec §4.6).
//!
//! Providers own their own HTTP calls (authorization URL construction,
//! code exchange, userinfo/ID-token handling) through [`OAuthProvider`];
//! this module owns everything around that: PKCE/state/nonce issuance,
//! the transient [`Verifier`] row, and handing the resulting identity to
//! the Account & User Linker before materializing the hand-off
//! verification code the client exchanges in the ordinary sign-in call.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use authkestra_accounts::{IncomingProfile, LinkArgs, ProviderKind, UserAccountLinker};
use authkestra_core::pkce::{random_token, Pkce};
use authkestra_core::{AuthError, OAuthProvider, ProviderCheck};
use authkestra_store::{AuthTransaction, NewVerifier};
use authkestra_verification::{generate_link_token, VerificationCodeStore};

/// How long an OAuth hand-off code survives before the client must redeem
/// it via the ordinary `signIn(code)` call.
const HANDOFF_CODE_TTL: ChronoDuration = ChronoDuration::minutes(2);

/// The assembled authorization URL plus the `Verifier` row's lookup key,
/// which the caller threads through as OAuth `state`.
pub struct AuthorizationRequest {
    pub url: String,
    pub verifier_signature: String,
}

/// Outcome of a completed callback. Never surfaces the underlying
/// [`AuthError`] to the client — failures are logged and redirected
/// silently per spec §4.6's "Failure-in-callback policy".
pub enum CallbackOutcome {
    /// Redirect to `SITE_URL?code={verification_code}`.
    Success { verification_code: String },
    /// Redirect to `SITE_URL` with no `code` parameter.
    Failure,
}

/// Orchestrates the authorization-code round trip for one provider.
pub struct OAuthFlow;

impl OAuthFlow {
    /// Step 1 of the sign-in dispatch for `provider.type in {oauth, oidc}`
    /// with no `params.code`: build the authorization URL and persist the
    /// PKCE/state/nonce the callback will need.
    pub async fn begin(
        tx: &mut dyn AuthTransaction,
        provider: &dyn OAuthProvider,
        scopes: &[&str],
    ) -> Result<AuthorizationRequest, AuthError> {
        let checks = provider.checks();
        let state = random_token(32);
        let pkce = checks.contains(&ProviderCheck::Pkce).then(Pkce::new);
        let nonce = checks.contains(&ProviderCheck::Nonce).then(|| random_token(32));

        tx.insert_verifier(NewVerifier {
            signature: state.clone(),
            session_id: None,
            code_verifier: pkce.as_ref().map(|p| p.verifier.clone()),
            state: Some(state.clone()),
            nonce: nonce.clone(),
            provider: provider.provider_id().to_string(),
        })
        .await
        .map_err(|e| AuthError::Internal(e.to_string()))?;

        let url = provider.get_authorization_url(
            &state,
            scopes,
            pkce.as_ref().map(|p| p.challenge.as_str()),
        );

        Ok(AuthorizationRequest {
            url,
            verifier_signature: state,
        })
    }

    /// Steps 1-5 of the callback: validate state, exchange the code,
    /// resolve the account, and materialize the hand-off verification
    /// code. Any failure is logged and collapsed to [`CallbackOutcome::Failure`]
    /// rather than propagated — the caller's redirect target does not
    /// change shape between "provider rejected the code" and "state
    /// didn't match".
    #[allow(clippy::too_many_arguments)]
    pub async fn complete_callback(
        tx: &mut dyn AuthTransaction,
        verification_codes: &VerificationCodeStore,
        linker: &UserAccountLinker,
        provider: &dyn OAuthProvider,
        provider_kind: ProviderKind,
        verifier_signature: &str,
        received_state: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> CallbackOutcome {
        match Self::try_complete(
            tx,
            verification_codes,
            linker,
            provider,
            provider_kind,
            verifier_signature,
            received_state,
            code,
            now,
        )
        .await
        {
            Ok(verification_code) => CallbackOutcome::Success { verification_code },
            Err(err) => {
                log::error!(
                    "oauth callback failed for provider {}: {err}",
                    provider.provider_id()
                );
                CallbackOutcome::Failure
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_complete(
        tx: &mut dyn AuthTransaction,
        verification_codes: &VerificationCodeStore,
        linker: &UserAccountLinker,
        provider: &dyn OAuthProvider,
        provider_kind: ProviderKind,
        verifier_signature: &str,
        received_state: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let verifier = tx
            .verifier_by_signature(verifier_signature)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?
            .ok_or(AuthError::InvalidVerifier)?;

        if verifier.provider != provider.provider_id() {
            return Err(AuthError::ProviderMismatch);
        }
        if let Some(expected_state) = &verifier.state {
            if expected_state != received_state {
                return Err(AuthError::CsrfMismatch);
            }
        }

        let (identity, _token) = provider
            .exchange_code_for_identity(code, verifier.code_verifier.as_deref())
            .await?;

        tx.delete_verifier(&verifier.id)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;

        let existing_account = tx
            .account_by_provider(&identity.provider_id, &identity.external_id)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;

        let link_result = linker
            .upsert_user_and_account(
                tx,
                LinkArgs {
                    existing_account,
                    provider: identity.provider_id.clone(),
                    provider_kind,
                    provider_account_id: identity.external_id.clone(),
                    secret: None,
                    profile: IncomingProfile {
                        email: identity.email.clone(),
                        email_verified: identity.email_verified,
                        phone: identity.phone.clone(),
                        phone_verified: identity.phone_verified,
                        name: identity.name.clone(),
                        image: identity.image.clone(),
                    },
                    allow_dangerous_email_account_linking: provider
                        .allow_dangerous_email_account_linking(),
                },
                now,
            )
            .await?;

        let code_material = generate_link_token();
        verification_codes
            .issue(
                tx,
                &link_result.account_id,
                &identity.provider_id,
                &code_material,
                now + HANDOFF_CODE_TTL,
                None,
                None,
                None,
            )
            .await?;

        Ok(code_material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use authkestra_core::{Identity, OAuthToken};
    use authkestra_ratelimit::RateLimiter;
    use authkestra_store::{AuthStore, MemoryStore};

    struct StubGithub;

    #[async_trait]
    impl OAuthProvider for StubGithub {
        fn provider_id(&self) -> &str {
            "github"
        }

        fn checks(&self) -> &[ProviderCheck] {
            &[ProviderCheck::State]
        }

        fn get_authorization_url(
            &self,
            state: &str,
            _scopes: &[&str],
            _code_challenge: Option<&str>,
        ) -> String {
            format!("https://github.com/login/oauth/authorize?state={state}")
        }

        async fn exchange_code_for_identity(
            &self,
            code: &str,
            _code_verifier: Option<&str>,
        ) -> Result<(Identity, OAuthToken), AuthError> {
            if code != "valid-code" {
                return Err(AuthError::OauthFailed("provider rejected code".into()));
            }
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
    async fn begin_persists_a_verifier_the_callback_can_consume() {
        let store = MemoryStore::new();
        let provider = StubGithub;
        let mut tx = store.begin().await.unwrap();

        let request = OAuthFlow::begin(&mut *tx, &provider, &["read:user"]).await.unwrap();
        assert!(request.url.contains(&request.verifier_signature));

        let verifier = tx
            .verifier_by_signature(&request.verifier_signature)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verifier.provider, "github");
        assert!(verifier.code_verifier.is_none(), "github advertises state-only checks");
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn successful_callback_links_an_account_and_issues_a_handoff_code() {
        let store = MemoryStore::new();
        let provider = StubGithub;
        let linker = UserAccountLinker::new();
        let codes = VerificationCodeStore::new(b"server-secret".to_vec());
        let now = Utc::now();
        let mut tx = store.begin().await.unwrap();

        let request = OAuthFlow::begin(&mut *tx, &provider, &["read:user"]).await.unwrap();

        let outcome = OAuthFlow::complete_callback(
            &mut *tx,
            &codes,
            &linker,
            &provider,
            ProviderKind::Oauth,
            &request.verifier_signature,
            &request.verifier_signature,
            "valid-code",
            now,
        )
        .await;

        let handoff_code = match outcome {
            CallbackOutcome::Success { verification_code } => verification_code,
            CallbackOutcome::Failure => panic!("expected a successful callback"),
        };

        let limiter = RateLimiter::default();
        let account = codes
            .consume(&mut *tx, &limiter, "github", &handoff_code, now, None, None)
            .await
            .unwrap();
        assert_eq!(account.provider_account_id, "12345");
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn mismatched_state_fails_silently() {
        let store = MemoryStore::new();
        let provider = StubGithub;
        let linker = UserAccountLinker::new();
        let codes = VerificationCodeStore::new(b"server-secret".to_vec());
        let now = Utc::now();
        let mut tx = store.begin().await.unwrap();

        let request = OAuthFlow::begin(&mut *tx, &provider, &["read:user"]).await.unwrap();

        let outcome = OAuthFlow::complete_callback(
            &mut *tx,
            &codes,
            &linker,
            &provider,
            ProviderKind::Oauth,
            &request.verifier_signature,
            "attacker-supplied-state",
            "valid-code",
            now,
        )
        .await;

        assert!(matches!(outcome, CallbackOutcome::Failure));
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn provider_rejected_code_fails_silently() {
        let store = MemoryStore::new();
        let provider = StubGithub;
        let linker = UserAccountLinker::new();
        let codes = VerificationCodeStore::new(b"server-secret".to_vec());
        let now = Utc::now();
        let mut tx = store.begin().await.unwrap();

        let request = OAuthFlow::begin(&mut *tx, &provider, &["read:user"]).await.unwrap();

        let outcome = OAuthFlow::complete_callback(
            &mut *tx,
            &codes,
            &linker,
            &provider,
            ProviderKind::Oauth,
            &request.verifier_signature,
            &request.verifier_signature,
            "wrong-code",
            now,
        )
        .await;

        assert!(matches!(outcome, CallbackOutcome::Failure));
        tx.commit().await.unwrap();
    }
}
