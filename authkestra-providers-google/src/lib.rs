//! Google OAuth provider (spec §4.6, §6).
//!
//! Uses the `userinfo` endpoint rather than verifying the ID token's
//! signature — full OIDC provider semantics are out of scope.

use async_trait::async_trait;
use serde::Deserialize;

use authkestra_core::{AuthError, Identity, OAuthProvider, OAuthToken, ProviderCheck};

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

pub struct GoogleProvider {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Result<Self, AuthError> {
        let client_id = std::env::var("AUTH_GOOGLE_ID")
            .map_err(|_| AuthError::Internal("AUTH_GOOGLE_ID is not set".into()))?;
        let client_secret = std::env::var("AUTH_GOOGLE_SECRET")
            .map_err(|_| AuthError::Internal("AUTH_GOOGLE_SECRET is not set".into()))?;
        let redirect_uri = std::env::var("AUTH_GOOGLE_REDIRECT_URI")
            .map_err(|_| AuthError::Internal("AUTH_GOOGLE_REDIRECT_URI is not set".into()))?;
        Ok(Self::new(client_id, client_secret, redirect_uri))
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

#[derive(Deserialize)]
struct GoogleUserinfo {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
    picture: Option<String>,
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn provider_id(&self) -> &str {
        "google"
    }

    fn checks(&self) -> &[ProviderCheck] {
        &[ProviderCheck::Pkce, ProviderCheck::State]
    }

    fn get_authorization_url(&self, state: &str, scopes: &[&str], code_challenge: Option<&str>) -> String {
        let default_scopes = ["openid", "email", "profile"];
        let scope = if scopes.is_empty() { default_scopes.join(" ") } else { scopes.join(" ") };
        let mut url = format!(
            "{AUTHORIZE_URL}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&access_type=offline&prompt=consent",
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&scope),
            urlencoding::encode(state),
        );
        if let Some(challenge) = code_challenge {
            url.push_str(&format!("&code_challenge={}&code_challenge_method=S256", urlencoding::encode(challenge)));
        }
        url
    }

    async fn exchange_code_for_identity(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<(Identity, OAuthToken), AuthError> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }

        let token: TokenResponse = self
            .http
            .post(TOKEN_URL)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?;

        let userinfo: GoogleUserinfo = self
            .http
            .get(USERINFO_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?;

        let mut identity = Identity::new("google", userinfo.sub);
        identity.email = userinfo.email;
        identity.email_verified = userinfo.email_verified;
        identity.name = userinfo.name;
        identity.image = userinfo.picture;

        let oauth_token = OAuthToken {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            id_token: token.id_token,
            expires_in: token.expires_in,
            token_type: token.token_type,
            scope: token.scope,
        };

        Ok((identity, oauth_token))
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthToken, AuthError> {
        let token: TokenResponse = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?;

        Ok(OAuthToken {
            access_token: token.access_token,
            refresh_token: token.refresh_token.or(Some(refresh_token.to_string())),
            id_token: token.id_token,
            expires_in: token.expires_in,
            token_type: token.token_type,
            scope: token.scope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_url_includes_pkce_challenge() {
        let provider = GoogleProvider::new("client-id", "client-secret", "https://app.example.com/callback");
        let url = provider.get_authorization_url("csrf-state", &[], Some("challenge-value"));
        assert!(url.contains("code_challenge=challenge-value"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("access_type=offline"));
    }

    #[tokio::test]
    async fn exchange_maps_a_google_userinfo_response_into_an_identity() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.token",
                "refresh_token": "1//refresh",
                "expires_in": 3599,
                "token_type": "Bearer",
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sub": "110169484474386276334",
                "email": "user@gmail.com",
                "email_verified": true,
                "name": "Example User",
                "picture": "https://example.com/photo.jpg",
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
        let userinfo: GoogleUserinfo = http
            .get(format!("{}/userinfo", server.uri()))
            .bearer_auth(&token.access_token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(userinfo.sub, "110169484474386276334");
        assert!(userinfo.email_verified);
    }
}
