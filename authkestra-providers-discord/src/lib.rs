//! Discord OAuth provider (spec §4.6, §6).

use async_trait::async_trait;
use serde::Deserialize;

use authkestra_core::{AuthError, Identity, OAuthProvider, OAuthToken, ProviderCheck};

const AUTHORIZE_URL: &str = "https://discord.com/api/oauth2/authorize";
const TOKEN_URL: &str = "https://discord.com/api/oauth2/token";
const USER_URL: &str = "https://discord.com/api/users/@me";

pub struct DiscordProvider {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http: reqwest::Client,
}

impl DiscordProvider {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Result<Self, AuthError> {
        let client_id = std::env::var("AUTH_DISCORD_ID")
            .map_err(|_| AuthError::Internal("AUTH_DISCORD_ID is not set".into()))?;
        let client_secret = std::env::var("AUTH_DISCORD_SECRET")
            .map_err(|_| AuthError::Internal("AUTH_DISCORD_SECRET is not set".into()))?;
        let redirect_uri = std::env::var("AUTH_DISCORD_REDIRECT_URI")
            .map_err(|_| AuthError::Internal("AUTH_DISCORD_REDIRECT_URI is not set".into()))?;
        Ok(Self::new(client_id, client_secret, redirect_uri))
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

#[derive(Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    email: Option<String>,
    #[serde(default)]
    verified: bool,
    avatar: Option<String>,
}

impl DiscordUser {
    fn avatar_url(&self) -> Option<String> {
        self.avatar
            .as_ref()
            .map(|hash| format!("https://cdn.discordapp.com/avatars/{}/{}.png", self.id, hash))
    }
}

#[async_trait]
impl OAuthProvider for DiscordProvider {
    fn provider_id(&self) -> &str {
        "discord"
    }

    fn checks(&self) -> &[ProviderCheck] {
        &[ProviderCheck::Pkce, ProviderCheck::State]
    }

    fn get_authorization_url(&self, state: &str, scopes: &[&str], code_challenge: Option<&str>) -> String {
        let default_scopes = ["identify", "email"];
        let scope = if scopes.is_empty() { default_scopes.join(" ") } else { scopes.join(" ") };
        let mut url = format!(
            "{AUTHORIZE_URL}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
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

        let user: DiscordUser = self
            .http
            .get(USER_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::OauthFailed(e.to_string()))?;

        let mut identity = Identity::new("discord", user.id.clone());
        identity.email_verified = user.verified;
        identity.name = Some(user.username.clone());
        identity.image = user.avatar_url();
        identity.email = user.email;

        let oauth_token = OAuthToken {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            id_token: None,
            expires_in: token.expires_in,
            token_type: token.token_type,
            scope: token.scope,
        };

        Ok((identity, oauth_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_url_defaults_to_identify_and_email_scopes() {
        let provider = DiscordProvider::new("client-id", "client-secret", "https://app.example.com/callback");
        let url = provider.get_authorization_url("csrf-state", &[], Some("challenge"));
        assert!(url.contains("scope=identify%20email"));
        assert!(url.contains("code_challenge=challenge"));
    }

    #[test]
    fn avatar_url_is_built_from_user_id_and_hash() {
        let user = DiscordUser {
            id: "80351110224678912".into(),
            username: "nelly".into(),
            email: None,
            verified: true,
            avatar: Some("8342729096ea3675442027381ff50dfe".into()),
        };
        assert_eq!(
            user.avatar_url().unwrap(),
            "https://cdn.discordapp.com/avatars/80351110224678912/8342729096ea3675442027381ff50dfe.png"
        );
    }

    #[tokio::test]
    async fn exchange_maps_a_discord_user_into_an_identity() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "discord-token",
                "token_type": "Bearer",
                "expires_in": 604800,
                "scope": "identify email",
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "80351110224678912",
                "username": "nelly",
                "email": "nelly@discordapp.com",
                "verified": true,
                "avatar": "8342729096ea3675442027381ff50dfe",
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
        let user: DiscordUser = http
            .get(format!("{}/users/@me", server.uri()))
            .bearer_auth(&token.access_token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(user.username, "nelly");
        assert!(user.verified);
    }
}
