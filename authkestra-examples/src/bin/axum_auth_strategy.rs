//! Composes a custom header strategy with HTTP Basic auth behind a single
//! `AuthkestraGuard`, demonstrating `authkestra-core::strategy`'s
//! framework-agnostic request authentication.

use async_trait::async_trait;
use authkestra_axum::guard::Auth;
use authkestra_core::error::AuthError;
use authkestra_core::strategy::{AuthenticationStrategy, BasicAuthenticator, BasicStrategy};
use authkestra_guard::AuthkestraGuard;
use axum::extract::FromRef;
use axum::http::request::Parts;
use axum::{routing::get, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
}

/// Looks for an `X-API-Key` header and validates it against a static key.
pub struct CustomHeaderStrategy {
    api_key: String,
}

impl CustomHeaderStrategy {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl AuthenticationStrategy<User> for CustomHeaderStrategy {
    async fn authenticate(&self, parts: &Parts) -> Result<Option<User>, AuthError> {
        let Some(value) = parts.headers.get("X-API-Key") else {
            return Ok(None);
        };
        let Ok(value) = value.to_str() else {
            return Ok(None);
        };
        if value == self.api_key {
            Ok(Some(User {
                id: "1".to_string(),
                username: "api_user".to_string(),
            }))
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}

pub struct MyBasicAuthenticator;

#[async_trait]
impl BasicAuthenticator for MyBasicAuthenticator {
    type Identity = User;

    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>, AuthError> {
        if username == "admin" && password == "password" {
            Ok(Some(User {
                id: "2".to_string(),
                username: "admin".to_string(),
            }))
        } else {
            Ok(None)
        }
    }
}

#[derive(Clone)]
struct AppState {
    guard: Arc<AuthkestraGuard<User>>,
}

impl FromRef<AppState> for Arc<AuthkestraGuard<User>> {
    fn from_ref(state: &AppState) -> Self {
        state.guard.clone()
    }
}

async fn protected_route(Auth(user): Auth<User>) -> String {
    format!("Hello, {}! Your ID is {}.", user.username, user.id)
}

#[tokio::main]
async fn main() {
    let guard = AuthkestraGuard::<User>::builder()
        .strategy(CustomHeaderStrategy::new("secret-api-key"))
        .strategy(BasicStrategy::new(MyBasicAuthenticator))
        .build();

    let app = Router::new()
        .route("/protected", get(protected_route))
        .with_state(AppState {
            guard: Arc::new(guard),
        });

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
    println!("listening on http://{}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}
