//! Axum adapter exposing the four HTTP routes of spec §6 as thin wrappers
//! over `authkestra-flow`/`authkestra-token`.

pub mod helpers;

#[cfg(feature = "guard")]
pub mod guard;

use std::sync::Arc;

use axum::extract::FromRef;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use thiserror::Error;

use authkestra_flow::{Authkestra, SignInParams};
use authkestra_store::AuthStore;

pub use authkestra_macros::AuthkestraFromRef;

/// Error type for the HTTP surface; converted to a plain status code, never
/// leaking internals to the client.
#[derive(Debug, Error)]
pub enum AuthkestraAxumError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AuthkestraAxumError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AuthkestraAxumError::UnknownProvider(_) => axum::http::StatusCode::NOT_FOUND,
            AuthkestraAxumError::Unauthorized => axum::http::StatusCode::UNAUTHORIZED,
            AuthkestraAxumError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// State required by every route in [`auth_router`].
#[derive(Clone, AuthkestraFromRef)]
pub struct AuthkestraState {
    #[authkestra]
    pub authkestra: Arc<Authkestra>,
    pub store: Arc<dyn AuthStore>,
}

impl FromRef<AuthkestraState> for Arc<dyn AuthStore> {
    fn from_ref(state: &AuthkestraState) -> Self {
        state.store.clone()
    }
}

/// Mounts the four routes of spec §6 under the caller's chosen prefix.
pub fn auth_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    Arc<Authkestra>: FromRef<S>,
    Arc<dyn AuthStore>: FromRef<S>,
{
    Router::new()
        .route(
            "/.well-known/openid-configuration",
            get(helpers::openid_configuration),
        )
        .route("/.well-known/jwks.json", get(helpers::jwks))
        .route("/api/auth/signin/{provider}", get(helpers::sign_in))
        .route(
            "/api/auth/callback/{provider}",
            get(helpers::oauth_callback).post(helpers::oauth_callback),
        )
}

#[derive(Deserialize, Default)]
pub struct SignInQuery {
    pub code: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub confirm_email: Option<String>,
    pub confirm_phone: Option<String>,
}

impl From<SignInQuery> for SignInParams {
    fn from(q: SignInQuery) -> Self {
        SignInParams {
            code: q.code,
            email: q.email,
            phone: q.phone,
            confirm_email: q.confirm_email,
            confirm_phone: q.confirm_phone,
            ..Default::default()
        }
    }
}
