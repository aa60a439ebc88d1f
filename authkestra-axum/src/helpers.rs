//! Handler bodies for [`crate::auth_router`].

use std::sync::Arc;

use axum::extract::{FromRef, Path, Query, State};
use axum::http::header::CACHE_CONTROL;
use axum::response::{IntoResponse, Redirect};
use axum::Json;
use serde::Deserialize;

use authkestra_flow::{Authkestra, SignInResult};
use authkestra_oauth::CallbackOutcome;
use authkestra_store::AuthStore;

use crate::{AuthkestraAxumError, SignInQuery};

/// Cache-control header spec §6 requires on the `.well-known` routes.
const WELL_KNOWN_CACHE_CONTROL: &str = "max-age=15, stale-while-revalidate=15";

pub async fn openid_configuration(State(authkestra): State<Arc<Authkestra>>) -> impl IntoResponse {
    let token_manager = authkestra.token_manager();
    let issuer = token_manager.issuer();
    let body = serde_json::json!({
        "issuer": issuer,
        "jwks_uri": format!("{issuer}/.well-known/jwks.json"),
    });
    ([(CACHE_CONTROL, WELL_KNOWN_CACHE_CONTROL)], Json(body))
}

pub async fn jwks(State(authkestra): State<Arc<Authkestra>>) -> impl IntoResponse {
    let jwks = authkestra.token_manager().jwks();
    ([(CACHE_CONTROL, WELL_KNOWN_CACHE_CONTROL)], Json(jwks))
}

pub async fn sign_in(
    State(authkestra): State<Arc<Authkestra>>,
    State(store): State<Arc<dyn AuthStore>>,
    Path(provider): Path<String>,
    Query(query): Query<SignInQuery>,
) -> Result<impl IntoResponse, AuthkestraAxumError> {
    let mut tx = store.begin().await.map_err(|e| AuthkestraAxumError::Internal(e.to_string()))?;

    let result = authkestra
        .sign_in(&mut *tx, Some(&provider), query.into(), None, chrono::Utc::now())
        .await
        .map_err(|e| AuthkestraAxumError::Internal(e.to_string()))?;

    tx.commit().await.map_err(|e| AuthkestraAxumError::Internal(e.to_string()))?;

    Ok(match result {
        SignInResult::Redirect { url, .. } => Redirect::to(&url).into_response(),
        SignInResult::Started => Json(serde_json::json!({ "started": true })).into_response(),
        SignInResult::Tokens { access_token, refresh_token } => Json(serde_json::json!({
            "accessToken": access_token,
            "refreshToken": refresh_token,
        }))
        .into_response(),
        SignInResult::NoTokens => Json(serde_json::json!({ "tokens": null })).into_response(),
    })
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub state: String,
    pub code: String,
}

/// `state` doubles as the `Verifier` row's lookup signature (spec §4.6
/// step 1 mints it from the same random token used for both).
pub async fn oauth_callback(
    State(authkestra): State<Arc<Authkestra>>,
    State(store): State<Arc<dyn AuthStore>>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Result<impl IntoResponse, AuthkestraAxumError> {
    let mut tx = store.begin().await.map_err(|e| AuthkestraAxumError::Internal(e.to_string()))?;

    let outcome = authkestra
        .complete_oauth_callback(&mut *tx, &provider, &query.state, &query.state, &query.code, chrono::Utc::now())
        .await;

    tx.commit().await.map_err(|e| AuthkestraAxumError::Internal(e.to_string()))?;

    let site_url = authkestra.token_manager().issuer();
    let redirect = match outcome {
        CallbackOutcome::Success { verification_code } => format!("{site_url}?code={verification_code}"),
        CallbackOutcome::Failure => site_url.to_string(),
    };
    Ok(Redirect::to(&redirect))
}
