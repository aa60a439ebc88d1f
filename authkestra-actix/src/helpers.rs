//! Handler bodies for [`crate::configure`].

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use serde::Deserialize;
use thiserror::Error;

use authkestra_flow::{Authkestra, SignInParams, SignInResult};
use authkestra_oauth::CallbackOutcome;
use authkestra_store::AuthStore;

use crate::AuthkestraState;

/// Cache-control header spec §6 requires on the `.well-known` routes.
const WELL_KNOWN_CACHE_CONTROL: &str = "max-age=15, stale-while-revalidate=15";

/// Error type for the HTTP surface; converted to a plain status code, never
/// leaking internals to the client.
#[derive(Debug, Error)]
pub enum AuthkestraActixError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ResponseError for AuthkestraActixError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthkestraActixError::UnknownProvider(_) => StatusCode::NOT_FOUND,
            AuthkestraActixError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).body(self.to_string())
    }
}

pub async fn openid_configuration(state: web::Data<AuthkestraState>) -> HttpResponse {
    let token_manager = state.authkestra.token_manager();
    let issuer = token_manager.issuer();
    let body = serde_json::json!({
        "issuer": issuer,
        "jwks_uri": format!("{issuer}/.well-known/jwks.json"),
    });
    HttpResponse::Ok()
        .insert_header((actix_web::http::header::CACHE_CONTROL, WELL_KNOWN_CACHE_CONTROL))
        .json(body)
}

pub async fn jwks(state: web::Data<AuthkestraState>) -> HttpResponse {
    let jwks = state.authkestra.token_manager().jwks();
    HttpResponse::Ok()
        .insert_header((actix_web::http::header::CACHE_CONTROL, WELL_KNOWN_CACHE_CONTROL))
        .json(jwks)
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

pub async fn sign_in(
    state: web::Data<AuthkestraState>,
    path: web::Path<String>,
    query: web::Query<SignInQuery>,
) -> Result<HttpResponse, AuthkestraActixError> {
    let provider = path.into_inner();
    let authkestra: &Arc<Authkestra> = &state.authkestra;
    let store: &Arc<dyn AuthStore> = &state.store;

    let mut tx = store
        .begin()
        .await
        .map_err(|e| AuthkestraActixError::Internal(e.to_string()))?;

    let result = authkestra
        .sign_in(
            &mut *tx,
            Some(&provider),
            query.into_inner().into(),
            None,
            chrono::Utc::now(),
        )
        .await
        .map_err(|e| AuthkestraActixError::Internal(e.to_string()))?;

    tx.commit()
        .await
        .map_err(|e| AuthkestraActixError::Internal(e.to_string()))?;

    Ok(match result {
        SignInResult::Redirect { url, .. } => HttpResponse::Found()
            .insert_header((actix_web::http::header::LOCATION, url))
            .finish(),
        SignInResult::Started => HttpResponse::Ok().json(serde_json::json!({ "started": true })),
        SignInResult::Tokens {
            access_token,
            refresh_token,
        } => HttpResponse::Ok().json(serde_json::json!({
            "accessToken": access_token,
            "refreshToken": refresh_token,
        })),
        SignInResult::NoTokens => HttpResponse::Ok().json(serde_json::json!({ "tokens": null })),
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
    state: web::Data<AuthkestraState>,
    path: web::Path<String>,
    query: web::Query<CallbackQuery>,
) -> Result<HttpResponse, AuthkestraActixError> {
    let provider = path.into_inner();
    let authkestra: &Arc<Authkestra> = &state.authkestra;
    let store: &Arc<dyn AuthStore> = &state.store;

    let mut tx = store
        .begin()
        .await
        .map_err(|e| AuthkestraActixError::Internal(e.to_string()))?;

    let outcome = authkestra
        .complete_oauth_callback(
            &mut *tx,
            &provider,
            &query.state,
            &query.state,
            &query.code,
            chrono::Utc::now(),
        )
        .await;

    tx.commit()
        .await
        .map_err(|e| AuthkestraActixError::Internal(e.to_string()))?;

    let site_url = authkestra.token_manager().issuer();
    let redirect = match outcome {
        CallbackOutcome::Success { verification_code } => format!("{site_url}?code={verification_code}"),
        CallbackOutcome::Failure => site_url.to_string(),
    };

    Ok(HttpResponse::Found()
        .insert_header((actix_web::http::header::LOCATION, redirect))
        .finish())
}
