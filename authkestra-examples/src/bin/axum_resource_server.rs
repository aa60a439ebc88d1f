//! A resource server that protects a route with `authkestra-guard`'s
//! offline JWT validation, pointed at a running `authkestra-axum`
//! instance's `/.well-known/jwks.json`.

use std::sync::Arc;
use std::time::Duration;

use authkestra_axum::guard::Auth;
use authkestra_guard::jwt::{JwtStrategy, ValidationConfig};
use authkestra_guard::AuthkestraGuard;
use axum::extract::FromRef;
use axum::{response::IntoResponse, routing::get, Router};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

#[derive(Clone)]
struct AppState {
    guard: Arc<AuthkestraGuard<Claims>>,
}

impl FromRef<AppState> for Arc<AuthkestraGuard<Claims>> {
    fn from_ref(state: &AppState) -> Self {
        state.guard.clone()
    }
}

async fn protected(Auth(claims): Auth<Claims>) -> impl IntoResponse {
    format!("hello, {}", claims.sub)
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let jwks_url = std::env::var("AUTH_JWKS_URL")
        .unwrap_or_else(|_| "http://localhost:3000/.well-known/jwks.json".to_string());

    let config = ValidationConfig::builder()
        .jwks_url(jwks_url)
        .refresh_interval(Duration::from_secs(3600))
        .build();

    let guard = Arc::new(
        AuthkestraGuard::<Claims>::builder()
            .strategy(JwtStrategy::new(config))
            .build(),
    );

    let app = Router::new()
        .route("/api/protected", get(protected))
        .with_state(AppState { guard });

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3001").await.unwrap();
    println!("listening on http://{}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}
