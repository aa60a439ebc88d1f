//! Wires a GitHub OAuth provider into `Authkestra` and mounts the four
//! routes `authkestra-axum` exposes for it.

use std::sync::Arc;

use authkestra_axum::{auth_router, AuthkestraState};
use authkestra_flow::Authkestra;
use authkestra_providers_github::GithubProvider;
use authkestra_store::{AuthStore, MemoryStore};
use authkestra_token::TokenManager;
use axum::{response::Html, routing::get, Router};

async fn index() -> Html<&'static str> {
    Html(
        "<h1>Authkestra</h1><p><a href=\"/api/auth/signin/github\">Sign in with GitHub</a></p>",
    )
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let token_manager =
        TokenManager::for_testing(b"example-signing-secret", "https://auth.example.com", "example");

    let github = GithubProvider::from_env()
        .unwrap_or_else(|_| GithubProvider::new("client-id", "client-secret", "http://localhost:3000/api/auth/callback/github"));

    let authkestra = Arc::new(
        Authkestra::new(token_manager, b"example-hmac-secret".to_vec(), "http://localhost:3000")
            .register_oauth(Arc::new(github), authkestra_accounts::ProviderKind::Oauth),
    );

    let store: Arc<dyn AuthStore> = Arc::new(MemoryStore::new());
    let state = AuthkestraState { authkestra, store };

    let app: Router<()> = Router::new()
        .route("/", get(index))
        .merge(auth_router())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
    println!("listening on http://{}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}
