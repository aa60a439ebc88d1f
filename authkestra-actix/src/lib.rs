//! Actix-web adapter exposing the four HTTP routes of spec §6 as thin
//! wrappers over `authkestra-flow`/`authkestra-token`.

pub mod helpers;

use std::sync::Arc;

use actix_web::web;

use authkestra_flow::Authkestra;
use authkestra_store::AuthStore;

/// State required by every route registered through [`configure`].
#[derive(Clone)]
pub struct AuthkestraState {
    pub authkestra: Arc<Authkestra>,
    pub store: Arc<dyn AuthStore>,
}

/// Mounts the four routes of spec §6 under the caller's chosen scope.
///
/// ```rust,ignore
/// App::new().app_data(web::Data::new(state.clone())).configure(authkestra_actix::configure)
/// ```
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/.well-known/openid-configuration",
        web::get().to(helpers::openid_configuration),
    )
    .route("/.well-known/jwks.json", web::get().to(helpers::jwks))
    .route(
        "/api/auth/signin/{provider}",
        web::get().to(helpers::sign_in),
    )
    .route(
        "/api/auth/callback/{provider}",
        web::get().to(helpers::oauth_callback),
    )
    .route(
        "/api/auth/callback/{provider}",
        web::post().to(helpers::oauth_callback),
    );
}
