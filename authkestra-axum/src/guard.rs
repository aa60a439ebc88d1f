//! Axum extractor bridging [`authkestra_guard::AuthkestraGuard`] into a
//! handler parameter, so a resource server can protect a route with
//! `Auth<I>` the same way `authkestra-flow` routes use `State`.

use std::sync::Arc;

use axum::extract::FromRef;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use authkestra_guard::AuthkestraGuard;

use crate::AuthkestraAxumError;

/// Resolves to the identity an [`AuthkestraGuard`] in application state
/// authenticates the request as, rejecting with 401/500 otherwise.
pub struct Auth<I>(pub I);

impl<S, I> FromRequestParts<S> for Auth<I>
where
    S: Send + Sync,
    Arc<AuthkestraGuard<I>>: FromRef<S>,
    I: Send + Sync + 'static,
{
    type Rejection = AuthkestraAxumError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let guard = Arc::<AuthkestraGuard<I>>::from_ref(state);
        match guard.authenticate(parts).await {
            Ok(Some(identity)) => Ok(Auth(identity)),
            Ok(None) => Err(AuthkestraAxumError::Unauthorized),
            Err(e) => Err(AuthkestraAxumError::Internal(e.to_string())),
        }
    }
}
