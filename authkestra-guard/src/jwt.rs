//! JWT bearer-token authentication strategy, built on
//! `authkestra-token`'s offline JWKS validator so the JWK/JWKS types and
//! validation logic have one home.

use async_trait::async_trait;
use authkestra_core::{
    error::AuthError,
    strategy::{utils, AuthenticationStrategy},
};
use authkestra_token::offline_validation::{validate_jwt_generic, JwksCache, ValidationError};
use http::request::Parts;
use jsonwebtoken::Algorithm;
use serde::Deserialize;
use std::time::Duration;

pub use authkestra_token::offline_validation::{Claims, Jwk, Jwks, ValidationError as JwtValidationError};

/// Configuration for offline JWT validation.
pub struct ValidationConfig {
    pub jwks_url: String,
    pub refresh_interval: Duration,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub algorithms: Vec<Algorithm>,
}

impl ValidationConfig {
    pub fn builder() -> ValidationConfigBuilder {
        ValidationConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct ValidationConfigBuilder {
    jwks_url: Option<String>,
    refresh_interval: Option<Duration>,
    issuer: Option<String>,
    audience: Option<String>,
    algorithms: Vec<Algorithm>,
}

impl ValidationConfigBuilder {
    pub fn jwks_url(mut self, jwks_url: impl Into<String>) -> Self {
        self.jwks_url = Some(jwks_url.into());
        self
    }

    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    pub fn build(self) -> ValidationConfig {
        ValidationConfig {
            jwks_url: self.jwks_url.expect("JWKS URL must be set for ValidationConfig"),
            refresh_interval: self.refresh_interval.unwrap_or_else(|| Duration::from_secs(3600)),
            issuer: self.issuer,
            audience: self.audience,
            algorithms: if self.algorithms.is_empty() {
                vec![Algorithm::RS256]
            } else {
                self.algorithms
            },
        }
    }
}

/// An [`AuthenticationStrategy`] that validates a bearer JWT against a
/// cached JWKS, without calling back into the issuer per request.
pub struct JwtStrategy<I> {
    cache: JwksCache,
    validation: jsonwebtoken::Validation,
    _marker: std::marker::PhantomData<I>,
}

impl<I> JwtStrategy<I> {
    pub fn new(config: ValidationConfig) -> Self {
        let cache = JwksCache::new(config.jwks_url, config.refresh_interval);
        let mut validation = jsonwebtoken::Validation::new(config.algorithms[0]);
        validation.algorithms = config.algorithms;

        if let Some(iss) = config.issuer {
            validation.set_issuer(&[iss]);
        }
        if let Some(aud) = config.audience {
            validation.set_audience(&[aud]);
        }

        Self {
            cache,
            validation,
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<I> AuthenticationStrategy<I> for JwtStrategy<I>
where
    I: for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    async fn authenticate(&self, parts: &Parts) -> Result<Option<I>, AuthError> {
        if let Some(token) = utils::extract_bearer_token(&parts.headers) {
            match validate_jwt_generic::<I>(token, &self.cache, &self.validation).await {
                Ok(claims) => Ok(Some(claims)),
                Err(ValidationError::Jwt(_)) | Err(ValidationError::KeyNotFound) => Ok(None),
                Err(e) => Err(AuthError::Token(e.to_string())),
            }
        } else {
            Ok(None)
        }
    }
}
