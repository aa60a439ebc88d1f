//! Offline validation of JWTs issued by an OIDC provider, using a cached
//! JWKS fetched from the provider's `jwks_uri`. Used both to validate
//! OIDC ID tokens during the OAuth callback (§4.6 step 3) and by
//! `authkestra-guard`'s resource-server strategy to validate bearer
//! access tokens without calling back into the issuer.

use std::time::{Duration, Instant};

use authkestra_core::{AuthError, ProviderMetadata};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("key not found in JWKS")]
    KeyNotFound,
    #[error("discovery error: {0}")]
    Discovery(#[from] AuthError),
    #[error("validation error: {0}")]
    Validation(String),
}

/// Standard claims minted by `authkestra-session`'s `TokenManager` and
/// expected by offline validators.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub iss: Option<String>,
    pub sub: Option<String>,
    pub aud: Option<String>,
    pub exp: Option<usize>,
    pub nbf: Option<usize>,
    pub iat: Option<usize>,
    pub jti: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Jwk {
    pub kid: Option<String>,
    pub kty: String,
    pub alg: Option<String>,
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
    pub crv: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
}

impl Jwk {
    pub fn to_decoding_key(&self) -> Result<DecodingKey, ValidationError> {
        match self.kty.as_str() {
            "RSA" => {
                let n = self
                    .n
                    .as_ref()
                    .ok_or_else(|| ValidationError::Validation("missing 'n' in JWK".into()))?;
                let e = self
                    .e
                    .as_ref()
                    .ok_or_else(|| ValidationError::Validation("missing 'e' in JWK".into()))?;
                DecodingKey::from_rsa_components(n, e).map_err(ValidationError::Jwt)
            }
            "EC" => {
                let x = self
                    .x
                    .as_ref()
                    .ok_or_else(|| ValidationError::Validation("missing 'x' in JWK".into()))?;
                let y = self
                    .y
                    .as_ref()
                    .ok_or_else(|| ValidationError::Validation("missing 'y' in JWK".into()))?;
                DecodingKey::from_ec_components(x, y).map_err(ValidationError::Jwt)
            }
            other => Err(ValidationError::Validation(format!(
                "unsupported key type: {other}"
            ))),
        }
    }

    /// The algorithm this key validates, inferred from `alg`/`crv` if
    /// `alg` is absent (some providers omit it on EC keys).
    pub fn algorithm(&self) -> Option<Algorithm> {
        match self.alg.as_deref() {
            Some("RS256") => Some(Algorithm::RS256),
            Some("ES256") => Some(Algorithm::ES256),
            _ => match self.crv.as_deref() {
                Some("P-256") => Some(Algorithm::ES256),
                _ if self.kty == "RSA" => Some(Algorithm::RS256),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    pub async fn fetch(jwks_uri: &str, client: &reqwest::Client) -> Result<Self, ValidationError> {
        let jwks = client.get(jwks_uri).send().await?.json::<Jwks>().await?;
        Ok(jwks)
    }

    pub fn find_key(&self, kid: Option<&str>) -> Option<&Jwk> {
        match kid {
            Some(id) => self.keys.iter().find(|k| k.kid.as_deref() == Some(id)),
            None => self.keys.first(),
        }
    }
}

/// A time-boxed in-memory cache over a provider's JWKS document.
pub struct JwksCache {
    jwks_uri: String,
    client: reqwest::Client,
    jwks: RwLock<Option<(Jwks, Instant)>>,
    ttl: Duration,
}

impl JwksCache {
    pub fn new(jwks_uri: String, refresh_interval: Duration) -> Self {
        Self {
            jwks_uri,
            client: reqwest::Client::new(),
            jwks: RwLock::new(None),
            ttl: refresh_interval,
        }
    }

    pub async fn get_jwks(&self) -> Result<Jwks, ValidationError> {
        {
            let read_guard = self.jwks.read().await;
            if let Some((jwks, last_updated)) = read_guard.as_ref() {
                if last_updated.elapsed() < self.ttl {
                    return Ok(jwks.clone());
                }
            }
        }
        self.refresh().await
    }

    pub async fn get_key(&self, kid: Option<&str>) -> Result<Option<Jwk>, ValidationError> {
        let jwks = self.get_jwks().await?;
        if let Some(key) = jwks.find_key(kid) {
            return Ok(Some(key.clone()));
        }
        // Key not found — the provider may have rotated; refresh once and retry.
        let jwks = self.refresh().await?;
        Ok(jwks.find_key(kid).cloned())
    }

    pub async fn refresh(&self) -> Result<Jwks, ValidationError> {
        let mut write_guard = self.jwks.write().await;
        let jwks = Jwks::fetch(&self.jwks_uri, &self.client).await?;
        *write_guard = Some((jwks.clone(), Instant::now()));
        Ok(jwks)
    }
}

/// Performs OIDC discovery once, then validates ID tokens against the
/// issuer's JWKS for the lifetime of the validator.
pub struct OidcValidator {
    metadata: ProviderMetadata,
    jwks_cache: JwksCache,
}

impl OidcValidator {
    pub async fn discover(issuer_url: &str) -> Result<Self, ValidationError> {
        let client = reqwest::Client::new();
        let metadata = ProviderMetadata::discover(issuer_url, &client).await?;
        let jwks_cache = JwksCache::new(metadata.jwks_uri.clone(), Duration::from_secs(3600));
        Ok(Self {
            metadata,
            jwks_cache,
        })
    }

    pub async fn validate_id_token<T>(&self, id_token: &str, audience: &str) -> Result<T, ValidationError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let header = decode_header(id_token)
            .map_err(|e| ValidationError::Validation(format!("invalid ID token header: {e}")))?;

        let jwk = self
            .jwks_cache
            .get_key(header.kid.as_deref())
            .await?
            .ok_or_else(|| ValidationError::Validation("no matching key found in JWKS".into()))?;

        let decoding_key = jwk.to_decoding_key()?;
        let algorithm = jwk.algorithm().unwrap_or(header.alg);

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(std::slice::from_ref(&self.metadata.issuer));
        validation.set_audience(std::slice::from_ref(&audience));

        let token_data = decode::<T>(id_token, &decoding_key, &validation)
            .map_err(|e| ValidationError::Validation(format!("ID token validation failed: {e}")))?;

        Ok(token_data.claims)
    }

    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }
}

/// Validates a JWT against the cached JWKS.
pub async fn validate_jwt(
    token: &str,
    cache: &JwksCache,
    validation: &Validation,
) -> Result<Claims, ValidationError> {
    validate_jwt_generic::<Claims>(token, cache, validation).await
}

/// Validates a JWT against the cached JWKS with generic claims.
pub async fn validate_jwt_generic<T>(
    token: &str,
    cache: &JwksCache,
    validation: &Validation,
) -> Result<T, ValidationError>
where
    T: for<'de> Deserialize<'de>,
{
    let header = decode_header(token)?;
    let kid = header.kid.as_deref();

    let jwk = cache.get_key(kid).await?.ok_or(ValidationError::KeyNotFound)?;

    let decoding_key = jwk.to_decoding_key()?;
    let algorithm = jwk.algorithm().unwrap_or(header.alg);
    let mut validation = validation.clone();
    validation.algorithms = vec![algorithm];

    let token_data = decode::<T>(token, &decoding_key, &validation)?;
    Ok(token_data.claims)
}
