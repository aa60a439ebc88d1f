//! JWT issuance (spec §4.4, §6).
//!
//! Signs access tokens with the process-wide `JWT_PRIVATE_KEY` and serves
//! the matching public `JWKS` verbatim — both imported once per process
//! and shared read-only (spec §5).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use authkestra_core::AuthError;

use crate::offline_validation::Jwks;

/// The claim set minted for every access token (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// `"{userId}|{sessionId}"` — split by `authkestra-session::current` to
    /// recover the session.
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signs access tokens and serves the public JWKS.
pub struct TokenManager {
    encoding_key: EncodingKey,
    algorithm: Algorithm,
    kid: Option<String>,
    issuer: String,
    audience: String,
    jwks: Jwks,
}

impl TokenManager {
    /// Build a manager from an explicit PEM key, its algorithm, the
    /// public JWKS to publish, and the issuer/audience to stamp on
    /// minted tokens.
    pub fn new(
        private_key_pem: &str,
        algorithm: Algorithm,
        kid: Option<String>,
        jwks: Jwks,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let encoding_key = match algorithm {
            Algorithm::RS256 => EncodingKey::from_rsa_pem(private_key_pem.as_bytes()),
            Algorithm::ES256 => EncodingKey::from_ec_pem(private_key_pem.as_bytes()),
            other => {
                return Err(AuthError::Token(format!(
                    "unsupported signing algorithm: {other:?}"
                )))
            }
        }
        .map_err(|e| AuthError::Token(format!("invalid private key: {e}")))?;

        Ok(Self {
            encoding_key,
            algorithm,
            kid,
            issuer: issuer.into(),
            audience: audience.into(),
            jwks,
        })
    }

    /// Build a manager from the environment: `JWT_PRIVATE_KEY` (PKCS#8 PEM)
    /// and `JWKS` (public JWKS JSON), per spec §6. The algorithm is
    /// inferred from the PEM header.
    pub fn from_env(issuer: impl Into<String>, audience: impl Into<String>) -> Result<Self, AuthError> {
        let private_key_pem = std::env::var("JWT_PRIVATE_KEY")
            .map_err(|_| AuthError::Internal("JWT_PRIVATE_KEY is not set".into()))?;
        let jwks_json = std::env::var("JWKS")
            .map_err(|_| AuthError::Internal("JWKS is not set".into()))?;
        let jwks: Jwks = serde_json::from_str(&jwks_json)
            .map_err(|e| AuthError::Internal(format!("malformed JWKS env var: {e}")))?;

        let algorithm = if private_key_pem.contains("EC PRIVATE KEY")
            || private_key_pem.contains("BEGIN PRIVATE KEY") && jwks.keys.first().map(|k| k.kty.as_str()) == Some("EC")
        {
            Algorithm::ES256
        } else {
            Algorithm::RS256
        };

        let kid = jwks.keys.first().and_then(|k| k.kid.clone());

        Self::new(&private_key_pem, algorithm, kid, jwks, issuer, audience)
    }

    /// Mint an access token for `sub` (already formatted as
    /// `"{userId}|{sessionId}"`) valid for `ttl`.
    pub fn mint(&self, sub: &str, now: DateTime<Utc>, ttl: ChronoDuration) -> Result<String, AuthError> {
        let claims = AccessTokenClaims {
            sub: sub.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        let mut header = Header::new(self.algorithm);
        header.kid = self.kid.clone();

        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| AuthError::Token(format!("failed to sign access token: {e}")))
    }

    /// The public JWKS document to serve verbatim from
    /// `/.well-known/jwks.json`.
    pub fn jwks(&self) -> &Jwks {
        &self.jwks
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// An HS256-signed manager for tests, where parsing a real RSA/EC PEM
    /// would just be test fixture noise. Never selected by [`from_env`]
    /// (spec §6 only advertises RS256/ES256 keys).
    #[cfg(feature = "testing")]
    pub fn for_testing(secret: &[u8], issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            algorithm: Algorithm::HS256,
            kid: None,
            issuer: issuer.into(),
            audience: audience.into(),
            jwks: Jwks { keys: vec![] },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_reports_missing_private_key() {
        std::env::remove_var("JWT_PRIVATE_KEY");
        std::env::remove_var("JWKS");
        let err = TokenManager::from_env("https://auth.example.com", "convex").unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
    }
}
