use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::distr::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

/// A PKCE (RFC 7636) verifier/challenge pair for one authorization request.
#[derive(Debug, Clone)]
pub struct Pkce {
    /// The client-held secret, never sent in the authorization request.
    pub verifier: String,
    /// `base64url(SHA256(verifier))`, sent as `code_challenge`.
    pub challenge: String,
}

impl Pkce {
    /// Generate a new verifier/challenge pair using the `S256` method.
    pub fn new() -> Self {
        let verifier: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(64)
            .map(char::from)
            .collect();
        Self::from_verifier(verifier)
    }

    /// Derive the `S256` challenge for an existing verifier (e.g. one
    /// recovered from a `Verifier` row after a redirect round trip).
    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(digest);
        Self { verifier, challenge }
    }
}

impl Default for Pkce {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a random opaque string suitable for an OAuth `state` or OIDC
/// `nonce` parameter.
pub fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_is_deterministic_for_a_given_verifier() {
        let a = Pkce::from_verifier("fixed-verifier-value");
        let b = Pkce::from_verifier("fixed-verifier-value");
        assert_eq!(a.challenge, b.challenge);
    }

    #[test]
    fn random_pairs_are_not_trivially_equal() {
        let a = Pkce::new();
        let b = Pkce::new();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.challenge, b.challenge);
    }
}
