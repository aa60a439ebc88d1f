//! Opaque, tamper-detectable refresh-token envelope.
//!
//! A refresh token handed to a client is `base64url(session_id . ":" .
//! token_id . ":" . hmac)` — the HMAC covers the ids so a forged or
//! edited envelope is caught before ever touching the datastore (spec
//! §4.3: "signed envelope, so tampering is detectable").

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use authkestra_store::{RefreshTokenId, SessionId};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenEnvelope {
    pub session_id: SessionId,
    pub token_id: RefreshTokenId,
}

pub struct EnvelopeCodec {
    secret: Vec<u8>,
}

impl EnvelopeCodec {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    fn sign(&self, session_id: &str, token_id: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts a key of any length");
        mac.update(session_id.as_bytes());
        mac.update(b":");
        mac.update(token_id.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    pub fn encode(&self, envelope: &RefreshTokenEnvelope) -> String {
        let session_id = envelope.session_id.as_str();
        let token_id = envelope.token_id.as_str();
        let sig = self.sign(session_id, token_id);
        format!("{session_id}:{token_id}:{sig}")
    }

    /// Parse and verify a presented refresh-token string. Returns `None`
    /// on any structural or HMAC mismatch — the caller treats this the
    /// same as "token/session not found" (spec §4.3 step 1).
    pub fn decode(&self, token: &str) -> Option<RefreshTokenEnvelope> {
        let mut parts = token.splitn(3, ':');
        let session_id = parts.next()?;
        let token_id = parts.next()?;
        let sig = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        let expected = self.sign(session_id, token_id);
        if !constant_time_eq(expected.as_bytes(), sig.as_bytes()) {
            return None;
        }
        Some(RefreshTokenEnvelope {
            session_id: SessionId::new(session_id),
            token_id: RefreshTokenId::new(token_id),
        })
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let codec = EnvelopeCodec::new(b"secret".to_vec());
        let envelope = RefreshTokenEnvelope {
            session_id: SessionId::generate(),
            token_id: RefreshTokenId::generate(),
        };
        let token = codec.encode(&envelope);
        assert_eq!(codec.decode(&token), Some(envelope));
    }

    #[test]
    fn rejects_tampered_signature() {
        let codec = EnvelopeCodec::new(b"secret".to_vec());
        let envelope = RefreshTokenEnvelope {
            session_id: SessionId::generate(),
            token_id: RefreshTokenId::generate(),
        };
        let mut token = codec.encode(&envelope);
        token.push('x');
        assert_eq!(codec.decode(&token), None);
    }
}
