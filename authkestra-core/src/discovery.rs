use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::AuthError;

/// OpenID Connect provider metadata, as published under
/// `{issuer}/.well-known/openid-configuration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: String,
}

impl ProviderMetadata {
    /// Fetch and parse `{issuer}/.well-known/openid-configuration`.
    ///
    /// `issuer` must not carry a trailing slash; it is joined directly with
    /// the well-known path.
    pub async fn discover(issuer: &str, client: &reqwest::Client) -> Result<Self, AuthError> {
        let issuer = issuer.trim_end_matches('/');
        let url = format!("{issuer}/.well-known/openid-configuration");
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| AuthError::Provider(format!("discovery request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(AuthError::Provider(format!(
                "discovery endpoint returned {}",
                response.status()
            )));
        }
        response
            .json::<ProviderMetadata>()
            .await
            .map_err(|e| AuthError::Provider(format!("malformed discovery document: {e}")))
    }
}

struct CacheEntry {
    metadata: ProviderMetadata,
    fetched_at: Instant,
}

/// A short-lived in-process cache over [`ProviderMetadata::discover`], keyed
/// by issuer. Avoids refetching the discovery document on every sign-in.
pub struct DiscoveryCache {
    client: reqwest::Client,
    ttl: Duration,
    entries: Mutex<std::collections::HashMap<String, CacheEntry>>,
}

impl DiscoveryCache {
    pub fn new(client: reqwest::Client, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            client,
            ttl,
            entries: Mutex::new(std::collections::HashMap::new()),
        })
    }

    pub async fn get(&self, issuer: &str) -> Result<ProviderMetadata, AuthError> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(issuer) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.metadata.clone());
            }
        }
        let metadata = ProviderMetadata::discover(issuer, &self.client).await?;
        entries.insert(
            issuer.to_string(),
            CacheEntry {
                metadata: metadata.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(metadata)
    }
}
