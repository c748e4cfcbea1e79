//! JWK Provider (C2) — verified JWK replica for access-token signature
//! validation.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::JwkConfig;
use crate::error::{Error, Result};

use super::spawn_refresh_loop;

/// A verified JWK, already converted into the form `jsonwebtoken` needs
/// to check a signature.
#[derive(Clone)]
pub struct VerifiedJwk {
    /// Signing algorithm this key was published for.
    pub algorithm: Algorithm,
    /// Decoding key derived from the JWK's key material.
    pub decoding_key: DecodingKey,
}

/// Read-only view the rest of the crate consumes.
pub trait JwkProvider: Send + Sync {
    /// Look up a verified JWK by its key id.
    fn get_key(&self, key_id: &str) -> Option<VerifiedJwk>;
}

/// Fetches every URL in [`JwkConfig::urls`] and merges their key sets
/// into one snapshot, keyed by `kid`.
pub struct HttpJwkProvider {
    http: reqwest::Client,
    config: JwkConfig,
    snapshot: ArcSwap<HashMap<String, VerifiedJwk>>,
}

impl HttpJwkProvider {
    /// Construct a provider with an empty snapshot.
    #[must_use]
    pub fn new(config: JwkConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            snapshot: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Blocking fetch-and-replace of the JWK snapshot from every
    /// configured URL. A single URL's failure does not abort the others;
    /// the call only errors if every URL failed.
    pub async fn update(&self) -> Result<()> {
        if self.config.urls.is_empty() {
            return Ok(());
        }

        let mut merged = HashMap::new();
        let mut last_err = None;

        for url in &self.config.urls {
            match self.fetch_one(url).await {
                Ok(keys) => merged.extend(keys),
                Err(e) => {
                    warn!(url = %url, error = %e, "jwk fetch failed");
                    last_err = Some(e);
                }
            }
        }

        if merged.is_empty() {
            if let Some(e) = last_err {
                return Err(e);
            }
        }

        self.snapshot.store(Arc::new(merged));
        debug!(count = self.snapshot.load().len(), "jwk snapshot refreshed");
        Ok(())
    }

    async fn fetch_one(&self, url: &str) -> Result<HashMap<String, VerifiedJwk>> {
        let set: JwkSet = self.http.get(url).send().await?.json().await?;
        let mut keys = HashMap::new();

        for jwk in set.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                continue;
            };
            let algorithm = jwk
                .common
                .key_algorithm
                .and_then(|alg| Algorithm::from_str_compat(alg.to_string().as_str()))
                .unwrap_or(Algorithm::RS256);
            let decoding_key = DecodingKey::from_jwk(&jwk)
                .map_err(|e| Error::Config(format!("malformed jwk {kid}: {e}")))?;
            keys.insert(kid, VerifiedJwk { algorithm, decoding_key });
        }

        Ok(keys)
    }

    /// Spawn the scheduled refresh loop.
    pub fn start(self: &Arc<Self>, token: CancellationToken) -> mpsc::Receiver<Result<()>> {
        let provider = Arc::clone(self);
        spawn_refresh_loop(
            "jwk",
            self.config.refresh_period,
            self.config.retry_delay,
            token,
            move || {
                let provider = Arc::clone(&provider);
                async move { provider.update().await }
            },
        )
    }
}

impl JwkProvider for HttpJwkProvider {
    fn get_key(&self, key_id: &str) -> Option<VerifiedJwk> {
        self.snapshot.load().get(key_id).cloned()
    }
}

trait AlgorithmFromStr {
    fn from_str_compat(s: &str) -> Option<Algorithm>;
}

impl AlgorithmFromStr for Algorithm {
    fn from_str_compat(s: &str) -> Option<Algorithm> {
        match s {
            "RS256" => Some(Algorithm::RS256),
            "RS384" => Some(Algorithm::RS384),
            "RS512" => Some(Algorithm::RS512),
            "ES256" => Some(Algorithm::ES256),
            "ES384" => Some(Algorithm::ES384),
            "PS256" => Some(Algorithm::PS256),
            "PS384" => Some(Algorithm::PS384),
            "PS512" => Some(Algorithm::PS512),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_key_on_empty_snapshot_returns_none() {
        let provider = HttpJwkProvider::new(JwkConfig::default());
        assert!(provider.get_key("kid-1").is_none());
    }

    #[tokio::test]
    async fn update_with_no_urls_is_a_no_op_success() {
        let provider = HttpJwkProvider::new(JwkConfig::default());
        assert!(provider.update().await.is_ok());
        assert!(provider.get_key("anything").is_none());
    }
}
