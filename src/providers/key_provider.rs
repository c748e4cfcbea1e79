//! Key Provider (C1) — verified signing-key replica for role tokens.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use base64::Engine as _;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::PubkeyConfig;
use crate::crypto::{PublicKeyMaterial, SigAlg};
use crate::error::{Error, Result};

use super::spawn_refresh_loop;

/// Read-only view the rest of the crate consumes. Lookups are pure,
/// non-blocking, and safe under concurrent reads (backed by an
/// `ArcSwap`'d snapshot — foreground reads never block a refresh).
pub trait KeyProvider: Send + Sync {
    /// Look up a verified public key by its key id.
    fn get_key(&self, key_id: &str) -> Option<PublicKeyMaterial>;
}

#[derive(Debug, Deserialize)]
struct PubkeyBundleResponse {
    keys: Vec<PubkeyEntry>,
}

#[derive(Debug, Deserialize)]
struct PubkeyEntry {
    id: String,
    alg: SigAlg,
    /// Raw key bytes, base64-encoded, already in the form
    /// [`PublicKeyMaterial::raw`] expects for `alg`.
    raw_base64: String,
}

/// The sole implementation: fetches `{athenz_url}/publickey/{domain}`,
/// with `If-None-Match` ETag reuse, and swaps an immutable snapshot in on
/// every successful change.
pub struct HttpKeyProvider {
    http: reqwest::Client,
    athenz_url: String,
    config: PubkeyConfig,
    snapshot: ArcSwap<HashMap<String, PublicKeyMaterial>>,
    etags: DashMap<String, (String, Instant)>,
}

impl HttpKeyProvider {
    /// Construct a provider with an empty snapshot; call [`Self::update`]
    /// (directly, or via [`Self::start`]) to populate it.
    #[must_use]
    pub fn new(athenz_url: impl Into<String>, config: PubkeyConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            athenz_url: athenz_url.into(),
            config,
            snapshot: ArcSwap::from_pointee(HashMap::new()),
            etags: DashMap::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/publickey/{}",
            self.athenz_url.trim_end_matches('/'),
            self.config.sys_auth_domain
        )
    }

    /// Blocking fetch-and-verify-replace of the public-key snapshot. Used
    /// once for warm-up (§4.7 Init) and by the scheduled refresh loop.
    pub async fn update(&self) -> Result<()> {
        self.purge_stale_etag();

        let mut request = self.http.get(self.endpoint());
        if let Some(entry) = self.etags.get(&self.config.sys_auth_domain) {
            request = request.header(reqwest::header::IF_NONE_MATCH, entry.0.clone());
        }

        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            debug!("public key bundle unchanged (304)");
            return Ok(());
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bundle: PubkeyBundleResponse = response.json().await?;

        let mut next = HashMap::with_capacity(bundle.keys.len());
        for entry in bundle.keys {
            let raw = base64::engine::general_purpose::STANDARD
                .decode(entry.raw_base64)
                .map_err(|e| Error::Config(format!("malformed public key bytes: {e}")))?;
            next.insert(entry.id, PublicKeyMaterial { alg: entry.alg, raw });
        }

        self.snapshot.store(Arc::new(next));
        if let Some(etag) = etag {
            self.etags
                .insert(self.config.sys_auth_domain.clone(), (etag, Instant::now()));
        }

        Ok(())
    }

    fn purge_stale_etag(&self) {
        self.etags.retain(|_, (_, cached_at)| {
            cached_at.elapsed() < self.config.etag_expiry + self.config.etag_purge_period
        });
    }

    /// Spawn the scheduled refresh loop; see [`super::spawn_refresh_loop`].
    pub fn start(self: &Arc<Self>, token: CancellationToken) -> mpsc::Receiver<Result<()>> {
        let provider = Arc::clone(self);
        spawn_refresh_loop(
            "pubkey",
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

impl KeyProvider for HttpKeyProvider {
    fn get_key(&self, key_id: &str) -> Option<PublicKeyMaterial> {
        self.snapshot.load().get(key_id).cloned()
    }
}
