//! Lifecycle Supervisor (C7) — synchronous warm-up (`init`) and the
//! supervised background refresh loops (`start`), §4.7.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::PrincipalCache;
use crate::error::{Error, Result};
use crate::providers::jwk_provider::HttpJwkProvider;
use crate::providers::key_provider::HttpKeyProvider;
use crate::providers::policy_store::HttpPolicyStore;

/// Fan-in error channel capacity for [`Supervisor::start`] (§4.7, §9
/// Open Question 2 — fixed, drop-on-full rather than grown or blocking).
const ERROR_CHANNEL_CAPACITY: usize = 200;

/// Owns the background refresh daemons and the cache sweeper, and
/// coordinates their startup and shutdown.
pub struct Supervisor {
    key_provider: Option<Arc<HttpKeyProvider>>,
    jwk_provider: Option<Arc<HttpJwkProvider>>,
    policy_store: Option<Arc<HttpPolicyStore>>,
    cache: Arc<PrincipalCache>,
    sweep_interval: Duration,
}

impl Supervisor {
    /// Construct a supervisor. Pass `None` for any provider whose
    /// refresher is disabled in configuration.
    #[must_use]
    pub fn new(
        key_provider: Option<Arc<HttpKeyProvider>>,
        jwk_provider: Option<Arc<HttpJwkProvider>>,
        policy_store: Option<Arc<HttpPolicyStore>>,
        cache: Arc<PrincipalCache>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            key_provider,
            jwk_provider,
            policy_store,
            cache,
            sweep_interval,
        }
    }

    /// Synchronous warm-up, in two concurrent groups: (a) key provider
    /// `update` then, on success, policy store `update`; (b) JWK
    /// provider `update`. Both groups must complete; the first error
    /// from either cancels the other group's token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LifecycleCancelled`] if `token` is already
    /// cancelled, or the first error from either warm-up group.
    pub async fn init(&self, token: CancellationToken) -> Result<()> {
        if token.is_cancelled() {
            return Err(Error::LifecycleCancelled);
        }

        let group_a = {
            let key_provider = self.key_provider.clone();
            let policy_store = self.policy_store.clone();
            let token = token.clone();
            async move {
                if let Some(key_provider) = key_provider {
                    key_provider
                        .update()
                        .await
                        .map_err(|e| e.into_refresh_failure("update pubkey"))?;
                }
                if !token.is_cancelled() {
                    if let Some(policy_store) = policy_store {
                        policy_store
                            .update()
                            .await
                            .map_err(|e| e.into_refresh_failure("update policy"))?;
                    }
                }
                Ok::<(), Error>(())
            }
        };

        let group_b = {
            let jwk_provider = self.jwk_provider.clone();
            async move {
                if let Some(jwk_provider) = jwk_provider {
                    jwk_provider
                        .update()
                        .await
                        .map_err(|e| e.into_refresh_failure("update jwk"))?;
                }
                Ok::<(), Error>(())
            }
        };

        let (result_a, result_b) = tokio::join!(group_a, group_b);

        match (result_a, result_b) {
            (Err(e), _) | (_, Err(e)) => {
                token.cancel();
                Err(e)
            }
            (Ok(()), Ok(())) => {
                debug!("lifecycle init complete");
                Ok(())
            }
        }
    }

    /// Launch the cache sweeper and every enabled provider's refresh
    /// loop; returns a buffered error channel (capacity 200, drop on
    /// full) into which refresh errors are fanned, each wrapped with an
    /// identifying prefix. Terminates only on `token` cancellation,
    /// at which point the sweeper stops, the cache is cleared, the
    /// cancellation error is written, and the channel is closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LifecycleCancelled`] if `token` is already
    /// cancelled.
    pub fn start(&self, token: CancellationToken) -> Result<mpsc::Receiver<Error>> {
        if token.is_cancelled() {
            return Err(Error::LifecycleCancelled);
        }

        let (tx, rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        if let Some(provider) = &self.key_provider {
            spawn_forwarder(provider.start(token.clone()), "update pubkey", tx.clone());
        }
        if let Some(provider) = &self.jwk_provider {
            spawn_forwarder(provider.start(token.clone()), "update jwk", tx.clone());
        }
        if let Some(provider) = &self.policy_store {
            spawn_forwarder(provider.start(token.clone()), "update policy", tx.clone());
        }

        let cache = Arc::clone(&self.cache);
        let sweep_interval = self.sweep_interval;
        let sweeper_token = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = sweeper_token.cancelled() => break,
                    _ = ticker.tick() => cache.sweep(),
                }
            }
            cache.clear();
            info!("cache sweeper stopped on cancellation");
        });

        tokio::spawn(async move {
            token.cancelled().await;
            let _ = tx.send(Error::LifecycleCancelled).await;
        });

        Ok(rx)
    }
}

fn spawn_forwarder(
    mut outcomes: mpsc::Receiver<Result<()>>,
    context: &'static str,
    errors: mpsc::Sender<Error>,
) {
    tokio::spawn(async move {
        while let Some(outcome) = outcomes.recv().await {
            #[cfg(feature = "metrics")]
            crate::metrics::record_refresh(context, outcome.is_ok());
            if let Err(e) = outcome {
                let wrapped = e.into_refresh_failure(context);
                if errors.try_send(wrapped).is_err() {
                    tracing::warn!(context, "refresh error dropped: error channel full or closed");
                }
            }
        }
    });
}
