//! Policy Store (C3) — verified per-domain assertion replica and the
//! deny-overrides-allow evaluator the Authorization Engine calls into.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use backon::{ExponentialBuilder, Retryable};
use base64::Engine as _;
use dashmap::DashMap;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PolicyConfig;
use crate::crypto::SigAlg;
use crate::error::{Error, Result};

use super::key_provider::KeyProvider;
use super::spawn_refresh_loop;

/// Effect of a policy assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Effect {
    /// Grants access when the assertion's action/resource glob matches.
    Allow,
    /// Revokes access when the assertion's action/resource glob matches,
    /// overriding any `Allow` for the same role.
    Deny,
}

/// A single policy assertion, scoped to the role named in `role`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assertion {
    /// Allow or deny.
    pub effect: Effect,
    /// Action glob (e.g. `"read"`, `"*"`).
    pub action: String,
    /// Resource glob (e.g. `"widgets.*"`).
    pub resource: String,
    /// Role this assertion applies to.
    pub role: String,
}

impl Assertion {
    fn matches(&self, role: &str, action: &str, resource: &str) -> bool {
        if self.role != role {
            return false;
        }
        Pattern::new(&self.action).is_ok_and(|p| p.matches(action))
            && Pattern::new(&self.resource).is_ok_and(|p| p.matches(resource))
    }
}

#[derive(Debug, Deserialize)]
struct SignedPolicyBundle {
    domain: String,
    key_id: String,
    algorithm: SigAlg,
    /// Base64-encoded signature over the canonical bytes of `policy_data`.
    signature: String,
    policy_data: PolicyData,
}

#[derive(Debug, Serialize, Deserialize)]
struct PolicyData {
    assertions: Vec<Assertion>,
}

struct DomainSnapshot {
    assertions: Vec<Assertion>,
    refreshed_at: Instant,
}

/// Read-only view the Authorization Engine consults on every decision.
pub trait PolicyStore: Send + Sync {
    /// Subset of `roles` that grant `(action, resource)` in `domain`
    /// under an `Allow` assertion and are not overridden by a `Deny`.
    ///
    /// Errors when the resulting set would be empty or a `Deny` fired
    /// for every candidate role.
    fn check_policy_roles(
        &self,
        domain: &str,
        roles: &[String],
        action: &str,
        resource: &str,
    ) -> Result<Vec<String>>;

    /// Boolean form: does any of `roles` grant `(action, resource)` in
    /// `domain`?
    fn check_policy(&self, domain: &str, roles: &[String], action: &str, resource: &str) -> Result<()> {
        self.check_policy_roles(domain, roles, action, resource).map(|_| ())
    }

    /// Debug view of every domain's current assertion snapshot.
    fn get_policy_cache(&self) -> HashMap<String, Vec<Assertion>>;
}

/// Fetches and verifies a signed policy bundle per configured domain,
/// keeping one [`ArcSwap`]'d snapshot per domain so a refresh of one
/// domain never blocks reads of another.
pub struct HttpPolicyStore {
    http: reqwest::Client,
    athenz_url: String,
    domains: Vec<String>,
    config: PolicyConfig,
    key_provider: Arc<dyn KeyProvider>,
    snapshots: DashMap<String, ArcSwap<DomainSnapshot>>,
}

impl HttpPolicyStore {
    /// Construct a store with an empty snapshot for every configured
    /// domain.
    #[must_use]
    pub fn new(
        athenz_url: impl Into<String>,
        domains: Vec<String>,
        config: PolicyConfig,
        key_provider: Arc<dyn KeyProvider>,
    ) -> Self {
        let snapshots = DashMap::new();
        for domain in &domains {
            snapshots.insert(
                domain.clone(),
                ArcSwap::from_pointee(DomainSnapshot {
                    assertions: Vec::new(),
                    refreshed_at: Instant::now(),
                }),
            );
        }
        Self {
            http: reqwest::Client::new(),
            athenz_url: athenz_url.into(),
            domains,
            config,
            key_provider,
            snapshots,
        }
    }

    fn endpoint(&self, domain: &str) -> String {
        format!(
            "{}/domain/{}/policy",
            self.athenz_url.trim_end_matches('/'),
            domain
        )
    }

    /// Fetch and verify every configured domain's bundle, replacing only
    /// the snapshots that verify successfully. Purges domains that have
    /// not refreshed within `purge_period`; retries a failing domain up
    /// to `retry_attempts` times, `retry_delay` apart, before giving up
    /// on that domain for this call.
    pub async fn update(&self) -> Result<()> {
        self.purge_stale();

        let mut last_err = None;
        for domain in &self.domains {
            if let Err(e) = self.update_domain(domain).await {
                warn!(domain = %domain, error = %e, "policy refresh failed");
                last_err = Some(e);
            }
        }

        match last_err {
            Some(e) if self.snapshots.is_empty() => Err(e),
            _ => Ok(()),
        }
    }

    async fn update_domain(&self, domain: &str) -> Result<()> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.config.retry_delay)
            .with_max_delay(self.config.retry_delay)
            .with_max_times(self.config.retry_attempts.saturating_sub(1) as usize);

        (|| self.fetch_and_verify(domain))
            .retry(backoff)
            .notify(|err: &Error, dur: Duration| {
                warn!(domain = %domain, error = %err, delay = ?dur, "policy fetch failed, retrying");
            })
            .await
    }

    async fn fetch_and_verify(&self, domain: &str) -> Result<()> {
        let bundle: SignedPolicyBundle = self
            .http
            .get(self.endpoint(domain))
            .send()
            .await?
            .json()
            .await?;

        if bundle.domain != domain {
            return Err(Error::Config(format!(
                "policy bundle domain mismatch: expected {domain}, got {}",
                bundle.domain
            )));
        }

        let key = self
            .key_provider
            .get_key(&bundle.key_id)
            .ok_or_else(|| Error::Config(format!("unknown policy signing key {}", bundle.key_id)))?;

        let signature = base64::engine::general_purpose::STANDARD
            .decode(&bundle.signature)
            .map_err(|e| Error::Config(format!("malformed policy signature: {e}")))?;
        let canonical = serde_json::to_vec(&bundle.policy_data)?;
        key.verify(&canonical, &signature)?;

        let snapshot = Arc::new(DomainSnapshot {
            assertions: bundle.policy_data.assertions,
            refreshed_at: Instant::now(),
        });
        match self.snapshots.get(domain) {
            Some(slot) => slot.store(snapshot),
            None => {
                self.snapshots
                    .insert(domain.to_string(), ArcSwap::new(snapshot));
            }
        }

        debug!(domain = %domain, "policy snapshot refreshed");
        Ok(())
    }

    fn purge_stale(&self) {
        let purge_period = self.config.purge_period;
        self.snapshots
            .retain(|_, slot| slot.load().refreshed_at.elapsed() < purge_period);
    }

    /// Spawn the scheduled refresh loop.
    pub fn start(self: &Arc<Self>, token: CancellationToken) -> mpsc::Receiver<Result<()>> {
        let store = Arc::clone(self);
        spawn_refresh_loop(
            "policy",
            self.config.refresh_period,
            self.config.retry_delay,
            token,
            move || {
                let store = Arc::clone(&store);
                async move { store.update().await }
            },
        )
    }
}

impl PolicyStore for HttpPolicyStore {
    fn check_policy_roles(
        &self,
        domain: &str,
        roles: &[String],
        action: &str,
        resource: &str,
    ) -> Result<Vec<String>> {
        let Some(slot) = self.snapshots.get(domain) else {
            return Err(Error::Unauthorized(format!("no policy snapshot for domain {domain}")));
        };
        let snapshot = slot.load();

        let mut authorized = Vec::new();

        for role in roles {
            let mut denied = false;
            let mut allowed = false;
            for assertion in &snapshot.assertions {
                if !assertion.matches(role, action, resource) {
                    continue;
                }
                match assertion.effect {
                    Effect::Deny => {
                        denied = true;
                        break;
                    }
                    Effect::Allow => allowed = true,
                }
            }
            if !denied && allowed {
                authorized.push(role.clone());
            }
        }

        if authorized.is_empty() {
            return Err(Error::Unauthorized(format!(
                "no role among {roles:?} grants {action} on {resource} in {domain}"
            )));
        }
        Ok(authorized)
    }

    fn get_policy_cache(&self) -> HashMap<String, Vec<Assertion>> {
        self.snapshots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load().assertions.clone()))
            .collect()
    }
}
