//! Embeddable local authorizer for a cloud RBAC authority service.
//!
//! Replicates signing keys, JWKS, and signed domain policies from an
//! authority service in the background, then answers authorization
//! decisions entirely from local, atomically-swappable snapshots — no
//! network round trip on the request path. Modeled on the
//! key-provider/policy-store/credential-validator split of
//! AthenZ-style local authorizers.
//!
//! Three credential modalities are supported: role tokens (a flat
//! signed string), access tokens (JWT, with optional mTLS binding), and
//! role certificates (roles encoded in the certificate's CN/SANs).
//! [`AuthorizerBuilder`] assembles whichever modalities are enabled into
//! an [`Authorizer`]; [`Authorizer::init`] performs synchronous warm-up,
//! [`Authorizer::start`] launches the background refreshers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod credential;
pub mod crypto;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod mask;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod principal;
pub mod providers;
pub mod supervisor;

pub use config::Config;
pub use dispatcher::Request;
pub use engine::BindingCert;
pub use error::{Error, Result};
pub use principal::{AccessTokenPrincipal, Principal, TokenPrincipal};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cache::PrincipalCache;
use credential::Translator;
use dispatcher::Dispatcher;
use engine::Engine;
use providers::jwk_provider::HttpJwkProvider;
use providers::key_provider::HttpKeyProvider;
use providers::policy_store::{Assertion, HttpPolicyStore};
use providers::{JwkProvider, KeyProvider, PolicyStore};
use supervisor::Supervisor;

/// Install a `tracing` subscriber at `level` (e.g. `"info"`), optionally
/// in JSON format. Intended for embedders that don't already configure
/// `tracing` themselves.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::registry().with(filter);
    match format {
        Some("json") => subscriber.with(fmt::layer().json()).init(),
        _ => subscriber.with(fmt::layer()).init(),
    }
    Ok(())
}

/// Coercion-site helper: `Arc<HttpKeyProvider> -> Arc<dyn KeyProvider>`.
/// An explicit `as` cast cannot perform this unsizing for a smart
/// pointer; a function with a declared trait-object return type can.
fn as_key_provider(provider: Arc<HttpKeyProvider>) -> Arc<dyn KeyProvider> {
    provider
}

/// Coercion-site helper: `Arc<HttpPolicyStore> -> Arc<dyn PolicyStore>`.
fn as_policy_store(store: Arc<HttpPolicyStore>) -> Arc<dyn PolicyStore> {
    store
}

/// Assembles an [`Authorizer`] from a [`Config`] and an optional
/// [`Translator`].
pub struct AuthorizerBuilder {
    config: Config,
    translator: Option<Arc<dyn Translator>>,
}

impl AuthorizerBuilder {
    /// Start building from `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config, translator: None }
    }

    /// Supply a request-to-policy translator (§3 Mapping Rule).
    #[must_use]
    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Assemble the authorizer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoAuthorizers`] if every credential modality is
    /// disabled in `config`.
    pub fn build(self) -> Result<Authorizer> {
        let config = Arc::new(self.config);

        let key_provider = (!config.disable_pubkeyd)
            .then(|| Arc::new(HttpKeyProvider::new(config.athenz_url.clone(), config.pubkey.clone())));
        let jwk_provider = Arc::new(HttpJwkProvider::new(config.jwk.clone()));
        let policy_store = config.policy_evaluation_enabled().then(|| {
            let key_provider_for_policy = key_provider
                .clone()
                .map(as_key_provider)
                .unwrap_or_else(|| Arc::new(HttpKeyProvider::new(config.athenz_url.clone(), config.pubkey.clone())));
            Arc::new(HttpPolicyStore::new(
                config.athenz_url.clone(),
                config.athenz_domains.clone(),
                config.policy.clone(),
                key_provider_for_policy,
            ))
        });

        let cache = Arc::new(PrincipalCache::new());

        let key_provider_dyn: Arc<dyn KeyProvider> = key_provider
            .clone()
            .map(as_key_provider)
            .unwrap_or_else(|| Arc::new(HttpKeyProvider::new(config.athenz_url.clone(), config.pubkey.clone())));
        let jwk_provider_dyn: Arc<dyn JwkProvider> = jwk_provider.clone();
        let policy_store_dyn: Option<Arc<dyn PolicyStore>> = policy_store.clone().map(as_policy_store);

        let engine = Engine::new(
            Arc::clone(&config),
            key_provider_dyn,
            jwk_provider_dyn,
            policy_store_dyn,
            self.translator,
            Arc::clone(&cache),
        );

        let dispatcher = Dispatcher::new(
            config.enable_role_cert,
            config.access_token.enable,
            config.enable_role_token,
            config.role_auth_header.clone(),
        )?;

        let supervisor = Supervisor::new(
            key_provider,
            (!config.disable_jwkd).then_some(jwk_provider),
            policy_store,
            cache,
            config.sweep_interval(),
        );

        Ok(Authorizer { config, engine, dispatcher, supervisor })
    }
}

/// The embeddable, process-wide authorizer facade: owns the Lifecycle
/// Supervisor, the Authorization Engine, and the Request Dispatcher.
pub struct Authorizer {
    config: Arc<Config>,
    engine: Engine,
    dispatcher: Dispatcher,
    supervisor: Supervisor,
}

impl Authorizer {
    /// Synchronous warm-up; see [`Supervisor::init`].
    pub async fn init(&self, token: CancellationToken) -> Result<()> {
        self.supervisor.init(token).await
    }

    /// Launch the background refreshers and cache sweeper; see
    /// [`Supervisor::start`].
    pub fn start(&self, token: CancellationToken) -> Result<tokio::sync::mpsc::Receiver<Error>> {
        self.supervisor.start(token)
    }

    /// Verify `request` grants `(act, res)` via the dispatcher's
    /// OR-composition of enabled modalities.
    pub fn verify(&self, request: &Request, act: &str, res: &str) -> Result<()> {
        self.dispatcher.verify(&self.engine, request, act, res)
    }

    /// Authorize `request` against `(act, res)`; see [`Self::verify`].
    pub fn authorize(&self, request: &Request, act: &str, res: &str) -> Result<Principal> {
        self.dispatcher.authorize(&self.engine, request, act, res)
    }

    /// Verify a role token directly, bypassing the dispatcher.
    pub fn verify_role_token(&self, tok: &str, act: &str, res: &str, query: &str) -> Result<()> {
        self.engine.verify_role_token(tok, act, res, query)
    }

    /// Authorize a role token directly, bypassing the dispatcher.
    pub fn authorize_role_token(&self, tok: &str, act: &str, res: &str, query: &str) -> Result<Principal> {
        self.engine.authorize_role_token(tok, act, res, query)
    }

    /// Verify an access token directly, bypassing the dispatcher.
    pub fn verify_access_token(
        &self,
        tok: &str,
        act: &str,
        res: &str,
        query: &str,
        cert: Option<&BindingCert>,
    ) -> Result<()> {
        self.engine.verify_access_token(tok, act, res, query, cert)
    }

    /// Authorize an access token directly, bypassing the dispatcher.
    pub fn authorize_access_token(
        &self,
        tok: &str,
        act: &str,
        res: &str,
        query: &str,
        cert: Option<&BindingCert>,
    ) -> Result<Principal> {
        self.engine.authorize_access_token(tok, act, res, query, cert)
    }

    /// Verify peer certificates directly, bypassing the dispatcher.
    pub fn verify_role_cert(&self, peer_certs: &[Vec<u8>], act: &str, res: &str) -> Result<()> {
        self.engine.verify_role_cert(peer_certs, act, res)
    }

    /// Declared but intentionally unimplemented; see
    /// [`Engine::authorize_role_cert`].
    pub fn authorize_role_cert(&self, peer_certs: &[Vec<u8>], act: &str, res: &str) -> Result<Principal> {
        self.engine.authorize_role_cert(peer_certs, act, res)
    }

    /// Debug view of every domain's current assertion snapshot.
    #[must_use]
    pub fn get_policy_cache(&self) -> std::collections::HashMap<String, Vec<Assertion>> {
        self.engine.get_policy_cache()
    }

    /// Number of entries currently in the Principal Cache.
    #[must_use]
    pub fn principal_cache_len(&self) -> usize {
        self.engine.principal_cache_len()
    }

    /// Accounted byte size of the Principal Cache.
    #[must_use]
    pub fn principal_cache_size(&self) -> i64 {
        self.engine.principal_cache_size()
    }

    /// The configuration this authorizer was built from.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}
