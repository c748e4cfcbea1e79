//! Authorization Engine (C6) — the per-modality `authorize`/`verify`
//! entry points, decision caching, and the `DecisionKey` (§3, §4.5).

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::PrincipalCache;
use crate::config::Config;
use crate::credential::access_token::AccessTokenValidator;
use crate::credential::role_cert::extract_cert_roles;
use crate::credential::role_token::RoleTokenValidator;
use crate::credential::Translator;
use crate::error::{Error, Result};
use crate::mask::{mask_decision_key, mask_secret};
use crate::principal::{AccessTokenPrincipal, Principal, TokenPrincipal};
use crate::providers::{JwkProvider, KeyProvider, PolicyStore};
use crate::providers::policy_store::Assertion;

/// A binding certificate presented alongside an access token: its DER
/// encoding (for thumbprint verification) plus the issuer/subject CN
/// pair the `DecisionKey` and client-id pairing check need.
#[derive(Debug, Clone)]
pub struct BindingCert {
    /// DER-encoded certificate bytes.
    pub der: Vec<u8>,
    /// Certificate issuer Common Name.
    pub issuer_cn: String,
    /// Certificate subject Common Name.
    pub subject_cn: String,
}

/// Build the `DecisionKey` string for a token-based call (§3).
fn decision_key(
    credential: &str,
    binding: Option<&BindingCert>,
    policy_enabled: bool,
    action: &str,
    resource: &str,
    translator_query: Option<&str>,
) -> String {
    let mut parts = vec![credential.to_string()];
    if let Some(cert) = binding {
        parts.push(cert.issuer_cn.clone());
        parts.push(cert.subject_cn.clone());
    }
    if policy_enabled {
        parts.push(action.to_string());
        parts.push(resource.to_string());
    }
    if let Some(query) = translator_query {
        if !query.is_empty() {
            parts.push(query.to_string());
        }
    }
    parts.join(":")
}

/// The decision engine: owns the Principal Cache and consults the
/// providers and Credential Validators to populate it on a miss.
pub struct Engine {
    config: Arc<Config>,
    key_provider: Arc<dyn KeyProvider>,
    jwk_provider: Arc<dyn JwkProvider>,
    policy_store: Option<Arc<dyn PolicyStore>>,
    translator: Option<Arc<dyn Translator>>,
    cache: Arc<PrincipalCache>,
}

impl Engine {
    /// Construct an engine. `policy_store` should be `None` when
    /// `config.policy_evaluation_enabled()` is `false`.
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        key_provider: Arc<dyn KeyProvider>,
        jwk_provider: Arc<dyn JwkProvider>,
        policy_store: Option<Arc<dyn PolicyStore>>,
        translator: Option<Arc<dyn Translator>>,
        cache: Arc<PrincipalCache>,
    ) -> Self {
        Self {
            config,
            key_provider,
            jwk_provider,
            policy_store,
            translator,
            cache,
        }
    }

    fn policy_enabled(&self) -> bool {
        self.config.policy_evaluation_enabled()
    }

    /// Verify a role token; discards the returned `Principal`.
    pub fn verify_role_token(&self, tok: &str, act: &str, res: &str, query: &str) -> Result<()> {
        self.authorize_role_token(tok, act, res, query).map(|_| ())
    }

    /// Authorize a role token (§4.5).
    pub fn authorize_role_token(&self, tok: &str, act: &str, res: &str, query: &str) -> Result<Principal> {
        let result = self.authorize_role_token_inner(tok, act, res, query);
        #[cfg(feature = "metrics")]
        crate::metrics::record_decision("role_token", result.is_ok());
        result
    }

    fn authorize_role_token_inner(&self, tok: &str, act: &str, res: &str, query: &str) -> Result<Principal> {
        if self.policy_enabled() && (act.is_empty() || res.is_empty()) {
            return Err(Error::InvalidParameters);
        }

        let translator_query = (self.translator.is_some() && !query.is_empty()).then_some(query);
        let key = decision_key(tok, None, self.policy_enabled(), act, res, translator_query);

        if let Some(principal) = self.cache.get(&key) {
            self.log_cache_hit(tok, &key, &principal, act, res);
            return Ok(principal);
        }

        let validator = RoleTokenValidator::new(self.key_provider.as_ref());
        let verified = validator.verify(tok)?;

        let mut token_principal = TokenPrincipal {
            name: verified.name,
            domain: verified.domain,
            roles: verified.roles,
            issue_time: system_time_to_unix(verified.issue_time),
            expiry_time: system_time_to_unix(verified.expiry_time),
            authorized_roles: Vec::new(),
        };

        if self.policy_enabled() {
            self.apply_policy(&mut token_principal, act, res, query)?;
        }

        let principal = Principal::Token(token_principal);
        self.insert_and_log(key, principal.clone(), act, res);
        Ok(principal)
    }

    /// Verify an access token; discards the returned `Principal`.
    pub fn verify_access_token(
        &self,
        tok: &str,
        act: &str,
        res: &str,
        query: &str,
        cert: Option<&BindingCert>,
    ) -> Result<()> {
        self.authorize_access_token(tok, act, res, query, cert).map(|_| ())
    }

    /// Authorize an access token (§4.5).
    pub fn authorize_access_token(
        &self,
        tok: &str,
        act: &str,
        res: &str,
        query: &str,
        cert: Option<&BindingCert>,
    ) -> Result<Principal> {
        let result = self.authorize_access_token_inner(tok, act, res, query, cert);
        #[cfg(feature = "metrics")]
        crate::metrics::record_decision("access_token", result.is_ok());
        result
    }

    fn authorize_access_token_inner(
        &self,
        tok: &str,
        act: &str,
        res: &str,
        query: &str,
        cert: Option<&BindingCert>,
    ) -> Result<Principal> {
        if self.policy_enabled() && (act.is_empty() || res.is_empty()) {
            return Err(Error::InvalidParameters);
        }

        let translator_query = (self.translator.is_some() && !query.is_empty()).then_some(query);
        let key = decision_key(tok, cert, self.policy_enabled(), act, res, translator_query);

        if let Some(principal) = self.cache.get(&key) {
            self.log_cache_hit(tok, &key, &principal, act, res);
            return Ok(principal);
        }

        let validator = AccessTokenValidator::new(self.jwk_provider.as_ref(), &self.config.access_token);
        let verified = validator.verify(tok, cert.map(|c| c.der.as_slice()), cert.map(|c| c.subject_cn.as_str()))?;

        let mut token_principal = TokenPrincipal {
            name: verified.name,
            domain: verified.domain,
            roles: verified.roles,
            issue_time: system_time_to_unix(verified.issue_time),
            expiry_time: system_time_to_unix(verified.expiry_time),
            authorized_roles: Vec::new(),
        };

        if self.policy_enabled() {
            self.apply_policy(&mut token_principal, act, res, query)?;
        }

        let principal = Principal::AccessToken(AccessTokenPrincipal {
            client_id: verified.client_id.unwrap_or_default(),
            token: token_principal,
        });
        self.insert_and_log(key, principal.clone(), act, res);
        Ok(principal)
    }

    /// Verify a set of peer certificates against `(act, res)` by
    /// extracting `domain -> roles` and checking policy for any domain
    /// (§4.5's separate role-certificate path).
    pub fn verify_role_cert(&self, peer_certs: &[Vec<u8>], act: &str, res: &str) -> Result<()> {
        let result = self.verify_role_cert_inner(peer_certs, act, res);
        #[cfg(feature = "metrics")]
        crate::metrics::record_decision("role_cert", result.is_ok());
        result
    }

    fn verify_role_cert_inner(&self, peer_certs: &[Vec<u8>], act: &str, res: &str) -> Result<()> {
        if !self.policy_enabled() {
            return Ok(());
        }

        let Some(policy_store) = &self.policy_store else {
            return Ok(());
        };

        let mut extracted_any = false;
        let mut last_err: Option<Error> = None;

        for der in peer_certs {
            let identity = match extract_cert_roles(der, &self.config.role_cert_uri_prefix) {
                Ok(identity) => identity,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };

            for (domain, roles) in &identity.roles_by_domain {
                extracted_any = true;
                match policy_store.check_policy(domain, roles, act, res) {
                    Ok(()) => return Ok(()),
                    Err(e) => last_err = Some(e),
                }
            }
        }

        if !extracted_any {
            return Err(Error::RoleCertInvalid("no roles extracted from peer certificates".to_string()));
        }

        Err(Error::RoleCertUnauthorized(
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "no domain authorized".to_string()),
        ))
    }

    /// Declared but intentionally unimplemented (§6, §9 Open Question 1).
    pub fn authorize_role_cert(&self, _peer_certs: &[Vec<u8>], _act: &str, _res: &str) -> Result<Principal> {
        #[cfg(feature = "metrics")]
        crate::metrics::record_decision("role_cert", false);
        Err(Error::NotImplemented)
    }

    /// Debug view of every domain's current assertion snapshot; empty
    /// when policy evaluation is disabled.
    #[must_use]
    pub fn get_policy_cache(&self) -> HashMap<String, Vec<Assertion>> {
        self.policy_store
            .as_ref()
            .map(|store| store.get_policy_cache())
            .unwrap_or_default()
    }

    /// Number of entries currently in the Principal Cache.
    #[must_use]
    pub fn principal_cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Accounted byte size of the Principal Cache.
    #[must_use]
    pub fn principal_cache_size(&self) -> i64 {
        self.cache.size()
    }

    fn apply_policy(&self, principal: &mut TokenPrincipal, act: &str, res: &str, query: &str) -> Result<()> {
        let Some(policy_store) = &self.policy_store else {
            return Ok(());
        };

        let (act, res) = if let Some(translator) = &self.translator {
            translator.translate(&principal.domain, act, res, query)?
        } else {
            (act.to_string(), res.to_string())
        };
        let res = format!("{}{res}", self.config.resource_prefix);

        let authorized = policy_store
            .check_policy_roles(&principal.domain, &principal.roles, &act, &res)
            .map_err(|e| Error::Unauthorized(e.to_string()))?;

        principal.authorized_roles = authorized;
        Ok(())
    }

    fn insert_and_log(&self, key: String, principal: Principal, act: &str, res: &str) {
        self.cache.insert(key, principal.clone(), self.config.cache_exp);
        #[cfg(feature = "metrics")]
        crate::metrics::record_cache_lookup(false);
        if self.config.output_authorized_principal_log {
            info!(
                "access authorized, principal: {}, action: {act}, resource: {res}",
                principal.name()
            );
        }
    }

    fn log_cache_hit(&self, tok: &str, key: &str, principal: &Principal, act: &str, res: &str) {
        #[cfg(feature = "metrics")]
        crate::metrics::record_cache_lookup(true);
        debug!(
            token = %mask_secret(tok),
            key = %mask_decision_key(key),
            "principal cache hit"
        );
        if self.config.output_authorized_principal_log {
            info!(
                "access authorized by cache, principal: {}, action: {act}, resource: {res}",
                principal.name()
            );
        }
    }
}

fn system_time_to_unix(time: std::time::SystemTime) -> i64 {
    time.duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
