//! Construction options (§6).
//!
//! [`Config`] carries every plain-data tunable from the construction
//! options table. It can be built programmatically (the primary path —
//! `Config::default().with_athenz_url(...)`) or loaded from YAML plus
//! environment overrides via [`Config::load`], mirroring the teacher's
//! `figment`-based `Config::load`.
//!
//! Trait-object collaborators (the translator) are not plain data and so
//! are not part of this struct — they are supplied separately to
//! [`crate::engine::AuthorizerBuilder`].

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level authorizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the authority service.
    pub athenz_url: String,
    /// Domains whose policies are replicated locally.
    pub athenz_domains: Vec<String>,
    /// Principal cache TTL.
    #[serde(with = "humantime_serde")]
    pub cache_exp: Duration,
    /// Disable the public-key refresher (C1).
    pub disable_pubkeyd: bool,
    /// Disable the policy refresher (C3). Also disables policy evaluation
    /// on the hot path — see [`Config::policy_evaluation_enabled`].
    pub disable_policyd: bool,
    /// Disable the JWK refresher (C2).
    pub disable_jwkd: bool,
    /// Public-key provider tuning.
    pub pubkey: PubkeyConfig,
    /// Policy store tuning.
    pub policy: PolicyConfig,
    /// JWK provider tuning.
    pub jwk: JwkConfig,
    /// Access-token modality configuration. `access_token.enable` gates
    /// the modality.
    pub access_token: AccessTokenParam,
    /// Enable the role-token modality.
    pub enable_role_token: bool,
    /// Header the role-token modality reads from an HTTP-like request.
    pub role_auth_header: String,
    /// Enable the role-certificate modality.
    pub enable_role_cert: bool,
    /// URI-SAN prefix recognised as a role URI.
    pub role_cert_uri_prefix: String,
    /// Fixed resource prefix prepended before policy evaluation.
    pub resource_prefix: String,
    /// Emit an INFO log line on every authorized decision.
    pub output_authorized_principal_log: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            athenz_url: String::new(),
            athenz_domains: Vec::new(),
            cache_exp: Duration::from_secs(60),
            disable_pubkeyd: false,
            disable_policyd: false,
            disable_jwkd: false,
            pubkey: PubkeyConfig::default(),
            policy: PolicyConfig::default(),
            jwk: JwkConfig::default(),
            access_token: AccessTokenParam::default(),
            enable_role_token: true,
            role_auth_header: "Athenz-Role-Auth".to_string(),
            enable_role_cert: false,
            role_cert_uri_prefix: "athenz://role/".to_string(),
            resource_prefix: String::new(),
            output_authorized_principal_log: false,
        }
    }
}

impl Config {
    /// Load configuration from an optional YAML file, overridden by
    /// `RBAC_AUTHORIZER_`-prefixed environment variables (`__` separates
    /// nested keys, matching the teacher's `figment` convention).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(figment::providers::Serialized::defaults(Self::default()));

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("RBAC_AUTHORIZER_").split("__"));

        figment.extract().map_err(|e| Error::Config(e.to_string()))
    }

    /// Whether the decision path should consult the Policy Store at all.
    ///
    /// Tied to the policy refresher being enabled: with no refresher there
    /// is no verified snapshot to evaluate against, so policy evaluation
    /// is implicitly off rather than erroring on every call.
    #[must_use]
    pub fn policy_evaluation_enabled(&self) -> bool {
        !self.disable_policyd
    }

    /// Cache sweep interval: half the decision TTL (§4.7).
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.cache_exp / 2
    }
}

/// Public-key provider (C1) tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PubkeyConfig {
    /// Interval between scheduled refreshes.
    #[serde(with = "humantime_serde")]
    pub refresh_period: Duration,
    /// Delay before retrying a failed refresh.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// How long a cached ETag is trusted before a forced re-fetch.
    #[serde(with = "humantime_serde")]
    pub etag_expiry: Duration,
    /// How often stale ETag entries are purged.
    #[serde(with = "humantime_serde")]
    pub etag_purge_period: Duration,
    /// Domain the public-key bundle itself is fetched and authenticated
    /// under (distinct from the domains whose *policies* are replicated).
    pub sys_auth_domain: String,
}

impl Default for PubkeyConfig {
    fn default() -> Self {
        Self {
            refresh_period: Duration::from_secs(24 * 60 * 60),
            retry_delay: Duration::from_secs(60),
            etag_expiry: Duration::from_secs(168 * 60 * 60),
            etag_purge_period: Duration::from_secs(24 * 60 * 60),
            sys_auth_domain: "sys.auth".to_string(),
        }
    }
}

/// Policy store (C3) tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Interval between scheduled refreshes.
    #[serde(with = "humantime_serde")]
    pub refresh_period: Duration,
    /// How often domains that have stopped refreshing are purged.
    #[serde(with = "humantime_serde")]
    pub purge_period: Duration,
    /// Margin before a bundle's stated expiry at which a proactive
    /// refresh is attempted.
    #[serde(with = "humantime_serde")]
    pub expiry_margin: Duration,
    /// Delay between retries within one `Update` call.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Maximum retries within one `Update` call.
    pub retry_attempts: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            refresh_period: Duration::from_secs(30 * 60),
            purge_period: Duration::from_secs(24 * 60 * 60),
            expiry_margin: Duration::from_secs(3 * 60 * 60),
            retry_delay: Duration::from_secs(5),
            retry_attempts: 3,
        }
    }
}

/// JWK provider (C2) tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwkConfig {
    /// Interval between scheduled refreshes.
    #[serde(with = "humantime_serde")]
    pub refresh_period: Duration,
    /// Delay before retrying a failed refresh.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// JWKS endpoint URLs to merge into one key set.
    pub urls: Vec<String>,
}

impl Default for JwkConfig {
    fn default() -> Self {
        Self {
            refresh_period: Duration::from_secs(60 * 60),
            retry_delay: Duration::from_secs(60),
            urls: Vec::new(),
        }
    }
}

/// Access-token modality configuration (§3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AccessTokenParam {
    /// Enable the access-token modality.
    pub enable: bool,
    /// Require the `cnf.x5t#S256` thumbprint to match the bound
    /// certificate (subject to the backdate/offset grace window).
    pub verify_cert_thumbprint: bool,
    /// Require `client_id` / certificate CN pairing.
    pub verify_client_id: bool,
    /// `client_id` → allowed certificate CNs.
    pub authorized_client_ids: HashMap<String, HashSet<String>>,
    /// Grace window: certificate may have been issued up to this long
    /// before the token's `iat`.
    #[serde(with = "humantime_serde")]
    pub cert_backdate_dur: Duration,
    /// Grace window: current time must be within this long of the
    /// token's `iat` for the backdate grace path to apply.
    #[serde(with = "humantime_serde")]
    pub cert_offset_dur: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_policy_evaluation_enabled() {
        let config = Config::default();
        assert!(config.policy_evaluation_enabled());
    }

    #[test]
    fn disabling_policyd_disables_policy_evaluation() {
        let mut config = Config::default();
        config.disable_policyd = true;
        assert!(!config.policy_evaluation_enabled());
    }

    #[test]
    fn sweep_interval_is_half_cache_exp() {
        let config = Config::default();
        assert_eq!(config.sweep_interval(), config.cache_exp / 2);
    }

    #[test]
    fn load_missing_file_errors() {
        let result = Config::load(Some(Path::new("/nonexistent/config.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn load_with_no_path_uses_defaults() {
        let config = Config::load(None).expect("default load should succeed");
        assert_eq!(config.cache_exp, Duration::from_secs(60));
    }

    #[test]
    fn load_merges_yaml_file_over_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "athenz_url: https://athenz.example.test\nenable_role_cert: false\n")
            .expect("write config");

        let config = Config::load(Some(&path)).expect("load should succeed");
        assert_eq!(config.athenz_url, "https://athenz.example.test");
        assert!(!config.enable_role_cert);
        assert!(config.enable_role_token, "unset fields should keep their default");
    }
}
