//! End-to-end scenarios against fake providers: role-token and
//! access-token authorization with caching, role-certificate policy
//! checks, and lifecycle cancellation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aws_lc_rs::rand::SystemRandom;
use aws_lc_rs::signature::{EcdsaKeyPair, KeyPair as _, ECDSA_P256_SHA256_FIXED_SIGNING};
use base64::Engine as _;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use rcgen::{CertificateParams, DistinguishedName, DnType, Ia5String, KeyPair as RcgenKeyPair, SanType};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use rbac_authorizer::cache::PrincipalCache;
use rbac_authorizer::config::Config;
use rbac_authorizer::crypto::{PublicKeyMaterial, SigAlg};
use rbac_authorizer::credential::role_token::RoleTokenCodec;
use rbac_authorizer::engine::{BindingCert, Engine};
use rbac_authorizer::error::Error;
use rbac_authorizer::providers::jwk_provider::VerifiedJwk;
use rbac_authorizer::providers::policy_store::Assertion;
use rbac_authorizer::providers::{JwkProvider, KeyProvider, PolicyStore};
use rbac_authorizer::{Authorizer, AuthorizerBuilder};

struct CountingRoleKey {
    id: String,
    material: PublicKeyMaterial,
    calls: AtomicUsize,
}

impl KeyProvider for CountingRoleKey {
    fn get_key(&self, key_id: &str) -> Option<PublicKeyMaterial> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (key_id == self.id).then(|| self.material.clone())
    }
}

struct EmptyJwk;
impl JwkProvider for EmptyJwk {
    fn get_key(&self, _key_id: &str) -> Option<VerifiedJwk> {
        None
    }
}

/// A `KeyProvider` stand-in for scenarios that never reach a
/// role-token signature check.
struct EmptyRoleKey;
impl KeyProvider for EmptyRoleKey {
    fn get_key(&self, _key_id: &str) -> Option<PublicKeyMaterial> {
        None
    }
}

struct FixedJwk {
    key_id: String,
    jwk: VerifiedJwk,
    calls: AtomicUsize,
}

impl JwkProvider for FixedJwk {
    fn get_key(&self, key_id: &str) -> Option<VerifiedJwk> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (key_id == self.key_id).then(|| self.jwk.clone())
    }
}

/// Grants whatever `(domain, action, resource)` it was constructed
/// with, counting invocations so cache-hit tests can assert it was
/// only consulted once.
struct CountingPolicy {
    domain: String,
    action: String,
    resource: String,
    calls: AtomicUsize,
}

impl PolicyStore for CountingPolicy {
    fn check_policy_roles(
        &self,
        domain: &str,
        roles: &[String],
        action: &str,
        resource: &str,
    ) -> rbac_authorizer::error::Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if domain == self.domain && action == self.action && resource == self.resource {
            Ok(roles.to_vec())
        } else {
            Err(Error::Unauthorized("no match".to_string()))
        }
    }

    fn get_policy_cache(&self) -> HashMap<String, Vec<Assertion>> {
        HashMap::new()
    }
}

/// Records the last `(domain, roles)` pair it was asked about and
/// always grants it — used for the role-certificate scenario, where
/// the assertion is about *which* domain/roles were extracted, not
/// about a particular policy outcome.
struct RecordingPolicy {
    last_call: Mutex<Option<(String, Vec<String>)>>,
}

impl PolicyStore for RecordingPolicy {
    fn check_policy_roles(
        &self,
        domain: &str,
        roles: &[String],
        _action: &str,
        _resource: &str,
    ) -> rbac_authorizer::error::Result<Vec<String>> {
        *self.last_call.lock().unwrap() = Some((domain.to_string(), roles.to_vec()));
        Ok(roles.to_vec())
    }

    fn get_policy_cache(&self) -> HashMap<String, Vec<Assertion>> {
        HashMap::new()
    }
}

fn role_token_keypair() -> EcdsaKeyPair {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng).unwrap();
    EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng).unwrap()
}

fn signed_role_token(domain: &str, name: &str, roles: &[&str]) -> (String, CountingRoleKey) {
    let pair = role_token_keypair();
    let rng = SystemRandom::new();
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    let roles_joined = roles.join(",");
    let unsigned = format!("v=U1;d={domain};n={name};r={roles_joined};i={now};e={};k=zts.0", now + 3600);
    let signature = pair.sign(&rng, unsigned.as_bytes()).unwrap();
    let signature_b64 = base64::engine::general_purpose::STANDARD.encode(signature.as_ref());
    let raw = RoleTokenCodec::encode(domain, name, &roles.iter().map(|r| r.to_string()).collect::<Vec<_>>(), now, now + 3600, "zts.0", &signature_b64);

    let material = PublicKeyMaterial {
        alg: SigAlg::EcdsaP256Sha256,
        raw: pair.public_key().as_ref().to_vec(),
    };
    (raw, CountingRoleKey { id: "zts.0".to_string(), material, calls: AtomicUsize::new(0) })
}

#[derive(Serialize)]
struct Confirmation {
    #[serde(rename = "x5t#S256")]
    x5t_s256: Option<String>,
}

#[derive(Serialize)]
struct AccessClaims {
    sub: String,
    scope: String,
    iss: String,
    exp: u64,
    iat: u64,
    client_id: Option<String>,
    cnf: Confirmation,
}

fn signed_access_token(thumbprint: Option<&str>) -> (String, FixedJwk) {
    let secret = b"end-to-end-test-hmac-secret";
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    let claims = AccessClaims {
        sub: "alice".to_string(),
        scope: "admin".to_string(),
        iss: "https://authority.example/zts/v1/home".to_string(),
        exp: now + 3600,
        iat: now - 10,
        client_id: None,
        cnf: Confirmation { x5t_s256: thumbprint.map(str::to_string) },
    };
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("key-1".to_string());
    let token = jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(secret)).unwrap();
    let jwk = FixedJwk {
        key_id: "key-1".to_string(),
        jwk: VerifiedJwk { algorithm: Algorithm::HS256, decoding_key: DecodingKey::from_secret(secret) },
        calls: AtomicUsize::new(0),
    };
    (token, jwk)
}

fn role_cert_der(domain: &str, roles: &[&str]) -> Vec<u8> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "irrelevant");
    params.distinguished_name = dn;
    params.subject_alt_names = roles
        .iter()
        .map(|role| SanType::URI(Ia5String::try_from(format!("athenz://role/{domain}/{role}")).unwrap()))
        .collect();
    let key_pair = RcgenKeyPair::generate().expect("key generation failed");
    let cert = params.self_signed(&key_pair).expect("self-sign failed");
    cert.der().to_vec()
}

/// E1/E2: a valid role token is authorized, cached under the expected
/// key, and a repeat call hits the cache without re-invoking either
/// collaborator.
#[test]
fn role_token_authorized_then_cached() {
    let (tok, key_provider) = signed_role_token("home", "alice", &["admin"]);
    let config = Arc::new(Config::default());
    let policy = Arc::new(CountingPolicy {
        domain: "home".to_string(),
        action: "a".to_string(),
        resource: "r".to_string(),
        calls: AtomicUsize::new(0),
    });
    let engine = Engine::new(
        config,
        Arc::new(key_provider),
        Arc::new(EmptyJwk),
        Some(policy.clone()),
        None,
        Arc::new(PrincipalCache::new()),
    );

    let first = engine.authorize_role_token(&tok, "a", "r", "").expect("first call should succeed");
    assert_eq!(first.name(), "alice");
    assert_eq!(engine.principal_cache_len(), 1);
    assert_eq!(policy.calls.load(Ordering::SeqCst), 1);

    let second = engine.authorize_role_token(&tok, "a", "r", "").expect("cached call should succeed");
    assert_eq!(second.name(), "alice");
    assert_eq!(policy.calls.load(Ordering::SeqCst), 1, "cache hit must not re-consult the policy store");
}

/// E3: with policy evaluation disabled, an empty action/resource is
/// accepted and the cache key degenerates to the bare token.
#[test]
fn role_token_with_policy_disabled_uses_bare_cache_key() {
    let (tok, key_provider) = signed_role_token("home", "alice", &["admin"]);
    let mut config = Config::default();
    config.disable_policyd = true;
    let engine = Engine::new(
        Arc::new(config),
        Arc::new(key_provider),
        Arc::new(EmptyJwk),
        None,
        None,
        Arc::new(PrincipalCache::new()),
    );

    let result = engine.authorize_role_token(&tok, "", "", "");
    assert!(result.is_ok());
    assert_eq!(engine.principal_cache_len(), 1);
}

/// E4: policy evaluation enabled but action is empty errors before any
/// validator or cache work happens.
#[test]
fn role_token_empty_action_errors_with_policy_enabled() {
    let config = Arc::new(Config::default());
    let engine = Engine::new(
        config,
        Arc::new(EmptyRoleKey),
        Arc::new(EmptyJwk),
        None,
        None,
        Arc::new(PrincipalCache::new()),
    );
    let result = engine.authorize_role_token("not-even-parsed", "", "r", "");
    assert!(matches!(result, Err(Error::InvalidParameters)));
    assert_eq!(engine.principal_cache_len(), 0);
}

/// E5: an access token presented with a binding certificate authorizes
/// and caches under a key that includes the certificate's issuer and
/// subject CNs; a repeat call is a cache hit.
#[test]
fn access_token_with_binding_cert_authorized_then_cached() {
    let (tok, jwk_provider) = signed_access_token(None);
    let cert = BindingCert { der: vec![], issuer_cn: "issuer cn".to_string(), subject_cn: "subject cn".to_string() };
    let policy = Arc::new(CountingPolicy {
        domain: "home".to_string(),
        action: "a".to_string(),
        resource: "r".to_string(),
        calls: AtomicUsize::new(0),
    });
    let engine = Engine::new(
        Arc::new(Config::default()),
        Arc::new(EmptyRoleKey),
        Arc::new(jwk_provider),
        Some(policy.clone()),
        None,
        Arc::new(PrincipalCache::new()),
    );

    let first = engine.authorize_access_token(&tok, "a", "r", "", Some(&cert)).expect("should authorize");
    assert_eq!(first.name(), "alice");
    assert_eq!(engine.principal_cache_len(), 1);

    let second = engine.authorize_access_token(&tok, "a", "r", "", Some(&cert)).expect("cache hit should succeed");
    assert_eq!(second.name(), "alice");
    assert_eq!(policy.calls.load(Ordering::SeqCst), 1, "cache hit must not re-consult the policy store");
}

/// E6: the same token carries a certificate thumbprint binding, but no
/// certificate is presented this time — the validator reports the
/// well-known "nil mTLS certificate" error.
#[test]
fn access_token_requiring_thumbprint_without_cert_errors() {
    let (tok, jwk_provider) = signed_access_token(Some("some-thumbprint"));
    let mut config = Config::default();
    config.access_token.verify_cert_thumbprint = true;
    let engine = Engine::new(
        Arc::new(config),
        Arc::new(EmptyRoleKey),
        Arc::new(jwk_provider),
        None,
        None,
        Arc::new(PrincipalCache::new()),
    );

    let result = engine.authorize_access_token(&tok, "a", "r", "", None);
    let err = result.expect_err("missing certificate should be rejected");
    assert_eq!(err.to_string(), "error authorize access token: error mTLS client certificate is nil");
}

/// E7: a role certificate carrying two role URI SANs for one domain
/// authorizes once the policy store grants both extracted roles.
#[test]
fn role_cert_with_two_role_sans_is_verified() {
    let der = role_cert_der("coretech", &["readers", "writers"]);
    let policy = Arc::new(RecordingPolicy { last_call: Mutex::new(None) });
    let config = Arc::new(Config::default());
    let engine = Engine::new(
        config,
        Arc::new(EmptyRoleKey),
        Arc::new(EmptyJwk),
        Some(policy.clone()),
        None,
        Arc::new(PrincipalCache::new()),
    );

    let result = engine.verify_role_cert(&[der], "a", "r");
    assert!(result.is_ok());

    let (domain, mut roles) = policy.last_call.lock().unwrap().clone().expect("policy should have been consulted");
    roles.sort();
    assert_eq!(domain, "coretech");
    assert_eq!(roles, vec!["readers".to_string(), "writers".to_string()]);
}

/// E8: once the lifecycle token is cancelled, the error channel
/// reports the cancellation as its final value and then closes.
#[tokio::test]
async fn lifecycle_cancellation_reports_final_error_and_closes_channel() {
    let mut config = Config::default();
    config.disable_pubkeyd = true;
    config.disable_jwkd = true;
    config.disable_policyd = true;
    config.cache_exp = Duration::from_millis(100);

    let authorizer: Authorizer = AuthorizerBuilder::new(config).build().expect("build should succeed");
    let token = CancellationToken::new();
    let mut errors = authorizer.start(token.clone()).expect("start should succeed");

    token.cancel();
    let last = errors.recv().await;
    assert!(matches!(last, Some(Error::LifecycleCancelled)));
    assert!(errors.recv().await.is_none(), "channel should close after cancellation");
}

