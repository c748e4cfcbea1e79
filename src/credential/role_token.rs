//! Role token validator (C4) — the semicolon-delimited signed wire
//! format, verified against the Key Provider.
//!
//! `v=U1;d=<domain>;n=<name>;r=<role1,role2>;i=<issueTime>;
//! e=<expiryTime>;k=<keyId>;s=<signature>`, fields ASCII-sorted by key
//! before signing. Mirrors the real credential's property of being a
//! flat signed string rather than a JWT.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine as _;

use crate::error::{Error, Result};
use crate::providers::key_provider::KeyProvider;

/// A role token, successfully parsed and signature-verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedRoleToken {
    /// Principal name.
    pub name: String,
    /// Domain the token was issued in.
    pub domain: String,
    /// Roles granted.
    pub roles: Vec<String>,
    /// Issue time.
    pub issue_time: SystemTime,
    /// Expiry time.
    pub expiry_time: SystemTime,
}

/// Parses and verifies the semicolon-delimited role-token wire format.
pub struct RoleTokenCodec;

impl RoleTokenCodec {
    /// Serialize a token for signing/transport, given its already-sorted
    /// fields and a base64 signature. Exposed for tests and embedders
    /// constructing test fixtures against a real authority service.
    #[must_use]
    pub fn encode(
        domain: &str,
        name: &str,
        roles: &[String],
        issue_time: u64,
        expiry_time: u64,
        key_id: &str,
        signature_b64: &str,
    ) -> String {
        format!(
            "v=U1;d={domain};n={name};r={roles};i={issue_time};e={expiry_time};k={key_id};s={signature_b64}",
            roles = roles.join(","),
        )
    }

    /// The signed payload: every field except `s`, re-joined in the
    /// same order, exactly as it must have been signed.
    #[must_use]
    pub fn signing_input(raw: &str) -> Option<String> {
        let idx = raw.rfind(";s=")?;
        Some(raw[..idx].to_string())
    }

    fn parse_fields(raw: &str) -> Result<BTreeMap<String, String>> {
        let mut fields = BTreeMap::new();
        for part in raw.split(';') {
            let Some((key, value)) = part.split_once('=') else {
                return Err(Error::RoleTokenInvalid(format!("malformed field: {part}")));
            };
            fields.insert(key.to_string(), value.to_string());
        }
        Ok(fields)
    }
}

/// Validates role tokens against a [`KeyProvider`].
pub struct RoleTokenValidator<'a> {
    key_provider: &'a dyn KeyProvider,
}

impl<'a> RoleTokenValidator<'a> {
    /// Construct a validator backed by `key_provider`.
    #[must_use]
    pub fn new(key_provider: &'a dyn KeyProvider) -> Self {
        Self { key_provider }
    }

    /// Parse, signature-verify, and expiry-check a raw role token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RoleTokenInvalid`] on a malformed wire format,
    /// unknown signing key, bad signature, or an expired token.
    pub fn verify(&self, raw: &str) -> Result<VerifiedRoleToken> {
        let fields = RoleTokenCodec::parse_fields(raw)?;

        let get = |key: &str| {
            fields
                .get(key)
                .cloned()
                .ok_or_else(|| Error::RoleTokenInvalid(format!("missing field {key}")))
        };

        let version = get("v")?;
        if version != "U1" {
            return Err(Error::RoleTokenInvalid(format!("unsupported version {version}")));
        }
        let domain = get("d")?;
        let name = get("n")?;
        let roles: Vec<String> = get("r")?.split(',').map(str::to_string).collect();
        let issue_time: u64 = get("i")?
            .parse()
            .map_err(|_| Error::RoleTokenInvalid("malformed issue time".to_string()))?;
        let expiry_time: u64 = get("e")?
            .parse()
            .map_err(|_| Error::RoleTokenInvalid("malformed expiry time".to_string()))?;
        let key_id = get("k")?;
        let signature_b64 = get("s")?;

        let key = self
            .key_provider
            .get_key(&key_id)
            .ok_or_else(|| Error::RoleTokenInvalid(format!("unknown signing key {key_id}")))?;

        let signature = base64::engine::general_purpose::STANDARD
            .decode(&signature_b64)
            .map_err(|e| Error::RoleTokenInvalid(format!("malformed signature: {e}")))?;

        let signing_input = RoleTokenCodec::signing_input(raw)
            .ok_or_else(|| Error::RoleTokenInvalid("missing signature field".to_string()))?;

        key.verify(signing_input.as_bytes(), &signature)
            .map_err(|_| Error::RoleTokenInvalid("signature verification failed".to_string()))?;

        let expiry = UNIX_EPOCH + Duration::from_secs(expiry_time);
        if expiry <= SystemTime::now() {
            return Err(Error::RoleTokenInvalid("token expired".to_string()));
        }

        Ok(VerifiedRoleToken {
            name,
            domain,
            roles,
            issue_time: UNIX_EPOCH + Duration::from_secs(issue_time),
            expiry_time: expiry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{PublicKeyMaterial, SigAlg};
    use aws_lc_rs::rand::SystemRandom;
    use aws_lc_rs::signature::{EcdsaKeyPair, KeyPair as _, ECDSA_P256_SHA256_FIXED_SIGNING};

    struct FixedKey {
        id: String,
        material: PublicKeyMaterial,
    }

    impl KeyProvider for FixedKey {
        fn get_key(&self, key_id: &str) -> Option<PublicKeyMaterial> {
            (key_id == self.id).then(|| self.material.clone())
        }
    }

    fn keypair() -> EcdsaKeyPair {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng).unwrap();
        EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng).unwrap()
    }

    fn sign_and_build(domain: &str, name: &str, roles: &[&str], expiry_secs_from_now: i64) -> (String, FixedKey) {
        let pair = keypair();
        let rng = SystemRandom::new();
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        let expiry = (now as i64 + expiry_secs_from_now) as u64;
        let roles_str = roles.join(",");
        let unsigned = format!("v=U1;d={domain};n={name};r={roles_str};i={now};e={expiry};k=zts.0");
        let signature = pair.sign(&rng, unsigned.as_bytes()).unwrap();
        let signature_b64 = base64::engine::general_purpose::STANDARD.encode(signature.as_ref());
        let raw = format!("{unsigned};s={signature_b64}");

        let material = PublicKeyMaterial {
            alg: SigAlg::EcdsaP256Sha256,
            raw: pair.public_key().as_ref().to_vec(),
        };
        (raw, FixedKey { id: "zts.0".to_string(), material })
    }

    #[test]
    fn verifies_well_formed_signed_token() {
        let (raw, provider) = sign_and_build("home", "alice", &["admin"], 3600);
        let validator = RoleTokenValidator::new(&provider);
        let token = validator.verify(&raw).unwrap();
        assert_eq!(token.domain, "home");
        assert_eq!(token.name, "alice");
        assert_eq!(token.roles, vec!["admin".to_string()]);
    }

    #[test]
    fn rejects_expired_token() {
        let (raw, provider) = sign_and_build("home", "alice", &["admin"], -10);
        let validator = RoleTokenValidator::new(&provider);
        assert!(validator.verify(&raw).is_err());
    }

    #[test]
    fn rejects_tampered_payload() {
        let (raw, provider) = sign_and_build("home", "alice", &["admin"], 3600);
        let tampered = raw.replace("n=alice", "n=mallory");
        let validator = RoleTokenValidator::new(&provider);
        assert!(validator.verify(&tampered).is_err());
    }

    #[test]
    fn rejects_unknown_key_id() {
        let (raw, _provider) = sign_and_build("home", "alice", &["admin"], 3600);
        struct Empty;
        impl KeyProvider for Empty {
            fn get_key(&self, _key_id: &str) -> Option<PublicKeyMaterial> {
                None
            }
        }
        let validator = RoleTokenValidator::new(&Empty);
        assert!(validator.verify(&raw).is_err());
    }

    #[test]
    fn rejects_malformed_wire_format() {
        struct Empty;
        impl KeyProvider for Empty {
            fn get_key(&self, _key_id: &str) -> Option<PublicKeyMaterial> {
                None
            }
        }
        let validator = RoleTokenValidator::new(&Empty);
        assert!(validator.verify("not-a-role-token").is_err());
    }
}
