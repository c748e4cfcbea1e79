//! Role certificate validator (C4) — extracts `domain → roles` from a
//! DER-encoded X.509 certificate's Subject CN and URI SANs.

use std::collections::HashMap;
use std::time::SystemTime;

use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use crate::error::{Error, Result};

/// Identity extracted from a role certificate, grouped by domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleCertIdentity {
    /// Subject Common Name, verbatim (used for `client_id`/CN pairing).
    pub common_name: Option<String>,
    /// `domain → roles granted` extracted from the CN and role-URI SANs.
    pub roles_by_domain: HashMap<String, Vec<String>>,
    /// Certificate's `notBefore`, for the access-token backdate grace
    /// window.
    pub not_before: SystemTime,
}

impl RoleCertIdentity {
    /// Roles granted in `domain`, empty slice if the certificate carries
    /// none.
    #[must_use]
    pub fn roles_in(&self, domain: &str) -> &[String] {
        self.roles_by_domain
            .get(domain)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Parse a DER-encoded certificate and extract its role grants.
///
/// Roles come from two places, de-duplicated by `(domain, role)`:
/// - the Subject CN, if it contains `":role."` (split once into
///   `domain, role`);
/// - every URI SAN beginning with `uri_prefix`, with the remainder split
///   at the first `/` into `domain, role`.
///
/// # Errors
///
/// Returns [`Error::RoleCertInvalid`] if the certificate cannot be
/// parsed.
pub fn extract_cert_roles(der: &[u8], uri_prefix: &str) -> Result<RoleCertIdentity> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| Error::RoleCertInvalid(format!("malformed certificate: {e}")))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned);

    let mut roles_by_domain: HashMap<String, Vec<String>> = HashMap::new();
    let mut insert = |domain: String, role: String| {
        let roles = roles_by_domain.entry(domain).or_default();
        if !roles.contains(&role) {
            roles.push(role);
        }
    };

    if let Some(cn) = &common_name {
        if let Some((domain, role)) = cn.split_once(":role.") {
            insert(domain.to_string(), role.to_string());
        }
    }

    if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
        for name in &san_ext.value.general_names {
            if let GeneralName::URI(uri) = name {
                if let Some(rest) = uri.strip_prefix(uri_prefix) {
                    if let Some((domain, role)) = rest.split_once('/') {
                        insert(domain.to_string(), role.to_string());
                    }
                }
            }
        }
    }

    let not_before = u64::try_from(cert.validity().not_before.timestamp())
        .ok()
        .map(|secs| SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(secs))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    Ok(RoleCertIdentity {
        common_name,
        roles_by_domain,
        not_before,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DistinguishedName, DnType, Ia5String, KeyPair, SanType};

    fn make_cert_der(cn: &str, sans: &[SanType]) -> Vec<u8> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;
        params.subject_alt_names = sans.to_vec();

        let key_pair = KeyPair::generate().expect("key generation failed");
        let cert = params.self_signed(&key_pair).expect("self-sign failed");
        cert.der().to_vec()
    }

    fn uri_san(s: &str) -> SanType {
        SanType::URI(Ia5String::try_from(s).unwrap())
    }

    #[test]
    fn extracts_role_from_cn() {
        let der = make_cert_der("home:role.admin", &[]);
        let identity = extract_cert_roles(&der, "athenz://role/").unwrap();
        assert_eq!(identity.roles_in("home"), &["admin".to_string()]);
    }

    #[test]
    fn extracts_role_from_uri_san() {
        let der = make_cert_der("irrelevant", &[uri_san("athenz://role/home/admin")]);
        let identity = extract_cert_roles(&der, "athenz://role/").unwrap();
        assert_eq!(identity.roles_in("home"), &["admin".to_string()]);
    }

    #[test]
    fn merges_and_dedups_cn_and_san_roles() {
        let der = make_cert_der(
            "home:role.admin",
            &[uri_san("athenz://role/home/admin"), uri_san("athenz://role/home/viewer")],
        );
        let identity = extract_cert_roles(&der, "athenz://role/").unwrap();
        let mut roles = identity.roles_in("home").to_vec();
        roles.sort();
        assert_eq!(roles, vec!["admin".to_string(), "viewer".to_string()]);
    }

    #[test]
    fn san_not_matching_prefix_is_ignored() {
        let der = make_cert_der("irrelevant", &[uri_san("spiffe://home/admin")]);
        let identity = extract_cert_roles(&der, "athenz://role/").unwrap();
        assert!(identity.roles_by_domain.is_empty());
    }

    #[test]
    fn malformed_der_errors() {
        let result = extract_cert_roles(b"not a certificate", "athenz://role/");
        assert!(result.is_err());
    }
}
