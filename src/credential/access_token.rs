//! Access token validator (C4) — JWT verification against the JWK
//! Provider, plus the certificate-binding and client-id pairing checks.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use jsonwebtoken::{decode_header, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::AccessTokenParam;
use crate::error::{Error, Result};
use crate::providers::jwk_provider::JwkProvider;

/// Confirmation-method claim carrying the certificate-thumbprint
/// binding (RFC 8705).
#[derive(Debug, Deserialize, Default)]
struct Confirmation {
    #[serde(rename = "x5t#S256")]
    x5t_s256: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    scope: Option<String>,
    iss: String,
    exp: u64,
    iat: u64,
    client_id: Option<String>,
    #[serde(default)]
    cnf: Confirmation,
}

/// An access token, successfully parsed and signature-verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAccessToken {
    /// Principal name (the `sub` claim).
    pub name: String,
    /// Domain the token was issued in (derived from `iss`).
    pub domain: String,
    /// Roles granted (derived from the `scope` claim).
    pub roles: Vec<String>,
    /// Issue time.
    pub issue_time: SystemTime,
    /// Expiry time.
    pub expiry_time: SystemTime,
    /// OAuth `client_id`, when present.
    pub client_id: Option<String>,
}

/// Validates access tokens against a [`JwkProvider`] and an optional
/// binding certificate.
pub struct AccessTokenValidator<'a> {
    jwk_provider: &'a dyn JwkProvider,
    params: &'a AccessTokenParam,
}

impl<'a> AccessTokenValidator<'a> {
    /// Construct a validator backed by `jwk_provider` and `params`.
    #[must_use]
    pub fn new(jwk_provider: &'a dyn JwkProvider, params: &'a AccessTokenParam) -> Self {
        Self { jwk_provider, params }
    }

    /// Verify `raw`'s signature, claims, and (if configured) certificate
    /// binding / client-id pairing.
    ///
    /// `cert_der` is the DER-encoded binding certificate, if the caller
    /// presented one alongside the token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccessTokenInvalid`] for any verification
    /// failure: bad signature, expired token, thumbprint mismatch
    /// outside the grace window, or a client-id/CN pairing mismatch.
    pub fn verify(
        &self,
        raw: &str,
        cert_der: Option<&[u8]>,
        cert_cn: Option<&str>,
    ) -> Result<VerifiedAccessToken> {
        let header = decode_header(raw).map_err(|e| Error::AccessTokenInvalid(e.to_string()))?;
        let key_id = header
            .kid
            .ok_or_else(|| Error::AccessTokenInvalid("missing kid".to_string()))?;

        let verified_key = self
            .jwk_provider
            .get_key(&key_id)
            .ok_or_else(|| Error::AccessTokenInvalid(format!("unknown signing key {key_id}")))?;

        let mut validation = Validation::new(verified_key.algorithm);
        validation.validate_aud = false;

        let token_data = jsonwebtoken::decode::<Claims>(raw, &verified_key.decoding_key, &validation)
            .map_err(|e| Error::AccessTokenInvalid(e.to_string()))?;
        let claims = token_data.claims;

        if self.params.verify_cert_thumbprint {
            self.verify_thumbprint(&claims, cert_der)?;
        }

        if self.params.verify_client_id {
            self.verify_client_pairing(&claims, cert_cn)?;
        }

        let domain = claims
            .iss
            .rsplit('/')
            .next()
            .unwrap_or(&claims.iss)
            .to_string();
        let roles = claims
            .scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Ok(VerifiedAccessToken {
            name: claims.sub,
            domain,
            roles,
            issue_time: UNIX_EPOCH + Duration::from_secs(claims.iat),
            expiry_time: UNIX_EPOCH + Duration::from_secs(claims.exp),
            client_id: claims.client_id,
        })
    }

    fn verify_thumbprint(&self, claims: &Claims, cert_der: Option<&[u8]>) -> Result<()> {
        let Some(expected) = &claims.cnf.x5t_s256 else {
            return Err(Error::AccessTokenInvalid(
                "certificate thumbprint required but token carries none".to_string(),
            ));
        };
        let Some(der) = cert_der else {
            return Err(Error::AccessTokenInvalid("error mTLS client certificate is nil".to_string()));
        };

        let actual = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(Sha256::digest(der));
        if &actual == expected {
            return Ok(());
        }

        self.verify_backdate_grace(claims, der)
    }

    fn verify_backdate_grace(&self, claims: &Claims, der: &[u8]) -> Result<()> {
        let identity = crate::credential::role_cert::extract_cert_roles(der, "athenz://role/")
            .map_err(|_| Error::AccessTokenInvalid("thumbprint mismatch".to_string()))?;

        let issued_at = UNIX_EPOCH + Duration::from_secs(claims.iat);
        // `not_before >= issued_at` means the cert was rotated in after the
        // token was minted, not before it — not backdated at all, so this
        // check trivially passes and the `cert_offset_dur` check below
        // bounds the window instead.
        let cert_age_at_issuance = issued_at
            .duration_since(identity.not_before)
            .unwrap_or(Duration::ZERO);
        if cert_age_at_issuance > self.params.cert_backdate_dur {
            return Err(Error::AccessTokenInvalid(
                "thumbprint mismatch and certificate predates backdate grace window".to_string(),
            ));
        }

        let now_offset = SystemTime::now()
            .duration_since(issued_at)
            .unwrap_or(Duration::MAX);
        if now_offset > self.params.cert_offset_dur {
            return Err(Error::AccessTokenInvalid(
                "thumbprint mismatch and token issuance is outside the rotation grace window".to_string(),
            ));
        }

        Ok(())
    }

    fn verify_client_pairing(&self, claims: &Claims, cert_cn: Option<&str>) -> Result<()> {
        let client_id = claims
            .client_id
            .as_deref()
            .ok_or_else(|| Error::AccessTokenInvalid("missing client_id".to_string()))?;
        let cn = cert_cn
            .ok_or_else(|| Error::AccessTokenInvalid("error mTLS client certificate is nil".to_string()))?;

        let allowed = self
            .params
            .authorized_client_ids
            .get(client_id)
            .ok_or_else(|| Error::AccessTokenInvalid(format!("unrecognised client_id {client_id}")))?;

        if allowed.contains(cn) {
            Ok(())
        } else {
            Err(Error::AccessTokenInvalid(format!(
                "certificate CN {cn} not authorized for client_id {client_id}"
            )))
        }
    }
}
