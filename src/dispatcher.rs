//! Request Dispatcher (C8) — composes the enabled credential modalities
//! into a fixed-order OR chain over an HTTP-like [`Request`] (§4.6).

use std::collections::HashMap;

use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::engine::{BindingCert, Engine};
use crate::error::{Error, Result};
use crate::principal::Principal;

/// Extract `(issuer CN, subject CN)` from a DER-encoded certificate,
/// for the `DecisionKey`'s binding-cert segment (§3).
fn parse_issuer_and_subject_cn(der: &[u8]) -> Option<(String, String)> {
    let (_, cert) = X509Certificate::from_der(der).ok()?;
    let issuer_cn = cert
        .issuer()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .unwrap_or_default()
        .to_string();
    let subject_cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .unwrap_or_default()
        .to_string();
    Some((issuer_cn, subject_cn))
}

/// A minimal HTTP-like request: header map, raw query string, and peer
/// certificate DER blobs (from TLS). An embedder builds this from its
/// own web framework's request type; the core depends on no specific
/// HTTP server crate.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Header name -> value, as presented on the wire.
    pub headers: HashMap<String, String>,
    /// Raw query string (no leading `?`), empty if none.
    pub query: String,
    /// Peer certificate chain, leaf first, DER-encoded.
    pub peer_certificates: Vec<Vec<u8>>,
}

impl Request {
    fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get("Authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
    }

    fn role_token(&self, header: &str) -> Option<&str> {
        self.headers.get(header).map(String::as_str)
    }

    fn binding_cert(&self) -> Option<BindingCert> {
        let der = self.peer_certificates.first()?;
        let (issuer_cn, subject_cn) = parse_issuer_and_subject_cn(der)?;
        Some(BindingCert { der: der.clone(), issuer_cn, subject_cn })
    }
}

/// Which modalities are enabled, in the fixed evaluation order
/// (role-cert, access-token, role-token).
struct EnabledModalities {
    role_cert: bool,
    access_token: bool,
    role_token: bool,
}

/// Dispatches a [`Request`] through every enabled modality in fixed
/// order, returning on the first success.
pub struct Dispatcher {
    enabled: EnabledModalities,
    role_auth_header: String,
}

impl Dispatcher {
    /// Construct a dispatcher from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoAuthorizers`] if every modality is disabled.
    pub fn new(
        enable_role_cert: bool,
        access_token_enabled: bool,
        enable_role_token: bool,
        role_auth_header: String,
    ) -> Result<Self> {
        if !enable_role_cert && !access_token_enabled && !enable_role_token {
            return Err(Error::NoAuthorizers);
        }
        Ok(Self {
            enabled: EnabledModalities {
                role_cert: enable_role_cert,
                access_token: access_token_enabled,
                role_token: enable_role_token,
            },
            role_auth_header,
        })
    }

    /// Verify `request` grants `(act, res)` via whichever enabled
    /// modality succeeds first.
    ///
    /// Unlike [`Self::authorize`], the role-certificate branch uses
    /// [`Engine::verify_role_cert`] directly rather than going through
    /// the unimplemented [`Engine::authorize_role_cert`] stub, so role
    /// certificates are usable through the dispatcher for verification
    /// even though they cannot yet produce a dispatched `Principal`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCredentials`] if every enabled modality
    /// fails.
    pub fn verify(&self, engine: &Engine, request: &Request, act: &str, res: &str) -> Result<()> {
        if self.enabled.role_cert
            && !request.peer_certificates.is_empty()
            && engine.verify_role_cert(&request.peer_certificates, act, res).is_ok()
        {
            return Ok(());
        }

        if self.enabled.access_token {
            if let Some(token) = request.bearer_token() {
                let binding = request.binding_cert();
                if engine
                    .verify_access_token(token, act, res, &request.query, binding.as_ref())
                    .is_ok()
                {
                    return Ok(());
                }
            }
        }

        if self.enabled.role_token {
            if let Some(token) = request.role_token(&self.role_auth_header) {
                if engine.verify_role_token(token, act, res, &request.query).is_ok() {
                    return Ok(());
                }
            }
        }

        Err(Error::InvalidCredentials)
    }

    /// Authorize `request` against `(act, res)`, trying role-cert, then
    /// access-token, then role-token, returning the first success.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCredentials`] if every enabled modality
    /// fails; individual modality errors are not surfaced.
    pub fn authorize(&self, engine: &Engine, request: &Request, act: &str, res: &str) -> Result<Principal> {
        if self.enabled.role_cert && !request.peer_certificates.is_empty() {
            if let Ok(principal) = engine.authorize_role_cert(&request.peer_certificates, act, res) {
                return Ok(principal);
            }
        }

        if self.enabled.access_token {
            if let Some(token) = request.bearer_token() {
                let binding = request.binding_cert();
                if let Ok(principal) =
                    engine.authorize_access_token(token, act, res, &request.query, binding.as_ref())
                {
                    return Ok(principal);
                }
            }
        }

        if self.enabled.role_token {
            if let Some(token) = request.role_token(&self.role_auth_header) {
                if let Ok(principal) = engine.authorize_role_token(token, act, res, &request.query) {
                    return Ok(principal);
                }
            }
        }

        Err(Error::InvalidCredentials)
    }
}
