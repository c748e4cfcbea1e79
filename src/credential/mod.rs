//! Credential Validators (C4) — role-token, access-token, and
//! role-certificate parse-and-verify entry points.

pub mod access_token;
pub mod role_cert;
pub mod role_token;
pub mod translator;

pub use access_token::{AccessTokenValidator, VerifiedAccessToken};
pub use role_cert::{extract_cert_roles, RoleCertIdentity};
pub use role_token::{RoleTokenCodec, RoleTokenValidator, VerifiedRoleToken};
pub use translator::Translator;
