//! Error types for the authorizer core.

use thiserror::Error;

/// Result type alias for the authorizer core.
pub type Result<T> = std::result::Result<T, Error>;

/// Authorizer errors.
///
/// Variants map onto the error *kinds* named by the design: callers
/// match on the discriminant they care about (e.g. `Error::Unauthorized`)
/// rather than parsing message text, while the `Display` impl still
/// produces the literal wrapping formats callers may log or compare in
/// tests.
#[derive(Error, Debug)]
pub enum Error {
    /// Empty action or resource while policy evaluation is enabled.
    #[error("empty action / resource: Access denied due to invalid/empty action/resource values")]
    InvalidParameters,

    /// No enabled authorizer succeeded (dispatcher OR-composition).
    #[error("error no authorizers succeeded: invalid credentials")]
    InvalidCredentials,

    /// A role token failed to parse or verify.
    #[error("error authorize role token: {0}")]
    RoleTokenInvalid(String),

    /// An access token failed to parse or verify.
    #[error("error authorize access token: {0}")]
    AccessTokenInvalid(String),

    /// A role certificate could not be parsed, or yielded no roles.
    #[error("invalid role certificate: {0}")]
    RoleCertInvalid(String),

    /// Policy evaluation denied the request for a token-based principal.
    #[error("token unauthorized: {0}")]
    Unauthorized(String),

    /// Policy evaluation denied the request for every domain extracted
    /// from a role certificate.
    #[error("role certificates unauthorized: {0}")]
    RoleCertUnauthorized(String),

    /// A background refresh attempt failed. Never fatal; surfaced on the
    /// supervisor's error channel.
    #[error("{context} error: {source}")]
    RefreshFailure {
        /// Which refresher failed (`"update pubkey"`, `"update policy"`,
        /// `"update jwk"`).
        context: &'static str,
        /// Underlying cause.
        #[source]
        source: Box<Error>,
    },

    /// `Init`/`Start` was invoked with an already-cancelled lifecycle token.
    #[error("lifecycle cancelled")]
    LifecycleCancelled,

    /// `authorize_role_cert` — intentionally unimplemented, see design notes.
    #[error("AuthorizeRoleCert has not yet been implemented")]
    NotImplemented,

    /// No authorizer modality is enabled; construction-time failure.
    #[error("error no authorizers")]
    NoAuthorizers,

    /// A translator rejected or failed to map a request.
    #[error("translate error: {0}")]
    Translate(String),

    /// Configuration was malformed or incomplete.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport failure while fetching key/JWK/policy material.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// JWT decode/verification failure (access tokens, and the role-token
    /// codec which piggybacks on the same primitives).
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// X.509 parsing failure.
    #[error("certificate parse error: {0}")]
    CertParse(String),

    /// Raw signature verification failure (policy bundles, pubkey bundles).
    #[error("signature verification failed")]
    SignatureInvalid,

    /// Internal invariant violation; should not occur in normal operation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap `self` as the cause of a `RefreshFailure` with the given
    /// identifying prefix (§4.7: `"update pubkey error"`, `"update policy
    /// error"`, `"update jwk error"`).
    #[must_use]
    pub fn into_refresh_failure(self, context: &'static str) -> Self {
        Self::RefreshFailure {
            context,
            source: Box::new(self),
        }
    }
}
