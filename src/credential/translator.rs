//! Optional per-domain request→policy mapper (§3, §4.5 step 5a).

use crate::error::Result;

/// Maps an HTTP verb + path (`action`/`resource` as given by the caller)
/// plus an optional raw query string into the `(action, resource)` pair
/// policy assertions are actually written against.
///
/// Implementations are supplied by the embedder; the engine calls
/// [`Translator::translate`] once per cache miss, after credential
/// validation and before the `resource_prefix` is applied.
pub trait Translator: Send + Sync {
    /// Translate `(action, resource)` for `domain`, given the raw query
    /// string from the originating request (empty if none).
    ///
    /// Errors propagate to the caller unwrapped (§4.5 step 5a).
    fn translate(&self, domain: &str, action: &str, resource: &str, query: &str)
        -> Result<(String, String)>;
}

#[cfg(test)]
pub(crate) struct IdentityTranslator;

#[cfg(test)]
impl Translator for IdentityTranslator {
    fn translate(
        &self,
        _domain: &str,
        action: &str,
        resource: &str,
        _query: &str,
    ) -> Result<(String, String)> {
        Ok((action.to_string(), resource.to_string()))
    }
}
