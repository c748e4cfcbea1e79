//! Credential masking for logs.
//!
//! Every DEBUG-level log that includes a raw token or cache key runs it
//! through [`mask_secret`] first so access logs never carry a full bearer
//! credential.

/// Replace all but the first and last 4 characters of `secret` with `*`.
///
/// Strings of 8 characters or fewer are masked in full (there isn't enough
/// length to preserve 4 characters on each side without leaking most of a
/// short credential).
#[must_use]
pub fn mask_secret(secret: &str) -> String {
    let len = secret.chars().count();
    if len <= 8 {
        return "*".repeat(len);
    }

    let chars: Vec<char> = secret.chars().collect();
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[len - 4..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(len - 8))
}

/// Mask a `:`-delimited decision key by masking only its first segment
/// (the raw credential), leaving the action/resource/query segments that
/// follow it readable for debugging.
#[must_use]
pub fn mask_decision_key(key: &str) -> String {
    match key.split_once(':') {
        Some((credential, rest)) => format!("{}:{rest}", mask_secret(credential)),
        None => mask_secret(key),
    }
}
