//! Optional `metrics` facade counters and gauges, feature-gated behind
//! `metrics`. Every function is a thin wrapper so call sites stay
//! feature-flag-free; callers invoke these unconditionally and the
//! compiled-out path costs nothing when the feature is disabled.

use metrics::{counter, gauge};

/// Record a refresh attempt's outcome for `provider` (`"pubkey"`,
/// `"jwk"`, or `"policy"`).
pub fn record_refresh(provider: &'static str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("rbac_authorizer_refresh_total", "provider" => provider, "outcome" => outcome).increment(1);
}

/// Record a Principal Cache lookup outcome.
pub fn record_cache_lookup(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!("rbac_authorizer_cache_lookups_total", "outcome" => outcome).increment(1);
}

/// Record a Principal Cache eviction, tagged with the number of bytes
/// released (§4.5 `ExpiredHook`).
pub fn record_cache_eviction(bytes: usize) {
    counter!("rbac_authorizer_cache_evictions_total").increment(1);
    counter!("rbac_authorizer_cache_evicted_bytes_total").increment(bytes as u64);
}

/// Publish the current cache occupancy (entry count and accounted
/// bytes) as gauges. Called from the cache sweeper alongside
/// [`crate::cache::PrincipalCache::sweep`].
pub fn set_cache_occupancy(len: usize, bytes: i64) {
    gauge!("rbac_authorizer_cache_entries").set(len as f64);
    gauge!("rbac_authorizer_cache_bytes").set(bytes as f64);
}

/// Record an authorization decision outcome for `modality` (`"role_cert"`,
/// `"access_token"`, or `"role_token"`).
pub fn record_decision(modality: &'static str, allowed: bool) {
    let outcome = if allowed { "allow" } else { "deny" };
    counter!("rbac_authorizer_decisions_total", "modality" => modality, "outcome" => outcome).increment(1);
}
