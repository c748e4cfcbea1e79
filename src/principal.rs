//! The [`Principal`] result type and its two variants.

use serde::{Deserialize, Serialize};

/// Fields common to every successful authorization, regardless of which
/// credential modality produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPrincipal {
    /// Principal name (from the credential).
    pub name: String,
    /// Policy domain the credential asserts membership in.
    pub domain: String,
    /// Roles asserted by the credential itself.
    pub roles: Vec<String>,
    /// Credential issue time (Unix epoch seconds).
    pub issue_time: i64,
    /// Credential expiry time (Unix epoch seconds).
    pub expiry_time: i64,
    /// Subset of `roles` that policy evaluation actually authorized.
    ///
    /// Empty when policy evaluation was disabled for this call — callers
    /// must not mistake that for "no roles authorized".
    pub authorized_roles: Vec<String>,
}

/// A [`TokenPrincipal`] plus the OAuth `client_id` carried by an access
/// token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenPrincipal {
    /// Shared token fields.
    pub token: TokenPrincipal,
    /// OAuth `client_id` claim.
    pub client_id: String,
}

/// The result of a successful authorization.
///
/// A tagged union rather than a trait object: the access-token variant
/// adds exactly one field over the base, so there is no value in a
/// trait-object hierarchy — a plain enum with a uniform accessor surface
/// is both cheaper and easier to exhaustively match on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Principal {
    /// Produced by the role-token or role-certificate modalities.
    Token(TokenPrincipal),
    /// Produced by the access-token modality.
    AccessToken(AccessTokenPrincipal),
}

impl Principal {
    fn token(&self) -> &TokenPrincipal {
        match self {
            Self::Token(t) => t,
            Self::AccessToken(a) => &a.token,
        }
    }

    /// Principal name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.token().name
    }

    /// Policy domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.token().domain
    }

    /// Roles asserted by the credential.
    #[must_use]
    pub fn roles(&self) -> &[String] {
        &self.token().roles
    }

    /// Roles policy evaluation actually authorized (subset of [`Self::roles`]).
    #[must_use]
    pub fn authorized_roles(&self) -> &[String] {
        &self.token().authorized_roles
    }

    /// Credential issue time (Unix epoch seconds).
    #[must_use]
    pub fn issue_time(&self) -> i64 {
        self.token().issue_time
    }

    /// Credential expiry time (Unix epoch seconds).
    #[must_use]
    pub fn expiry_time(&self) -> i64 {
        self.token().expiry_time
    }

    /// OAuth `client_id`, present only for access-token principals.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        match self {
            Self::AccessToken(a) => Some(&a.client_id),
            Self::Token(_) => None,
        }
    }

    /// Approximate heap byte cost of this principal for cache accounting
    /// (§4.4): sum of every owned string's length plus two 64-bit
    /// timestamps. Excludes `Vec`/`String` header overhead, which the
    /// cache entry cost function accounts for once per entry.
    #[must_use]
    pub fn byte_cost(&self) -> usize {
        let t = self.token();
        let roles_len: usize = t.roles.iter().map(String::len).sum();
        let authorized_len: usize = t.authorized_roles.iter().map(String::len).sum();
        let base = t.name.len() + t.domain.len() + roles_len + authorized_len + 16;
        match self {
            Self::Token(_) => base,
            Self::AccessToken(a) => base + a.client_id.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_principal() -> TokenPrincipal {
        TokenPrincipal {
            name: "alice".to_string(),
            domain: "coretech".to_string(),
            roles: vec!["readers".to_string(), "writers".to_string()],
            issue_time: 1000,
            expiry_time: 2000,
            authorized_roles: vec!["readers".to_string()],
        }
    }

    #[test]
    fn token_accessors_read_through() {
        let p = Principal::Token(token_principal());
        assert_eq!(p.name(), "alice");
        assert_eq!(p.domain(), "coretech");
        assert_eq!(p.roles(), &["readers", "writers"]);
        assert_eq!(p.authorized_roles(), &["readers"]);
        assert_eq!(p.issue_time(), 1000);
        assert_eq!(p.expiry_time(), 2000);
        assert_eq!(p.client_id(), None);
    }

    #[test]
    fn access_token_adds_client_id() {
        let p = Principal::AccessToken(AccessTokenPrincipal {
            token: token_principal(),
            client_id: "my-client".to_string(),
        });
        assert_eq!(p.name(), "alice");
        assert_eq!(p.client_id(), Some("my-client"));
    }

    #[test]
    fn authorized_roles_subset_of_roles_invariant() {
        let p = Principal::Token(token_principal());
        for role in p.authorized_roles() {
            assert!(p.roles().contains(role));
        }
    }

    #[test]
    fn byte_cost_grows_with_client_id() {
        let token_only = Principal::Token(token_principal());
        let access = Principal::AccessToken(AccessTokenPrincipal {
            token: token_principal(),
            client_id: "some-client-id".to_string(),
        });
        assert!(access.byte_cost() > token_only.byte_cost());
    }
}
