//! Ordered scope set for downstream API token requests.

use serde::Deserialize;

/// Scopes always requested alongside the downstream API scopes at sign-in.
pub const OIDC_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// An ordered, de-duplicated set of permission strings.
///
/// Parsed once from a space-delimited configuration value and never mutated
/// afterwards; the same set is reused verbatim when a claims challenge
/// forces a fresh authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub struct ScopeSet(Vec<String>);

impl ScopeSet {
    /// Parse a space-delimited scope string, keeping first-seen order.
    pub fn parse(value: &str) -> Self {
        let mut scopes: Vec<String> = Vec::new();
        for scope in value.split_whitespace() {
            if !scopes.iter().any(|s| s == scope) {
                scopes.push(scope.to_string());
            }
        }
        Self(scopes)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Space-joined form used in `scope` request parameters.
    pub fn to_scope_param(&self) -> String {
        self.0.join(" ")
    }

    /// Scope parameter for an authorize request: OIDC scopes first, then
    /// this set in its original order.
    pub fn to_authorize_param(&self) -> String {
        OIDC_SCOPES
            .iter()
            .map(|s| s.to_string())
            .chain(self.0.iter().filter(|s| !OIDC_SCOPES.contains(&s.as_str())).cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Whether every scope in `self` was granted in `granted`
    /// (a space-delimited string as returned by the token endpoint).
    pub fn is_covered_by(&self, granted: &str) -> bool {
        self.0.iter().all(|wanted| {
            let wanted = wanted.to_ascii_lowercase();
            let qualified = format!("/{}", wanted);
            granted
                .split_whitespace()
                .map(str::to_ascii_lowercase)
                .any(|g| g == wanted || g.ends_with(&qualified))
        })
    }
}

impl From<String> for ScopeSet {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl std::fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_scope_param())
    }
}
