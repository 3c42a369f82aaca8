//! Claims challenge extraction from `WWW-Authenticate` response headers.
//!
//! A protected API that rejects a token because continuous access evaluation
//! demands extra claims answers with
//!
//! ```text
//! 401 Unauthorized
//! WWW-Authenticate: Bearer realm="", error="insufficient_claims", claims="eyJhY2Nlc3NfdG9rZW4iOnsi..."
//! ```
//!
//! The `claims` value is base64-encoded JSON that must be forwarded verbatim
//! (decoded) in the next authorize request.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use reqwest::header::{HeaderMap, WWW_AUTHENTICATE};

/// `error` value that marks a claims challenge.
pub const INSUFFICIENT_CLAIMS: &str = "insufficient_claims";

/// An additionally-required claims request returned by a protected API.
///
/// Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimsChallenge(String);

impl ClaimsChallenge {
    /// Wrap a claims value, rejecting empty or whitespace-only input.
    pub fn new(claims: impl Into<String>) -> Option<Self> {
        let claims = claims.into();
        if claims.trim().is_empty() {
            None
        } else {
            Some(Self(claims))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClaimsChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract the claims challenge from a response's `WWW-Authenticate` headers.
///
/// Only a `Bearer` challenge with `error="insufficient_claims"` and a
/// non-empty `claims` parameter qualifies.
pub fn claims_challenge_from_headers(headers: &HeaderMap) -> Option<ClaimsChallenge> {
    headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(claims_challenge_from_header)
}

/// Extract the claims challenge from a single `WWW-Authenticate` value.
pub fn claims_challenge_from_header(value: &str) -> Option<ClaimsChallenge> {
    let params = parse_bearer_params(value)?;

    let is_claims_error = params
        .iter()
        .any(|(k, v)| k == "error" && v == INSUFFICIENT_CLAIMS);
    if !is_claims_error {
        return None;
    }

    let raw = params.iter().find(|(k, _)| k == "claims").map(|(_, v)| v)?;
    ClaimsChallenge::new(decode_claims(raw))
}

/// Base64-decode a claims parameter, falling back to the raw value when it
/// is already plain JSON or not valid base64.
fn decode_claims(raw: &str) -> String {
    let trimmed = raw.trim();
    STANDARD
        .decode(trimmed)
        .or_else(|_| URL_SAFE_NO_PAD.decode(trimmed.trim_end_matches('=')))
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Parse the auth-params of a `Bearer` challenge into lowercase-key pairs.
///
/// Returns `None` when the challenge uses a different scheme.
fn parse_bearer_params(value: &str) -> Option<Vec<(String, String)>> {
    let value = value.trim_start();
    let scheme_end = value.find(char::is_whitespace).unwrap_or(value.len());
    if !value[..scheme_end].eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let mut params = Vec::new();
    let mut rest = &value[scheme_end..];

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        let Some(eq) = rest.find('=') else {
            break;
        };
        let key = rest[..eq].trim().to_ascii_lowercase();
        rest = &rest[eq + 1..];

        let param = if let Some(inner) = rest.strip_prefix('"') {
            // Quoted string, honouring backslash escapes.
            let mut out = String::new();
            let mut escaped = false;
            let mut consumed = inner.len();
            for (i, c) in inner.char_indices() {
                if escaped {
                    out.push(c);
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    consumed = i + 1;
                    break;
                } else {
                    out.push(c);
                }
            }
            rest = &inner[consumed..];
            out
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            let token = rest[..end].trim().to_string();
            rest = &rest[end..];
            token
        };

        params.push((key, param));
    }

    Some(params)
}
