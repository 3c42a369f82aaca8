//! The signed-in principal, built from the ID token claims.
//!
//! The ID token is received directly from the token endpoint over TLS in the
//! code exchange. Signature validation is switched off for that reason only;
//! audience, expiry and `sub` are still enforced by the JWT validator and
//! the nonce is checked against the pending sign-in.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::AuthError;

/// Tolerated clock difference when checking `exp`, in seconds.
const CLOCK_SKEW_SECONDS: u64 = 300;

/// ID token claims the application relies on.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    nonce: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

/// The authenticated principal attached to a session. Read-only once created.
#[derive(Debug, Clone)]
pub struct Principal {
    pub subject: String,
    pub name: Option<String>,
    pub preferred_username: Option<String>,
    pub roles: Vec<String>,
    /// All claims sorted by name, values rendered as text.
    pub claims: Vec<(String, String)>,
}

impl Principal {
    /// Decode and validate an ID token from the token endpoint.
    pub fn from_id_token(
        id_token: &str,
        expected_audience: &str,
        expected_nonce: Option<&str>,
    ) -> Result<Self, AuthError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.insecure_disable_signature_validation();
        validation.set_audience(&[expected_audience]);
        validation.set_required_spec_claims(&["exp", "aud", "sub"]);
        validation.validate_exp = true;
        validation.leeway = CLOCK_SKEW_SECONDS;

        let all = decode::<Map<String, Value>>(id_token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| AuthError::InvalidIdToken(e.to_string()))?
            .claims;
        let typed: IdTokenClaims = serde_json::from_value(Value::Object(all.clone()))
            .map_err(|e| AuthError::InvalidIdToken(format!("claims: {e}")))?;

        if let Some(expected) = expected_nonce {
            if typed.nonce.as_deref() != Some(expected) {
                return Err(AuthError::InvalidIdToken("nonce mismatch".into()));
            }
        }

        Ok(Self {
            subject: typed.sub,
            name: typed.name,
            preferred_username: typed.preferred_username,
            roles: typed.roles,
            claims: all
                .into_iter()
                .map(|(k, v)| {
                    let rendered = match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (k, rendered)
                })
                .collect(),
        })
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Get the best available display name.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.preferred_username.as_deref())
            .unwrap_or(&self.subject)
    }
}

/// Unsigned ID token carrying `claims`, as the validator sees it.
#[cfg(test)]
pub(crate) fn encode_test_id_token(claims: &Value) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    format!(
        "{}.{}.c2ln",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}
