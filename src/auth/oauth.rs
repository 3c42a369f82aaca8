//! OAuth2 / OpenID Connect client with PKCE support for Azure AD sign-in.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

use crate::auth::challenge::ClaimsChallenge;
use crate::auth::scopes::ScopeSet;
use crate::auth::secure::SecureString;
use crate::config::Config;
use crate::error::{AuthError, ConsentError};

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Token endpoint error codes that can only be resolved by signing in again.
const INTERACTION_ERRORS: [&str; 4] = [
    "invalid_grant",
    "interaction_required",
    "consent_required",
    "login_required",
];

/// PKCE code verifier and challenge pair.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// The code verifier (stored locally, sent in token exchange).
    pub verifier: String,
    /// The code challenge (SHA256 hash of verifier, sent in auth request).
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a new PKCE challenge pair.
    pub fn new() -> Self {
        let verifier = random_token(32);

        // Create challenge = BASE64URL(SHA256(verifier))
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let hash = hasher.finalize();
        let challenge = URL_SAFE_NO_PAD.encode(hash);

        Self {
            verifier,
            challenge,
        }
    }
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

/// Random URL-safe token of `len` bytes of entropy.
pub fn random_token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// What to ask for in an authorize request.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizeRequest<'a> {
    pub scopes: &'a ScopeSet,
    /// Additional claims demanded by a protected API.
    pub claims: Option<&'a ClaimsChallenge>,
    pub login_hint: Option<&'a str>,
}

/// A ready-to-follow authorize redirect plus the values the callback must match.
#[derive(Debug, Clone)]
pub struct AuthorizeRedirect {
    pub url: Url,
    pub state: String,
    pub nonce: String,
    pub pkce: PkceChallenge,
}

/// OAuth2 client for Azure AD authentication.
pub struct OAuth2Client {
    client_id: String,
    client_secret: SecureString,
    authorize_endpoint: String,
    token_endpoint: String,
    logout_endpoint: String,
    redirect_uri: String,
    http_client: reqwest::Client,
}

impl OAuth2Client {
    /// Create a new OAuth2 client from configuration.
    pub fn new(config: &Config) -> Result<Self, AuthError> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AuthError::OAuthFailed(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client_id: config.oauth.client_id.clone(),
            client_secret: config.oauth.client_secret.clone(),
            authorize_endpoint: config.auth_url(),
            token_endpoint: config.token_url(),
            logout_endpoint: config.logout_url(),
            redirect_uri: config.redirect_uri(),
            http_client,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Build the authorization URL for browser-based sign-in.
    ///
    /// A fresh PKCE pair, CSRF state and nonce are generated for every call.
    pub fn authorize(&self, request: AuthorizeRequest<'_>) -> Result<AuthorizeRedirect, ConsentError> {
        if request.scopes.is_empty() {
            return Err(ConsentError::EmptyScopes);
        }
        if self.redirect_uri.is_empty() {
            return Err(ConsentError::MissingRedirectUri);
        }

        let mut url = Url::parse(&self.authorize_endpoint)
            .map_err(|e| ConsentError::InvalidAuthority(format!("{}: {e}", self.authorize_endpoint)))?;

        let pkce = PkceChallenge::new();
        let state = random_token(16);
        let nonce = random_token(16);

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("response_type", "code")
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("response_mode", "query")
                .append_pair("scope", &request.scopes.to_authorize_param())
                .append_pair("state", &state)
                .append_pair("nonce", &nonce)
                .append_pair("code_challenge", &pkce.challenge)
                .append_pair("code_challenge_method", "S256");

            if let Some(claims) = request.claims {
                query.append_pair("claims", claims.as_str());
            }
            if let Some(hint) = request.login_hint {
                query.append_pair("login_hint", hint);
            }
        }

        Ok(AuthorizeRedirect {
            url,
            state,
            nonce,
            pkce,
        })
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
        scopes: &ScopeSet,
    ) -> Result<TokenResponse, AuthError> {
        let scope = scopes.to_authorize_param();
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", pkce_verifier),
            ("scope", scope.as_str()),
        ];

        self.token_request(&params, AuthError::TokenExchangeFailed)
            .await
    }

    /// Redeem a refresh token for an access token covering `scopes`.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        scopes: &ScopeSet,
    ) -> Result<TokenResponse, AuthError> {
        let scope = format!("{} offline_access", scopes.to_scope_param());
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];

        self.token_request(&params, AuthError::TokenRefreshFailed)
            .await
    }

    /// End-session URL that returns the browser to `post_logout_redirect_uri`.
    pub fn logout_url(&self, post_logout_redirect_uri: &str) -> Result<Url, ConsentError> {
        let mut url = Url::parse(&self.logout_endpoint)
            .map_err(|e| ConsentError::InvalidAuthority(format!("{}: {e}", self.logout_endpoint)))?;
        url.query_pairs_mut()
            .append_pair("post_logout_redirect_uri", post_logout_redirect_uri);
        Ok(url)
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
        failed: fn(String) -> AuthError,
    ) -> Result<TokenResponse, AuthError> {
        let response = self
            .http_client
            .post(&self.token_endpoint)
            .form(params)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            // Log error details for debugging (doesn't expose to user)
            let error_body = response.text().await.unwrap_or_default();
            error!("Token request failed: HTTP {} - {}", status, error_body);

            let code = serde_json::from_str::<TokenErrorResponse>(&error_body)
                .map(|e| e.error)
                .unwrap_or_default();
            if INTERACTION_ERRORS.contains(&code.as_str()) {
                debug!("Token endpoint requires interaction: {}", code);
                return Err(AuthError::InteractionRequired);
            }
            return Err(failed(format!("HTTP {}", status.as_u16())));
        }

        response
            .json()
            .await
            .map_err(|e| failed(e.to_string()))
    }
}

/// Token response from Azure AD.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: SecureString,
    pub expires_in: u64,
    pub refresh_token: Option<SecureString>,
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
}

/// Query parameters delivered to the sign-in callback.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Extract code and state, surfacing an error response from the identity provider.
    pub fn into_code_and_state(self) -> Result<(String, String), AuthError> {
        if let Some(error) = self.error {
            let description = self.error_description.unwrap_or(error);
            return Err(AuthError::OAuthFailed(description));
        }

        let code = self.code.ok_or(AuthError::InvalidAuthCode)?;
        let state = self.state.ok_or(AuthError::StateValidationFailed)?;

        Ok((code, state))
    }
}
