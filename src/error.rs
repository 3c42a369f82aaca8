//! Error types for the graph-profile-web application.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.
//! `AppError` is also the generic error handler: converting it into a response
//! logs it and renders the error page.

use axum::http::StatusCode;
use thiserror::Error;

use crate::auth::challenge::ClaimsChallenge;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Consent error: {0}")]
    Consent(#[from] ConsentError),

    #[error("Secret store error: {0}")]
    Secret(#[from] SecretError),
}

/// Authentication-related errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth2 authorization failed: {0}")]
    OAuthFailed(String),

    #[error("Invalid authorization code")]
    InvalidAuthCode,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("State validation failed (possible CSRF attack)")]
    StateValidationFailed,

    #[error("Invalid ID token: {0}")]
    InvalidIdToken(String),

    #[error("User interaction required to acquire a token")]
    InteractionRequired,

    #[error("Missing required role: {0}")]
    MissingRole(String),
}

/// Directory API errors, classified by failure reason.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Continuous access evaluation resulted in claims challenge")]
    ClaimsChallenge(ClaimsChallenge),

    #[error("Graph API request failed: {0}")]
    GraphRequestFailed(String),

    #[error("Failed to parse API response: {0}")]
    ParseFailed(String),

    #[error("Unauthorized (401): Token may be expired")]
    Unauthorized,

    #[error("Forbidden (403): Insufficient permissions")]
    Forbidden,

    #[error("Not found (404)")]
    NotFound,

    #[error("Rate limited (429): Too many requests")]
    RateLimited,
}

/// Failures of the consent / step-up mechanism itself.
///
/// These are structural (bad configuration, unusable input) and are never retried.
#[derive(Error, Debug)]
pub enum ConsentError {
    #[error("No scopes to request consent for")]
    EmptyScopes,

    #[error("Invalid authority URL: {0}")]
    InvalidAuthority(String),

    #[error("Redirect URI not configured")]
    MissingRedirectUri,
}

/// Secret store (Key Vault) errors.
#[derive(Error, Debug)]
pub enum SecretError {
    #[error("Failed to acquire credential: {0}")]
    CredentialFailed(String),

    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Secret request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid secret response: {0}")]
    InvalidResponse(String),
}

impl AppError {
    /// Returns a user-friendly message for display in the error page.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Auth(AuthError::OAuthFailed(_)) => "Sign-in failed. Please try again.",
            Self::Auth(AuthError::TokenRefreshFailed(_)) => {
                "Session expired. Please sign in again."
            }
            Self::Auth(AuthError::StateValidationFailed) => {
                "Security error. Please try signing in again."
            }
            Self::Auth(AuthError::MissingRole(_)) => {
                "You do not have permission to view this page."
            }
            Self::Api(ApiError::Unauthorized) => "Authentication expired. Sign in again.",
            Self::Api(ApiError::Forbidden) => "Insufficient permissions for this operation.",
            Self::Api(ApiError::RateLimited) => "Too many requests. Please wait a moment.",
            Self::Consent(_) => "Could not start the consent flow. Check the app configuration.",
            Self::Secret(_) => "The application could not load its credentials.",
            _ => "An error occurred while processing your request.",
        }
    }

    /// HTTP status used when this error reaches the generic error handler.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(AuthError::MissingRole(_)) | Self::Api(ApiError::Forbidden) => {
                StatusCode::FORBIDDEN
            }
            Self::Auth(
                AuthError::OAuthFailed(_)
                | AuthError::InvalidAuthCode
                | AuthError::StateValidationFailed
                | AuthError::InvalidIdToken(_),
            ) => StatusCode::BAD_REQUEST,
            Self::Api(ApiError::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
            Self::Api(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
