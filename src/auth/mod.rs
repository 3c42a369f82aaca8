//! Azure AD authentication module.
//!
//! Authorization code flow with PKCE, ID token claims, per-session token
//! cache with silent refresh, and the claims-challenge / incremental consent
//! machinery used when a protected API asks for more.

pub mod challenge;
pub mod claims;
pub mod consent;
pub mod oauth;
pub mod scopes;
pub mod secure;
pub mod token_provider;
