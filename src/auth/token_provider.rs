//! Per-session access token cache with silent refresh.
//!
//! This is the only place tokens are kept. Entries live in process memory and
//! are dropped on sign-out, on session expiry and whenever a protected API
//! answers with a claims challenge.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::auth::oauth::{OAuth2Client, TokenResponse};
use crate::auth::scopes::ScopeSet;
use crate::auth::secure::SecureString;
use crate::error::AuthError;
use crate::session::SessionId;

/// Cached tokens with their expiry.
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: SecureString,
    refresh_token: Option<SecureString>,
    expires_at: DateTime<Utc>,
    granted_scopes: String,
}

impl CachedToken {
    fn usable_for(&self, scopes: &ScopeSet, now: DateTime<Utc>, refresh_before: Duration) -> bool {
        let fresh =
            time_until_expiry(self.expires_at, now).is_some_and(|left| left > refresh_before);
        // Azure AD omits `scope` for some grants; treat that as covering the request.
        let covered =
            self.granted_scopes.is_empty() || scopes.is_covered_by(&self.granted_scopes);
        fresh && covered
    }
}

/// Acquires access tokens for a session, refreshing them before they expire.
pub struct TokenProvider {
    oauth_client: Arc<OAuth2Client>,
    refresh_before: Duration,
    cache: RwLock<HashMap<SessionId, CachedToken>>,
}

impl TokenProvider {
    pub fn new(oauth_client: Arc<OAuth2Client>, refresh_before_expiry_seconds: u64) -> Self {
        Self {
            oauth_client,
            refresh_before: Duration::seconds(refresh_before_expiry_seconds as i64),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Cache the tokens from a token endpoint response for `session`.
    ///
    /// A response without a refresh token keeps the previous one.
    pub async fn store(&self, session: &SessionId, response: TokenResponse) {
        let expires_at = Utc::now() + Duration::seconds(response.expires_in as i64);

        let mut cache = self.cache.write().await;
        let previous_refresh = cache.get(session).and_then(|t| t.refresh_token.clone());
        cache.insert(
            session.clone(),
            CachedToken {
                access_token: response.access_token.clone(),
                refresh_token: response.refresh_token.clone().or(previous_refresh),
                expires_at,
                granted_scopes: response.scope.clone(),
            },
        );

        info!(
            "Token stored for session, expires in {}",
            format_duration(expires_at - Utc::now())
        );
    }

    /// Get an access token for `scopes`, from cache or by silent refresh.
    ///
    /// Returns [`AuthError::InteractionRequired`] when the user has to sign in again.
    pub async fn acquire_token(
        &self,
        session: &SessionId,
        scopes: &ScopeSet,
    ) -> Result<SecureString, AuthError> {
        let refresh_token = {
            let cache = self.cache.read().await;
            let cached = cache.get(session).ok_or(AuthError::InteractionRequired)?;

            if cached.usable_for(scopes, Utc::now(), self.refresh_before) {
                debug!("Using cached access token");
                return Ok(cached.access_token.clone());
            }
            cached
                .refresh_token
                .clone()
                .ok_or(AuthError::InteractionRequired)?
        };

        info!("Refreshing access token for scopes: {}", scopes);
        match self
            .oauth_client
            .refresh_token(refresh_token.as_str(), scopes)
            .await
        {
            Ok(response) => {
                let access_token = response.access_token.clone();
                self.store(session, response).await;
                Ok(access_token)
            }
            Err(AuthError::InteractionRequired) => {
                self.invalidate(session).await;
                Err(AuthError::InteractionRequired)
            }
            Err(e) => Err(e),
        }
    }

    /// Re-key the tokens held for `from` under `to`.
    pub async fn rotate(&self, from: &SessionId, to: &SessionId) {
        let mut cache = self.cache.write().await;
        if let Some(cached) = cache.remove(from) {
            cache.insert(to.clone(), cached);
        }
    }

    /// Forget every token held for `session`.
    pub async fn invalidate(&self, session: &SessionId) {
        if self.cache.write().await.remove(session).is_some() {
            debug!("Tokens invalidated for session");
        }
    }
}

/// Calculate the remaining time until token expiry.
pub fn time_until_expiry(expiry: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    if expiry > now {
        Some(expiry - now)
    } else {
        None
    }
}

/// Format duration as human-readable string (e.g., "45 min", "1 hour").
pub fn format_duration(duration: Duration) -> String {
    let total_minutes = duration.num_minutes();

    if total_minutes < 1 {
        "< 1 min".to_string()
    } else if total_minutes < 60 {
        format!("{} min", total_minutes)
    } else {
        let hours = total_minutes / 60;
        let mins = total_minutes % 60;
        if mins == 0 {
            format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
        } else {
            format!("{}h {}m", hours, mins)
        }
    }
}
