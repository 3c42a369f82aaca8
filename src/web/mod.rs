//! HTTP front end: shared state, router and the session cookie.

pub mod error;
pub mod extract;
pub mod routes;
pub mod views;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_cookies::cookie::{time::Duration as CookieDuration, SameSite};
use tower_cookies::{Cookie, CookieManagerLayer};
use tracing::info;

use crate::auth::consent::ConsentHandler;
use crate::auth::oauth::OAuth2Client;
use crate::auth::token_provider::TokenProvider;
use crate::config::Config;
use crate::graph::GraphClient;
use crate::profile::ProfileHandler;
use crate::session::{SessionId, SessionStore};

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "graph_profile_session";

/// Everything a request handler may need, shared across requests.
pub struct AppState {
    pub config: Config,
    pub oauth: Arc<OAuth2Client>,
    pub tokens: Arc<TokenProvider>,
    pub sessions: SessionStore,
    pub consent: ConsentHandler,
    pub profile: ProfileHandler,
}

impl AppState {
    /// Wire up clients and handlers from a fully resolved configuration.
    pub fn new(config: Config) -> Result<Self> {
        let oauth = Arc::new(OAuth2Client::new(&config).context("Failed to create OAuth client")?);
        let tokens = Arc::new(TokenProvider::new(
            Arc::clone(&oauth),
            config.token.refresh_before_expiry_seconds,
        ));
        let graph = Arc::new(GraphClient::new(&config.downstream_api.base_url)?);
        let profile = ProfileHandler::new(graph, Arc::clone(&tokens), &config);
        let consent = ConsentHandler::new(Arc::clone(&oauth));
        let sessions = SessionStore::new(config.server.session_idle_minutes);

        Ok(Self {
            config,
            oauth,
            tokens,
            sessions,
            consent,
            profile,
        })
    }

    /// Drop idle sessions together with their tokens.
    pub async fn purge_idle_sessions(&self) {
        let expired = self.sessions.purge_idle().await;
        for id in &expired {
            self.tokens.invalidate(id).await;
        }
        if !expired.is_empty() {
            info!("Purged {} idle sessions", expired.len());
        }
    }

    /// Cookie binding the browser to `session`.
    pub fn session_cookie(&self, session: &SessionId) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, session.to_string()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure_cookies())
            .build()
    }

    /// Removal cookie with the same attributes as the session cookie.
    pub fn removal_cookie(&self) -> Cookie<'static> {
        Cookie::build(SESSION_COOKIE)
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure_cookies())
            .max_age(CookieDuration::ZERO)
            .build()
    }

    fn secure_cookies(&self) -> bool {
        self.config.server.public_base_url.starts_with("https://")
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let callback_path = state.config.oauth.callback_path.clone();

    Router::new()
        .route("/", get(routes::index))
        .route("/profile", get(routes::profile))
        .route("/privacy", get(routes::privacy))
        .route("/error", get(routes::error_page))
        .route("/signin", get(routes::sign_in))
        .route(&callback_path, get(routes::sign_in_callback))
        .route("/signout", get(routes::sign_out))
        .layer(CookieManagerLayer::new())
        .with_state(state)
}
