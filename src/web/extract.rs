//! Request extractors for the session cookie and the signed-in principal.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Redirect, Response};
use std::sync::Arc;
use tower_cookies::Cookies;
use tracing::debug;

use super::{AppState, SESSION_COOKIE};
use crate::auth::claims::Principal;
use crate::session::SessionId;

/// Session id from the session cookie, if well formed.
pub fn session_from_cookies(cookies: &Cookies) -> Option<SessionId> {
    cookies
        .get(SESSION_COOKIE)
        .and_then(|cookie| SessionId::parse(cookie.value()))
}

/// A request from a signed-in user.
///
/// Rejects with a redirect to `/signin`, carrying the requested path so the
/// user lands back on it after signing in.
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub session_id: SessionId,
    pub principal: Principal,
}

impl FromRequestParts<Arc<AppState>> for SignedIn {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let cookies = Cookies::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        if let Some(session_id) = session_from_cookies(&cookies) {
            if let Some(principal) = state
                .sessions
                .touch(&session_id)
                .await
                .and_then(|s| s.principal)
            {
                return Ok(Self {
                    session_id,
                    principal,
                });
            }
        }

        let return_to = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        debug!("Unauthenticated request for {}, redirecting to sign-in", return_to);
        Err(Redirect::to(&format!("/signin?return_to={}", urlencoding::encode(return_to)))
            .into_response())
    }
}
