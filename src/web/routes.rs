//! Route handlers.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde::Deserialize;
use std::sync::Arc;
use tower_cookies::Cookies;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::extract::{session_from_cookies, SignedIn};
use super::{views, AppState};
use crate::auth::claims::Principal;
use crate::auth::oauth::CallbackParams;
use crate::error::{AppError, AuthError};
use crate::profile::ProfileOutcome;
use crate::session::SessionId;

/// App role required for the privacy page.
pub const PRIVACY_ROLE: &str = "App.Role.2";

const GENERIC_ERROR_MESSAGE: &str = "An error occurred while processing your request.";

#[derive(Debug, Default, Deserialize)]
pub struct SignInParams {
    pub return_to: Option<String>,
}

#[instrument(skip_all, fields(user = %user.principal.display_name()))]
pub async fn index(user: SignedIn) -> Html<String> {
    Html(views::claims_page(&user.principal))
}

/// Profile page. A claims challenge or a missing token ends the request
/// with a redirect to the identity provider.
#[instrument(skip_all, fields(user = %user.principal.display_name()))]
pub async fn profile(
    State(state): State<Arc<AppState>>,
    user: SignedIn,
) -> Result<Response, AppError> {
    match state.profile.handle(&user.session_id).await? {
        ProfileOutcome::Rendered(view) => {
            Ok(Html(views::profile_page(&user.principal, &view)).into_response())
        }
        ProfileOutcome::Challenge(request) => {
            if request.claims.is_some() {
                state.tokens.invalidate(&user.session_id).await;
            }
            let redirect = state
                .consent
                .challenge_user(
                    &request.scopes,
                    request.claims.as_ref(),
                    Some(&user.principal),
                    "/profile",
                )
                .map_err(|e| state.consent.handle_exception(e))?;
            state
                .sessions
                .begin_sign_in(&user.session_id, redirect.pending)
                .await;
            Ok(Redirect::to(redirect.location.as_str()).into_response())
        }
    }
}

#[instrument(skip_all, fields(user = %user.principal.display_name()))]
pub async fn privacy(user: SignedIn) -> Result<Html<String>, AppError> {
    if !user.principal.has_role(PRIVACY_ROLE) {
        warn!("Access to privacy page denied, missing role {}", PRIVACY_ROLE);
        return Err(AuthError::MissingRole(PRIVACY_ROLE.to_string()).into());
    }
    Ok(Html(views::privacy_page(&user.principal)))
}

/// Anonymous error page, never cached.
#[instrument(skip_all)]
pub async fn error_page(headers: HeaderMap) -> Response {
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    (
        [(header::CACHE_CONTROL, "no-store")],
        Html(views::error_page(GENERIC_ERROR_MESSAGE, &request_id)),
    )
        .into_response()
}

/// Start an interactive sign-in for the configured scopes.
///
/// Always issues a new session id; a session already bound to the browser
/// is discarded along with its tokens.
#[instrument(skip_all)]
pub async fn sign_in(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Query(params): Query<SignInParams>,
) -> Result<Response, AppError> {
    if let Some(previous) = session_from_cookies(&cookies) {
        state.sessions.remove(&previous).await;
        state.tokens.invalidate(&previous).await;
    }
    let session_id = SessionId::generate();
    let return_to = params.return_to.as_deref().unwrap_or("/");

    let redirect = state
        .consent
        .challenge_user(&state.config.downstream_api.scopes, None, None, return_to)
        .map_err(|e| state.consent.handle_exception(e))?;
    state.sessions.begin_sign_in(&session_id, redirect.pending).await;

    cookies.add(state.session_cookie(&session_id));
    Ok(Redirect::to(redirect.location.as_str()).into_response())
}

/// Authorization code callback.
///
/// The session moves to a fresh id before the principal is attached, so an
/// id known before sign-in never becomes an authenticated one.
#[instrument(skip_all)]
pub async fn sign_in_callback(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Query(params): Query<CallbackParams>,
) -> Result<Response, AppError> {
    let (code, returned_state) = params.into_code_and_state()?;

    let pending_id = session_from_cookies(&cookies).ok_or(AuthError::StateValidationFailed)?;
    let pending = state
        .sessions
        .take_pending(&pending_id)
        .await
        .ok_or(AuthError::StateValidationFailed)?;
    if pending.state != returned_state {
        warn!("Callback state does not match the pending sign-in");
        return Err(AuthError::StateValidationFailed.into());
    }

    let tokens = state
        .oauth
        .exchange_code(
            &code,
            &pending.pkce.verifier,
            &state.config.downstream_api.scopes,
        )
        .await?;
    let id_token = tokens
        .id_token
        .as_deref()
        .ok_or_else(|| AuthError::InvalidIdToken("missing id_token".into()))?;
    let principal = Principal::from_id_token(id_token, state.oauth.client_id(), Some(&pending.nonce))?;

    let session_id = state.sessions.rotate(&pending_id).await;
    state.tokens.rotate(&pending_id, &session_id).await;

    info!("User {} signed in", principal.display_name());
    state.tokens.store(&session_id, tokens).await;
    state.sessions.complete_sign_in(&session_id, principal).await;

    cookies.add(state.session_cookie(&session_id));
    Ok(Redirect::to(&pending.return_to).into_response())
}

/// Drop the session and its tokens, then sign out at the identity provider.
#[instrument(skip_all)]
pub async fn sign_out(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
) -> Result<Response, AppError> {
    if let Some(session_id) = session_from_cookies(&cookies) {
        state.sessions.remove(&session_id).await;
        state.tokens.invalidate(&session_id).await;
        info!("Session signed out");
    }

    let location = state
        .oauth
        .logout_url(&state.config.post_logout_redirect_uri())
        .map_err(|e| state.consent.handle_exception(e))?;

    cookies.remove(state.removal_cookie());
    Ok(Redirect::to(location.as_str()).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::encode_test_id_token;
    use crate::auth::oauth::TokenResponse;
    use crate::auth::secure::SecureString;
    use crate::config::test_config;
    use crate::web::{router, SESSION_COOKIE};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use base64::{engine::general_purpose::STANDARD, Engine};
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;
    use tower::ServiceExt;
    use url::Url;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn state_for(server: &MockServer) -> Arc<AppState> {
        Arc::new(AppState::new(test_config(&server.uri())).unwrap())
    }

    async fn get(state: &Arc<AppState>, uri: &str, session: Option<&SessionId>) -> Response {
        let mut request = Request::builder().uri(uri);
        if let Some(id) = session {
            request = request.header(header::COOKIE, format!("{}={}", SESSION_COOKIE, id));
        }
        router(Arc::clone(state))
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn location(response: &Response) -> String {
        response.headers()[header::LOCATION]
            .to_str()
            .unwrap()
            .to_string()
    }

    /// Session id from the response's `Set-Cookie` header.
    fn session_cookie_of(response: &Response) -> SessionId {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .filter_map(|pair| pair.split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .and_then(|(_, value)| SessionId::parse(value))
            .unwrap()
    }

    async fn mount_code_exchange(server: &MockServer, nonce: &str) {
        let id_token = encode_test_id_token(&json!({
            "aud": "test-client",
            "exp": Utc::now().timestamp() + 3600,
            "nonce": nonce,
            "sub": "sub-1",
            "name": "Adele Vance",
            "preferred_username": "adele@contoso.com"
        }));
        Mock::given(method("POST"))
            .and(path("/test-tenant/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=auth-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "graph-token",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "rt-1",
                "id_token": id_token
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    fn query_of(location: &str) -> HashMap<String, String> {
        Url::parse(location)
            .unwrap()
            .query_pairs()
            .into_owned()
            .collect()
    }

    async fn sign_in_as(state: &Arc<AppState>, roles: &[&str]) -> SessionId {
        let session = SessionId::generate();
        let principal = Principal {
            subject: "sub-1".into(),
            name: Some("Adele Vance".into()),
            preferred_username: Some("adele@contoso.com".into()),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            claims: vec![
                ("name".into(), "Adele Vance".into()),
                ("oid".into(), "oid-1".into()),
            ],
        };
        state.sessions.complete_sign_in(&session, principal).await;
        state
            .tokens
            .store(
                &session,
                TokenResponse {
                    access_token: SecureString::new("graph-token".into()),
                    expires_in: 3600,
                    refresh_token: Some(SecureString::new("rt-1".into())),
                    id_token: None,
                    scope: String::new(),
                },
            )
            .await;
        session
    }

    #[tokio::test]
    async fn test_anonymous_request_redirects_to_sign_in() {
        let server = MockServer::start().await;
        let state = state_for(&server).await;

        let response = get(&state, "/profile", None).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/signin?return_to=%2Fprofile");
    }

    #[tokio::test]
    async fn test_sign_in_round_trip() {
        let server = MockServer::start().await;
        let state = state_for(&server).await;

        let response = get(&state, "/signin?return_to=/profile", None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Path=/"));
        let pending = session_cookie_of(&response);

        let authorize = query_of(&location(&response));
        assert_eq!(authorize["client_id"], "test-client");
        assert_eq!(
            authorize["scope"],
            "openid profile offline_access user.read group.read.all"
        );
        assert_eq!(authorize["code_challenge_method"], "S256");

        mount_code_exchange(&server, &authorize["nonce"]).await;
        let callback = format!(
            "/signin-oidc?code=auth-code&state={}",
            authorize["state"]
        );
        let response = get(&state, &callback, Some(&pending)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/profile");
        let session = session_cookie_of(&response);
        assert_ne!(session, pending);

        let response = get(&state, "/", Some(&session)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("Welcome, Adele Vance"));
        assert!(body.contains("adele@contoso.com"));

        // The pre-sign-in id never becomes an authenticated session
        let response = get(&state, "/", Some(&pending)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn test_sign_in_ignores_planted_session_cookie() {
        let server = MockServer::start().await;
        let state = state_for(&server).await;
        let planted = SessionId::generate();

        let response = get(&state, "/signin", Some(&planted)).await;
        let pending = session_cookie_of(&response);
        assert_ne!(pending, planted);
        let authorize = query_of(&location(&response));

        mount_code_exchange(&server, &authorize["nonce"]).await;
        let callback = format!(
            "/signin-oidc?code=auth-code&state={}",
            authorize["state"]
        );
        let response = get(&state, &callback, Some(&pending)).await;
        let session = session_cookie_of(&response);

        assert!(state.sessions.touch(&planted).await.is_none());
        assert!(state.sessions.touch(&pending).await.is_none());
        assert!(state.sessions.touch(&session).await.unwrap().principal.is_some());
        state
            .tokens
            .acquire_token(&session, &state.config.downstream_api.scopes)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sign_in_return_to_with_control_characters_lands_home() {
        let server = MockServer::start().await;
        let state = state_for(&server).await;

        let response = get(&state, "/signin?return_to=/%09/evil.example.com", None).await;
        let pending = session_cookie_of(&response);
        let authorize = query_of(&location(&response));

        mount_code_exchange(&server, &authorize["nonce"]).await;
        let callback = format!(
            "/signin-oidc?code=auth-code&state={}",
            authorize["state"]
        );
        let response = get(&state, &callback, Some(&pending)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/");
    }

    #[tokio::test]
    async fn test_callback_with_wrong_state_is_rejected() {
        let server = MockServer::start().await;
        let state = state_for(&server).await;

        let response = get(&state, "/signin", None).await;
        let session = session_cookie_of(&response);

        let response = get(&state, "/signin-oidc?code=c&state=forged", Some(&session)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_session_cookie_is_treated_as_anonymous() {
        let server = MockServer::start().await;
        let state = state_for(&server).await;

        let response = router(Arc::clone(&state))
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(
                        header::COOKIE,
                        format!("theme=dark; {}=../../etc", SESSION_COOKIE),
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/signin?return_to=%2F");
    }

    #[tokio::test]
    async fn test_callback_error_renders_error_page() {
        let server = MockServer::start().await;
        let state = state_for(&server).await;

        let response = get(
            &state,
            "/signin-oidc?error=access_denied&error_description=User%20cancelled",
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response)
            .await
            .contains("Sign-in failed. Please try again."));
    }

    #[tokio::test]
    async fn test_privacy_requires_role() {
        let server = MockServer::start().await;
        let state = state_for(&server).await;

        let without_role = sign_in_as(&state, &["App.Role.1"]).await;
        let response = get(&state, "/privacy", Some(&without_role)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let with_role = sign_in_as(&state, &[PRIVACY_ROLE]).await;
        let response = get(&state, "/privacy", Some(&with_role)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_error_page_is_not_cached() {
        let server = MockServer::start().await;
        let state = state_for(&server).await;

        let response = router(Arc::clone(&state))
            .oneshot(
                Request::builder()
                    .uri("/error")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        assert!(body_text(response).await.contains("req-42"));
    }

    #[tokio::test]
    async fn test_profile_renders() {
        let server = MockServer::start().await;
        let state = state_for(&server).await;
        let session = sign_in_as(&state, &[]).await;

        Mock::given(method("GET"))
            .and(path("/v1.0/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "oid-1",
                "displayName": "Adele Vance",
                "mail": "adele@contoso.com"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/photo/$value"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1.0/groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "g-1", "displayName": "ams-admins"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1.0/groups/g-1/members"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "@odata.count": 1,
                "value": [{"@odata.type": "#microsoft.graph.user", "id": "u-2", "displayName": "Alex Wilber"}]
            })))
            .mount(&server)
            .await;

        let response = get(&state, "/profile", Some(&session)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("adele@contoso.com"));
        assert!(body.contains("<li>Alex Wilber</li>"));
    }

    #[tokio::test]
    async fn test_profile_claims_challenge_redirects_with_claims() {
        let server = MockServer::start().await;
        let state = state_for(&server).await;
        let session = sign_in_as(&state, &[]).await;

        let claims = r#"{"access_token":{"nbf":{"essential":true,"value":"1700000000"}}}"#;
        Mock::given(method("GET"))
            .and(path("/v1.0/me"))
            .respond_with(ResponseTemplate::new(401).insert_header(
                "WWW-Authenticate",
                format!(
                    r#"Bearer error="insufficient_claims", claims="{}""#,
                    STANDARD.encode(claims)
                )
                .as_str(),
            ))
            .mount(&server)
            .await;

        let response = get(&state, "/profile", Some(&session)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let authorize = query_of(&location(&response));
        assert_eq!(authorize["claims"], claims);
        assert_eq!(
            authorize["scope"],
            "openid profile offline_access user.read group.read.all"
        );
        assert_eq!(authorize["login_hint"], "adele@contoso.com");

        // The stale token must not satisfy the next request silently
        let err = state
            .tokens
            .acquire_token(&session, &state.config.downstream_api.scopes)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InteractionRequired));

        // Still signed in while the step-up is in flight
        assert!(state.sessions.touch(&session).await.unwrap().principal.is_some());
    }

    #[tokio::test]
    async fn test_profile_upstream_failure_uses_error_handler() {
        let server = MockServer::start().await;
        let state = state_for(&server).await;
        let session = sign_in_as(&state, &[]).await;

        Mock::given(method("GET"))
            .and(path("/v1.0/me"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal detail"))
            .mount(&server)
            .await;

        let response = get(&state, "/profile", Some(&session)).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(!body_text(response).await.contains("internal detail"));
    }

    #[tokio::test]
    async fn test_sign_out_clears_session() {
        let server = MockServer::start().await;
        let state = state_for(&server).await;
        let session = sign_in_as(&state, &[]).await;

        let response = get(&state, "/signout", Some(&session)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(location(&response).contains("/test-tenant/oauth2/v2.0/logout"));
        assert_eq!(
            query_of(&location(&response))["post_logout_redirect_uri"],
            "http://localhost:5000/"
        );
        assert!(response.headers()[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .contains("Max-Age=0"));

        assert!(state.sessions.touch(&session).await.is_none());
        let response = get(&state, "/", Some(&session)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }
}
