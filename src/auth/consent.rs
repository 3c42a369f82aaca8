//! Incremental consent and step-up: sends the user back through sign-in
//! with the original scopes and any claims a protected API demanded.

use std::sync::Arc;
use tracing::{error, info};
use url::Url;

use crate::auth::challenge::ClaimsChallenge;
use crate::auth::claims::Principal;
use crate::auth::oauth::{AuthorizeRequest, OAuth2Client};
use crate::auth::scopes::ScopeSet;
use crate::error::{AppError, ConsentError};
use crate::session::PendingSignIn;

/// Where to send the browser, and what the callback must match when it comes back.
#[derive(Debug, Clone)]
pub struct ChallengeRedirect {
    pub location: Url,
    pub pending: PendingSignIn,
}

pub struct ConsentHandler {
    oauth_client: Arc<OAuth2Client>,
}

impl ConsentHandler {
    pub fn new(oauth_client: Arc<OAuth2Client>) -> Self {
        Self { oauth_client }
    }

    /// Start a fresh authorization for `scopes`, forwarding `claims` when a
    /// protected API asked for them.
    ///
    /// The caller ends the current request with a redirect to
    /// [`ChallengeRedirect::location`]; control does not come back to the
    /// code that raised the challenge.
    pub fn challenge_user(
        &self,
        scopes: &ScopeSet,
        claims: Option<&ClaimsChallenge>,
        principal: Option<&Principal>,
        return_to: &str,
    ) -> Result<ChallengeRedirect, ConsentError> {
        let redirect = self.oauth_client.authorize(AuthorizeRequest {
            scopes,
            claims,
            login_hint: principal.and_then(|p| p.preferred_username.as_deref()),
        })?;

        info!(
            "Challenging user for scopes [{}]{}",
            scopes,
            if claims.is_some() { " with claims" } else { "" }
        );

        Ok(ChallengeRedirect {
            location: redirect.url,
            pending: PendingSignIn {
                state: redirect.state,
                nonce: redirect.nonce,
                pkce: redirect.pkce,
                return_to: sanitize_return_to(return_to),
            },
        })
    }

    /// Forward a structural consent failure to the generic error handler.
    pub fn handle_exception(&self, error: ConsentError) -> AppError {
        error!("Consent flow could not be started: {}", error);
        AppError::Consent(error)
    }
}

/// Keep return targets on this site: a rooted local path, or `/`.
pub fn sanitize_return_to(return_to: &str) -> String {
    // Browsers drop tabs and newlines from URLs, so "/\t/host" would become "//host".
    let plain = !return_to.chars().any(|c| c.is_ascii_control() || c == '\\');
    if plain && return_to.starts_with('/') && stays_on_site(return_to) {
        return_to.to_string()
    } else {
        "/".to_string()
    }
}

fn stays_on_site(path: &str) -> bool {
    let Ok(base) = Url::parse("http://localhost/") else {
        return false;
    };
    base.join(path)
        .is_ok_and(|joined| joined.origin() == base.origin())
}
