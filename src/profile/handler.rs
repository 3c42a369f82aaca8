//! Authenticated request handler for the profile page.
//!
//! Runs the Graph calls in order (profile, photo, groups, members) for the
//! signed-in session. A claims challenge from Graph, or a missing token,
//! ends the run with a [`ProfileOutcome::Challenge`] carrying the original
//! scope set; the route turns that into a re-authentication redirect.
//! Photo failures of any kind only leave the photo out.

use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::challenge::ClaimsChallenge;
use crate::auth::scopes::ScopeSet;
use crate::auth::token_provider::TokenProvider;
use crate::config::Config;
use crate::error::{ApiError, AppError, AuthError};
use crate::graph::models::partition_members;
use crate::graph::{GraphClient, Group, MemberUser, SkippedMember, UserProfile};
use crate::profile::selection::GroupSelection;
use crate::session::SessionId;

/// Everything the profile page shows. Partial data is a valid result.
#[derive(Debug, Clone)]
pub struct ProfileView {
    pub me: UserProfile,
    /// Base64-encoded photo, `None` when it could not be fetched.
    pub photo_base64: Option<String>,
    pub group_names: Vec<String>,
    pub selected_group: Option<Group>,
    pub members: Vec<MemberUser>,
    /// Members that are not users, left out of `members`.
    pub skipped_members: Vec<SkippedMember>,
    pub member_count: Option<u64>,
}

/// A request to re-authenticate for `scopes`, optionally with extra claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRequest {
    pub scopes: ScopeSet,
    pub claims: Option<ClaimsChallenge>,
}

#[derive(Debug, Clone)]
pub enum ProfileOutcome {
    Rendered(Box<ProfileView>),
    Challenge(ChallengeRequest),
}

pub struct ProfileHandler {
    graph: Arc<GraphClient>,
    tokens: Arc<TokenProvider>,
    scopes: ScopeSet,
    group_prefix: String,
    selection: GroupSelection,
}

impl ProfileHandler {
    pub fn new(graph: Arc<GraphClient>, tokens: Arc<TokenProvider>, config: &Config) -> Self {
        Self {
            graph,
            tokens,
            scopes: config.downstream_api.scopes.clone(),
            group_prefix: config.profile.group_name_prefix.clone(),
            selection: config.profile.group_selection.clone(),
        }
    }

    /// Fetch everything for the profile page on behalf of `session`.
    ///
    /// # Errors
    ///
    /// Failures other than a claims challenge or a missing token propagate
    /// to the generic error handler.
    pub async fn handle(&self, session: &SessionId) -> Result<ProfileOutcome, AppError> {
        let token = match self.tokens.acquire_token(session, &self.scopes).await {
            Ok(token) => token,
            Err(AuthError::InteractionRequired) => {
                info!("No usable token for profile scopes, sign-in required");
                return Ok(self.challenge(None));
            }
            Err(e) => return Err(e.into()),
        };
        let token = token.as_str();

        let me = match self.graph.get_me(token).await {
            Ok(me) => me,
            Err(e) => return self.recover(e),
        };
        debug!("Fetched profile for {}", me.display_name_or_upn());

        let photo_base64 = match self.graph.get_my_photo(token).await {
            Ok(bytes) if !bytes.is_empty() => Some(STANDARD.encode(bytes)),
            Ok(_) => None,
            Err(e) => {
                warn!("Profile photo unavailable: {}", e);
                None
            }
        };

        let groups = match self
            .graph
            .list_groups_by_prefix(token, &self.group_prefix)
            .await
        {
            Ok(groups) => groups,
            Err(e) => return self.recover(e),
        };
        let group_names = groups
            .iter()
            .map(|g| g.name_or_id().to_string())
            .collect();

        let selected_group = self.selection.select(&groups).cloned();
        let (members, skipped_members, member_count) = match &selected_group {
            Some(group) => {
                let page = match self.graph.list_group_members(token, &group.id).await {
                    Ok(page) => page,
                    Err(e) => return self.recover(e),
                };
                let (users, skipped) = partition_members(page.members);
                for member in &skipped {
                    warn!(
                        "Skipping non-user member {} of type {}",
                        member.id.as_deref().unwrap_or("?"),
                        member.odata_type
                    );
                }
                (users, skipped, page.count)
            }
            None => {
                info!(
                    "No group selected from {} matches for prefix '{}' ({:?})",
                    groups.len(),
                    self.group_prefix,
                    self.selection
                );
                (Vec::new(), Vec::new(), None)
            }
        };

        Ok(ProfileOutcome::Rendered(Box::new(ProfileView {
            me,
            photo_base64,
            group_names,
            selected_group,
            members,
            skipped_members,
            member_count,
        })))
    }

    fn challenge(&self, claims: Option<ClaimsChallenge>) -> ProfileOutcome {
        ProfileOutcome::Challenge(ChallengeRequest {
            scopes: self.scopes.clone(),
            claims,
        })
    }

    /// Turn a claims challenge into a challenge outcome; propagate anything else.
    fn recover(&self, error: ApiError) -> Result<ProfileOutcome, AppError> {
        match error {
            ApiError::ClaimsChallenge(claims) => {
                info!("Continuous access evaluation resulted in claims challenge");
                Ok(self.challenge(Some(claims)))
            }
            other => Err(other.into()),
        }
    }
}
