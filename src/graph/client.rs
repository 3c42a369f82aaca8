//! Microsoft Graph API client for the profile page.
//!
//! Every call returns a classified [`ApiError`] on failure. A claims
//! challenge is recognised from the `WWW-Authenticate` header, not from the
//! error text.

use anyhow::{Context, Result};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use super::models::{DirectoryObject, Group, MemberPage, ODataCollection, UserProfile};
use crate::auth::challenge::claims_challenge_from_headers;
use crate::error::ApiError;

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on followed `@odata.nextLink` pages per collection.
const MAX_PAGES: usize = 20;

/// Microsoft Graph API client.
pub struct GraphClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl GraphClient {
    /// Create a new Graph client for the given API root,
    /// e.g. `https://graph.microsoft.com/v1.0`.
    pub fn new(base_url: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the current user's profile.
    pub async fn get_me(&self, access_token: &str) -> Result<UserProfile, ApiError> {
        let url = format!("{}/me", self.base_url);
        let response = send(self.http_client.get(&url).bearer_auth(access_token)).await?;

        response
            .json()
            .await
            .map_err(|e| ApiError::ParseFailed(e.to_string()))
    }

    /// Fetch the current user's photo bytes.
    pub async fn get_my_photo(&self, access_token: &str) -> Result<Vec<u8>, ApiError> {
        let url = format!("{}/me/photo/$value", self.base_url);
        let response = send(self.http_client.get(&url).bearer_auth(access_token)).await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::ParseFailed(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    /// List groups whose display name starts with `prefix`.
    pub async fn list_groups_by_prefix(
        &self,
        access_token: &str,
        prefix: &str,
    ) -> Result<Vec<Group>, ApiError> {
        let url = format!("{}/groups", self.base_url);
        let filter = format!("startswith(displayName, '{}')", prefix.replace('\'', "''"));

        let request = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("$filter", filter.as_str()), ("$select", "displayName,id")]);

        let (groups, _) = self.collect_pages(request, access_token).await?;
        debug!("Found {} groups with prefix '{}'", groups.len(), prefix);
        Ok(groups)
    }

    /// List the members of a group, ordered by display name.
    ///
    /// Uses an eventually-consistent read so the total count can be requested.
    pub async fn list_group_members(
        &self,
        access_token: &str,
        group_id: &str,
    ) -> Result<MemberPage, ApiError> {
        let url = format!(
            "{}/groups/{}/members",
            self.base_url,
            urlencoding::encode(group_id)
        );

        let request = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .header("ConsistencyLevel", "eventual")
            .query(&[
                ("$count", "true"),
                ("$select", "displayName"),
                ("$orderby", "displayName"),
            ]);

        let (members, count) = self
            .collect_pages::<DirectoryObject>(request, access_token)
            .await?;
        debug!("Group {} has {} members", group_id, members.len());
        Ok(MemberPage { members, count })
    }

    /// Send `first` and follow `@odata.nextLink` until the collection ends.
    async fn collect_pages<T: DeserializeOwned>(
        &self,
        first: RequestBuilder,
        access_token: &str,
    ) -> Result<(Vec<T>, Option<u64>), ApiError> {
        let mut page: ODataCollection<T> = parse_json(send(first).await?).await?;
        let count = page.count;
        let mut items = std::mem::take(&mut page.value);
        let mut pages = 1;

        while let Some(next) = page.next_link.take() {
            if pages >= MAX_PAGES {
                warn!("Stopping after {} pages of results", MAX_PAGES);
                break;
            }
            if !next.starts_with(&format!("{}/", self.base_url)) {
                warn!("Ignoring nextLink outside the Graph API root: {}", next);
                break;
            }
            let request = self
                .http_client
                .get(&next)
                .bearer_auth(access_token)
                .header("ConsistencyLevel", "eventual");
            page = parse_json(send(request).await?).await?;
            items.append(&mut page.value);
            pages += 1;
        }

        Ok((items, count))
    }
}

/// Send a request and turn any non-success response into a classified error.
async fn send(request: RequestBuilder) -> Result<Response, ApiError> {
    let response = request
        .send()
        .await
        .map_err(|e| ApiError::GraphRequestFailed(e.to_string()))?;

    if response.status().is_success() {
        Ok(response)
    } else {
        Err(classify_error(response).await)
    }
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    response
        .json()
        .await
        .map_err(|e| ApiError::ParseFailed(e.to_string()))
}

/// Map a failed Graph response onto an [`ApiError`].
async fn classify_error(response: Response) -> ApiError {
    if let Some(challenge) = claims_challenge_from_headers(response.headers()) {
        debug!("Graph responded with a claims challenge");
        return ApiError::ClaimsChallenge(challenge);
    }

    let status = response.status();
    match status.as_u16() {
        401 => ApiError::Unauthorized,
        403 => ApiError::Forbidden,
        404 => ApiError::NotFound,
        429 => ApiError::RateLimited,
        // Don't expose raw API error details - just log them
        _ => {
            let body = response.text().await.unwrap_or_default();
            warn!("Graph request failed: HTTP {} - {}", status, body);
            ApiError::GraphRequestFailed(format!("HTTP {}", status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde_json::json;
    use wiremock::matchers::{bearer_token, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GraphClient {
        GraphClient::new(&format!("{}/v1.0", server.uri())).unwrap()
    }

    fn cae_response() -> ResponseTemplate {
        let claims = STANDARD.encode(r#"{"access_token":{"nbf":{"essential":true}}}"#);
        ResponseTemplate::new(401).insert_header(
            "WWW-Authenticate",
            format!(
                r#"Bearer realm="", error="insufficient_claims", claims="{}""#,
                claims
            )
            .as_str(),
        )
    }

    #[tokio::test]
    async fn test_get_me() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me"))
            .and(bearer_token("token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "u-1",
                "displayName": "Adele Vance",
                "mail": "adele@contoso.com"
            })))
            .mount(&server)
            .await;

        let me = client_for(&server).get_me("token-1").await.unwrap();
        assert_eq!(me.id, "u-1");
        assert_eq!(me.display_name_or_upn(), "Adele Vance");
    }

    #[tokio::test]
    async fn test_claims_challenge_is_classified_from_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me"))
            .respond_with(cae_response())
            .mount(&server)
            .await;

        let err = client_for(&server).get_me("token").await.unwrap_err();
        let ApiError::ClaimsChallenge(challenge) = err else {
            panic!("expected a claims challenge, got {err:?}");
        };
        assert_eq!(
            challenge.as_str(),
            r#"{"access_token":{"nbf":{"essential":true}}}"#
        );
    }

    #[tokio::test]
    async fn test_plain_401_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me"))
            .respond_with(
                ResponseTemplate::new(401)
                    .insert_header("WWW-Authenticate", r#"Bearer error="invalid_token""#),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).get_me("token").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[tokio::test]
    async fn test_photo_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/photo/$value"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server).get_my_photo("token").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn test_list_groups_sends_prefix_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/groups"))
            .and(query_param("$filter", "startswith(displayName, 'ams')"))
            .and(query_param("$select", "displayName,id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {"id": "g-1", "displayName": "ams-admins"},
                    {"id": "g-2", "displayName": "ams-users"}
                ]
            })))
            .mount(&server)
            .await;

        let groups = client_for(&server)
            .list_groups_by_prefix("token", "ams")
            .await
            .unwrap();
        let ids: Vec<_> = groups.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, ["g-1", "g-2"]);
    }

    #[tokio::test]
    async fn test_foreign_next_link_is_not_followed() {
        let server = MockServer::start().await;
        let elsewhere = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1.0/groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "@odata.nextLink": format!("{}/v1.0/groups?page=2", elsewhere.uri()),
                "value": [{"id": "g-1", "displayName": "ams-admins"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .expect(0)
            .mount(&elsewhere)
            .await;

        let groups = client_for(&server)
            .list_groups_by_prefix("token", "ams")
            .await
            .unwrap();
        assert_eq!(groups.len(), 1);
    }

    #[tokio::test]
    async fn test_list_group_members_uses_eventual_consistency_and_follows_next_link() {
        let server = MockServer::start().await;
        let next = format!("{}/v1.0/groups/g-1/members/page2", server.uri());

        Mock::given(method("GET"))
            .and(path("/v1.0/groups/g-1/members"))
            .and(header("ConsistencyLevel", "eventual"))
            .and(query_param("$count", "true"))
            .and(query_param("$orderby", "displayName"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "@odata.count": 2,
                "@odata.nextLink": next,
                "value": [{"@odata.type": "#microsoft.graph.user", "displayName": "Adele"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1.0/groups/g-1/members/page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"@odata.type": "#microsoft.graph.device", "id": "d-1"}]
            })))
            .mount(&server)
            .await;

        let page = client_for(&server)
            .list_group_members("token", "g-1")
            .await
            .unwrap();
        assert_eq!(page.count, Some(2));
        assert_eq!(page.members.len(), 2);
    }

    #[tokio::test]
    async fn test_server_error_hides_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/groups"))
            .respond_with(ResponseTemplate::new(503).set_body_string("internal details"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .list_groups_by_prefix("token", "ams")
            .await
            .unwrap_err();
        match err {
            ApiError::GraphRequestFailed(msg) => assert_eq!(msg, "HTTP 503"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
