//! Directory resource records returned by Microsoft Graph.

use serde::{Deserialize, Serialize};

/// `@odata.type` discriminator of user directory objects.
pub const USER_ODATA_TYPE: &str = "#microsoft.graph.user";

/// User profile from Microsoft Graph /me endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Unique identifier for the user.
    pub id: String,

    /// User's display name.
    pub display_name: Option<String>,

    /// User's given (first) name.
    pub given_name: Option<String>,

    /// User's surname (last name).
    pub surname: Option<String>,

    /// User's email address.
    pub mail: Option<String>,

    /// User Principal Name (typically email-like format).
    pub user_principal_name: Option<String>,

    /// User's job title.
    pub job_title: Option<String>,

    /// User's office location.
    pub office_location: Option<String>,
}

impl UserProfile {
    /// Get the best available display name.
    pub fn display_name_or_upn(&self) -> String {
        self.display_name
            .clone()
            .or_else(|| self.user_principal_name.clone())
            .unwrap_or_else(|| "Unknown User".to_string())
    }

    /// Get the best available email.
    pub fn email(&self) -> String {
        self.mail
            .clone()
            .or_else(|| self.user_principal_name.clone())
            .unwrap_or_else(|| "No email".to_string())
    }
}

/// A group matched by a display-name filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub display_name: Option<String>,
}

impl Group {
    pub fn name_or_id(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// A generic directory entry as returned by `/groups/{id}/members`.
///
/// Members may be users, groups, devices or service principals; the
/// `@odata.type` discriminator says which.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryObject {
    #[serde(rename = "@odata.type")]
    pub odata_type: Option<String>,
    pub id: Option<String>,
    pub display_name: Option<String>,
}

/// A group member resolved as a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberUser {
    pub id: Option<String>,
    pub display_name: String,
}

/// A group member that is not a user and was left out of the user list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedMember {
    pub odata_type: String,
    pub id: Option<String>,
}

/// Result of checking a directory object's discriminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Member {
    User(MemberUser),
    Other(SkippedMember),
}

impl DirectoryObject {
    /// Inspect the type discriminator before treating the entry as a user.
    pub fn classify(self) -> Member {
        match self.odata_type.as_deref() {
            Some(USER_ODATA_TYPE) => Member::User(MemberUser {
                display_name: self
                    .display_name
                    .or_else(|| self.id.clone())
                    .unwrap_or_default(),
                id: self.id,
            }),
            other => Member::Other(SkippedMember {
                odata_type: other.unwrap_or("unknown").to_string(),
                id: self.id,
            }),
        }
    }
}

/// Split members into users and everything else, keeping order.
pub fn partition_members(
    members: Vec<DirectoryObject>,
) -> (Vec<MemberUser>, Vec<SkippedMember>) {
    let mut users = Vec::new();
    let mut skipped = Vec::new();
    for member in members {
        match member.classify() {
            Member::User(user) => users.push(user),
            Member::Other(other) => skipped.push(other),
        }
    }
    (users, skipped)
}

/// Members of a group plus the server-side count, when requested.
#[derive(Debug, Clone)]
pub struct MemberPage {
    pub members: Vec<DirectoryObject>,
    pub count: Option<u64>,
}

/// OData collection envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct ODataCollection<T> {
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
    #[serde(rename = "@odata.count")]
    pub count: Option<u64>,
}
