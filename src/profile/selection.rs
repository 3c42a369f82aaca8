//! Rule for picking the group whose members are listed.

use serde::Deserialize;
use std::str::FromStr;

use crate::graph::Group;

/// Which of the groups matching the name prefix to list members for.
///
/// Written in configuration as `first`, `index:<n>` (zero-based) or
/// `name:<display name>` (case-insensitive exact match).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum GroupSelection {
    First,
    Index(usize),
    DisplayName(String),
}

impl GroupSelection {
    /// Pick one group, or `None` when nothing satisfies the rule.
    pub fn select<'a>(&self, groups: &'a [Group]) -> Option<&'a Group> {
        match self {
            Self::First => groups.first(),
            Self::Index(index) => groups.get(*index),
            Self::DisplayName(name) => groups.iter().find(|g| {
                g.display_name
                    .as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
            }),
        }
    }
}

impl FromStr for GroupSelection {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("first") {
            return Ok(Self::First);
        }
        if let Some(index) = value.strip_prefix("index:") {
            return index
                .trim()
                .parse()
                .map(Self::Index)
                .map_err(|_| format!("Invalid group index: {}", index));
        }
        if let Some(name) = value.strip_prefix("name:") {
            let name = name.trim();
            if name.is_empty() {
                return Err("Group name must not be empty".to_string());
            }
            return Ok(Self::DisplayName(name.to_string()));
        }
        Err(format!(
            "Unknown group selection '{}', expected first, index:<n> or name:<display name>",
            value
        ))
    }
}

impl TryFrom<String> for GroupSelection {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
