//! The profile page: profile, photo, groups and group members of the
//! signed-in user, fetched from Microsoft Graph.

pub mod handler;
pub mod selection;

pub use handler::{ProfileHandler, ProfileOutcome, ProfileView};
pub use selection::GroupSelection;
