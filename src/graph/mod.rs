//! Microsoft Graph access: typed client and directory models.

pub mod client;
pub mod models;

pub use client::GraphClient;
pub use models::{Group, MemberUser, SkippedMember, UserProfile};
