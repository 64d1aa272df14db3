//! Data models
//!
//! Identity, snapshot and result types shared by every layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalize a login for local comparisons (trimmed, case-folded)
pub fn normalize_login(login: &str) -> String {
    login.trim().to_lowercase()
}

/// Remote account kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerType {
    User,
    Organization,
    /// Any `__typename` this crate does not model
    #[serde(other)]
    Unknown,
}

impl OwnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerType::User => "User",
            OwnerType::Organization => "Organization",
            OwnerType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved remote owner (cached without TTL)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    #[serde(rename = "type")]
    pub owner_type: OwnerType,
}

/// Entry of the "accounts the viewer follows" snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowingEntry {
    pub login: String,
    #[serde(rename = "type")]
    pub owner_type: OwnerType,
    pub id: String,
    pub followers: u64,
    pub following: u64,
}

impl FollowingEntry {
    /// Whether the follow/unfollow mutation path can act on this entry
    pub fn is_followable_user(&self) -> bool {
        self.owner_type == OwnerType::User && !self.id.is_empty()
    }
}

/// Follower together with its own graph counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowerEntry {
    pub login: String,
    pub followers: u64,
    pub following: u64,
}

/// Follower who follows more accounts than follow them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoreFollowingEntry {
    pub login: String,
    pub followers: u64,
    pub following: u64,
    pub difference: i64,
}

/// Profile details used to enrich derived lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub login: String,
    pub followers: u64,
    pub following: u64,
    #[serde(default)]
    pub bio: String,
    pub public_repos: u64,
}

/// Follow or unfollow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FollowAction {
    Follow,
    Unfollow,
}

impl FollowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowAction::Follow => "follow",
            FollowAction::Unfollow => "unfollow",
        }
    }
}

/// Per-item result of a single or bulk action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
}

impl ActionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: String::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
