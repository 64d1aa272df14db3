//! GraphQL documents
//!
//! Fixed queries live here as constants. Batched per-user lookups go through
//! [`AliasedUserQuery`], which maps entity index to alias (`user_<n>`) and
//! passes every login as a typed variable, so no user input is ever spliced
//! into the document text.

use serde::Deserialize;
use std::fmt::Write as _;

use crate::data::{FollowAction, OwnerType, UserInfo};
use crate::error::AppError;

/// Upper bound on aliases in one document
pub const MAX_ALIASES_PER_QUERY: usize = 10;

/// Maximum login length on the remote platform
const MAX_LOGIN_LEN: usize = 39;

/// `repositoryOwner(login)` -> id and `__typename`
pub const REPOSITORY_OWNER_QUERY: &str = r#"
query ($login: String!) {
  repositoryOwner(login: $login) {
    id
    __typename
  }
}
"#;

/// `user(login).isFollowingViewer`
pub const IS_FOLLOWING_VIEWER_QUERY: &str = r#"
query ($login: String!) {
  user(login: $login) {
    isFollowingViewer
  }
}
"#;

/// Relationship collections of the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Followers,
    Following,
}

impl Edge {
    pub fn field(&self) -> &'static str {
        match self {
            Edge::Followers => "followers",
            Edge::Following => "following",
        }
    }
}

/// Node selection for a traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeShape {
    /// `login`
    Login,
    /// `login followers following`
    Counts,
    /// `login __typename id followers following`
    Owner,
}

impl NodeShape {
    fn selection(&self) -> &'static str {
        match self {
            NodeShape::Login => "login",
            NodeShape::Counts => "login followers { totalCount } following { totalCount }",
            NodeShape::Owner => {
                "login __typename id followers { totalCount } following { totalCount }"
            }
        }
    }
}

/// Query for one page of `viewer.<edge>`
pub fn viewer_edge_query(edge: Edge, shape: NodeShape) -> String {
    format!(
        "query ($cursor: String, $first: Int!) {{\n  viewer {{\n    {field}(first: $first, after: $cursor) {{\n      nodes {{ {selection} }}\n      pageInfo {{ hasNextPage endCursor }}\n    }}\n  }}\n}}\n",
        field = edge.field(),
        selection = shape.selection(),
    )
}

/// Query for one page of `user(login).<edge>`
pub fn user_edge_query(edge: Edge, shape: NodeShape) -> String {
    format!(
        "query ($login: String!, $cursor: String, $first: Int!) {{\n  user(login: $login) {{\n    {field}(first: $first, after: $cursor) {{\n      nodes {{ {selection} }}\n      pageInfo {{ hasNextPage endCursor }}\n    }}\n  }}\n}}\n",
        field = edge.field(),
        selection = shape.selection(),
    )
}

/// Mutation document and the name of its id variable
pub fn mutation_for(action: FollowAction, owner_type: OwnerType) -> Option<(&'static str, &'static str)> {
    match (action, owner_type) {
        (FollowAction::Follow, OwnerType::User) => Some((
            "mutation ($userId: ID!) { followUser(input: {userId: $userId}) { clientMutationId } }",
            "userId",
        )),
        (FollowAction::Unfollow, OwnerType::User) => Some((
            "mutation ($userId: ID!) { unfollowUser(input: {userId: $userId}) { clientMutationId } }",
            "userId",
        )),
        (FollowAction::Follow, OwnerType::Organization) => Some((
            "mutation ($organizationId: ID!) { followOrganization(input: {organizationId: $organizationId}) { clientMutationId } }",
            "organizationId",
        )),
        (FollowAction::Unfollow, OwnerType::Organization) => Some((
            "mutation ($organizationId: ID!) { unfollowOrganization(input: {organizationId: $organizationId}) { clientMutationId } }",
            "organizationId",
        )),
        (_, OwnerType::Unknown) => None,
    }
}

/// Check a login against the platform's rules (alphanumerics and hyphens)
pub fn validate_login(login: &str) -> Result<(), AppError> {
    let valid = !login.is_empty()
        && login.len() <= MAX_LOGIN_LEN
        && login.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!("invalid login: {login:?}")))
    }
}

/// Batched profile lookup with deterministic aliases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasedUserQuery {
    logins: Vec<String>,
}

impl AliasedUserQuery {
    /// Validate the batch
    ///
    /// # Errors
    /// Empty batch, more than [`MAX_ALIASES_PER_QUERY`] logins, or an invalid login
    pub fn new(logins: &[String]) -> Result<Self, AppError> {
        if logins.is_empty() {
            return Err(AppError::Validation("aliased query needs at least one login".to_string()));
        }
        if logins.len() > MAX_ALIASES_PER_QUERY {
            return Err(AppError::Validation(format!(
                "aliased query supports at most {} logins, got {}",
                MAX_ALIASES_PER_QUERY,
                logins.len()
            )));
        }
        for login in logins {
            validate_login(login)?;
        }
        Ok(Self {
            logins: logins.to_vec(),
        })
    }

    pub fn alias(index: usize) -> String {
        format!("user_{index}")
    }

    pub fn len(&self) -> usize {
        self.logins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logins.is_empty()
    }

    /// Login requested under `alias`
    pub fn login_for_alias(&self, alias: &str) -> Option<&str> {
        let index: usize = alias.strip_prefix("user_")?.parse().ok()?;
        self.logins.get(index).map(String::as_str)
    }

    /// Document text and variables
    pub fn render(&self) -> (String, serde_json::Value) {
        let mut params = Vec::with_capacity(self.logins.len());
        let mut body = String::new();
        let mut variables = serde_json::Map::new();

        for (index, login) in self.logins.iter().enumerate() {
            let var = format!("login_{index}");
            params.push(format!("${var}: String!"));
            let _ = writeln!(
                body,
                "  {alias}: user(login: ${var}) {{ ...UserInfoFields }}",
                alias = Self::alias(index)
            );
            variables.insert(var, serde_json::Value::String(login.clone()));
        }

        let query = format!(
            "query ({params}) {{\n{body}}}\n\nfragment UserInfoFields on User {{\n  login\n  bio\n  followers {{ totalCount }}\n  following {{ totalCount }}\n  repositories(privacy: PUBLIC) {{ totalCount }}\n}}\n",
            params = params.join(", "),
        );
        (query, serde_json::Value::Object(variables))
    }

    /// Decode the `data` object, in alias order, skipping unknown users
    pub fn parse(&self, data: &serde_json::Value) -> Vec<UserInfo> {
        (0..self.logins.len())
            .filter_map(|index| {
                let node = data.get(Self::alias(index))?;
                if node.is_null() {
                    tracing::debug!(login = %self.logins[index], "User not found");
                    return None;
                }
                match serde_json::from_value::<UserInfoNode>(node.clone()) {
                    Ok(node) => Some(node.into()),
                    Err(error) => {
                        tracing::warn!(login = %self.logins[index], %error, "Malformed user node");
                        None
                    }
                }
            })
            .collect()
    }
}

/// `{ totalCount }`
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TotalCount {
    #[serde(rename = "totalCount")]
    pub total_count: u64,
}

#[derive(Debug, Deserialize)]
struct UserInfoNode {
    login: String,
    #[serde(default)]
    bio: Option<String>,
    followers: TotalCount,
    following: TotalCount,
    repositories: TotalCount,
}

impl From<UserInfoNode> for UserInfo {
    fn from(node: UserInfoNode) -> Self {
        Self {
            login: node.login,
            followers: node.followers.total_count,
            following: node.following.total_count,
            bio: node.bio.unwrap_or_default(),
            public_repos: node.repositories.total_count,
        }
    }
}
