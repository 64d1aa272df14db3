//! Paginated collection fetcher
//!
//! Walks a cursor-paginated connection page by page, strictly in cursor
//! order, and flattens the nodes into a deduplicated list. Holds no state
//! between calls.
//!
//! This is a read path: a failed request or an unexpected response shape
//! ends the walk early and returns what was gathered so far, flagged as
//! incomplete.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::executor::RequestExecutor;
use super::query::{Edge, NodeShape, TotalCount, user_edge_query, viewer_edge_query};
use crate::config::FetchConfig;
use crate::data::{FollowerEntry, FollowingEntry, OwnerType};

/// Result of one traversal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched<T> {
    pub items: Vec<T>,
    /// `false` when the walk stopped before the last page
    pub complete: bool,
}

impl<T> Fetched<T> {
    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

/// Raw node of a connection page
pub trait EdgeNode: DeserializeOwned {
    type Output;

    fn login(&self) -> &str;
    fn into_output(self) -> Self::Output;
}

#[derive(Debug, Deserialize)]
pub struct LoginNode {
    login: String,
}

impl EdgeNode for LoginNode {
    type Output = String;

    fn login(&self) -> &str {
        &self.login
    }

    fn into_output(self) -> String {
        self.login
    }
}

#[derive(Debug, Deserialize)]
pub struct CountsNode {
    login: String,
    followers: TotalCount,
    following: TotalCount,
}

impl EdgeNode for CountsNode {
    type Output = FollowerEntry;

    fn login(&self) -> &str {
        &self.login
    }

    fn into_output(self) -> FollowerEntry {
        FollowerEntry {
            login: self.login,
            followers: self.followers.total_count,
            following: self.following.total_count,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OwnerNode {
    login: String,
    #[serde(rename = "__typename")]
    owner_type: OwnerType,
    #[serde(default)]
    id: String,
    #[serde(default)]
    followers: TotalCount,
    #[serde(default)]
    following: TotalCount,
}

impl EdgeNode for OwnerNode {
    type Output = FollowingEntry;

    fn login(&self) -> &str {
        &self.login
    }

    fn into_output(self) -> FollowingEntry {
        FollowingEntry {
            login: self.login,
            owner_type: self.owner_type,
            id: self.id,
            followers: self.followers.total_count,
            following: self.following.total_count,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(rename = "hasNextPage")]
    has_next_page: bool,
    #[serde(rename = "endCursor")]
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(bound = "N: DeserializeOwned")]
struct Connection<N> {
    nodes: Vec<Option<N>>,
    #[serde(rename = "pageInfo")]
    page_info: PageInfo,
}

/// Where a connection hangs in the response
struct EdgeSource {
    query: String,
    /// `viewer` or `user`
    root: &'static str,
    edge: Edge,
    variables: serde_json::Map<String, serde_json::Value>,
}

/// Cursor-based edge traversal over the request executor
#[derive(Clone)]
pub struct EdgeFetcher {
    executor: Arc<RequestExecutor>,
    page_size: u32,
    page_delay: Duration,
}

impl EdgeFetcher {
    pub fn new(executor: Arc<RequestExecutor>, config: &FetchConfig) -> Self {
        Self {
            executor,
            page_size: config.page_size,
            page_delay: Duration::from_millis(config.page_delay_ms),
        }
    }

    /// Logins following the viewer
    pub async fn followers(&self) -> Fetched<String> {
        self.fetch_viewer_edge::<LoginNode>(Edge::Followers, NodeShape::Login)
            .await
    }

    /// Followers of the viewer with their own counts
    pub async fn followers_with_counts(&self) -> Fetched<FollowerEntry> {
        self.fetch_viewer_edge::<CountsNode>(Edge::Followers, NodeShape::Counts)
            .await
    }

    /// Accounts the viewer follows, with type, id and counts
    pub async fn following(&self) -> Fetched<FollowingEntry> {
        self.fetch_viewer_edge::<OwnerNode>(Edge::Following, NodeShape::Owner)
            .await
    }

    /// Logins another user follows, reading at most `max_pages` pages
    pub async fn user_following(&self, login: &str, max_pages: Option<usize>) -> Fetched<String> {
        let mut variables = serde_json::Map::new();
        variables.insert("login".to_string(), serde_json::Value::String(login.to_string()));
        let source = EdgeSource {
            query: user_edge_query(Edge::Following, NodeShape::Login),
            root: "user",
            edge: Edge::Following,
            variables,
        };
        self.traverse::<LoginNode>(source, max_pages).await
    }

    async fn fetch_viewer_edge<N: EdgeNode>(&self, edge: Edge, shape: NodeShape) -> Fetched<N::Output> {
        tracing::info!(edge = edge.field(), "Fetching viewer edge");
        let source = EdgeSource {
            query: viewer_edge_query(edge, shape),
            root: "viewer",
            edge,
            variables: serde_json::Map::new(),
        };
        let fetched = self.traverse::<N>(source, None).await;
        tracing::info!(
            edge = edge.field(),
            count = fetched.items.len(),
            complete = fetched.complete,
            "Edge fetched"
        );
        fetched
    }

    async fn traverse<N: EdgeNode>(&self, source: EdgeSource, max_pages: Option<usize>) -> Fetched<N::Output> {
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        let field = source.edge.field();

        let complete = loop {
            let mut variables = source.variables.clone();
            variables.insert("first".to_string(), serde_json::json!(self.page_size));
            variables.insert("cursor".to_string(), serde_json::json!(cursor));

            let data = match self
                .executor
                .execute(&source.query, serde_json::Value::Object(variables))
                .await
            {
                Ok(data) => data,
                Err(error) => {
                    tracing::error!(edge = field, %error, pages, "Edge fetch failed; returning partial result");
                    break false;
                }
            };

            let Some(raw) = data
                .get(source.root)
                .and_then(|root| root.get(field))
                .filter(|connection| !connection.is_null())
            else {
                tracing::warn!(edge = field, root = source.root, "Unexpected response shape; stopping");
                break false;
            };

            let connection: Connection<N> = match serde_json::from_value(raw.clone()) {
                Ok(connection) => connection,
                Err(error) => {
                    tracing::warn!(edge = field, %error, "Malformed connection page; stopping");
                    break false;
                }
            };

            let batch = connection.nodes.len();
            for node in connection.nodes.into_iter().flatten() {
                if seen.insert(node.login().to_string()) {
                    items.push(node.into_output());
                }
            }
            pages += 1;
            tracing::debug!(edge = field, page = pages, batch, "Fetched page");

            if !connection.page_info.has_next_page {
                break true;
            }
            let Some(next) = connection.page_info.end_cursor else {
                tracing::warn!(edge = field, "hasNextPage without endCursor; stopping");
                break false;
            };
            if max_pages.is_some_and(|max| pages >= max) {
                tracing::debug!(edge = field, pages, "Page cap reached");
                break false;
            }
            cursor = Some(next);

            if !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
        };

        Fetched { items, complete }
    }
}
