//! Common test utilities for E2E tests
//!
//! `MockGitHub` serves a scripted GraphQL endpoint on an ephemeral port so
//! the real `reqwest` transport, executor and pagination run end to end.

#![allow(dead_code)]

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use followsync::{GraphService, config};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const TOKEN: &str = "ghp_e2e";
pub const VIEWER: &str = "viewer";

/// Scripted remote graph
#[derive(Debug, Default)]
pub struct Graph {
    pub followers: Vec<String>,
    /// (login, `__typename`)
    pub following: Vec<(String, &'static str)>,
    /// Accounts each login follows (seed traversal)
    pub user_following: HashMap<String, Vec<String>>,
    /// Logins with no remote owner
    pub missing: HashSet<String>,
    /// Logins whose mutations fail
    pub failing: HashSet<String>,
    /// Logins that follow the viewer (isFollowingViewer)
    pub follows_viewer: HashSet<String>,
    pub rate_limit_remaining: u32,
    /// Answer the next N requests with 502
    pub fail_next: usize,
    /// Answer the next N requests with a rate-limited 403
    pub throttle_next: usize,
    /// Answer every page after the first with 502
    pub break_pagination: bool,
    /// (mutation field, id) in arrival order
    pub mutations: Vec<(String, String)>,
    /// Query text of every request
    pub requests: Vec<String>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            rate_limit_remaining: 5000,
            ..Self::default()
        }
    }

    pub fn with_followers(mut self, logins: &[&str]) -> Self {
        self.followers = logins.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_following(mut self, entries: &[(&str, &'static str)]) -> Self {
        self.following = entries.iter().map(|(l, t)| (l.to_string(), *t)).collect();
        self
    }

    pub fn count_requests(&self, needle: &str) -> usize {
        self.requests.iter().filter(|q| q.contains(needle)).count()
    }
}

type Shared = Arc<Mutex<Graph>>;

/// Running mock endpoint
pub struct MockGitHub {
    pub url: String,
    pub graph: Shared,
}

impl MockGitHub {
    pub async fn start(graph: Graph) -> Self {
        let graph = Arc::new(Mutex::new(graph));
        let app = Router::new()
            .route("/graphql", post(graphql))
            .with_state(graph.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}/graphql", addr),
            graph,
        }
    }

    pub fn graph(&self) -> std::sync::MutexGuard<'_, Graph> {
        self.graph.lock().unwrap()
    }
}

/// Test configuration pointing at `api_url`, state files in `data_dir`
pub fn test_config(api_url: &str, data_dir: &std::path::Path) -> config::AppConfig {
    config::AppConfig {
        github: config::GitHubConfig {
            token: TOKEN.to_string(),
            username: VIEWER.to_string(),
            api_url: api_url.to_string(),
            user_agent: "followsync-e2e".to_string(),
            request_timeout_secs: 5,
        },
        executor: config::ExecutorConfig {
            min_interval_ms: 0,
            rate_limit_threshold: 100,
            max_attempts: 3,
            backoff_base_ms: 10,
            max_rate_limit_wait_secs: 1,
            snapshot_ttl_secs: 60,
        },
        fetch: config::FetchConfig {
            page_size: 2,
            page_delay_ms: 0,
        },
        bulk: config::BulkConfig {
            workers: 3,
            mutation_delay_ms: 0,
            info_chunk_size: 5,
            allow_organizations: false,
        },
        storage: config::StorageConfig {
            data_dir: data_dir.to_path_buf(),
            previous_followers_file: "previous_followers.txt".to_string(),
            new_followers_file: "new_followers.json".to_string(),
            ignore_list_file: "ignore_list.txt".to_string(),
            cache_file: "user_following_cache.json".to_string(),
        },
        retention: config::RetentionConfig {
            new_follower_days: 3,
            follows_viewer_ttl_hours: 24,
        },
        suggestions: config::SuggestionConfig {
            seed_count: 20,
            max_suggestions: 25,
            seed_max_pages: 0,
            min_followers: None,
            min_following: None,
        },
        logging: config::LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// Mock endpoint plus a service wired to it
pub struct TestEnv {
    pub remote: MockGitHub,
    pub service: GraphService,
    pub dir: TempDir,
}

impl TestEnv {
    pub async fn new(graph: Graph) -> Self {
        Self::with_config(graph, |_| {}).await
    }

    pub async fn with_config(graph: Graph, adjust: impl FnOnce(&mut config::AppConfig)) -> Self {
        let remote = MockGitHub::start(graph).await;
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&remote.url, dir.path());
        adjust(&mut config);
        let service = GraphService::new(config).unwrap();
        Self { remote, service, dir }
    }

    /// Fresh service over the same remote and state files
    pub fn restart(&self) -> GraphService {
        GraphService::new(test_config(&self.remote.url, self.dir.path())).unwrap()
    }

    pub fn path(&self, file: &str) -> std::path::PathBuf {
        self.dir.path().join(file)
    }
}

// =============================================================================
// GraphQL handler
// =============================================================================

async fn graphql(State(graph): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"));
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "Bad credentials").into_response();
    }

    let query = body["query"].as_str().unwrap_or_default().to_string();
    let variables = body["variables"].clone();
    let mut graph = graph.lock().unwrap();
    graph.requests.push(query.clone());

    if graph.fail_next > 0 {
        graph.fail_next -= 1;
        return (StatusCode::BAD_GATEWAY, "upstream hiccup").into_response();
    }
    if graph.break_pagination && variables["cursor"].is_string() {
        return (StatusCode::BAD_GATEWAY, "upstream hiccup").into_response();
    }
    if graph.throttle_next > 0 {
        graph.throttle_next -= 1;
        let reset = chrono::Utc::now().timestamp() + 1;
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-reset", HeaderValue::from(reset));
        return (
            StatusCode::FORBIDDEN,
            headers,
            "You have exceeded a secondary rate limit",
        )
            .into_response();
    }

    let response = dispatch(&mut graph, &query, &variables);
    let remaining = graph.rate_limit_remaining;
    let mut headers = HeaderMap::new();
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    (StatusCode::OK, headers, Json(response)).into_response()
}

fn dispatch(graph: &mut Graph, query: &str, variables: &Value) -> Value {
    let login = variables["login"].as_str().unwrap_or_default().to_string();

    if query.contains("rateLimit") {
        return json!({"data": {"rateLimit": {
            "limit": 5000, "cost": 1,
            "remaining": graph.rate_limit_remaining,
            "resetAt": (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339()
        }}});
    }

    if query.trim_start().starts_with("mutation") {
        return mutation(graph, query, variables);
    }

    if query.contains("repositoryOwner") {
        if graph.missing.contains(&login) {
            return json!({"data": {"repositoryOwner": null}});
        }
        let typename = graph
            .following
            .iter()
            .find(|(l, _)| *l == login)
            .map(|(_, t)| *t)
            .unwrap_or("User");
        let prefix = if typename == "Organization" { "O" } else { "U" };
        return json!({"data": {"repositoryOwner": {"id": format!("{prefix}_{login}"), "__typename": typename}}});
    }

    if query.contains("isFollowingViewer") {
        let follows = graph.follows_viewer.contains(&login);
        return json!({"data": {"user": {"isFollowingViewer": follows}}});
    }

    if query.contains("UserInfoFields") {
        return users_info(graph, variables);
    }

    let first = variables["first"].as_u64().unwrap_or(100) as usize;
    let offset = variables["cursor"]
        .as_str()
        .and_then(|c| c.parse::<usize>().ok())
        .unwrap_or(0);

    if query.contains("user(login: $login)") {
        let nodes: Vec<Value> = graph
            .user_following
            .get(&login)
            .map(|logins| logins.iter().map(|l| json!({"login": l})).collect())
            .unwrap_or_default();
        return json!({"data": {"user": {"following": page(nodes, first, offset)}}});
    }

    if query.contains("followers(first") {
        let nodes = graph
            .followers
            .iter()
            .enumerate()
            .map(|(i, l)| {
                json!({
                    "login": l,
                    "followers": {"totalCount": i},
                    "following": {"totalCount": i * 3}
                })
            })
            .collect();
        return json!({"data": {"viewer": {"followers": page(nodes, first, offset)}}});
    }

    if query.contains("following(first") {
        let nodes = graph
            .following
            .iter()
            .map(|(l, t)| {
                let prefix = if *t == "Organization" { "O" } else { "U" };
                json!({
                    "login": l, "__typename": t, "id": format!("{prefix}_{l}"),
                    "followers": {"totalCount": 10}, "following": {"totalCount": 1}
                })
            })
            .collect();
        return json!({"data": {"viewer": {"following": page(nodes, first, offset)}}});
    }

    json!({"errors": [{"message": format!("unsupported query: {query}")}]})
}

fn page(nodes: Vec<Value>, first: usize, offset: usize) -> Value {
    let end = (offset + first).min(nodes.len());
    let slice = nodes.get(offset..end).map(<[Value]>::to_vec).unwrap_or_default();
    let has_next = end < nodes.len();
    json!({
        "nodes": slice,
        "pageInfo": {"hasNextPage": has_next, "endCursor": has_next.then(|| end.to_string())}
    })
}

fn mutation(graph: &mut Graph, query: &str, variables: &Value) -> Value {
    let field = ["unfollowOrganization", "followOrganization", "unfollowUser", "followUser"]
        .into_iter()
        .find(|f| query.contains(*f))
        .unwrap_or("unknown");
    let id = variables["userId"]
        .as_str()
        .or_else(|| variables["organizationId"].as_str())
        .unwrap_or_default()
        .to_string();
    let login = id.split_once('_').map(|(_, l)| l.to_string()).unwrap_or_default();

    if graph.failing.contains(&login) {
        return json!({"errors": [{"type": "FORBIDDEN", "message": format!("{login} has blocked you")}]});
    }
    graph.mutations.push((field.to_string(), id));
    let mut data = serde_json::Map::new();
    data.insert(field.to_string(), json!({"clientMutationId": null}));
    json!({"data": data})
}

fn users_info(graph: &Graph, variables: &Value) -> Value {
    let mut data = serde_json::Map::new();
    let mut errors = Vec::new();
    for (name, login) in variables.as_object().into_iter().flatten() {
        let alias = name.replace("login_", "user_");
        let login = login.as_str().unwrap_or_default();
        if graph.missing.contains(login) {
            data.insert(alias, Value::Null);
            errors.push(json!({"type": "NOT_FOUND", "message": format!("Could not resolve to a User with the login of '{login}'.")}));
        } else {
            data.insert(
                alias,
                json!({
                    "login": login, "bio": format!("bio of {login}"),
                    "followers": {"totalCount": login.len()},
                    "following": {"totalCount": login.len() * 2},
                    "repositories": {"totalCount": 1}
                }),
            );
        }
    }
    if errors.is_empty() {
        json!({"data": data})
    } else {
        json!({"data": data, "errors": errors})
    }
}
