//! Remote graph API module
//!
//! Handles:
//! - GraphQL transport (the only network boundary)
//! - Rate-aware request execution (throttle, retry, backoff)
//! - Rate-limit introspection
//! - Typed query building
//! - Cursor pagination

mod executor;
mod pagination;
mod query;
mod rate_limit;
mod transport;

pub use executor::RequestExecutor;
pub use pagination::{EdgeFetcher, Fetched};
pub use query::{
    AliasedUserQuery, Edge, IS_FOLLOWING_VIEWER_QUERY, MAX_ALIASES_PER_QUERY, NodeShape,
    REPOSITORY_OWNER_QUERY, mutation_for, user_edge_query, validate_login, viewer_edge_query,
};
pub use rate_limit::{RATE_LIMIT_QUERY, RateLimitMemo, RateLimitSnapshot};
pub use transport::{GraphQlRequest, GraphTransport, HttpTransport, RawResponse};

#[cfg(test)]
pub(crate) use transport::MockGraphTransport;
