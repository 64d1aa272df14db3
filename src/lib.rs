//! followsync - follower graph synchronization for GitHub accounts
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Callers (CLI / scheduler)                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - GraphService facade                                      │
//! │  - Diff & ledger retention, suggestion sampling             │
//! │  - Bounded bulk executor                                    │
//! └─────────────────────────────────────────────────────────────┘
//!                │                               │
//! ┌──────────────────────────────┐ ┌────────────────────────────┐
//! │         Remote Layer          │ │         Data Layer          │
//! │  - Rate-aware executor        │ │  - Durable cache (JSON)     │
//! │  - Cursor pagination          │ │  - Previous followers       │
//! │  - Typed GraphQL queries      │ │  - New-followers ledger     │
//! │  - reqwest transport          │ │  - Ignore list              │
//! └──────────────────────────────┘ └────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `service`: Engine facade, diffing, sampling, bulk fan-out
//! - `remote`: Everything that talks to the GraphQL API
//! - `data`: Local state files and shared models
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod remote;
pub mod service;

pub use service::GraphService;
