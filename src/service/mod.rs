//! Service layer
//!
//! Engine logic on top of the remote and data layers:
//! - bounded fan-out of per-item work
//! - snapshot diffing and ledger retention
//! - suggestion sampling
//! - the `GraphService` facade and scheduled task bodies

pub mod bulk;
pub mod diff;
mod graph;
pub mod suggest;
pub mod tasks;

pub use bulk::BulkExecutor;
pub use diff::Reconciliation;
pub use graph::GraphService;
pub use tasks::{run_daily_follow, run_non_reciprocal_sweep};
