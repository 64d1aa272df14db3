//! Scheduled task bodies
//!
//! The scheduler itself lives outside this crate; it only needs to call
//! these on its own timer.

use std::collections::HashMap;

use super::graph::GraphService;
use crate::data::ActionOutcome;
use crate::error::AppError;

/// Follow the current suggestions
pub async fn run_daily_follow(service: &GraphService) -> HashMap<String, ActionOutcome> {
    tracing::info!("Starting daily follow");

    let suggestions = service.get_suggested_users().await;
    if suggestions.is_empty() {
        tracing::info!("No suggested users available to follow");
        return HashMap::new();
    }

    let results = service.bulk_follow(suggestions).await;
    log_summary("daily follow", &results);
    results
}

/// Unfollow every followed User that does not follow back
///
/// Skipped when either snapshot is partial, so a truncated followers list
/// never turns into unfollows.
pub async fn run_non_reciprocal_sweep(
    service: &GraphService,
) -> Result<HashMap<String, ActionOutcome>, AppError> {
    tracing::info!("Starting non-reciprocal sweep");

    let reconciliation = service.synchronize().await?;
    if !reconciliation.complete {
        tracing::warn!("Snapshots incomplete; skipping sweep");
        return Ok(HashMap::new());
    }
    if reconciliation.not_following_back.is_empty() {
        tracing::info!("No users to unfollow");
        return Ok(HashMap::new());
    }

    let results = service
        .bulk_unfollow(reconciliation.not_following_back)
        .await;
    log_summary("non-reciprocal sweep", &results);
    Ok(results)
}

fn log_summary(task: &str, results: &HashMap<String, ActionOutcome>) {
    let failed: Vec<&String> = results
        .iter()
        .filter(|(_, outcome)| !outcome.success)
        .map(|(login, _)| login)
        .collect();
    tracing::info!(
        task,
        attempted = results.len(),
        failed = failed.len(),
        ?failed,
        "Task completed"
    );
}
