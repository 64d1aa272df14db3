//! Concurrent bulk executor
//!
//! Fans independent per-item operations out over a bounded worker pool.
//! Every item is isolated: an error or panic in one task lands in that
//! item's result slot and never aborts its siblings.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};

use crate::data::ActionOutcome;
use crate::error::AppError;

/// Bounded worker pool for per-item remote work
#[derive(Debug, Clone)]
pub struct BulkExecutor {
    workers: usize,
    /// Pause after each item, per worker
    item_delay: Duration,
}

impl BulkExecutor {
    pub fn new(workers: usize, item_delay: Duration) -> Self {
        Self {
            workers: workers.max(1),
            item_delay,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Same pool size, different courtesy delay
    pub fn with_item_delay(&self, item_delay: Duration) -> Self {
        Self {
            workers: self.workers,
            item_delay,
        }
    }

    /// Run `operation` once per distinct item
    ///
    /// Results are keyed by item; map order says nothing about completion
    /// or submission order.
    pub async fn run<F, Fut>(&self, items: Vec<String>, operation: F) -> HashMap<String, ActionOutcome>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionOutcome> + Send + 'static,
    {
        let items = unique(items);
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let operation = Arc::new(operation);
        let item_delay = self.item_delay;

        let mut tasks = Vec::with_capacity(items.len());
        for item in items {
            let semaphore = semaphore.clone();
            let operation = operation.clone();
            let key = item.clone();

            let task = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return ActionOutcome::failed("worker pool closed");
                };
                let outcome = operation(item).await;
                if !item_delay.is_zero() {
                    tokio::time::sleep(item_delay).await;
                }
                outcome
            });
            tasks.push((key, task));
        }

        let mut results = HashMap::with_capacity(tasks.len());
        for (item, task) in tasks {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracing::error!(item = %item, %error, "Bulk task aborted");
                    ActionOutcome::failed(format!("task aborted: {error}"))
                }
            };
            results.insert(item, outcome);
        }

        let succeeded = results.values().filter(|o| o.success).count();
        tracing::info!(
            succeeded,
            failed = results.len() - succeeded,
            "Bulk run complete"
        );

        results
    }

    /// Fan `operation` out over `inputs` and merge every successful part
    ///
    /// Workers send partial results over a channel to this single owner.
    /// Failed inputs are logged and excluded.
    pub async fn gather<I, T, F, Fut>(&self, inputs: Vec<I>, operation: F) -> Vec<T>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>, AppError>> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<T>>();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let operation = Arc::new(operation);
        let item_delay = self.item_delay;

        let mut tasks = Vec::with_capacity(inputs.len());
        for (index, input) in inputs.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let operation = operation.clone();
            let tx = tx.clone();

            tasks.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                match operation(input).await {
                    Ok(part) => {
                        let _ = tx.send(part);
                    }
                    Err(error) => {
                        tracing::warn!(index, %error, "Fan-out part failed; excluding it");
                    }
                }
                if !item_delay.is_zero() {
                    tokio::time::sleep(item_delay).await;
                }
            }));
        }
        drop(tx);

        let mut merged = Vec::new();
        while let Some(part) = rx.recv().await {
            merged.extend(part);
        }

        for joined in futures::future::join_all(tasks).await {
            if let Err(error) = joined {
                tracing::error!(%error, "Fan-out task aborted");
            }
        }

        merged
    }
}

/// Drop repeated items, keeping the first occurrence
fn unique(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
