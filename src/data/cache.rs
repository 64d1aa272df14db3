//! Durable key/value cache
//!
//! A best-effort accelerator for derived facts (owner ids, follows-viewer
//! checks). The whole map lives in memory and is persisted to a single JSON
//! file on `flush`. The store never expires anything by itself: readers pass
//! the TTL that applies to the key's kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::atomic::write_atomic;
use super::models::normalize_login;
use crate::error::AppError;

/// Cached value plus the moment it was observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl CacheEntry {
    /// Check whether this entry may still be trusted at `now`
    ///
    /// `None` means the kind has no TTL.
    pub fn is_fresh(&self, ttl: Option<chrono::Duration>, now: DateTime<Utc>) -> bool {
        match ttl {
            Some(ttl) => now - self.timestamp < ttl,
            None => true,
        }
    }
}

/// Kinds of cached facts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKey<'a> {
    /// login -> {id, type}; no TTL
    OwnerId(&'a str),
    /// login -> bool; short TTL
    FollowsViewer(&'a str),
}

impl CacheKey<'_> {
    /// Metric / log label
    pub fn kind(&self) -> &'static str {
        match self {
            CacheKey::OwnerId(_) => "owner_id",
            CacheKey::FollowsViewer(_) => "follows_viewer",
        }
    }

    /// Storage key, e.g. `owner_id:octocat`
    pub fn render(&self) -> String {
        match self {
            CacheKey::OwnerId(login) | CacheKey::FollowsViewer(login) => {
                format!("{}:{}", self.kind(), normalize_login(login))
            }
        }
    }
}

/// File-backed cache store
///
/// Single writer per process; the in-memory map is guarded by one lock.
pub struct CacheStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, CacheEntry>>,
    dirty: AtomicBool,
}

impl CacheStore {
    /// Open the store at `path`, tolerating a missing or corrupt file
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = load_cache(&path);
        tracing::debug!(path = %path.display(), entries = entries.len(), "Cache loaded");
        Self {
            path,
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw lookup without TTL evaluation
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().await.get(key).cloned()
    }

    /// Lookup that treats entries older than `ttl` as absent
    pub async fn get_fresh(
        &self,
        key: CacheKey<'_>,
        ttl: Option<chrono::Duration>,
        now: DateTime<Utc>,
    ) -> Option<serde_json::Value> {
        use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};

        let rendered = key.render();
        let hit = {
            let entries = self.entries.read().await;
            match entries.get(&rendered) {
                Some(entry) if entry.is_fresh(ttl, now) => Some(entry.value.clone()),
                Some(_) => {
                    tracing::debug!(key = %rendered, "Cache entry expired");
                    None
                }
                None => None,
            }
        };

        if hit.is_some() {
            CACHE_HITS_TOTAL.with_label_values(&[key.kind()]).inc();
        } else {
            CACHE_MISSES_TOTAL.with_label_values(&[key.kind()]).inc();
        }
        hit
    }

    /// Insert or replace an entry
    pub async fn put(&self, key: &str, value: serde_json::Value, timestamp: DateTime<Utc>) {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), CacheEntry { value, timestamp });
        self.dirty.store(true, Ordering::Release);
    }

    pub async fn remove(&self, key: &str) {
        let mut entries = self.entries.write().await;
        if entries.remove(key).is_some() {
            self.dirty.store(true, Ordering::Release);
        }
    }

    /// Drop every entry (explicit cache reset)
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
        self.dirty.store(true, Ordering::Release);
        tracing::info!("Cleared all cache entries");
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Persist the map if anything changed since the last flush
    pub async fn flush(&self) -> Result<(), AppError> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let snapshot = self.entries.read().await.clone();
        let path = self.path.clone();
        let result = tokio::task::spawn_blocking(move || save_cache(&path, &snapshot))
            .await
            .map_err(|e| AppError::Internal(e.into()))
            .and_then(|inner| inner);

        if result.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        result
    }
}

/// Read a cache file
///
/// A missing file, an empty file, unparsable JSON or a non-object root all
/// yield an empty map. Individual malformed entries are skipped.
pub fn load_cache(path: &Path) -> HashMap<String, CacheEntry> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "Failed to read cache; starting empty");
            return HashMap::new();
        }
    };

    if raw.trim().is_empty() {
        return HashMap::new();
    }

    let root: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(root) => root,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "Failed to decode cache JSON; starting empty");
            return HashMap::new();
        }
    };

    let Some(object) = root.as_object() else {
        tracing::warn!(path = %path.display(), "Cache root is not a mapping; starting empty");
        return HashMap::new();
    };

    object
        .iter()
        .filter_map(
            |(key, value)| match serde_json::from_value::<CacheEntry>(value.clone()) {
                Ok(entry) => Some((key.clone(), entry)),
                Err(error) => {
                    tracing::debug!(%key, %error, "Skipping malformed cache entry");
                    None
                }
            },
        )
        .collect()
}

/// Write a cache file atomically
pub fn save_cache(path: &Path, entries: &HashMap<String, CacheEntry>) -> Result<(), AppError> {
    let ordered: BTreeMap<&String, &CacheEntry> = entries.iter().collect();
    let json = serde_json::to_vec_pretty(&ordered)?;
    write_atomic(path, &json).map_err(|e| {
        AppError::LocalState(format!("Failed to write cache {}: {}", path.display(), e))
    })
}
