//! Persisted graph state
//!
//! - previous followers: line-delimited logins, the "before" side of a diff
//! - new-followers ledger: login -> first-observed timestamp (JSON)
//! - ignore list: line-delimited, normalized logins
//!
//! Every loader treats an unreadable file as empty; every writer replaces
//! the file atomically.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::atomic::write_atomic;
use super::models::normalize_login;
use crate::error::AppError;

fn read_lines(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(raw) => raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "Failed to read list file; treating as empty");
            Vec::new()
        }
    }
}

fn write_lines<'a>(path: &Path, lines: impl IntoIterator<Item = &'a String>) -> Result<(), AppError> {
    let mut body = String::new();
    for line in lines {
        body.push_str(line);
        body.push('\n');
    }
    write_atomic(path, body.as_bytes())
        .map_err(|e| AppError::LocalState(format!("Failed to write {}: {}", path.display(), e)))
}

// =============================================================================
// Previous Followers
// =============================================================================

/// Load the last committed followers snapshot
pub fn load_previous_followers(path: &Path) -> Vec<String> {
    read_lines(path)
}

/// Overwrite the previous-followers record
pub fn save_previous_followers(path: &Path, followers: &[String]) -> Result<(), AppError> {
    write_lines(path, followers)?;
    tracing::debug!(path = %path.display(), count = followers.len(), "Previous followers committed");
    Ok(())
}

// =============================================================================
// New-Followers Ledger
// =============================================================================

/// Time-stamped record of newly observed followers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewFollowersLedger {
    entries: BTreeMap<String, DateTime<Utc>>,
}

impl NewFollowersLedger {
    /// Load the ledger, dropping entries whose timestamp cannot be parsed
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "Failed to read new followers ledger");
                return Self::default();
            }
        };
        if raw.trim().is_empty() {
            return Self::default();
        }

        let parsed: BTreeMap<String, String> = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::error!(path = %path.display(), %error, "Failed to decode new followers JSON");
                return Self::default();
            }
        };

        let entries = parsed
            .into_iter()
            .filter_map(|(login, stamp)| match parse_timestamp(&stamp) {
                Some(ts) => Some((login, ts)),
                None => {
                    tracing::debug!(%login, %stamp, "Dropping ledger entry with invalid timestamp");
                    None
                }
            })
            .collect();
        Self { entries }
    }

    /// Persist as `{login: ISO-8601}`
    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        let serialized: BTreeMap<&String, String> = self
            .entries
            .iter()
            .map(|(login, ts)| (login, ts.to_rfc3339()))
            .collect();
        let json = serde_json::to_vec_pretty(&serialized)?;
        write_atomic(path, &json).map_err(|e| {
            AppError::LocalState(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    /// Insert every login not already present with timestamp `now`
    ///
    /// Returns how many logins were added.
    pub fn record<'a>(&mut self, logins: impl IntoIterator<Item = &'a String>, now: DateTime<Utc>) -> usize {
        let mut added = 0;
        for login in logins {
            if !self.entries.contains_key(login) {
                self.entries.insert(login.clone(), now);
                added += 1;
            }
        }
        added
    }

    /// Evict entries whose age at `now` is at least `window`
    ///
    /// Returns how many entries were evicted.
    pub fn prune(&mut self, now: DateTime<Utc>, window: chrono::Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, first_seen| now - *first_seen < window);
        before - self.entries.len()
    }

    pub fn contains(&self, login: &str) -> bool {
        self.entries.contains_key(login)
    }

    pub fn first_seen(&self, login: &str) -> Option<DateTime<Utc>> {
        self.entries.get(login).copied()
    }

    pub fn logins(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accept RFC 3339 as well as naive ISO-8601 timestamps (read as UTC)
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

// =============================================================================
// Ignore List
// =============================================================================

/// Logins excluded from every derived result set
#[derive(Debug, Clone)]
pub struct IgnoreList {
    path: PathBuf,
    entries: BTreeSet<String>,
}

impl IgnoreList {
    /// Load, normalizing and deduplicating entries
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = read_lines(&path)
            .iter()
            .map(|line| normalize_login(line))
            .filter(|login| !login.is_empty())
            .collect();
        Self { path, entries }
    }

    /// In-memory list, used when no file backs it
    pub fn from_logins<I, S>(path: impl Into<PathBuf>, logins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            path: path.into(),
            entries: logins
                .into_iter()
                .map(|login| normalize_login(login.as_ref()))
                .filter(|login| !login.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, login: &str) -> bool {
        self.entries.contains(&normalize_login(login))
    }

    /// Keep only logins that are not ignored
    pub fn filter<I, S>(&self, logins: I) -> Vec<S>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        logins
            .into_iter()
            .filter(|login| !self.contains(login.as_ref()))
            .collect()
    }

    /// Add a login and persist immediately; adding an ignored login is a no-op
    pub fn add(&mut self, login: &str) -> Result<Vec<String>, AppError> {
        let normalized = validated(login)?;
        if self.entries.insert(normalized.clone()) {
            self.persist()?;
            tracing::info!(login = %normalized, "Added to ignore list");
        }
        Ok(self.entries())
    }

    /// Remove a login and persist immediately
    pub fn remove(&mut self, login: &str) -> Result<Vec<String>, AppError> {
        let normalized = validated(login)?;
        if self.entries.remove(&normalized) {
            self.persist()?;
            tracing::info!(login = %normalized, "Removed from ignore list");
        }
        Ok(self.entries())
    }

    /// Sorted snapshot of the list
    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self) -> Result<(), AppError> {
        write_lines(&self.path, &self.entries)
    }
}

fn validated(login: &str) -> Result<String, AppError> {
    let normalized = normalize_login(login);
    if normalized.is_empty() {
        return Err(AppError::Validation("login cannot be empty".to_string()));
    }
    Ok(normalized)
}
