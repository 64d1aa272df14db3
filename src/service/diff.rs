//! Diff & reconciliation
//!
//! Pure set arithmetic over two follower snapshots plus the following
//! snapshot. The only state touched is the in-memory ledger handed in by
//! the caller; persisting it (and committing the previous-followers record)
//! is left to [`crate::service::GraphService`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

use crate::data::{FollowerEntry, FollowingEntry, IgnoreList, MoreFollowingEntry, NewFollowersLedger};

/// `previous - current`: accounts that stopped following
pub fn unfollowers(previous: &[String], current: &[String]) -> Vec<String> {
    difference(previous, current)
}

/// `current - previous`: accounts seen following for the first time
pub fn new_followers_raw(previous: &[String], current: &[String]) -> Vec<String> {
    difference(current, previous)
}

/// Followed Users (with a resolvable id) that do not follow back
///
/// Organizations and unknown owner types never appear here.
pub fn not_following_back(following: &[FollowingEntry], followers: &[String]) -> Vec<String> {
    let followers: HashSet<&str> = followers.iter().map(String::as_str).collect();
    following
        .iter()
        .filter(|entry| entry.is_followable_user())
        .filter(|entry| !followers.contains(entry.login.as_str()))
        .map(|entry| entry.login.clone())
        .collect()
}

/// Followers following more accounts than follow them, biggest gap first
pub fn users_more_following(followers: Vec<FollowerEntry>, ignore: &IgnoreList) -> Vec<MoreFollowingEntry> {
    let mut users: Vec<MoreFollowingEntry> = followers
        .into_iter()
        .filter(|f| f.following > f.followers && !ignore.contains(&f.login))
        .map(|f| MoreFollowingEntry {
            difference: f.following as i64 - f.followers as i64,
            login: f.login,
            followers: f.followers,
            following: f.following,
        })
        .collect();
    users.sort_by(|a, b| b.difference.cmp(&a.difference).then_with(|| a.login.cmp(&b.login)));
    users
}

/// Elements of `left` missing from `right`, in `left` order, without repeats
fn difference(left: &[String], right: &[String]) -> Vec<String> {
    let right: HashSet<&str> = right.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    left.iter()
        .filter(|login| !right.contains(login.as_str()))
        .filter(|login| seen.insert(login.as_str()))
        .cloned()
        .collect()
}

/// Inputs of one reconciliation pass
#[derive(Debug, Clone, Copy)]
pub struct Snapshots<'a> {
    pub previous_followers: &'a [String],
    pub current_followers: &'a [String],
    pub current_following: &'a [FollowingEntry],
}

/// Every derived set of one synchronization
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Ledger contents inside the retention window, ignore list applied
    pub new_followers: Vec<String>,
    /// `current - previous` before the ignore list
    pub new_followers_raw: Vec<String>,
    pub unfollowers: Vec<String>,
    pub not_following_back: Vec<String>,
    /// Ledger entries added by this pass
    pub recorded: usize,
    /// Ledger entries evicted by this pass
    pub evicted: usize,
    /// `false` when a snapshot traversal stopped early
    pub complete: bool,
}

/// Run one diff cycle against `ledger`
///
/// Records first sightings at `now`, then evicts everything at least
/// `window` old. A login evicted earlier and seen again counts as new.
pub fn reconcile(
    snapshots: Snapshots<'_>,
    ledger: &mut NewFollowersLedger,
    ignore: &IgnoreList,
    now: DateTime<Utc>,
    window: chrono::Duration,
) -> Reconciliation {
    let raw = new_followers_raw(snapshots.previous_followers, snapshots.current_followers);
    let recorded = ledger.record(raw.iter(), now);
    let evicted = ledger.prune(now, window);

    let reconciliation = Reconciliation {
        new_followers: ignore.filter(ledger.logins().cloned()),
        new_followers_raw: raw,
        unfollowers: ignore.filter(unfollowers(
            snapshots.previous_followers,
            snapshots.current_followers,
        )),
        not_following_back: ignore.filter(not_following_back(
            snapshots.current_following,
            snapshots.current_followers,
        )),
        recorded,
        evicted,
        complete: true,
    };

    tracing::debug!(
        new_followers = reconciliation.new_followers.len(),
        unfollowers = reconciliation.unfollowers.len(),
        not_following_back = reconciliation.not_following_back.len(),
        recorded,
        evicted,
        "Reconciled snapshots"
    );
    reconciliation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::OwnerType;

    fn logins(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn sorted(mut v: Vec<String>) -> Vec<String> {
        v.sort();
        v
    }

    fn entry(login: &str, owner_type: OwnerType, id: &str) -> FollowingEntry {
        FollowingEntry {
            login: login.to_string(),
            owner_type,
            id: id.to_string(),
            followers: 0,
            following: 0,
        }
    }

    fn no_ignore() -> IgnoreList {
        IgnoreList::from_logins("/dev/null", Vec::<String>::new())
    }

    #[test]
    fn set_differences_are_directional() {
        let previous = logins(&["a", "b", "c"]);
        let current = logins(&["b", "c", "d"]);

        assert_eq!(unfollowers(&previous, &current), vec!["a"]);
        assert_eq!(new_followers_raw(&previous, &current), vec!["d"]);
    }

    #[test]
    fn identical_snapshots_have_empty_diffs() {
        let snapshot = logins(&["a", "b"]);
        assert!(unfollowers(&snapshot, &snapshot).is_empty());
        assert!(new_followers_raw(&snapshot, &snapshot).is_empty());
    }

    #[test]
    fn ignored_new_follower_is_recorded_but_not_reported() {
        let previous = logins(&["a", "b", "c"]);
        let current = logins(&["b", "c", "d"]);
        let ignore = IgnoreList::from_logins("/dev/null", ["d"]);
        let mut ledger = NewFollowersLedger::default();

        let result = reconcile(
            Snapshots {
                previous_followers: &previous,
                current_followers: &current,
                current_following: &[],
            },
            &mut ledger,
            &ignore,
            Utc::now(),
            chrono::Duration::days(3),
        );

        assert_eq!(result.unfollowers, vec!["a"]);
        assert_eq!(result.new_followers_raw, vec!["d"]);
        assert!(result.new_followers.is_empty());
        assert!(ledger.contains("d"));
    }

    #[test]
    fn organizations_and_followers_are_not_non_reciprocal() {
        let following = vec![
            entry("x", OwnerType::User, "U_x"),
            entry("y", OwnerType::Organization, "O_y"),
        ];
        let followers = logins(&["x"]);

        assert!(not_following_back(&following, &followers).is_empty());
    }

    #[test]
    fn users_without_ids_are_not_non_reciprocal() {
        let following = vec![
            entry("x", OwnerType::User, ""),
            entry("z", OwnerType::User, "U_z"),
            entry("bot", OwnerType::Unknown, "B_1"),
        ];
        assert_eq!(not_following_back(&following, &[]), vec!["z"]);
    }

    #[test]
    fn ledger_window_is_standing() {
        let start = Utc::now();
        let window = chrono::Duration::days(3);
        let ignore = no_ignore();
        let mut ledger = NewFollowersLedger::default();
        let previous = logins(&["a"]);
        let current = logins(&["a", "n"]);
        let snapshots = Snapshots {
            previous_followers: &previous,
            current_followers: &current,
            current_following: &[],
        };

        let first = reconcile(snapshots, &mut ledger, &ignore, start, window);
        assert_eq!(first.new_followers, vec!["n"]);
        assert_eq!(first.recorded, 1);

        // Still inside the window on a later pass with no fresh diff
        let steady = Snapshots {
            previous_followers: &current,
            current_followers: &current,
            current_following: &[],
        };
        let later = start + chrono::Duration::days(2);
        let second = reconcile(steady, &mut ledger, &ignore, later, window);
        assert_eq!(second.new_followers, vec!["n"]);
        assert_eq!(second.recorded, 0);

        let expired = start + window;
        let third = reconcile(steady, &mut ledger, &ignore, expired, window);
        assert!(third.new_followers.is_empty());
        assert_eq!(third.evicted, 1);

        // Re-appearing after eviction counts as new again
        let fourth = reconcile(snapshots, &mut ledger, &ignore, expired, window);
        assert_eq!(fourth.new_followers, vec!["n"]);
        assert_eq!(ledger.first_seen("n"), Some(expired));
    }

    #[test]
    fn ignore_filter_is_idempotent() {
        let ignore = IgnoreList::from_logins("/dev/null", ["Bob"]);
        let once = ignore.filter(logins(&["alice", "bob", "carol"]));
        let twice = ignore.filter(once.clone());
        assert_eq!(once, twice);
        assert_eq!(sorted(once), vec!["alice", "carol"]);
    }

    #[test]
    fn more_following_sorted_by_gap() {
        let followers = vec![
            FollowerEntry { login: "small".into(), followers: 10, following: 12 },
            FollowerEntry { login: "even".into(), followers: 5, following: 5 },
            FollowerEntry { login: "big".into(), followers: 1, following: 100 },
            FollowerEntry { login: "hidden".into(), followers: 0, following: 500 },
        ];
        let ignore = IgnoreList::from_logins("/dev/null", ["hidden"]);

        let users = users_more_following(followers, &ignore);

        let order: Vec<&str> = users.iter().map(|u| u.login.as_str()).collect();
        assert_eq!(order, vec!["big", "small"]);
        assert_eq!(users[0].difference, 99);
    }
}
