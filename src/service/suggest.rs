//! Suggestion sampler
//!
//! Seeds are drawn from the accounts the viewer follows; the union of what
//! the seeds follow becomes the candidate pool. Candidates the viewer
//! already knows about are dropped and the rest is sampled uniformly.

use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::{BTreeSet, HashSet};

use crate::data::{FollowingEntry, IgnoreList, UserInfo, normalize_login};

/// Pick up to `count` seed logins among followed Users
pub fn pick_seeds<R: Rng + ?Sized>(following: &[FollowingEntry], count: usize, rng: &mut R) -> Vec<String> {
    let users: Vec<&FollowingEntry> = following
        .iter()
        .filter(|entry| entry.is_followable_user())
        .collect();
    users
        .choose_multiple(rng, count.min(users.len()))
        .map(|entry| entry.login.clone())
        .collect()
}

/// Accounts that can never be suggested
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    known: HashSet<String>,
}

impl Exclusions {
    /// Already followed, already following, and the viewer
    pub fn new(following: &[FollowingEntry], followers: &[String], viewer: &str) -> Self {
        let known = following
            .iter()
            .map(|entry| entry.login.as_str())
            .chain(followers.iter().map(String::as_str))
            .chain(std::iter::once(viewer))
            .map(normalize_login)
            .collect();
        Self { known }
    }

    pub fn contains(&self, login: &str) -> bool {
        self.known.contains(&normalize_login(login))
    }
}

/// Drop excluded and ignored candidates, then sample at most `max`
///
/// Returns the whole pool when it already fits.
pub fn finalize<R, I>(candidates: I, exclusions: &Exclusions, ignore: &IgnoreList, max: usize, rng: &mut R) -> Vec<String>
where
    R: Rng + ?Sized,
    I: IntoIterator<Item = String>,
{
    let pool: Vec<String> = candidates
        .into_iter()
        .filter(|login| !exclusions.contains(login) && !ignore.contains(login))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    if pool.len() <= max {
        return pool;
    }
    pool.choose_multiple(rng, max).cloned().collect()
}

/// Optional minimum-count policy for enriched suggestions
pub fn meets_minimums(info: &UserInfo, min_followers: Option<u64>, min_following: Option<u64>) -> bool {
    min_followers.is_none_or(|min| info.followers >= min)
        && min_following.is_none_or(|min| info.following >= min)
}
