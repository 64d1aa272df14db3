//! Data layer module
//!
//! Handles all local persistence:
//! - Durable key/value cache (owner ids, follows-viewer checks)
//! - Previous-followers record, new-followers ledger, ignore list
//! - Shared identity and result models

mod atomic;
mod cache;
mod lists;
mod models;

pub use atomic::write_atomic;
pub use cache::{CacheEntry, CacheKey, CacheStore, load_cache, save_cache};
pub use lists::{IgnoreList, NewFollowersLedger, load_previous_followers, save_previous_followers};
pub use models::*;
