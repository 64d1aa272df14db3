//! Graph synchronization engine
//!
//! `GraphService` is the one object callers (CLI, scheduler, handlers) talk
//! to. It wires the request executor, the edge fetcher, the cache store,
//! the bulk executor and the local list files together and exposes the
//! follower/following operations on top of them.

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use super::bulk::BulkExecutor;
use super::diff::{self, Reconciliation, Snapshots};
use super::suggest::{self, Exclusions};
use crate::config::AppConfig;
use crate::data::{
    ActionOutcome, CacheKey, CacheStore, FollowAction, FollowerEntry, FollowingEntry, IgnoreList,
    MoreFollowingEntry, NewFollowersLedger, Owner, OwnerType, UserInfo, load_previous_followers,
    normalize_login, save_previous_followers,
};
use crate::error::AppError;
use crate::remote::{
    AliasedUserQuery, EdgeFetcher, GraphTransport, HttpTransport, IS_FOLLOWING_VIEWER_QUERY,
    REPOSITORY_OWNER_QUERY, RateLimitSnapshot, RequestExecutor, mutation_for, validate_login,
};

#[derive(Debug, Deserialize)]
struct OwnerNode {
    id: String,
    #[serde(rename = "__typename")]
    owner_type: OwnerType,
}

/// Follower graph engine
#[derive(Clone)]
pub struct GraphService {
    config: Arc<AppConfig>,
    executor: Arc<RequestExecutor>,
    fetcher: EdgeFetcher,
    cache: Arc<CacheStore>,
    ignore: Arc<RwLock<IgnoreList>>,
    /// Mutations, with the courtesy delay between calls
    mutations: BulkExecutor,
    /// Read fan-out (profile chunks, seed traversals)
    lookups: BulkExecutor,
    /// Serializes read-modify-write of the ledger and previous followers
    sync_lock: Arc<Mutex<()>>,
}

impl GraphService {
    /// Build the engine against the real GraphQL endpoint
    pub fn new(config: AppConfig) -> Result<Self, AppError> {
        let transport = HttpTransport::new(&config.github)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Build the engine over any transport
    pub fn with_transport(config: AppConfig, transport: Arc<dyn GraphTransport>) -> Self {
        let executor = Arc::new(RequestExecutor::new(transport, config.executor.clone()));
        let fetcher = EdgeFetcher::new(executor.clone(), &config.fetch);
        let cache = Arc::new(CacheStore::open(config.storage.cache_path()));
        let ignore = IgnoreList::load(config.storage.ignore_list_path());
        let mutations = BulkExecutor::new(
            config.bulk.workers,
            Duration::from_millis(config.bulk.mutation_delay_ms),
        );
        let lookups = mutations.with_item_delay(Duration::from_millis(config.fetch.page_delay_ms));

        tracing::info!(
            viewer = %config.github.username,
            workers = config.bulk.workers,
            ignored = ignore.len(),
            "Graph service ready"
        );

        Self {
            config: Arc::new(config),
            executor,
            fetcher,
            cache,
            ignore: Arc::new(RwLock::new(ignore)),
            mutations,
            lookups,
            sync_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Logins following the viewer, ignore list applied
    pub async fn get_followers(&self) -> Vec<String> {
        let followers = self.fetcher.followers().await.into_items();
        self.ignore.read().await.filter(followers)
    }

    /// Followers with their own counts, ignore list applied
    pub async fn get_followers_with_counts(&self) -> Vec<FollowerEntry> {
        let followers = self.fetcher.followers_with_counts().await.into_items();
        let ignore = self.ignore.read().await;
        followers
            .into_iter()
            .filter(|f| !ignore.contains(&f.login))
            .collect()
    }

    /// Accounts the viewer follows, ignore list applied
    pub async fn get_following(&self) -> Vec<FollowingEntry> {
        let following = self.fetcher.following().await.into_items();
        let ignore = self.ignore.read().await;
        following
            .into_iter()
            .filter(|f| !ignore.contains(&f.login))
            .collect()
    }

    /// Followers who follow more accounts than follow them
    pub async fn get_users_more_following(&self) -> Vec<MoreFollowingEntry> {
        let followers = self.fetcher.followers_with_counts().await.into_items();
        diff::users_more_following(followers, &*self.ignore.read().await)
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Run one full diff cycle
    ///
    /// Persists the ledger every time. The previous-followers record moves
    /// forward only when the followers traversal reached its last page.
    pub async fn synchronize(&self) -> Result<Reconciliation, AppError> {
        let _guard = self.sync_lock.lock().await;
        let storage = &self.config.storage;

        let (followers, following) =
            tokio::join!(self.fetcher.followers(), self.fetcher.following());
        let previous = load_previous_followers(&storage.previous_followers_path());
        let ledger_path = storage.new_followers_path();
        let mut ledger = NewFollowersLedger::load(&ledger_path);

        let mut reconciliation = {
            let ignore = self.ignore.read().await;
            diff::reconcile(
                Snapshots {
                    previous_followers: &previous,
                    current_followers: &followers.items,
                    current_following: &following.items,
                },
                &mut ledger,
                &ignore,
                Utc::now(),
                self.config.retention.new_follower_window(),
            )
        };
        reconciliation.complete = followers.complete && following.complete;
        if !followers.complete {
            // Missing pages would read as unfollows and as not following back
            reconciliation.unfollowers.clear();
            reconciliation.not_following_back.clear();
        }

        ledger.save(&ledger_path)?;
        crate::metrics::LEDGER_SIZE.set(ledger.len() as i64);

        if followers.complete {
            save_previous_followers(&storage.previous_followers_path(), &followers.items)?;
        } else {
            tracing::warn!(
                fetched = followers.items.len(),
                "Followers traversal incomplete; previous followers left untouched"
            );
        }

        tracing::info!(
            followers = followers.items.len(),
            following = following.items.len(),
            new_followers = reconciliation.new_followers.len(),
            unfollowers = reconciliation.unfollowers.len(),
            not_following_back = reconciliation.not_following_back.len(),
            complete = reconciliation.complete,
            "Synchronization complete"
        );
        Ok(reconciliation)
    }

    /// Followers first seen inside the retention window
    pub async fn get_new_followers(&self) -> Result<Vec<String>, AppError> {
        Ok(self.synchronize().await?.new_followers)
    }

    /// Accounts that stopped following since the last commit
    ///
    /// Empty when the followers traversal stopped early.
    pub async fn get_unfollowers(&self) -> Result<Vec<String>, AppError> {
        Ok(self.synchronize().await?.unfollowers)
    }

    /// Followed Users that do not follow back
    pub async fn get_not_following_back(&self) -> Result<Vec<String>, AppError> {
        Ok(self.synchronize().await?.not_following_back)
    }

    // =========================================================================
    // Profiles & Suggestions
    // =========================================================================

    /// Profile details for `logins`, in input order
    ///
    /// Logins are batched into aliased queries and the batches fanned out.
    /// Unknown users, invalid logins and failed batches are left out.
    pub async fn get_users_info(&self, logins: &[String]) -> Vec<UserInfo> {
        let mut order: HashMap<String, usize> = HashMap::new();
        let mut valid = Vec::new();
        for login in logins {
            if let Err(error) = validate_login(login) {
                tracing::warn!(%error, "Skipping login");
                continue;
            }
            let key = normalize_login(login);
            if !order.contains_key(&key) {
                order.insert(key, order.len());
                valid.push(login.clone());
            }
        }
        if valid.is_empty() {
            return Vec::new();
        }

        let chunks: Vec<Vec<String>> = valid
            .chunks(self.config.bulk.info_chunk_size)
            .map(<[String]>::to_vec)
            .collect();
        tracing::info!(users = valid.len(), chunks = chunks.len(), "Fetching user info");

        self.executor.ensure_capacity().await;
        let executor = self.executor.clone();
        let mut infos = self
            .lookups
            .gather(chunks, move |chunk: Vec<String>| {
                let executor = executor.clone();
                async move {
                    let query = AliasedUserQuery::new(&chunk)?;
                    let (text, variables) = query.render();
                    let data = executor.execute(&text, variables).await?;
                    Ok::<_, AppError>(query.parse(&data))
                }
            })
            .await;

        infos.sort_by_key(|info| {
            order
                .get(&normalize_login(&info.login))
                .copied()
                .unwrap_or(usize::MAX)
        });
        infos
    }

    /// Random accounts followed by the people the viewer follows
    pub async fn get_suggested_users(&self) -> Vec<String> {
        let policy = &self.config.suggestions;
        let (following, followers) =
            tokio::join!(self.fetcher.following(), self.fetcher.followers());

        let seeds = {
            let mut rng = StdRng::from_entropy();
            suggest::pick_seeds(&following.items, policy.seed_count, &mut rng)
        };
        if seeds.is_empty() {
            tracing::info!("No seeds available for suggestions");
            return Vec::new();
        }
        tracing::info!(seeds = seeds.len(), "Collecting suggestion candidates");

        self.executor.ensure_capacity().await;
        let fetcher = self.fetcher.clone();
        let max_pages = (policy.seed_max_pages > 0).then_some(policy.seed_max_pages);
        let candidates = self
            .lookups
            .gather(seeds, move |seed: String| {
                let fetcher = fetcher.clone();
                async move {
                    let fetched = fetcher.user_following(&seed, max_pages).await;
                    Ok::<_, AppError>(fetched.items)
                }
            })
            .await;

        let exclusions = Exclusions::new(&following.items, &followers.items, &self.config.github.username);
        let ignore = self.ignore.read().await;
        let mut rng = StdRng::from_entropy();
        let suggestions = suggest::finalize(
            candidates,
            &exclusions,
            &ignore,
            policy.max_suggestions,
            &mut rng,
        );
        tracing::info!(count = suggestions.len(), "Suggestions ready");
        suggestions
    }

    /// Suggestions enriched with profile info and the optional count filters
    pub async fn get_suggested_users_info(&self) -> Vec<UserInfo> {
        let suggestions = self.get_suggested_users().await;
        let policy = &self.config.suggestions;
        self.get_users_info(&suggestions)
            .await
            .into_iter()
            .filter(|info| suggest::meets_minimums(info, policy.min_followers, policy.min_following))
            .collect()
    }

    // =========================================================================
    // Cached lookups
    // =========================================================================

    /// Owner id and type for `login`; `None` when no such owner exists
    ///
    /// Cached with no TTL until [`GraphService::reset_cache`].
    pub async fn resolve_owner(&self, login: &str) -> Result<Option<Owner>, AppError> {
        validate_login(login)?;
        let key = CacheKey::OwnerId(login);
        if let Some(value) = self.cache.get_fresh(key, None, Utc::now()).await {
            match serde_json::from_value::<Owner>(value) {
                Ok(owner) => return Ok(Some(owner)),
                Err(error) => tracing::warn!(login, %error, "Discarding malformed cached owner"),
            }
        }

        let data = self
            .executor
            .execute(REPOSITORY_OWNER_QUERY, serde_json::json!({ "login": login }))
            .await?;
        let node = data.get("repositoryOwner").filter(|node| !node.is_null());
        let Some(node) = node else {
            tracing::debug!(login, "Owner not found");
            return Ok(None);
        };

        let node: OwnerNode = serde_json::from_value(node.clone())
            .map_err(|e| AppError::Decode(format!("repositoryOwner: {e}")))?;
        let owner = Owner {
            id: node.id,
            owner_type: node.owner_type,
        };
        self.cache
            .put(&key.render(), serde_json::to_value(&owner)?, Utc::now())
            .await;
        Ok(Some(owner))
    }

    /// Whether `login` follows the viewer, cached for the follows-viewer TTL
    pub async fn check_follows_viewer(&self, login: &str) -> Result<bool, AppError> {
        validate_login(login)?;
        let key = CacheKey::FollowsViewer(login);
        let ttl = Some(self.config.retention.follows_viewer_ttl());
        if let Some(follows) = self
            .cache
            .get_fresh(key, ttl, Utc::now())
            .await
            .and_then(|value| value.as_bool())
        {
            return Ok(follows);
        }

        let data = self
            .executor
            .execute(IS_FOLLOWING_VIEWER_QUERY, serde_json::json!({ "login": login }))
            .await?;
        let follows = data
            .get("user")
            .filter(|user| !user.is_null())
            .ok_or_else(|| AppError::NotFound(login.to_string()))?
            .get("isFollowingViewer")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| AppError::Decode("user.isFollowingViewer missing".to_string()))?;

        self.cache
            .put(&key.render(), serde_json::Value::Bool(follows), Utc::now())
            .await;
        self.flush_cache().await;
        Ok(follows)
    }

    /// Forget every cached fact
    pub async fn reset_cache(&self) -> Result<(), AppError> {
        self.cache.clear().await;
        self.cache.flush().await
    }

    /// Remaining request budget
    pub async fn rate_limit_status(&self) -> Result<RateLimitSnapshot, AppError> {
        self.executor.rate_limit_status().await
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub async fn follow(&self, login: &str) -> ActionOutcome {
        let outcome = self.apply(FollowAction::Follow, login).await;
        self.flush_cache().await;
        outcome
    }

    pub async fn unfollow(&self, login: &str) -> ActionOutcome {
        let outcome = self.apply(FollowAction::Unfollow, login).await;
        self.flush_cache().await;
        outcome
    }

    pub async fn bulk_follow(&self, logins: Vec<String>) -> HashMap<String, ActionOutcome> {
        self.bulk_apply(FollowAction::Follow, logins).await
    }

    pub async fn bulk_unfollow(&self, logins: Vec<String>) -> HashMap<String, ActionOutcome> {
        self.bulk_apply(FollowAction::Unfollow, logins).await
    }

    async fn bulk_apply(&self, action: FollowAction, logins: Vec<String>) -> HashMap<String, ActionOutcome> {
        if logins.is_empty() {
            return HashMap::new();
        }
        tracing::info!(action = action.as_str(), count = logins.len(), "Starting bulk action");

        self.executor.ensure_capacity().await;
        let service = self.clone();
        let results = self
            .mutations
            .run(logins, move |login| {
                let service = service.clone();
                async move { service.apply(action, &login).await }
            })
            .await;

        self.flush_cache().await;
        results
    }

    /// One follow/unfollow, reported rather than raised
    async fn apply(&self, action: FollowAction, login: &str) -> ActionOutcome {
        use crate::metrics::BULK_ACTIONS_TOTAL;

        match self.mutate(action, login).await {
            Ok(()) => {
                BULK_ACTIONS_TOTAL
                    .with_label_values(&[action.as_str(), "success"])
                    .inc();
                tracing::info!(action = action.as_str(), login, "Action succeeded");
                ActionOutcome::ok()
            }
            Err(error) => {
                BULK_ACTIONS_TOTAL
                    .with_label_values(&[action.as_str(), error.label()])
                    .inc();
                tracing::error!(action = action.as_str(), login, %error, "Action failed");
                ActionOutcome::failed(error.to_string())
            }
        }
    }

    async fn mutate(&self, action: FollowAction, login: &str) -> Result<(), AppError> {
        let owner = self
            .resolve_owner(login)
            .await?
            .ok_or_else(|| AppError::NotFound(login.to_string()))?;

        let unsupported = || AppError::UnsupportedOwnerType {
            login: login.to_string(),
            owner_type: owner.owner_type.to_string(),
        };
        if owner.owner_type == OwnerType::Organization && !self.config.bulk.allow_organizations {
            return Err(unsupported());
        }
        let (document, id_variable) = mutation_for(action, owner.owner_type).ok_or_else(unsupported)?;

        let mut variables = serde_json::Map::new();
        variables.insert(id_variable.to_string(), serde_json::Value::String(owner.id.clone()));
        self.executor
            .execute(document, serde_json::Value::Object(variables))
            .await?;
        Ok(())
    }

    async fn flush_cache(&self) {
        if let Err(error) = self.cache.flush().await {
            tracing::warn!(%error, "Failed to persist cache");
        }
    }

    // =========================================================================
    // Ignore List
    // =========================================================================

    pub async fn add_to_ignore_list(&self, login: &str) -> Result<Vec<String>, AppError> {
        self.ignore.write().await.add(login)
    }

    pub async fn remove_from_ignore_list(&self, login: &str) -> Result<Vec<String>, AppError> {
        self.ignore.write().await.remove(login)
    }

    pub async fn ignore_list(&self) -> Vec<String> {
        self.ignore.read().await.entries()
    }
}
