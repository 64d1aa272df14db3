//! followsync binary entry point
//!
//! Thin caller over `GraphService`: every command prints its result as JSON
//! on stdout. Logs go to stderr.

use clap::{Parser, Subcommand};
use followsync::{GraphService, config, service};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "followsync", version, about = "Follower graph synchronization for GitHub")]
struct Cli {
    /// Enrich login lists with profile info
    #[arg(long, global = true)]
    info: bool,

    /// Print Prometheus metrics to stderr when done
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Logins following the viewer
    Followers,
    /// Followers with their follower/following counts
    FollowersWithCounts,
    /// Accounts the viewer follows
    Following,
    /// Followers following more accounts than follow them
    MoreFollowing,
    /// Followers first seen within the retention window
    NewFollowers,
    /// Accounts that stopped following
    Unfollowers,
    /// Followed users that do not follow back
    NotFollowingBack,
    /// Run one full synchronization and print every derived set
    Sync,
    /// Random accounts followed by the people you follow
    Suggestions,
    /// Profile info for the given logins
    UsersInfo { logins: Vec<String> },
    /// Follow one account
    Follow { login: String },
    /// Unfollow one account
    Unfollow { login: String },
    /// Follow many accounts
    BulkFollow {
        #[arg(required = true)]
        logins: Vec<String>,
    },
    /// Unfollow many accounts
    BulkUnfollow {
        #[arg(required = true)]
        logins: Vec<String>,
    },
    /// Whether an account follows the viewer
    FollowsMe { login: String },
    /// Manage the ignore list
    Ignore {
        #[command(subcommand)]
        action: IgnoreCommands,
    },
    /// Remaining API budget
    RateLimit,
    /// Drop every cached owner id and follows-viewer check
    ResetCache,
    /// Follow the current suggestions
    Daily,
    /// Unfollow everyone who does not follow back
    Sweep,
}

#[derive(Subcommand)]
enum IgnoreCommands {
    Add { login: String },
    Remove { login: String },
    List,
}

/// Initialize tracing on stderr so stdout carries only JSON
///
/// `RUST_LOG` wins over `logging.level`.
fn init_tracing(logging: &config::LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.default_directive().into());

    if logging.is_json() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print logins, or their profiles with `--info`
async fn print_logins(service: &GraphService, logins: Vec<String>, info: bool) -> anyhow::Result<()> {
    if info {
        print_json(&service.get_users_info(&logins).await)
    } else {
        print_json(&logins)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let loaded = config::AppConfig::load();
    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    init_tracing(&logging);
    followsync::metrics::init_metrics();

    let config = loaded?;
    tracing::debug!(
        viewer = %config.github.username,
        data_dir = %config.storage.data_dir.display(),
        "Configuration loaded"
    );
    let service = GraphService::new(config)?;

    match cli.command {
        Commands::Followers => print_logins(&service, service.get_followers().await, cli.info).await?,
        Commands::FollowersWithCounts => print_json(&service.get_followers_with_counts().await)?,
        Commands::Following => print_json(&service.get_following().await)?,
        Commands::MoreFollowing => print_json(&service.get_users_more_following().await)?,
        Commands::NewFollowers => {
            let logins = service.get_new_followers().await?;
            print_logins(&service, logins, cli.info).await?
        }
        Commands::Unfollowers => {
            let logins = service.get_unfollowers().await?;
            print_logins(&service, logins, cli.info).await?
        }
        Commands::NotFollowingBack => {
            let logins = service.get_not_following_back().await?;
            print_logins(&service, logins, cli.info).await?
        }
        Commands::Sync => print_json(&service.synchronize().await?)?,
        Commands::Suggestions => {
            if cli.info {
                print_json(&service.get_suggested_users_info().await)?
            } else {
                print_json(&service.get_suggested_users().await)?
            }
        }
        Commands::UsersInfo { logins } => print_json(&service.get_users_info(&logins).await)?,
        Commands::Follow { login } => print_json(&service.follow(&login).await)?,
        Commands::Unfollow { login } => print_json(&service.unfollow(&login).await)?,
        Commands::BulkFollow { logins } => print_json(&service.bulk_follow(logins).await)?,
        Commands::BulkUnfollow { logins } => print_json(&service.bulk_unfollow(logins).await)?,
        Commands::FollowsMe { login } => print_json(&service.check_follows_viewer(&login).await?)?,
        Commands::Ignore { action } => {
            let list = match action {
                IgnoreCommands::Add { login } => service.add_to_ignore_list(&login).await?,
                IgnoreCommands::Remove { login } => service.remove_from_ignore_list(&login).await?,
                IgnoreCommands::List => service.ignore_list().await,
            };
            print_json(&list)?
        }
        Commands::RateLimit => print_json(&service.rate_limit_status().await?)?,
        Commands::ResetCache => {
            service.reset_cache().await?;
            print_json(&serde_json::json!({ "success": true }))?
        }
        Commands::Daily => print_json(&service::run_daily_follow(&service).await)?,
        Commands::Sweep => print_json(&service::run_non_reciprocal_sweep(&service).await?)?,
    }

    if cli.metrics {
        eprintln!("{}", followsync::metrics::gather_text());
    }

    Ok(())
}
