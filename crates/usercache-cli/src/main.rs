//! usercache - a command-line client for the user directory that keeps
//! working offline.
//!
//! Every run restores the on-disk query cache, answers from it when the
//! network is unreachable, queues writes issued while offline, and
//! persists the cache again on exit.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use usercache_core::cache::{FileStorage, SnapshotStorage};
use usercache_core::messages;
use usercache_core::models::{parse_user_slug, NewUser, User, UserPatch};
use usercache_core::mutation::{MutationHandle, MutationState, Notification, NotificationLevel};
use usercache_core::query::{QueryData, QueryObserver, QueryStatus, ResourceBackend};
use usercache_core::utils::{age_display, truncate_string};
use usercache_core::{ApiClient, ClientOptions, Config, Paginator, QueryClient, QueryKey, QueryView};

// ============================================================================
// Constants
// ============================================================================

/// How long to wait for a query or mutation before showing what we have
const WAIT_TIMEOUT_SECS: u64 = 20;

/// Max characters of a post or comment body shown in listings
const BODY_PREVIEW_LEN: usize = 80;

const USAGE: &str = "\
Usage: usercache <command>

Commands:
  users [page]              List users, 6 per page
  user <id>                 Show one user's profile
  posts <user-id>           List a user's posts
  comments <post-id>        List comments on a post
  create <file.json>        Create a user from a JSON file
  update <id> <file.json>   Update a user with the fields in a JSON file
  delete <id>               Delete a user
  status                    Show cached queries and pending writes

Environment:
  USERCACHE_API_ENDPOINT    API base URL
  USERCACHE_OFFLINE         Set to 1 to stay offline
  RUST_LOG                  Log filter (default: warn)";

/// Initialize the tracing subscriber for logging.
/// The returned guard flushes buffered log lines when dropped.
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();

    guard
}

enum Command {
    Users { page: f64 },
    User { id: u64 },
    Posts { user_id: u64 },
    Comments { post_id: u64 },
    Create { file: PathBuf },
    Update { id: u64, file: PathBuf },
    Delete { id: u64 },
    Status,
}

impl Command {
    /// `None` means "print usage".
    fn parse(args: &[String]) -> Result<Option<Self>> {
        let Some(name) = args.first() else {
            return Ok(None);
        };

        let command = match name.as_str() {
            "users" => Command::Users {
                // Non-numeric pages become NaN, which the paginator ignores
                page: args.get(1).map(|p| p.parse().unwrap_or(f64::NAN)).unwrap_or(1.0),
            },
            "user" => Command::User { id: id_arg(args, 1, "user id")? },
            "posts" => Command::Posts { user_id: id_arg(args, 1, "user id")? },
            "comments" => Command::Comments { post_id: id_arg(args, 1, "post id")? },
            "create" => Command::Create { file: arg(args, 1, "JSON file")?.into() },
            "update" => Command::Update {
                id: id_arg(args, 1, "user id")?,
                file: arg(args, 2, "JSON file")?.into(),
            },
            "delete" => Command::Delete { id: id_arg(args, 1, "user id")? },
            "status" => Command::Status,
            "help" | "--help" | "-h" => return Ok(None),
            other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
        };
        Ok(Some(command))
    }
}

fn arg<'a>(args: &'a [String], index: usize, what: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .with_context(|| format!("Missing {} for '{}'", what, args[0]))
}

fn id_arg(args: &[String], index: usize, what: &str) -> Result<u64> {
    let raw = arg(args, index, what)?;
    parse_user_slug(raw).with_context(|| format!("Invalid {}: '{}'", what, raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = Command::parse(&args)? else {
        println!("{}", USAGE);
        return Ok(());
    };

    let config = Config::load()?;
    let cache_dir = config.cache_dir().unwrap_or_else(|_| PathBuf::from("./cache"));
    let storage: Arc<dyn SnapshotStorage> = Arc::new(
        FileStorage::new(&cache_dir)
            .with_context(|| format!("Failed to open cache directory {}", cache_dir.display()))?,
    );
    let api = ApiClient::new(&config.api_base_url)?;
    let backend: Arc<dyn ResourceBackend> = Arc::new(api.clone());

    info!(api = %config.api_base_url, "usercache starting");
    let client = QueryClient::new(backend, storage, ClientOptions::from(&config));
    let mut notifications = client.notifications();
    client.init();

    if !config.offline_mode {
        // Probe once up front so an unreachable API starts in offline mode
        client.set_online(api.probe().await);
        client.spawn_connectivity_monitor(api, Duration::from_secs(config.connectivity_probe_secs));
    }
    client.wait_restored().await;

    if !client.is_online() {
        let newest = client.store().entries().iter().filter_map(|e| e.last_updated).max();
        match newest {
            Some(updated) => println!(
                "{} (updated {})",
                messages::OFFLINE_INDICATOR,
                age_display(updated, chrono::Utc::now())
            ),
            None => println!("{}", messages::OFFLINE_INDICATOR),
        }
    }

    let result = run(&client, command).await;

    // Let writes queued by an earlier offline run finish replaying
    if tokio::time::timeout(Duration::from_secs(WAIT_TIMEOUT_SECS), client.wait_replayed())
        .await
        .is_err()
    {
        warn!("Timed out replaying queued changes; they stay queued");
    }
    print_notifications(&mut notifications);

    if let Err(e) = client.teardown() {
        warn!(error = %e, "Failed to save query cache");
    }
    info!("usercache shutting down");
    result
}

async fn run(client: &QueryClient, command: Command) -> Result<()> {
    match command {
        Command::Users { page } => {
            let mut observer = client.observe(QueryKey::Users);
            let view = settle(&mut observer).await;
            print_users(&view, page);
        }
        Command::User { id } => {
            let mut observer = client.observe(QueryKey::User(id));
            let view = settle(&mut observer).await;
            print_user(client, &view);
        }
        Command::Posts { user_id } => {
            let mut observer = client.observe(QueryKey::UserPosts(user_id));
            let view = settle(&mut observer).await;
            print_posts(&view);
        }
        Command::Comments { post_id } => {
            let mut observer = client.observe(QueryKey::Comments(post_id));
            let view = settle(&mut observer).await;
            print_comments(&view);
        }
        Command::Create { file } => {
            let user: NewUser = read_json(&file)?;
            finish_mutation(client.create_user(user)).await;
        }
        Command::Update { id, file } => {
            let patch: UserPatch = read_json(&file)?;
            finish_mutation(client.update_user(id, patch)).await;
        }
        Command::Delete { id } => {
            finish_mutation(client.delete_user(id)).await;
        }
        Command::Status => print_status(client),
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(file: &PathBuf) -> Result<T> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Invalid user data in {}", file.display()))
}

/// Wait for the query to settle, or show whatever is there on timeout.
async fn settle(observer: &mut QueryObserver) -> QueryView {
    match tokio::time::timeout(Duration::from_secs(WAIT_TIMEOUT_SECS), observer.settled()).await {
        Ok(view) => view,
        Err(_) => {
            warn!(key = %observer.key(), "Timed out waiting for query");
            observer.view()
        }
    }
}

async fn finish_mutation(mut handle: MutationHandle) {
    if handle.state() == MutationState::Paused {
        println!("Offline: change queued and will be sent when the connection returns.");
        return;
    }
    if tokio::time::timeout(Duration::from_secs(WAIT_TIMEOUT_SECS), handle.wait())
        .await
        .is_err()
    {
        warn!(id = handle.id(), "Timed out waiting for mutation");
    }
}

fn print_notifications(notifications: &mut broadcast::Receiver<Notification>) {
    while let Ok(note) = notifications.try_recv() {
        match note.level {
            NotificationLevel::Success => println!("{}", note.message),
            NotificationLevel::Error => eprintln!("{}", note.message),
        }
    }
}

// ===== Rendering =====

/// Print the failure line for a failed view and return its stale data.
fn report<'a>(view: &'a QueryView, failed: &str) -> Option<&'a QueryData> {
    match view {
        QueryView::Pending => {
            eprintln!("Still loading, try again shortly.");
            None
        }
        QueryView::PausedNoData => {
            println!("{}", messages::NO_CACHED_DATA);
            None
        }
        QueryView::Failed { error, data } => {
            eprintln!("{}: {}", failed, error);
            data.as_deref()
        }
        QueryView::Ready { data, .. } => Some(data.as_ref()),
    }
}

fn print_users(view: &QueryView, page: f64) {
    let Some(users) = report(view, messages::USERS_LOAD_FAILED).and_then(QueryData::as_users) else {
        return;
    };
    if users.is_empty() {
        println!("{}", messages::NO_USERS);
        return;
    }

    let mut paginator = Paginator::default();
    paginator.set_item_count(users.len());
    paginator.go_to_page(page);
    for user in paginator.slice(users) {
        println!("{:>4}  {:<28} {:<20} {}", user.id, user.name, user.handle(), user.email);
    }
    println!("\nPage {} of {}", paginator.page(), paginator.total_pages());
}

fn print_user(client: &QueryClient, view: &QueryView) {
    let Some(user) = report(view, messages::USER_NOT_FOUND).and_then(QueryData::as_user) else {
        return;
    };
    print_profile(user);

    if let Some(updated) = client.get(&QueryKey::User(user.id)).and_then(|e| e.last_updated) {
        println!("\nUpdated {}", age_display(updated, chrono::Utc::now()));
    }
}

fn print_profile(user: &User) {
    println!("[{}] {} {}", user.initials(), user.name, user.handle());
    println!("  Email:    {}", user.email);
    println!("  Phone:    {}", user.phone);
    println!("  Website:  {}", user.website);
    println!("  Address:  {}", user.address.display());
    println!("  Company:  {} - \"{}\"", user.company.name, user.company.catch_phrase);
}

fn print_posts(view: &QueryView) {
    let Some(posts) = report(view, messages::POSTS_LOAD_FAILED).and_then(QueryData::as_posts) else {
        return;
    };
    if posts.is_empty() {
        println!("{}", messages::NO_POSTS);
        return;
    }
    for post in posts {
        println!("#{} {}", post.id, post.title);
        println!("    {}", truncate_string(&post.body.replace('\n', " "), BODY_PREVIEW_LEN));
    }
}

fn print_comments(view: &QueryView) {
    let Some(comments) = report(view, messages::COMMENTS_LOAD_FAILED).and_then(QueryData::as_comments) else {
        return;
    };
    if comments.is_empty() {
        println!("{}", messages::NO_COMMENTS);
        return;
    }
    for comment in comments {
        println!("{} <{}>", comment.name, comment.email);
        println!("    {}", truncate_string(&comment.body.replace('\n', " "), BODY_PREVIEW_LEN));
    }
}

fn print_status(client: &QueryClient) {
    let now = chrono::Utc::now();
    let mut entries = client.store().entries();
    entries.sort_by_key(|e| e.key.to_string());

    if entries.is_empty() {
        println!("Cache is empty.");
    }
    for entry in entries {
        let age = entry
            .last_updated
            .map(|t| age_display(t, now))
            .unwrap_or_else(|| "never".to_string());
        let status = match entry.status {
            QueryStatus::Idle => "idle",
            QueryStatus::Loading => "loading",
            QueryStatus::Success => "success",
            QueryStatus::Error => "error",
        };
        let records = entry.data.as_ref().map(|d| d.len()).unwrap_or(0);
        println!(
            "{:<20} {:<8} {:>4} records  updated {}",
            entry.key.to_string(),
            status,
            records,
            age
        );
    }

    let queued = client.executor().paused();
    if !queued.is_empty() {
        println!("\n{} change(s) waiting for connectivity:", queued.len());
        for q in queued {
            println!("  #{} {} (queued {})", q.id, q.mutation.verb(), age_display(q.submitted_at, now));
        }
    }
}
