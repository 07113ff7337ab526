use clap::{Parser, Subcommand};
use requery::cache::{
    FetchCoordinator, MutationExecutor, PagedQuery, QueryKey, QueryOptions, QueryStore,
    RetryPolicy, fetch_fn, page_fn,
};
use requery::error::Result;
use requery::rest::RestClient;
use requery::rest::posts::{self, PAGE_SIZE, POSTS_BASE_URL, USERS_BASE_URL};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the posts backend
    #[arg(long, default_value = POSTS_BASE_URL)]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a page of posts through the cache, twice, to show the dedup
    /// and the cache hit
    Posts {
        #[arg(short, long, default_value_t = 1)]
        page: u32,
    },
    /// Fetch a single post by id
    Post {
        #[arg(short, long)]
        id: u64,
    },
    /// Walk the paged users listing a few pages deep
    Users {
        #[arg(short, long, default_value_t = 3)]
        pages: u32,
    },
    /// Delete a post and reconcile the cached page locally
    Delete {
        #[arg(long)]
        id: u64,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Update a post's title and merge the result into the cached page
    Update {
        #[arg(long)]
        id: u64,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value = "I have updated")]
        title: String,
    },
    /// Poll a page of posts on an interval for a while (near-real-time mode)
    Poll {
        #[arg(short, long, default_value_t = 1)]
        page: u32,
        /// Refetch interval in seconds
        #[arg(long, default_value_t = 5)]
        interval: u64,
        /// How long to keep polling before exiting
        #[arg(long, default_value_t = 30)]
        seconds: u64,
    },
}

/// Cache policy the posts queries run under: fresh for five minutes,
/// retained for ten, two retries.
fn posts_options() -> QueryOptions {
    QueryOptions::default()
        .stale_for(Duration::from_secs(300))
        .retain_for(Duration::from_secs(600))
        .with_retry(RetryPolicy::retries(2))
}

async fn register_posts_page(
    coordinator: &Arc<FetchCoordinator>,
    client: &Arc<RestClient>,
    page: u32,
) -> QueryKey {
    let key = QueryKey::root("posts").push(page);
    let client = client.clone();
    coordinator
        .register(
            &key,
            fetch_fn(move || {
                let client = client.clone();
                async move { posts::fetch_posts_page(&client, page).await }
            }),
            posts_options(),
        )
        .await;
    key
}

fn print_posts(value: &Value) -> Result<()> {
    for post in posts::decode_posts(value)? {
        println!("#{:<4} [user {}] {}", post.id, post.user_id, post.title);
    }
    Ok(())
}

async fn run_posts(
    coordinator: Arc<FetchCoordinator>,
    client: Arc<RestClient>,
    page: u32,
) -> Result<()> {
    let key = register_posts_page(&coordinator, &client, page).await;

    // An observer plus an explicit fetch: the fetch attaches to the
    // in-flight request started by the mount trigger.
    let handle = coordinator
        .watch(
            &key,
            Arc::new(|snapshot| {
                info!(
                    "👀 observer: status={:?} fetch={:?}",
                    snapshot.status, snapshot.fetch_status
                );
            }),
        )
        .await?;

    // Both resolvers attach to the in-flight request started by the mount
    // trigger: one network call serves all three consumers.
    let (data, _) =
        futures::future::try_join(coordinator.fetch(&key), coordinator.fetch(&key)).await?;
    print_posts(&data)?;

    // Another resolve is served from cache while fresh.
    coordinator.fetch(&key).await?;
    coordinator.unwatch(handle).await;

    let stats = coordinator.store().stats().await;
    info!(
        "📊 cache: {} entries ({} fresh, {} stale, {} error)",
        stats.total_entries, stats.fresh_entries, stats.stale_entries, stats.error_entries
    );
    Ok(())
}

async fn run_post(
    coordinator: Arc<FetchCoordinator>,
    client: Arc<RestClient>,
    id: u64,
) -> Result<()> {
    let key = QueryKey::root("post").push(i64::try_from(id).unwrap_or(i64::MAX));
    let fetch_client = client.clone();
    coordinator
        .register(
            &key,
            fetch_fn(move || {
                let client = fetch_client.clone();
                async move { posts::fetch_post(&client, id).await }
            }),
            QueryOptions::default(),
        )
        .await;

    let post = posts::decode_post(&coordinator.fetch(&key).await?)?;
    println!("#{} {}", post.id, post.title);
    println!("{}", post.body);
    Ok(())
}

async fn run_users(coordinator: Arc<FetchCoordinator>, pages: u32) -> Result<()> {
    let client = Arc::new(RestClient::new(USERS_BASE_URL, Duration::from_secs(30))?);

    let query = PagedQuery::new(
        coordinator,
        QueryKey::root("users"),
        page_fn(move |param| {
            let client = client.clone();
            async move {
                let page = param.as_u64().unwrap_or(1);
                posts::fetch_users_page(&client, page).await
            }
        }),
        // A full page means more may follow; the next cursor is the count
        // of pages fetched so far plus one.
        Arc::new(|last_page, all_pages| {
            let len = last_page.as_array().map_or(0, Vec::len);
            (len == PAGE_SIZE as usize).then(|| json!(all_pages.len() + 1))
        }),
        json!(1),
        QueryOptions::default(),
    )
    .await;

    let mut data = query.fetch_first().await?;
    while data.page_count() < pages as usize && query.has_next_page().await {
        data = query.fetch_next_page().await?;
    }

    for user in data.items() {
        println!(
            "{:<20} id #{}",
            user["login"].as_str().unwrap_or("?"),
            user["id"]
        );
    }
    info!(
        "📄 fetched {} pages, exhausted: {}",
        data.page_count(),
        !query.has_next_page().await
    );
    Ok(())
}

async fn run_delete(
    coordinator: Arc<FetchCoordinator>,
    client: Arc<RestClient>,
    id: u64,
    page: u32,
) -> Result<()> {
    let key = register_posts_page(&coordinator, &client, page).await;
    coordinator.fetch(&key).await?;

    let executor = MutationExecutor::new(coordinator.store().clone());
    executor.execute(posts::delete_post(&client, id)).await?;
    info!("🗑️  deleted post {id} upstream");

    // The effect is known locally: drop the item instead of refetching.
    executor
        .reconcile(&key, |data| {
            data.map(|value| {
                let kept: Vec<Value> = value
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter(|item| item["id"] != json!(id))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                Value::Array(kept)
            })
        })
        .await;

    if let Some(value) = coordinator.store().get(&key).await.and_then(|s| s.data) {
        print_posts(&value)?;
    }
    Ok(())
}

async fn run_update(
    coordinator: Arc<FetchCoordinator>,
    client: Arc<RestClient>,
    id: u64,
    page: u32,
    title: String,
) -> Result<()> {
    let key = register_posts_page(&coordinator, &client, page).await;
    coordinator.fetch(&key).await?;

    let executor = MutationExecutor::new(coordinator.store().clone());
    let updated = executor
        .execute(posts::update_post(&client, id, &title))
        .await?;
    info!("✏️  updated post {id} upstream");

    // Merge the server's reply into the matching cached item.
    executor
        .reconcile(&key, |data| {
            data.map(|value| {
                let merged: Vec<Value> = value
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .map(|item| {
                                if item["id"] == json!(id) {
                                    merge_fields(item, &updated)
                                } else {
                                    item.clone()
                                }
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Value::Array(merged)
            })
        })
        .await;

    if let Some(value) = coordinator.store().get(&key).await.and_then(|s| s.data) {
        print_posts(&value)?;
    }
    Ok(())
}

async fn run_poll(
    coordinator: Arc<FetchCoordinator>,
    client: Arc<RestClient>,
    page: u32,
    interval: u64,
    seconds: u64,
) -> Result<()> {
    let key = QueryKey::root("posts").push(page);
    let fetch_client = client.clone();
    coordinator
        .register(
            &key,
            fetch_fn(move || {
                let client = fetch_client.clone();
                async move { posts::fetch_posts_page(&client, page).await }
            }),
            // Polling re-issues the fetch regardless of freshness.
            posts_options().poll_every(Duration::from_secs(interval), false),
        )
        .await;

    let handle = coordinator
        .watch(
            &key,
            Arc::new(|snapshot| {
                if let Some(at) = snapshot.last_updated_at {
                    info!(
                        "🔁 refreshed {:?} ago, status={:?}",
                        at.elapsed(),
                        snapshot.status
                    );
                }
            }),
        )
        .await?;

    tokio::time::sleep(Duration::from_secs(seconds)).await;
    coordinator.unwatch(handle).await;

    if let Some(value) = coordinator.store().get(&key).await.and_then(|s| s.data) {
        print_posts(&value)?;
    }
    Ok(())
}

fn merge_fields(item: &Value, patch: &Value) -> Value {
    let mut merged = item.clone();
    if let (Some(target), Some(fields)) = (merged.as_object_mut(), patch.as_object()) {
        for (field, value) in fields {
            target.insert(field.clone(), value.clone());
        }
    }
    merged
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let client = Arc::new(RestClient::new(&args.base_url, Duration::from_secs(30))?);

    let store = Arc::new(QueryStore::new());
    let coordinator = FetchCoordinator::new(store);
    let _gc_shutdown = coordinator.start();

    match args.command {
        Command::Posts { page } => run_posts(coordinator, client, page).await,
        Command::Post { id } => run_post(coordinator, client, id).await,
        Command::Users { pages } => run_users(coordinator, pages).await,
        Command::Delete { id, page } => run_delete(coordinator, client, id, page).await,
        Command::Update { id, page, title } => {
            run_update(coordinator, client, id, page, title).await
        }
        Command::Poll {
            page,
            interval,
            seconds,
        } => run_poll(coordinator, client, page, interval, seconds).await,
    }
}
