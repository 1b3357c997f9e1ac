use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use url::Url;

use webscour_client::{AddressPolicy, FsPageStore, HtmlLinkExtractor, ReqwestFetcher};
use webscour_core::pool::CrawlSummary;
use webscour_core::{
    CrawlError, PoolConfig, RetryConfig, TracingWorkerReporter, WorkQueue, WorkerConfig,
    WorkerPool,
};
use webscour_db::{Database, DatabaseConfig, PgTaskQueue};

#[derive(Parser)]
#[command(name = "webscour", version, about = "Queue-driven distributed web crawler")]
struct Cli {
    /// Name of the work queue shared by producers and workers
    #[arg(long, global = true, env = "WEBSCOUR_QUEUE", default_value = "url_queue")]
    queue: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish seed URLs to the work queue
    Seed {
        /// URLs to start crawling from
        #[arg(required = true)]
        urls: Vec<String>,

        /// Discard pending tasks before publishing
        #[arg(long, default_value_t = false)]
        purge: bool,
    },

    /// Run a pool of crawl workers until each stops
    Crawl {
        /// Number of concurrent workers
        #[arg(short, long, default_value_t = 3)]
        workers: usize,

        /// Pages each worker fetches before stopping
        #[arg(short, long, default_value_t = 5)]
        budget: u32,

        /// Directory the fetched pages are written to
        #[arg(long, default_value = "pages")]
        pages_dir: PathBuf,

        /// Per-fetch timeout in seconds, covering DNS, redirects and the body
        #[arg(long, default_value_t = 5)]
        timeout_secs: u64,

        /// Delay between polls of an empty queue, in milliseconds
        #[arg(long, default_value_t = 500)]
        poll_interval_ms: u64,

        /// Stop once the queue has been drained for this many seconds (0 = wait forever)
        #[arg(long, default_value_t = 0)]
        idle_shutdown_secs: u64,

        /// Redeliveries allowed for a transiently failing URL (0 = drop on first failure)
        #[arg(long, default_value_t = 0)]
        max_retries: u32,

        /// Deliveries older than this are assumed lost and returned to the queue
        #[arg(long, default_value_t = 600)]
        lease_secs: u64,

        /// Allow fetching localhost and private network addresses
        #[arg(long, default_value_t = false)]
        allow_private_urls: bool,
    },

    /// Discard every pending task in the work queue
    Purge,

    /// Show how many tasks are pending and in flight
    Status {
        /// Number of upcoming URLs to list
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("webscour=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Seed { urls, purge } => {
            let queue = connect_queue(&cli.queue, 1).await?;
            cmd_seed(&queue, &urls, purge).await?;
        }
        Commands::Crawl {
            workers,
            budget,
            pages_dir,
            timeout_secs,
            poll_interval_ms,
            idle_shutdown_secs,
            max_retries,
            lease_secs,
            allow_private_urls,
        } => {
            let queue = connect_queue(&cli.queue, pool_connections(workers)?).await?;

            let reclaimed = queue
                .reclaim_expired(Duration::from_secs(lease_secs))
                .await?;
            if reclaimed > 0 {
                tracing::info!(reclaimed, "Returned abandoned deliveries to the queue");
            }

            let policy = if allow_private_urls {
                AddressPolicy::AllowPrivate
            } else {
                AddressPolicy::PublicOnly
            };
            let fetcher = ReqwestFetcher::with_options(Duration::from_secs(timeout_secs), policy)
                .context("Failed to create HTTP client")?;

            let idle_shutdown =
                (idle_shutdown_secs > 0).then(|| Duration::from_secs(idle_shutdown_secs));
            let config = PoolConfig::default().with_workers(workers).with_worker_config(
                WorkerConfig::default()
                    .with_budget(budget)
                    .with_poll_interval(Duration::from_millis(poll_interval_ms))
                    .with_idle_shutdown(idle_shutdown)
                    .with_retry_config(RetryConfig::default().with_max_retries(max_retries)),
            );

            let pool = WorkerPool::new(
                queue,
                fetcher,
                HtmlLinkExtractor::new(),
                FsPageStore::new(&pages_dir),
                config,
            );

            let cancel_token = CancellationToken::new();
            tokio::spawn(shutdown_signal(cancel_token.clone()));

            let summary = pool.run(cancel_token, TracingWorkerReporter).await?;
            print_summary(&summary, &pages_dir);

            if !summary.is_clean() {
                anyhow::bail!("{} worker(s) failed", summary.failures.len());
            }
        }
        Commands::Purge => {
            let queue = connect_queue(&cli.queue, 1).await?;
            queue.declare().await?;
            let purged = queue.purge().await?;
            println!("Purged {purged} pending task(s) from {}", queue.name());
        }
        Commands::Status { limit } => {
            let queue = connect_queue(&cli.queue, 1).await?;
            cmd_status(&queue, limit).await?;
        }
    }

    Ok(())
}

/// One connection per worker plus one for the pool itself.
fn pool_connections(workers: usize) -> Result<u32, CrawlError> {
    u32::try_from(workers)
        .ok()
        .and_then(|w| w.checked_add(1))
        .ok_or_else(|| CrawlError::ConfigError(format!("too many workers: {workers}")))
}

/// Connect to PostgreSQL using DATABASE_URL and open the named queue.
async fn connect_queue(name: &str, min_connections: u32) -> Result<PgTaskQueue> {
    let mut config = DatabaseConfig::from_env()?;
    if config.max_connections < min_connections {
        config = config.with_max_connections(min_connections);
    }

    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;

    Ok(db.task_queue(name))
}

/// Cancel the crawl on Ctrl+C. Workers finish their current task first.
async fn shutdown_signal(cancel_token: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Shutdown signal received, stopping workers");
            cancel_token.cancel();
        }
        Err(e) => tracing::error!(error = %e, "Failed to install Ctrl+C handler"),
    }
}

async fn cmd_seed(queue: &PgTaskQueue, urls: &[String], purge: bool) -> Result<()> {
    for url in urls {
        Url::parse(url).with_context(|| format!("Invalid seed URL: {url}"))?;
    }

    queue.declare().await?;

    if purge {
        let purged = queue.purge().await?;
        tracing::info!(purged, queue = %queue.name(), "Purged pending tasks");
    }

    for url in urls {
        queue.publish(url).await?;
        println!("Queued {url}");
    }

    tracing::info!(count = urls.len(), queue = %queue.name(), "Seeding complete");
    Ok(())
}

async fn cmd_status(queue: &PgTaskQueue, limit: usize) -> Result<()> {
    queue.declare().await?;
    let depth = queue.depth().await?;

    println!("Queue {}:", queue.name());
    println!("  pending:   {}", depth.pending);
    println!("  in flight: {}", depth.in_flight);

    let upcoming = queue.pending_urls(limit).await?;
    if !upcoming.is_empty() {
        println!("\nNext up:");
        for url in upcoming {
            println!("  {url}");
        }
    }

    Ok(())
}

fn print_summary(summary: &CrawlSummary, pages_dir: &Path) {
    println!(
        "Crawl finished: {} page(s) written to {}",
        summary.pages_fetched,
        pages_dir.display()
    );
    for report in &summary.reports {
        println!(
            "  {}: {} fetched, {} task(s) consumed ({})",
            report.worker_id, report.processed, report.consumed, report.termination
        );
    }
    for failure in &summary.failures {
        println!("  {}: FAILED: {}", failure.worker_id, failure.error);
    }
}
