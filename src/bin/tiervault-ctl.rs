use byte_unit::{Byte, UnitType};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::process;
use std::sync::Arc;
use tiervault::config::Config;
use tiervault::event::TracingEventSink;
use tiervault::metadata::MetadataStore;
use tiervault::models::UserId;
use tiervault::quota_accountant::QuotaAccountant;
use tiervault::storage::StorageBackend;
use tiervault::upload::{UploadEngine, UploadEngineConfig};
use tiervault::volatile::{InMemoryVolatileStore, RedisStore, VolatileStore};
use tiervault::workers::{CleanupWorker, ExpiryWorker, LifecycleWorkers, MigrationWorker};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "tiervault-ctl")]
#[command(about = "Administrative CLI for a tiervault deployment", long_about = None)]
#[command(version = VERSION)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a user's quota summary
    Quota {
        /// User id to inspect
        user_id: String,
    },
    /// Run one pass of a lifecycle worker immediately and print its summary
    RunOnce {
        #[arg(value_enum)]
        worker: WorkerChoice,
    },
    /// List upload sessions that are still live past their expiry
    Sessions,
    /// Abort a single upload session on behalf of its owner
    AbortSession {
        session_id: String,
        /// Owner of the session (required, engine rejects cross-user aborts)
        user_id: String,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum WorkerChoice {
    Expiry,
    Migration,
    Cleanup,
    All,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "tiervault_ctl=info".into()))
        .init();

    let args = Args::parse();

    if let Err(error) = run(args).await {
        eprintln!("{} {error}", "error:".red().bold());
        process::exit(1);
    }
}

/// Everything the subcommands need. Skips the HTTP listener and the
/// worker tick loops entirely — this binary is one admin action per
/// invocation, not a long-running process.
struct Context {
    metadata: Arc<MetadataStore>,
    storage: Arc<StorageBackend>,
    quota: Arc<QuotaAccountant>,
    upload_engine: Arc<UploadEngine>,
    workers: LifecycleWorkers,
}

async fn build_context(config: &Config) -> Result<Context, Box<dyn std::error::Error>> {
    let events = Arc::new(TracingEventSink);
    let metadata = Arc::new(MetadataStore::open(&config.storage.data_path).await?);
    let storage = Arc::new(StorageBackend::new(config.storage.data_path.clone()));

    let volatile: Arc<dyn VolatileStore> = match RedisStore::connect(&config.server.redis_url).await {
        Ok(store) => Arc::new(store),
        Err(error) => {
            tracing::warn!(%error, "failed to connect to redis, falling back to an in-process volatile store");
            Arc::new(InMemoryVolatileStore::new())
        }
    };

    let quota = Arc::new(QuotaAccountant::new(metadata.clone(), events.clone(), config.quota.clone()));

    let upload_engine = Arc::new(UploadEngine::new(
        metadata.clone(),
        storage.clone(),
        volatile.clone(),
        quota.clone(),
        events.clone(),
        UploadEngineConfig {
            chunk_size: config.upload.chunk_size.as_u64(),
            session_ttl_secs: config.upload.session_ttl_secs,
            expiry_days_free: config.upload.expiry_days_free,
        },
    ));

    let expiry_worker = ExpiryWorker::new(metadata.clone(), storage.clone(), quota.clone(), volatile.clone(), config.workers.batch_size);
    let migration_worker = MigrationWorker::new(
        metadata.clone(),
        storage.clone(),
        config.workers.batch_size,
        config.workers.hot_to_cold_days,
        config.workers.cold_to_hot_downloads,
    );
    let cleanup_worker = CleanupWorker::new(
        metadata.clone(),
        storage.clone(),
        config.workers.batch_size,
        config.workers.session_purge_days,
        config.workers.orphan_chunk_age_secs,
    );
    let workers = LifecycleWorkers::new(
        expiry_worker,
        migration_worker,
        cleanup_worker,
        events,
        std::time::Duration::from_secs(config.workers.tick_interval_secs),
    );

    Ok(Context { metadata, storage: storage.clone(), quota, upload_engine, workers })
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(args.config.as_deref()).unwrap_or_else(|error| {
        tracing::warn!(%error, "failed to load config, using defaults");
        Config::default()
    });
    let ctx = build_context(&config).await?;

    match args.command {
        Commands::Quota { user_id } => print_quota(&ctx, &UserId::new(user_id)),
        Commands::RunOnce { worker } => run_once(&ctx, worker).await,
        Commands::Sessions => list_stale_sessions(&ctx),
        Commands::AbortSession { session_id, user_id } => {
            ctx.upload_engine.abort(&session_id, &UserId::new(user_id)).await?;
            println!("{}", format!("aborted session {session_id}").green());
            Ok(())
        }
    }
}

fn print_quota(ctx: &Context, user_id: &UserId) -> Result<(), Box<dyn std::error::Error>> {
    let summary = ctx.quota.get_summary(user_id);
    let used = Byte::from_u64(summary.usage.storage).get_appropriate_unit(UnitType::Binary);

    println!("{}", format!("quota for {user_id}").cyan().bold());
    println!("  {:>12}  {used:.2}", "used:".bold());
    println!("  {:>12}  {}", "files:".bold(), summary.usage.files);
    println!(
        "  {:>12}  {}",
        "over quota:".bold(),
        if summary.is_over_quota { "yes".red().to_string() } else { "no".green().to_string() }
    );

    Ok(())
}

async fn run_once(ctx: &Context, worker: WorkerChoice) -> Result<(), Box<dyn std::error::Error>> {
    let print_summary = |name: &str, summary: tiervault::workers::BatchSummary| {
        println!("{} processed={} failed={}", name.cyan().bold(), summary.processed, summary.failed);
    };

    match worker {
        WorkerChoice::Expiry => print_summary("expiry", ctx.workers.run_once_expiry().await),
        WorkerChoice::Migration => print_summary("migration", ctx.workers.run_once_migration().await),
        WorkerChoice::Cleanup => print_summary("cleanup", ctx.workers.run_once_cleanup().await),
        WorkerChoice::All => {
            print_summary("expiry", ctx.workers.run_once_expiry().await);
            print_summary("migration", ctx.workers.run_once_migration().await);
            print_summary("cleanup", ctx.workers.run_once_cleanup().await);
        }
    }

    Ok(())
}

fn list_stale_sessions(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let sessions = ctx.metadata.live_sessions_past_expiry(chrono::Utc::now());

    if sessions.is_empty() {
        println!("no stale sessions");
        return Ok(());
    }

    println!("{:<26} {:<20} {:<10} {:>10}", "session".bold(), "user".bold(), "status".bold(), "chunks".bold());
    for session in sessions {
        println!(
            "{:<26} {:<20} {:<10} {:>10}",
            session.session_id.to_string(),
            session.user_id.to_string(),
            format!("{:?}", session.status).to_lowercase(),
            format!("{}/{}", session.completed_chunks.len(), session.total_chunks),
        );
    }

    Ok(())
}
