pub mod access_policy;
pub mod api;
pub mod config;
pub mod db_actor;
pub mod download;
pub mod error;
pub mod event;
pub mod folder_tree;
pub mod metadata;
pub mod models;
pub mod principal;
pub mod quota_accountant;
pub mod range;
pub mod rate_limiter;
pub mod sanitize;
pub mod storage;
pub mod storage_key;
pub mod upload;
pub mod util;
pub mod volatile;
pub mod workers;

use api::{AppState, create_api_router};
use axum::Router;
use config::Config;
use db_actor::QuotaResyncActor;
use download::{DownloadEngine, DownloadEngineConfig};
use event::{EventSink, TracingEventSink};
use folder_tree::FolderTree;
use metadata::MetadataStore;
use quota_accountant::QuotaAccountant;
use rate_limiter::RateLimiter;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;
use storage::StorageBackend;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upload::{UploadEngine, UploadEngineConfig};
use utoipa_rapidoc::RapiDoc;
use volatile::{InMemoryVolatileStore, RedisStore, VolatileStore};
use workers::{CleanupWorker, ExpiryWorker, LifecycleWorkers, MigrationWorker};

/// Uses journald when running as a service (no terminal), fmt when
/// running interactively — same selection the teacher makes.
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tiervault=info,tower_http=warn".into());

    if std::io::stdout().is_terminal() {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_journald::layer().expect("failed to connect to journald"))
            .init();
    }
}

/// Composition root: wires configuration, storage, the volatile store,
/// every engine, the lifecycle workers, and the quota resync actor into
/// one `AppState`, then serves the HTTP adapter until a shutdown signal
/// arrives.
pub async fn run_service(config_path: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    tracing::info!("tiervault version {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(config_path).unwrap_or_else(|error| {
        tracing::warn!(%error, "failed to load config, using defaults");
        Config::default()
    });
    tracing::info!("starting server with config: {:?}", config);

    let events: Arc<dyn EventSink> = Arc::new(TracingEventSink);

    let metadata = Arc::new(MetadataStore::open(&config.storage.data_path).await?);
    let storage = Arc::new(StorageBackend::new(config.storage.data_path.clone()));
    storage.health_check().await?;

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

    let download_engine = Arc::new(DownloadEngine::new(
        metadata.clone(),
        storage.clone(),
        volatile.clone(),
        events.clone(),
        DownloadEngineConfig {
            metadata_cache_ttl_secs: config.download.metadata_cache_ttl_secs,
            expiry_extension_days: config.download.expiry_extension_days,
        },
    ));

    let folder_tree = Arc::new(FolderTree::new(metadata.clone(), storage.clone(), quota.clone()));

    let rate_limiter = Arc::new(RateLimiter::new(
        volatile.clone(),
        events.clone(),
        config.rate_limit.abuse_threshold,
        config.rate_limit.abuse_window_secs,
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
    let workers = Arc::new(LifecycleWorkers::new(
        expiry_worker,
        migration_worker,
        cleanup_worker,
        events.clone(),
        Duration::from_secs(config.workers.tick_interval_secs),
    ));
    workers.start().await;

    let (quota_resync_actor, quota_resync) = QuotaResyncActor::new(quota.clone(), events.clone());
    tokio::spawn(quota_resync_actor.run());

    let state = Arc::new(AppState {
        config: config.clone(),
        metadata,
        storage,
        quota,
        upload_engine,
        download_engine,
        folder_tree,
        rate_limiter,
        workers: workers.clone(),
        quota_resync: quota_resync.clone(),
        events,
    });

    let (api_router, api_doc) = create_api_router(state.clone()).split_for_parts();

    let doc_routes = Router::new().merge(RapiDoc::with_openapi("/api-docs/openapi.json", api_doc).path("/api-docs"));

    let app = Router::new()
        .nest("/api", api_router)
        .merge(doc_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("server listening on {}", addr);
    tracing::info!("API documentation available at http://{}/api-docs", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(workers, quota_resync))
        .await?;

    Ok(())
}

/// Waits for Ctrl+C or SIGTERM, stops the lifecycle workers (letting any
/// in-flight batch finish) and flushes the quota resync actor's pending
/// debounce window before returning, same drain-then-exit shape as the
/// teacher's shutdown path.
async fn shutdown_signal(workers: Arc<LifecycleWorkers>, quota_resync: db_actor::QuotaResyncHandle) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining workers and flushing quota resync");
    workers.stop().await;
    quota_resync.shutdown().await;
}
