use axum::Router;
use axum::extract::ConnectInfo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tiervault::api::{AppState, create_api_router};
use tiervault::config::Config;
use tiervault::db_actor::QuotaResyncActor;
use tiervault::download::{DownloadEngine, DownloadEngineConfig};
use tiervault::event::NullEventSink;
use tiervault::folder_tree::FolderTree;
use tiervault::metadata::MetadataStore;
use tiervault::models::{QuotaOverride, Role, User, UserId};
use tiervault::quota_accountant::QuotaAccountant;
use tiervault::rate_limiter::RateLimiter;
use tiervault::storage::StorageBackend;
use tiervault::upload::{UploadEngine, UploadEngineConfig};
use tiervault::volatile::{InMemoryVolatileStore, VolatileStore};
use tiervault::workers::{CleanupWorker, ExpiryWorker, LifecycleWorkers, MigrationWorker};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa_rapidoc::RapiDoc;

/// Builds a fully wired, tempdir-backed instance of the core and its
/// thin HTTP adapter, the same shape as the teacher's `setup_test_app`:
/// every engine and store is real (no mocks), just rooted under a
/// temporary directory and backed by the in-process volatile store
/// instead of a live Redis so tests don't need external services.
/// Lifecycle workers are constructed but never started — tests that
/// want sweep behavior call `run_once` on the engine/worker directly.
pub async fn test_harness() -> (Router, Arc<AppState>, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.data_path = dir.path().to_path_buf();

    let events: Arc<dyn tiervault::event::EventSink> = Arc::new(NullEventSink);
    let metadata = Arc::new(MetadataStore::open(&config.storage.data_path).await.unwrap());
    let storage = Arc::new(StorageBackend::new(config.storage.data_path.join("blobs")));
    let volatile: Arc<dyn VolatileStore> = Arc::new(InMemoryVolatileStore::new());
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

    let (_quota_resync_actor, quota_resync) = QuotaResyncActor::new(quota.clone(), events.clone());

    let state = Arc::new(AppState {
        config,
        metadata,
        storage,
        quota,
        upload_engine,
        download_engine,
        folder_tree,
        rate_limiter,
        workers,
        quota_resync,
        events,
    });

    let (api_router, api_doc) = create_api_router(state.clone()).split_for_parts();
    let doc_routes = Router::new().merge(RapiDoc::with_openapi("/api-docs/openapi.json", api_doc).path("/api-docs"));

    let app = Router::new()
        .nest("/api", api_router)
        .merge(doc_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    (app, state, dir)
}

/// A request builder with connect info already attached, standing in
/// for what `into_make_service_with_connect_info` supplies on a real
/// listener — `oneshot` bypasses that, so the rate-limit middleware's
/// `ConnectInfo<SocketAddr>` extractor needs it set explicitly.
pub fn request_builder() -> axum::http::request::Builder {
    axum::http::Request::builder().extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 0))))
}

/// Inserts a user record and returns its id, for tests that need to
/// exercise `ResolvedPrincipal`'s `x-principal-user-id` header seam.
pub async fn seed_user(state: &AppState, role: Role) -> UserId {
    let user_id = UserId::generate();
    let user = User {
        id: user_id.clone(),
        email: format!("{}@example.com", user_id.as_str()),
        password_hash: String::new(),
        role,
        is_active: true,
        last_login: None,
        failed_login_attempts: 0,
        lockout_until: None,
        refresh_tokens: Vec::new(),
        quota_override: QuotaOverride::default(),
    };
    state.metadata.users.insert(user_id.as_str().to_string(), user).await.unwrap();
    user_id
}
