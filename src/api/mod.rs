//! The thin library/HTTP boundary, SPEC_FULL.md §C. Handlers here parse
//! path params, the `Range` header, and the caller's `Principal`, call
//! the corresponding engine method, and render its result through
//! `IntoResponse`. No validation, no state-machine logic, no tier/quota
//! decisions live in this module — that's all in `upload`, `download`,
//! `folder_tree`, `quota_accountant`. If a handler body grows past
//! "parse params, call engine, render result," the extra logic belongs
//! in the engine, not here.

mod download;
mod folders;
mod upload;

use crate::config::Config;
use crate::db_actor::QuotaResyncHandle;
use crate::download::DownloadEngine;
use crate::event::EventSink;
use crate::folder_tree::FolderTree;
use crate::metadata::MetadataStore;
use crate::models::{Role, UserId};
use crate::principal::{Principal, UserProfile};
use crate::quota_accountant::QuotaAccountant;
use crate::rate_limiter::{LimitType, RateLimiter};
use crate::storage::StorageBackend;
use crate::upload::UploadEngine;
use crate::workers::LifecycleWorkers;
use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

/// Everything a handler needs, constructed once at startup in
/// `run_service` and shared behind an `Arc`, same shape as the
/// teacher's `AppState`.
pub struct AppState {
    pub config: Config,
    pub metadata: Arc<MetadataStore>,
    pub storage: Arc<StorageBackend>,
    pub quota: Arc<QuotaAccountant>,
    pub upload_engine: Arc<UploadEngine>,
    pub download_engine: Arc<DownloadEngine>,
    pub folder_tree: Arc<FolderTree>,
    pub rate_limiter: Arc<RateLimiter>,
    pub workers: Arc<LifecycleWorkers>,
    pub quota_resync: QuotaResyncHandle,
    pub events: Arc<dyn EventSink>,
}

/// Resolves to the caller's `Principal`. A real deployment's auth
/// collaborator (outside the core, per spec.md §1) authenticates the
/// request upstream and attaches the result; this extractor is the
/// seam it attaches to — it trusts an `x-principal-user-id` /
/// `x-principal-role` header pair already validated by that upstream
/// layer, and looks up the user's `quotaOverride` from the metadata
/// store to build the `UserProfile` the engines depend on. No
/// credential verification happens here.
pub struct ResolvedPrincipal(pub Principal);

impl FromRequestParts<Arc<AppState>> for ResolvedPrincipal {
    type Rejection = crate::error::Error;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let Some(user_id_header) = parts.headers.get("x-principal-user-id") else {
            return Ok(ResolvedPrincipal(Principal::Anonymous));
        };

        let user_id_str = user_id_header.to_str().map_err(|_| crate::error::Error::Authentication {
            msg: "x-principal-user-id header is not valid UTF-8".to_string(),
        })?;
        let user_id = UserId::new(user_id_str);

        let user = state.metadata.user_by_id(&user_id).ok_or_else(|| crate::error::Error::Authentication {
            msg: "unknown principal".to_string(),
        })?;

        if !user.is_active {
            return Err(crate::error::Error::Authentication { msg: "account is inactive".to_string() });
        }

        let role = parts
            .headers
            .get("x-principal-role")
            .and_then(|v| v.to_str().ok())
            .map(role_from_header)
            .unwrap_or(user.role);

        Ok(ResolvedPrincipal(Principal::Authenticated(UserProfile {
            user_id,
            role,
            quota_override: user.quota_override,
        })))
    }
}

fn role_from_header(raw: &str) -> Role {
    match raw {
        "premium" => Role::Premium,
        "admin" => Role::Admin,
        _ => Role::Free,
    }
}

/// Applies spec.md §4.9's sliding-window limiter and abuse gate ahead of
/// every upload/download request. Blocked IPs are rejected outright;
/// otherwise the caller's window is checked under `"user:<id>"` (when
/// authenticated) or `"ip:<addr>"`, and a chunk upload that comes back
/// `VALIDATION` (hash mismatch, bad chunk index, path traversal) counts
/// against the IP's abuse score. Connect info is required since the
/// identifier falls back to the peer address for anonymous callers.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    let ip = addr.ip().to_string();

    if state.rate_limiter.is_blocked(&ip).await {
        return crate::error::Error::IpBlocked.into_response();
    }

    let path = req.uri().path();
    let limit_rule = if path.contains("/uploads") {
        Some((LimitType::Upload, state.config.rate_limit.upload.clone()))
    } else if path.contains("/files/") && path.ends_with("/download") {
        Some((LimitType::Download, state.config.rate_limit.download.clone()))
    } else {
        None
    };

    let identifier = req
        .headers()
        .get("x-principal-user-id")
        .and_then(|v| v.to_str().ok())
        .map(|id| format!("user:{id}"))
        .unwrap_or_else(|| format!("ip:{ip}"));

    if let Some((limit_type, rule)) = limit_rule {
        let decision = state.rate_limiter.check(limit_type, &identifier, &rule).await;
        if !decision.allowed {
            return crate::error::Error::RateLimitExceeded { retry_after: decision.retry_after }.into_response();
        }
    }

    let is_chunk_upload = path.contains("/chunks/");
    let response = next.run(req).await;

    if is_chunk_upload && response.status() == StatusCode::BAD_REQUEST {
        state.rate_limiter.record_abuse(&ip).await;
    }

    response
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct QuotaSummaryResponse {
    pub storage_used: u64,
    pub files: u64,
    pub is_over_quota: bool,
}

#[utoipa::path(
    get,
    path = "/quota",
    responses((status = 200, description = "Caller's quota summary", body = QuotaSummaryResponse)),
    tag = "quota"
)]
async fn quota_summary(
    State(state): State<Arc<AppState>>,
    ResolvedPrincipal(principal): ResolvedPrincipal,
) -> crate::error::Result<axum::Json<QuotaSummaryResponse>> {
    let user_id = principal
        .user_id()
        .ok_or_else(|| crate::error::Error::Authentication { msg: "authentication required".to_string() })?;
    let summary = state.quota.get_summary(user_id);
    Ok(axum::Json(QuotaSummaryResponse {
        storage_used: summary.usage.storage,
        files: summary.usage.files,
        is_over_quota: summary.is_over_quota,
    }))
}

#[derive(OpenApi)]
#[openapi(
    components(schemas(
        QuotaSummaryResponse,
        upload::InitUploadRequest,
        upload::InitUploadResponse,
        upload::ChunkResponse,
        upload::SessionStatusResponse,
        folders::CreateFolderRequest,
        folders::RenameFolderRequest,
        folders::MoveFolderRequest,
    )),
    tags(
        (name = "uploads", description = "Chunked upload session endpoints"),
        (name = "downloads", description = "Range-capable file download endpoints"),
        (name = "folders", description = "Folder hierarchy endpoints"),
        (name = "quota", description = "Per-user quota endpoints"),
    )
)]
pub struct ApiDoc;

/// Builds every route the thin adapter exposes. Returns an
/// `OpenApiRouter` the way the teacher's `create_api_router` does, so
/// `run_service` can `split_for_parts` it into the served router plus
/// the OpenAPI document for `RapiDoc`.
pub fn create_api_router(state: Arc<AppState>) -> OpenApiRouter {
    OpenApiRouter::with_openapi(ApiDoc::openapi())
        .routes(routes!(upload::init_upload))
        .routes(routes!(upload::upload_chunk))
        .routes(routes!(upload::complete_upload))
        .routes(routes!(upload::abort_upload))
        .routes(routes!(upload::session_status))
        .routes(routes!(upload::resume_upload))
        .routes(routes!(download::download_file))
        .routes(routes!(folders::create_folder))
        .routes(routes!(folders::move_folder))
        .routes(routes!(folders::rename_folder))
        .routes(routes!(folders::delete_folder))
        .routes(routes!(folders::list_folders))
        .routes(routes!(quota_summary))
        .layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .with_state(state)
}
