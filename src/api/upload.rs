//! Chunked upload endpoints, thin wrappers over [`crate::upload::UploadEngine`].

use super::{AppState, ResolvedPrincipal};
use crate::error::{Error, Result};
use crate::models::FolderId;
use axum::extract::{Json, Path, State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct InitUploadRequest {
    pub filename: String,
    pub size: u64,
    pub hash: Option<String>,
    pub mime_type: Option<String>,
    pub folder_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InitUploadResponse {
    pub session_id: String,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub upload_urls: Vec<String>,
}

#[utoipa::path(
    post,
    path = "/uploads",
    request_body = InitUploadRequest,
    responses((status = 201, description = "Upload session created", body = InitUploadResponse)),
    tag = "uploads"
)]
pub async fn init_upload(
    State(state): State<Arc<AppState>>,
    ResolvedPrincipal(principal): ResolvedPrincipal,
    Json(req): Json<InitUploadRequest>,
) -> Result<axum::Json<InitUploadResponse>> {
    let profile = principal
        .profile()
        .ok_or_else(|| Error::Authentication { msg: "authentication required".to_string() })?;

    let init = state
        .upload_engine
        .init(
            &profile.user_id,
            profile.role,
            &profile.quota_override,
            &req.filename,
            req.size,
            req.hash,
            req.mime_type.as_deref(),
            req.folder_id.map(FolderId::new),
        )
        .await?;

    Ok(axum::Json(InitUploadResponse {
        session_id: init.session_id,
        chunk_size: init.chunk_size,
        total_chunks: init.total_chunks,
        expires_at: init.expires_at,
        upload_urls: init.upload_urls,
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChunkResponse {
    pub status: String,
    pub completed_chunks: u32,
    pub total_chunks: u32,
    pub progress: f64,
}

#[utoipa::path(
    put,
    path = "/uploads/{session_id}/chunks/{chunk_index}",
    params(("session_id" = String, Path), ("chunk_index" = u32, Path)),
    responses((status = 200, description = "Chunk accepted", body = ChunkResponse)),
    tag = "uploads"
)]
pub async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    Path((session_id, chunk_index)): Path<(String, u32)>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Result<axum::Json<ChunkResponse>> {
    let provided_hash = headers.get("x-chunk-hash").and_then(|v| v.to_str().ok());
    let outcome = state
        .upload_engine
        .chunk(&session_id, chunk_index, &body, provided_hash)
        .await?;

    Ok(axum::Json(ChunkResponse {
        status: match outcome.status {
            crate::upload::ChunkStatus::Accepted => "accepted".to_string(),
            crate::upload::ChunkStatus::AlreadyUploaded => "already_uploaded".to_string(),
        },
        completed_chunks: outcome.completed_chunks,
        total_chunks: outcome.total_chunks,
        progress: outcome.progress,
    }))
}

#[utoipa::path(
    post,
    path = "/uploads/{session_id}/complete",
    params(("session_id" = String, Path)),
    responses((status = 201, description = "Session assembled into a file")),
    tag = "uploads"
)]
pub async fn complete_upload(
    State(state): State<Arc<AppState>>,
    ResolvedPrincipal(principal): ResolvedPrincipal,
    Path(session_id): Path<String>,
) -> Result<axum::Json<serde_json::Value>> {
    let profile = principal
        .profile()
        .ok_or_else(|| Error::Authentication { msg: "authentication required".to_string() })?;

    let file = state
        .upload_engine
        .complete(&session_id, &profile.user_id, profile.role, &profile.quota_override)
        .await?;
    state.quota_resync.request_resync(profile.user_id.clone()).await;

    Ok(axum::Json(serde_json::json!({
        "fileId": file.id.to_string(),
        "size": file.size,
        "hash": file.hash,
        "expiresAt": file.expires_at,
    })))
}

#[utoipa::path(
    delete,
    path = "/uploads/{session_id}",
    params(("session_id" = String, Path)),
    responses((status = 204, description = "Session aborted")),
    tag = "uploads"
)]
pub async fn abort_upload(
    State(state): State<Arc<AppState>>,
    ResolvedPrincipal(principal): ResolvedPrincipal,
    Path(session_id): Path<String>,
) -> Result<axum::http::StatusCode> {
    let profile = principal
        .profile()
        .ok_or_else(|| Error::Authentication { msg: "authentication required".to_string() })?;

    state.upload_engine.abort(&session_id, &profile.user_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub status: String,
    pub total_chunks: u32,
    pub completed_chunks: u32,
    pub remaining_chunks: Vec<u32>,
    pub progress: f64,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[utoipa::path(
    get,
    path = "/uploads/{session_id}",
    params(("session_id" = String, Path)),
    responses((status = 200, description = "Session status", body = SessionStatusResponse)),
    tag = "uploads"
)]
pub async fn session_status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<axum::Json<SessionStatusResponse>> {
    let status = state.upload_engine.status(&session_id).await?;
    Ok(axum::Json(SessionStatusResponse {
        session_id: status.session_id,
        status: format!("{:?}", status.status).to_lowercase(),
        total_chunks: status.total_chunks,
        completed_chunks: status.completed_chunks,
        remaining_chunks: status.remaining_chunks,
        progress: status.progress,
        expires_at: status.expires_at,
    }))
}

#[utoipa::path(
    get,
    path = "/uploads/{session_id}/resume",
    params(("session_id" = String, Path)),
    responses((status = 200, description = "Resume info for a live session")),
    tag = "uploads"
)]
pub async fn resume_upload(
    State(state): State<Arc<AppState>>,
    ResolvedPrincipal(principal): ResolvedPrincipal,
    Path(session_id): Path<String>,
) -> Result<axum::Json<serde_json::Value>> {
    let profile = principal
        .profile()
        .ok_or_else(|| Error::Authentication { msg: "authentication required".to_string() })?;

    let resume = state.upload_engine.resume(&session_id, &profile.user_id).await?;
    Ok(axum::Json(serde_json::json!({
        "status": SessionStatusResponse {
            session_id: resume.status.session_id,
            status: format!("{:?}", resume.status.status).to_lowercase(),
            total_chunks: resume.status.total_chunks,
            completed_chunks: resume.status.completed_chunks,
            remaining_chunks: resume.status.remaining_chunks,
            progress: resume.status.progress,
            expires_at: resume.status.expires_at,
        },
        "uploadUrls": resume.upload_urls,
    })))
}
