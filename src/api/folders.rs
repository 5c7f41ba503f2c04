//! Folder hierarchy endpoints, thin wrappers over [`crate::folder_tree::FolderTree`].

use super::{AppState, ResolvedPrincipal};
use crate::error::{Error, Result};
use crate::folder_tree::SortOrder;
use crate::models::FolderId;
use axum::extract::{Json, Path, Query, State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateFolderRequest {
    pub name: String,
    pub parent_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FolderResponse {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub path: String,
    pub depth: u32,
}

impl From<crate::models::Folder> for FolderResponse {
    fn from(f: crate::models::Folder) -> Self {
        Self {
            id: f.id.to_string(),
            name: f.name,
            parent_id: f.parent_id.map(|id| id.to_string()),
            path: f.path,
            depth: f.depth,
        }
    }
}

#[utoipa::path(
    post,
    path = "/folders",
    request_body = CreateFolderRequest,
    responses((status = 201, description = "Folder created", body = FolderResponse)),
    tag = "folders"
)]
pub async fn create_folder(
    State(state): State<Arc<AppState>>,
    ResolvedPrincipal(principal): ResolvedPrincipal,
    Json(req): Json<CreateFolderRequest>,
) -> Result<axum::Json<FolderResponse>> {
    let user_id = principal
        .user_id()
        .ok_or_else(|| Error::Authentication { msg: "authentication required".to_string() })?;

    let folder = state
        .folder_tree
        .create(user_id, &req.name, req.parent_id.map(FolderId::new))
        .await?;

    Ok(axum::Json(folder.into()))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MoveFolderRequest {
    pub new_parent_id: Option<String>,
}

#[utoipa::path(
    patch,
    path = "/folders/{folder_id}/move",
    params(("folder_id" = String, Path)),
    request_body = MoveFolderRequest,
    responses((status = 200, description = "Folder moved", body = FolderResponse)),
    tag = "folders"
)]
pub async fn move_folder(
    State(state): State<Arc<AppState>>,
    ResolvedPrincipal(principal): ResolvedPrincipal,
    Path(folder_id): Path<String>,
    Json(req): Json<MoveFolderRequest>,
) -> Result<axum::Json<FolderResponse>> {
    let user_id = principal
        .user_id()
        .ok_or_else(|| Error::Authentication { msg: "authentication required".to_string() })?;

    let folder = state
        .folder_tree
        .move_folder(user_id, &FolderId::new(folder_id), req.new_parent_id.map(FolderId::new))
        .await?;

    Ok(axum::Json(folder.into()))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RenameFolderRequest {
    pub name: String,
}

#[utoipa::path(
    patch,
    path = "/folders/{folder_id}",
    params(("folder_id" = String, Path)),
    request_body = RenameFolderRequest,
    responses((status = 200, description = "Folder renamed", body = FolderResponse)),
    tag = "folders"
)]
pub async fn rename_folder(
    State(state): State<Arc<AppState>>,
    ResolvedPrincipal(principal): ResolvedPrincipal,
    Path(folder_id): Path<String>,
    Json(req): Json<RenameFolderRequest>,
) -> Result<axum::Json<FolderResponse>> {
    let user_id = principal
        .user_id()
        .ok_or_else(|| Error::Authentication { msg: "authentication required".to_string() })?;

    let folder = state.folder_tree.rename(user_id, &FolderId::new(folder_id), &req.name).await?;
    Ok(axum::Json(folder.into()))
}

#[utoipa::path(
    delete,
    path = "/folders/{folder_id}",
    params(("folder_id" = String, Path)),
    responses((status = 204, description = "Folder deleted recursively")),
    tag = "folders"
)]
pub async fn delete_folder(
    State(state): State<Arc<AppState>>,
    ResolvedPrincipal(principal): ResolvedPrincipal,
    Path(folder_id): Path<String>,
) -> Result<axum::http::StatusCode> {
    let user_id = principal
        .user_id()
        .ok_or_else(|| Error::Authentication { msg: "authentication required".to_string() })?;

    state.folder_tree.delete(user_id, &FolderId::new(folder_id)).await?;
    state.quota_resync.request_resync(user_id.clone()).await;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListFoldersQuery {
    parent_id: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
    sort: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ContentsResponse {
    pub folders: Vec<FolderResponse>,
    pub files: Vec<FileSummary>,
    pub page: u32,
    pub limit: u32,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct FileSummary {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

impl From<crate::models::File> for FileSummary {
    fn from(f: crate::models::File) -> Self {
        Self { id: f.id.to_string(), name: f.original_name, size: f.size, mime_type: f.mime_type }
    }
}

#[utoipa::path(
    get,
    path = "/folders/contents",
    params(ListFoldersQuery),
    responses((status = 200, description = "Folder and file listing")),
    tag = "folders"
)]
pub async fn list_folders(
    State(state): State<Arc<AppState>>,
    ResolvedPrincipal(principal): ResolvedPrincipal,
    Query(query): Query<ListFoldersQuery>,
) -> Result<axum::Json<ContentsResponse>> {
    let user_id = principal
        .user_id()
        .ok_or_else(|| Error::Authentication { msg: "authentication required".to_string() })?;

    let folder_id = query.parent_id.map(FolderId::new);
    let sort = match query.sort.as_deref() {
        Some("newest") => SortOrder::NewestFirst,
        Some("oldest") => SortOrder::OldestFirst,
        _ => SortOrder::NameAsc,
    };

    let page = state.folder_tree.contents(user_id, folder_id.as_ref(), query.page.unwrap_or(1), query.limit.unwrap_or(50), sort);

    Ok(axum::Json(ContentsResponse {
        folders: page.folders.into_iter().map(Into::into).collect(),
        files: page.files.into_iter().map(Into::into).collect(),
        page: page.page,
        limit: page.limit,
        total: page.total,
    }))
}
