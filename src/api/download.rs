//! Single-file download endpoint, thin wrapper over
//! [`crate::download::DownloadEngine`]. Range handling, access checks,
//! and header construction all live in the engine — this just extracts
//! the request pieces and turns `DownloadOutcome` into a `Response`.

use super::{AppState, ResolvedPrincipal};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct DownloadQuery {
    password: Option<String>,
}

#[utoipa::path(
    get,
    path = "/files/{file_id}/download",
    params(("file_id" = String, Path), DownloadQuery),
    responses((status = 200, description = "File bytes"), (status = 206, description = "Partial content")),
    tag = "downloads"
)]
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    ResolvedPrincipal(principal): ResolvedPrincipal,
    Path(file_id): Path<String>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> crate::error::Result<Response> {
    let range_header = headers.get(axum::http::header::RANGE).and_then(|v| v.to_str().ok());

    let outcome = state
        .download_engine
        .prepare_download(&file_id, principal.user_id(), range_header, query.password.as_deref())
        .await?;

    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::OK);
    let mut response = Response::builder().status(status);

    for (name, value) in outcome.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            response = response.header(name, value);
        }
    }

    let body = Body::from_stream(outcome.stream);
    Ok(response.body(body).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}
