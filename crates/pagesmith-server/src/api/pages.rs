//! Per-page endpoints: listing, status, result and retry.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::auth::Owner;
use crate::error::ApiResult;
use crate::state::AppState;

use super::{JobResultResponse, PageListResponse, PageStatusResponse, RetryResponse};

/// `GET /jobs/{id}/pages`
pub async fn list_pages(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PageListResponse>> {
    let listing = state.engine.fetch_pages(&owner.0, id).await?;
    Ok(Json(PageListResponse {
        total_pages: listing.total_pages,
        pages_completed: listing.pages_completed,
        pages_failed: listing.pages_failed,
        pages: listing
            .pages
            .iter()
            .map(|page| PageStatusResponse::from_record(id, page))
            .collect(),
    }))
}

/// `GET /jobs/{id}/pages/{n}/status`
pub async fn page_status(
    State(state): State<AppState>,
    owner: Owner,
    Path((id, page_number)): Path<(Uuid, u32)>,
) -> ApiResult<Json<PageStatusResponse>> {
    let page = state.engine.fetch_page(&owner.0, id, page_number).await?;
    Ok(Json(PageStatusResponse::from_record(id, &page)))
}

/// `GET /jobs/{id}/pages/{n}/result`
pub async fn page_result(
    State(state): State<AppState>,
    owner: Owner,
    Path((id, page_number)): Path<(Uuid, u32)>,
) -> ApiResult<Json<JobResultResponse>> {
    let result = state
        .engine
        .fetch_page_result(&owner.0, id, page_number)
        .await?;
    Ok(Json(result.into()))
}

/// `POST /jobs/{id}/pages/{n}/retry`
pub async fn retry_page(
    State(state): State<AppState>,
    owner: Owner,
    Path((id, page_number)): Path<(Uuid, u32)>,
) -> ApiResult<(StatusCode, Json<RetryResponse>)> {
    let new_job_id = state.engine.retry_page(&owner.0, id, page_number).await?;
    Ok((StatusCode::ACCEPTED, Json(RetryResponse { new_job_id })))
}
