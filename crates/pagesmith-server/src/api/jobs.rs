//! Submission, status, result, listing and deletion endpoints.

use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::Json;
use serde::Deserialize;
use std::str::FromStr;
use uuid::Uuid;

use pagesmith_core::job::SourceSpec;
use pagesmith_core::store::JobFilter;
use pagesmith_core::{JobKind, JobStatus};

use crate::auth::Owner;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

use super::{
    validate_extension, ConvertRequest, JobListResponse, JobResultResponse, JobStatusResponse,
    SubmitResponse,
};

fn submit_response(job_id: Uuid, created_at: chrono::DateTime<chrono::Utc>) -> SubmitResponse {
    SubmitResponse {
        job_id,
        status: "queued".to_string(),
        created_at,
        message: "conversion accepted".to_string(),
    }
}

/// `POST /upload` — multipart file submission.
pub async fn upload(
    State(state): State<AppState>,
    owner: Owner,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    submit_multipart(state, owner, multipart).await
}

async fn submit_multipart(
    state: AppState,
    owner: Owner,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let mut name: Option<String> = None;
    let mut filename: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(format!("multipart error: {err}")))?
    {
        match field.name() {
            Some("file") => {
                filename = field.file_name().map(str::to_string);
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|err| ApiError::BadRequest(format!("unreadable file: {err}")))?
                        .to_vec(),
                );
            }
            Some("name") => {
                name = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| ApiError::BadRequest(format!("unreadable name: {err}")))?,
                );
            }
            _ => {}
        }
    }

    let bytes = bytes.ok_or_else(|| ApiError::BadRequest("missing `file` field".to_string()))?;
    let filename =
        filename.ok_or_else(|| ApiError::BadRequest("file field has no filename".to_string()))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("uploaded file is empty".to_string()));
    }
    if bytes.len() as u64 > state.engine.config().max_file_size_bytes() {
        return Err(ApiError::TooLarge(state.engine.config().max_file_size_mb));
    }
    validate_extension(&filename)?;

    // Spool before submitting; the request path does no conversion work.
    let uploads = state.engine.config().spool_dir.join("uploads");
    tokio::fs::create_dir_all(&uploads)
        .await
        .map_err(|err| ApiError::BadRequest(format!("cannot spool upload: {err}")))?;
    let path = uploads.join(format!("{}-{}", Uuid::new_v4(), filename.replace('/', "_")));
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|err| ApiError::BadRequest(format!("cannot spool upload: {err}")))?;

    tracing::info!(owner = %owner.0, filename, bytes = bytes.len(), "upload accepted");
    let job_id = state
        .engine
        .submit(&owner.0, SourceSpec::Upload { path, filename }, name, None)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(submit_response(job_id, chrono::Utc::now())),
    ))
}

/// `POST /convert` — JSON submission with a URL or local-path source, or
/// multipart exactly like `/upload`.
pub async fn convert(
    State(state): State<AppState>,
    owner: Owner,
    request: Request,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|err| ApiError::BadRequest(format!("multipart error: {err}")))?;
        return submit_multipart(state, owner, multipart).await;
    }

    let Json(request): Json<ConvertRequest> = Json::from_request(request, &state)
        .await
        .map_err(|err| ApiError::BadRequest(format!("invalid request body: {err}")))?;

    let source = match request.source_type.as_str() {
        "url" => {
            let url = request.source.trim().to_string();
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ApiError::BadRequest(
                    "url sources must be http(s)".to_string(),
                ));
            }
            SourceSpec::Url { url }
        }
        "path" => {
            validate_extension(&request.source)?;
            SourceSpec::LocalPath {
                path: request.source.clone().into(),
            }
        }
        other => {
            return Err(ApiError::BadRequest(format!(
                "unknown source_type `{other}`; expected `url` or `path`"
            )));
        }
    };

    let job_id = state
        .engine
        .submit(&owner.0, source, request.name, request.options)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(submit_response(job_id, chrono::Utc::now())),
    ))
}

/// `GET /jobs/{id}`
pub async fn get_job(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = state.engine.fetch_job(&owner.0, id).await?;
    Ok(Json(job.into()))
}

/// `GET /jobs/{id}/result`
pub async fn get_result(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobResultResponse>> {
    let result = state.engine.fetch_result(&owner.0, id).await?;
    Ok(Json(result.into()))
}

/// `DELETE /jobs/{id}`
pub async fn delete_job(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.engine.delete(&owner.0, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

/// `GET /jobs`
pub async fn list_jobs(
    State(state): State<AppState>,
    owner: Owner,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<JobListResponse>> {
    let kind = query
        .job_type
        .as_deref()
        .map(JobKind::from_str)
        .transpose()
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;
    let status = query
        .status
        .as_deref()
        .map(JobStatus::from_str)
        .transpose()
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let listing = state
        .engine
        .list_jobs(
            &owner.0,
            JobFilter { kind, status },
            query.page,
            query.page_size.min(100),
        )
        .await?;

    Ok(Json(JobListResponse {
        jobs: listing.jobs.into_iter().map(Into::into).collect(),
        total: listing.total,
        page: listing.page,
        page_size: listing.page_size,
    }))
}
