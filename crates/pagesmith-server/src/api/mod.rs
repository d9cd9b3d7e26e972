//! HTTP request/response types shared across the API handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pagesmith_core::job::{
    ConvertOptions, DocumentInfo, JobId, JobRecord, PageError, ResultMetadata, ResultRecord,
};

use crate::error::ApiError;

pub mod health;
pub mod jobs;
pub mod pages;

/// Document types accepted for conversion.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "pdf", "docx", "html", "htm", "pptx", "xlsx", "rtf", "odt",
];

/// Reject filenames whose extension is not in the allow-list.
pub fn validate_extension(filename: &str) -> Result<(), ApiError> {
    let extension = filename
        .rsplit('.')
        .next()
        .filter(|ext| *ext != filename)
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(())
    } else {
        Err(ApiError::UnsupportedType(filename.to_string()))
    }
}

/// Response to a successful submission.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub message: String,
}

/// A job record as seen by API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub job_type: String,
    pub status: String,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages_completed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages_failed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_info: Option<DocumentInfo>,
}

impl From<JobRecord> for JobStatusResponse {
    fn from(job: JobRecord) -> Self {
        let main = job.as_main().cloned();
        Self {
            job_id: job.id,
            job_type: job.kind().to_string(),
            status: job.status.to_string(),
            progress: job.progress,
            name: job.name,
            error: job.error,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            total_pages: main.as_ref().and_then(|detail| detail.total_pages),
            pages_completed: main.as_ref().map(|detail| detail.pages_completed),
            pages_failed: main.as_ref().map(|detail| detail.pages_failed),
            document_info: main.and_then(|detail| detail.document_info),
        }
    }
}

/// A stored result rendered to the client.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobResultResponse {
    pub job_id: JobId,
    pub markdown: String,
    pub metadata: ResultMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub per_page_errors: Vec<PageError>,
    pub created_at: DateTime<Utc>,
}

impl From<ResultRecord> for JobResultResponse {
    fn from(result: ResultRecord) -> Self {
        Self {
            job_id: result.job_id,
            markdown: result.markdown,
            metadata: result.metadata,
            per_page_errors: result.per_page_errors,
            created_at: result.created_at,
        }
    }
}

/// JSON body for `POST /convert`.
#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    /// `url` or `path`.
    pub source_type: String,
    pub source: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub options: Option<ConvertOptions>,
}

/// One entry of the page listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct PageStatusResponse {
    pub page_number: u32,
    pub job_id: JobId,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub url: String,
}

impl PageStatusResponse {
    pub fn from_record(main_id: JobId, page: &JobRecord) -> Self {
        let detail = page.as_page();
        let page_number = detail.map(|d| d.page_number).unwrap_or_default();
        Self {
            page_number,
            job_id: page.id,
            status: page.status.to_string(),
            char_count: detail.and_then(|d| d.char_count),
            error: page.error.clone(),
            url: format!("/jobs/{main_id}/pages/{page_number}/result"),
        }
    }
}

/// Response for `GET /jobs/{id}/pages`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PageListResponse {
    pub total_pages: u32,
    pub pages_completed: u32,
    pub pages_failed: u32,
    pub pages: Vec<PageStatusResponse>,
}

/// Response for `POST /jobs/{id}/pages/{n}/retry`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RetryResponse {
    pub new_job_id: JobId,
}

/// Paged listing of an owner's jobs.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobStatusResponse>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Response for `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub store: String,
    pub workers: usize,
}
