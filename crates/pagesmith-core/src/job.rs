//! Typed job, page and result records.
//!
//! The previous generation of this service passed untyped JSON blobs
//! between handlers. Here every record is a sum type over the four job
//! kinds with a common header; serialization happens only at the state
//! store boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::{JobKind, JobStatus};

/// Random 128-bit job identifier.
pub type JobId = Uuid;

/// Where the source document comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceSpec {
    /// A file the caller uploaded; already spooled to local disk.
    Upload { path: PathBuf, filename: String },
    /// A remote document to download. HTTP(S) only.
    Url { url: String },
    /// A file already present on the local filesystem.
    LocalPath { path: PathBuf },
}

impl SourceSpec {
    /// Best-effort original filename, used for MIME detection and display.
    pub fn filename(&self) -> Option<&str> {
        match self {
            SourceSpec::Upload { filename, .. } => Some(filename.as_str()),
            SourceSpec::Url { url } => url.rsplit('/').next().filter(|s| !s.is_empty()),
            SourceSpec::LocalPath { path } => path.file_name().and_then(|n| n.to_str()),
        }
    }
}

/// Options forwarded opaquely to the converter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Run OCR on image-only pages.
    #[serde(default)]
    pub ocr: bool,
    /// Preferred OCR / extraction language hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// What we learned about the source document after fetching it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentInfo {
    pub mime: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Detected page count; only probed for PDFs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
}

/// The children a main job has fanned out to.
///
/// The parent's child list is the authoritative membership; the child's
/// `parent_id` is a back-reference used only for lookups. `page_ids`
/// contains every page job ever created for this parent, including retried
/// replacements. `merge_id` doubles as the merge latch: it is CAS-set from
/// unset by exactly one fan-in caller per epoch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChildSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_id: Option<JobId>,
    #[serde(default)]
    pub page_ids: Vec<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_id: Option<JobId>,
}

/// Snapshot of a main job's fan-in counters, taken atomically.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageCounters {
    pub completed: u32,
    pub failed: u32,
}

impl PageCounters {
    pub fn sum(&self) -> u32 {
        self.completed + self.failed
    }
}

/// Kind-specific payload of a job record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobDetail {
    Main(MainDetail),
    Split,
    Page(PageDetail),
    Merge,
}

/// Extra state carried only by main jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MainDetail {
    /// Unknown until the split step completes; `None` on the direct path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub pages_completed: u32,
    #[serde(default)]
    pub pages_failed: u32,
    #[serde(default)]
    pub children: ChildSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_info: Option<DocumentInfo>,
    /// Submit-time options, reapplied to every page conversion.
    #[serde(default)]
    pub options: ConvertOptions,
}

impl MainDetail {
    pub fn counters(&self) -> PageCounters {
        PageCounters {
            completed: self.pages_completed,
            failed: self.pages_failed,
        }
    }
}

/// Extra state carried only by page jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageDetail {
    /// 1-based page number within the parent document.
    pub page_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_file_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_count: Option<u64>,
}

/// A job record: common header plus kind-specific detail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub owner: String,
    pub status: JobStatus,
    /// Advisory for intermediate kinds; recomputed from counters for mains.
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<JobId>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub detail: JobDetail,
}

impl JobRecord {
    pub fn new_main(owner: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            status: JobStatus::Queued,
            progress: 0,
            name,
            error: None,
            parent_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            detail: JobDetail::Main(MainDetail::default()),
        }
    }

    pub fn new_split(owner: impl Into<String>, parent: JobId) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            status: JobStatus::Processing,
            progress: 0,
            name: None,
            error: None,
            parent_id: Some(parent),
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
            detail: JobDetail::Split,
        }
    }

    pub fn new_page(
        owner: impl Into<String>,
        parent: JobId,
        page_number: u32,
        page_file_path: PathBuf,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            status: JobStatus::Queued,
            progress: 0,
            name: None,
            error: None,
            parent_id: Some(parent),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            detail: JobDetail::Page(PageDetail {
                page_number,
                page_file_path: Some(page_file_path),
                char_count: None,
            }),
        }
    }

    pub fn new_merge(owner: impl Into<String>, parent: JobId) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            status: JobStatus::Queued,
            progress: 0,
            name: None,
            error: None,
            parent_id: Some(parent),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            detail: JobDetail::Merge,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self.detail {
            JobDetail::Main(_) => JobKind::Main,
            JobDetail::Split => JobKind::Split,
            JobDetail::Page(_) => JobKind::Page,
            JobDetail::Merge => JobKind::Merge,
        }
    }

    pub fn as_main(&self) -> Option<&MainDetail> {
        match &self.detail {
            JobDetail::Main(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_main_mut(&mut self) -> Option<&mut MainDetail> {
        match &mut self.detail {
            JobDetail::Main(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_page(&self) -> Option<&PageDetail> {
        match &self.detail {
            JobDetail::Page(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_page_mut(&mut self) -> Option<&mut PageDetail> {
        match &mut self.detail {
            JobDetail::Page(p) => Some(p),
            _ => None,
        }
    }

    /// Transition into `processing` and stamp the start time.
    pub fn mark_started(&mut self) {
        self.status = JobStatus::Processing;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Transition into a terminal success state.
    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.completed_at = Some(Utc::now());
    }

    /// Transition into a terminal failure state with the recorded error.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }
}

/// A single failed page surfaced in an otherwise merged result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageError {
    pub page_number: u32,
    pub error: String,
}

/// Aggregated metadata stored alongside every result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultMetadata {
    pub pages: u32,
    pub words: u64,
    pub size_bytes: u64,
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

/// Stored only for `main` and `page` jobs, and only once they completed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultRecord {
    pub job_id: JobId,
    pub markdown: String,
    pub metadata: ResultMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub per_page_errors: Vec<PageError>,
    pub created_at: DateTime<Utc>,
}

impl ResultRecord {
    /// Build a result for a single converted unit (whole document or page).
    pub fn new(job_id: JobId, markdown: String, pages: u32, format: impl Into<String>) -> Self {
        let words = count_words(&markdown);
        let size_bytes = markdown.len() as u64;
        Self {
            job_id,
            markdown,
            metadata: ResultMetadata {
                pages,
                words,
                size_bytes,
                format: format.into(),
                title: None,
                author: None,
            },
            per_page_errors: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Whitespace-delimited word count used for result metadata.
pub fn count_words(markdown: &str) -> u64 {
    markdown.split_whitespace().count() as u64
}
