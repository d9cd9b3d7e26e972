//! Pagesmith Core: Hierarchical Job Orchestration for Document Conversion
//!
//! # Overview
//!
//! Pagesmith Core is an embeddable engine that turns a single document
//! conversion request into a tree of cooperating jobs: a main job that
//! represents the user-visible request, an optional split job that breaks a
//! PDF into per-page files, one page job per page, and a merge job that
//! stitches the page results back into a single markdown document.
//!
//! The engine is deliberately split along its seams:
//!
//! - [`store::StateStore`] — the single source of truth for job records,
//!   page records and results, scoped by owner.
//! - [`queue::WorkQueue`] — at-least-once hand-off of typed work items to a
//!   pool of workers, with bounded exponential-backoff retry.
//! - [`orchestrator::Orchestrator`] — the state machine itself. Stateless
//!   across invocations; every decision is recomputed from the store.
//! - [`convert`] — the opaque collaborators (fetcher, converter, splitter)
//!   the orchestrator drives but does not implement.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pagesmith_core::config::EngineConfig;
//! use pagesmith_core::job::SourceSpec;
//! use pagesmith_core::orchestrator::Orchestrator;
//! use pagesmith_core::queue::memory::MemoryQueue;
//! use pagesmith_core::store::memory::MemoryStore;
//!
//! # async fn demo(fetcher: Arc<dyn pagesmith_core::convert::SourceFetcher>,
//! #               converter: Arc<dyn pagesmith_core::convert::DocumentConverter>,
//! #               splitter: Arc<dyn pagesmith_core::convert::PageSplitter>)
//! #               -> anyhow::Result<()> {
//! let config = EngineConfig::default();
//! let store = Arc::new(MemoryStore::new(config.status_ttl()));
//! let queue = Arc::new(MemoryQueue::new(config.retry_policy()));
//! let engine = Orchestrator::new(store, queue, fetcher, converter, splitter, config);
//!
//! let main_id = engine
//!     .submit("owner-1", SourceSpec::LocalPath { path: "report.pdf".into() }, None, None)
//!     .await?;
//! println!("submitted {main_id}");
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod convert;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod queue;
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::sqlite::SqliteStore;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use job::{JobId, JobRecord, ResultRecord};
pub use orchestrator::{Orchestrator, WorkerPool};

/// Job execution status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job is waiting to be picked up by a worker
    Queued,
    /// Job is currently being processed
    Processing,
    /// Job finished successfully
    Completed,
    /// Job finished with an error
    Failed,
    /// Job was cancelled before it could finish
    Cancelled,
    /// Page record replaced by a retry; kept as history only
    Superseded,
}

impl JobStatus {
    /// Terminal states never transition again, except via explicit retry
    /// which replaces the record rather than mutating it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Superseded
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::Superseded => write!(f, "superseded"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            "superseded" => Ok(JobStatus::Superseded),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// Position of a job within the conversion tree
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// The user-visible conversion request; root of the tree
    Main,
    /// Intermediate step that decomposes a PDF into per-page files
    Split,
    /// One leaf that converts a single page to markdown
    Page,
    /// Intermediate step that concatenates page results
    Merge,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Main => write!(f, "main"),
            JobKind::Split => write!(f, "split"),
            JobKind::Page => write!(f, "page"),
            JobKind::Merge => write!(f, "merge"),
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "main" => Ok(JobKind::Main),
            "split" => Ok(JobKind::Split),
            "page" => Ok(JobKind::Page),
            "merge" => Ok(JobKind::Merge),
            _ => Err(anyhow::anyhow!("Invalid job kind: {}", s)),
        }
    }
}
