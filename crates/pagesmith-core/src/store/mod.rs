//! State store abstraction.
//!
//! A single source of truth for job records, page records and results,
//! scoped by owner. The orchestrator is the only mutator of job status;
//! the store only guarantees the primitives that need atomicity with
//! respect to concurrent fan-in callers: `add_child`, the page counters,
//! and the merge latch CAS.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::job::{JobId, JobRecord, PageCounters, ResultRecord};
use crate::{JobKind, JobStatus};

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Which child slot a new job occupies under its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    Split,
    Page,
    Merge,
}

/// Which fan-in counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterField {
    Completed,
    Failed,
}

/// Filter for owner-scoped job listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobFilter {
    pub kind: Option<JobKind>,
    pub status: Option<JobStatus>,
}

/// One page of an owner-scoped job listing, newest first.
#[derive(Debug, Clone)]
pub struct JobListPage {
    pub jobs: Vec<JobRecord>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Authoritative persistence of jobs, pages and results.
///
/// All operations are idempotent when retried with the same inputs.
/// Job records live under the status TTL configured at construction;
/// results live under the per-call TTL of [`StateStore::put_result`].
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Overwrite the full record. Callers read-modify-write; concurrent
    /// writes to the same record are a design error except for the
    /// dedicated atomic operations below.
    async fn put_job(&self, job: &JobRecord) -> StoreResult<()>;

    async fn get_job(&self, id: JobId) -> StoreResult<JobRecord>;

    /// Atomically append a child to the parent's child list.
    async fn add_child(&self, parent: JobId, kind: ChildKind, child: JobId) -> StoreResult<()>;

    /// Atomically bump one fan-in counter and return the post-increment
    /// snapshot of both. The snapshot is what fan-in decisions key on.
    async fn inc_page_counter(&self, main: JobId, field: CounterField)
        -> StoreResult<PageCounters>;

    /// Atomically decrement the failed counter (retry path); saturates at 0.
    async fn dec_failed_counter(&self, main: JobId) -> StoreResult<PageCounters>;

    /// All page records ever created for the main job, ordered by
    /// page number and then creation time.
    async fn list_pages(&self, main: JobId) -> StoreResult<Vec<JobRecord>>;

    async fn put_result(&self, id: JobId, result: &ResultRecord, ttl: Duration)
        -> StoreResult<()>;

    async fn get_result(&self, id: JobId) -> StoreResult<ResultRecord>;

    /// CAS the merge latch from unset to `merge`. Returns `true` for the
    /// single winning caller; losers observe `false` and do nothing.
    async fn try_latch_merge(&self, main: JobId, merge: JobId) -> StoreResult<bool>;

    /// Re-arm the merge latch so a retry epoch can latch again.
    async fn release_merge_latch(&self, main: JobId) -> StoreResult<()>;

    /// Remove the main job, all its children and all their results.
    async fn delete_subtree(&self, main: JobId) -> StoreResult<()>;

    async fn list_jobs_by_owner(
        &self,
        owner: &str,
        filter: JobFilter,
        page: u32,
        page_size: u32,
    ) -> StoreResult<JobListPage>;

    /// Drop expired records; returns how many were removed.
    async fn sweep_expired(&self) -> StoreResult<u64>;
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
