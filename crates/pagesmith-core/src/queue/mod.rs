//! Work queue abstraction.
//!
//! FIFO hand-off of typed work items with at-least-once delivery. There is
//! no cross-item ordering guarantee; fan-in correctness relies on the
//! state store's atomic counters, never on message order.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::job::{ConvertOptions, JobId, SourceSpec};

pub mod memory;

/// One unit of work handed to a worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkItem {
    /// Fetch the source and either convert directly or fan out.
    ConvertWhole {
        main_id: JobId,
        source: SourceSpec,
        options: ConvertOptions,
    },
    /// Decompose a fetched PDF into per-page files and page jobs.
    SplitPdf { main_id: JobId, local_path: PathBuf },
    /// Convert a single page file to markdown.
    ConvertPage {
        main_id: JobId,
        page_job_id: JobId,
        page_path: PathBuf,
        page_number: u32,
    },
    /// Concatenate page results onto the main job.
    MergePages { main_id: JobId },
    /// Re-run a page after an explicit user retry. The record surgery has
    /// already happened; the conversion itself is identical to
    /// [`WorkItem::ConvertPage`].
    RetryPage {
        main_id: JobId,
        page_job_id: JobId,
        page_path: PathBuf,
        page_number: u32,
    },
}

impl WorkItem {
    /// The main job this item belongs to.
    pub fn main_id(&self) -> JobId {
        match self {
            WorkItem::ConvertWhole { main_id, .. }
            | WorkItem::SplitPdf { main_id, .. }
            | WorkItem::ConvertPage { main_id, .. }
            | WorkItem::MergePages { main_id }
            | WorkItem::RetryPage { main_id, .. } => *main_id,
        }
    }

    /// Short operation name for log fields.
    pub fn op(&self) -> &'static str {
        match self {
            WorkItem::ConvertWhole { .. } => "convert_whole",
            WorkItem::SplitPdf { .. } => "split_pdf",
            WorkItem::ConvertPage { .. } => "convert_page",
            WorkItem::MergePages { .. } => "merge_pages",
            WorkItem::RetryPage { .. } => "retry_page",
        }
    }
}

/// A dequeued item plus its delivery attempt count (1-based).
#[derive(Debug, Clone)]
pub struct Delivery {
    pub item: WorkItem,
    pub attempt: u32,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue closed")]
    Closed,

    #[error("retry budget exhausted after {0} attempts")]
    Exhausted(u32),
}

/// At-least-once dispatch of work items to workers.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append an item for first delivery.
    async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError>;

    /// Wait for the next deliverable item.
    async fn dequeue(&self) -> Result<Delivery, QueueError>;

    /// Schedule a failed delivery for backoff re-delivery. Returns
    /// [`QueueError::Exhausted`] once the retry budget is spent; the
    /// caller then dead-letters the corresponding job.
    async fn retry(&self, delivery: Delivery) -> Result<(), QueueError>;

    /// Items currently deliverable (excludes deliveries sleeping in backoff).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exponential backoff schedule for re-deliveries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub multiplier: u32,
    /// Re-deliveries allowed after the first attempt.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            multiplier: 2,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Backoff before re-delivering an item whose `attempt`-th delivery
    /// failed, or `None` once the budget is exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.max_attempts {
            return None;
        }
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        Some(self.base.saturating_mul(factor))
    }

    /// Full jitter on top of the schedule so synchronized failures do not
    /// re-deliver in lockstep.
    pub fn jittered(&self, delay: Duration) -> Duration {
        if delay.is_zero() {
            return delay;
        }
        let millis = delay.as_millis() as u64;
        let spread = (millis / 10).max(1);
        let offset = rand::rng().random_range(0..=spread);
        Duration::from_millis(millis - spread / 2 + offset)
    }
}
