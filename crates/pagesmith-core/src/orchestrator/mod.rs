//! The job state machine.
//!
//! One orchestrator instance drives every work item kind. It is stateless
//! across invocations: each handler reloads what it needs from the state
//! store, applies one step of the lifecycle, and enqueues follow-up items.
//! A missing record means the job was deleted; handlers then discard their
//! work silently.
//!
//! Fan-in correctness hinges on two store primitives: the atomic page
//! counters and the merge latch CAS. Everything else is last-writer-wins
//! on records with a single writer at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::convert::{DocumentConverter, PageSplitter, SourceFetcher};
use crate::error::{EngineError, EngineResult};
use crate::job::{
    ConvertOptions, DocumentInfo, JobDetail, JobId, JobRecord, MainDetail, PageError,
    ResultMetadata, ResultRecord, SourceSpec,
};
use crate::queue::{QueueError, WorkItem, WorkQueue};
use crate::store::{ChildKind, CounterField, JobFilter, JobListPage, StateStore, StoreError};
use crate::{JobKind, JobStatus};

mod worker;

pub use worker::WorkerPool;

/// Delimiter between concatenated page sections.
pub const PAGE_SEPARATOR: &str = "\n\n---\n\n";

const PDF_MIME: &str = "application/pdf";

/// Pages listed for one main job, newest record per page number.
#[derive(Debug, Clone)]
pub struct PageListing {
    pub total_pages: u32,
    pub pages_completed: u32,
    pub pages_failed: u32,
    pub pages: Vec<JobRecord>,
}

pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    queue: Arc<dyn WorkQueue>,
    fetcher: Arc<dyn SourceFetcher>,
    converter: Arc<dyn DocumentConverter>,
    splitter: Arc<dyn PageSplitter>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn StateStore>,
        queue: Arc<dyn WorkQueue>,
        fetcher: Arc<dyn SourceFetcher>,
        converter: Arc<dyn DocumentConverter>,
        splitter: Arc<dyn PageSplitter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            queue,
            fetcher,
            converter,
            splitter,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Public operations (driven by the API surface)
    // ------------------------------------------------------------------

    /// Accept a conversion request. Persists the main job and enqueues the
    /// first work item; no converter work happens on the request path.
    pub async fn submit(
        &self,
        owner: &str,
        source: SourceSpec,
        name: Option<String>,
        options: Option<ConvertOptions>,
    ) -> EngineResult<JobId> {
        let mut main = JobRecord::new_main(owner, name);
        let options = options.unwrap_or_default();
        if let Some(detail) = main.as_main_mut() {
            detail.options = options.clone();
        }
        self.store.put_job(&main).await?;

        let item = WorkItem::ConvertWhole {
            main_id: main.id,
            source,
            options,
        };
        if let Err(err) = self.queue.enqueue(item).await {
            // Roll the record back so the caller can resubmit cleanly.
            let _ = self.store.delete_subtree(main.id).await;
            return Err(EngineError::QueueUnavailable(err.to_string()));
        }

        info!(job_id = %main.id, owner, "accepted conversion request");
        Ok(main.id)
    }

    /// Process one work item. Every handler is an idempotent step of the
    /// state machine; replaying a delivery converges on the same state.
    #[instrument(skip(self, item), fields(job_id = %item.main_id(), op = item.op()))]
    pub async fn handle(&self, item: WorkItem) -> EngineResult<()> {
        match item {
            WorkItem::ConvertWhole {
                main_id,
                source,
                options,
            } => self.handle_convert_whole(main_id, source, options).await,
            WorkItem::SplitPdf {
                main_id,
                local_path,
            } => self.handle_split(main_id, local_path).await,
            WorkItem::ConvertPage {
                main_id,
                page_job_id,
                page_path,
                page_number,
            }
            | WorkItem::RetryPage {
                main_id,
                page_job_id,
                page_path,
                page_number,
            } => {
                self.handle_convert_page(main_id, page_job_id, page_path, page_number)
                    .await
            }
            WorkItem::MergePages { main_id } => self.handle_merge(main_id).await,
        }
    }

    /// Owner-scoped job lookup with progress recomputed from counters.
    pub async fn fetch_job(&self, owner: &str, id: JobId) -> EngineResult<JobRecord> {
        let mut job = self.owner_get(owner, id).await?;
        job.progress = compute_progress(&job);
        Ok(job)
    }

    /// Pages of a main job, newest record per page number.
    pub async fn fetch_pages(&self, owner: &str, main_id: JobId) -> EngineResult<PageListing> {
        let main = self.owner_get(owner, main_id).await?;
        let detail = require_main(&main)?;
        let total_pages = detail
            .total_pages
            .ok_or_else(|| EngineError::NotFound(format!("job {main_id} has no pages")))?;

        let pages = latest_pages(self.store.list_pages(main_id).await?);
        Ok(PageListing {
            total_pages,
            pages_completed: detail.pages_completed,
            pages_failed: detail.pages_failed,
            pages,
        })
    }

    /// The newest non-superseded page record for one page number.
    pub async fn fetch_page(
        &self,
        owner: &str,
        main_id: JobId,
        page_number: u32,
    ) -> EngineResult<JobRecord> {
        let listing = self.fetch_pages(owner, main_id).await?;
        listing
            .pages
            .into_iter()
            .find(|page| {
                page.as_page()
                    .is_some_and(|detail| detail.page_number == page_number)
            })
            .ok_or_else(|| EngineError::NotFound(format!("page {page_number} of job {main_id}")))
    }

    /// Result of a completed main or page job.
    pub async fn fetch_result(&self, owner: &str, id: JobId) -> EngineResult<ResultRecord> {
        let job = self.owner_get(owner, id).await?;
        match job.kind() {
            JobKind::Main | JobKind::Page => {}
            other => {
                return Err(EngineError::Validation(format!(
                    "{other} jobs do not carry results"
                )))
            }
        }
        match job.status {
            JobStatus::Completed => self.store.get_result(id).await.map_err(|err| match err {
                StoreError::NotFound(_) => {
                    EngineError::NotFound(format!("result for job {id} has expired"))
                }
                other => other.into(),
            }),
            JobStatus::Failed => Err(EngineError::Internal(
                job.error.unwrap_or_else(|| "conversion failed".to_string()),
            )),
            _ => Err(EngineError::Validation(format!(
                "job {id} is not completed yet"
            ))),
        }
    }

    /// Result of a single page, addressed by page number.
    pub async fn fetch_page_result(
        &self,
        owner: &str,
        main_id: JobId,
        page_number: u32,
    ) -> EngineResult<ResultRecord> {
        let page = self.fetch_page(owner, main_id, page_number).await?;
        self.fetch_result(owner, page.id).await
    }

    /// Owner-scoped listing with computed progress.
    pub async fn list_jobs(
        &self,
        owner: &str,
        filter: JobFilter,
        page: u32,
        page_size: u32,
    ) -> EngineResult<JobListPage> {
        let mut listing = self
            .store
            .list_jobs_by_owner(owner, filter, page, page_size)
            .await?;
        for job in &mut listing.jobs {
            job.progress = compute_progress(job);
        }
        Ok(listing)
    }

    /// Replace a failed page with a fresh queued record and re-arm fan-in.
    ///
    /// Permitted while the page is `failed`, including on a main that
    /// completed with placeholders. Once a main completed with zero failed
    /// pages its aggregated result is frozen and retry is a conflict.
    pub async fn retry_page(
        &self,
        owner: &str,
        main_id: JobId,
        page_number: u32,
    ) -> EngineResult<JobId> {
        let main = self.owner_get(owner, main_id).await?;
        let detail = require_main(&main)?;
        if detail.total_pages.is_none() {
            return Err(EngineError::NotFound(format!(
                "page {page_number} of job {main_id}"
            )));
        }
        match main.status {
            JobStatus::Processing => {}
            JobStatus::Completed if detail.pages_failed > 0 => {}
            JobStatus::Completed => {
                return Err(EngineError::Conflict(format!(
                    "job {main_id} completed without failed pages; resubmit instead"
                )));
            }
            other => {
                return Err(EngineError::Conflict(format!(
                    "job {main_id} is {other}; pages cannot be retried"
                )));
            }
        }

        let mut old = self.fetch_page(owner, main_id, page_number).await?;
        if old.status != JobStatus::Failed {
            return Err(EngineError::Conflict(format!(
                "page {page_number} is {}; only failed pages can be retried",
                old.status
            )));
        }
        let page_path = old
            .as_page()
            .and_then(|p| p.page_file_path.clone())
            .ok_or_else(|| {
                EngineError::Conflict(format!(
                    "page {page_number} has no source file left; resubmit instead"
                ))
            })?;

        // History stays resolvable; fan-in stops counting it.
        old.status = JobStatus::Superseded;
        self.store.put_job(&old).await?;

        let replacement = JobRecord::new_page(owner, main_id, page_number, page_path.clone());
        self.store.put_job(&replacement).await?;
        self.store
            .add_child(main_id, ChildKind::Page, replacement.id)
            .await?;
        self.store.dec_failed_counter(main_id).await?;

        // Re-arm the merge latch for the new epoch; a stale merge delivery
        // is skipped by its counter guard.
        if let Some(stale_merge) = detail.children.merge_id {
            if let Ok(mut merge) = self.store.get_job(stale_merge).await {
                if !merge.status.is_terminal() {
                    merge.status = JobStatus::Cancelled;
                    merge.completed_at = Some(chrono::Utc::now());
                    self.store.put_job(&merge).await?;
                }
            }
        }
        self.store.release_merge_latch(main_id).await?;

        let mut main = self.store.get_job(main_id).await?;
        main.status = JobStatus::Processing;
        main.completed_at = None;
        self.store.put_job(&main).await?;

        self.enqueue(WorkItem::RetryPage {
            main_id,
            page_job_id: replacement.id,
            page_path,
            page_number,
        })
        .await?;

        info!(job_id = %main_id, page_number, new_page_job = %replacement.id, "page retry accepted");
        Ok(replacement.id)
    }

    /// Delete a main job and its whole subtree. In-flight handlers notice
    /// the missing records and discard their work.
    pub async fn delete(&self, owner: &str, id: JobId) -> EngineResult<()> {
        let job = self.owner_get(owner, id).await?;
        if job.kind() != JobKind::Main {
            return Err(EngineError::Conflict(format!(
                "job {id} is a {} job; only main jobs can be deleted",
                job.kind()
            )));
        }
        self.store.delete_subtree(id).await?;
        let _ = tokio::fs::remove_dir_all(self.config.job_spool(id)).await;
        info!(job_id = %id, owner, "deleted job subtree");
        Ok(())
    }

    /// Dead-letter path: the queue gave up on the item, so record the
    /// failure on the owning job(s).
    pub async fn fail_item(&self, item: &WorkItem, err: &EngineError) {
        warn!(job_id = %item.main_id(), op = item.op(), error = %err, "dead-lettering work item");
        let outcome = match item {
            WorkItem::ConvertWhole { main_id, .. } => self.fail_job(*main_id, err).await,
            WorkItem::SplitPdf { main_id, .. } => {
                if let Ok(main) = self.store.get_job(*main_id).await {
                    if let Some(split_id) = main.as_main().and_then(|d| d.children.split_id) {
                        let _ = self.fail_job(split_id, err).await;
                    }
                }
                self.fail_job(*main_id, err).await
            }
            WorkItem::ConvertPage {
                main_id,
                page_job_id,
                ..
            }
            | WorkItem::RetryPage {
                main_id,
                page_job_id,
                ..
            } => {
                let _ = self.fail_job(*page_job_id, err).await;
                self.finish_page(*main_id, false).await
            }
            WorkItem::MergePages { main_id } => {
                if let Ok(main) = self.store.get_job(*main_id).await {
                    if let Some(merge_id) = main.as_main().and_then(|d| d.children.merge_id) {
                        let _ = self.fail_job(merge_id, err).await;
                    }
                }
                self.fail_job(*main_id, err).await
            }
        };
        if let Err(follow_up) = outcome {
            error!(job_id = %item.main_id(), error = %follow_up, "failed to record dead-letter state");
        }
    }

    // ------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------

    async fn handle_convert_whole(
        &self,
        main_id: JobId,
        source: SourceSpec,
        options: ConvertOptions,
    ) -> EngineResult<()> {
        let Some(mut main) = self.load_or_cancelled(main_id).await? else {
            return Ok(());
        };
        if main.status.is_terminal() {
            debug!(job_id = %main_id, status = %main.status, "skipping replayed item");
            return Ok(());
        }
        main.mark_started();
        self.store.put_job(&main).await?;

        let spool = self.config.job_spool(main_id);
        tokio::fs::create_dir_all(&spool)
            .await
            .map_err(|err| EngineError::Internal(format!("cannot create spool dir: {err}")))?;

        let local_path = self.fetcher.fetch(&source, &spool).await?;
        let info = self.document_info(&source, &local_path).await?;
        let is_pdf = info.mime == PDF_MIME;
        let page_count = info.page_count;

        let Some(mut main) = self.load_or_cancelled(main_id).await? else {
            return Ok(());
        };
        require_main_mut(&mut main)?.document_info = Some(info.clone());

        if is_pdf && page_count.unwrap_or(1) >= self.config.min_split_pages {
            self.store.put_job(&main).await?;
            let split = JobRecord::new_split(main.owner.clone(), main_id);
            self.store.put_job(&split).await?;
            self.store
                .add_child(main_id, ChildKind::Split, split.id)
                .await?;
            self.enqueue(WorkItem::SplitPdf {
                main_id,
                local_path,
            })
            .await?;
            info!(job_id = %main_id, pages = page_count, "fanning out into page jobs");
            return Ok(());
        }

        // Direct single-pass conversion.
        main.progress = 50;
        self.store.put_job(&main).await?;
        match self.converter.convert(&local_path, &options).await {
            Ok(output) => {
                let mut result = ResultRecord::new(
                    main_id,
                    output.markdown,
                    page_count.unwrap_or(1),
                    info.mime.clone(),
                );
                result.metadata.title = output.title;
                result.metadata.author = output.author;
                self.store
                    .put_result(main_id, &result, self.config.result_ttl())
                    .await?;

                let Some(mut main) = self.load_or_cancelled(main_id).await? else {
                    return Ok(());
                };
                main.mark_completed();
                self.store.put_job(&main).await?;
                let _ = tokio::fs::remove_dir_all(&spool).await;
                info!(job_id = %main_id, "conversion completed");
                Ok(())
            }
            Err(err) if err.is_retriable() => Err(err),
            Err(err) => {
                let Some(mut main) = self.load_or_cancelled(main_id).await? else {
                    return Ok(());
                };
                main.mark_failed(err.to_string());
                self.store.put_job(&main).await?;
                let _ = tokio::fs::remove_dir_all(&spool).await;
                warn!(job_id = %main_id, error = %err, "conversion failed");
                Ok(())
            }
        }
    }

    async fn handle_split(&self, main_id: JobId, local_path: PathBuf) -> EngineResult<()> {
        let Some(main) = self.load_or_cancelled(main_id).await? else {
            return Ok(());
        };
        let detail = require_main(&main)?;
        let Some(split_id) = detail.children.split_id else {
            return Err(EngineError::Internal(format!(
                "split item for job {main_id} without a split child"
            )));
        };
        let Some(mut split) = self.load_or_cancelled(split_id).await? else {
            return Ok(());
        };
        if split.status.is_terminal() {
            debug!(job_id = %main_id, "skipping replayed split");
            return Ok(());
        }

        let pages_dir = self.config.job_spool(main_id).join("pages");
        tokio::fs::create_dir_all(&pages_dir)
            .await
            .map_err(|err| EngineError::Internal(format!("cannot create pages dir: {err}")))?;

        let page_paths = match self.splitter.split(&local_path, &pages_dir).await {
            Ok(paths) if paths.is_empty() => {
                return self
                    .fail_split(&mut split, main_id, "split produced no pages")
                    .await;
            }
            Ok(paths) => paths,
            Err(err) if err.is_retriable() => return Err(err),
            Err(err) => {
                return self.fail_split(&mut split, main_id, &err.to_string()).await;
            }
        };
        let total = page_paths.len() as u32;

        // A replayed split recreates the fan-out; earlier page records for
        // the same numbers drop out of fan-in as superseded history.
        for mut stale in self.store.list_pages(main_id).await? {
            if !stale.status.is_terminal() {
                stale.status = JobStatus::Superseded;
                self.store.put_job(&stale).await?;
            }
        }

        let Some(mut main) = self.load_or_cancelled(main_id).await? else {
            return Ok(());
        };
        {
            let detail = require_main_mut(&mut main)?;
            detail.total_pages = Some(total);
            detail.pages_completed = 0;
            detail.pages_failed = 0;
        }
        self.store.put_job(&main).await?;

        // Persist every page record before enqueueing any page work, so
        // observers never see a page id without a record.
        let mut staged = Vec::with_capacity(page_paths.len());
        for (index, path) in page_paths.into_iter().enumerate() {
            let page_number = index as u32 + 1;
            let page = JobRecord::new_page(main.owner.clone(), main_id, page_number, path.clone());
            self.store.put_job(&page).await?;
            self.store
                .add_child(main_id, ChildKind::Page, page.id)
                .await?;
            staged.push((page.id, path, page_number));
        }
        for (page_job_id, page_path, page_number) in staged {
            self.enqueue(WorkItem::ConvertPage {
                main_id,
                page_job_id,
                page_path,
                page_number,
            })
            .await?;
        }

        split.mark_completed();
        self.store.put_job(&split).await?;
        info!(job_id = %main_id, total_pages = total, "split completed");
        Ok(())
    }

    async fn handle_convert_page(
        &self,
        main_id: JobId,
        page_job_id: JobId,
        page_path: PathBuf,
        page_number: u32,
    ) -> EngineResult<()> {
        let Some(mut page) = self.load_or_cancelled(page_job_id).await? else {
            return Ok(());
        };
        if page.status != JobStatus::Queued {
            debug!(job_id = %main_id, page_number, status = %page.status, "skipping replayed page");
            return Ok(());
        }
        page.mark_started();
        self.store.put_job(&page).await?;

        let options = match self.store.get_job(main_id).await {
            Ok(main) => require_main(&main)?.options.clone(),
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let success = match self.converter.convert(&page_path, &options).await {
            Ok(output) => {
                let mut result = ResultRecord::new(page_job_id, output.markdown, 1, PDF_MIME);
                result.metadata.title = output.title;
                result.metadata.author = output.author;
                if let Err(err) = self
                    .store
                    .put_result(page_job_id, &result, self.config.result_ttl())
                    .await
                {
                    // Put the page back so the retried delivery re-converts.
                    page.status = JobStatus::Queued;
                    let _ = self.store.put_job(&page).await;
                    return Err(err.into());
                }

                let Some(mut page) = self.load_or_cancelled(page_job_id).await? else {
                    return Ok(());
                };
                if let Some(detail) = page.as_page_mut() {
                    detail.char_count = Some(result.markdown.len() as u64);
                }
                page.mark_completed();
                self.store.put_job(&page).await?;
                let _ = tokio::fs::remove_file(&page_path).await;
                true
            }
            Err(err) if err.is_retriable() => {
                page.status = JobStatus::Queued;
                let _ = self.store.put_job(&page).await;
                return Err(err);
            }
            Err(err) => {
                page.mark_failed(err.to_string());
                self.store.put_job(&page).await?;
                warn!(job_id = %main_id, page_number, error = %err, "page conversion failed");
                false
            }
        };

        self.finish_page(main_id, success).await
    }

    /// Fan-in: bump exactly one counter for this page, and if that made the
    /// last page terminal, latch the merge. The CAS guarantees a single
    /// merge enqueue per epoch across concurrent completers.
    async fn finish_page(&self, main_id: JobId, success: bool) -> EngineResult<()> {
        let field = if success {
            CounterField::Completed
        } else {
            CounterField::Failed
        };
        let counters = match self.store.inc_page_counter(main_id, field).await {
            Ok(counters) => counters,
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let main = match self.store.get_job(main_id).await {
            Ok(main) => main,
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let detail = require_main(&main)?;
        let Some(total) = detail.total_pages else {
            return Ok(());
        };
        if counters.sum() < total {
            return Ok(());
        }

        let merge = JobRecord::new_merge(main.owner.clone(), main_id);
        if self.store.try_latch_merge(main_id, merge.id).await? {
            self.store.put_job(&merge).await?;
            self.enqueue(WorkItem::MergePages { main_id }).await?;
            info!(job_id = %main_id, completed = counters.completed, failed = counters.failed, "all pages terminal, merge enqueued");
        }
        Ok(())
    }

    async fn handle_merge(&self, main_id: JobId) -> EngineResult<()> {
        let Some(main) = self.load_or_cancelled(main_id).await? else {
            return Ok(());
        };
        let detail = require_main(&main)?;
        let (Some(merge_id), Some(total)) = (detail.children.merge_id, detail.total_pages) else {
            debug!(job_id = %main_id, "merge item without latch; skipping stale delivery");
            return Ok(());
        };
        if detail.counters().sum() < total {
            debug!(job_id = %main_id, "merge deferred; a retry epoch is in flight");
            return Ok(());
        }
        let Some(mut merge) = self.load_or_cancelled(merge_id).await? else {
            return Ok(());
        };
        if merge.status.is_terminal() {
            debug!(job_id = %main_id, "skipping replayed merge");
            return Ok(());
        }
        merge.mark_started();
        self.store.put_job(&merge).await?;

        let pages = latest_pages(self.store.list_pages(main_id).await?);
        let mut sections = Vec::with_capacity(pages.len());
        let mut per_page_errors = Vec::new();
        let mut words = 0u64;
        for page in &pages {
            let page_number = page.as_page().map(|p| p.page_number).unwrap_or_default();
            match page.status {
                JobStatus::Completed => match self.store.get_result(page.id).await {
                    Ok(result) => {
                        words += result.metadata.words;
                        sections.push(result.markdown);
                    }
                    Err(StoreError::NotFound(_)) => {
                        per_page_errors.push(PageError {
                            page_number,
                            error: "page result expired before merge".to_string(),
                        });
                        sections.push(placeholder(page_number, "page result expired"));
                    }
                    Err(err) => return Err(err.into()),
                },
                JobStatus::Failed => {
                    let message = page
                        .error
                        .clone()
                        .unwrap_or_else(|| "conversion failed".to_string());
                    per_page_errors.push(PageError {
                        page_number,
                        error: message.clone(),
                    });
                    sections.push(placeholder(page_number, &message));
                }
                status => {
                    // Counters said every page is terminal; a non-terminal
                    // record here means we raced a replayed split. Let the
                    // queue re-deliver once the dust settles.
                    return Err(EngineError::Internal(format!(
                        "page {page_number} is {status} during merge"
                    )));
                }
            }
        }

        let markdown = sections.join(PAGE_SEPARATOR);
        let format = detail
            .document_info
            .as_ref()
            .map(|info| info.mime.clone())
            .unwrap_or_else(|| PDF_MIME.to_string());
        let result = ResultRecord {
            job_id: main_id,
            metadata: ResultMetadata {
                pages: total,
                words,
                size_bytes: markdown.len() as u64,
                format,
                title: None,
                author: None,
            },
            markdown,
            per_page_errors,
            created_at: chrono::Utc::now(),
        };
        self.store
            .put_result(main_id, &result, self.config.result_ttl())
            .await?;

        merge.mark_completed();
        self.store.put_job(&merge).await?;

        let Some(mut main) = self.load_or_cancelled(main_id).await? else {
            return Ok(());
        };
        main.mark_completed();
        self.store.put_job(&main).await?;

        let _ = tokio::fs::remove_dir_all(self.config.job_spool(main_id)).await;
        info!(job_id = %main_id, pages = total, failed = result.per_page_errors.len(), "merge completed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn enqueue(&self, item: WorkItem) -> EngineResult<()> {
        self.queue.enqueue(item).await.map_err(|err| match err {
            QueueError::Closed => EngineError::QueueUnavailable("queue closed".to_string()),
            other => EngineError::QueueUnavailable(other.to_string()),
        })
    }

    /// `None` means the record vanished: the job was deleted and this
    /// handler should discard its work.
    async fn load_or_cancelled(&self, id: JobId) -> EngineResult<Option<JobRecord>> {
        match self.store.get_job(id).await {
            Ok(job) => Ok(Some(job)),
            Err(StoreError::NotFound(_)) => {
                debug!(job_id = %id, "record gone; treating as cancelled");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn owner_get(&self, owner: &str, id: JobId) -> EngineResult<JobRecord> {
        match self.store.get_job(id).await {
            // Foreign records are indistinguishable from absent ones.
            Ok(job) if job.owner == owner => Ok(job),
            Ok(_) | Err(StoreError::NotFound(_)) => {
                Err(EngineError::NotFound(format!("job {id}")))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn fail_job(&self, id: JobId, err: &EngineError) -> EngineResult<()> {
        let Some(mut job) = self.load_or_cancelled(id).await? else {
            return Ok(());
        };
        if job.status.is_terminal() {
            return Ok(());
        }
        job.mark_failed(err.to_string());
        self.store.put_job(&job).await.map_err(Into::into)
    }

    async fn fail_split(
        &self,
        split: &mut JobRecord,
        main_id: JobId,
        message: &str,
    ) -> EngineResult<()> {
        let err = EngineError::SplitFailed(message.to_string());
        split.mark_failed(err.to_string());
        self.store.put_job(split).await?;
        self.fail_job(main_id, &err).await?;
        warn!(job_id = %main_id, error = message, "split failed");
        Ok(())
    }

    async fn document_info(
        &self,
        source: &SourceSpec,
        local_path: &Path,
    ) -> EngineResult<DocumentInfo> {
        let metadata = tokio::fs::metadata(local_path)
            .await
            .map_err(|err| EngineError::FetchFailed(format!("fetched file unreadable: {err}")))?;

        let is_pdf = sniff_pdf(local_path).await;
        let filename = source.filename().map(str::to_string);
        let mime = if is_pdf {
            PDF_MIME.to_string()
        } else {
            let name = filename.as_deref().unwrap_or("");
            mime_guess::from_path(name)
                .first_raw()
                .or_else(|| mime_guess::from_path(local_path).first_raw())
                .unwrap_or("application/octet-stream")
                .to_string()
        };

        let page_count = if is_pdf {
            Some(self.splitter.page_count(local_path).await?)
        } else {
            None
        };

        Ok(DocumentInfo {
            mime,
            size_bytes: metadata.len(),
            filename,
            page_count,
        })
    }
}

/// Deterministic progress from counters, recomputed on every read.
///
/// Split path: 10 once the split finished (total known), plus 70 scaled by
/// completed pages, plus the final 20 when the merge flips the main to
/// completed. The direct path stores an opaque midpoint instead.
pub fn compute_progress(job: &JobRecord) -> u8 {
    match job.status {
        JobStatus::Completed => 100,
        JobStatus::Queued => 0,
        JobStatus::Processing => match &job.detail {
            JobDetail::Main(detail) => match detail.total_pages {
                Some(total) if total > 0 => {
                    let done = detail.pages_completed.min(total);
                    (10 + 70 * done / total) as u8
                }
                _ => job.progress,
            },
            _ => job.progress,
        },
        _ => job.progress,
    }
}

/// Newest non-superseded record per page number, in page order.
pub fn latest_pages(pages: Vec<JobRecord>) -> Vec<JobRecord> {
    use std::collections::BTreeMap;

    let mut by_number: BTreeMap<u32, JobRecord> = BTreeMap::new();
    for page in pages {
        if page.status == JobStatus::Superseded {
            continue;
        }
        let Some(number) = page.as_page().map(|p| p.page_number) else {
            continue;
        };
        let newer = by_number
            .get(&number)
            .is_none_or(|existing| page.created_at >= existing.created_at);
        if newer {
            by_number.insert(number, page);
        }
    }
    by_number.into_values().collect()
}

fn placeholder(page_number: u32, error: &str) -> String {
    format!("> Page {page_number} could not be converted: {error}")
}

fn require_main(job: &JobRecord) -> EngineResult<&MainDetail> {
    job.as_main()
        .ok_or_else(|| EngineError::Internal(format!("job {} is not a main job", job.id)))
}

fn require_main_mut(job: &mut JobRecord) -> EngineResult<&mut MainDetail> {
    let id = job.id;
    job.as_main_mut()
        .ok_or_else(|| EngineError::Internal(format!("job {id} is not a main job")))
}

async fn sniff_pdf(path: &Path) -> bool {
    use tokio::io::AsyncReadExt;

    let Ok(mut file) = tokio::fs::File::open(path).await else {
        return false;
    };
    let mut header = [0u8; 5];
    matches!(file.read_exact(&mut header).await, Ok(_)) && &header == b"%PDF-"
}
