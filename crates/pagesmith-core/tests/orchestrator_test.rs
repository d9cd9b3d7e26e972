//! Integration tests for the orchestration engine.
//!
//! Drives the orchestrator against the in-memory store and queue with
//! scripted fake collaborators, covering the direct path, fan-out/fan-in,
//! page retry, deletion mid-flight and the final-page race.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use pagesmith_core::config::EngineConfig;
use pagesmith_core::convert::{ConvertOutput, DocumentConverter, PageSplitter, SourceFetcher};
use pagesmith_core::error::{EngineError, EngineResult};
use pagesmith_core::job::{ConvertOptions, SourceSpec};
use pagesmith_core::orchestrator::{Orchestrator, WorkerPool, PAGE_SEPARATOR};
use pagesmith_core::queue::memory::MemoryQueue;
use pagesmith_core::queue::WorkItem;
use pagesmith_core::store::memory::MemoryStore;
use pagesmith_core::store::{JobFilter, StateStore};
use pagesmith_core::{JobKind, JobStatus};

const OWNER: &str = "owner-1";

/// Resolves local paths as-is; remote fetch is exercised in the server crate.
struct LocalFetcher {
    fail_remaining: AtomicU32,
}

#[async_trait]
impl SourceFetcher for LocalFetcher {
    async fn fetch(&self, source: &SourceSpec, _dest_dir: &Path) -> EngineResult<PathBuf> {
        if self.fail_remaining.load(Ordering::SeqCst) > 0 {
            self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(EngineError::FetchFailed("synthetic outage".into()));
        }
        match source {
            SourceSpec::LocalPath { path } => Ok(path.clone()),
            SourceSpec::Upload { path, .. } => Ok(path.clone()),
            SourceSpec::Url { url } => Err(EngineError::FetchFailed(format!(
                "no network in tests: {url}"
            ))),
        }
    }
}

/// Echoes file content back as markdown; fails pages listed in `fail_pages`.
struct EchoConverter {
    fail_pages: Mutex<HashSet<u32>>,
}

impl EchoConverter {
    fn page_number_of(path: &Path) -> Option<u32> {
        path.file_stem()?
            .to_str()?
            .rsplit('-')
            .next()?
            .parse()
            .ok()
    }
}

#[async_trait]
impl DocumentConverter for EchoConverter {
    async fn convert(
        &self,
        path: &Path,
        _options: &ConvertOptions,
    ) -> EngineResult<ConvertOutput> {
        if let Some(number) = Self::page_number_of(path) {
            if self.fail_pages.lock().unwrap().contains(&number) {
                return Err(EngineError::ConvertFailed(format!(
                    "synthetic failure on page {number}"
                )));
            }
        }
        let markdown = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| EngineError::ConvertFailed(err.to_string()))?;
        Ok(ConvertOutput {
            markdown,
            title: None,
            author: None,
        })
    }
}

/// Splits into `pages` files named `page-N.pdf` containing `page N body`.
struct FixedSplitter {
    pages: u32,
}

#[async_trait]
impl PageSplitter for FixedSplitter {
    async fn page_count(&self, _path: &Path) -> EngineResult<u32> {
        Ok(self.pages)
    }

    async fn split(&self, _path: &Path, out_dir: &Path) -> EngineResult<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for number in 1..=self.pages {
            let path = out_dir.join(format!("page-{number}.pdf"));
            tokio::fs::write(&path, format!("page {number} body"))
                .await
                .map_err(|err| EngineError::SplitFailed(err.to_string()))?;
            paths.push(path);
        }
        Ok(paths)
    }
}

struct Rig {
    store: Arc<MemoryStore>,
    queue: Arc<MemoryQueue>,
    engine: Arc<Orchestrator>,
    converter: Arc<EchoConverter>,
    fetcher: Arc<LocalFetcher>,
    dir: TempDir,
}

fn rig_with(pages: u32, config: EngineConfig) -> Rig {
    let dir = TempDir::new().unwrap();
    let mut config = config;
    config.spool_dir = dir.path().join("spool");

    let store = Arc::new(MemoryStore::new(config.status_ttl()));
    let queue = Arc::new(MemoryQueue::new(config.retry_policy()));
    let fetcher = Arc::new(LocalFetcher {
        fail_remaining: AtomicU32::new(0),
    });
    let converter = Arc::new(EchoConverter {
        fail_pages: Mutex::new(HashSet::new()),
    });
    let splitter = Arc::new(FixedSplitter { pages });

    let engine = Arc::new(Orchestrator::new(
        store.clone(),
        queue.clone(),
        fetcher.clone(),
        converter.clone(),
        splitter,
        config,
    ));
    Rig {
        store,
        queue,
        engine,
        converter,
        fetcher,
        dir,
    }
}

fn rig(pages: u32) -> Rig {
    rig_with(pages, EngineConfig::default())
}

impl Rig {
    fn write_source(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn pdf_source(&self) -> SourceSpec {
        SourceSpec::LocalPath {
            path: self.write_source("doc.pdf", "%PDF-1.4 test document"),
        }
    }

    fn html_source(&self) -> SourceSpec {
        SourceSpec::LocalPath {
            path: self.write_source("report.html", "<h1>quarterly report</h1>"),
        }
    }

    /// Run every queued item (and the items those spawn) to completion.
    async fn drain(&self) {
        while let Some(delivery) = self.queue.try_pop() {
            self.engine.handle(delivery.item).await.expect("handler");
        }
    }
}

#[tokio::test]
async fn test_direct_conversion_of_html() {
    let rig = rig(1);
    let id = rig
        .engine
        .submit(OWNER, rig.html_source(), Some("report".into()), None)
        .await
        .unwrap();
    rig.drain().await;

    let job = rig.engine.fetch_job(OWNER, id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    let info = job.as_main().unwrap().document_info.clone().unwrap();
    assert_eq!(info.mime, "text/html");
    assert!(info.page_count.is_none());

    let result = rig.engine.fetch_result(OWNER, id).await.unwrap();
    assert_eq!(result.markdown, "<h1>quarterly report</h1>");
    assert!(result.metadata.words > 0);

    // no fan-out happened, so there is no page listing
    assert!(matches!(
        rig.engine.fetch_pages(OWNER, id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_single_page_pdf_skips_split() {
    let rig = rig(1);
    let id = rig
        .engine
        .submit(OWNER, rig.pdf_source(), None, None)
        .await
        .unwrap();
    rig.drain().await;

    let job = rig.engine.fetch_job(OWNER, id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let detail = job.as_main().unwrap();
    assert!(detail.total_pages.is_none());
    assert_eq!(detail.document_info.as_ref().unwrap().page_count, Some(1));

    let result = rig.engine.fetch_result(OWNER, id).await.unwrap();
    assert!(!result.markdown.is_empty());
    assert_eq!(result.metadata.pages, 1);
}

#[tokio::test]
async fn test_three_page_pdf_fans_out_and_merges_in_order() {
    let rig = rig(3);
    let id = rig
        .engine
        .submit(OWNER, rig.pdf_source(), None, None)
        .await
        .unwrap();
    rig.drain().await;

    let job = rig.engine.fetch_job(OWNER, id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    let detail = job.as_main().unwrap();
    assert_eq!(detail.total_pages, Some(3));
    assert_eq!(detail.pages_completed, 3);
    assert_eq!(detail.pages_failed, 0);

    let listing = rig.engine.fetch_pages(OWNER, id).await.unwrap();
    assert_eq!(listing.total_pages, 3);
    let numbers: Vec<u32> = listing
        .pages
        .iter()
        .map(|page| page.as_page().unwrap().page_number)
        .collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert!(listing
        .pages
        .iter()
        .all(|page| page.status == JobStatus::Completed));

    let result = rig.engine.fetch_result(OWNER, id).await.unwrap();
    let expected = format!(
        "page 1 body{PAGE_SEPARATOR}page 2 body{PAGE_SEPARATOR}page 3 body"
    );
    assert_eq!(result.markdown, expected);
    assert_eq!(result.metadata.pages, 3);
    assert!(result.per_page_errors.is_empty());

    // per-page results stay addressable
    let page_two = rig.engine.fetch_page_result(OWNER, id, 2).await.unwrap();
    assert_eq!(page_two.markdown, "page 2 body");
}

#[tokio::test]
async fn test_failed_page_yields_placeholder_then_retry_recovers() {
    let rig = rig(3);
    rig.converter.fail_pages.lock().unwrap().insert(2);

    let id = rig
        .engine
        .submit(OWNER, rig.pdf_source(), None, None)
        .await
        .unwrap();
    rig.drain().await;

    let job = rig.engine.fetch_job(OWNER, id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let detail = job.as_main().unwrap();
    assert_eq!(detail.pages_completed, 2);
    assert_eq!(detail.pages_failed, 1);

    let result = rig.engine.fetch_result(OWNER, id).await.unwrap();
    assert!(result.markdown.contains("Page 2 could not be converted"));
    assert_eq!(result.per_page_errors.len(), 1);
    assert_eq!(result.per_page_errors[0].page_number, 2);

    // retried page succeeds and the main re-finalizes
    rig.converter.fail_pages.lock().unwrap().clear();
    let new_page = rig.engine.retry_page(OWNER, id, 2).await.unwrap();
    rig.drain().await;

    let job = rig.engine.fetch_job(OWNER, id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let detail = job.as_main().unwrap();
    assert_eq!(detail.pages_completed, 3);
    assert_eq!(detail.pages_failed, 0);
    assert!(detail.children.page_ids.contains(&new_page));

    let result = rig.engine.fetch_result(OWNER, id).await.unwrap();
    assert!(result.markdown.contains("page 2 body"));
    assert!(!result.markdown.contains("could not be converted"));
    assert!(result.per_page_errors.is_empty());

    // the superseded record remains resolvable as history
    let pages = rig.store.list_pages(id).await.unwrap();
    assert!(pages
        .iter()
        .any(|page| page.status == JobStatus::Superseded));
}

#[tokio::test]
async fn test_all_pages_fail_then_recover_one_by_one() {
    let rig = rig(2);
    rig.converter
        .fail_pages
        .lock()
        .unwrap()
        .extend([1u32, 2u32]);

    let id = rig
        .engine
        .submit(OWNER, rig.pdf_source(), None, None)
        .await
        .unwrap();
    rig.drain().await;

    let job = rig.engine.fetch_job(OWNER, id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let detail = job.as_main().unwrap();
    assert_eq!(detail.pages_completed, 0);
    assert_eq!(detail.pages_failed, 2);
    let result = rig.engine.fetch_result(OWNER, id).await.unwrap();
    assert_eq!(result.per_page_errors.len(), 2);

    rig.converter.fail_pages.lock().unwrap().clear();
    for number in [1u32, 2u32] {
        rig.engine.retry_page(OWNER, id, number).await.unwrap();
        rig.drain().await;
    }

    let job = rig.engine.fetch_job(OWNER, id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let detail = job.as_main().unwrap();
    assert_eq!(detail.pages_completed, 2);
    assert_eq!(detail.pages_failed, 0);
    let result = rig.engine.fetch_result(OWNER, id).await.unwrap();
    assert!(result.per_page_errors.is_empty());
}

#[tokio::test]
async fn test_retry_rejected_on_cleanly_completed_main() {
    let rig = rig(2);
    let id = rig
        .engine
        .submit(OWNER, rig.pdf_source(), None, None)
        .await
        .unwrap();
    rig.drain().await;

    let err = rig.engine.retry_page(OWNER, id, 1).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[tokio::test]
async fn test_result_expires_before_job_record() {
    let config = EngineConfig {
        result_ttl_seconds: 0,
        ..EngineConfig::default()
    };
    let rig = rig_with(1, config);
    let id = rig
        .engine
        .submit(OWNER, rig.html_source(), None, None)
        .await
        .unwrap();
    rig.drain().await;

    let job = rig.engine.fetch_job(OWNER, id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(matches!(
        rig.engine.fetch_result(OWNER, id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_final_pages_enqueue_exactly_one_merge() {
    let rig = rig(2);
    let id = rig
        .engine
        .submit(OWNER, rig.pdf_source(), None, None)
        .await
        .unwrap();

    // run ConvertWhole and SplitPdf by hand, leaving the two page items queued
    let whole = rig.queue.try_pop().unwrap();
    rig.engine.handle(whole.item).await.unwrap();
    let split = rig.queue.try_pop().unwrap();
    rig.engine.handle(split.item).await.unwrap();

    let first = rig.queue.try_pop().unwrap().item;
    let second = rig.queue.try_pop().unwrap().item;
    assert!(matches!(first, WorkItem::ConvertPage { .. }));
    assert!(matches!(second, WorkItem::ConvertPage { .. }));

    let (a, b) = tokio::join!(rig.engine.handle(first), rig.engine.handle(second));
    a.unwrap();
    b.unwrap();

    // exactly one merge item regardless of interleaving
    let mut merges = 0;
    while let Some(delivery) = rig.queue.try_pop() {
        assert!(matches!(delivery.item, WorkItem::MergePages { .. }));
        merges += 1;
        rig.engine.handle(delivery.item).await.unwrap();
    }
    assert_eq!(merges, 1);

    let job = rig.engine.fetch_job(OWNER, id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_handler_replay_is_idempotent() {
    let rig = rig(3);
    let source = rig.pdf_source();
    let id = rig.engine.submit(OWNER, source.clone(), None, None).await.unwrap();
    rig.drain().await;

    let before = rig.engine.fetch_result(OWNER, id).await.unwrap();

    // replaying any item against a settled tree changes nothing
    rig.engine
        .handle(WorkItem::ConvertWhole {
            main_id: id,
            source,
            options: ConvertOptions::default(),
        })
        .await
        .unwrap();
    rig.engine
        .handle(WorkItem::MergePages { main_id: id })
        .await
        .unwrap();

    let job = rig.engine.fetch_job(OWNER, id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let after = rig.engine.fetch_result(OWNER, id).await.unwrap();
    assert_eq!(after.markdown, before.markdown);
}

#[tokio::test]
async fn test_delete_cancels_in_flight_work() {
    let rig = rig(2);
    let id = rig
        .engine
        .submit(OWNER, rig.pdf_source(), None, None)
        .await
        .unwrap();

    // fan out, then delete before any page converts
    let whole = rig.queue.try_pop().unwrap();
    rig.engine.handle(whole.item).await.unwrap();
    let split = rig.queue.try_pop().unwrap();
    rig.engine.handle(split.item).await.unwrap();

    rig.engine.delete(OWNER, id).await.unwrap();

    // remaining page items find no records and discard silently
    rig.drain().await;
    assert!(matches!(
        rig.engine.fetch_job(OWNER, id).await,
        Err(EngineError::NotFound(_))
    ));
    let listing = rig
        .engine
        .list_jobs(OWNER, JobFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(listing.total, 0);
}

#[tokio::test]
async fn test_owner_isolation_yields_not_found() {
    let rig = rig(1);
    let id = rig
        .engine
        .submit(OWNER, rig.html_source(), None, None)
        .await
        .unwrap();
    rig.drain().await;

    assert!(matches!(
        rig.engine.fetch_job("owner-2", id).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        rig.engine.fetch_result("owner-2", id).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        rig.engine.delete("owner-2", id).await,
        Err(EngineError::NotFound(_))
    ));

    let listing = rig
        .engine
        .list_jobs("owner-2", JobFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(listing.total, 0);

    let listing = rig
        .engine
        .list_jobs(
            OWNER,
            JobFilter {
                kind: Some(JobKind::Main),
                status: Some(JobStatus::Completed),
            },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(listing.total, 1);
}

#[tokio::test]
async fn test_transient_fetch_failure_recovers_via_queue_retry() {
    let config = EngineConfig {
        queue_retry_base_seconds: 0,
        ..EngineConfig::default()
    };
    let rig = rig_with(1, config);
    rig.fetcher.fail_remaining.store(2, Ordering::SeqCst);

    let id = rig
        .engine
        .submit(OWNER, rig.html_source(), None, None)
        .await
        .unwrap();

    let pool = WorkerPool::spawn(rig.engine.clone(), rig.queue.clone(), 1);
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let job = rig.engine.fetch_job(OWNER, id).await.unwrap();
        if job.status == JobStatus::Completed {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "job did not complete, stuck at {}",
            job.status
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    rig.queue.close();
    pool.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_retries_dead_letter_the_main_job() {
    let config = EngineConfig {
        queue_retry_base_seconds: 0,
        ..EngineConfig::default()
    };
    let rig = rig_with(1, config);
    rig.fetcher.fail_remaining.store(u32::MAX, Ordering::SeqCst);

    let id = rig
        .engine
        .submit(OWNER, rig.html_source(), None, None)
        .await
        .unwrap();

    let pool = WorkerPool::spawn(rig.engine.clone(), rig.queue.clone(), 1);
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let job = rig.engine.fetch_job(OWNER, id).await.unwrap();
        if job.status == JobStatus::Failed {
            assert!(job.error.unwrap().contains("fetch failed"));
            break;
        }
        assert!(std::time::Instant::now() < deadline, "job never dead-lettered");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    rig.queue.close();
    pool.shutdown().await;
}
