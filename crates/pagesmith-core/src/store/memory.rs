//! In-memory state store.
//!
//! The authoritative single-process backend: one `RwLock` over all maps
//! makes every multi-key operation trivially atomic. Keys mirror the
//! cache layout the service grew up with — job records, TTL'd results,
//! per-owner index — with the merge latch living on the main record's
//! child set. TTLs are enforced lazily on read plus an explicit sweep.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::job::{JobDetail, JobId, JobRecord, PageCounters, ResultRecord};

use super::{
    ChildKind, CounterField, JobFilter, JobListPage, StateStore, StoreError, StoreResult,
};

struct JobEntry {
    job: JobRecord,
    expires_at: Instant,
}

struct ResultEntry {
    result: ResultRecord,
    expires_at: Instant,
}

#[derive(Default)]
struct Shelves {
    jobs: HashMap<JobId, JobEntry>,
    results: HashMap<JobId, ResultEntry>,
    owner_index: HashMap<String, Vec<JobId>>,
}

pub struct MemoryStore {
    inner: RwLock<Shelves>,
    status_ttl: Duration,
}

impl MemoryStore {
    pub fn new(status_ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(Shelves::default()),
            status_ttl,
        }
    }
}

impl Shelves {
    fn live_job(&self, id: JobId) -> Option<&JobRecord> {
        self.jobs
            .get(&id)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| &entry.job)
    }

    fn live_job_mut(&mut self, id: JobId) -> StoreResult<&mut JobRecord> {
        let entry = self
            .jobs
            .get_mut(&id)
            .filter(|entry| entry.expires_at > Instant::now())
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
        Ok(&mut entry.job)
    }

    fn main_counters(&mut self, id: JobId) -> StoreResult<PageCounters> {
        let job = self.live_job_mut(id)?;
        match &job.detail {
            JobDetail::Main(main) => Ok(main.counters()),
            _ => Err(StoreError::NotFound(format!("main job {id}"))),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn put_job(&self, job: &JobRecord) -> StoreResult<()> {
        let mut shelves = self.inner.write().await;
        let fresh = !shelves.jobs.contains_key(&job.id);
        shelves.jobs.insert(
            job.id,
            JobEntry {
                job: job.clone(),
                expires_at: Instant::now() + self.status_ttl,
            },
        );
        if fresh {
            shelves
                .owner_index
                .entry(job.owner.clone())
                .or_default()
                .push(job.id);
        }
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> StoreResult<JobRecord> {
        let shelves = self.inner.read().await;
        shelves
            .live_job(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))
    }

    async fn add_child(&self, parent: JobId, kind: ChildKind, child: JobId) -> StoreResult<()> {
        let mut shelves = self.inner.write().await;
        let job = shelves.live_job_mut(parent)?;
        let main = job
            .as_main_mut()
            .ok_or_else(|| StoreError::NotFound(format!("main job {parent}")))?;
        match kind {
            ChildKind::Split => main.children.split_id = Some(child),
            ChildKind::Merge => main.children.merge_id = Some(child),
            ChildKind::Page => {
                if !main.children.page_ids.contains(&child) {
                    main.children.page_ids.push(child);
                }
            }
        }
        Ok(())
    }

    async fn inc_page_counter(
        &self,
        main: JobId,
        field: CounterField,
    ) -> StoreResult<PageCounters> {
        let mut shelves = self.inner.write().await;
        {
            let job = shelves.live_job_mut(main)?;
            let detail = job
                .as_main_mut()
                .ok_or_else(|| StoreError::NotFound(format!("main job {main}")))?;
            match field {
                CounterField::Completed => detail.pages_completed += 1,
                CounterField::Failed => detail.pages_failed += 1,
            }
        }
        shelves.main_counters(main)
    }

    async fn dec_failed_counter(&self, main: JobId) -> StoreResult<PageCounters> {
        let mut shelves = self.inner.write().await;
        {
            let job = shelves.live_job_mut(main)?;
            let detail = job
                .as_main_mut()
                .ok_or_else(|| StoreError::NotFound(format!("main job {main}")))?;
            detail.pages_failed = detail.pages_failed.saturating_sub(1);
        }
        shelves.main_counters(main)
    }

    async fn list_pages(&self, main: JobId) -> StoreResult<Vec<JobRecord>> {
        let shelves = self.inner.read().await;
        let job = shelves
            .live_job(main)
            .ok_or_else(|| StoreError::NotFound(format!("job {main}")))?;
        let detail = job
            .as_main()
            .ok_or_else(|| StoreError::NotFound(format!("main job {main}")))?;

        let mut pages: Vec<JobRecord> = detail
            .children
            .page_ids
            .iter()
            .filter_map(|id| shelves.live_job(*id))
            .cloned()
            .collect();
        pages.sort_by(|a, b| {
            let an = a.as_page().map(|p| p.page_number).unwrap_or(0);
            let bn = b.as_page().map(|p| p.page_number).unwrap_or(0);
            an.cmp(&bn).then(a.created_at.cmp(&b.created_at))
        });
        Ok(pages)
    }

    async fn put_result(
        &self,
        id: JobId,
        result: &ResultRecord,
        ttl: Duration,
    ) -> StoreResult<()> {
        let mut shelves = self.inner.write().await;
        shelves.results.insert(
            id,
            ResultEntry {
                result: result.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get_result(&self, id: JobId) -> StoreResult<ResultRecord> {
        let shelves = self.inner.read().await;
        shelves
            .results
            .get(&id)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.result.clone())
            .ok_or_else(|| StoreError::NotFound(format!("result {id}")))
    }

    async fn try_latch_merge(&self, main: JobId, merge: JobId) -> StoreResult<bool> {
        let mut shelves = self.inner.write().await;
        let job = shelves.live_job_mut(main)?;
        let detail = job
            .as_main_mut()
            .ok_or_else(|| StoreError::NotFound(format!("main job {main}")))?;
        if detail.children.merge_id.is_none() {
            detail.children.merge_id = Some(merge);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn release_merge_latch(&self, main: JobId) -> StoreResult<()> {
        let mut shelves = self.inner.write().await;
        let job = shelves.live_job_mut(main)?;
        let detail = job
            .as_main_mut()
            .ok_or_else(|| StoreError::NotFound(format!("main job {main}")))?;
        detail.children.merge_id = None;
        Ok(())
    }

    async fn delete_subtree(&self, main: JobId) -> StoreResult<()> {
        let mut shelves = self.inner.write().await;

        let mut doomed = vec![main];
        if let Some(entry) = shelves.jobs.get(&main) {
            if let JobDetail::Main(detail) = &entry.job.detail {
                doomed.extend(detail.children.split_id);
                doomed.extend(detail.children.page_ids.iter().copied());
                doomed.extend(detail.children.merge_id);
            }
        }

        for id in &doomed {
            if let Some(entry) = shelves.jobs.remove(id) {
                if let Some(ids) = shelves.owner_index.get_mut(&entry.job.owner) {
                    ids.retain(|candidate| candidate != id);
                }
            }
            shelves.results.remove(id);
        }
        Ok(())
    }

    async fn list_jobs_by_owner(
        &self,
        owner: &str,
        filter: JobFilter,
        page: u32,
        page_size: u32,
    ) -> StoreResult<JobListPage> {
        let shelves = self.inner.read().await;
        let ids = shelves.owner_index.get(owner);

        let mut jobs: Vec<JobRecord> = ids
            .into_iter()
            .flatten()
            .filter_map(|id| shelves.live_job(*id))
            .filter(|job| filter.kind.is_none_or(|kind| job.kind() == kind))
            .filter(|job| filter.status.is_none_or(|status| job.status == status))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = jobs.len() as u64;
        let page = page.max(1);
        let page_size = page_size.max(1);
        let start = ((page - 1) as usize).saturating_mul(page_size as usize);
        let jobs = jobs
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect();

        Ok(JobListPage {
            jobs,
            total,
            page,
            page_size,
        })
    }

    async fn sweep_expired(&self) -> StoreResult<u64> {
        let mut shelves = self.inner.write().await;
        let now = Instant::now();
        let mut removed = 0u64;

        let dead: Vec<JobId> = shelves
            .jobs
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in dead {
            if let Some(entry) = shelves.jobs.remove(&id) {
                if let Some(ids) = shelves.owner_index.get_mut(&entry.job.owner) {
                    ids.retain(|candidate| *candidate != id);
                }
                removed += 1;
            }
        }

        let dead_results: Vec<JobId> = shelves
            .results
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in dead_results {
            shelves.results.remove(&id);
            removed += 1;
        }

        shelves.owner_index.retain(|_, ids| !ids.is_empty());
        Ok(removed)
    }
}
