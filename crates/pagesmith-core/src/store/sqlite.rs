//! SQLite backend implementation.
//!
//! Records are serialized to JSON in a single `record` column; the handful
//! of columns next to it exist for indexing and filtering only. The pool
//! is capped at one connection, which serializes every operation the same
//! way a single-threaded cache would — that is what makes the counter and
//! latch operations atomic without compare-and-set loops.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;

use crate::job::{JobId, JobRecord, PageCounters, ResultRecord};

use super::{
    ChildKind, CounterField, JobFilter, JobListPage, StateStore, StoreError, StoreResult,
};

pub struct SqliteStore {
    pool: SqlitePool,
    status_ttl: Duration,
}

impl SqliteStore {
    /// Open or create a database at the specified path and set up the schema.
    pub async fn open(path: &str, status_ttl: Duration) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(to_unavailable)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(to_unavailable)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                parent_id TEXT,
                record TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(to_unavailable)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_owner ON jobs (owner, created_at DESC)")
            .execute(&pool)
            .await
            .map_err(to_unavailable)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_parent ON jobs (parent_id)")
            .execute(&pool)
            .await
            .map_err(to_unavailable)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS results (
                job_id TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(to_unavailable)?;

        Ok(Self { pool, status_ttl })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn status_expiry(&self) -> i64 {
        Utc::now().timestamp_millis() + self.status_ttl.as_millis() as i64
    }

    async fn load_job(&self, id: JobId) -> StoreResult<JobRecord> {
        let row = sqlx::query("SELECT record FROM jobs WHERE id = ? AND expires_at > ?")
            .bind(id.to_string())
            .bind(Utc::now().timestamp_millis())
            .fetch_optional(&self.pool)
            .await
            .map_err(to_unavailable)?;

        let row = row.ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
        let raw: String = row.try_get("record").map_err(to_unavailable)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Read-modify-write a record. The single-connection pool serializes
    /// this against every other store operation.
    async fn update_job<F>(&self, id: JobId, mutate: F) -> StoreResult<JobRecord>
    where
        F: FnOnce(&mut JobRecord) -> StoreResult<()>,
    {
        let mut job = self.load_job(id).await?;
        mutate(&mut job)?;

        sqlx::query("UPDATE jobs SET record = ?, status = ? WHERE id = ?")
            .bind(serde_json::to_string(&job)?)
            .bind(job.status.to_string())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(to_unavailable)?;
        Ok(job)
    }

    fn require_main(job: &mut JobRecord) -> StoreResult<&mut crate::job::MainDetail> {
        let id = job.id;
        job.as_main_mut()
            .ok_or_else(|| StoreError::NotFound(format!("main job {id}")))
    }
}

fn to_unavailable(err: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn put_job(&self, job: &JobRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO jobs
                (id, owner, kind, status, parent_id, record, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.owner)
        .bind(job.kind().to_string())
        .bind(job.status.to_string())
        .bind(job.parent_id.map(|id| id.to_string()))
        .bind(serde_json::to_string(job)?)
        .bind(job.created_at.timestamp_millis())
        .bind(self.status_expiry())
        .execute(&self.pool)
        .await
        .map_err(to_unavailable)?;
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> StoreResult<JobRecord> {
        self.load_job(id).await
    }

    async fn add_child(&self, parent: JobId, kind: ChildKind, child: JobId) -> StoreResult<()> {
        self.update_job(parent, |job| {
            let main = Self::require_main(job)?;
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
        })
        .await?;
        Ok(())
    }

    async fn inc_page_counter(
        &self,
        main: JobId,
        field: CounterField,
    ) -> StoreResult<PageCounters> {
        let job = self
            .update_job(main, |job| {
                let detail = Self::require_main(job)?;
                match field {
                    CounterField::Completed => detail.pages_completed += 1,
                    CounterField::Failed => detail.pages_failed += 1,
                }
                Ok(())
            })
            .await?;
        Ok(job
            .as_main()
            .map(|detail| detail.counters())
            .unwrap_or_default())
    }

    async fn dec_failed_counter(&self, main: JobId) -> StoreResult<PageCounters> {
        let job = self
            .update_job(main, |job| {
                let detail = Self::require_main(job)?;
                detail.pages_failed = detail.pages_failed.saturating_sub(1);
                Ok(())
            })
            .await?;
        Ok(job
            .as_main()
            .map(|detail| detail.counters())
            .unwrap_or_default())
    }

    async fn list_pages(&self, main: JobId) -> StoreResult<Vec<JobRecord>> {
        // Presence check keeps semantics aligned with the in-memory store.
        self.load_job(main).await?;

        let rows = sqlx::query(
            "SELECT record FROM jobs WHERE parent_id = ? AND kind = 'page' AND expires_at > ?",
        )
        .bind(main.to_string())
        .bind(Utc::now().timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(to_unavailable)?;

        let mut pages = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("record").map_err(to_unavailable)?;
            pages.push(serde_json::from_str::<JobRecord>(&raw)?);
        }
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
        sqlx::query(
            "INSERT OR REPLACE INTO results (job_id, record, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(serde_json::to_string(result)?)
        .bind(result.created_at.timestamp_millis())
        .bind(Utc::now().timestamp_millis() + ttl.as_millis() as i64)
        .execute(&self.pool)
        .await
        .map_err(to_unavailable)?;
        Ok(())
    }

    async fn get_result(&self, id: JobId) -> StoreResult<ResultRecord> {
        let row = sqlx::query("SELECT record FROM results WHERE job_id = ? AND expires_at > ?")
            .bind(id.to_string())
            .bind(Utc::now().timestamp_millis())
            .fetch_optional(&self.pool)
            .await
            .map_err(to_unavailable)?;

        let row = row.ok_or_else(|| StoreError::NotFound(format!("result {id}")))?;
        let raw: String = row.try_get("record").map_err(to_unavailable)?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn try_latch_merge(&self, main: JobId, merge: JobId) -> StoreResult<bool> {
        let mut won = false;
        self.update_job(main, |job| {
            let detail = Self::require_main(job)?;
            if detail.children.merge_id.is_none() {
                detail.children.merge_id = Some(merge);
                won = true;
            }
            Ok(())
        })
        .await?;
        Ok(won)
    }

    async fn release_merge_latch(&self, main: JobId) -> StoreResult<()> {
        self.update_job(main, |job| {
            Self::require_main(job)?.children.merge_id = None;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn delete_subtree(&self, main: JobId) -> StoreResult<()> {
        let main_key = main.to_string();
        sqlx::query(
            "DELETE FROM results WHERE job_id = ? OR job_id IN (SELECT id FROM jobs WHERE parent_id = ?)",
        )
        .bind(&main_key)
        .bind(&main_key)
        .execute(&self.pool)
        .await
        .map_err(to_unavailable)?;

        sqlx::query("DELETE FROM jobs WHERE id = ? OR parent_id = ?")
            .bind(&main_key)
            .bind(&main_key)
            .execute(&self.pool)
            .await
            .map_err(to_unavailable)?;
        Ok(())
    }

    async fn list_jobs_by_owner(
        &self,
        owner: &str,
        filter: JobFilter,
        page: u32,
        page_size: u32,
    ) -> StoreResult<JobListPage> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let now = Utc::now().timestamp_millis();
        let kind = filter.kind.map(|kind| kind.to_string());
        let status = filter.status.map(|status| status.to_string());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM jobs
            WHERE owner = ? AND expires_at > ?
              AND (? IS NULL OR kind = ?)
              AND (? IS NULL OR status = ?)
            "#,
        )
        .bind(owner)
        .bind(now)
        .bind(&kind)
        .bind(&kind)
        .bind(&status)
        .bind(&status)
        .fetch_one(&self.pool)
        .await
        .map_err(to_unavailable)?;

        let rows = sqlx::query(
            r#"
            SELECT record FROM jobs
            WHERE owner = ? AND expires_at > ?
              AND (? IS NULL OR kind = ?)
              AND (? IS NULL OR status = ?)
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(owner)
        .bind(now)
        .bind(&kind)
        .bind(&kind)
        .bind(&status)
        .bind(&status)
        .bind(page_size as i64)
        .bind(((page - 1) as i64) * page_size as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(to_unavailable)?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("record").map_err(to_unavailable)?;
            jobs.push(serde_json::from_str::<JobRecord>(&raw)?);
        }

        Ok(JobListPage {
            jobs,
            total: total as u64,
            page,
            page_size,
        })
    }

    async fn sweep_expired(&self) -> StoreResult<u64> {
        let now = Utc::now().timestamp_millis();
        let jobs = sqlx::query("DELETE FROM jobs WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(to_unavailable)?;
        let results = sqlx::query("DELETE FROM results WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(to_unavailable)?;
        Ok(jobs.rows_affected() + results.rows_affected())
    }
}
