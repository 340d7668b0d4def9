//! Persistent job store: the one resource shared across invocations.
//!
//! Access is limited to keyed existence checks, conditional inserts and
//! batched deletes. Nothing here reads a row, modifies it and writes it back.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use djb_core::NormalizedJob;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;

/// Postgres SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted,
    /// Id or apply URL already present. Expected, never an error.
    Duplicate,
}

/// The columns duplicate cleanup groups on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DedupRow {
    pub id: String,
    pub title: String,
    pub company: String,
    pub apply_url: Option<String>,
    pub posted_at: DateTime<Utc>,
}

impl From<&NormalizedJob> for DedupRow {
    fn from(job: &NormalizedJob) -> Self {
        Self {
            id: job.id.clone(),
            title: job.title.clone(),
            company: job.company.clone(),
            apply_url: job.apply_url.clone(),
            posted_at: job.posted_at,
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn exists_by_id(&self, id: &str) -> Result<bool, StoreError>;

    async fn find_id_by_apply_url(&self, apply_url: &str) -> Result<Option<String>, StoreError>;

    /// Insert unless the id or apply URL is already stored.
    async fn insert_if_absent(&self, job: &NormalizedJob) -> Result<InsertOutcome, StoreError>;

    /// Returns the number of rows removed.
    async fn delete_by_ids(&self, ids: &[String]) -> Result<u64, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    async fn count_by_source(&self) -> Result<BTreeMap<String, u64>, StoreError>;

    async fn list_dedup_rows(&self) -> Result<Vec<DedupRow>, StoreError>;
}

/// In-process store with the same uniqueness rules as the Postgres schema.
/// Backs `--dry-run` and the test suites.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<BTreeMap<String, NormalizedJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_jobs(jobs: impl IntoIterator<Item = NormalizedJob>) -> Self {
        let store = Self::new();
        {
            let mut map = store.jobs.lock().await;
            for job in jobs {
                map.insert(job.id.clone(), job);
            }
        }
        store
    }

    pub async fn snapshot(&self) -> Vec<NormalizedJob> {
        self.jobs.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn exists_by_id(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.jobs.lock().await.contains_key(id))
    }

    async fn find_id_by_apply_url(&self, apply_url: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .find(|j| j.apply_url.as_deref() == Some(apply_url))
            .map(|j| j.id.clone()))
    }

    async fn insert_if_absent(&self, job: &NormalizedJob) -> Result<InsertOutcome, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let url_taken = job.apply_url.as_deref().is_some_and(|url| {
            jobs.values()
                .any(|existing| existing.apply_url.as_deref() == Some(url))
        });
        if url_taken || jobs.contains_key(&job.id) {
            return Ok(InsertOutcome::Duplicate);
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.lock().await;
        Ok(ids.iter().filter(|id| jobs.remove(id.as_str()).is_some()).count() as u64)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.jobs.lock().await.len() as u64)
    }

    async fn count_by_source(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        let mut counts = BTreeMap::new();
        for job in self.jobs.lock().await.values() {
            *counts.entry(job.source.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn list_dedup_rows(&self) -> Result<Vec<DedupRow>, StoreError> {
        Ok(self.jobs.lock().await.values().map(DedupRow::from).collect())
    }
}

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn exists_by_id(&self, id: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM jobs WHERE id = $1) AS present")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("present")?)
    }

    async fn find_id_by_apply_url(&self, apply_url: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT id FROM jobs WHERE apply_url = $1 LIMIT 1")
            .bind(apply_url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get("id")).transpose()?)
    }

    async fn insert_if_absent(&self, job: &NormalizedJob) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, source, title, company, location, company_logo,
                salary_min, salary_max, salary_text, description,
                job_type, experience_level, skills, apply_url, posted_at, is_featured
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&job.id)
        .bind(job.source.as_str())
        .bind(&job.title)
        .bind(&job.company)
        .bind(&job.location)
        .bind(&job.company_logo)
        .bind(job.salary_min)
        .bind(job.salary_max)
        .bind(&job.salary_text)
        .bind(&job.description)
        .bind(job.job_type.as_str())
        .bind(job.experience_level.as_str())
        .bind(&job.skills)
        .bind(&job.apply_url)
        .bind(job.posted_at)
        .bind(job.is_featured)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Ok(InsertOutcome::Duplicate),
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Duplicate),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let done = sqlx::query("DELETE FROM jobs WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as u64)
    }

    async fn count_by_source(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT source, COUNT(*) AS n
              FROM jobs
             GROUP BY source
             ORDER BY source
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let source: String = row.try_get("source")?;
            let n: i64 = row.try_get("n")?;
            counts.insert(source, n.max(0) as u64);
        }
        Ok(counts)
    }

    async fn list_dedup_rows(&self) -> Result<Vec<DedupRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, company, apply_url, posted_at
              FROM jobs
             ORDER BY posted_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(DedupRow {
                id: row.try_get("id")?,
                title: row.try_get("title")?,
                company: row.try_get("company")?,
                apply_url: row.try_get("apply_url")?,
                posted_at: row.try_get("posted_at")?,
            });
        }
        Ok(out)
    }
}
