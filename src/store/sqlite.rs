//! SQLite-backed job and status store.
//!
//! `jobs.job_link` carries a UNIQUE constraint; inserts use
//! `ON CONFLICT DO NOTHING`, so concurrent writers of the same link (even
//! from several processes) cannot produce two rows.

use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::{JobStore, SaveOutcome};
use crate::ingest::types::{canonical_link, JobPosting, Status};
use crate::status::{SourceStatus, StatusStore};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        company_name TEXT NOT NULL,
        job_title TEXT NOT NULL,
        job_link TEXT NOT NULL UNIQUE,
        posted_at TEXT NOT NULL,
        location TEXT,
        actively_hiring INTEGER NOT NULL DEFAULT 0,
        source TEXT NOT NULL DEFAULT ''
    )"#,
    r#"CREATE TABLE IF NOT EXISTS unread_jobs (
        job_id INTEGER PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS source_status (
        source_name TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        last_checked_at TEXT NOT NULL
    )"#,
];

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and apply the schema.
    /// `sqlite::memory:` gives a private in-process database.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database url {url}"))?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to an in-memory database sees its own empty
        // database, so keep exactly one alive for the pool's lifetime.
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool_opts = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_opts
            .connect_with(opts)
            .await
            .with_context(|| format!("connect {url}"))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .context("apply schema")?;
        }
        Ok(())
    }
}

fn row_to_job(row: &SqliteRow) -> anyhow::Result<JobPosting> {
    Ok(JobPosting {
        company_name: row.try_get("company_name")?,
        job_title: row.try_get("job_title")?,
        job_link: row.try_get("job_link")?,
        posted_at: row.try_get::<DateTime<Utc>, _>("posted_at")?,
        location: row.try_get("location")?,
        actively_hiring: row.try_get::<bool, _>("actively_hiring")?,
        source: row.try_get("source")?,
    })
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn save(&self, job: &JobPosting) -> anyhow::Result<SaveOutcome> {
        let link = canonical_link(&job.job_link);
        let mut tx = self.pool.begin().await.context("begin save")?;

        let res = sqlx::query(
            "INSERT INTO jobs (company_name, job_title, job_link, posted_at, location, actively_hiring, source)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(job_link) DO NOTHING",
        )
        .bind(&job.company_name)
        .bind(&job.job_title)
        .bind(&link)
        .bind(job.posted_at)
        .bind(&job.location)
        .bind(job.actively_hiring)
        .bind(&job.source)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("insert job {link}"))?;

        if res.rows_affected() == 0 {
            tx.commit().await.context("commit duplicate")?;
            return Ok(SaveOutcome::Duplicate);
        }

        sqlx::query("INSERT INTO unread_jobs (job_id) VALUES (?)")
            .bind(res.last_insert_rowid())
            .execute(&mut *tx)
            .await
            .context("insert unread")?;
        tx.commit().await.context("commit save")?;
        Ok(SaveOutcome::Inserted)
    }

    async fn claim_unread(&self, all: bool) -> anyhow::Result<Vec<JobPosting>> {
        let sql = if all {
            "SELECT * FROM jobs ORDER BY id"
        } else {
            "SELECT j.* FROM jobs j JOIN unread_jobs u ON u.job_id = j.id ORDER BY j.id"
        };

        let mut tx = self.pool.begin().await.context("begin claim")?;
        let rows = sqlx::query(sql)
            .fetch_all(&mut *tx)
            .await
            .context("select jobs")?;
        sqlx::query("DELETE FROM unread_jobs")
            .execute(&mut *tx)
            .await
            .context("clear unread")?;
        tx.commit().await.context("commit claim")?;

        rows.iter().map(row_to_job).collect()
    }

    async fn purge(&self) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await.context("begin purge")?;
        sqlx::query("DELETE FROM unread_jobs").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM jobs").execute(&mut *tx).await?;
        tx.commit().await.context("commit purge")?;
        Ok(())
    }

    async fn count(&self) -> anyhow::Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await
            .context("count jobs")?;
        Ok(n.max(0) as usize)
    }
}

#[async_trait]
impl StatusStore for SqliteStore {
    async fn get(&self, source: &str) -> anyhow::Result<Option<SourceStatus>> {
        let row = sqlx::query(
            "SELECT source_name, status, last_checked_at FROM source_status WHERE source_name = ?",
        )
        .bind(source)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("read status {source}"))?;

        row.map(|r| {
            Ok::<_, anyhow::Error>(SourceStatus {
                source_name: r.try_get("source_name")?,
                status: Status::parse(r.try_get::<&str, _>("status")?),
                last_checked_at: r.try_get("last_checked_at")?,
            })
        })
        .transpose()
    }

    async fn upsert(&self, record: SourceStatus) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO source_status (source_name, status, last_checked_at) VALUES (?, ?, ?)
             ON CONFLICT(source_name) DO UPDATE SET
                status = excluded.status,
                last_checked_at = excluded.last_checked_at",
        )
        .bind(&record.source_name)
        .bind(record.status.as_str())
        .bind(record.last_checked_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upsert status {}", record.source_name))?;
        Ok(())
    }
}
