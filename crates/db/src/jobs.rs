// crates/db/src/jobs.rs
//! Durable job mirror.
//!
//! One row per job, the full job record as a JSON payload plus the columns
//! the server filters on. This mirror is advisory: the in-memory job map
//! is authoritative for the life of the process, and every caller treats a
//! failed write here as log-and-continue. What the mirror buys is history
//! across restarts — including the resume ledger of a job whose process
//! died.

use crate::{Database, DbResult};

/// A persisted job row. The server owns the payload schema; this crate
/// only stores and filters it.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub job_type: String,
    pub status: String,
    /// Full serialized job record (progress, result, trace, params).
    pub payload: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Database {
    /// Insert or replace a job row.
    pub async fn upsert_job(&self, row: &JobRow) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO jobs (id, job_type, status, payload, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 payload = excluded.payload,
                 updated_at = excluded.updated_at",
        )
        .bind(&row.id)
        .bind(&row.job_type)
        .bind(&row.status)
        .bind(&row.payload)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, id: &str) -> DbResult<Option<JobRow>> {
        let row: Option<(String, String, String, String, String, String)> = sqlx::query_as(
            "SELECT id, job_type, status, payload, created_at, updated_at FROM jobs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(
            |(id, job_type, status, payload, created_at, updated_at)| JobRow {
                id,
                job_type,
                status,
                payload,
                created_at,
                updated_at,
            },
        ))
    }

    /// Recent jobs, newest first. Filtering beyond the limit happens in
    /// the server's merged view where the in-memory copies win.
    pub async fn list_jobs(&self, limit: u32) -> DbResult<Vec<JobRow>> {
        let rows: Vec<(String, String, String, String, String, String)> = sqlx::query_as(
            "SELECT id, job_type, status, payload, created_at, updated_at
             FROM jobs ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, job_type, status, payload, created_at, updated_at)| JobRow {
                id,
                job_type,
                status,
                payload,
                created_at,
                updated_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, status: &str, created_at: &str) -> JobRow {
        JobRow {
            id: id.into(),
            job_type: "score".into(),
            status: status.into(),
            payload: format!("{{\"id\":\"{id}\"}}"),
            created_at: created_at.into(),
            updated_at: created_at.into(),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let db = Database::new_in_memory().await.unwrap();
        db.upsert_job(&row("job-1", "running", "2026-08-01T10:00:00Z")).await.unwrap();

        let fetched = db.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(fetched.status, "running");

        // Upsert replaces status/payload but keeps created_at.
        let mut updated = row("job-1", "completed", "2026-08-01T10:00:00Z");
        updated.updated_at = "2026-08-01T10:05:00Z".into();
        db.upsert_job(&updated).await.unwrap();

        let fetched = db.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(fetched.status, "completed");
        assert_eq!(fetched.created_at, "2026-08-01T10:00:00Z");
        assert_eq!(fetched.updated_at, "2026-08-01T10:05:00Z");
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let db = Database::new_in_memory().await.unwrap();
        assert!(db.get_job("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_newest_first_with_limit() {
        let db = Database::new_in_memory().await.unwrap();
        db.upsert_job(&row("a", "completed", "2026-08-01T09:00:00Z")).await.unwrap();
        db.upsert_job(&row("b", "completed", "2026-08-01T11:00:00Z")).await.unwrap();
        db.upsert_job(&row("c", "running", "2026-08-01T10:00:00Z")).await.unwrap();

        let jobs = db.list_jobs(2).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, "b");
        assert_eq!(jobs[1].id, "c");
    }
}
