// crates/db/src/lib.rs
//! SQLite storage for tracedeck: the record repository backend and the
//! best-effort durable job mirror.
//!
//! The in-memory side of the job store is always authoritative — callers
//! treat everything in [`jobs`] as advisory and log-and-continue on
//! failure. Records, in contrast, live here for real.

pub mod jobs;
pub mod records;

pub use jobs::JobRow;
pub use records::SqliteRecordStore;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Failed to determine data directory")]
    NoDataDir,

    #[error("Failed to create database directory: {0}")]
    CreateDir(#[from] std::io::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Ordered schema migrations. Each entry runs once inside the version
/// bookkeeping below; entries may contain multiple statements.
const MIGRATIONS: &[&str] = &[
    // v1 — sessions, records, jobs
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
    );

    CREATE TABLE IF NOT EXISTS records (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        score INTEGER,
        query TEXT,
        reasoning TEXT,
        answer TEXT,
        messages TEXT,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
        updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
    );

    CREATE INDEX IF NOT EXISTS idx_records_session ON records(session_id);
    CREATE INDEX IF NOT EXISTS idx_records_score ON records(score);

    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        job_type TEXT NOT NULL,
        status TEXT NOT NULL,
        payload TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
    "#,
];

/// Main database handle wrapping a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl Database {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn new(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let db = Self { pool, db_path: path.to_owned() };
        db.run_migrations().await?;

        info!("database opened at {}", path.display());
        Ok(db)
    }

    /// Resolve the default path: `TRACEDECK_DB` env override, else the
    /// platform data dir.
    pub async fn open_default() -> DbResult<Self> {
        let path = match std::env::var("TRACEDECK_DB") {
            Ok(p) => PathBuf::from(p),
            Err(_) => dirs::data_local_dir()
                .ok_or(DbError::NoDataDir)?
                .join("tracedeck")
                .join("tracedeck.db"),
        };
        Self::new(&path).await
    }

    /// Create an in-memory database (for testing).
    ///
    /// `shared_cache(true)` makes all pool connections see the same
    /// in-memory database; without it each connection gets its own.
    pub async fn new_in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .shared_cache(true)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let db = Self { pool, db_path: PathBuf::new() };
        db.run_migrations().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    async fn run_migrations(&self) -> DbResult<()> {
        sqlx::query("CREATE TABLE IF NOT EXISTS _migrations (version INTEGER PRIMARY KEY)")
            .execute(&self.pool)
            .await?;

        let row: (i64,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM _migrations")
            .fetch_one(&self.pool)
            .await?;
        let applied = row.0 as usize;

        for (idx, migration) in MIGRATIONS.iter().enumerate().skip(applied) {
            let version = idx + 1;
            sqlx::raw_sql(migration).execute(&self.pool).await?;
            sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
                .bind(version as i64)
                .execute(&self.pool)
                .await?;
            info!(version, "applied migration");
        }
        Ok(())
    }
}
