//! Database module for persistent storage.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Database` handle.
//! All access is serialized through a `Mutex<Connection>`.
//! The orchestration layer only sees the [`DataStore`] trait.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};

use crate::model::{Job, JobFilter, JobType, PublishJob};

pub mod error;
pub mod job_repo;
pub mod migrations;
pub mod publish_job_repo;

pub use error::DatabaseError;

/// Transactional storage for publish jobs and their jobs.
pub trait DataStore: Send + Sync {
    fn save_publish_job(&self, publish_job: &PublishJob) -> Result<(), DatabaseError>;

    fn find_publish_job(&self, id: &str) -> Result<Option<PublishJob>, DatabaseError>;

    /// Writes the publish job and every job in one transaction. Either all
    /// records are stored or none are.
    fn queue_publish_job(
        &self,
        publish_job: &PublishJob,
        jobs: &[Job],
    ) -> Result<(), DatabaseError>;

    fn save_job(&self, job: &Job) -> Result<(), DatabaseError>;

    fn find_job(&self, id: &str) -> Result<Option<Job>, DatabaseError>;

    fn find_jobs(
        &self,
        publish_job_id: &str,
        filter: &JobFilter,
    ) -> Result<Vec<Job>, DatabaseError>;

    /// Atomically picks the oldest job of `job_type` that is due at `now` and
    /// marks it started. Jobs of aborted publish jobs are skipped.
    fn claim_next_job(
        &self,
        job_type: JobType,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, DatabaseError>;

    /// Earliest `queued_at` among claimable jobs of `job_type`, due or not.
    fn next_queued_at(&self, job_type: JobType) -> Result<Option<DateTime<Utc>>, DatabaseError>;
}

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). All access is serialized through
/// a `Mutex`, which is fine for SQLite (which serializes writes anyway).
/// WAL mode is enabled for concurrent read performance.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside a transaction. The transaction is committed when `f`
    /// returns `Ok` and rolled back otherwise.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

impl DataStore for Database {
    fn save_publish_job(&self, publish_job: &PublishJob) -> Result<(), DatabaseError> {
        publish_job_repo::save(self, publish_job)
    }

    fn find_publish_job(&self, id: &str) -> Result<Option<PublishJob>, DatabaseError> {
        publish_job_repo::find_by_id(self, id)
    }

    fn queue_publish_job(
        &self,
        publish_job: &PublishJob,
        jobs: &[Job],
    ) -> Result<(), DatabaseError> {
        publish_job_repo::save_with_jobs(self, publish_job, jobs)
    }

    fn save_job(&self, job: &Job) -> Result<(), DatabaseError> {
        job_repo::save(self, job)
    }

    fn find_job(&self, id: &str) -> Result<Option<Job>, DatabaseError> {
        job_repo::find_by_id(self, id)
    }

    fn find_jobs(
        &self,
        publish_job_id: &str,
        filter: &JobFilter,
    ) -> Result<Vec<Job>, DatabaseError> {
        job_repo::find_for_publish_job(self, publish_job_id, filter)
    }

    fn claim_next_job(
        &self,
        job_type: JobType,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, DatabaseError> {
        job_repo::claim_next(self, job_type, now)
    }

    fn next_queued_at(&self, job_type: JobType) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        job_repo::next_queued_at(self, job_type)
    }
}

/// Returns the canonical database path: `~/.mediapub/data/mediapub.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".mediapub").join("data").join("mediapub.db"))
}

/// Timestamps are stored as epoch milliseconds.
pub(crate) fn to_millis(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| t.timestamp_millis())
}

pub(crate) fn from_millis(millis: Option<i64>) -> Option<DateTime<Utc>> {
    millis.and_then(DateTime::from_timestamp_millis)
}
