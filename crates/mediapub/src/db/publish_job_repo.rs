//! Publish job repository: persistence for the `publish_jobs` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{from_millis, job_repo, to_millis, Database, DatabaseError};
use crate::model::{site_keys, Job, PublishJob};

fn publish_job_from_row(row: &Row<'_>) -> Result<Result<PublishJob, DatabaseError>, rusqlite::Error> {
    let id: String = row.get("id")?;
    let raw_keys: String = row.get("site_keys")?;
    let keys = match site_keys::deserialize(&raw_keys) {
        Ok(keys) => keys,
        Err(e) => {
            return Ok(Err(DatabaseError::Corrupt {
                id,
                column: "site_keys",
                reason: e.to_string(),
            }))
        }
    };

    Ok(Ok(PublishJob {
        id,
        project_id: row.get("project_id")?,
        site_keys: keys,
        queued_at: from_millis(row.get("queued_at")?),
        finished_at: from_millis(row.get("finished_at")?),
        aborted_at: from_millis(row.get("aborted_at")?),
    }))
}

/// Inserts or updates a publish job using an existing connection or transaction.
pub(crate) fn upsert(conn: &Connection, publish_job: &PublishJob) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO publish_jobs (id, project_id, site_keys, queued_at, finished_at, aborted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
             project_id = excluded.project_id,
             site_keys = excluded.site_keys,
             queued_at = excluded.queued_at,
             finished_at = excluded.finished_at,
             aborted_at = excluded.aborted_at",
        params![
            publish_job.id,
            publish_job.project_id,
            site_keys::serialize(&publish_job.site_keys),
            to_millis(publish_job.queued_at),
            to_millis(publish_job.finished_at),
            to_millis(publish_job.aborted_at),
        ],
    )?;
    Ok(())
}

/// Inserts or updates a publish job row.
pub fn save(db: &Database, publish_job: &PublishJob) -> Result<(), DatabaseError> {
    db.with_conn(|conn| upsert(conn, publish_job))
}

/// Writes a publish job and all of its jobs in one transaction.
pub fn save_with_jobs(
    db: &Database,
    publish_job: &PublishJob,
    jobs: &[Job],
) -> Result<(), DatabaseError> {
    db.with_transaction(|tx| {
        upsert(tx, publish_job)?;
        for job in jobs {
            job_repo::upsert(tx, job)?;
        }
        Ok(())
    })
}

/// Finds a publish job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<PublishJob>, DatabaseError> {
    db.with_conn(|conn| {
        conn.query_row(
            "SELECT * FROM publish_jobs WHERE id = ?1",
            params![id],
            publish_job_from_row,
        )
        .optional()?
        .transpose()
    })
}
