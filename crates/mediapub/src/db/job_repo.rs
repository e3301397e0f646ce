//! Job repository: persistence for the `jobs` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{from_millis, to_millis, Database, DatabaseError};
use crate::model::{Job, JobFailure, JobFilter, JobType};

/// Conditions shared by claiming and peeking: queued, not yet claimed, not
/// finished or given up on, and owned by a publish job that is still live.
const CLAIMABLE: &str = "j.type = ?1
    AND j.queued_at IS NOT NULL
    AND j.started_at IS NULL
    AND j.finished_at IS NULL
    AND j.failed_at IS NULL
    AND p.aborted_at IS NULL";

fn job_from_row(row: &Row<'_>) -> Result<Job, rusqlite::Error> {
    let id: String = row.get("id")?;
    let type_str: String = row.get("type")?;
    let job_type = type_str.parse::<JobType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })?;

    let error_code: Option<i32> = row.get("error_code")?;
    let error_message: Option<String> = row.get("error_message")?;
    let last_error = match (error_code, error_message) {
        (None, None) => None,
        (code, message) => Some(JobFailure::new(
            code.unwrap_or_default(),
            message.unwrap_or_default(),
        )),
    };

    Ok(Job {
        id,
        publish_job_id: row.get("publish_job_id")?,
        job_type,
        site: row.get("site")?,
        spec: row.get("spec")?,
        queued_at: from_millis(row.get("queued_at")?),
        started_at: from_millis(row.get("started_at")?),
        finished_at: from_millis(row.get("finished_at")?),
        failed_at: from_millis(row.get("failed_at")?),
        attempts: row.get("attempts")?,
        result: row.get("result")?,
        last_error,
    })
}

/// Inserts or updates a job using an existing connection or transaction.
pub(crate) fn upsert(conn: &Connection, job: &Job) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO jobs (id, publish_job_id, type, site, spec, queued_at, started_at,
         finished_at, failed_at, attempts, result, error_code, error_message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(id) DO UPDATE SET
             publish_job_id = excluded.publish_job_id,
             type = excluded.type,
             site = excluded.site,
             spec = excluded.spec,
             queued_at = excluded.queued_at,
             started_at = excluded.started_at,
             finished_at = excluded.finished_at,
             failed_at = excluded.failed_at,
             attempts = excluded.attempts,
             result = excluded.result,
             error_code = excluded.error_code,
             error_message = excluded.error_message",
        params![
            job.id,
            job.publish_job_id,
            job.job_type.as_str(),
            job.site,
            job.spec,
            to_millis(job.queued_at),
            to_millis(job.started_at),
            to_millis(job.finished_at),
            to_millis(job.failed_at),
            job.attempts,
            job.result,
            job.last_error.as_ref().map(|e| e.code),
            job.last_error.as_ref().map(|e| e.message.as_str()),
        ],
    )?;
    Ok(())
}

/// Inserts or updates a job row.
pub fn save(db: &Database, job: &Job) -> Result<(), DatabaseError> {
    db.with_conn(|conn| upsert(conn, job))
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], job_from_row)
            .optional()?)
    })
}

/// Jobs of one publish job in creation order, narrowed by `filter`.
pub fn find_for_publish_job(
    db: &Database,
    publish_job_id: &str,
    filter: &JobFilter,
) -> Result<Vec<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = vec!["publish_job_id = ?1".to_string()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(publish_job_id.to_string())];

        if let Some(job_type) = filter.job_type {
            conditions.push(format!("type = ?{}", param_values.len() + 1));
            param_values.push(Box::new(job_type.as_str()));
        }
        if let Some(ref site) = filter.site {
            conditions.push(format!("site = ?{}", param_values.len() + 1));
            param_values.push(Box::new(site.clone()));
        }
        if let Some(ref spec) = filter.spec {
            conditions.push(format!("spec = ?{}", param_values.len() + 1));
            param_values.push(Box::new(spec.clone()));
        }

        let sql = format!(
            "SELECT * FROM jobs WHERE {} ORDER BY rowid ASC",
            conditions.join(" AND ")
        );
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Claims the oldest due job of `job_type`: first by `queued_at`, then by
/// insertion order. The claim is written before the row is returned.
pub fn claim_next(
    db: &Database,
    job_type: JobType,
    now: DateTime<Utc>,
) -> Result<Option<Job>, DatabaseError> {
    db.with_transaction(|tx| {
        let sql = format!(
            "SELECT j.* FROM jobs j JOIN publish_jobs p ON p.id = j.publish_job_id
             WHERE {} AND j.queued_at <= ?2
             ORDER BY j.queued_at ASC, j.rowid ASC LIMIT 1",
            CLAIMABLE
        );
        let job = tx
            .query_row(
                &sql,
                params![job_type.as_str(), now.timestamp_millis()],
                job_from_row,
            )
            .optional()?;

        let Some(mut job) = job else {
            return Ok(None);
        };

        job.mark_started();
        tx.execute(
            "UPDATE jobs SET started_at = ?2, attempts = ?3 WHERE id = ?1",
            params![job.id, to_millis(job.started_at), job.attempts],
        )?;
        Ok(Some(job))
    })
}

/// Earliest `queued_at` of any claimable job of `job_type`, including jobs
/// scheduled in the future.
pub fn next_queued_at(
    db: &Database,
    job_type: JobType,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT MIN(j.queued_at) FROM jobs j JOIN publish_jobs p ON p.id = j.publish_job_id
             WHERE {}",
            CLAIMABLE
        );
        let millis: Option<i64> =
            conn.query_row(&sql, params![job_type.as_str()], |r| r.get(0))?;
        Ok(from_millis(millis))
    })
}
