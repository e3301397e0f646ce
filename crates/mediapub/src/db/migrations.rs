//! Versioned schema migrations.
//!
//! Applied versions are recorded in `_migrations`. Each pending migration
//! runs in its own transaction together with its bookkeeping row.

use rusqlite::Connection;

use super::error::DatabaseError;

/// Ordered by version. Append only.
const MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "create_publish_jobs_table",
        include_str!("sql/001_create_publish_jobs.sql"),
    ),
    (
        2,
        "create_jobs_table",
        include_str!("sql/002_create_jobs.sql"),
    ),
];

/// Brings the schema up to the latest version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for &(version, description, sql) in MIGRATIONS.iter().filter(|m| m.0 > applied) {
        log::info!("Applying migration v{}: {}", version, description);

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)
            .map_err(|e| DatabaseError::Migration {
                version,
                reason: e.to_string(),
            })?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![version, description],
        )?;
        tx.commit()?;
    }

    Ok(())
}
