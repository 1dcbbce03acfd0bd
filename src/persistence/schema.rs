//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS`, so bootstrap is
//! safe to re-run on every start.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS signal (
    project_id      TEXT NOT NULL,
    name            TEXT NOT NULL,
    value           TEXT NOT NULL,
    producer        TEXT NOT NULL CHECK(producer IN ('worker','qa','manager','operator','external')),
    updated_at      TEXT NOT NULL,
    PRIMARY KEY (project_id, name)
);

CREATE TABLE IF NOT EXISTS session_registry (
    name            TEXT PRIMARY KEY NOT NULL,
    pid             INTEGER,
    work_item_id    TEXT NOT NULL,
    workspace       TEXT NOT NULL,
    log_path        TEXT NOT NULL,
    status          TEXT NOT NULL CHECK(status IN ('running','completed','failed','stopped')),
    error           TEXT,
    started_at      TEXT NOT NULL,
    ended_at        TEXT,
    archived        INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_session_status ON session_registry(status);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
