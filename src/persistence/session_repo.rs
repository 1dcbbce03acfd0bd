//! Session registry repository for `SQLite` persistence.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::session::{SessionState, SessionStatus};
use crate::{AppError, Result};

use super::db::Database;

/// Repository for detached session registry rows.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    name: String,
    pid: Option<i64>,
    work_item_id: String,
    workspace: String,
    log_path: String,
    status: String,
    error: Option<String>,
    started_at: String,
    ended_at: Option<String>,
    archived: i64,
}

impl SessionRow {
    fn into_state(self) -> Result<SessionState> {
        Ok(SessionState {
            name: self.name,
            pid: self.pid.and_then(|pid| u32::try_from(pid).ok()),
            work_item_id: self.work_item_id,
            workspace: PathBuf::from(self.workspace),
            log_path: PathBuf::from(self.log_path),
            status: parse_status(&self.status)?,
            error: self.error,
            started_at: parse_time(&self.started_at)?,
            ended_at: self.ended_at.as_deref().map(parse_time).transpose()?,
            archived: self.archived != 0,
        })
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid timestamp: {e}")))
}

fn parse_status(s: &str) -> Result<SessionStatus> {
    match s {
        "running" => Ok(SessionStatus::Running),
        "completed" => Ok(SessionStatus::Completed),
        "failed" => Ok(SessionStatus::Failed),
        "stopped" => Ok(SessionStatus::Stopped),
        other => Err(AppError::Db(format!("invalid session status: {other}"))),
    }
}

fn status_str(s: SessionStatus) -> &'static str {
    match s {
        SessionStatus::Running => "running",
        SessionStatus::Completed => "completed",
        SessionStatus::Failed => "failed",
        SessionStatus::Stopped => "stopped",
    }
}

const SELECT_COLUMNS: &str = "SELECT name, pid, work_item_id, workspace, log_path, status, error,
        started_at, ended_at, archived FROM session_registry";

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a registry entry, replacing a previous one with the same name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn upsert(&self, state: &SessionState) -> Result<()> {
        sqlx::query(
            "INSERT INTO session_registry
                (name, pid, work_item_id, workspace, log_path, status, error, started_at, ended_at, archived)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(name) DO UPDATE SET
                pid = excluded.pid,
                work_item_id = excluded.work_item_id,
                workspace = excluded.workspace,
                log_path = excluded.log_path,
                status = excluded.status,
                error = excluded.error,
                started_at = excluded.started_at,
                ended_at = excluded.ended_at,
                archived = excluded.archived",
        )
        .bind(&state.name)
        .bind(state.pid.map(i64::from))
        .bind(&state.work_item_id)
        .bind(state.workspace.to_string_lossy().to_string())
        .bind(state.log_path.to_string_lossy().to_string())
        .bind(status_str(state.status))
        .bind(&state.error)
        .bind(state.started_at.to_rfc3339())
        .bind(state.ended_at.map(|t| t.to_rfc3339()))
        .bind(i64::from(state.archived))
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Fetch a registry entry by name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, name: &str) -> Result<Option<SessionState>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE name = ?1"))
            .bind(name)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(SessionRow::into_state).transpose()
    }

    /// List entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self, include_archived: bool) -> Result<Vec<SessionState>> {
        let sql = if include_archived {
            format!("{SELECT_COLUMNS} ORDER BY started_at DESC")
        } else {
            format!("{SELECT_COLUMNS} WHERE archived = 0 ORDER BY started_at DESC")
        };
        let rows: Vec<SessionRow> = sqlx::query_as(&sql).fetch_all(self.db.as_ref()).await?;
        rows.into_iter().map(SessionRow::into_state).collect()
    }

    /// List entries currently marked running.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_running(&self) -> Result<Vec<SessionState>> {
        let rows: Vec<SessionRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE status = 'running'"))
                .fetch_all(self.db.as_ref())
                .await?;
        rows.into_iter().map(SessionRow::into_state).collect()
    }

    /// Move an entry to a new phase, respecting the state machine.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown name, or `AppError::Db`
    /// if the transition is invalid or persistence fails.
    pub async fn set_status(
        &self,
        name: &str,
        status: SessionStatus,
        error: Option<String>,
    ) -> Result<SessionState> {
        let mut current = self
            .get(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {name} not found")))?;
        if !current.can_transition_to(status) {
            return Err(AppError::Db("invalid session status transition".into()));
        }
        current.status = status;
        current.error = error;
        if status.is_terminal() {
            current.ended_at = Some(Utc::now());
        }
        self.upsert(&current).await?;
        Ok(current)
    }

    /// Hide an entry from default listings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no entry has that name.
    pub async fn archive(&self, name: &str) -> Result<()> {
        let result = sqlx::query("UPDATE session_registry SET archived = 1 WHERE name = ?1")
            .bind(name)
            .execute(self.db.as_ref())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("session {name} not found")));
        }
        Ok(())
    }

    /// Count entries currently marked running.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_running(&self) -> Result<u64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM session_registry WHERE status = 'running'")
                .fetch_one(self.db.as_ref())
                .await?;
        Ok(u64::try_from(row.0).unwrap_or(0))
    }

    /// Delete archived entries that ended before `before`.
    ///
    /// Returns the number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn purge_archived(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM session_registry
             WHERE archived = 1 AND ended_at IS NOT NULL AND ended_at < ?1",
        )
        .bind(before.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(result.rows_affected())
    }
}
