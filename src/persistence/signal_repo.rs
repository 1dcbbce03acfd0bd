//! Signal repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::signal::{Producer, Signal};
use crate::{AppError, Result};

use super::db::Database;

/// Repository for per-project signal rows.
#[derive(Clone)]
pub struct SignalRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SignalRow {
    project_id: String,
    name: String,
    value: String,
    producer: String,
    updated_at: String,
}

impl SignalRow {
    fn into_signal(self) -> Result<Signal> {
        let producer = self.producer.parse::<Producer>()?;
        let updated_at = chrono::DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|e| AppError::Db(format!("invalid updated_at: {e}")))?
            .with_timezone(&Utc);

        Ok(Signal {
            project_id: self.project_id,
            name: self.name,
            value: self.value,
            producer,
            updated_at,
        })
    }
}

impl SignalRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or overwrite a signal; last write wins.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn upsert(&self, signal: &Signal) -> Result<()> {
        sqlx::query(
            "INSERT INTO signal (project_id, name, value, producer, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(project_id, name) DO UPDATE SET
                value = excluded.value,
                producer = excluded.producer,
                updated_at = excluded.updated_at",
        )
        .bind(&signal.project_id)
        .bind(&signal.name)
        .bind(&signal.value)
        .bind(signal.producer.as_str())
        .bind(signal.updated_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Fetch one signal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, project_id: &str, name: &str) -> Result<Option<Signal>> {
        let row: Option<SignalRow> = sqlx::query_as(
            "SELECT project_id, name, value, producer, updated_at
             FROM signal WHERE project_id = ?1 AND name = ?2",
        )
        .bind(project_id)
        .bind(name)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(SignalRow::into_signal).transpose()
    }

    /// Delete one signal. Returns whether a row existed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, project_id: &str, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM signal WHERE project_id = ?1 AND name = ?2")
            .bind(project_id)
            .bind(name)
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List a project's signals ordered by name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self, project_id: &str) -> Result<Vec<Signal>> {
        let rows: Vec<SignalRow> = sqlx::query_as(
            "SELECT project_id, name, value, producer, updated_at
             FROM signal WHERE project_id = ?1 ORDER BY name ASC",
        )
        .bind(project_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(SignalRow::into_signal).collect()
    }

    /// Replace every signal of a project in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if any statement fails; nothing is changed then.
    pub async fn replace_all(&self, project_id: &str, signals: &[Signal]) -> Result<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM signal WHERE project_id = ?1")
            .bind(project_id)
            .execute(&mut *tx)
            .await?;
        for signal in signals {
            sqlx::query(
                "INSERT INTO signal (project_id, name, value, producer, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(project_id)
            .bind(&signal.name)
            .bind(&signal.value)
            .bind(signal.producer.as_str())
            .bind(signal.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
