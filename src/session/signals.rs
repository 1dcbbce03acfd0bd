//! Project-scoped signal store with producer privilege checks.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::models::signal::{Producer, Signal, SignalName};
use crate::persistence::db::Database;
use crate::persistence::signal_repo::SignalRepo;
use crate::{AppError, Result};

/// Durable key/value facts of one project.
///
/// Every write and clear is checked against [`Producer::may_write`] before
/// storage is touched, so a rejected call has no effect.
#[derive(Clone)]
pub struct SignalStore {
    repo: SignalRepo,
    project_id: String,
}

impl SignalStore {
    /// Open the store for `project_id`.
    #[must_use]
    pub fn new(db: Arc<Database>, project_id: impl Into<String>) -> Self {
        Self {
            repo: SignalRepo::new(db),
            project_id: project_id.into(),
        }
    }

    /// Project the store is scoped to.
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Current value of a signal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the lookup fails.
    pub async fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .repo
            .get(&self.project_id, name)
            .await?
            .map(|signal| signal.value))
    }

    /// Whether a recognized signal is raised.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the lookup fails.
    pub async fn is_set(&self, name: SignalName) -> Result<bool> {
        Ok(self
            .repo
            .get(&self.project_id, name.as_str())
            .await?
            .is_some_and(|signal| signal.is_set()))
    }

    /// Write a signal value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if `producer` may not write `name` or the
    /// name is blank, or `AppError::Db` if the write fails.
    pub async fn set(&self, name: &str, value: &str, producer: Producer) -> Result<()> {
        self.authorize(name, producer)?;
        let signal = Signal {
            project_id: self.project_id.clone(),
            name: name.trim().to_owned(),
            value: value.to_owned(),
            producer,
            updated_at: Utc::now(),
        };
        self.repo.upsert(&signal).await?;
        info!(
            project_id = %self.project_id,
            signal = name,
            producer = producer.as_str(),
            "signal written"
        );
        Ok(())
    }

    /// Raise a recognized signal.
    ///
    /// # Errors
    ///
    /// See [`SignalStore::set`].
    pub async fn raise(&self, name: SignalName, producer: Producer) -> Result<()> {
        self.set(name.as_str(), "true", producer).await
    }

    /// Remove a signal. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if `producer` may not write `name`, or
    /// `AppError::Db` if the delete fails.
    pub async fn clear(&self, name: &str, producer: Producer) -> Result<bool> {
        self.authorize(name, producer)?;
        self.repo.delete(&self.project_id, name.trim()).await
    }

    /// All signals of the project.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self) -> Result<Vec<Signal>> {
        self.repo.list(&self.project_id).await
    }

    /// Replace every signal of the project, as when restoring a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` unless `producer` is the operator, or
    /// `AppError::Db` if the replacement fails.
    pub async fn import(&self, signals: &[Signal], producer: Producer) -> Result<()> {
        if producer != Producer::Operator {
            return Err(AppError::Protocol(
                "only an operator may replace a project's signals".into(),
            ));
        }
        self.repo.replace_all(&self.project_id, signals).await
    }

    fn authorize(&self, name: &str, producer: Producer) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Protocol("signal name must not be empty".into()));
        }
        if producer.may_write(name) {
            Ok(())
        } else {
            warn!(
                project_id = %self.project_id,
                signal = name,
                producer = producer.as_str(),
                "rejected privileged signal write"
            );
            Err(AppError::Protocol(format!(
                "signal {name} cannot be written by {}",
                producer.as_str()
            )))
        }
    }
}
