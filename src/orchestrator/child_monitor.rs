//! Child process monitor: reaps detached sessions started by this process.
//!
//! Periodically polls every tracked child. An exited child is removed from
//! the registry map and, if the session did not already report its own
//! terminal phase, the exit status is recorded for it.

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session_manager::TrackedChildren;
use crate::models::session::SessionStatus;
use crate::persistence::db::Database;
use crate::persistence::session_repo::SessionRepo;

/// Interval between polls for child process exits.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Exit code a session uses when its iteration budget ran out.
pub const EXIT_MAX_ITERATIONS: i32 = 3;

/// Exit code a session uses when the circuit breaker tripped.
pub const EXIT_STALLED: i32 = 4;

/// Spawn a background task that reaps tracked children until `cancel`
/// fires.
#[must_use]
pub fn spawn_child_monitor(
    children: TrackedChildren,
    db: Arc<Database>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let repo = SessionRepo::new(db);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("child process monitor shutting down");
                    break;
                }
                () = tokio::time::sleep(POLL_INTERVAL) => {}
            }

            poll_children(&children, &repo).await;
        }
    })
}

/// Check all tracked children once and record the exits found.
pub async fn poll_children(children: &TrackedChildren, repo: &SessionRepo) {
    let mut guard = children.lock().await;
    let mut exited: Vec<(String, Option<ExitStatus>)> = Vec::new();

    for (name, child) in guard.iter_mut() {
        match child.try_wait() {
            Ok(Some(status)) => exited.push((name.clone(), Some(status))),
            Ok(None) => {}
            Err(err) => {
                warn!(name, %err, "failed to poll child process status");
                exited.push((name.clone(), None));
            }
        }
    }
    for (name, _) in &exited {
        guard.remove(name);
    }
    drop(guard);

    for (name, exit) in exited {
        let (status, error) = exit_outcome(exit);
        info!(name, ?status, "detached session process exited");
        record_exit(repo, &name, status, error).await;
    }
}

/// Registry phase for a process exit status.
#[must_use]
pub fn exit_outcome(exit: Option<ExitStatus>) -> (SessionStatus, Option<String>) {
    let Some(exit) = exit else {
        return (
            SessionStatus::Failed,
            Some("process exited without reporting".into()),
        );
    };
    match exit.code() {
        Some(0) => (SessionStatus::Completed, None),
        Some(EXIT_MAX_ITERATIONS) => (
            SessionStatus::Failed,
            Some("maximum iterations reached".into()),
        ),
        Some(EXIT_STALLED) => (
            SessionStatus::Failed,
            Some("circuit breaker tripped".into()),
        ),
        Some(code) => (SessionStatus::Failed, Some(format!("exited with code {code}"))),
        None => (SessionStatus::Failed, Some("terminated by signal".into())),
    }
}

/// Record a terminal phase unless the session already reported one.
pub async fn record_exit(
    repo: &SessionRepo,
    name: &str,
    status: SessionStatus,
    error: Option<String>,
) {
    match repo.get(name).await {
        Ok(Some(state)) if state.status == SessionStatus::Running => {
            if let Err(err) = repo.set_status(name, status, error).await {
                warn!(%err, name, "failed to record session exit");
            }
        }
        Ok(_) => debug!(name, "session already reported its outcome"),
        Err(err) => warn!(%err, name, "failed to read session before recording exit"),
    }
}
