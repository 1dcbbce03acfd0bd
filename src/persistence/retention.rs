//! Background purge of archived session registry entries.
//!
//! Live and unarchived sessions are never touched; an operator has to
//! archive (or stop) a session before it becomes eligible.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::db::Database;
use super::session_repo::SessionRepo;
use crate::Result;

const SWEEP_EVERY: Duration = Duration::from_secs(3600);

/// Start the hourly sweep. `retention_days == 0` keeps entries forever and
/// the task only waits for cancellation.
#[must_use]
pub fn spawn_retention_task(
    db: Arc<Database>,
    retention_days: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if retention_days == 0 {
            debug!("retention disabled");
            cancel.cancelled().await;
            return;
        }

        let repo = SessionRepo::new(db);
        let mut sweep = tokio::time::interval(SWEEP_EVERY);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while cancel
            .run_until_cancelled(sweep.tick())
            .await
            .is_some()
        {
            if let Err(err) = sweep_once(&repo, cutoff(retention_days)).await {
                warn!(%err, "retention sweep failed, retrying next hour");
            }
        }
        debug!("retention task stopped");
    })
}

/// Delete archived entries that ended more than `retention_days` ago and
/// return how many rows went away.
///
/// # Errors
///
/// Returns `AppError::Db` if the delete fails.
pub async fn purge(db: &Arc<Database>, retention_days: u32) -> Result<u64> {
    let repo = SessionRepo::new(Arc::clone(db));
    sweep_once(&repo, cutoff(retention_days)).await
}

fn cutoff(retention_days: u32) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::days(i64::from(retention_days))
}

async fn sweep_once(repo: &SessionRepo, cutoff: DateTime<Utc>) -> Result<u64> {
    let purged = repo.purge_archived(cutoff).await?;
    if purged > 0 {
        info!(purged, %cutoff, "purged archived sessions");
    }
    Ok(purged)
}
