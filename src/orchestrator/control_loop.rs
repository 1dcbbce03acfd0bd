//! The orchestrator's poll-dedupe-dispatch loop.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::spawner::Spawner;
use crate::source::WorkSource;
use crate::{AppError, Result};

/// Counters for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Items the source returned.
    pub polled: usize,
    /// Items handed to the spawner successfully.
    pub dispatched: usize,
    /// Items skipped as in flight, abandoned, or deferred for capacity.
    pub skipped: usize,
    /// Spawn attempts that failed.
    pub failed: usize,
}

/// Polls a [`WorkSource`] and dispatches new items to a [`Spawner`].
///
/// An item id is dispatched at most once per orchestrator lifetime. A
/// failed spawn is retried on later ticks until `max_spawn_attempts`
/// failures, after which the item is abandoned.
pub struct Orchestrator {
    source: Arc<dyn WorkSource>,
    spawner: Arc<dyn Spawner>,
    interval: Duration,
    max_spawn_attempts: u32,
    in_flight: HashSet<String>,
    attempts: HashMap<String, u32>,
    abandoned: HashSet<String>,
}

impl Orchestrator {
    /// Create an orchestrator polling every `interval`.
    #[must_use]
    pub fn new(
        source: Arc<dyn WorkSource>,
        spawner: Arc<dyn Spawner>,
        interval: Duration,
        max_spawn_attempts: u32,
    ) -> Self {
        Self {
            source,
            spawner,
            interval,
            max_spawn_attempts: max_spawn_attempts.max(1),
            in_flight: HashSet::new(),
            attempts: HashMap::new(),
            abandoned: HashSet::new(),
        }
    }

    /// Whether `id` has been dispatched.
    #[must_use]
    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.contains(id)
    }

    /// Whether `id` was given up on after repeated spawn failures.
    #[must_use]
    pub fn is_abandoned(&self, id: &str) -> bool {
        self.abandoned.contains(id)
    }

    /// Poll on every interval until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Currently infallible once started; poll and spawn failures are
    /// logged and retried.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        info!(
            source = self.source.name(),
            spawner = self.spawner.name(),
            interval_secs = self.interval.as_secs(),
            "orchestrator started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.tick(&cancel).await {
                Ok(report) if report.polled > 0 => info!(
                    polled = report.polled,
                    dispatched = report.dispatched,
                    skipped = report.skipped,
                    failed = report.failed,
                    "tick finished"
                ),
                Ok(_) => debug!("no work items"),
                Err(AppError::Cancelled) => break,
                Err(err) => warn!(%err, "poll failed, retrying next tick"),
            }
        }

        info!("orchestrator stopped");
        Ok(())
    }

    /// One poll and dispatch pass.
    ///
    /// # Errors
    ///
    /// Returns the source's error if the poll fails, or
    /// `AppError::Cancelled` if `cancel` fires during the poll or a spawn.
    /// An item whose spawn was interrupted is not recorded as in flight.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> Result<TickReport> {
        let span = info_span!("tick", source = self.source.name());
        let items = async {
            tokio::select! {
                () = cancel.cancelled() => Err(AppError::Cancelled),
                result = self.source.poll() => result,
            }
        }
        .instrument(span.clone())
        .await?;

        let mut report = TickReport {
            polled: items.len(),
            ..TickReport::default()
        };
        let mut at_capacity = false;

        for item in &items {
            if at_capacity || self.in_flight.contains(&item.id) || self.abandoned.contains(&item.id) {
                report.skipped += 1;
                continue;
            }

            self.in_flight.insert(item.id.clone());
            let result = tokio::select! {
                () = cancel.cancelled() => {
                    self.in_flight.remove(&item.id);
                    info!(work_item_id = %item.id, "cancelled while spawning");
                    return Err(AppError::Cancelled);
                }
                result = self.spawner.spawn(item).instrument(span.clone()) => result,
            };
            match result {
                Ok(()) => {
                    self.attempts.remove(&item.id);
                    report.dispatched += 1;
                    info!(work_item_id = %item.id, summary = %item.summary, "work item dispatched");
                }
                Err(AppError::Capacity(reason)) => {
                    self.in_flight.remove(&item.id);
                    report.skipped += 1;
                    at_capacity = true;
                    info!(work_item_id = %item.id, %reason, "at capacity, deferring remaining items");
                }
                Err(err) => {
                    self.in_flight.remove(&item.id);
                    report.failed += 1;
                    warn!(work_item_id = %item.id, %err, "spawn failed");
                    let cleanup = tokio::select! {
                        () = cancel.cancelled() => return Err(AppError::Cancelled),
                        result = self.spawner.cleanup(item) => result,
                    };
                    if let Err(cleanup_err) = cleanup {
                        warn!(work_item_id = %item.id, %cleanup_err, "cleanup after failed spawn failed");
                    }

                    let attempts = self.attempts.entry(item.id.clone()).or_insert(0);
                    *attempts += 1;
                    if *attempts >= self.max_spawn_attempts {
                        error!(
                            work_item_id = %item.id,
                            attempts = *attempts,
                            "abandoning work item after repeated spawn failures"
                        );
                        self.abandoned.insert(item.id.clone());
                    }
                }
            }
        }

        Ok(report)
    }
}
