//! The Worker/QA/Manager session loop.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::circuit_breaker::CircuitBreaker;
use super::executor::{describe, ActionExecutor};
use super::progress::{exclude_from_git, AgentProgress};
use super::signals::SignalStore;
use super::state::Phase;
use crate::config::NotifyEvent;
use crate::models::action::{Action, Claim, Proposal, Role, Turn, TurnKind};
use crate::models::job::JobConfig;
use crate::models::signal::{value_is_set, Producer, SignalName};
use crate::notifications::Notifier;
use crate::proposer::{ActionProposer, ProposalContext};
use crate::source::{ItemStatus, WorkSource};
use crate::vcs::branch::{BranchLifecycle, BranchRequest, GitIdentity, WorkspaceBranches};
use crate::vcs::{recovery, VersionControl};
use crate::{AppError, Result};

/// Summary of a delivered session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Worker iterations used.
    pub iterations: u32,
    /// Feature branch the work was done on, if any.
    pub feature_branch: Option<String>,
    /// Branch the feature was merged into, if a merge happened.
    pub merged_into: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Approved,
    Rejected(String),
}

enum Finalized {
    Delivered(Option<String>),
    Revoked,
}

/// One work item driven from an empty workspace to a merged branch.
pub struct Session {
    job: JobConfig,
    proposer: Arc<dyn ActionProposer>,
    vcs: Arc<dyn VersionControl>,
    signals: SignalStore,
    lifecycle: BranchLifecycle,
    executor: ActionExecutor,
    breaker: CircuitBreaker,
    progress: AgentProgress,
    branches: Option<WorkspaceBranches>,
    last_manager_review: Option<u32>,
    reporter: Option<Arc<dyn WorkSource>>,
    notifier: Option<Notifier>,
}

impl Session {
    /// Assemble a session from its job and capabilities.
    #[must_use]
    pub fn new(
        job: JobConfig,
        proposer: Arc<dyn ActionProposer>,
        vcs: Arc<dyn VersionControl>,
        signals: SignalStore,
        identity: GitIdentity,
    ) -> Self {
        let executor = ActionExecutor::new(
            job.workspace.clone(),
            Duration::from_secs(job.settings.command_timeout_seconds),
        );
        let breaker = CircuitBreaker::new(job.settings.stall_threshold);
        let progress = AgentProgress::new(job.work_item.id.clone());
        Self {
            lifecycle: BranchLifecycle::new(Arc::clone(&vcs), identity),
            job,
            proposer,
            vcs,
            signals,
            executor,
            breaker,
            progress,
            branches: None,
            last_manager_review: None,
            reporter: None,
            notifier: None,
        }
    }

    /// Report the final result to the work item's source.
    #[must_use]
    pub fn with_status_reporter(mut self, reporter: Arc<dyn WorkSource>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Post lifecycle events to chat webhooks.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.progress.phase
    }

    /// Worker iterations used so far.
    #[must_use]
    pub fn iteration(&self) -> u32 {
        self.progress.iteration
    }

    /// Drive the session until it is delivered or fails.
    ///
    /// # Errors
    ///
    /// Returns `AppError::MaxIterations` or `AppError::Stalled` when a budget
    /// runs out, `AppError::Cancelled` on shutdown, `AppError::Git` when the
    /// workspace is on the wrong branch or finalization keeps failing, and
    /// storage errors from the signal store or progress file.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<SessionOutcome> {
        let span = info_span!(
            "session",
            work_item_id = %self.job.work_item.id,
            project_id = %self.job.project_id
        );
        async {
            let id = self.job.work_item.id.clone();
            self.notify(
                NotifyEvent::Start,
                &format!("Session started for {id}: {}", self.job.work_item.summary),
            )
            .await;
            let result = self.run_inner(cancel).await;
            match &result {
                Ok(outcome) => info!(
                    iterations = outcome.iterations,
                    merged_into = ?outcome.merged_into,
                    "session delivered"
                ),
                Err(err) if err.is_cancelled() => info!("session interrupted"),
                Err(err) => warn!(%err, phase = ?self.progress.phase, "session ended"),
            }
            self.report(&result).await;
            match &result {
                Ok(outcome) => {
                    self.notify(NotifyEvent::Complete, &delivery_note(&id, outcome))
                        .await;
                }
                Err(err) if err.is_cancelled() => {}
                Err(err) => {
                    self.notify(NotifyEvent::Failure, &format!("{id} failed: {err}"))
                        .await;
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_inner(&mut self, cancel: &CancellationToken) -> Result<SessionOutcome> {
        self.initialize().await?;

        loop {
            if cancel.is_cancelled() {
                self.save()?;
                return Err(AppError::Cancelled);
            }

            if self.signals.is_set(SignalName::ProjectSignedOff).await? {
                match self.finalize().await? {
                    Finalized::Delivered(merged_into) => {
                        self.transition(Phase::Completed)?;
                        self.save()?;
                        return Ok(SessionOutcome {
                            iterations: self.progress.iteration,
                            feature_branch: self.branches.as_ref().map(|b| b.feature.clone()),
                            merged_into,
                        });
                    }
                    Finalized::Revoked => {
                        self.save()?;
                        continue;
                    }
                }
            }

            if self.signals.is_set(SignalName::QaPassed).await? {
                self.final_review(cancel).await?;
                continue;
            }

            let completed = self.signals.is_set(SignalName::Completed).await?;
            if completed || self.signals.is_set(SignalName::TriggerQa).await? {
                self.qa_review(cancel).await?;
                continue;
            }

            self.advisory_review(cancel).await?;

            let max = self.job.settings.max_iterations;
            if self.progress.iteration >= max {
                self.transition(Phase::MaxIterationsReached)?;
                self.save()?;
                return Err(AppError::MaxIterations(max));
            }

            self.progress.iteration += 1;
            let turn = self.worker_turn(cancel).await;
            self.save()?;
            turn?;
            self.push_progress().await;
        }
    }

    async fn initialize(&mut self) -> Result<()> {
        let ws = self.job.workspace.clone();
        std::fs::create_dir_all(&ws)?;

        let saved = AgentProgress::load(&ws)?
            .filter(|saved| saved.work_item_id == self.job.work_item.id);
        let request = BranchRequest {
            repo_url: self.job.work_item.repo().unwrap_or_default().to_owned(),
            workspace: ws.clone(),
            work_item_id: self.job.work_item.id.clone(),
            epic_id: self.job.work_item.epic_id.clone(),
            feature_branch: saved.as_ref().and_then(|s| s.feature_branch.clone()),
            unique_names: self.job.settings.unique_branch_names,
        };

        self.branches = self.lifecycle.setup(&request).await;
        if let Some(branches) = &self.branches {
            if let Err(err) = self.lifecycle.verify(&ws, branches).await {
                self.transition(Phase::Failed)?;
                return Err(err);
            }
            exclude_from_git(&ws);
        }

        if let Some(saved) = saved {
            info!(iteration = saved.iteration, "resuming from progress file");
            self.breaker =
                CircuitBreaker::resume(self.job.settings.stall_threshold, saved.no_progress_streak);
            self.progress = saved;
        }
        self.progress.phase = Phase::Initializing;
        self.progress.feature_branch = self.branches.as_ref().map(|b| b.feature.clone());
        self.transition(Phase::Iterating)?;
        self.save()
    }

    async fn worker_turn(&mut self, cancel: &CancellationToken) -> Result<()> {
        let iteration = self.progress.iteration;
        debug!(iteration, "worker turn");

        let proposal = match self.propose(Role::Worker, cancel).await {
            Ok(proposal) => proposal,
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                warn!(iteration, %err, "worker proposal failed");
                let backoff = Duration::from_millis(self.job.settings.iteration_backoff_ms);
                tokio::select! {
                    () = cancel.cancelled() => return Err(AppError::Cancelled),
                    () = tokio::time::sleep(backoff) => {}
                }
                return Ok(());
            }
        };

        let action = match proposal {
            Proposal::Claim(Claim::Completed) => {
                info!(iteration, "worker claims completion");
                self.record(Role::Worker, TurnKind::Proposal, "STATUS: COMPLETED");
                self.signals
                    .raise(SignalName::Completed, Producer::Worker)
                    .await?;
                self.transition(Phase::AwaitingReview)?;
                self.breaker.reset();
                return Ok(());
            }
            Proposal::Claim(Claim::Blocked { reason }) => {
                info!(iteration, %reason, "worker is blocked");
                self.record(
                    Role::Worker,
                    TurnKind::Proposal,
                    format!("STATUS: BLOCKED {reason}"),
                );
                self.signals
                    .set(SignalName::Blocker.as_str(), &reason, Producer::Worker)
                    .await?;
                return Ok(());
            }
            Proposal::Claim(_) => Action::NoOp,
            Proposal::Action(action) => action,
        };

        self.record(Role::Worker, TurnKind::Proposal, describe(&action));
        let outcome = self.executor.apply(Role::Worker, &action, cancel).await?;
        self.record(Role::Worker, TurnKind::Observation, outcome.observation.clone());
        info!(
            iteration,
            action = action.kind(),
            effective = outcome.effective,
            "worker action applied"
        );

        if let Err(err) = self.breaker.record(&outcome.fingerprint, outcome.effective) {
            self.transition(Phase::Failed)?;
            return Err(err);
        }
        Ok(())
    }

    async fn qa_review(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.transition(Phase::AwaitingReview)?;
        self.signals
            .clear(SignalName::TriggerQa.as_str(), Producer::Qa)
            .await?;

        match self.review(Role::Qa, cancel).await? {
            Verdict::Approved => {
                info!("qa approved");
                self.signals.raise(SignalName::QaPassed, Producer::Qa).await?;
            }
            Verdict::Rejected(reason) => {
                info!(%reason, "qa rejected");
                self.signals
                    .clear(SignalName::Completed.as_str(), Producer::Qa)
                    .await?;
                self.record(Role::Qa, TurnKind::Feedback, format!("QA rejected: {reason}"));
                self.transition(Phase::Iterating)?;
            }
        }
        self.save()
    }

    async fn final_review(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.transition(Phase::AwaitingReview)?;

        match self.review(Role::Manager, cancel).await? {
            Verdict::Approved => {
                info!("manager signed off");
                self.signals
                    .raise(SignalName::ProjectSignedOff, Producer::Manager)
                    .await?;
                let message = format!("{} signed off by the Manager", self.job.work_item.id);
                self.notify(NotifyEvent::SignedOff, &message).await;
            }
            Verdict::Rejected(reason) => {
                info!(%reason, "manager withheld sign-off");
                for name in [SignalName::QaPassed, SignalName::Completed] {
                    self.signals.clear(name.as_str(), Producer::Manager).await?;
                }
                self.record(
                    Role::Manager,
                    TurnKind::Feedback,
                    format!("Manager withheld sign-off: {reason}"),
                );
                self.transition(Phase::Iterating)?;
            }
        }
        self.save()
    }

    async fn advisory_review(&mut self, cancel: &CancellationToken) -> Result<()> {
        let iteration = self.progress.iteration;
        let frequency = self.job.settings.manager_frequency;
        let due = frequency > 0
            && iteration > 0
            && iteration % frequency == 0
            && self.last_manager_review != Some(iteration);
        let triggered = self.signals.is_set(SignalName::TriggerManager).await?;
        let blocker = self
            .signals
            .get(SignalName::Blocker.as_str())
            .await?
            .filter(|value| value_is_set(value));
        if !due && !triggered && blocker.is_none() {
            return Ok(());
        }

        if let Some(blocker) = blocker {
            warn!(iteration, %blocker, "blocker raised, escalating to manager");
            let message = format!("{} is blocked: {}", self.job.work_item.id, blocker.trim());
            self.notify(NotifyEvent::Blocked, &message).await;
            self.record(
                Role::Worker,
                TurnKind::Feedback,
                format!("Blocker reported: {}", blocker.trim()),
            );
            self.signals
                .clear(SignalName::Blocker.as_str(), Producer::Manager)
                .await?;
        }

        if triggered {
            self.signals
                .clear(SignalName::TriggerManager.as_str(), Producer::Manager)
                .await?;
        }
        self.last_manager_review = Some(iteration);

        let directive = match self.review(Role::Manager, cancel).await? {
            Verdict::Approved => "Manager review: on track, continue.".to_owned(),
            Verdict::Rejected(remarks) => format!("Manager directive: {remarks}"),
        };
        info!(iteration, %directive, "manager review");
        self.record(Role::Manager, TurnKind::Feedback, directive);
        Ok(())
    }

    async fn review(&mut self, role: Role, cancel: &CancellationToken) -> Result<Verdict> {
        let turns = self.job.settings.review_max_turns.max(1);
        for _ in 0..turns {
            let proposal = match self.propose(role, cancel).await {
                Ok(proposal) => proposal,
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    warn!(role = role.as_str(), %err, "review proposal failed");
                    return Ok(Verdict::Rejected(format!("review could not complete: {err}")));
                }
            };

            match proposal {
                Proposal::Claim(Claim::Approved) => return Ok(Verdict::Approved),
                Proposal::Claim(Claim::Rejected { reason }) => {
                    return Ok(Verdict::Rejected(reason));
                }
                Proposal::Claim(Claim::Completed | Claim::Blocked { .. }) => {
                    self.record(
                        role,
                        TurnKind::Observation,
                        "Reviewers answer with VERDICT: APPROVED or VERDICT: REJECTED <reason>.",
                    );
                }
                Proposal::Action(action) => {
                    self.record(role, TurnKind::Proposal, describe(&action));
                    let outcome = self.executor.apply(role, &action, cancel).await?;
                    self.record(role, TurnKind::Observation, outcome.observation);
                }
            }
        }
        Ok(Verdict::Rejected(format!(
            "{} review ended without a verdict",
            role.as_str()
        )))
    }

    async fn propose(&self, role: Role, cancel: &CancellationToken) -> Result<Proposal> {
        let ctx = ProposalContext {
            role,
            work_item: &self.job.work_item,
            iteration: self.progress.iteration,
            history: &self.progress.history,
        };
        let limit = Duration::from_secs(self.job.settings.proposer_timeout_seconds);
        tokio::select! {
            () = cancel.cancelled() => Err(AppError::Cancelled),
            result = tokio::time::timeout(limit, self.proposer.propose(ctx)) => match result {
                Ok(proposal) => proposal,
                Err(_) => Err(AppError::Proposer(format!(
                    "no proposal within {}s",
                    limit.as_secs()
                ))),
            },
        }
    }

    /// Merge the feature branch after sign-off. The only path that writes
    /// to the shared base branch.
    async fn finalize(&mut self) -> Result<Finalized> {
        self.transition(Phase::Finalizing)?;
        let ws = self.job.workspace.clone();

        let Some(branches) = self.branches.clone() else {
            if self.vcs.is_repository(&ws).await {
                if let Err(err) = self.vcs.commit_all(&ws, &self.delivery_message()).await {
                    warn!(%err, "local commit failed");
                }
            }
            info!("signed off without a repository, nothing to merge");
            return Ok(Finalized::Delivered(None));
        };

        match self.deliver(&branches).await {
            Ok(merged_into) => Ok(Finalized::Delivered(merged_into)),
            Err(err) => self.revoke(&branches, &err).await,
        }
    }

    async fn deliver(&self, branches: &WorkspaceBranches) -> Result<Option<String>> {
        let ws = self.job.workspace.as_path();
        let feature = branches.feature.as_str();
        let base = branches.base.as_str();

        self.vcs.commit_all(ws, &self.delivery_message()).await?;
        self.vcs.push(ws, feature).await?;
        if !self.job.settings.auto_merge {
            info!(feature, "auto merge disabled, feature branch pushed");
            return Ok(None);
        }

        self.vcs.fetch(ws, base).await?;
        self.vcs.checkout(ws, base).await?;
        self.vcs.pull(ws, base).await?;
        self.vcs.merge(ws, feature).await?;
        self.vcs.push(ws, base).await?;
        info!(feature, base, "feature merged");

        if let Err(err) = self.vcs.delete_remote_branch(ws, feature).await {
            warn!(feature, %err, "failed to delete merged feature branch");
        }
        Ok(Some(base.to_owned()))
    }

    async fn revoke(&mut self, branches: &WorkspaceBranches, err: &AppError) -> Result<Finalized> {
        let ws = self.job.workspace.clone();
        warn!(%err, base = %branches.base, "finalization failed, revoking sign-off");

        if let Err(abort_err) = recovery::abort_merge(self.vcs.as_ref(), &ws).await {
            warn!(%abort_err, "failed to abort merge");
        }
        if let Err(checkout_err) = self.vcs.checkout(&ws, &branches.feature).await {
            warn!(%checkout_err, "failed to return to feature branch");
        }
        for name in [
            SignalName::ProjectSignedOff,
            SignalName::QaPassed,
            SignalName::Completed,
        ] {
            self.signals.clear(name.as_str(), Producer::Manager).await?;
        }

        self.progress.finalize_attempts += 1;
        let attempts = self.progress.finalize_attempts;
        if attempts >= self.job.settings.max_finalize_attempts {
            self.transition(Phase::Failed)?;
            self.save()?;
            return Err(AppError::Git(format!(
                "finalization failed after {attempts} attempts: {err}"
            )));
        }

        self.record(
            Role::Manager,
            TurnKind::Feedback,
            format!(
                "Merging into {} failed ({err}). Bring the feature branch up to date with {} and resolve any conflicts.",
                branches.base, branches.base
            ),
        );
        self.transition(Phase::Iterating)?;
        Ok(Finalized::Revoked)
    }

    async fn notify(&self, event: NotifyEvent, message: &str) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(event, message).await;
        }
    }

    /// Tell the source how the item ended. Cancellation is not a result.
    async fn report(&self, result: &Result<SessionOutcome>) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        let item = &self.job.work_item;
        let (status, comment) = match result {
            Ok(outcome) => (ItemStatus::Done, delivery_note(&item.id, outcome)),
            Err(err) if err.is_cancelled() => return,
            Err(err) => (
                ItemStatus::Failed,
                format!("agent-relay could not deliver {}: {err}", item.id),
            ),
        };
        match reporter.update_status(item, status, &comment).await {
            Ok(()) => info!(source = reporter.name(), ?status, "status reported"),
            Err(err) => warn!(source = reporter.name(), %err, "failed to report status"),
        }
    }

    async fn push_progress(&self) {
        let Some(branches) = &self.branches else {
            return;
        };
        let ws = self.job.workspace.as_path();
        let message = format!("chore: progress update (iteration {})", self.progress.iteration);
        match self.vcs.commit_all(ws, &message).await {
            Ok(true) => {
                if let Err(err) = self.vcs.push(ws, &branches.feature).await {
                    warn!(%err, "failed to push progress");
                }
            }
            Ok(false) => {}
            Err(err) => warn!(%err, "failed to commit progress"),
        }
    }

    fn delivery_message(&self) -> String {
        let item = &self.job.work_item;
        format!("feat: deliver {}: {}", item.id, item.summary)
    }

    fn record(&mut self, role: Role, kind: TurnKind, content: impl Into<String>) {
        self.progress
            .push_turn(Turn::new(role, kind, content), self.job.settings.max_history);
    }

    fn transition(&mut self, next: Phase) -> Result<()> {
        let current = self.progress.phase;
        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            return Err(AppError::Protocol(format!(
                "invalid session transition {current:?} -> {next:?}"
            )));
        }
        debug!(from = ?current, to = ?next, "phase change");
        self.progress.phase = next;
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        self.progress.no_progress_streak = self.breaker.streak();
        let workspace = self.job.workspace.clone();
        self.progress.save(&workspace)
    }
}

fn delivery_note(id: &str, outcome: &SessionOutcome) -> String {
    match (&outcome.feature_branch, &outcome.merged_into) {
        (Some(feature), Some(base)) => format!(
            "agent-relay delivered {id}: merged {feature} into {base} after {} iterations.",
            outcome.iterations
        ),
        (Some(feature), None) => {
            format!("agent-relay delivered {id}: {feature} is pushed and ready for review.")
        }
        (None, _) => format!("agent-relay delivered {id} in its local workspace."),
    }
}
