//! Detached session lifecycle: start, status, list, stop, archive, logs.
//!
//! Each session runs as its own OS process in a separate process group,
//! with stdout and stderr appended to `<sessions_dir>/<name>.log`. The
//! registry row in `SQLite` is the source of truth shared between the
//! orchestrator, the operator CLI, and the session itself.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};

use super::child_monitor::{exit_outcome, record_exit};
use crate::config::GlobalConfig;
use crate::models::job::{JobConfig, JOB_FILE_ENV};
use crate::models::session::{SessionState, SessionStatus};
use crate::persistence::db::Database;
use crate::persistence::session_repo::SessionRepo;
use crate::session::edits::write_atomic;
use crate::{AppError, Result};

/// Child processes started by this manager, keyed by session name.
pub type TrackedChildren = Arc<Mutex<HashMap<String, Child>>>;

/// Interval between liveness checks while stopping a session.
const STOP_POLL: Duration = Duration::from_millis(100);

/// Reject names that could escape the sessions directory.
///
/// # Errors
///
/// Returns `AppError::Config` for empty names, path separators, or `..`.
pub fn validate_session_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(AppError::Config("session name must not be empty".into()));
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(AppError::Config(format!(
            "session name {name} must not contain path separators or '..'"
        )));
    }
    Ok(())
}

/// Starts and supervises detached session processes.
#[derive(Clone)]
pub struct SessionManager {
    repo: SessionRepo,
    sessions_dir: PathBuf,
    command: String,
    args: Vec<String>,
    stop_grace: Duration,
    children: TrackedChildren,
}

impl SessionManager {
    /// Create a manager running `[agent] command` with `[agent] args`.
    #[must_use]
    pub fn new(db: Arc<Database>, config: &GlobalConfig) -> Self {
        Self::with_command(
            db,
            config.sessions_dir(),
            config.agent.command.clone(),
            config.agent.args.clone(),
            Duration::from_secs(config.session.stop_grace_seconds),
        )
    }

    /// Create a manager with an explicit agent command.
    #[must_use]
    pub fn with_command(
        db: Arc<Database>,
        sessions_dir: PathBuf,
        command: String,
        args: Vec<String>,
        stop_grace: Duration,
    ) -> Self {
        Self {
            repo: SessionRepo::new(db),
            sessions_dir,
            command,
            args,
            stop_grace,
            children: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Shared handle to the tracked child processes.
    #[must_use]
    pub fn children(&self) -> TrackedChildren {
        Arc::clone(&self.children)
    }

    /// Registry the manager writes to.
    #[must_use]
    pub fn repo(&self) -> &SessionRepo {
        &self.repo
    }

    /// Path of a session's log file.
    #[must_use]
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.sessions_dir.join(format!("{name}.log"))
    }

    /// Path of a session's job file.
    #[must_use]
    pub fn job_path(&self, name: &str) -> PathBuf {
        self.sessions_dir.join(format!("{name}.job.json"))
    }

    /// Start a detached session for `job` under `name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an invalid name,
    /// `AppError::AlreadyExists` if a live session has that name,
    /// `AppError::Spawn` if the process cannot start, or `AppError::Io` /
    /// `AppError::Db` if bookkeeping fails.
    pub async fn start(&self, name: &str, job: &JobConfig) -> Result<SessionState> {
        validate_session_name(name)?;
        let span = info_span!("session_start", name);
        self.start_inner(name, job).instrument(span).await
    }

    async fn start_inner(&self, name: &str, job: &JobConfig) -> Result<SessionState> {
        if let Some(existing) = self.repo.get(name).await? {
            if self.refresh(existing).await?.status == SessionStatus::Running {
                return Err(AppError::AlreadyExists(format!(
                    "session {name} is already running"
                )));
            }
        }

        std::fs::create_dir_all(&self.sessions_dir)?;
        let mut job = job.clone();
        job.session_name = Some(name.to_owned());
        let job_path = self.job_path(name);
        write_atomic(&job_path, job.to_json()?.as_bytes())?;

        let log_path = self.log_path(name);
        if log_path.exists() {
            let rotated = self.sessions_dir.join(format!("{name}.log.1"));
            std::fs::rename(&log_path, rotated)?;
        }
        let log = open_log(&log_path)?;
        let stderr = log.try_clone()?;

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&job.work_item.env)
            .env(JOB_FILE_ENV, &job_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr));
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|err| {
            AppError::Spawn(format!("failed to start {}: {err}", self.command))
        })?;
        let pid = child.id();

        let state = SessionState::running(
            name.to_owned(),
            pid,
            job.work_item.id.clone(),
            job.workspace.clone(),
            log_path,
        );
        self.repo.upsert(&state).await?;
        self.children.lock().await.insert(name.to_owned(), child);

        info!(
            pid = pid.unwrap_or(0),
            work_item_id = %job.work_item.id,
            log = %state.log_path.display(),
            "session started"
        );
        Ok(state)
    }

    /// Current state of a session with liveness refreshed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown name or `AppError::Db` if
    /// the registry cannot be read.
    pub async fn status(&self, name: &str) -> Result<SessionState> {
        let state = self
            .repo
            .get(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {name} not found")))?;
        self.refresh(state).await
    }

    /// All sessions, newest first, with liveness refreshed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the registry cannot be read.
    pub async fn list(&self, include_archived: bool) -> Result<Vec<SessionState>> {
        let mut out = Vec::new();
        for state in self.repo.list(include_archived).await? {
            out.push(self.refresh(state).await?);
        }
        Ok(out)
    }

    /// Number of sessions that are actually still running.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the registry cannot be read.
    pub async fn count_running(&self) -> Result<u64> {
        for state in self.repo.list_running().await? {
            self.refresh(state).await?;
        }
        self.repo.count_running().await
    }

    /// Whether a session with this name is running.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the registry cannot be read.
    pub async fn is_running(&self, name: &str) -> Result<bool> {
        match self.repo.get(name).await? {
            Some(state) => Ok(self.refresh(state).await?.status == SessionStatus::Running),
            None => Ok(false),
        }
    }

    /// Terminate a session: SIGTERM, grace period, then SIGKILL. The entry
    /// is marked stopped and archived.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown name or `AppError::Db` if
    /// the registry update fails.
    pub async fn stop(&self, name: &str) -> Result<SessionState> {
        let state = self.status(name).await?;
        let span = info_span!("session_stop", name);
        async {
            if state.status == SessionStatus::Running {
                if let Some(pid) = state.pid {
                    self.terminate(name, pid).await;
                }
                if let Err(err) = self
                    .repo
                    .set_status(name, SessionStatus::Stopped, None)
                    .await
                {
                    warn!(%err, "session ended before it could be marked stopped");
                }
            }
            self.repo.archive(name).await?;
            info!("session stopped");
            self.status(name).await
        }
        .instrument(span)
        .await
    }

    /// Hide a session from default listings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown name.
    pub async fn archive(&self, name: &str) -> Result<()> {
        self.repo.archive(name).await
    }

    /// Last `lines` lines of a session's log.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session or `AppError::Io`
    /// if the log cannot be read.
    pub async fn logs(&self, name: &str, lines: usize) -> Result<String> {
        let state = self
            .repo
            .get(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {name} not found")))?;
        let raw = tokio::fs::read_to_string(&state.log_path).await?;
        Ok(tail_lines(&raw, lines))
    }

    async fn terminate(&self, name: &str, pid: u32) {
        signal_group(pid, false);
        let deadline = tokio::time::Instant::now() + self.stop_grace;
        while tokio::time::Instant::now() < deadline {
            if !self.alive(name, pid).await {
                return;
            }
            tokio::time::sleep(STOP_POLL).await;
        }
        warn!(pid, "session ignored SIGTERM, killing");
        signal_group(pid, true);
        if let Some(mut child) = self.children.lock().await.remove(name) {
            if let Err(err) = child.wait().await {
                warn!(%err, "failed to reap killed session");
            }
        }
    }

    async fn alive(&self, name: &str, pid: u32) -> bool {
        let mut children = self.children.lock().await;
        if let Some(child) = children.get_mut(name) {
            return match child.try_wait() {
                Ok(None) => true,
                Ok(Some(_)) | Err(_) => {
                    children.remove(name);
                    false
                }
            };
        }
        drop(children);
        process_alive(pid)
    }

    /// Reconcile a running entry with the process it names.
    async fn refresh(&self, state: SessionState) -> Result<SessionState> {
        if state.status != SessionStatus::Running {
            return Ok(state);
        }

        let tracked = {
            let mut children = self.children.lock().await;
            match children.get_mut(&state.name).map(Child::try_wait) {
                Some(Ok(None)) => return Ok(state),
                Some(Ok(Some(status))) => {
                    children.remove(&state.name);
                    Some(Some(status))
                }
                Some(Err(_)) => {
                    children.remove(&state.name);
                    Some(None)
                }
                None => None,
            }
        };

        let exit = match tracked {
            Some(status) => status,
            None if state.pid.is_some_and(process_alive) => return Ok(state),
            None => None,
        };
        let (status, error) = exit_outcome(exit);
        record_exit(&self.repo, &state.name, status, error).await;
        Ok(self.repo.get(&state.name).await?.unwrap_or(state))
    }
}

fn open_log(path: &Path) -> Result<std::fs::File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(path)
        .map_err(|err| AppError::Io(format!("cannot create log {}: {err}", path.display())))
}

fn tail_lines(raw: &str, lines: usize) -> String {
    let all: Vec<&str> = raw.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// Whether a process with `pid` exists.
#[cfg(unix)]
#[must_use]
pub fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
}

/// Whether a process with `pid` exists.
#[cfg(not(unix))]
#[must_use]
pub fn process_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn signal_group(pid: u32, force: bool) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    if let Err(err) = killpg(Pid::from_raw(raw), signal) {
        warn!(pid, %err, ?signal, "failed to signal session process group");
    }
}

#[cfg(not(unix))]
fn signal_group(pid: u32, _force: bool) {
    warn!(pid, "process signalling is only supported on unix");
}
