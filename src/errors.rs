//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Version-control command failure.
    Git(String),
    /// Execution backend rejected or failed a job submission.
    Spawn(String),
    /// Local agent capacity is exhausted; retry later.
    Capacity(String),
    /// Work source poll failure.
    Source(String),
    /// Action proposer call or response failure.
    Proposer(String),
    /// Signal protocol violation, such as an unprivileged write of a
    /// privileged signal.
    Protocol(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Entity with the same name already exists.
    AlreadyExists(String),
    /// File system path failed validation against workspace root.
    PathViolation(String),
    /// Patch parsing or application failure.
    Diff(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// The session used its whole iteration budget.
    MaxIterations(u32),
    /// The circuit breaker tripped after consecutive iterations without
    /// effective change.
    Stalled(u32),
    /// Work was interrupted by a shutdown request.
    Cancelled,
}

impl AppError {
    /// Whether this error reports an exhausted budget rather than a crash.
    #[must_use]
    pub fn is_budget_exhausted(&self) -> bool {
        matches!(self, Self::MaxIterations(_) | Self::Stalled(_))
    }

    /// Whether this error was caused by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Git(msg) => write!(f, "git: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Capacity(msg) => write!(f, "capacity: {msg}"),
            Self::Source(msg) => write!(f, "source: {msg}"),
            Self::Proposer(msg) => write!(f, "proposer: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol violation: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
            Self::PathViolation(msg) => write!(f, "path violation: {msg}"),
            Self::Diff(msg) => write!(f, "diff: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::MaxIterations(max) => write!(f, "maximum iterations reached ({max})"),
            Self::Stalled(streak) => write!(
                f,
                "circuit breaker: {streak} consecutive iterations without progress"
            ),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(format!("json: {err}"))
    }
}
