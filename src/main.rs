#![forbid(unsafe_code)]

//! `agent-relay` orchestrator and session runner binary.
//!
//! `orchestrate` polls the configured work source and spawns one session
//! per new work item. `run` executes a single session in the foreground,
//! or hands it to the session manager with `--detached`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::config::{ExecutionMode, GlobalConfig, SourceKind};
use agent_relay::models::job::{JobConfig, JOB_FILE_ENV, JOB_INLINE_ENV, STATE_DIR_ENV};
use agent_relay::models::session::SessionStatus;
use agent_relay::models::work_item::WorkItem;
use agent_relay::notifications::Notifier;
use agent_relay::orchestrator::child_monitor::{
    record_exit, spawn_child_monitor, EXIT_MAX_ITERATIONS, EXIT_STALLED,
};
use agent_relay::orchestrator::cluster::{ClusterSpawner, KubeJobApi};
use agent_relay::orchestrator::{LocalSpawner, Orchestrator, SessionManager, Spawner};
use agent_relay::persistence::db::{self, Database};
use agent_relay::persistence::retention;
use agent_relay::persistence::session_repo::SessionRepo;
use agent_relay::proposer::http::HttpProposer;
use agent_relay::session::{Session, SignalStore};
use agent_relay::source::{self, StaticSource, WorkSource};
use agent_relay::vcs::branch::GitIdentity;
use agent_relay::vcs::git_cli::GitCli;
use agent_relay::{AppError, Result};

/// State directory used when neither `--config` nor `RELAY_STATE_DIR` is set.
const DEFAULT_STATE_DIR: &str = ".agent-relay";

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "Autonomous coding agent orchestrator", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll the work source and spawn a session per new work item.
    Orchestrate {
        /// Execution backend.
        #[arg(long, value_enum)]
        mode: Option<ExecutionMode>,
        /// Work source.
        #[arg(long, value_enum)]
        source: Option<SourceKind>,
        /// Seconds between polls.
        #[arg(long)]
        interval_secs: Option<u64>,
        /// Concurrent local sessions.
        #[arg(long)]
        max_agents: Option<u32>,
        /// Repository for a single direct task.
        #[arg(long, requires = "summary")]
        repo_url: Option<String>,
        /// Summary of a single direct task; replaces the work source.
        #[arg(long)]
        summary: Option<String>,
    },
    /// Run one session.
    Run {
        /// Job description file.
        #[arg(long, conflicts_with = "id")]
        job: Option<PathBuf>,
        /// Work item id.
        #[arg(long)]
        id: Option<String>,
        /// Work item summary.
        #[arg(long, default_value = "")]
        summary: String,
        /// Repository to clone.
        #[arg(long)]
        repo_url: Option<String>,
        /// Epic the work belongs to.
        #[arg(long)]
        epic: Option<String>,
        /// Workspace directory.
        #[arg(long)]
        workspace: Option<PathBuf>,
        /// Worker iteration budget.
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Manager review cadence in iterations; 0 disables.
        #[arg(long)]
        manager_frequency: Option<u32>,
        /// Start the session in the background.
        #[arg(long, requires = "name")]
        detached: bool,
        /// Registry name of a detached session.
        #[arg(long)]
        name: Option<String>,
    },
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "agent-relay failed");
            exit_code(&err)
        }
    }
}

fn exit_code(err: &AppError) -> ExitCode {
    match err {
        AppError::Cancelled => ExitCode::SUCCESS,
        AppError::MaxIterations(_) => ExitCode::from(code_byte(EXIT_MAX_ITERATIONS)),
        AppError::Stalled(_) => ExitCode::from(code_byte(EXIT_STALLED)),
        _ => ExitCode::FAILURE,
    }
}

fn code_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

async fn run(args: Cli) -> Result<()> {
    let config = load_config(args.config.as_ref())?;
    match args.command {
        Command::Orchestrate {
            mode,
            source,
            interval_secs,
            max_agents,
            repo_url,
            summary,
        } => {
            let mut config = config;
            if let Some(mode) = mode {
                config.orchestrator.mode = mode;
            }
            if let Some(source) = source {
                config.orchestrator.source = source;
            }
            if let Some(secs) = interval_secs {
                config.orchestrator.interval_seconds = secs;
            }
            if let Some(max) = max_agents {
                config.agent.max_agents = max;
            }
            let direct = summary.map(|summary| {
                let id = format!("task-{}", uuid::Uuid::new_v4().simple());
                let item = WorkItem::new(id, summary);
                match repo_url {
                    Some(url) => item.with_repo(url),
                    None => item,
                }
            });
            orchestrate(config, args.config, direct)
                .instrument(info_span!("orchestrate"))
                .await
        }
        Command::Run {
            job,
            id,
            summary,
            repo_url,
            epic,
            workspace,
            max_iterations,
            manager_frequency,
            detached,
            name,
        } => {
            let mut job = match (job, id) {
                (Some(path), _) => JobConfig::load(&path)?,
                (None, Some(id)) => {
                    let mut item = WorkItem::new(id, summary);
                    item.repo_url = repo_url;
                    item.epic_id = epic;
                    let workspace = workspace
                        .unwrap_or_else(|| config.workspaces_dir().join(item.sanitized_id()));
                    JobConfig::resolve(&item, &config, workspace)
                }
                (None, None) => job_from_env()?,
            };
            if let Some(max) = max_iterations {
                job.settings.max_iterations = max;
            }
            if let Some(freq) = manager_frequency {
                job.settings.manager_frequency = freq;
            }

            if detached {
                let name = name.ok_or_else(|| AppError::Config("--name is required".into()))?;
                start_detached(&config, args.config.as_ref(), &name, &job).await
            } else {
                run_session(config, job).await
            }
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<GlobalConfig> {
    match path {
        Some(path) => GlobalConfig::load_from_path(path),
        None => {
            let state_dir = std::env::var(STATE_DIR_ENV)
                .map_or_else(|_| PathBuf::from(DEFAULT_STATE_DIR), PathBuf::from);
            info!(state_dir = %state_dir.display(), "no config file given, using defaults");
            Ok(GlobalConfig::with_state_dir(state_dir))
        }
    }
}

fn job_from_env() -> Result<JobConfig> {
    if let Ok(path) = std::env::var(JOB_FILE_ENV) {
        return JobConfig::load(&PathBuf::from(path));
    }
    if let Ok(raw) = std::env::var(JOB_INLINE_ENV) {
        return JobConfig::from_json(&raw);
    }
    Err(AppError::Config(format!(
        "no job given: pass --job, --id, or set {JOB_FILE_ENV} or {JOB_INLINE_ENV}"
    )))
}

async fn open_database(config: &GlobalConfig) -> Result<Arc<Database>> {
    config.ensure_state_dirs()?;
    let db = Arc::new(db::connect(&config.db_path()).await?);
    info!(path = %config.db_path().display(), "database connected");
    Ok(db)
}

/// Session manager whose children re-read the same config file.
fn session_manager(
    db: Arc<Database>,
    config: &GlobalConfig,
    config_path: Option<&PathBuf>,
) -> SessionManager {
    let mut args = Vec::new();
    if let Some(path) = config_path {
        let path = path.canonicalize().unwrap_or_else(|_| path.clone());
        args.push("--config".to_owned());
        args.push(path.to_string_lossy().into_owned());
    }
    args.extend(config.agent.args.iter().cloned());
    SessionManager::with_command(
        db,
        config.sessions_dir(),
        config.agent.command.clone(),
        args,
        std::time::Duration::from_secs(config.session.stop_grace_seconds),
    )
}

async fn orchestrate(
    mut config: GlobalConfig,
    config_path: Option<PathBuf>,
    direct: Option<WorkItem>,
) -> Result<()> {
    if direct.is_none() {
        config.validate_orchestrator()?;
    }
    config.load_orchestrator_credentials().await?;
    let config = Arc::new(config);
    let db = open_database(&config).await?;

    let cancel = CancellationToken::new();
    let retention_handle =
        retention::spawn_retention_task(Arc::clone(&db), config.retention_days, cancel.clone());

    let source: Arc<dyn WorkSource> = match direct {
        Some(item) => {
            info!(work_item_id = %item.id, "running a single direct task");
            Arc::new(StaticSource::new(vec![item]))
        }
        None => source::from_config(&config)?,
    };

    let mut monitor_handle = None;
    let spawner: Arc<dyn Spawner> = match config.orchestrator.mode {
        ExecutionMode::Local => {
            let manager = session_manager(Arc::clone(&db), &config, config_path.as_ref());
            monitor_handle = Some(spawn_child_monitor(
                manager.children(),
                Arc::clone(&db),
                cancel.clone(),
            ));
            Arc::new(LocalSpawner::new(manager, Arc::clone(&config)))
        }
        ExecutionMode::Cluster => {
            let api = KubeJobApi::from_config(&config.cluster)?;
            Arc::new(ClusterSpawner::new(Arc::new(api), Arc::clone(&config)))
        }
    };

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    let mut orchestrator = Orchestrator::new(
        source,
        spawner,
        config.poll_interval(),
        config.orchestrator.max_spawn_attempts,
    );
    let result = orchestrator.run(cancel.clone()).await;
    cancel.cancel();

    if let Err(err) = retention_handle.await {
        warn!(%err, "retention task ended abnormally");
    }
    if let Some(handle) = monitor_handle {
        if let Err(err) = handle.await {
            warn!(%err, "child monitor ended abnormally");
        }
    }
    info!("agent-relay shut down");
    result
}

async fn start_detached(
    config: &GlobalConfig,
    config_path: Option<&PathBuf>,
    name: &str,
    job: &JobConfig,
) -> Result<()> {
    let db = open_database(config).await?;
    let manager = session_manager(db, config, config_path);
    let state = manager.start(name, job).await?;
    println!(
        "session {name} started: pid {}, log {}",
        state.pid.map_or_else(|| "unknown".to_owned(), |pid| pid.to_string()),
        state.log_path.display()
    );
    Ok(())
}

async fn run_session(mut config: GlobalConfig, job: JobConfig) -> Result<()> {
    config.load_session_credentials(&job.provider).await?;
    let db = open_database(&config).await?;

    let proposer = HttpProposer::new(
        &job.provider,
        &job.model,
        config.proposer.base_url.as_deref(),
        config.credentials.proposer_api_key.clone(),
        config.proposer.max_tokens,
    )?;
    let vcs = Arc::new(GitCli::new(&config.git, config.credentials.github_token.clone()));
    let signals = SignalStore::new(Arc::clone(&db), job.project_id.clone());
    let identity = GitIdentity {
        name: config.git.user_name.clone(),
        email: config.git.user_email.clone(),
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, stopping after the current step");
        signal_cancel.cancel();
    });

    let mut session = Session::new(job.clone(), Arc::new(proposer), vcs, signals, identity);
    if let Some(reporter) = source::status_reporter(&config) {
        session = session.with_status_reporter(reporter);
    }
    if let Some(notifier) = Notifier::from_config(&config.notifications)? {
        session = session.with_notifier(notifier);
    }
    let result = session.run(&cancel).await;

    if let Some(name) = &job.session_name {
        let (status, error) = match &result {
            Ok(_) => (SessionStatus::Completed, None),
            Err(AppError::Cancelled) => (SessionStatus::Stopped, None),
            Err(err) => (SessionStatus::Failed, Some(err.to_string())),
        };
        record_exit(&SessionRepo::new(db), name, status, error).await;
    }

    let outcome = result?;
    info!(
        iterations = outcome.iterations,
        feature = ?outcome.feature_branch,
        merged_into = ?outcome.merged_into,
        "work item delivered"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
