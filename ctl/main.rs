#![forbid(unsafe_code)]

//! `agent-relay-ctl` operator and bridge CLI for `agent-relay`.
//!
//! Reads and writes the shared state database directly: signals, the
//! detached session registry, workspace snapshots and git recovery.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use agent_relay::config::GlobalConfig;
use agent_relay::models::job::STATE_DIR_ENV;
use agent_relay::models::session::SessionState;
use agent_relay::models::signal::{Producer, SignalName};
use agent_relay::orchestrator::snapshot_manager::SnapshotManager;
use agent_relay::orchestrator::SessionManager;
use agent_relay::persistence::db::{self, Database};
use agent_relay::session::progress::AgentProgress;
use agent_relay::session::SignalStore;
use agent_relay::vcs::git_cli::GitCli;
use agent_relay::vcs::recovery::{self, RecoveryPlan};
use agent_relay::{AppError, Result};

/// State directory used when neither `--config` nor `RELAY_STATE_DIR` is set.
const DEFAULT_STATE_DIR: &str = ".agent-relay";

#[derive(Debug, Parser)]
#[command(
    name = "agent-relay-ctl",
    about = "Operator CLI for agent-relay",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read or write project signals.
    Signal {
        #[command(subcommand)]
        action: SignalAction,
    },
    /// Sign off a project so its session may merge.
    Approve {
        /// Project identifier.
        project: String,
    },
    /// Manage detached sessions.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Save or restore workspace snapshots.
    Snapshot {
        /// Workspace the snapshots belong to.
        #[arg(long)]
        workspace: PathBuf,
        /// Project whose signals are captured; read from the workspace
        /// progress file when omitted.
        #[arg(long)]
        project: Option<String>,
        #[command(subcommand)]
        action: SnapshotAction,
    },
    /// Repair a workspace's git state.
    Recover {
        /// Workspace to repair.
        #[arg(long)]
        workspace: PathBuf,
        /// Remove untracked files.
        #[arg(long)]
        clean: bool,
        /// Reset hard to this remote branch.
        #[arg(long)]
        reset: Option<String>,
        /// Abort an in-progress merge.
        #[arg(long)]
        abort_merge: bool,
    },
}

#[derive(Debug, Subcommand)]
enum SignalAction {
    /// Print one signal value.
    Get {
        #[arg(long)]
        project: String,
        name: String,
    },
    /// Write a signal as an external caller. Privileged names are refused;
    /// sign-off goes through `approve`.
    Set {
        #[arg(long)]
        project: String,
        name: String,
        #[arg(default_value = "true")]
        value: String,
    },
    /// Remove a signal as an external caller.
    Clear {
        #[arg(long)]
        project: String,
        name: String,
    },
    /// List every signal of a project.
    List {
        #[arg(long)]
        project: String,
    },
}

#[derive(Debug, Subcommand)]
enum SessionAction {
    /// List sessions.
    List {
        /// Include archived sessions.
        #[arg(long)]
        all: bool,
    },
    /// Show one session.
    Status { name: String },
    /// Stop a running session.
    Stop { name: String },
    /// Print the tail of a session log.
    Logs {
        name: String,
        #[arg(long, default_value_t = 50)]
        lines: usize,
    },
}

#[derive(Debug, Subcommand)]
enum SnapshotAction {
    /// Save the current workspace state.
    Save {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Restore a saved snapshot.
    Restore { name: String },
    /// List snapshots, newest first.
    List,
    /// Delete a snapshot and its tag.
    Delete { name: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: failed to build runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::with_state_dir(
            std::env::var(STATE_DIR_ENV)
                .map_or_else(|_| PathBuf::from(DEFAULT_STATE_DIR), PathBuf::from),
        ),
    };

    match cli.command {
        Command::Signal { action } => signal(&config, action).await,
        Command::Approve { project } => {
            let store = SignalStore::new(open_database(&config).await?, project.clone());
            store
                .raise(SignalName::ProjectSignedOff, Producer::Operator)
                .await?;
            println!("project {project} signed off");
            Ok(())
        }
        Command::Session { action } => session(&config, action).await,
        Command::Snapshot {
            workspace,
            project,
            action,
        } => snapshot(&config, workspace, project, action).await,
        Command::Recover {
            workspace,
            clean,
            reset,
            abort_merge,
        } => {
            let git = GitCli::new(&config.git, None);
            let plan = RecoveryPlan {
                clean,
                reset_to: reset,
                abort_merge,
            };
            let report = recovery::recover(&git, &workspace, &plan).await?;
            for lock in &report.locks_removed {
                println!("removed lock {}", lock.display());
            }
            if report.merge_aborted {
                println!("aborted merge");
            }
            if let Some(branch) = &report.reset_to {
                println!("reset to origin/{branch}");
            }
            if report.cleaned {
                println!("removed untracked files");
            }
            Ok(())
        }
    }
}

async fn open_database(config: &GlobalConfig) -> Result<Arc<Database>> {
    config.ensure_state_dirs()?;
    Ok(Arc::new(db::connect(&config.db_path()).await?))
}

async fn signal(config: &GlobalConfig, action: SignalAction) -> Result<()> {
    let db = open_database(config).await?;
    match action {
        SignalAction::Get { project, name } => {
            let store = SignalStore::new(db, project);
            match store.get(&name).await? {
                Some(value) => println!("{value}"),
                None => return Err(AppError::NotFound(format!("signal {name} is not set"))),
            }
        }
        SignalAction::Set {
            project,
            name,
            value,
        } => {
            SignalStore::new(db, project)
                .set(&name, &value, Producer::External)
                .await?;
            println!("{name}={value}");
        }
        SignalAction::Clear { project, name } => {
            let removed = SignalStore::new(db, project)
                .clear(&name, Producer::External)
                .await?;
            if removed {
                println!("cleared {name}");
            } else {
                println!("{name} was not set");
            }
        }
        SignalAction::List { project } => {
            for signal in SignalStore::new(db, project).list().await? {
                println!(
                    "{:<20} {:<10} {:<9} {}",
                    signal.name,
                    signal.value,
                    signal.producer.as_str(),
                    signal.updated_at.to_rfc3339()
                );
            }
        }
    }
    Ok(())
}

async fn session(config: &GlobalConfig, action: SessionAction) -> Result<()> {
    let manager = SessionManager::new(open_database(config).await?, config);
    match action {
        SessionAction::List { all } => {
            for state in manager.list(all).await? {
                print_session(&state);
            }
        }
        SessionAction::Status { name } => print_session(&manager.status(&name).await?),
        SessionAction::Stop { name } => {
            let state = manager.stop(&name).await?;
            println!("session {} stopped", state.name);
        }
        SessionAction::Logs { name, lines } => print!("{}", manager.logs(&name, lines).await?),
    }
    Ok(())
}

fn print_session(state: &SessionState) {
    let pid = state
        .pid
        .map_or_else(|| "-".to_owned(), |pid| pid.to_string());
    let mut line = format!(
        "{:<24} {:<10} pid={:<8} item={} started={}",
        state.name,
        format!("{:?}", state.status).to_lowercase(),
        pid,
        state.work_item_id,
        state.started_at.to_rfc3339()
    );
    if let Some(error) = &state.error {
        line.push_str(&format!(" error={error}"));
    }
    println!("{line}");
}

/// Project a workspace's snapshots belong to.
fn resolve_project(workspace: &Path, project: Option<String>) -> Result<String> {
    if let Some(project) = project {
        return Ok(project);
    }
    AgentProgress::load(workspace)?
        .map(|progress| progress.work_item_id)
        .ok_or_else(|| {
            AppError::Config(format!(
                "no progress file in {}; pass --project",
                workspace.display()
            ))
        })
}

async fn snapshot(
    config: &GlobalConfig,
    workspace: PathBuf,
    project: Option<String>,
    action: SnapshotAction,
) -> Result<()> {
    let project = resolve_project(&workspace, project)?;
    let signals = SignalStore::new(open_database(config).await?, project);
    let vcs = Arc::new(GitCli::new(&config.git, None));
    let manager = SnapshotManager::new(workspace, vcs, signals);

    match action {
        SnapshotAction::Save { name, description } => {
            let meta = manager.save(&name, &description).await?;
            println!("saved snapshot {} at {}", meta.name, meta.revision);
        }
        SnapshotAction::Restore { name } => {
            let report = manager.restore(&name).await?;
            for entry in &report.divergences {
                println!("diverged: {} ({:?})", entry.file_path, entry.kind);
            }
            println!(
                "restored snapshot {} at {} ({} signals)",
                report.meta.name, report.meta.revision, report.signals_restored
            );
        }
        SnapshotAction::List => {
            for meta in manager.list()? {
                println!(
                    "{:<24} {} {} {}",
                    meta.name,
                    meta.created_at.to_rfc3339(),
                    meta.revision,
                    meta.description
                );
            }
        }
        SnapshotAction::Delete { name } => {
            manager.delete(&name).await?;
            println!("deleted snapshot {name}");
        }
    }
    Ok(())
}
