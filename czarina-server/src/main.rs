//! czarina: multi-agent orchestration CLI
//!
//! One-shot commands (`status`, `tick`, `scan`, `deps`, `worker`, `alerts`)
//! replay the project's event log and exit; `run` keeps the controller and
//! daemon loops going until Ctrl-C or SIGTERM.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use czarina_server::config::{Config, DEFAULT_PROJECT_DIR};
use czarina_server::server::Server;
use czarina_server::Orchestrator;

#[derive(Parser)]
#[command(name = "czarina")]
#[command(about = "Orchestrates coding agents working on dependent branches")]
#[command(version)]
struct Cli {
    /// Project directory holding config.json and logs/
    #[arg(long, global = true, default_value = DEFAULT_PROJECT_DIR)]
    project_dir: PathBuf,

    /// Configuration file (defaults to <project-dir>/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show every worker's projected status
    Status,
    /// Run one controller pass and list the workers it started
    Tick,
    /// Run one daemon pass and list alerts raised and cleared
    Scan,
    /// Inspect the dependency graph
    Deps {
        #[command(subcommand)]
        command: DepsCommand,
    },
    /// Report worker progress
    Worker {
        #[command(subcommand)]
        command: WorkerCommand,
    },
    /// List open alerts or acknowledge one
    Alerts {
        #[command(subcommand)]
        command: Option<AlertsCommand>,
    },
    /// Check the configuration and print a summary
    Validate,
    /// Run the controller and daemon loops until interrupted
    Run,
}

#[derive(Subcommand)]
enum DepsCommand {
    /// Print edges and waves
    Graph {
        /// Emit Graphviz DOT
        #[arg(long)]
        dot: bool,
    },
    /// Whether a worker may start now
    Check { worker_id: String },
}

#[derive(Subcommand)]
enum WorkerCommand {
    /// Mark a worker's task as done
    Complete { worker_id: String },
    /// Mark a worker as failed; its dependents will not start
    Fail(FailArgs),
    /// Record that a worker is making progress
    Heartbeat {
        worker_id: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Show the git status of a worker's checkout
    Branch { worker_id: String },
}

#[derive(Args)]
struct FailArgs {
    worker_id: String,
    #[arg(long)]
    reason: String,
}

#[derive(Subcommand)]
enum AlertsCommand {
    /// Acknowledge (clear) a worker's open alert
    Ack { worker_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.project_dir.join(czarina_server::config::CONFIG_FILE));
    let config = Config::load_from_file(&cli.project_dir, &config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let _guard = init_tracing(&config.logs_dir(), &level)?;
    debug!("Loaded configuration from {}", config_path.display());

    if let Err(e) = execute(&cli, &config).await {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}

/// Console plus daily-rotated file logging under `<project_dir>/logs`
fn init_tracing(logs_dir: &Path, level: &str) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("Failed to create {}", logs_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(logs_dir, "czarina.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(env_filter.clone()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(env_filter),
        )
        .init();

    Ok(guard)
}

async fn execute(cli: &Cli, config: &Config) -> Result<()> {
    let orchestrator = match cli.command {
        Command::Validate => return validate(config, cli.json),
        _ => Orchestrator::open(config).await?,
    };

    match &cli.command {
        Command::Status => {
            let table = orchestrator.status().await?;
            emit(cli.json, &table, || table.to_string())?;
        }
        Command::Tick => {
            let report = orchestrator.tick().await?;
            emit(cli.json, &report, || {
                let mut out = String::new();
                if report.started.is_empty() {
                    out.push_str("No workers started\n");
                }
                for id in &report.started {
                    let note = if report.failed_to_launch.contains(id) {
                        " (launch failed, marked FAILED)"
                    } else {
                        ""
                    };
                    out.push_str(&format!("Started {}{}\n", id, note));
                }
                for idle in &report.idle {
                    out.push_str(&format!("Idle {} for {}s\n", idle.worker_id, idle.idle_secs));
                }
                if report.session_complete {
                    out.push_str("Session complete\n");
                }
                out
            })?;
        }
        Command::Scan => {
            let report = orchestrator.scan().await?;
            emit(cli.json, &report, || {
                let mut out = String::new();
                for id in &report.actions {
                    out.push_str(&format!("Responded to prompt in {}\n", id));
                }
                for alert in &report.raised {
                    out.push_str(&format!(
                        "ALERT {} [{}] {}\n",
                        alert.worker_id, alert.severity, alert.description
                    ));
                }
                for id in &report.cleared {
                    out.push_str(&format!("Cleared alert for {}\n", id));
                }
                for id in &report.unblocked {
                    out.push_str(&format!("Unblocked {}\n", id));
                }
                if out.is_empty() {
                    out.push_str("Nothing to do\n");
                }
                out
            })?;
        }
        Command::Deps { command } => match command {
            DepsCommand::Graph { dot: true } => print!("{}", orchestrator.deps_dot()),
            DepsCommand::Graph { dot: false } => {
                let snapshot = orchestrator.deps_graph();
                emit(cli.json, &snapshot, || {
                    let mut out = String::new();
                    for edge in &snapshot.edges {
                        out.push_str(&format!("{} -> {}\n", edge.from, edge.to));
                    }
                    for (level, wave) in snapshot.waves.iter().enumerate() {
                        out.push_str(&format!("wave {}: {}\n", level, wave.join(", ")));
                    }
                    out
                })?;
            }
            DepsCommand::Check { worker_id } => {
                let check = orchestrator.deps_check(worker_id).await?;
                emit(cli.json, &check, || {
                    if check.can_start {
                        format!("{} can start\n", check.worker_id)
                    } else {
                        format!(
                            "{} is waiting on: {}\n",
                            check.worker_id,
                            check.unmet.join(", ")
                        )
                    }
                })?;
            }
        },
        Command::Worker { command } => match command {
            WorkerCommand::Complete { worker_id } => {
                orchestrator.complete(worker_id).await?;
                println!("{} marked COMPLETE", worker_id);
            }
            WorkerCommand::Fail(args) => {
                orchestrator.fail(&args.worker_id, &args.reason).await?;
                println!("{} marked FAILED", args.worker_id);
            }
            WorkerCommand::Heartbeat { worker_id, note } => {
                orchestrator.heartbeat(worker_id, note.as_deref()).await?;
            }
            WorkerCommand::Branch { worker_id } => {
                print!("{}", orchestrator.branch_status(worker_id).await?);
            }
        },
        Command::Alerts { command: None } => {
            let alerts = orchestrator.alerts().await?;
            emit(cli.json, &alerts, || {
                if alerts.is_empty() {
                    return "No open alerts\n".to_string();
                }
                alerts
                    .iter()
                    .map(|alert| {
                        format!(
                            "{} [{}] {} {}\n",
                            alert.detected_at.format("%Y-%m-%d %H:%M:%S"),
                            alert.severity,
                            alert.worker_id,
                            alert.description
                        )
                    })
                    .collect()
            })?;
        }
        Command::Alerts {
            command: Some(AlertsCommand::Ack { worker_id }),
        } => {
            if orchestrator.acknowledge_alert(worker_id).await? {
                println!("Alert for {} acknowledged", worker_id);
            } else {
                println!("No open alert for {}", worker_id);
            }
        }
        Command::Run => {
            info!("Czarina {} running project {}", env!("CARGO_PKG_VERSION"), config.project.name);
            Server::new(orchestrator).run().await?;
        }
        Command::Validate => {}
    }
    Ok(())
}

#[derive(Serialize)]
struct ValidationSummary {
    project: String,
    session: String,
    workers: usize,
    waves: Vec<Vec<String>>,
    profiles: Vec<String>,
}

fn validate(config: &Config, json: bool) -> Result<()> {
    let profiles = config.profiles()?;
    let workers = config.worker_set(&profiles)?;
    let summary = ValidationSummary {
        project: config.project.name.clone(),
        session: config.session_name(),
        workers: workers.len(),
        waves: workers.graph().waves(),
        profiles: profiles.ids().cloned().collect(),
    };
    emit(json, &summary, || {
        let mut out = format!(
            "Valid configuration\n  Project: {}\n  Session: {}\n  Workers: {}\n",
            summary.project, summary.session, summary.workers
        );
        for (level, wave) in summary.waves.iter().enumerate() {
            out.push_str(&format!("  Wave {}: {}\n", level, wave.join(", ")));
        }
        out.push_str(&format!("  Profiles: {}\n", summary.profiles.join(", ")));
        out
    })
}

fn emit<T, F>(json: bool, value: &T, text: F) -> Result<()>
where
    T: Serialize,
    F: FnOnce() -> String,
{
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", text());
    }
    Ok(())
}
