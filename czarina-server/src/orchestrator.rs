//! Orchestrator facade
//!
//! Ties the worker set, the event log, the lifecycle controller and the
//! approval daemon together behind the command surface the CLI exposes.
//! Read-only commands replay the log; `tick` and `scan` run one cycle of the
//! respective loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

use czarina_core::alert::{Alert, AlertBook, AlertSeverity};
use czarina_core::event::{history, EventFilter, EventLog};
use czarina_core::graph::GraphSnapshot;
use czarina_core::orchestration::{
    ApprovalDaemon, ControllerSettings, DaemonSettings, GitCollaborator, LifecycleController,
    ScanReport, SessionCollaborator, TickReport, WorkerSet,
};
use czarina_core::profile::ProfileRegistry;
use czarina_core::session::Session;
use czarina_core::status::{StatusBoard, WorkerStatus};
use czarina_storage::{StorageConfig, StorageManager};

use crate::config::Config;
use crate::git::GitWorktrees;
use crate::tmux::TmuxSession;
use crate::Result;

/// One line of `czarina status`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusRow {
    pub worker_id: String,
    pub role: String,
    pub agent: String,
    pub branch: String,
    pub status: WorkerStatus,
    pub dependencies: Vec<String>,
    /// Dependencies not yet COMPLETE
    pub unmet: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<AlertSeverity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Projected state of every worker, in declaration order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusTable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    pub rows: Vec<StatusRow>,
    /// Data-integrity warnings found while projecting
    pub warnings: usize,
}

impl StatusTable {
    pub fn row(&self, worker_id: &str) -> Option<&StatusRow> {
        self.rows.iter().find(|row| row.worker_id == worker_id)
    }

    pub fn status(&self, worker_id: &str) -> Option<WorkerStatus> {
        self.row(worker_id).map(|row| row.status)
    }
}

impl fmt::Display for StatusTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.session {
            Some(session) => writeln!(
                f,
                "Session {} ({:?}) started {}",
                session.id,
                session.status,
                session.started_at.format("%Y-%m-%d %H:%M:%S UTC")
            )?,
            None => writeln!(f, "No session started")?,
        }
        writeln!(
            f,
            "{:<16} {:<12} {:<12} {:<10} {:<8} WAITING ON",
            "WORKER", "ROLE", "AGENT", "STATUS", "ALERT"
        )?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<16} {:<12} {:<12} {:<10} {:<8} {}",
                row.worker_id,
                row.role,
                row.agent,
                row.status.as_str(),
                row.alert.map(|s| s.as_str()).unwrap_or("-"),
                if row.unmet.is_empty() {
                    "-".to_string()
                } else {
                    row.unmet.join(", ")
                }
            )?;
        }
        if self.warnings > 0 {
            writeln!(f, "{} data-integrity warning(s), see logs", self.warnings)?;
        }
        Ok(())
    }
}

/// Answer to `czarina deps check <id>`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DepsCheck {
    pub worker_id: String,
    pub can_start: bool,
    pub unmet: Vec<String>,
}

pub struct Orchestrator {
    workers: Arc<WorkerSet>,
    log: Arc<dyn EventLog>,
    git: Arc<dyn GitCollaborator>,
    controller: LifecycleController,
    daemon: ApprovalDaemon,
}

impl Orchestrator {
    pub fn new(
        workers: WorkerSet,
        profiles: ProfileRegistry,
        log: Arc<dyn EventLog>,
        session: Arc<dyn SessionCollaborator>,
        git: Arc<dyn GitCollaborator>,
        controller: ControllerSettings,
        daemon: DaemonSettings,
    ) -> Self {
        let workers = Arc::new(workers);
        let profiles = Arc::new(profiles);
        let controller = LifecycleController::new(
            workers.clone(),
            profiles.clone(),
            log.clone(),
            session.clone(),
            git.clone(),
            controller,
        );
        let daemon = ApprovalDaemon::new(workers.clone(), profiles, log.clone(), session, daemon);
        Self {
            workers,
            log,
            git,
            controller,
            daemon,
        }
    }

    /// Wire a project: the JSONL event log, tmux and git worktrees
    pub async fn open(config: &Config) -> Result<Self> {
        let profiles = config.profiles()?;
        let workers = config.worker_set(&profiles)?;
        let storage = StorageManager::new(&StorageConfig {
            project_dir: config.project_dir.clone(),
        })
        .await?;
        let session = Arc::new(TmuxSession::new(
            config.session_name(),
            config.daemon.capture_lines,
        ));
        let git = Arc::new(GitWorktrees::new(
            config.repository_path(),
            config.worktrees_path(),
            workers.iter(),
        ));
        info!(
            "Opened project {} with {} workers, events in {}",
            config.project.name,
            workers.len(),
            storage.events().path().display()
        );
        Ok(Self::new(
            workers,
            profiles,
            storage.event_log(),
            session,
            git,
            config.controller.clone(),
            config.daemon.clone(),
        ))
    }

    pub fn workers(&self) -> &WorkerSet {
        &self.workers
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    pub fn daemon(&self) -> &ApprovalDaemon {
        &self.daemon
    }

    pub async fn status(&self) -> Result<StatusTable> {
        let history = history(self.log.as_ref(), EventFilter::All).await?;
        let board = StatusBoard::from_history(self.workers.ids(), &history);
        let alerts = AlertBook::from_history(&history);
        let completed = board.completed();
        let graph = self.workers.graph();

        let mut rows = Vec::with_capacity(self.workers.len());
        for worker in self.workers.iter() {
            let projection = board.get(&worker.id).cloned().unwrap_or_default();
            rows.push(StatusRow {
                worker_id: worker.id.clone(),
                role: worker.role.clone(),
                agent: worker.agent_profile.clone(),
                branch: worker.branch.clone(),
                status: projection.status,
                dependencies: worker.dependencies.iter().cloned().collect(),
                unmet: graph.unmet_dependencies(&worker.id, &completed)?,
                alert: alerts.open_for(&worker.id).map(|alert| alert.severity),
                last_event_at: projection.last_event_at,
            });
        }

        Ok(StatusTable {
            session: Session::from_history(&history),
            rows,
            warnings: board.warning_count(),
        })
    }

    /// One controller pass
    pub async fn tick(&self) -> Result<TickReport> {
        Ok(self.controller.tick().await?)
    }

    /// One daemon pass
    pub async fn scan(&self) -> Result<ScanReport> {
        Ok(self.daemon.scan().await?)
    }

    pub fn deps_graph(&self) -> GraphSnapshot {
        self.workers.graph().snapshot()
    }

    pub fn deps_dot(&self) -> String {
        self.workers.graph().to_dot()
    }

    /// Whether `worker_id` may start given the COMPLETE workers in the log
    pub async fn deps_check(&self, worker_id: &str) -> Result<DepsCheck> {
        self.workers.require(worker_id)?;
        let history = history(self.log.as_ref(), EventFilter::All).await?;
        let completed = StatusBoard::from_history(self.workers.ids(), &history).completed();
        let unmet = self
            .workers
            .graph()
            .unmet_dependencies(worker_id, &completed)?;
        Ok(DepsCheck {
            worker_id: worker_id.to_string(),
            can_start: unmet.is_empty(),
            unmet,
        })
    }

    pub async fn complete(&self, worker_id: &str) -> Result<()> {
        Ok(self.controller.mark_complete(worker_id).await?)
    }

    pub async fn fail(&self, worker_id: &str, reason: &str) -> Result<()> {
        Ok(self.controller.mark_failed(worker_id, reason).await?)
    }

    pub async fn heartbeat(&self, worker_id: &str, note: Option<&str>) -> Result<()> {
        Ok(self.controller.record_activity(worker_id, note).await?)
    }

    /// Open alerts, oldest first
    pub async fn alerts(&self) -> Result<Vec<Alert>> {
        let history = history(self.log.as_ref(), EventFilter::All).await?;
        let mut alerts: Vec<Alert> = AlertBook::from_history(&history)
            .open_alerts()
            .cloned()
            .collect();
        alerts.sort_by(|a, b| a.detected_at.cmp(&b.detected_at));
        Ok(alerts)
    }

    pub async fn acknowledge_alert(&self, worker_id: &str) -> Result<bool> {
        Ok(self.daemon.acknowledge(worker_id).await?)
    }

    pub async fn session(&self) -> Result<Option<Session>> {
        let history = history(self.log.as_ref(), EventFilter::All).await?;
        Ok(Session::from_history(&history))
    }

    /// Working-tree summary of a worker's checkout
    pub async fn branch_status(&self, worker_id: &str) -> Result<String> {
        self.workers.require(worker_id)?;
        Ok(self.git.status(worker_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use czarina_core::event::MemoryEventLog;
    use czarina_core::orchestration::{RecordingSession, StaticGit};
    use czarina_core::worker::Worker;

    fn orchestrator() -> (Orchestrator, Arc<MemoryEventLog>) {
        let workers = WorkerSet::new(vec![
            Worker::new("a").unwrap(),
            Worker::builder("b").dependency("a").build().unwrap(),
        ])
        .unwrap();
        let log = Arc::new(MemoryEventLog::new());
        let orchestrator = Orchestrator::new(
            workers,
            ProfileRegistry::builtin().unwrap(),
            log.clone(),
            Arc::new(RecordingSession::new()),
            Arc::new(StaticGit::new("/tmp/worktrees")),
            ControllerSettings::default(),
            DaemonSettings {
                verify_delay_ms: 0,
                ..DaemonSettings::default()
            },
        );
        (orchestrator, log)
    }

    #[tokio::test]
    async fn test_status_before_any_tick() {
        let (orchestrator, _) = orchestrator();
        let table = orchestrator.status().await.unwrap();
        assert!(table.session.is_none());
        assert_eq!(table.status("a"), Some(WorkerStatus::Pending));
        assert_eq!(table.row("b").unwrap().unmet, vec!["a".to_string()]);
        assert!(table.to_string().contains("No session started"));
    }

    #[tokio::test]
    async fn test_deps_check_unknown_worker() {
        let (orchestrator, _) = orchestrator();
        assert!(orchestrator.deps_check("ghost").await.is_err());
        let check = orchestrator.deps_check("a").await.unwrap();
        assert!(check.can_start);
        assert!(check.unmet.is_empty());
    }

    #[tokio::test]
    async fn test_tick_then_complete_updates_table() {
        let (orchestrator, log) = orchestrator();
        assert_eq!(orchestrator.tick().await.unwrap().started, vec!["a"]);
        orchestrator.complete("a").await.unwrap();

        let table = orchestrator.status().await.unwrap();
        assert!(table.session.is_some());
        assert_eq!(table.status("a"), Some(WorkerStatus::Complete));
        assert!(table.row("b").unwrap().unmet.is_empty());
        assert!(log.len().await >= 4);
    }

    #[test]
    fn test_deps_graph_snapshot() {
        let (orchestrator, _) = orchestrator();
        let snapshot = orchestrator.deps_graph();
        assert_eq!(snapshot.nodes, vec!["a", "b"]);
        assert_eq!(snapshot.edges.len(), 1);
        assert!(orchestrator.deps_dot().contains("\"a\" -> \"b\""));
    }
}
