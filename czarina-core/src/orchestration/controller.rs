//! Lifecycle controller
//!
//! Each tick replays the log, projects every worker's status and starts the
//! workers whose dependencies are all COMPLETE. A worker that has a
//! `WORKER_START` anywhere in the log is never started again, and FAILED
//! workers are never retried, so their dependents wait until an operator
//! intervenes.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::collaborators::{GitCollaborator, SessionCollaborator};
use super::settings::ControllerSettings;
use super::WorkerSet;
use crate::event::{history, keys, Event, EventFilter, EventKind, EventLog};
use crate::profile::ProfileRegistry;
use crate::session::Session;
use crate::status::{project, StatusBoard, WorkerStatus};
use crate::worker::Worker;
use crate::{Error, Result};

/// An ACTIVE worker with no recent events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdleWorker {
    pub worker_id: String,
    pub idle_secs: i64,
}

/// Outcome of one controller tick
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TickReport {
    /// Workers that got a `WORKER_START` this tick
    pub started: Vec<String>,
    /// Started workers whose launch failed and were marked FAILED
    pub failed_to_launch: Vec<String>,
    /// Candidates for the approval daemon
    pub idle: Vec<IdleWorker>,
    pub session_complete: bool,
}

pub struct LifecycleController {
    workers: Arc<WorkerSet>,
    profiles: Arc<ProfileRegistry>,
    log: Arc<dyn EventLog>,
    session: Arc<dyn SessionCollaborator>,
    git: Arc<dyn GitCollaborator>,
    settings: ControllerSettings,
}

impl LifecycleController {
    pub fn new(
        workers: Arc<WorkerSet>,
        profiles: Arc<ProfileRegistry>,
        log: Arc<dyn EventLog>,
        session: Arc<dyn SessionCollaborator>,
        git: Arc<dyn GitCollaborator>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            workers,
            profiles,
            log,
            session,
            git,
            settings,
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Run one scheduling pass
    ///
    /// Any append failure aborts the tick; the next tick replays and retries.
    pub async fn tick(&self) -> Result<TickReport> {
        let history = history(self.log.as_ref(), EventFilter::All).await?;
        let mut report = TickReport::default();

        let session = match Session::from_history(&history) {
            Some(session) => session,
            None => {
                let session = Session::start();
                self.log.append(session.start_event()).await?;
                info!("Started orchestration session {}", session.id);
                session
            }
        };

        let board = StatusBoard::from_history(self.workers.ids(), &history);
        let completed = board.completed();
        let now = Utc::now();

        for worker in self.workers.iter() {
            let Some(projection) = board.get(&worker.id) else {
                continue;
            };
            match projection.status {
                WorkerStatus::Pending | WorkerStatus::Ready => {
                    if projection.started {
                        debug!(worker_id = %worker.id, "Already started once, not starting again");
                        continue;
                    }
                    if !self.workers.graph().can_start(&worker.id, &completed) {
                        debug!(worker_id = %worker.id, "Waiting on dependencies");
                        continue;
                    }
                    let launched = self.start_worker(worker, projection.status).await?;
                    report.started.push(worker.id.clone());
                    if !launched {
                        report.failed_to_launch.push(worker.id.clone());
                    }
                }
                WorkerStatus::Active => {
                    if let Some(last) = projection.last_event_at {
                        let idle_for = now - last;
                        if idle_for > self.settings.idle_threshold() {
                            debug!(worker_id = %worker.id, "Idle for {}s", idle_for.num_seconds());
                            report.idle.push(IdleWorker {
                                worker_id: worker.id.clone(),
                                idle_secs: idle_for.num_seconds(),
                            });
                        }
                    }
                }
                WorkerStatus::Blocked | WorkerStatus::Complete | WorkerStatus::Failed => {}
            }
        }

        if report.started.is_empty() && board.all_terminal() {
            if !session.is_complete() {
                self.log.append(session.complete_event()).await?;
                info!(
                    "Session {} complete: {} workers done, {} failed",
                    session.id,
                    board.with_status(WorkerStatus::Complete).len(),
                    board.with_status(WorkerStatus::Failed).len()
                );
            }
            report.session_complete = true;
        }

        Ok(report)
    }

    /// Append the start events and launch the agent
    ///
    /// Returns `false` when the launch failed and the worker was marked FAILED.
    async fn start_worker(&self, worker: &Worker, status: WorkerStatus) -> Result<bool> {
        let profile = self.profiles.get(&worker.agent_profile)?;

        if status == WorkerStatus::Pending {
            self.log
                .append(Event::for_worker(worker.id.clone(), EventKind::WorkerReady))
                .await?;
        }
        self.log
            .append(
                Event::for_worker(worker.id.clone(), EventKind::WorkerStart)
                    .with_meta(keys::BRANCH, worker.branch.clone())
                    .with_meta(keys::AGENT, worker.agent_profile.clone()),
            )
            .await?;

        let launch = async {
            self.git.create_branch(worker).await?;
            let branch = self.git.branch_for(&worker.id).await?;
            self.session.launch(worker, &branch, profile).await?;
            Ok::<_, Error>(branch)
        };

        match launch.await {
            Ok(branch) => {
                info!(
                    worker_id = %worker.id,
                    "Started worker on branch {} in {}",
                    branch.name,
                    branch.path.display()
                );
                Ok(true)
            }
            Err(e) => {
                warn!(worker_id = %worker.id, "Failed to launch worker: {}", e);
                self.log
                    .append(
                        Event::for_worker(worker.id.clone(), EventKind::WorkerFailed)
                            .with_meta(keys::REASON, format!("launch failed: {}", e)),
                    )
                    .await?;
                Ok(false)
            }
        }
    }

    /// Record that a worker finished its task
    pub async fn mark_complete(&self, worker_id: &str) -> Result<()> {
        let event = Event::for_worker(worker_id, EventKind::WorkerComplete);
        self.append_transition(worker_id, event).await?;
        info!(worker_id = %worker_id, "Worker complete");
        Ok(())
    }

    /// Record that a worker gave up; dependents will not start
    pub async fn mark_failed(&self, worker_id: &str, reason: &str) -> Result<()> {
        let event =
            Event::for_worker(worker_id, EventKind::WorkerFailed).with_meta(keys::REASON, reason);
        self.append_transition(worker_id, event).await?;
        warn!(worker_id = %worker_id, "Worker failed: {}", reason);
        Ok(())
    }

    /// Record a heartbeat for an ACTIVE or BLOCKED worker
    pub async fn record_activity(&self, worker_id: &str, note: Option<&str>) -> Result<()> {
        self.workers.require(worker_id)?;
        let status = self.current_status(worker_id).await?;
        if !status.is_live() {
            return Err(Error::validation(format!(
                "Worker '{}' is {} and cannot report activity",
                worker_id, status
            )));
        }
        let mut event = Event::for_worker(worker_id, EventKind::WorkerActivity);
        if let Some(note) = note {
            event = event.with_meta(keys::DESCRIPTION, note);
        }
        self.log.append(event).await
    }

    async fn append_transition(&self, worker_id: &str, event: Event) -> Result<()> {
        self.workers.require(worker_id)?;
        let status = self.current_status(worker_id).await?;
        if status.next(event.kind).is_none() {
            return Err(Error::validation(format!(
                "Worker '{}' cannot record {} while {}",
                worker_id, event.kind, status
            )));
        }
        self.log.append(event).await
    }

    async fn current_status(&self, worker_id: &str) -> Result<WorkerStatus> {
        let events = history(self.log.as_ref(), EventFilter::worker(worker_id)).await?;
        Ok(project(&events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MemoryEventLog;
    use crate::orchestration::collaborators::{RecordingSession, StaticGit};

    struct Fixture {
        controller: LifecycleController,
        log: Arc<MemoryEventLog>,
        session: Arc<RecordingSession>,
    }

    fn fixture(workers: Vec<Worker>, session: RecordingSession) -> Fixture {
        let log = Arc::new(MemoryEventLog::new());
        let session = Arc::new(session);
        let controller = LifecycleController::new(
            Arc::new(WorkerSet::new(workers).unwrap()),
            Arc::new(ProfileRegistry::builtin().unwrap()),
            log.clone(),
            session.clone(),
            Arc::new(StaticGit::new("/tmp/worktrees")),
            ControllerSettings::default(),
        );
        Fixture {
            controller,
            log,
            session,
        }
    }

    fn chain() -> Vec<Worker> {
        vec![
            Worker::builder("a").build().unwrap(),
            Worker::builder("b").dependency("a").build().unwrap(),
        ]
    }

    async fn statuses(log: &MemoryEventLog, ids: &[String]) -> Vec<WorkerStatus> {
        let history = history(log, EventFilter::All).await.unwrap();
        let board = StatusBoard::from_history(ids, &history);
        ids.iter().filter_map(|id| board.status(id)).collect()
    }

    #[tokio::test]
    async fn test_tick_starts_only_ready_roots() {
        let f = fixture(chain(), RecordingSession::new());
        let report = f.controller.tick().await.unwrap();
        assert_eq!(report.started, vec!["a".to_string()]);
        assert!(!report.session_complete);
        assert_eq!(f.session.launched().await, vec!["a".to_string()]);

        let ids = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            statuses(&f.log, &ids).await,
            vec![WorkerStatus::Active, WorkerStatus::Pending]
        );

        let events = f.log.snapshot().await;
        assert_eq!(events[0].kind, EventKind::SessionStart);
        let start = events
            .iter()
            .find(|e| e.kind == EventKind::WorkerStart)
            .unwrap();
        assert_eq!(start.meta(keys::BRANCH), Some("czarina/a"));
    }

    #[tokio::test]
    async fn test_tick_is_idempotent_for_started_workers() {
        let f = fixture(chain(), RecordingSession::new());
        f.controller.tick().await.unwrap();
        let second = f.controller.tick().await.unwrap();
        assert!(second.started.is_empty());
        assert_eq!(f.session.launched().await.len(), 1);

        let starts = f
            .log
            .snapshot()
            .await
            .iter()
            .filter(|e| e.kind == EventKind::WorkerStart)
            .count();
        assert_eq!(starts, 1);
    }

    #[tokio::test]
    async fn test_failed_start_append_launches_nothing_and_retries() {
        let f = fixture(chain(), RecordingSession::new());
        f.log.fail_next_append(EventKind::WorkerStart).await;

        assert!(f.controller.tick().await.is_err());
        assert!(f.session.launched().await.is_empty());
        let ids = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            statuses(&f.log, &ids).await,
            vec![WorkerStatus::Ready, WorkerStatus::Pending]
        );

        let report = f.controller.tick().await.unwrap();
        assert_eq!(report.started, vec!["a".to_string()]);
        assert_eq!(f.session.launched().await, vec!["a".to_string()]);
        assert!(f.controller.tick().await.unwrap().started.is_empty());
        assert_eq!(f.session.launched().await.len(), 1);
    }

    #[tokio::test]
    async fn test_dependent_starts_after_completion_and_session_completes() {
        let f = fixture(chain(), RecordingSession::new());
        f.controller.tick().await.unwrap();
        f.controller.mark_complete("a").await.unwrap();

        let report = f.controller.tick().await.unwrap();
        assert_eq!(report.started, vec!["b".to_string()]);

        f.controller.mark_complete("b").await.unwrap();
        let report = f.controller.tick().await.unwrap();
        assert!(report.session_complete);

        let completes = f
            .log
            .snapshot()
            .await
            .iter()
            .filter(|e| e.kind == EventKind::SessionComplete)
            .count();
        assert_eq!(completes, 1);

        f.controller.tick().await.unwrap();
        let completes = f
            .log
            .snapshot()
            .await
            .iter()
            .filter(|e| e.kind == EventKind::SessionComplete)
            .count();
        assert_eq!(completes, 1);
    }

    #[tokio::test]
    async fn test_failed_worker_blocks_dependents_forever() {
        let f = fixture(chain(), RecordingSession::new());
        f.controller.tick().await.unwrap();
        f.controller.mark_failed("a", "tests red").await.unwrap();

        for _ in 0..3 {
            let report = f.controller.tick().await.unwrap();
            assert!(report.started.is_empty());
            assert!(!report.session_complete);
        }
        assert_eq!(f.session.launched().await, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_launch_failure_marks_worker_failed() {
        let f = fixture(chain(), RecordingSession::new().failing_launch("a"));
        let report = f.controller.tick().await.unwrap();
        assert_eq!(report.started, vec!["a".to_string()]);
        assert_eq!(report.failed_to_launch, vec!["a".to_string()]);

        let ids = vec!["a".to_string()];
        assert_eq!(statuses(&f.log, &ids).await, vec![WorkerStatus::Failed]);

        let again = f.controller.tick().await.unwrap();
        assert!(again.started.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_reports_are_rejected() {
        let f = fixture(chain(), RecordingSession::new());
        let err = f.controller.mark_complete("b").await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(f.controller.mark_complete("ghost").await.is_err());
        assert!(f.controller.record_activity("a", None).await.is_err());

        f.controller.tick().await.unwrap();
        f.controller
            .record_activity("a", Some("running tests"))
            .await
            .unwrap();
        f.controller.mark_complete("a").await.unwrap();
        assert!(f.controller.mark_failed("a", "late").await.is_err());
    }

    #[tokio::test]
    async fn test_idle_active_workers_are_reported() {
        let log = Arc::new(MemoryEventLog::with_events(vec![
            Event::for_worker("a", EventKind::WorkerReady).at(Utc::now() - chrono::Duration::hours(2)),
            Event::for_worker("a", EventKind::WorkerStart).at(Utc::now() - chrono::Duration::hours(2)),
        ]));
        let controller = LifecycleController::new(
            Arc::new(WorkerSet::new(chain()).unwrap()),
            Arc::new(ProfileRegistry::builtin().unwrap()),
            log.clone(),
            Arc::new(RecordingSession::new()),
            Arc::new(StaticGit::new("/tmp/worktrees")),
            ControllerSettings::default(),
        );

        let report = controller.tick().await.unwrap();
        assert!(report.started.is_empty());
        assert_eq!(report.idle.len(), 1);
        assert_eq!(report.idle[0].worker_id, "a");
        assert!(report.idle[0].idle_secs >= 7200);

        log.append(Event::for_worker("a", EventKind::CorrectiveAction))
            .await
            .unwrap();
        log.append(Event::for_worker("a", EventKind::Alert)).await.unwrap();
        let report = controller.tick().await.unwrap();
        assert_eq!(report.idle.len(), 1);

        controller.record_activity("a", None).await.unwrap();
        let report = controller.tick().await.unwrap();
        assert!(report.idle.is_empty());
    }
}
