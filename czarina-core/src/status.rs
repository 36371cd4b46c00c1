//! Worker status projection
//!
//! Status is derived, never stored. [`project`] folds one worker's events
//! through the lifecycle state machine; [`StatusBoard`] does it for the whole
//! worker set from a canonical history. COMPLETE and FAILED are terminal:
//! anything after them is ignored and reported as an integrity warning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::warn;

use crate::event::{by_worker, Event, EventKind};

/// Derived lifecycle status of a worker
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Pending,
    Ready,
    Active,
    Blocked,
    Complete,
    Failed,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Pending => "PENDING",
            WorkerStatus::Ready => "READY",
            WorkerStatus::Active => "ACTIVE",
            WorkerStatus::Blocked => "BLOCKED",
            WorkerStatus::Complete => "COMPLETE",
            WorkerStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerStatus::Complete | WorkerStatus::Failed)
    }

    /// Running in a session (the daemon watches these)
    pub fn is_live(&self) -> bool {
        matches!(self, WorkerStatus::Active | WorkerStatus::Blocked)
    }

    /// Next status for `kind`, or `None` if the table has no such transition
    pub fn next(&self, kind: EventKind) -> Option<WorkerStatus> {
        use WorkerStatus::{Active, Blocked, Complete, Failed, Pending, Ready};
        match (self, kind) {
            (Pending, EventKind::WorkerReady) => Some(Ready),
            (Ready, EventKind::WorkerStart) => Some(Active),
            (Active, EventKind::TaskBlocked) => Some(Blocked),
            (Blocked, EventKind::DependenciesMet | EventKind::TaskUnblocked) => Some(Active),
            (Active, EventKind::WorkerComplete) => Some(Complete),
            (Active | Blocked, EventKind::WorkerFailed) => Some(Failed),
            _ => None,
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event the state machine could not apply
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrityWarning {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for IntegrityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} for worker '{}' at {} ignored in status {}",
            self.kind, self.worker_id, self.timestamp, self.status
        )
    }
}

/// Everything the fold learns about one worker
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerProjection {
    pub status: WorkerStatus,
    /// A WORKER_START was recorded, applied or not
    pub started: bool,
    /// Latest lifecycle or activity event; drives idle detection
    pub last_event_at: Option<DateTime<Utc>>,
    pub warnings: Vec<IntegrityWarning>,
}

impl Default for WorkerProjection {
    fn default() -> Self {
        Self {
            status: WorkerStatus::Pending,
            started: false,
            last_event_at: None,
            warnings: Vec::new(),
        }
    }
}

/// Fold one worker's canonical events into a projection
pub fn project_worker<'a, I>(worker_id: &str, events: I) -> WorkerProjection
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut projection = WorkerProjection::default();

    for event in events {
        if event.kind.is_worker_activity() {
            projection.last_event_at = Some(
                projection
                    .last_event_at
                    .map_or(event.timestamp, |last| last.max(event.timestamp)),
            );
        }
        if event.kind == EventKind::WorkerStart {
            projection.started = true;
        }
        if !event.kind.is_lifecycle() {
            continue;
        }
        match projection.status.next(event.kind) {
            Some(next) => projection.status = next,
            None => projection.warnings.push(IntegrityWarning {
                worker_id: worker_id.to_string(),
                status: projection.status,
                kind: event.kind,
                timestamp: event.timestamp,
            }),
        }
    }

    projection
}

/// Status of one worker from its canonical events
pub fn project<'a, I>(events: I) -> WorkerStatus
where
    I: IntoIterator<Item = &'a Event>,
{
    project_worker("", events).status
}

/// Projection of every configured worker
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    workers: BTreeMap<String, WorkerProjection>,
}

impl StatusBoard {
    /// Project `worker_ids` from a canonical history
    ///
    /// Events for ids outside the worker set are skipped.
    pub fn from_history<'a, I>(worker_ids: I, history: &[Event]) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        let grouped = by_worker(history);
        let workers = worker_ids
            .into_iter()
            .map(|id| {
                let projection = grouped
                    .get(id.as_str())
                    .map(|events| project_worker(id, events.iter().copied()))
                    .unwrap_or_default();
                for warning in &projection.warnings {
                    warn!(worker_id = %warning.worker_id, "Event log integrity: {}", warning);
                }
                (id.clone(), projection)
            })
            .collect();
        Self { workers }
    }

    pub fn get(&self, worker_id: &str) -> Option<&WorkerProjection> {
        self.workers.get(worker_id)
    }

    pub fn status(&self, worker_id: &str) -> Option<WorkerStatus> {
        self.workers.get(worker_id).map(|p| p.status)
    }

    pub fn statuses(&self) -> BTreeMap<String, WorkerStatus> {
        self.workers
            .iter()
            .map(|(id, p)| (id.clone(), p.status))
            .collect()
    }

    pub fn completed(&self) -> BTreeSet<String> {
        self.with_status(WorkerStatus::Complete)
    }

    pub fn with_status(&self, status: WorkerStatus) -> BTreeSet<String> {
        self.workers
            .iter()
            .filter(|(_, p)| p.status == status)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Every worker is COMPLETE or FAILED
    pub fn all_terminal(&self) -> bool {
        self.workers.values().all(|p| p.status.is_terminal())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &WorkerProjection)> {
        self.workers.iter()
    }

    pub fn warning_count(&self) -> usize {
        self.workers.values().map(|p| p.warnings.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind::*;
    use chrono::Duration;

    fn events(kinds: &[EventKind]) -> Vec<Event> {
        let t0 = Utc::now();
        kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| Event::for_worker("w", *kind).at(t0 + Duration::seconds(i as i64)))
            .collect()
    }

    #[test]
    fn test_no_events_is_pending() {
        assert_eq!(project(&Vec::<Event>::new()), WorkerStatus::Pending);
    }

    #[test]
    fn test_transition_table() {
        assert_eq!(project(&events(&[WorkerReady])), WorkerStatus::Ready);
        assert_eq!(
            project(&events(&[WorkerReady, WorkerStart])),
            WorkerStatus::Active
        );
        assert_eq!(
            project(&events(&[WorkerReady, WorkerStart, TaskBlocked])),
            WorkerStatus::Blocked
        );
        assert_eq!(
            project(&events(&[WorkerReady, WorkerStart, TaskBlocked, TaskUnblocked])),
            WorkerStatus::Active
        );
        assert_eq!(
            project(&events(&[WorkerReady, WorkerStart, TaskBlocked, DependenciesMet])),
            WorkerStatus::Active
        );
        assert_eq!(
            project(&events(&[WorkerReady, WorkerStart, WorkerComplete])),
            WorkerStatus::Complete
        );
        assert_eq!(
            project(&events(&[WorkerReady, WorkerStart, TaskBlocked, WorkerFailed])),
            WorkerStatus::Failed
        );
        assert_eq!(
            project(&events(&[WorkerReady, WorkerStart, WorkerFailed])),
            WorkerStatus::Failed
        );
    }

    #[test]
    fn test_terminal_status_ignores_later_events() {
        let history = events(&[
            WorkerReady,
            WorkerStart,
            WorkerComplete,
            WorkerStart,
            TaskBlocked,
            WorkerFailed,
        ]);
        let projection = project_worker("w", &history);
        assert_eq!(projection.status, WorkerStatus::Complete);
        assert_eq!(projection.warnings.len(), 3);
        assert_eq!(projection.warnings[0].kind, WorkerStart);
    }

    #[test]
    fn test_duplicate_start_is_a_warning_not_a_crash() {
        let history = events(&[WorkerReady, WorkerStart, WorkerStart]);
        let projection = project_worker("w", &history);
        assert_eq!(projection.status, WorkerStatus::Active);
        assert!(projection.started);
        assert_eq!(projection.warnings.len(), 1);
    }

    #[test]
    fn test_projection_is_idempotent() {
        let history = events(&[WorkerReady, WorkerStart, TaskBlocked, TaskUnblocked]);
        let first = project_worker("w", &history);
        let second = project_worker("w", &history);
        assert_eq!(first, second);

        let mut with_duplicate_terminal =
            events(&[WorkerReady, WorkerStart, WorkerComplete, WorkerComplete]);
        assert_eq!(project(&with_duplicate_terminal), WorkerStatus::Complete);
        with_duplicate_terminal.pop();
        assert_eq!(project(&with_duplicate_terminal), WorkerStatus::Complete);
    }

    #[test]
    fn test_non_lifecycle_events_only_touch_activity() {
        let history = events(&[WorkerReady, WorkerStart, WorkerActivity, CorrectiveAction, Alert]);
        let projection = project_worker("w", &history);
        assert_eq!(projection.status, WorkerStatus::Active);
        assert!(projection.warnings.is_empty());
        assert_eq!(projection.last_event_at, Some(history[2].timestamp));
    }

    #[test]
    fn test_daemon_events_do_not_refresh_activity() {
        let history = events(&[WorkerReady, WorkerStart, Alert, CorrectiveAction, AlertCleared]);
        let projection = project_worker("w", &history);
        assert_eq!(projection.last_event_at, Some(history[1].timestamp));
    }

    #[test]
    fn test_status_board_over_mixed_history() {
        let t0 = Utc::now();
        let history = vec![
            Event::orchestration(SessionStart).at(t0),
            Event::for_worker("a", WorkerReady).at(t0),
            Event::for_worker("a", WorkerStart).at(t0),
            Event::for_worker("a", WorkerComplete).at(t0 + Duration::seconds(5)),
            Event::for_worker("b", WorkerReady).at(t0 + Duration::seconds(6)),
            Event::for_worker("stranger", WorkerReady).at(t0),
        ];
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let board = StatusBoard::from_history(&ids, &history);

        assert_eq!(board.status("a"), Some(WorkerStatus::Complete));
        assert_eq!(board.status("b"), Some(WorkerStatus::Ready));
        assert_eq!(board.status("c"), Some(WorkerStatus::Pending));
        assert_eq!(board.status("stranger"), None);
        assert_eq!(board.completed().len(), 1);
        assert!(!board.all_terminal());
    }
}
