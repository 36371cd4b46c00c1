//! Orchestration session projected from `SESSION_*` events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::event::{keys, Event, EventKind};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Running,
    Complete,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Running => write!(f, "RUNNING"),
            SessionStatus::Complete => write!(f, "COMPLETE"),
        }
    }
}

/// One orchestration run grouping the workers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Start a fresh session with a generated id
    pub fn start() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            status: SessionStatus::Running,
            completed_at: None,
        }
    }

    pub fn start_event(&self) -> Event {
        Event::orchestration(EventKind::SessionStart)
            .at(self.started_at)
            .with_meta(keys::SESSION_ID, self.id.clone())
    }

    pub fn complete_event(&self) -> Event {
        Event::orchestration(EventKind::SessionComplete).with_meta(keys::SESSION_ID, self.id.clone())
    }

    pub fn is_complete(&self) -> bool {
        self.status == SessionStatus::Complete
    }

    /// Replay the session from a canonical history
    ///
    /// The first `SESSION_START` defines the session; later starts are
    /// ignored so a resumed run keeps its id.
    pub fn from_history(history: &[Event]) -> Option<Self> {
        let mut session: Option<Session> = None;
        for event in history {
            match (event.kind, session.as_mut()) {
                (EventKind::SessionStart, None) => {
                    session = Some(Session {
                        id: event
                            .meta(keys::SESSION_ID)
                            .map(str::to_string)
                            .unwrap_or_else(|| event.timestamp.to_rfc3339()),
                        started_at: event.timestamp,
                        status: SessionStatus::Running,
                        completed_at: None,
                    });
                }
                (EventKind::SessionComplete, Some(current)) if !current.is_complete() => {
                    current.status = SessionStatus::Complete;
                    current.completed_at = Some(event.timestamp);
                }
                _ => {}
            }
        }
        session
    }
}
