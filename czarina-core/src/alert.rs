//! Alerts raised by the approval daemon
//!
//! Alerts live in the event log like everything else. An `ALERT` event opens
//! one for a worker, `ALERT_CLEARED` closes whatever is open for that worker.
//! [`AlertBook`] replays both to answer "what is open" and "has this prompt
//! failed before", which is how severity escalation survives restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::event::{keys, Event, EventKind};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    High,
    Medium,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::High => "high",
            AlertSeverity::Medium => "medium",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "high" => Some(AlertSeverity::High),
            "medium" => Some(AlertSeverity::Medium),
            _ => None,
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stalled worker that needs attention
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub worker_id: String,
    pub severity: AlertSeverity,
    pub detected_at: DateTime<Utc>,
    pub description: String,
    /// Name of the prompt pattern that matched, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl Alert {
    pub fn new<W, D>(worker_id: W, severity: AlertSeverity, description: D) -> Self
    where
        W: Into<String>,
        D: Into<String>,
    {
        Self {
            worker_id: worker_id.into(),
            severity,
            detected_at: Utc::now(),
            description: description.into(),
            pattern: None,
        }
    }

    pub fn with_pattern<S: Into<String>>(mut self, pattern: S) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// The `ALERT` event recording this alert
    pub fn to_event(&self) -> Event {
        let mut event = Event::for_worker(self.worker_id.clone(), EventKind::Alert)
            .at(self.detected_at)
            .with_meta(keys::SEVERITY, self.severity.as_str())
            .with_meta(keys::DESCRIPTION, self.description.clone());
        if let Some(pattern) = &self.pattern {
            event = event.with_meta(keys::PATTERN, pattern.clone());
        }
        event
    }

    /// Rebuild an alert from its event; `None` for other kinds
    pub fn from_event(event: &Event) -> Option<Self> {
        if event.kind != EventKind::Alert {
            return None;
        }
        let worker_id = event.worker_id.clone()?;
        let severity = event
            .meta(keys::SEVERITY)
            .and_then(AlertSeverity::parse)
            .unwrap_or(AlertSeverity::High);
        Some(Self {
            worker_id,
            severity,
            detected_at: event.timestamp,
            description: event.meta(keys::DESCRIPTION).unwrap_or_default().to_string(),
            pattern: event.meta(keys::PATTERN).map(str::to_string),
        })
    }
}

/// Open alerts and failure counts replayed from a canonical history
#[derive(Debug, Clone, Default)]
pub struct AlertBook {
    open: BTreeMap<String, Alert>,
    failures: HashMap<(String, String), usize>,
}

impl AlertBook {
    pub fn from_history(history: &[Event]) -> Self {
        let mut book = Self::default();
        for event in history {
            book.record(event);
        }
        book
    }

    /// Fold one more event into the book
    pub fn record(&mut self, event: &Event) {
        match event.kind {
            EventKind::Alert => {
                if let Some(alert) = Alert::from_event(event) {
                    if let Some(pattern) = &alert.pattern {
                        *self
                            .failures
                            .entry((alert.worker_id.clone(), pattern.clone()))
                            .or_default() += 1;
                    }
                    self.open.insert(alert.worker_id.clone(), alert);
                }
            }
            EventKind::AlertCleared => {
                if let Some(worker_id) = &event.worker_id {
                    self.open.remove(worker_id);
                }
            }
            _ => {}
        }
    }

    /// Most recent open alert per worker, ordered by worker id
    pub fn open_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.open.values()
    }

    pub fn open_for(&self, worker_id: &str) -> Option<&Alert> {
        self.open.get(worker_id)
    }

    pub fn has_open(&self, worker_id: &str) -> bool {
        self.open.contains_key(worker_id)
    }

    /// How many alerts this (worker, pattern) pair has raised so far
    pub fn failure_count(&self, worker_id: &str, pattern: &str) -> usize {
        self.failures
            .get(&(worker_id.to_string(), pattern.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}
