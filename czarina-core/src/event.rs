//! Append-only event model
//!
//! Every lifecycle fact is an [`Event`]; current state is never stored, it is
//! projected from the history (see [`crate::status`]). The [`EventLog`] trait
//! is the only shared mutable resource between the lifecycle controller and
//! the approval daemon.
//!
//! Canonical order is timestamp order with ties broken by append order.
//! [`history`] applies that order to whatever sequence a log returns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::RwLock;

use crate::Result;

/// Metadata keys shared by the writers and readers of the log
pub mod keys {
    pub const BRANCH: &str = "branch";
    pub const AGENT: &str = "agent";
    pub const REASON: &str = "reason";
    pub const PATTERN: &str = "pattern";
    pub const RESPONSE: &str = "response";
    pub const SEVERITY: &str = "severity";
    pub const DESCRIPTION: &str = "description";
    pub const OUTPUT_DIGEST: &str = "output_digest";
    pub const SESSION_ID: &str = "session_id";
    pub const ACKNOWLEDGED: &str = "acknowledged";
}

/// Kind of lifecycle fact
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    SessionStart,
    SessionComplete,
    WorkerReady,
    WorkerStart,
    WorkerActivity,
    TaskBlocked,
    DependenciesMet,
    #[serde(alias = "UNBLOCKED")]
    TaskUnblocked,
    WorkerComplete,
    WorkerFailed,
    CorrectiveAction,
    Alert,
    AlertCleared,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionStart => "SESSION_START",
            EventKind::SessionComplete => "SESSION_COMPLETE",
            EventKind::WorkerReady => "WORKER_READY",
            EventKind::WorkerStart => "WORKER_START",
            EventKind::WorkerActivity => "WORKER_ACTIVITY",
            EventKind::TaskBlocked => "TASK_BLOCKED",
            EventKind::DependenciesMet => "DEPENDENCIES_MET",
            EventKind::TaskUnblocked => "TASK_UNBLOCKED",
            EventKind::WorkerComplete => "WORKER_COMPLETE",
            EventKind::WorkerFailed => "WORKER_FAILED",
            EventKind::CorrectiveAction => "CORRECTIVE_ACTION",
            EventKind::Alert => "ALERT",
            EventKind::AlertCleared => "ALERT_CLEARED",
        }
    }

    /// Kinds that drive the worker status state machine
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            EventKind::WorkerReady
                | EventKind::WorkerStart
                | EventKind::TaskBlocked
                | EventKind::DependenciesMet
                | EventKind::TaskUnblocked
                | EventKind::WorkerComplete
                | EventKind::WorkerFailed
        )
    }

    /// Kinds that show the worker itself moving; daemon alerts and
    /// responses do not count
    pub fn is_worker_activity(&self) -> bool {
        self.is_lifecycle() || *self == EventKind::WorkerActivity
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable fact, appended once
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub worker_id: Option<String>,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Event {
    /// Event about one worker, stamped now
    pub fn for_worker<S: Into<String>>(worker_id: S, kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            worker_id: Some(worker_id.into()),
            kind,
            metadata: BTreeMap::new(),
        }
    }

    /// Orchestration-wide event, stamped now
    pub fn orchestration(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            worker_id: None,
            kind,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn is_for(&self, worker_id: &str) -> bool {
        self.worker_id.as_deref() == Some(worker_id)
    }
}

/// Which events a read should yield
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EventFilter {
    #[default]
    All,
    Worker(String),
}

impl EventFilter {
    pub fn worker<S: Into<String>>(worker_id: S) -> Self {
        EventFilter::Worker(worker_id.into())
    }

    pub fn matches(&self, event: &Event) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Worker(id) => event.is_for(id),
        }
    }
}

/// Lazy sequence of events; a fresh one is produced by every `read`
pub type EventStream = BoxStream<'static, Result<Event>>;

/// Append-only, durable event storage
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Write one complete record; returns once it is durable
    async fn append(&self, event: Event) -> Result<()>;

    /// Start a new read over the log in append order
    async fn read(&self, filter: EventFilter) -> Result<EventStream>;
}

/// Collect a read into canonical order (timestamp, then append order)
pub async fn history(log: &dyn EventLog, filter: EventFilter) -> Result<Vec<Event>> {
    let mut events: Vec<Event> = log.read(filter).await?.try_collect().await?;
    canonical_order(&mut events);
    Ok(events)
}

/// Stable sort by timestamp so equal timestamps keep append order
pub fn canonical_order(events: &mut [Event]) {
    events.sort_by_key(|event| event.timestamp);
}

/// Group a canonical history per worker, preserving order
pub fn by_worker(events: &[Event]) -> BTreeMap<&str, Vec<&Event>> {
    let mut grouped: BTreeMap<&str, Vec<&Event>> = BTreeMap::new();
    for event in events {
        if let Some(worker_id) = event.worker_id.as_deref() {
            grouped.entry(worker_id).or_default().push(event);
        }
    }
    grouped
}

/// In-memory event log, used by tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: RwLock<Vec<Event>>,
    fail_next: RwLock<Option<EventKind>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<Event>) -> Self {
        Self {
            events: RwLock::new(events),
            fail_next: RwLock::new(None),
        }
    }

    /// Make the next append of `kind` fail as if the disk were full
    ///
    /// The failure fires once; later appends succeed.
    pub async fn fail_next_append(&self, kind: EventKind) {
        *self.fail_next.write().await = Some(kind);
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    /// Copy of every record in append order
    pub async fn snapshot(&self) -> Vec<Event> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event: Event) -> Result<()> {
        {
            let mut fail_next = self.fail_next.write().await;
            if *fail_next == Some(event.kind) {
                *fail_next = None;
                return Err(crate::Error::event_log(format!(
                    "No space left on device writing {}",
                    event.kind
                )));
            }
        }
        self.events.write().await.push(event);
        Ok(())
    }

    async fn read(&self, filter: EventFilter) -> Result<EventStream> {
        let snapshot: Vec<Result<Event>> = self
            .events
            .read()
            .await
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .map(Ok)
            .collect();
        Ok(Box::pin(stream::iter(snapshot)))
    }
}
