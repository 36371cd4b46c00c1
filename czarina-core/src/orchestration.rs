//! Orchestration engine
//!
//! Two independent periodic loops drive a run:
//!
//! ```text
//! config.json ──> WorkerSet (validated, acyclic)
//!                     │
//!       ┌─────────────┴─────────────┐
//!       v                           v
//! LifecycleController         ApprovalDaemon
//!  (tick: start workers)       (scan: answer prompts)
//!       │                           │
//!       └──────────> EventLog <─────┘
//! ```
//!
//! The loops share no memory. Each cycle replays the event log, projects the
//! current state and appends what it decided. Each event kind has exactly one
//! writer: the controller owns `SESSION_*`, `WORKER_READY`, `WORKER_START`,
//! `WORKER_ACTIVITY`, `WORKER_COMPLETE` and `WORKER_FAILED`; the daemon owns
//! `TASK_BLOCKED`, `TASK_UNBLOCKED`, `CORRECTIVE_ACTION`, `ALERT` and
//! `ALERT_CLEARED`.

pub mod collaborators;
pub mod controller;
pub mod daemon;
pub mod settings;

use std::collections::BTreeMap;

use crate::graph::DependencyGraph;
use crate::profile::ProfileRegistry;
use crate::worker::Worker;
use crate::{Error, Result};

pub use collaborators::{
    BranchRef, GitCollaborator, RecordingSession, SessionCollaborator, StaticGit,
};
pub use controller::{IdleWorker, LifecycleController, TickReport};
pub use daemon::{ApprovalDaemon, Decision, ScanReport};
pub use settings::{ControllerSettings, DaemonSettings};

/// The configured workers together with their validated dependency graph
#[derive(Debug, Clone)]
pub struct WorkerSet {
    workers: BTreeMap<String, Worker>,
    graph: DependencyGraph,
}

impl WorkerSet {
    /// Normalize descriptors and build the graph
    ///
    /// Fails on invalid ids, duplicates, unknown dependencies and cycles.
    pub fn new(workers: Vec<Worker>) -> Result<Self> {
        let workers = workers
            .into_iter()
            .map(Worker::normalize)
            .collect::<Result<Vec<_>>>()?;
        let graph = DependencyGraph::build(&workers)?;
        let workers = workers.into_iter().map(|w| (w.id.clone(), w)).collect();
        Ok(Self { workers, graph })
    }

    /// Like [`WorkerSet::new`], also requiring every agent profile to exist
    pub fn with_profiles(workers: Vec<Worker>, profiles: &ProfileRegistry) -> Result<Self> {
        let set = Self::new(workers)?;
        for worker in set.workers.values() {
            profiles.get(&worker.agent_profile)?;
        }
        Ok(set)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn get(&self, worker_id: &str) -> Option<&Worker> {
        self.workers.get(worker_id)
    }

    pub fn require(&self, worker_id: &str) -> Result<&Worker> {
        self.get(worker_id)
            .ok_or_else(|| Error::unknown_worker(worker_id))
    }

    /// Worker ids in declaration order
    pub fn ids(&self) -> &[String] {
        self.graph.worker_ids()
    }

    /// Workers in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Worker> {
        self.ids().iter().filter_map(|id| self.workers.get(id))
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_set_keeps_declaration_order() {
        let set = WorkerSet::new(vec![
            Worker::builder("zeta").build().unwrap(),
            Worker::builder("alpha").dependency("zeta").build().unwrap(),
        ])
        .unwrap();
        let ids: Vec<&str> = set.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);
        assert!(set.require("ghost").is_err());
    }

    #[test]
    fn test_worker_set_rejects_unknown_profile() {
        let profiles = ProfileRegistry::builtin().unwrap();
        let workers = vec![Worker::builder("a").agent_profile("cursor").build().unwrap()];
        let err = WorkerSet::with_profiles(workers, &profiles).unwrap_err();
        assert!(matches!(err, Error::ProfileNotFound { .. }));
    }

    #[test]
    fn test_worker_set_rejects_cycles() {
        let workers = vec![
            Worker::builder("a").dependency("b").build().unwrap(),
            Worker::builder("b").dependency("a").build().unwrap(),
        ];
        assert!(matches!(
            WorkerSet::new(workers),
            Err(Error::CycleDetected { .. })
        ));
    }
}
