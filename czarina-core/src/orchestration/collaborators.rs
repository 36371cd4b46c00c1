//! Interfaces to the terminal multiplexer and version control
//!
//! The engine never talks to tmux or git directly. It drives these traits,
//! and the server crate provides the process-backed implementations. The
//! in-memory implementations here record every call for dry runs and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::profile::AgentProfile;
use crate::worker::Worker;
use crate::{Error, Result};

/// A worker's branch and the checkout it runs in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRef {
    pub name: String,
    pub path: PathBuf,
}

/// Terminal sessions hosting the agents
#[async_trait]
pub trait SessionCollaborator: Send + Sync {
    /// Open the worker's terminal in `branch` and start the agent
    async fn launch(&self, worker: &Worker, branch: &BranchRef, profile: &AgentProfile)
        -> Result<()>;

    /// Type `text` into the worker's terminal
    async fn send_text(&self, worker_id: &str, text: &str) -> Result<()>;

    /// Current visible output of the worker's terminal
    async fn capture_output(&self, worker_id: &str) -> Result<String>;
}

/// Branch and worktree mechanics
#[async_trait]
pub trait GitCollaborator: Send + Sync {
    async fn create_branch(&self, worker: &Worker) -> Result<()>;

    async fn branch_for(&self, worker_id: &str) -> Result<BranchRef>;

    /// Short working-tree status of the worker's checkout
    async fn status(&self, worker_id: &str) -> Result<String>;
}

/// Session collaborator that plays back scripted output and records input
///
/// Each worker has a queue of captures; the last one repeats once the queue
/// is drained, like a terminal nobody is typing into.
#[derive(Debug, Default)]
pub struct RecordingSession {
    captures: Mutex<HashMap<String, VecDeque<String>>>,
    sent: Mutex<Vec<(String, String)>>,
    launched: Mutex<Vec<String>>,
    failing_launches: HashSet<String>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `launch` fail for `worker_id`
    pub fn failing_launch<S: Into<String>>(mut self, worker_id: S) -> Self {
        self.failing_launches.insert(worker_id.into());
        self
    }

    /// Queue the captures `worker_id` will show, in order
    pub async fn script<S, I>(&self, worker_id: S, outputs: I)
    where
        S: Into<String>,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.captures
            .lock()
            .await
            .insert(worker_id.into(), outputs.into_iter().map(Into::into).collect());
    }

    /// Every `send_text` call as (worker, text)
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }

    pub async fn send_count(&self, worker_id: &str) -> usize {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(id, _)| id == worker_id)
            .count()
    }

    pub async fn launched(&self) -> Vec<String> {
        self.launched.lock().await.clone()
    }
}

#[async_trait]
impl SessionCollaborator for RecordingSession {
    async fn launch(
        &self,
        worker: &Worker,
        _branch: &BranchRef,
        _profile: &AgentProfile,
    ) -> Result<()> {
        if self.failing_launches.contains(&worker.id) {
            return Err(Error::collaborator("launch", format!("no terminal for {}", worker.id)));
        }
        self.launched.lock().await.push(worker.id.clone());
        Ok(())
    }

    async fn send_text(&self, worker_id: &str, text: &str) -> Result<()> {
        self.sent
            .lock()
            .await
            .push((worker_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn capture_output(&self, worker_id: &str) -> Result<String> {
        let mut captures = self.captures.lock().await;
        let Some(queue) = captures.get_mut(worker_id) else {
            return Ok(String::new());
        };
        let output = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(output.unwrap_or_default())
    }
}

/// Git collaborator that only records which branches were created
#[derive(Debug)]
pub struct StaticGit {
    root: PathBuf,
    branches: Mutex<HashMap<String, String>>,
}

impl StaticGit {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            branches: Mutex::new(HashMap::new()),
        }
    }

    pub async fn created(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.branches.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl GitCollaborator for StaticGit {
    async fn create_branch(&self, worker: &Worker) -> Result<()> {
        self.branches
            .lock()
            .await
            .insert(worker.id.clone(), worker.branch.clone());
        Ok(())
    }

    async fn branch_for(&self, worker_id: &str) -> Result<BranchRef> {
        let branches = self.branches.lock().await;
        let name = branches
            .get(worker_id)
            .cloned()
            .ok_or_else(|| Error::collaborator("branch_for", format!("no branch for {}", worker_id)))?;
        Ok(BranchRef {
            name,
            path: self.root.join(worker_id),
        })
    }

    async fn status(&self, worker_id: &str) -> Result<String> {
        self.branch_for(worker_id).await.map(|_| String::new())
    }
}
