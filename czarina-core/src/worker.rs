//! Worker descriptor model
//!
//! A worker is one coding-agent process with an assigned task, an isolated
//! branch and a set of workers it must wait for. Workers are declared in the
//! project configuration in order; that order is preserved for display.
//!
//! # Examples
//!
//! ```rust
//! use czarina_core::worker::Worker;
//!
//! let worker = Worker::builder("qa")
//!     .role("tester")
//!     .agent_profile("claude-code")
//!     .dependency("foundation")
//!     .dependency("patterns")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(worker.branch, "czarina/qa");
//! assert!(worker.depends_on("patterns"));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{Error, Result};

const DEFAULT_ROLE: &str = "worker";
const DEFAULT_AGENT_PROFILE: &str = "claude-code";
const DEFAULT_BRANCH_PREFIX: &str = "czarina/";

/// A unit of assigned work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Worker {
    pub id: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(
        rename = "agent",
        alias = "agent_profile",
        default = "default_agent_profile"
    )]
    pub agent_profile: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

fn default_agent_profile() -> String {
    DEFAULT_AGENT_PROFILE.to_string()
}

impl Worker {
    /// Create a worker with default role, profile and branch
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        Self::validate_id(&id)?;
        let branch = default_branch(&id);
        Ok(Self {
            id,
            role: default_role(),
            agent_profile: default_agent_profile(),
            branch,
            dependencies: BTreeSet::new(),
        })
    }

    /// Create a builder for constructing a Worker
    pub fn builder<S: Into<String>>(id: S) -> WorkerBuilder {
        WorkerBuilder::new(id)
    }

    /// Validate and fill defaults on a deserialized descriptor
    pub fn normalize(mut self) -> Result<Self> {
        Self::validate_id(&self.id)?;
        for dependency in &self.dependencies {
            if dependency.trim().is_empty() {
                return Err(Error::validation(format!(
                    "Worker '{}' declares an empty dependency id",
                    self.id
                )));
            }
        }
        if self.branch.trim().is_empty() {
            self.branch = default_branch(&self.id);
        }
        if self.role.trim().is_empty() {
            self.role = default_role();
        }
        Ok(self)
    }

    /// Ids name tmux windows and worktree directories, so `.` and `:`
    /// (tmux target separators) are not allowed
    fn validate_id(id: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(Error::validation("Worker id cannot be empty"));
        }
        if !id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::validation(format!(
                "Worker id '{}' can only contain alphanumeric characters, '-' and '_'",
                id
            )));
        }
        Ok(())
    }

    /// Check whether this worker waits for `other`
    pub fn depends_on(&self, other: &str) -> bool {
        self.dependencies.contains(other)
    }
}

fn default_branch(id: &str) -> String {
    format!("{}{}", DEFAULT_BRANCH_PREFIX, id)
}

/// Builder for Worker instances
#[derive(Debug, Clone)]
pub struct WorkerBuilder {
    id: String,
    role: Option<String>,
    agent_profile: Option<String>,
    branch: Option<String>,
    dependencies: BTreeSet<String>,
}

impl WorkerBuilder {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            role: None,
            agent_profile: None,
            branch: None,
            dependencies: BTreeSet::new(),
        }
    }

    pub fn role<S: Into<String>>(mut self, role: S) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn agent_profile<S: Into<String>>(mut self, profile: S) -> Self {
        self.agent_profile = Some(profile.into());
        self
    }

    pub fn branch<S: Into<String>>(mut self, branch: S) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn dependency<S: Into<String>>(mut self, dependency: S) -> Self {
        self.dependencies.insert(dependency.into());
        self
    }

    pub fn dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<Worker> {
        let mut worker = Worker::new(self.id)?;
        if let Some(role) = self.role {
            worker.role = role;
        }
        if let Some(profile) = self.agent_profile {
            worker.agent_profile = profile;
        }
        if let Some(branch) = self.branch {
            worker.branch = branch;
        }
        worker.dependencies = self.dependencies;
        worker.normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_defaults() {
        let worker = Worker::new("foundation").unwrap();
        assert_eq!(worker.role, "worker");
        assert_eq!(worker.agent_profile, "claude-code");
        assert_eq!(worker.branch, "czarina/foundation");
        assert!(worker.dependencies.is_empty());
    }

    #[test]
    fn test_worker_id_validation() {
        assert!(Worker::new("").is_err());
        assert!(Worker::new("   ").is_err());
        assert!(Worker::new("has space").is_err());
        assert!(Worker::new("engineer-1").is_ok());
        assert!(Worker::new("v2_api-gateway").is_ok());
        assert!(Worker::new("v2.api").is_err());
        assert!(Worker::new("web:1").is_err());
    }

    #[test]
    fn test_worker_deserializes_config_descriptor() {
        let json = r#"{
            "id": "patterns",
            "role": "engineer",
            "agent": "aider",
            "branch": "feat/patterns",
            "dependencies": ["foundation"]
        }"#;
        let worker: Worker = serde_json::from_str(json).unwrap();
        let worker = worker.normalize().unwrap();
        assert_eq!(worker.agent_profile, "aider");
        assert_eq!(worker.branch, "feat/patterns");
        assert!(worker.depends_on("foundation"));
    }

    #[test]
    fn test_worker_accepts_agent_profile_alias_and_fills_branch() {
        let json = r#"{ "id": "qa", "agent_profile": "generic" }"#;
        let worker: Worker = serde_json::from_str(json).unwrap();
        let worker = worker.normalize().unwrap();
        assert_eq!(worker.agent_profile, "generic");
        assert_eq!(worker.branch, "czarina/qa");
        assert_eq!(worker.role, "worker");
    }

    #[test]
    fn test_builder_rejects_empty_dependency() {
        let result = Worker::builder("qa").dependency(" ").build();
        assert!(result.is_err());
    }
}
