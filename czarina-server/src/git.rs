//! Git worktrees, one per worker
//!
//! Each worker gets its own checkout at `<worktrees_dir>/<id>` on its
//! configured branch, so agents never share a working tree.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use czarina_core::orchestration::{BranchRef, GitCollaborator};
use czarina_core::worker::Worker;
use czarina_core::{Error, Result};

use crate::process::{self, COMMAND_TIMEOUT};

const GIT: &str = "git";

pub struct GitWorktrees {
    repository: PathBuf,
    worktrees_dir: PathBuf,
    branches: BTreeMap<String, String>,
    timeout: Duration,
}

impl GitWorktrees {
    /// A relative `worktrees_dir` is taken relative to `repository`, where
    /// git itself would put it
    pub fn new<'a, I>(repository: PathBuf, worktrees_dir: PathBuf, workers: I) -> Self
    where
        I: IntoIterator<Item = &'a Worker>,
    {
        let worktrees_dir = if worktrees_dir.is_absolute() {
            worktrees_dir
        } else {
            repository.join(worktrees_dir)
        };
        Self {
            repository,
            worktrees_dir,
            branches: workers
                .into_iter()
                .map(|w| (w.id.clone(), w.branch.clone()))
                .collect(),
            timeout: COMMAND_TIMEOUT,
        }
    }

    fn worktree_path(&self, worker_id: &str) -> PathBuf {
        self.worktrees_dir.join(worker_id)
    }
}

#[async_trait]
impl GitCollaborator for GitWorktrees {
    async fn create_branch(&self, worker: &Worker) -> Result<()> {
        let path = self.worktree_path(&worker.id);
        if path.exists() {
            debug!(worker_id = %worker.id, "Worktree {} already exists", path.display());
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.worktrees_dir)
            .await
            .map_err(|e| Error::collaborator("create_branch", e.to_string()))?;

        let path_arg = path.to_string_lossy();
        process::run(
            "create_branch",
            GIT,
            &["worktree", "add", "-B", &worker.branch, &path_arg],
            Some(&self.repository),
            self.timeout,
        )
        .await?;
        info!(
            worker_id = %worker.id,
            "Created worktree {} on branch {}",
            path.display(),
            worker.branch
        );
        Ok(())
    }

    async fn branch_for(&self, worker_id: &str) -> Result<BranchRef> {
        let name = self
            .branches
            .get(worker_id)
            .cloned()
            .ok_or_else(|| Error::unknown_worker(worker_id))?;
        Ok(BranchRef {
            name,
            path: self.worktree_path(worker_id),
        })
    }

    async fn status(&self, worker_id: &str) -> Result<String> {
        let branch = self.branch_for(worker_id).await?;
        process::run(
            "status",
            GIT,
            &["status", "--short", "--branch"],
            Some(&branch.path),
            self.timeout,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_branch_for_uses_configured_branch() {
        let workers = vec![
            Worker::builder("foundation")
                .branch("feat/foundation")
                .build()
                .unwrap(),
            Worker::new("qa").unwrap(),
        ];
        let git = GitWorktrees::new("/srv/repo".into(), "/srv/worktrees".into(), &workers);

        let branch = git.branch_for("foundation").await.unwrap();
        assert_eq!(branch.name, "feat/foundation");
        assert_eq!(branch.path, PathBuf::from("/srv/worktrees/foundation"));
        assert_eq!(git.branch_for("qa").await.unwrap().name, "czarina/qa");
        assert!(git.branch_for("ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_existing_worktree_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("worktrees/qa")).unwrap();
        let workers = vec![Worker::new("qa").unwrap()];
        let git = GitWorktrees::new(
            dir.path().to_path_buf(),
            dir.path().join("worktrees"),
            &workers,
        );
        git.create_branch(&workers[0]).await.unwrap();
    }

    #[tokio::test]
    async fn test_relative_worktrees_dir_follows_repository() {
        let workers = vec![Worker::new("qa").unwrap()];
        let git = GitWorktrees::new("/srv/sark".into(), "worktrees".into(), &workers);
        let branch = git.branch_for("qa").await.unwrap();
        assert_eq!(branch.path, PathBuf::from("/srv/sark/worktrees/qa"));
    }
}
