//! tmux-backed terminal sessions
//!
//! All workers share one tmux session (`czarina-<slug>`) with one window per
//! worker, named by worker id. Targets use tmux's exact-match form
//! `=czarina-<slug>:=<id>` so `qa` never resolves to a window named
//! `qa-e2e`.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use czarina_core::orchestration::{BranchRef, SessionCollaborator};
use czarina_core::profile::AgentProfile;
use czarina_core::worker::Worker;
use czarina_core::Result;

use crate::process::{self, COMMAND_TIMEOUT};

const TMUX: &str = "tmux";

pub struct TmuxSession {
    session_name: String,
    capture_lines: usize,
    timeout: Duration,
}

impl TmuxSession {
    pub fn new<S: Into<String>>(session_name: S, capture_lines: usize) -> Self {
        Self {
            session_name: session_name.into(),
            capture_lines,
            timeout: COMMAND_TIMEOUT,
        }
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// Exact target for the worker's window
    fn target(&self, worker_id: &str) -> String {
        format!("={}:={}", self.session_name, worker_id)
    }

    fn session_target(&self) -> String {
        format!("={}", self.session_name)
    }

    async fn tmux(&self, operation: &str, args: &[&str]) -> Result<String> {
        process::run(operation, TMUX, args, None, self.timeout).await
    }

    async fn has_session(&self) -> bool {
        self.tmux("has-session", &["has-session", "-t", &self.session_target()])
            .await
            .is_ok()
    }
}

/// Split text into the literal part and whether it ends with Enter
fn split_enter(text: &str) -> (&str, bool) {
    match text.strip_suffix('\n') {
        Some(literal) => (literal.strip_suffix('\r').unwrap_or(literal), true),
        None => (text, false),
    }
}

#[async_trait]
impl SessionCollaborator for TmuxSession {
    async fn launch(
        &self,
        worker: &Worker,
        branch: &BranchRef,
        profile: &AgentProfile,
    ) -> Result<()> {
        let cwd = branch.path.to_string_lossy();
        if self.has_session().await {
            let session = format!("{}:", self.session_target());
            self.tmux(
                "launch",
                &[
                    "new-window",
                    "-d",
                    "-t",
                    &session,
                    "-n",
                    &worker.id,
                    "-c",
                    &cwd,
                ],
            )
            .await?;
        } else {
            self.tmux(
                "launch",
                &[
                    "new-session",
                    "-d",
                    "-s",
                    &self.session_name,
                    "-n",
                    &worker.id,
                    "-c",
                    &cwd,
                ],
            )
            .await?;
            info!("Created tmux session {}", self.session_name);
        }

        if !profile.launch_command.trim().is_empty() {
            self.send_text(&worker.id, &format!("{}\n", profile.launch_command))
                .await?;
        }
        debug!(worker_id = %worker.id, "Window opened in {}", cwd);
        Ok(())
    }

    async fn send_text(&self, worker_id: &str, text: &str) -> Result<()> {
        let target = self.target(worker_id);
        let (literal, enter) = split_enter(text);
        if !literal.is_empty() {
            self.tmux("send_text", &["send-keys", "-t", &target, "-l", literal])
                .await?;
        }
        if enter {
            self.tmux("send_text", &["send-keys", "-t", &target, "Enter"])
                .await?;
        }
        Ok(())
    }

    async fn capture_output(&self, worker_id: &str) -> Result<String> {
        let target = self.target(worker_id);
        let start = format!("-{}", self.capture_lines);
        self.tmux(
            "capture_output",
            &["capture-pane", "-p", "-t", &target, "-S", &start],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_enter() {
        assert_eq!(split_enter("y\n"), ("y", true));
        assert_eq!(split_enter("\n"), ("", true));
        assert_eq!(split_enter("1\r\n"), ("1", true));
        assert_eq!(split_enter("abc"), ("abc", false));
    }

    #[test]
    fn test_window_target() {
        let tmux = TmuxSession::new("czarina-sark-v2", 100);
        assert_eq!(tmux.target("qa"), "=czarina-sark-v2:=qa");
        assert_eq!(tmux.session_target(), "=czarina-sark-v2");
        assert_eq!(tmux.session_name(), "czarina-sark-v2");
    }
}
