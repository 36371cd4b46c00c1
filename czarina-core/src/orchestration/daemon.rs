//! Approval daemon
//!
//! Agents stall on confirmation prompts. Every scan captures the output of
//! each ACTIVE or BLOCKED worker, matches it against the worker's profile
//! and, when a known prompt is showing, types the configured response. After
//! a short wait the output is captured again: if the prompt is gone the
//! worker is unblocked, otherwise an alert is raised. The first failure for a
//! (worker, prompt) pair is `high`; repeats of a known failure are `medium`.
//!
//! The daemon never touches dependency state and never completes or fails a
//! worker.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use super::collaborators::SessionCollaborator;
use super::settings::DaemonSettings;
use super::WorkerSet;
use crate::alert::{Alert, AlertBook, AlertSeverity};
use crate::event::{history, keys, Event, EventFilter, EventKind, EventLog};
use crate::profile::{PatternTable, ProfileRegistry};
use crate::status::{StatusBoard, WorkerStatus};
use crate::worker::Worker;
use crate::Result;

/// What a scan concluded for one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    NoAction,
    /// A known prompt with a corrective response
    Respond { pattern: String, response: String },
    /// A known prompt that needs a human
    Escalate { pattern: String, reason: String },
}

/// Outcome of one daemon cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScanReport {
    pub raised: Vec<Alert>,
    /// Workers whose open alert was cleared
    pub cleared: Vec<String>,
    /// Workers that received a corrective response
    pub actions: Vec<String>,
    /// Workers unblocked after their prompt went away
    pub unblocked: Vec<String>,
}

pub struct ApprovalDaemon {
    workers: Arc<WorkerSet>,
    profiles: Arc<ProfileRegistry>,
    log: Arc<dyn EventLog>,
    session: Arc<dyn SessionCollaborator>,
    settings: DaemonSettings,
}

/// Per-cycle state replayed from the log
struct CycleState {
    board: StatusBoard,
    alerts: AlertBook,
}

impl ApprovalDaemon {
    pub fn new(
        workers: Arc<WorkerSet>,
        profiles: Arc<ProfileRegistry>,
        log: Arc<dyn EventLog>,
        session: Arc<dyn SessionCollaborator>,
        settings: DaemonSettings,
    ) -> Self {
        Self {
            workers,
            profiles,
            log,
            session,
            settings,
        }
    }

    pub fn settings(&self) -> &DaemonSettings {
        &self.settings
    }

    /// Match captured output against the worker's profile
    pub fn decide(&self, worker: &Worker, output: &str) -> Result<Decision> {
        let table = self.profiles.patterns(&worker.agent_profile)?;
        let Some(pattern) = table.match_tail(output, self.settings.match_window_lines) else {
            return Ok(Decision::NoAction);
        };

        let decision = match (&pattern.response, self.settings.auto_approve) {
            (Some(response), true) => Decision::Respond {
                pattern: pattern.name.clone(),
                response: response.clone(),
            },
            (Some(_), false) => Decision::Escalate {
                pattern: pattern.name.clone(),
                reason: format!("prompt '{}' showing, auto-approve disabled", pattern.name),
            },
            (None, _) => Decision::Escalate {
                pattern: pattern.name.clone(),
                reason: format!("prompt '{}' has no corrective response", pattern.name),
            },
        };
        Ok(decision)
    }

    /// Capture the worker's output and decide what to do about it
    pub async fn scan_worker(&self, worker: &Worker) -> Result<(String, Decision)> {
        let output = self.session.capture_output(&worker.id).await?;
        trace!(worker_id = %worker.id, "Captured {} bytes", output.len());
        let decision = self.decide(worker, &output)?;
        Ok((output, decision))
    }

    /// Type the decided response; `false` when there is nothing to send
    pub async fn act(&self, worker_id: &str, decision: &Decision) -> Result<bool> {
        match decision {
            Decision::Respond { pattern, response } => {
                debug!(worker_id = %worker_id, "Answering prompt '{}'", pattern);
                self.session.send_text(worker_id, response).await?;
                Ok(true)
            }
            Decision::NoAction | Decision::Escalate { .. } => Ok(false),
        }
    }

    /// Wait, re-capture and report whether the prompt cleared
    ///
    /// Cleared means the output changed and `pattern` no longer matches its
    /// tail.
    pub async fn verify(&self, worker: &Worker, pattern: &str, pre_output: &str) -> Result<bool> {
        tokio::time::sleep(self.settings.verify_delay()).await;
        let post_output = self.session.capture_output(&worker.id).await?;
        if normalize(&post_output) == normalize(pre_output) {
            return Ok(false);
        }
        let table = self.profiles.patterns(&worker.agent_profile)?;
        Ok(!still_matches(table, &post_output, pattern, self.settings.match_window_lines))
    }

    /// Run one cycle over every live worker
    ///
    /// Each worker is visited once, so it gets at most one corrective
    /// action per cycle. A capture failure skips that worker; an append failure aborts the
    /// cycle and the next one starts from the log again.
    pub async fn scan(&self) -> Result<ScanReport> {
        let history = history(self.log.as_ref(), EventFilter::All).await?;
        let mut state = CycleState {
            board: StatusBoard::from_history(self.workers.ids(), &history),
            alerts: AlertBook::from_history(&history),
        };
        let mut report = ScanReport::default();

        for worker in self.workers.iter() {
            let Some(status) = state.board.status(&worker.id) else {
                continue;
            };
            if !status.is_live() {
                continue;
            }

            let (output, decision) = match self.scan_worker(worker).await {
                Ok(scanned) => scanned,
                Err(e) => {
                    warn!(worker_id = %worker.id, "Skipping worker this cycle: {}", e);
                    continue;
                }
            };

            match decision {
                Decision::NoAction => {
                    self.settle(worker, status, &state, &mut report).await?;
                }
                Decision::Escalate { pattern, reason } => {
                    self.block(worker, status, &pattern).await?;
                    if state.alerts.has_open(&worker.id) {
                        debug!(worker_id = %worker.id, "Alert already open, not raising again");
                        continue;
                    }
                    let alert = Alert::new(worker.id.clone(), AlertSeverity::Medium, reason)
                        .with_pattern(pattern);
                    self.raise(alert, &mut state, &mut report).await?;
                }
                Decision::Respond { ref pattern, .. } => {
                    let digest = digest(&output);
                    self.block(worker, status, pattern).await?;
                    self.respond(worker, &output, &decision, digest, &mut state, &mut report)
                        .await?;
                }
            }
        }

        if !report.raised.is_empty() || !report.cleared.is_empty() {
            info!(
                "Scan raised {} alerts, cleared {}",
                report.raised.len(),
                report.cleared.len()
            );
        }
        Ok(report)
    }

    /// Operator acknowledgement: clear the worker's open alert
    ///
    /// Returns `false` when nothing was open.
    pub async fn acknowledge(&self, worker_id: &str) -> Result<bool> {
        self.workers.require(worker_id)?;
        let history = history(self.log.as_ref(), EventFilter::worker(worker_id)).await?;
        if !AlertBook::from_history(&history).has_open(worker_id) {
            return Ok(false);
        }
        self.log
            .append(
                Event::for_worker(worker_id, EventKind::AlertCleared)
                    .with_meta(keys::ACKNOWLEDGED, "operator"),
            )
            .await?;
        info!(worker_id = %worker_id, "Alert acknowledged by operator");
        Ok(true)
    }

    async fn respond(
        &self,
        worker: &Worker,
        output: &str,
        decision: &Decision,
        digest: u64,
        state: &mut CycleState,
        report: &mut ScanReport,
    ) -> Result<()> {
        let Decision::Respond { pattern, response } = decision else {
            return Ok(());
        };

        if let Err(e) = self.act(&worker.id, decision).await {
            warn!(worker_id = %worker.id, "Could not deliver response: {}", e);
            return Ok(());
        }
        self.log
            .append(
                Event::for_worker(worker.id.clone(), EventKind::CorrectiveAction)
                    .with_meta(keys::PATTERN, pattern.clone())
                    .with_meta(keys::RESPONSE, response.clone())
                    .with_meta(keys::OUTPUT_DIGEST, format!("{:016x}", digest)),
            )
            .await?;
        report.actions.push(worker.id.clone());

        let cleared = match self.verify(worker, pattern, output).await {
            Ok(cleared) => cleared,
            Err(e) => {
                warn!(worker_id = %worker.id, "Verification capture failed: {}", e);
                false
            }
        };

        if cleared {
            info!(worker_id = %worker.id, "Prompt '{}' cleared", pattern);
            self.unblock(worker, "corrective response accepted", report)
                .await?;
            self.clear_alert(worker, state, report).await?;
            return Ok(());
        }

        let severity = if state.alerts.failure_count(&worker.id, pattern) == 0 {
            AlertSeverity::High
        } else {
            AlertSeverity::Medium
        };
        let alert = Alert::new(
            worker.id.clone(),
            severity,
            format!("prompt '{}' still showing after corrective response", pattern),
        )
        .with_pattern(pattern.clone());
        self.raise(alert, state, report).await
    }

    /// Mark an ACTIVE worker as stalled on `pattern`
    async fn block(&self, worker: &Worker, status: WorkerStatus, pattern: &str) -> Result<()> {
        if status != WorkerStatus::Active {
            return Ok(());
        }
        info!(worker_id = %worker.id, "Worker blocked on prompt '{}'", pattern);
        self.log
            .append(
                Event::for_worker(worker.id.clone(), EventKind::TaskBlocked)
                    .with_meta(keys::PATTERN, pattern),
            )
            .await
    }

    async fn unblock(&self, worker: &Worker, reason: &str, report: &mut ScanReport) -> Result<()> {
        self.log
            .append(
                Event::for_worker(worker.id.clone(), EventKind::TaskUnblocked)
                    .with_meta(keys::REASON, reason),
            )
            .await?;
        report.unblocked.push(worker.id.clone());
        Ok(())
    }

    /// Nothing matched: undo any stalled state left from earlier cycles
    async fn settle(
        &self,
        worker: &Worker,
        status: WorkerStatus,
        state: &CycleState,
        report: &mut ScanReport,
    ) -> Result<()> {
        if status == WorkerStatus::Blocked {
            info!(worker_id = %worker.id, "Prompt no longer showing, unblocking");
            self.unblock(worker, "prompt no longer showing", report)
                .await?;
        }
        self.clear_alert(worker, state, report).await
    }

    async fn clear_alert(
        &self,
        worker: &Worker,
        state: &CycleState,
        report: &mut ScanReport,
    ) -> Result<()> {
        if !state.alerts.has_open(&worker.id) {
            return Ok(());
        }
        self.log
            .append(Event::for_worker(worker.id.clone(), EventKind::AlertCleared))
            .await?;
        report.cleared.push(worker.id.clone());
        Ok(())
    }

    async fn raise(
        &self,
        alert: Alert,
        state: &mut CycleState,
        report: &mut ScanReport,
    ) -> Result<()> {
        self.log.append(alert.to_event()).await?;
        warn!(
            worker_id = %alert.worker_id,
            severity = %alert.severity,
            "Alert: {}",
            alert.description
        );

        if let Some(pattern) = &alert.pattern {
            let failures = state.alerts.failure_count(&alert.worker_id, pattern) + 1;
            if failures >= self.settings.escalation_threshold {
                error!(
                    worker_id = %alert.worker_id,
                    "Prompt '{}' failed {} times, human intervention required",
                    pattern,
                    failures
                );
            }
        }
        state.alerts.record(&alert.to_event());
        report.raised.push(alert);
        Ok(())
    }
}

fn still_matches(table: &PatternTable, output: &str, pattern: &str, window: usize) -> bool {
    table
        .match_tail(output, window)
        .is_some_and(|matched| matched.name == pattern)
}

/// Output with trailing whitespace removed from every line and the end
fn normalize(output: &str) -> String {
    output
        .trim_end()
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

fn digest(output: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    normalize(output).hash(&mut hasher);
    hasher.finish()
}
