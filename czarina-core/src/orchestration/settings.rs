//! Tunables for the controller and daemon loops

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest idle threshold honoured (one year); larger values are clamped
pub const MAX_IDLE_THRESHOLD_SECS: u64 = 365 * 24 * 60 * 60;

/// Lifecycle controller settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerSettings {
    pub tick_interval_secs: u64,
    /// ACTIVE workers silent for longer are reported as idle
    pub idle_threshold_secs: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 15,
            idle_threshold_secs: 300,
        }
    }
}

impl ControllerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn idle_threshold(&self) -> chrono::Duration {
        let secs = self.idle_threshold_secs.min(MAX_IDLE_THRESHOLD_SECS);
        chrono::Duration::seconds(secs as i64)
    }
}

/// Approval daemon settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonSettings {
    pub scan_interval_secs: u64,
    /// Wait between a corrective response and the re-capture
    pub verify_delay_ms: u64,
    /// Lines of scrollback captured per worker
    pub capture_lines: usize,
    /// Lines at the end of a capture searched for prompts
    pub match_window_lines: usize,
    pub auto_approve: bool,
    /// Alerts per (worker, prompt) before asking for a human
    pub escalation_threshold: usize,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            verify_delay_ms: 4000,
            capture_lines: 100,
            match_window_lines: 20,
            auto_approve: true,
            escalation_threshold: 3,
        }
    }
}

impl DaemonSettings {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_huge_idle_threshold_is_clamped() {
        let settings = ControllerSettings {
            idle_threshold_secs: 10u64.pow(16),
            ..ControllerSettings::default()
        };
        assert_eq!(
            settings.idle_threshold(),
            chrono::Duration::seconds(MAX_IDLE_THRESHOLD_SECS as i64)
        );
    }

    #[test]
    fn test_partial_settings_fill_defaults() {
        let daemon: DaemonSettings =
            serde_json::from_str(r#"{"verify_delay_ms": 3000, "auto_approve": false}"#).unwrap();
        assert_eq!(daemon.verify_delay(), Duration::from_secs(3));
        assert!(!daemon.auto_approve);
        assert_eq!(daemon.match_window_lines, 20);

        let controller: ControllerSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(controller, ControllerSettings::default());
        assert_eq!(controller.idle_threshold().num_seconds(), 300);
    }
}
