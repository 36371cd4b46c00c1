//! Error types for the core domain

use thiserror::Error;

/// Core error type for orchestration operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Dependency cycle detected: {}", render_cycle(.cycle))]
    CycleDetected { cycle: Vec<String> },

    #[error("Worker '{worker}' depends on unknown worker '{dependency}'")]
    UnknownDependency { worker: String, dependency: String },

    #[error("Duplicate worker id: {id}")]
    DuplicateWorker { id: String },

    #[error("Unknown worker: {id}")]
    UnknownWorker { id: String },

    #[error("Agent profile not found: {id}")]
    ProfileNotFound { id: String },

    #[error("Invalid pattern '{pattern}' in profile '{profile}': {message}")]
    InvalidPattern {
        profile: String,
        pattern: String,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Event log error: {message}")]
    EventLog { message: String },

    #[error("Collaborator error: {operation} - {message}")]
    Collaborator { operation: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

fn render_cycle(cycle: &[String]) -> String {
    let mut path = cycle.join(" -> ");
    if let Some(first) = cycle.first() {
        path.push_str(" -> ");
        path.push_str(first);
    }
    path
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl Error {
    /// Create a validation error with a formatted message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an unknown worker error
    pub fn unknown_worker<S: Into<String>>(id: S) -> Self {
        Self::UnknownWorker { id: id.into() }
    }

    /// Create an event log error
    pub fn event_log<S: Into<String>>(message: S) -> Self {
        Self::EventLog {
            message: message.into(),
        }
    }

    /// Create a collaborator error for a failed session or git operation
    pub fn collaborator<S1: Into<String>, S2: Into<String>>(operation: S1, message: S2) -> Self {
        Self::Collaborator {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this error rejects a worker-set configuration
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::CycleDetected { .. }
                | Error::UnknownDependency { .. }
                | Error::DuplicateWorker { .. }
                | Error::ProfileNotFound { .. }
                | Error::InvalidPattern { .. }
        )
    }

    /// Check if this error is recoverable (the next cycle may succeed)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::EventLog { .. } | Error::Collaborator { .. })
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "validation",
            Error::CycleDetected { .. } => "cycle_detected",
            Error::UnknownDependency { .. } => "unknown_dependency",
            Error::DuplicateWorker { .. } => "duplicate_worker",
            Error::UnknownWorker { .. } => "unknown_worker",
            Error::ProfileNotFound { .. } => "profile_not_found",
            Error::InvalidPattern { .. } => "invalid_pattern",
            Error::Serialization(_) => "serialization",
            Error::EventLog { .. } => "event_log",
            Error::Collaborator { .. } => "collaborator",
            Error::Internal(_) => "internal",
        }
    }
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_closes_the_loop() {
        let err = Error::CycleDetected {
            cycle: vec!["a".into(), "b".into(), "c".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle detected: a -> b -> c -> a");
        assert!(err.is_configuration());
        assert_eq!(err.category(), "cycle_detected");
    }

    #[test]
    fn test_error_recoverability() {
        assert!(Error::event_log("disk full").is_recoverable());
        assert!(Error::collaborator("send_text", "no pane").is_recoverable());
        assert!(!Error::validation("bad").is_recoverable());
        assert!(!Error::unknown_worker("x").is_recoverable());
    }

    #[test]
    fn test_error_from_conversions() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let core_err: Error = json_err.into();
        assert_eq!(core_err.category(), "serialization");
    }

    #[test]
    fn test_unknown_dependency_names_missing_id() {
        let err = Error::UnknownDependency {
            worker: "qa".into(),
            dependency: "ghost".into(),
        };
        let display = err.to_string();
        assert!(display.contains("qa"));
        assert!(display.contains("ghost"));
    }
}
