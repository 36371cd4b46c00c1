//! Error types for storage operations

use std::path::PathBuf;
use thiserror::Error;

/// Storage layer error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record at {path}:{line}: {message}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Core domain error: {0}")]
    Core(#[from] czarina_core::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// Storage failures surface to the engine as event log errors
impl From<Error> for czarina_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Core(core) => core,
            other => czarina_core::Error::event_log(other.to_string()),
        }
    }
}

/// Convenience result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_become_event_log_errors() {
        let err = Error::Corrupt {
            path: PathBuf::from("logs/events.jsonl"),
            line: 7,
            message: "expected value".into(),
        };
        let core: czarina_core::Error = err.into();
        assert_eq!(core.category(), "event_log");
        assert!(core.is_recoverable());
        assert!(core.to_string().contains("events.jsonl:7"));
    }

    #[test]
    fn test_core_errors_pass_through() {
        let err = Error::Core(czarina_core::Error::unknown_worker("qa"));
        let core: czarina_core::Error = err.into();
        assert_eq!(core, czarina_core::Error::unknown_worker("qa"));
    }
}
