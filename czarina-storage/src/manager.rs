//! Storage manager owning the on-disk project layout

use czarina_core::event::EventLog;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::{event_log::JsonlEventLog, Error, Result};

/// Directory under the project root holding logs
pub const LOGS_DIR: &str = "logs";

/// Event log file name inside [`LOGS_DIR`]
pub const EVENTS_FILE: &str = "events.jsonl";

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Project directory (the one holding `config.json`)
    pub project_dir: PathBuf,
}

/// Main storage manager coordinating the event log
pub struct StorageManager {
    logs_dir: PathBuf,
    events: Arc<JsonlEventLog>,
}

impl StorageManager {
    /// Create the layout if needed and open the event log
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let logs_dir = config.project_dir.join(LOGS_DIR);
        tokio::fs::create_dir_all(&logs_dir)
            .await
            .map_err(|e| Error::io(&logs_dir, e))?;

        let events = Arc::new(JsonlEventLog::open(logs_dir.join(EVENTS_FILE)).await?);
        info!("Event log ready at {}", events.path().display());

        Ok(Self { logs_dir, events })
    }

    /// Get the event log
    pub fn events(&self) -> Arc<JsonlEventLog> {
        self.events.clone()
    }

    /// Get the event log as the engine sees it
    pub fn event_log(&self) -> Arc<dyn EventLog> {
        self.events.clone()
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Get event log statistics
    pub async fn stats(&self) -> Result<StorageStats> {
        let size_bytes = tokio::fs::metadata(self.events.path())
            .await
            .map_err(|e| Error::io(self.events.path(), e))?
            .len();
        Ok(StorageStats {
            path: self.events.path().to_path_buf(),
            records: self.events.record_count().await?,
            size_bytes,
        })
    }
}

/// Event log statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub path: PathBuf,
    pub records: usize,
    pub size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use czarina_core::event::{Event, EventKind};

    #[tokio::test]
    async fn test_manager_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StorageManager::new(&StorageConfig {
            project_dir: dir.path().to_path_buf(),
        })
        .await
        .unwrap();

        assert!(dir.path().join("logs").is_dir());
        assert!(dir.path().join("logs/events.jsonl").is_file());

        manager
            .event_log()
            .append(Event::orchestration(EventKind::SessionStart))
            .await
            .unwrap();
        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.records, 1);
        assert!(stats.size_bytes > 0);
    }
}
