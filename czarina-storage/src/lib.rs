//! Persistence layer for Czarina
//!
//! This crate provides the durable JSON-lines implementation of the core
//! `EventLog` trait and the manager that owns the project's log directory.

pub mod error;
pub mod event_log;
pub mod manager;

pub use error::{Error, Result};
pub use event_log::JsonlEventLog;
pub use manager::{StorageConfig, StorageManager, StorageStats};

/// Re-export core types for convenience
pub use czarina_core as core;
