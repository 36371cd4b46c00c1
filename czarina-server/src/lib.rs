//! Czarina orchestrator application
//!
//! Configuration loading, the tmux and git collaborators, the orchestrator
//! facade behind the `czarina` CLI and the long-running loop mode.

pub mod config;
pub mod error;
pub mod git;
pub mod orchestrator;
pub mod process;
pub mod server;
pub mod tmux;

#[cfg(test)]
mod config_tests;

pub use error::{Error, Result};
pub use orchestrator::{DepsCheck, Orchestrator, StatusRow, StatusTable};

pub use czarina_core as core;
pub use czarina_storage as storage;
