//! Core domain models and orchestration engine for Czarina
//!
//! This crate contains the worker model, the dependency graph, the event
//! model with its status projector, agent profiles, and the two loops that
//! drive a run: the lifecycle controller and the approval daemon. It does no
//! I/O of its own; durable storage and the tmux/git collaborators live in the
//! storage and server crates.

pub mod alert;
pub mod error;
pub mod event;
pub mod graph;
pub mod orchestration;
pub mod profile;
pub mod session;
pub mod status;
pub mod worker;

pub use error::{Error, Result};
