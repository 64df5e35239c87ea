//! Orchestration engine core: the components that turn a task description
//! into a reviewed pull request. Everything here is storage-backed through
//! `taskforge-db` and transport-agnostic -- `taskforge-cli` is the only
//! crate that wires these pieces into a running process.

pub mod config;
pub mod events;
pub mod executor;
pub mod git;
pub mod logparser;
pub mod orchestrator;
pub mod prmonitor;
pub mod queue;
pub mod realtime;
pub mod state;
pub mod supervisor;
pub mod worktree;
