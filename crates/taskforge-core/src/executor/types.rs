//! Shared types for AI CLI executor adapters.

use std::collections::HashMap;
use std::path::PathBuf;

use uuid::Uuid;

use taskforge_db::models::LogSource;

/// Everything an executor needs to spawn one AI CLI invocation.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub execution_id: Uuid,
    pub task_id: Uuid,
    pub prompt: String,
    pub working_dir: PathBuf,
    pub env_vars: HashMap<String, String>,
}

/// A handle to a running (or just-exited) AI CLI process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub pid: u32,
    pub execution_id: Uuid,
    pub executor_name: String,
}

/// One item from an executor's combined stdout/stderr stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Line { source: LogSource, content: String },
    Exited { code: Option<i32> },
}
