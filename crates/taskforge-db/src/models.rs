use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro-free enum pattern: Display + FromStr + sqlx::Type, one parse-error
// type per enum so callers can match on malformed storage values.
// ---------------------------------------------------------------------------

/// Status of a [`Task`]. Authoritative transition table lives in
/// `taskforge_core::state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    Planning,
    PlanReviewing,
    Implementing,
    CodeReviewing,
    Done,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses never accept new executions (invariant I6).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Todo => "todo",
            Self::Planning => "planning",
            Self::PlanReviewing => "plan_reviewing",
            Self::Implementing => "implementing",
            Self::CodeReviewing => "code_reviewing",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "planning" => Ok(Self::Planning),
            "plan_reviewing" => Ok(Self::PlanReviewing),
            "implementing" => Ok(Self::Implementing),
            "code_reviewing" => Ok(Self::CodeReviewing),
            "done" => Ok(Self::Done),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Git-side provisioning status of a [`Task`], tracked separately from
/// `TaskStatus` because worktree lifecycle does not line up 1:1 with the
/// planning/implementation lifecycle (a task can be `planning` while its
/// worktree is still `creating`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GitStatus {
    None,
    Creating,
    Active,
    Completed,
    Cleaning,
    Error,
}

impl fmt::Display for GitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Creating => "creating",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cleaning => "cleaning",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for GitStatus {
    type Err = GitStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "creating" => Ok(Self::Creating),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cleaning" => Ok(Self::Cleaning),
            "error" => Ok(Self::Error),
            other => Err(GitStatusParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GitStatusParseError(pub String);

impl fmt::Display for GitStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid git status: {:?}", self.0)
    }
}

impl std::error::Error for GitStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a [`Plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Reviewing,
    Approved,
    Rejected,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Reviewing => "reviewing",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

impl FromStr for PlanStatus {
    type Err = PlanStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "reviewing" => Ok(Self::Reviewing),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(PlanStatusParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanStatusParseError(pub String);

impl fmt::Display for PlanStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid plan status: {:?}", self.0)
    }
}

impl std::error::Error for PlanStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a [`Worktree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorktreeStatus {
    Creating,
    Active,
    Completed,
    Cleaning,
    Error,
}

impl fmt::Display for WorktreeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "creating",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cleaning => "cleaning",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for WorktreeStatus {
    type Err = WorktreeStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(Self::Creating),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cleaning" => Ok(Self::Cleaning),
            "error" => Ok(Self::Error),
            other => Err(WorktreeStatusParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorktreeStatusParseError(pub String);

impl fmt::Display for WorktreeStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid worktree status: {:?}", self.0)
    }
}

impl std::error::Error for WorktreeStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of an [`Execution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for ExecutionStatus {
    type Err = ExecutionStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ExecutionStatusParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionStatusParseError(pub String);

impl fmt::Display for ExecutionStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid execution status: {:?}", self.0)
    }
}

impl std::error::Error for ExecutionStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a supervised OS [`Process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Running,
    Terminated,
    Killed,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Terminated => "terminated",
            Self::Killed => "killed",
        };
        f.write_str(s)
    }
}

impl FromStr for ProcessStatus {
    type Err = ProcessStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "terminated" => Ok(Self::Terminated),
            "killed" => Ok(Self::Killed),
            other => Err(ProcessStatusParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessStatusParseError(pub String);

impl fmt::Display for ProcessStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid process status: {:?}", self.0)
    }
}

impl std::error::Error for ProcessStatusParseError {}

// ---------------------------------------------------------------------------

/// Remote state of a [`PullRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PullRequestState {
    Open,
    Merged,
    Closed,
}

impl fmt::Display for PullRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Merged => "merged",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

impl FromStr for PullRequestState {
    type Err = PullRequestStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "merged" => Ok(Self::Merged),
            "closed" => Ok(Self::Closed),
            other => Err(PullRequestStateParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PullRequestStateParseError(pub String);

impl fmt::Display for PullRequestStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid pull request state: {:?}", self.0)
    }
}

impl std::error::Error for PullRequestStateParseError {}

// ---------------------------------------------------------------------------

/// Source stream an [`ExecutionLog`] line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    Stdout,
    Stderr,
    System,
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::System => "system",
        };
        f.write_str(s)
    }
}

/// Classification produced by the log parser for one raw output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    User,
    Assistant,
    ToolUse,
    ToolResult,
    Result,
    System,
    Raw,
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::ToolUse => "tool_use",
            Self::ToolResult => "tool_result",
            Self::Result => "result",
            Self::System => "system",
            Self::Raw => "raw",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A version-controlled project the orchestration engine operates against.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub main_branch: String,
    pub worktree_base_path: String,
    pub init_script: Option<String>,
    pub executor_type: String,
    pub remote_repository_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A unit of work filed against a [`Project`].
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub git_status: GitStatus,
    pub branch_name: Option<String>,
    pub worktree_path: Option<String>,
    pub pr_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// The planner's output for a task; at most one non-deleted row per task
/// (invariant I1).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub task_id: Uuid,
    pub content: String,
    pub status: PlanStatus,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Append-only snapshot taken on every plan edit.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PlanVersion {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub version: i32,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only record of a [`Task`] status transition.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskStatusHistory {
    pub id: Uuid,
    pub task_id: Uuid,
    pub from_status: Option<TaskStatus>,
    pub to_status: TaskStatus,
    pub changed_by: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An isolated checkout/branch pair backing a task's execution.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Worktree {
    pub id: Uuid,
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub branch_name: String,
    pub worktree_path: String,
    pub status: WorktreeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// One invocation of an AI CLI against a task's worktree.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub task_id: Uuid,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: f64,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The OS-level child process backing an [`Execution`].
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Process {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub os_pid: Option<i32>,
    pub command: String,
    pub working_dir: String,
    pub env: serde_json::Value,
    pub resource_usage: Option<serde_json::Value>,
    pub status: ProcessStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One classified line of AI CLI output, append-only and strictly ordered
/// by `(execution_id, line_number)` (invariant I5).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub line_number: i64,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub source: LogSource,
    pub message: String,
    pub log_type: LogType,
    pub tool_name: Option<String>,
    pub tool_use_id: Option<String>,
    pub parsed_content: Option<serde_json::Value>,
    pub is_error: bool,
    pub duration_ms: Option<i64>,
    pub num_turns: Option<i32>,
}

/// A pull request opened by the Implementation Orchestrator, monitored
/// until it reaches a terminal remote state.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: Uuid,
    pub task_id: Uuid,
    pub remote_number: i64,
    pub repository: String,
    pub head_branch: String,
    pub base_branch: String,
    pub state: PullRequestState,
    pub url: String,
    pub merge_commit_sha: Option<String>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Status of a durable [`Job`] row backing the Job Queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A durable job row: the storage backing for the at-least-once Job Queue.
/// Not part of the domain model proper (no soft delete; operational data).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub queue: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub visible_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_roundtrip() {
        for s in [
            TaskStatus::Todo,
            TaskStatus::Planning,
            TaskStatus::PlanReviewing,
            TaskStatus::Implementing,
            TaskStatus::CodeReviewing,
            TaskStatus::Done,
            TaskStatus::Cancelled,
        ] {
            let parsed: TaskStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn task_status_terminal() {
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Todo.is_terminal());
        assert!(!TaskStatus::CodeReviewing.is_terminal());
    }

    #[test]
    fn task_status_rejects_unknown() {
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn git_status_roundtrip() {
        for s in [
            GitStatus::None,
            GitStatus::Creating,
            GitStatus::Active,
            GitStatus::Completed,
            GitStatus::Cleaning,
            GitStatus::Error,
        ] {
            let parsed: GitStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn plan_status_roundtrip() {
        for s in [
            PlanStatus::Draft,
            PlanStatus::Reviewing,
            PlanStatus::Approved,
            PlanStatus::Rejected,
        ] {
            let parsed: PlanStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn worktree_status_roundtrip() {
        for s in [
            WorktreeStatus::Creating,
            WorktreeStatus::Active,
            WorktreeStatus::Completed,
            WorktreeStatus::Cleaning,
            WorktreeStatus::Error,
        ] {
            let parsed: WorktreeStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn execution_status_roundtrip() {
        for s in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            let parsed: ExecutionStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn process_status_roundtrip() {
        for s in [
            ProcessStatus::Running,
            ProcessStatus::Terminated,
            ProcessStatus::Killed,
        ] {
            let parsed: ProcessStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn pull_request_state_roundtrip() {
        for s in [
            PullRequestState::Open,
            PullRequestState::Merged,
            PullRequestState::Closed,
        ] {
            let parsed: PullRequestState = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }
}
