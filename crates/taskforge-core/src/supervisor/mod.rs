//! AI Process Supervisor: runs one executor invocation end to end.
//!
//! Owns the full lifecycle of a single [`Execution`]: create the DB row,
//! spawn the configured executor with the prompt on stdin, classify and
//! persist every output line, enforce the overall timeout, and drive the
//! execution to a terminal status. Orchestrators call [`Supervisor::run`]
//! and get back a [`SupervisorOutcome`] plus the accumulated assistant
//! transcript; they never touch an executor or the log tables directly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio::time::Instant;
use uuid::Uuid;

use taskforge_db::models::{ExecutionStatus, LogType, ProcessStatus};
use taskforge_db::queries::execution_logs::{self, NewExecutionLog};
use taskforge_db::queries::executions;

use crate::events::{EventBus, EventPayload};
use crate::executor::{ExecutionRequest, Executor, StreamEvent};
use crate::logparser::{self, ParsedLine};

/// Flush an in-memory log batch at least this often, even if it hasn't
/// filled up, so realtime subscribers never wait more than this for a
/// line that has already arrived from the process.
const MAX_BATCH_LATENCY: Duration = Duration::from_millis(250);
const MAX_BATCH_LINES: usize = 50;

/// How long to wait after SIGTERM before escalating to SIGKILL.
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SupervisorRequest {
    pub task_id: Uuid,
    pub prompt: String,
    pub working_dir: PathBuf,
    pub env_vars: HashMap<String, String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorOutcome {
    Completed,
    Failed { message: String },
    TimedOut,
}

/// Result of running one execution: its terminal status plus every
/// assistant-authored line of output, concatenated in arrival order. The
/// Planning Orchestrator reads this text as the plan body; the
/// Implementation Orchestrator reads it only for logging.
pub struct SupervisorRun {
    pub execution_id: Uuid,
    pub outcome: SupervisorOutcome,
    pub assistant_text: String,
}

pub struct Supervisor<'a> {
    pool: PgPool,
    bus: EventBus,
    executor: &'a dyn Executor,
}

impl<'a> Supervisor<'a> {
    pub fn new(pool: PgPool, bus: EventBus, executor: &'a dyn Executor) -> Self {
        Self { pool, bus, executor }
    }

    pub async fn run(&self, req: SupervisorRequest) -> Result<SupervisorRun> {
        let execution = executions::insert_execution(&self.pool, req.task_id)
            .await
            .context("failed to create execution row")?;
        let execution_id = execution.id;

        let exec_req = ExecutionRequest {
            execution_id,
            task_id: req.task_id,
            prompt: req.prompt.clone(),
            working_dir: req.working_dir.clone(),
            env_vars: req.env_vars.clone(),
        };

        let handle = self
            .executor
            .spawn(&exec_req)
            .await
            .context("failed to spawn executor")?;

        let process = executions::insert_process(
            &self.pool,
            execution_id,
            self.executor.name(),
            &req.working_dir.to_string_lossy(),
            serde_json::to_value(&req.env_vars).unwrap_or(serde_json::Value::Null),
        )
        .await
        .context("failed to create process row")?;
        executions::set_process_pid(&self.pool, process.id, handle.pid as i32).await.ok();
        executions::mark_execution_running(&self.pool, execution_id).await.ok();

        let project_id = self.project_id_for_task(req.task_id).await;

        let run_result = tokio::time::timeout(
            req.timeout,
            self.drain(execution_id, project_id, &handle),
        )
        .await;

        let (outcome, assistant_text) = match run_result {
            Ok(Ok(text)) => {
                executions::finish_process(&self.pool, process.id, ProcessStatus::Terminated, None)
                    .await
                    .ok();
                executions::complete_execution(&self.pool, execution_id, ExecutionStatus::Completed, None, None)
                    .await
                    .ok();
                (SupervisorOutcome::Completed, text)
            }
            Ok(Err(e)) => {
                executions::finish_process(&self.pool, process.id, ProcessStatus::Terminated, None)
                    .await
                    .ok();
                executions::complete_execution(
                    &self.pool,
                    execution_id,
                    ExecutionStatus::Failed,
                    None,
                    Some(&e.to_string()),
                )
                .await
                .ok();
                (SupervisorOutcome::Failed { message: e.to_string() }, String::new())
            }
            Err(_elapsed) => {
                tracing::warn!(task_id = %req.task_id, execution_id = %execution_id, "execution timed out, killing");
                self.kill_with_grace(&handle).await;
                executions::finish_process(&self.pool, process.id, ProcessStatus::Killed, None)
                    .await
                    .ok();
                executions::complete_execution(
                    &self.pool,
                    execution_id,
                    ExecutionStatus::Cancelled,
                    None,
                    Some("execution timed out"),
                )
                .await
                .ok();
                (SupervisorOutcome::TimedOut, String::new())
            }
        };

        Ok(SupervisorRun { execution_id, outcome, assistant_text })
    }

    /// Kill a process: SIGTERM via the executor, then SIGKILL if it's
    /// still alive after the grace period.
    async fn kill_with_grace(&self, handle: &crate::executor::ProcessHandle) {
        if let Err(e) = self.executor.kill(handle).await {
            tracing::warn!(error = %e, "failed to signal timed-out process");
            return;
        }
        tokio::time::sleep(KILL_GRACE_PERIOD).await;
        if self.executor.is_running(handle).await {
            let _ = self.executor.kill(handle).await;
        }
    }

    async fn project_id_for_task(&self, task_id: Uuid) -> Uuid {
        taskforge_db::queries::tasks::get_task(&self.pool, task_id)
            .await
            .ok()
            .flatten()
            .map(|t| t.project_id)
            .unwrap_or(Uuid::nil())
    }

    /// Drain the executor's stream, batching parsed lines into the DB
    /// with a bounded max latency, and return the accumulated assistant
    /// text once the stream yields `Exited`.
    async fn drain(
        &self,
        execution_id: Uuid,
        project_id: Uuid,
        handle: &crate::executor::ProcessHandle,
    ) -> Result<String> {
        use futures::StreamExt;

        let mut stream = self.executor.stream(handle);
        let mut line_number: i64 = 0;
        let mut assistant_text = String::new();
        let mut batch: Vec<NewExecutionLog> = Vec::with_capacity(MAX_BATCH_LINES);
        let mut last_flush = Instant::now();

        loop {
            let next = tokio::time::timeout(MAX_BATCH_LATENCY, stream.next()).await;
            match next {
                Ok(Some(StreamEvent::Line { source, content })) => {
                    line_number += 1;
                    let parsed: ParsedLine = logparser::parse_line(&content);
                    if parsed.log_type == LogType::Assistant {
                        if let Some(text) = parsed.parsed_content.as_ref().and_then(|v| v.get("text")).and_then(|t| t.as_str()) {
                            assistant_text.push_str(text);
                            assistant_text.push('\n');
                        } else if !content.trim().is_empty() {
                            assistant_text.push_str(&content);
                            assistant_text.push('\n');
                        }
                    }

                    batch.push(NewExecutionLog {
                        execution_id,
                        line_number,
                        level: if parsed.is_error { "error".to_string() } else { "info".to_string() },
                        source,
                        message: content,
                        log_type: parsed.log_type,
                        tool_name: parsed.tool_name,
                        tool_use_id: parsed.tool_use_id,
                        parsed_content: parsed.parsed_content,
                        is_error: parsed.is_error,
                        duration_ms: parsed.duration_ms,
                        num_turns: parsed.num_turns.map(|n| n as i32),
                    });

                    if batch.len() >= MAX_BATCH_LINES || last_flush.elapsed() >= MAX_BATCH_LATENCY {
                        self.flush(project_id, &mut batch).await;
                        last_flush = Instant::now();
                    }
                }
                Ok(Some(StreamEvent::Exited { code })) => {
                    self.flush(project_id, &mut batch).await;
                    if code.unwrap_or(0) != 0 {
                        anyhow::bail!("executor exited with status {:?}", code);
                    }
                    break;
                }
                Ok(None) => {
                    self.flush(project_id, &mut batch).await;
                    break;
                }
                Err(_elapsed) => {
                    // No line arrived within the latency budget; flush
                    // whatever's queued so subscribers stay current.
                    if !batch.is_empty() {
                        self.flush(project_id, &mut batch).await;
                        last_flush = Instant::now();
                    }
                }
            }
        }

        Ok(assistant_text)
    }

    async fn flush(&self, project_id: Uuid, batch: &mut Vec<NewExecutionLog>) {
        if batch.is_empty() {
            return;
        }
        for entry in batch.drain(..) {
            let execution_id = entry.execution_id;
            let line_number = entry.line_number;
            match execution_logs::insert_execution_log(&self.pool, &entry).await {
                Ok(_log) => {
                    self.bus
                        .publish(project_id, EventPayload::ExecutionLogAppended { execution_id, line_number })
                        .await
                        .ok();
                }
                Err(e) => {
                    tracing::warn!(execution_id = %execution_id, error = %e, "failed to persist execution log line");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::FakeCodeExecutor;

    fn sample_request(task_id: Uuid, dir: &std::path::Path) -> SupervisorRequest {
        SupervisorRequest {
            task_id,
            prompt: "plan: add a health check endpoint".to_string(),
            working_dir: dir.to_path_buf(),
            env_vars: HashMap::new(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn sample_request_carries_prompt_verbatim() {
        let dir = std::env::temp_dir();
        let req = sample_request(Uuid::new_v4(), &dir);
        assert!(req.prompt.starts_with("plan:"));
    }

    // Full run() behavior is covered by integration tests that provision a
    // real pool; FakeCodeExecutor here only exercises that the executor
    // trait object plumbing compiles against this module's call shape.
    #[tokio::test]
    async fn fake_executor_produces_a_stream() {
        let executor = FakeCodeExecutor::new();
        let dir = tempfile::tempdir().unwrap();
        let req = ExecutionRequest {
            execution_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            prompt: "plan: demo".to_string(),
            working_dir: dir.path().to_path_buf(),
            env_vars: HashMap::new(),
        };
        let handle = executor.spawn(&req).await.unwrap();
        assert!(executor.is_running(&handle).await);
    }
}
