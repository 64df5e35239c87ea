//! Claude Code executor adapter.
//!
//! Spawns `claude -p --output-format stream-json --verbose`, delivers the
//! prompt over stdin, and streams stdout/stderr lines verbatim. Turning
//! those lines into structured events is the Log Parser's job.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use taskforge_db::models::LogSource;

use super::trait_def::Executor;
use super::types::{ExecutionRequest, ProcessHandle, StreamEvent};

struct ProcessState {
    child: Child,
}

/// Executor adapter for [Claude Code](https://docs.anthropic.com/en/docs/claude-code).
#[derive(Clone)]
pub struct ClaudeCodeExecutor {
    binary_path: String,
    processes: Arc<Mutex<HashMap<u32, ProcessState>>>,
}

impl std::fmt::Debug for ClaudeCodeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeCodeExecutor")
            .field("binary_path", &self.binary_path)
            .finish()
    }
}

impl ClaudeCodeExecutor {
    pub fn new() -> Self {
        Self {
            binary_path: "claude".to_string(),
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            binary_path: path.into(),
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for ClaudeCodeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for ClaudeCodeExecutor {
    fn name(&self) -> &str {
        "claude-code"
    }

    async fn spawn(&self, request: &ExecutionRequest) -> Result<ProcessHandle> {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .current_dir(&request.working_dir);

        for (key, value) in &request.env_vars {
            cmd.env(key, value);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn claude binary at '{}' -- is it installed and on PATH?",
                self.binary_path
            )
        })?;

        let pid = child.id().context("child process has no pid")?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .context("failed to write prompt to claude stdin")?;
            stdin.shutdown().await.context("failed to close claude stdin")?;
        }

        self.processes.lock().await.insert(pid, ProcessState { child });

        Ok(ProcessHandle {
            pid,
            execution_id: request.execution_id,
            executor_name: self.name().to_string(),
        })
    }

    fn stream(&self, handle: &ProcessHandle) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send>> {
        let pid = handle.pid;
        let processes = Arc::clone(&self.processes);

        let stream = async_stream::stream! {
            let taken = {
                let mut procs = processes.lock().await;
                procs.get_mut(&pid).and_then(|state| {
                    let stdout = state.child.stdout.take();
                    let stderr = state.child.stderr.take();
                    stdout.zip(stderr)
                })
            };

            let Some((stdout, stderr)) = taken else {
                warn!(pid, "no stdout/stderr available -- stream already consumed or process missing");
                yield StreamEvent::Exited { code: None };
                return;
            };

            let mut out_lines = BufReader::new(stdout).lines();
            let mut err_lines = BufReader::new(stderr).lines();
            let mut out_done = false;
            let mut err_done = false;

            while !out_done || !err_done {
                tokio::select! {
                    line = out_lines.next_line(), if !out_done => {
                        match line {
                            Ok(Some(content)) => yield StreamEvent::Line { source: LogSource::Stdout, content },
                            Ok(None) => out_done = true,
                            Err(e) => { warn!(error = %e, "error reading claude stdout"); out_done = true; }
                        }
                    }
                    line = err_lines.next_line(), if !err_done => {
                        match line {
                            Ok(Some(content)) => yield StreamEvent::Line { source: LogSource::Stderr, content },
                            Ok(None) => err_done = true,
                            Err(e) => { warn!(error = %e, "error reading claude stderr"); err_done = true; }
                        }
                    }
                }
            }

            let code = {
                let mut procs = processes.lock().await;
                if let Some(state) = procs.get_mut(&pid) {
                    match state.child.wait().await {
                        Ok(status) => status.code(),
                        Err(e) => { warn!(pid, error = %e, "error waiting for claude exit"); None }
                    }
                } else {
                    None
                }
            };
            processes.lock().await.remove(&pid);

            yield StreamEvent::Exited { code };
        };

        Box::pin(stream)
    }

    async fn kill(&self, handle: &ProcessHandle) -> Result<()> {
        let pid = handle.pid;
        let mut processes = self.processes.lock().await;

        if let Some(state) = processes.get_mut(&pid) {
            #[cfg(unix)]
            {
                let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
                if ret != 0 {
                    warn!(pid, "SIGTERM failed, proceeding to SIGKILL");
                }
            }

            let exited = tokio::time::timeout(std::time::Duration::from_secs(10), state.child.wait()).await;
            match exited {
                Ok(Ok(_status)) => debug!(pid, "process exited after SIGTERM"),
                _ => {
                    debug!(pid, "process did not exit after SIGTERM, sending SIGKILL");
                    let _ = state.child.kill().await;
                }
            }
            processes.remove(&pid);
        }

        Ok(())
    }

    async fn is_running(&self, handle: &ProcessHandle) -> bool {
        let pid = handle.pid;
        let mut processes = self.processes.lock().await;

        if let Some(state) = processes.get_mut(&pid) {
            match state.child.try_wait() {
                Ok(Some(_status)) => {
                    processes.remove(&pid);
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!(pid, error = %e, "error checking process status");
                    false
                }
            }
        } else {
            false
        }
    }
}
