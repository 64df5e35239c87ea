//! The `Executor` trait -- the adapter interface for AI CLI runtimes.
//!
//! Each concrete executor (Claude Code, the in-repo test double, etc.)
//! implements this trait. It is intentionally object-safe so it can be
//! stored as `Box<dyn Executor>` in the [`super::ExecutorRegistry`].

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;

use super::types::{ExecutionRequest, ProcessHandle, StreamEvent};

/// Adapter interface for spawning and managing an AI CLI invocation.
///
/// Implementors wrap a specific CLI (`claude`, an in-repo fake) and
/// translate its process lifecycle into the common [`StreamEvent`] stream.
/// Classifying the raw lines into structured events is the Log Parser's
/// job, not the executor's -- the executor only knows about bytes and
/// process state.
#[async_trait]
pub trait Executor: Send + Sync {
    /// The executor-type tag stored on the `Project` row (e.g. `"claude-code"`).
    fn name(&self) -> &str;

    /// Spawn a CLI process for the given execution request.
    async fn spawn(&self, request: &ExecutionRequest) -> Result<ProcessHandle>;

    /// Stream combined stdout/stderr lines followed by an `Exited` marker.
    ///
    /// May only be consumed once per handle; a second call after the
    /// stream has been drained yields an immediate `Exited` event.
    fn stream(&self, handle: &ProcessHandle) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

    /// Terminate the process: `SIGTERM`, a grace period, then `SIGKILL`.
    async fn kill(&self, handle: &ProcessHandle) -> Result<()>;

    /// Check whether the process is still alive.
    async fn is_running(&self, handle: &ProcessHandle) -> bool;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Executor) {}
};

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_db::models::LogSource;
    use uuid::Uuid;

    struct NoopExecutor;

    #[async_trait]
    impl Executor for NoopExecutor {
        fn name(&self) -> &str {
            "noop"
        }

        async fn spawn(&self, request: &ExecutionRequest) -> Result<ProcessHandle> {
            Ok(ProcessHandle {
                pid: 0,
                execution_id: request.execution_id,
                executor_name: "noop".to_string(),
            })
        }

        fn stream(&self, _handle: &ProcessHandle) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send>> {
            Box::pin(futures::stream::once(async { StreamEvent::Exited { code: Some(0) } }))
        }

        async fn kill(&self, _handle: &ProcessHandle) -> Result<()> {
            Ok(())
        }

        async fn is_running(&self, _handle: &ProcessHandle) -> bool {
            false
        }
    }

    #[test]
    fn executor_is_object_safe() {
        let executor: Box<dyn Executor> = Box::new(NoopExecutor);
        assert_eq!(executor.name(), "noop");
    }

    #[tokio::test]
    async fn noop_executor_spawn_and_query() {
        use futures::StreamExt;

        let executor: Box<dyn Executor> = Box::new(NoopExecutor);
        let request = ExecutionRequest {
            execution_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            prompt: "do the thing".to_string(),
            working_dir: std::path::PathBuf::from("/tmp"),
            env_vars: std::collections::HashMap::new(),
        };

        let handle = executor.spawn(&request).await.unwrap();
        assert_eq!(handle.pid, 0);
        assert!(!executor.is_running(&handle).await);
        executor.kill(&handle).await.unwrap();

        let events: Vec<StreamEvent> = executor.stream(&handle).collect().await;
        assert_eq!(events, vec![StreamEvent::Exited { code: Some(0) }]);
        let _ = LogSource::Stdout;
    }
}
