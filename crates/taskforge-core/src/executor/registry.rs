//! Executor registry -- a named collection of available AI CLI adapters.
//!
//! Looks up an executor by the `executor_type` tag stored on a `Project`
//! row (e.g. `claude-code`). Adding a new AI CLI means implementing
//! [`super::Executor`] and registering it; no class hierarchy required.

use std::collections::HashMap;

use super::trait_def::Executor;

#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Box<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor adapter, keyed by [`Executor::name`].
    /// Replaces and returns any previous registrant under the same name.
    pub fn register(&mut self, executor: impl Executor + 'static) -> Option<Box<dyn Executor>> {
        let name = executor.name().to_string();
        self.executors.insert(name, Box::new(executor))
    }

    pub fn get(&self, name: &str) -> Option<&dyn Executor> {
        self.executors.get(name).map(|b| b.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.executors.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::types::{ExecutionRequest, ProcessHandle, StreamEvent};
    use anyhow::Result;
    use async_trait::async_trait;
    use futures::Stream;
    use std::pin::Pin;

    struct FakeExecutor {
        executor_name: String,
    }

    impl FakeExecutor {
        fn new(name: &str) -> Self {
            Self {
                executor_name: name.to_string(),
            }
        }
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        fn name(&self) -> &str {
            &self.executor_name
        }

        async fn spawn(&self, request: &ExecutionRequest) -> Result<ProcessHandle> {
            Ok(ProcessHandle {
                pid: 42,
                execution_id: request.execution_id,
                executor_name: self.executor_name.clone(),
            })
        }

        fn stream(&self, _handle: &ProcessHandle) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send>> {
            Box::pin(futures::stream::empty())
        }

        async fn kill(&self, _handle: &ProcessHandle) -> Result<()> {
            Ok(())
        }

        async fn is_running(&self, _handle: &ProcessHandle) -> bool {
            false
        }
    }

    #[test]
    fn registry_starts_empty() {
        let registry = ExecutorRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn register_and_get() {
        let mut registry = ExecutorRegistry::new();
        let old = registry.register(FakeExecutor::new("alpha"));
        assert!(old.is_none());
        assert_eq!(registry.get("alpha").unwrap().name(), "alpha");
    }

    #[test]
    fn register_replaces_existing() {
        let mut registry = ExecutorRegistry::new();
        registry.register(FakeExecutor::new("alpha"));
        let old = registry.register(FakeExecutor::new("alpha"));
        assert!(old.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn get_missing_returns_none() {
        let registry = ExecutorRegistry::new();
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn list_returns_all_names() {
        let mut registry = ExecutorRegistry::new();
        registry.register(FakeExecutor::new("alpha"));
        registry.register(FakeExecutor::new("beta"));
        let mut names = registry.list();
        names.sort();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn registry_debug_shows_names() {
        let mut registry = ExecutorRegistry::new();
        registry.register(FakeExecutor::new("test-executor"));
        let debug = format!("{registry:?}");
        assert!(debug.contains("test-executor"));
    }
}
