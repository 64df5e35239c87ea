//! Executor adapters for AI CLI tools.
//!
//! Defines the [`Executor`] trait all AI CLI adapters implement, plus the
//! supporting types ([`ProcessHandle`], [`StreamEvent`], [`ExecutionRequest`])
//! and the [`ExecutorRegistry`] for runtime lookup by `Project.executor_type`.
//!
//! ```text
//! Implementation/Planning Orchestrator
//!     |
//!     v
//! ExecutorRegistry --get("claude-code")--> &dyn Executor
//!     |
//!     |   spawn(request) ----> ProcessHandle { pid, execution_id, ... }
//!     |   stream(handle) ----> Stream<StreamEvent>  --> Log Parser
//!     |   kill(handle)
//!     |   is_running(handle)
//! ```

pub mod claude_code;
pub mod fake_code;
pub mod registry;
pub mod trait_def;
pub mod types;

pub use claude_code::ClaudeCodeExecutor;
pub use fake_code::FakeCodeExecutor;
pub use registry::ExecutorRegistry;
pub use trait_def::Executor;
pub use types::{ExecutionRequest, ProcessHandle, StreamEvent};
