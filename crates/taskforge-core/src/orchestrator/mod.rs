//! Orchestrators: the two job handlers that drive a task through its
//! planning and implementation phases. Each wraps the Supervisor, Git
//! Facade, and Worktree Manager behind a single `run(task_id)` entry point
//! invoked by the job queue consumer.

pub mod implementation;
pub mod planning;

pub use implementation::{ImplementationOrchestrator, ImplementationOutcome};
pub use planning::{PlanningOrchestrator, PlanningOutcome};
