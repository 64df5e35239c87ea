//! Planning Orchestrator: drives a task `TODO -> PLANNING -> PLAN_REVIEWING`.
//!
//! Invoked by the job queue consumer when it claims a `task_planning` job.
//! Idempotent: a job retried after partial progress resumes from whatever
//! status the task is actually in rather than redoing completed steps.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use taskforge_db::models::{GitStatus, PlanStatus, Project, TaskStatus};
use taskforge_db::queries::{plans, projects, tasks};

use crate::config::WorktreeLimits;
use crate::events::{EventBus, EventPayload};
use crate::executor::ExecutorRegistry;
use crate::state::dispatch;
use crate::supervisor::{Supervisor, SupervisorOutcome, SupervisorRequest};
use crate::worktree::WorktreeManager;

pub struct PlanningOrchestrator<'a> {
    pool: PgPool,
    bus: EventBus,
    executors: &'a ExecutorRegistry,
    default_timeout: Duration,
    worktree_limits: WorktreeLimits,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanningOutcome {
    PlanCreated { plan_id: Uuid },
    ReturnedToTodo { reason: String },
    Cancelled { reason: String },
    /// The task was already past this stage; nothing to do.
    Skipped,
}

impl<'a> PlanningOrchestrator<'a> {
    pub fn new(
        pool: PgPool,
        bus: EventBus,
        executors: &'a ExecutorRegistry,
        default_timeout: Duration,
        worktree_limits: WorktreeLimits,
    ) -> Self {
        Self { pool, bus, executors, default_timeout, worktree_limits }
    }

    pub async fn run(&self, task_id: Uuid) -> Result<PlanningOutcome> {
        let task = tasks::get_task(&self.pool, task_id)
            .await?
            .with_context(|| format!("task {task_id} not found"))?;

        match task.status {
            TaskStatus::Todo => {
                dispatch::start_planning(&self.pool, task_id).await?;
            }
            TaskStatus::Planning => {
                // Already in progress; a retried job resumes here.
            }
            _ => return Ok(PlanningOutcome::Skipped),
        }

        let project = projects::get_project(&self.pool, task.project_id)
            .await?
            .with_context(|| format!("project {} not found", task.project_id))?;

        let worktree = match self.ensure_worktree(&project, task_id, &task.title).await {
            Ok(path) => path,
            Err(e) => return self.fail(task_id, &format!("failed to provision worktree: {e}")).await,
        };

        let prompt = build_planning_prompt(&task.title, &task.description);

        let executor = match self.executors.get(&project.executor_type) {
            Some(executor) => executor,
            None => {
                return self
                    .fail(task_id, &format!("no executor registered for '{}'", project.executor_type))
                    .await;
            }
        };

        let supervisor = Supervisor::new(self.pool.clone(), self.bus.clone(), executor);
        let run = supervisor
            .run(SupervisorRequest {
                task_id,
                prompt,
                working_dir: worktree,
                env_vars: HashMap::new(),
                timeout: self.default_timeout,
            })
            .await?;

        match run.outcome {
            SupervisorOutcome::Completed if !run.assistant_text.trim().is_empty() => {
                let plan = plans::insert_plan(&self.pool, task_id, run.assistant_text.trim()).await?;
                plans::transition_plan_status(&self.pool, plan.id, PlanStatus::Draft, PlanStatus::Reviewing).await?;
                dispatch::enter_plan_reviewing(&self.pool, task_id).await?;
                self.bus.publish(task.project_id, EventPayload::PlanUpdated { task_id, plan_id: plan.id }).await.ok();
                self.bus
                    .publish(
                        task.project_id,
                        EventPayload::TaskStatusChanged {
                            task_id,
                            from: Some("planning".to_string()),
                            to: "plan_reviewing".to_string(),
                        },
                    )
                    .await
                    .ok();
                Ok(PlanningOutcome::PlanCreated { plan_id: plan.id })
            }
            SupervisorOutcome::Completed => self.fail(task_id, "planner produced no plan content").await,
            SupervisorOutcome::Failed { message } => self.fail(task_id, &message).await,
            SupervisorOutcome::TimedOut => self.fail(task_id, "planner timed out").await,
        }
    }

    async fn ensure_worktree(&self, project: &Project, task_id: Uuid, title: &str) -> Result<std::path::PathBuf> {
        if let Some(existing) = taskforge_db::queries::worktrees::get_worktree_for_task(&self.pool, task_id).await? {
            return Ok(std::path::PathBuf::from(existing.worktree_path));
        }

        let manager = WorktreeManager::new(
            &project.worktree_base_path,
            self.worktree_limits.root.clone(),
            self.worktree_limits.max_path_len,
            self.worktree_limits.min_free_disk_bytes,
        )
        .await?;
        let branch_name = WorktreeManager::branch_name(task_id, title);
        let info = manager.create_worktree(project.id, task_id, &project.main_branch, &branch_name).await?;

        if let Some(script) = &project.init_script {
            if let Err(e) = manager.run_init_script(&info.path, script).await {
                tracing::warn!(task_id = %task_id, error = %e, "init script failed, continuing anyway");
            }
        }

        taskforge_db::queries::worktrees::insert_worktree(
            &self.pool,
            task_id,
            project.id,
            &branch_name,
            &info.path.to_string_lossy(),
        )
        .await?;
        tasks::assign_worktree_metadata(&self.pool, task_id, &branch_name, &info.path.to_string_lossy()).await?;
        tasks::transition_git_status(&self.pool, task_id, GitStatus::None, GitStatus::Active).await.ok();

        Ok(info.path)
    }

    async fn fail(&self, task_id: Uuid, reason: &str) -> Result<PlanningOutcome> {
        tracing::warn!(task_id = %task_id, reason, "planning failed");

        let retried = tasks::transition_task_status(&self.pool, task_id, TaskStatus::Planning, TaskStatus::Todo)
            .await
            .unwrap_or(0);
        if retried > 0 {
            return Ok(PlanningOutcome::ReturnedToTodo { reason: reason.to_string() });
        }

        dispatch::cancel_task(&self.pool, task_id, TaskStatus::Planning, reason).await.ok();
        Ok(PlanningOutcome::Cancelled { reason: reason.to_string() })
    }
}

fn build_planning_prompt(title: &str, description: &str) -> String {
    format!(
        "You are planning the implementation of the following task. Produce a \
         concise, actionable implementation plan in markdown. Do not write code \
         yet.\n\nTitle: {title}\n\nDescription:\n{description}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planning_prompt_includes_title_and_description() {
        let prompt = build_planning_prompt("Add health check", "Expose GET /healthz");
        assert!(prompt.contains("Add health check"));
        assert!(prompt.contains("Expose GET /healthz"));
    }
}
