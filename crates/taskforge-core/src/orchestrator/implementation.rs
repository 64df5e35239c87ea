//! Implementation Orchestrator: drives a task `PLAN_REVIEWING -> IMPLEMENTING
//! -> CODE_REVIEWING` once its plan has been approved.
//!
//! Invoked by the job queue consumer when it claims a `task_implementation`
//! job. Idempotent: re-running after a partial commit/push/PR-open finds
//! the existing open PR for the branch rather than opening a duplicate.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use taskforge_db::models::{PlanStatus, Project, TaskStatus};
use taskforge_db::queries::{plans, projects, pull_requests, tasks, worktrees};

use crate::config::WorktreeLimits;
use crate::events::{EventBus, EventPayload};
use crate::executor::ExecutorRegistry;
use crate::git;
use crate::prmonitor::HostingClient;
use crate::state::dispatch;
use crate::supervisor::{Supervisor, SupervisorOutcome, SupervisorRequest};
use crate::worktree::WorktreeManager;

const REMOTE_NAME: &str = "origin";

pub struct ImplementationOrchestrator<'a, H: HostingClient> {
    pool: PgPool,
    bus: EventBus,
    executors: &'a ExecutorRegistry,
    hosting: &'a H,
    default_timeout: Duration,
    worktree_limits: WorktreeLimits,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImplementationOutcome {
    PrOpened { pull_request_id: Uuid },
    Failed { reason: String },
    /// The task was already past this stage, or its plan is not approved.
    Skipped,
}

impl<'a, H: HostingClient> ImplementationOrchestrator<'a, H> {
    pub fn new(
        pool: PgPool,
        bus: EventBus,
        executors: &'a ExecutorRegistry,
        hosting: &'a H,
        default_timeout: Duration,
        worktree_limits: WorktreeLimits,
    ) -> Self {
        Self { pool, bus, executors, hosting, default_timeout, worktree_limits }
    }

    pub async fn run(&self, task_id: Uuid) -> Result<ImplementationOutcome> {
        let task = tasks::get_task(&self.pool, task_id)
            .await?
            .with_context(|| format!("task {task_id} not found"))?;

        if !matches!(task.status, TaskStatus::PlanReviewing | TaskStatus::Implementing) {
            return Ok(ImplementationOutcome::Skipped);
        }

        let plan = plans::get_plan_for_task(&self.pool, task_id)
            .await?
            .with_context(|| format!("no plan found for task {task_id}"))?;
        if plan.status != PlanStatus::Approved {
            return Ok(ImplementationOutcome::Skipped);
        }

        let project = projects::get_project(&self.pool, task.project_id)
            .await?
            .with_context(|| format!("project {} not found", task.project_id))?;

        let branch_name = task
            .branch_name
            .clone()
            .unwrap_or_else(|| WorktreeManager::branch_name(task_id, &task.title));

        let worktree_path = match self.ensure_worktree(&project, task_id, &branch_name).await {
            Ok(path) => path,
            Err(e) => return self.fail(task_id, &format!("failed to provision worktree: {e}")).await,
        };

        if task.status == TaskStatus::PlanReviewing {
            dispatch::approve_plan(&self.pool, task_id).await?;
        }

        let prompt = build_implementation_prompt(&task.title, &task.description, &plan.content);

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
                working_dir: worktree_path.clone(),
                env_vars: HashMap::new(),
                timeout: self.default_timeout,
            })
            .await?;

        match run.outcome {
            SupervisorOutcome::Completed => {}
            SupervisorOutcome::Failed { message } => return self.fail(task_id, &message).await,
            SupervisorOutcome::TimedOut => return self.fail(task_id, "implementation timed out").await,
        }

        let commit_message = format!("task: {}\n\n{}", task.title, plan_digest(&plan.content));
        if let Err(e) = git::commit_all(&worktree_path, &commit_message).await {
            return self.fail(task_id, &format!("failed to commit changes: {e}")).await;
        }
        if let Err(e) = git::push(&worktree_path, REMOTE_NAME, &branch_name).await {
            return self.fail(task_id, &format!("failed to push branch: {e}")).await;
        }

        let repository = project
            .remote_repository_url
            .as_deref()
            .and_then(extract_owner_repo)
            .context("project has no remote repository configured")?;

        let pr = match pull_requests::find_open_pr_for_branch(&self.pool, task_id, &branch_name).await? {
            Some(existing) => existing,
            None => {
                let body = format!("Implements task {task_id}.");
                let (remote_number, url) = self
                    .hosting
                    .open_pull_request(&repository, &project.main_branch, &branch_name, &task.title, &body)
                    .await
                    .map_err(|e| anyhow::anyhow!("failed to open pull request: {e}"))?;
                pull_requests::insert_pull_request(
                    &self.pool,
                    task_id,
                    remote_number,
                    &repository,
                    &branch_name,
                    &project.main_branch,
                    &url,
                )
                .await?
            }
        };

        tasks::set_pr_url(&self.pool, task_id, &pr.url).await.ok();
        dispatch::enter_code_reviewing(&self.pool, task_id).await?;

        self.bus
            .publish(task.project_id, EventPayload::PrCreated { task_id, pull_request_id: pr.id })
            .await
            .ok();
        self.bus
            .publish(
                task.project_id,
                EventPayload::TaskStatusChanged {
                    task_id,
                    from: Some("implementing".to_string()),
                    to: "code_reviewing".to_string(),
                },
            )
            .await
            .ok();

        Ok(ImplementationOutcome::PrOpened { pull_request_id: pr.id })
    }

    async fn ensure_worktree(&self, project: &Project, task_id: Uuid, branch_name: &str) -> Result<std::path::PathBuf> {
        if let Some(existing) = worktrees::get_worktree_for_task(&self.pool, task_id).await? {
            let path = std::path::PathBuf::from(&existing.worktree_path);
            if path.is_dir() {
                return Ok(path);
            }
            tracing::warn!(task_id = %task_id, path = %path.display(), "worktree missing on disk, recreating");
        }

        let manager = WorktreeManager::new(
            &project.worktree_base_path,
            self.worktree_limits.root.clone(),
            self.worktree_limits.max_path_len,
            self.worktree_limits.min_free_disk_bytes,
        )
        .await?;
        let info = manager.create_worktree(project.id, task_id, &project.main_branch, branch_name).await?;
        Ok(info.path)
    }

    async fn fail(&self, task_id: Uuid, reason: &str) -> Result<ImplementationOutcome> {
        tracing::warn!(task_id = %task_id, reason, "implementation failed");
        dispatch::request_changes(&self.pool, task_id, reason).await.ok();
        Ok(ImplementationOutcome::Failed { reason: reason.to_string() })
    }
}

fn build_implementation_prompt(title: &str, description: &str, plan: &str) -> String {
    format!(
        "Implement the following task according to the approved plan. Make the \
         necessary file changes in this working directory.\n\nTitle: {title}\n\n\
         Description:\n{description}\n\nApproved plan:\n{plan}\n"
    )
}

/// Short, stable fingerprint of a plan's content for the commit message.
fn plan_digest(content: &str) -> String {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    lines.next().map(|l| l.trim().to_string()).unwrap_or_else(|| "(no plan summary)".to_string())
}

/// Extract `owner/repo` from a git remote URL (`https://host/owner/repo`,
/// `https://host/owner/repo.git`, or `git@host:owner/repo.git`).
fn extract_owner_repo(remote_url: &str) -> Option<String> {
    let trimmed = remote_url.trim_end_matches(".git");
    let tail = trimmed.rsplit_once(':').map(|(_, t)| t).unwrap_or(trimmed);
    let parts: Vec<&str> = tail.rsplit('/').take(2).collect();
    if parts.len() == 2 {
        Some(format!("{}/{}", parts[1], parts[0]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_owner_repo_from_https_url() {
        assert_eq!(extract_owner_repo("https://github.com/acme/widgets.git"), Some("acme/widgets".to_string()));
    }

    #[test]
    fn extracts_owner_repo_from_ssh_url() {
        assert_eq!(extract_owner_repo("git@github.com:acme/widgets.git"), Some("acme/widgets".to_string()));
    }

    #[test]
    fn plan_digest_takes_first_nonblank_line() {
        assert_eq!(plan_digest("\n\n## Summary\nDo the thing\n"), "## Summary");
    }

    #[test]
    fn implementation_prompt_includes_plan_content() {
        let prompt = build_implementation_prompt("Add health check", "desc", "1. Add route\n2. Add test");
        assert!(prompt.contains("Add route"));
    }
}
