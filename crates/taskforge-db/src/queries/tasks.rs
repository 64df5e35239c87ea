//! Database query functions for the `tasks` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{GitStatus, Task, TaskStatus};

pub async fn insert_task(
    pool: &PgPool,
    project_id: Uuid,
    title: &str,
    description: &str,
) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (project_id, title, description) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(project_id)
    .bind(title)
    .bind(description)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

pub async fn get_task(pool: &PgPool, id: Uuid) -> Result<Option<Task>> {
    let task =
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch task")?;

    Ok(task)
}

pub async fn list_tasks_for_project(pool: &PgPool, project_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE project_id = $1 AND deleted_at IS NULL ORDER BY created_at ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for project")?;

    Ok(tasks)
}

/// Atomically transition a task's status. Optimistic locking: the row is
/// only updated if its current status matches `from`. Returns the number of
/// rows affected (0 means someone else moved the task first).
pub async fn transition_task_status<'a>(
    executor: impl sqlx::PgExecutor<'a>,
    task_id: Uuid,
    from: TaskStatus,
    to: TaskStatus,
) -> Result<u64> {
    let result = sqlx::query("UPDATE tasks SET status = $1 WHERE id = $2 AND status = $3")
        .bind(to)
        .bind(task_id)
        .bind(from)
        .execute(executor)
        .await
        .context("failed to transition task status")?;

    Ok(result.rows_affected())
}

/// Assign the branch name and worktree path to a task, moving its git
/// status forward. Used when the Worktree Manager finishes provisioning.
pub async fn assign_worktree_metadata(
    pool: &PgPool,
    task_id: Uuid,
    branch_name: &str,
    worktree_path: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET branch_name = $1, worktree_path = $2, git_status = $3 \
         WHERE id = $4",
    )
    .bind(branch_name)
    .bind(worktree_path)
    .bind(GitStatus::Active)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to assign worktree metadata")?;

    Ok(result.rows_affected())
}

/// Atomically transition a task's git status. Optimistic locking on
/// `git_status`, mirroring `transition_task_status`.
pub async fn transition_git_status(
    pool: &PgPool,
    task_id: Uuid,
    from: GitStatus,
    to: GitStatus,
) -> Result<u64> {
    let result = sqlx::query("UPDATE tasks SET git_status = $1 WHERE id = $2 AND git_status = $3")
        .bind(to)
        .bind(task_id)
        .bind(from)
        .execute(pool)
        .await
        .context("failed to transition git status")?;

    Ok(result.rows_affected())
}

pub async fn set_pr_url(pool: &PgPool, task_id: Uuid, pr_url: &str) -> Result<u64> {
    let result = sqlx::query("UPDATE tasks SET pr_url = $1 WHERE id = $2")
        .bind(pr_url)
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to set task pr_url")?;

    Ok(result.rows_affected())
}

/// Status counts across a project's tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskProgress {
    pub todo: i64,
    pub planning: i64,
    pub plan_reviewing: i64,
    pub implementing: i64,
    pub code_reviewing: i64,
    pub done: i64,
    pub cancelled: i64,
    pub total: i64,
}

pub async fn get_task_progress(pool: &PgPool, project_id: Uuid) -> Result<TaskProgress> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status::text, COUNT(*) as cnt \
         FROM tasks \
         WHERE project_id = $1 AND deleted_at IS NULL \
         GROUP BY status",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to get task progress")?;

    let mut progress = TaskProgress::default();
    for (status, count) in &rows {
        match status.as_str() {
            "todo" => progress.todo = *count,
            "planning" => progress.planning = *count,
            "plan_reviewing" => progress.plan_reviewing = *count,
            "implementing" => progress.implementing = *count,
            "code_reviewing" => progress.code_reviewing = *count,
            "done" => progress.done = *count,
            "cancelled" => progress.cancelled = *count,
            _ => {}
        }
        progress.total += count;
    }
    Ok(progress)
}

/// Tasks left in a non-terminal status, used by restart recovery to find
/// work that was in flight when the orchestrator last stopped.
pub async fn list_in_flight_tasks(pool: &PgPool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE deleted_at IS NULL \
           AND status NOT IN ('done', 'cancelled') \
         ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list in-flight tasks")?;

    Ok(tasks)
}
