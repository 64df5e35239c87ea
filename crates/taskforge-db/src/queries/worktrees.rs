//! Database query functions for the `worktrees` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Worktree, WorktreeStatus};

pub async fn insert_worktree(
    pool: &PgPool,
    task_id: Uuid,
    project_id: Uuid,
    branch_name: &str,
    worktree_path: &str,
) -> Result<Worktree> {
    let worktree = sqlx::query_as::<_, Worktree>(
        "INSERT INTO worktrees (task_id, project_id, branch_name, worktree_path) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(project_id)
    .bind(branch_name)
    .bind(worktree_path)
    .fetch_one(pool)
    .await
    .context("failed to insert worktree")?;

    Ok(worktree)
}

pub async fn get_worktree_for_task(pool: &PgPool, task_id: Uuid) -> Result<Option<Worktree>> {
    let worktree = sqlx::query_as::<_, Worktree>(
        "SELECT * FROM worktrees WHERE task_id = $1 AND deleted_at IS NULL",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch worktree for task")?;

    Ok(worktree)
}

pub async fn transition_worktree_status(
    pool: &PgPool,
    id: Uuid,
    from: WorktreeStatus,
    to: WorktreeStatus,
) -> Result<u64> {
    let result = sqlx::query("UPDATE worktrees SET status = $1 WHERE id = $2 AND status = $3")
        .bind(to)
        .bind(id)
        .bind(from)
        .execute(pool)
        .await
        .context("failed to transition worktree status")?;

    Ok(result.rows_affected())
}

pub async fn soft_delete_worktree(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE worktrees SET deleted_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to soft-delete worktree")?;

    Ok(())
}

/// Worktrees stuck in `creating` or `cleaning`, used by restart recovery.
pub async fn list_orphaned_worktrees(pool: &PgPool) -> Result<Vec<Worktree>> {
    let worktrees = sqlx::query_as::<_, Worktree>(
        "SELECT * FROM worktrees \
         WHERE deleted_at IS NULL AND status IN ('creating', 'cleaning') \
         ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list orphaned worktrees")?;

    Ok(worktrees)
}
