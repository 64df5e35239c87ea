//! Database query functions for the `plans` and `plan_versions` tables.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Plan, PlanStatus, PlanVersion};

/// Insert the first version of a plan for a task (invariant I1: at most one
/// non-deleted plan per task, enforced by a partial unique index).
pub async fn insert_plan(pool: &PgPool, task_id: Uuid, content: &str) -> Result<Plan> {
    let plan = sqlx::query_as::<_, Plan>(
        "INSERT INTO plans (task_id, content) VALUES ($1, $2) RETURNING *",
    )
    .bind(task_id)
    .bind(content)
    .fetch_one(pool)
    .await
    .context("failed to insert plan")?;

    Ok(plan)
}

pub async fn get_plan(pool: &PgPool, id: Uuid) -> Result<Option<Plan>> {
    let plan =
        sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch plan")?;

    Ok(plan)
}

pub async fn get_plan_for_task(pool: &PgPool, task_id: Uuid) -> Result<Option<Plan>> {
    let plan = sqlx::query_as::<_, Plan>(
        "SELECT * FROM plans WHERE task_id = $1 AND deleted_at IS NULL",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch plan for task")?;

    Ok(plan)
}

pub async fn transition_plan_status(
    pool: &PgPool,
    id: Uuid,
    from: PlanStatus,
    to: PlanStatus,
) -> Result<u64> {
    let result = sqlx::query("UPDATE plans SET status = $1 WHERE id = $2 AND status = $3")
        .bind(to)
        .bind(id)
        .bind(from)
        .execute(pool)
        .await
        .context("failed to transition plan status")?;

    Ok(result.rows_affected())
}

/// Replace a plan's content with a new revision, bumping `version` and
/// archiving the previous content into `plan_versions`. Runs in a single
/// transaction.
pub async fn revise_plan(pool: &PgPool, id: Uuid, new_content: &str) -> Result<Plan> {
    let mut tx = pool.begin().await.context("failed to start transaction")?;

    let current = sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to lock plan row")?
        .with_context(|| format!("plan {id} not found"))?;

    sqlx::query(
        "INSERT INTO plan_versions (plan_id, version, content) VALUES ($1, $2, $3)",
    )
    .bind(current.id)
    .bind(current.version)
    .bind(&current.content)
    .execute(&mut *tx)
    .await
    .context("failed to archive plan version")?;

    let updated = sqlx::query_as::<_, Plan>(
        "UPDATE plans SET content = $1, version = version + 1 WHERE id = $2 RETURNING *",
    )
    .bind(new_content)
    .bind(id)
    .fetch_one(&mut *tx)
    .await
    .context("failed to update plan content")?;

    tx.commit().await.context("failed to commit plan revision")?;

    Ok(updated)
}

/// Soft-delete a plan so a task sent back to planning can get a fresh one
/// (invariant I1 allows only one non-deleted plan per task).
pub async fn soft_delete_plan(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE plans SET deleted_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to soft-delete plan")?;

    Ok(())
}

pub async fn list_plan_versions(pool: &PgPool, plan_id: Uuid) -> Result<Vec<PlanVersion>> {
    let versions = sqlx::query_as::<_, PlanVersion>(
        "SELECT * FROM plan_versions WHERE plan_id = $1 ORDER BY version ASC",
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await
    .context("failed to list plan versions")?;

    Ok(versions)
}
