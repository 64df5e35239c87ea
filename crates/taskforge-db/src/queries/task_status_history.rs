//! Database query functions for the `task_status_histories` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{TaskStatus, TaskStatusHistory};

pub async fn record_transition<'a>(
    executor: impl sqlx::PgExecutor<'a>,
    task_id: Uuid,
    from_status: Option<TaskStatus>,
    to_status: TaskStatus,
    changed_by: &str,
    reason: Option<&str>,
) -> Result<TaskStatusHistory> {
    let row = sqlx::query_as::<_, TaskStatusHistory>(
        "INSERT INTO task_status_histories (task_id, from_status, to_status, changed_by, reason) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(from_status)
    .bind(to_status)
    .bind(changed_by)
    .bind(reason)
    .fetch_one(executor)
    .await
    .context("failed to record task status transition")?;

    Ok(row)
}

pub async fn list_for_task(pool: &PgPool, task_id: Uuid) -> Result<Vec<TaskStatusHistory>> {
    let rows = sqlx::query_as::<_, TaskStatusHistory>(
        "SELECT * FROM task_status_histories WHERE task_id = $1 ORDER BY created_at ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list task status history")?;

    Ok(rows)
}
