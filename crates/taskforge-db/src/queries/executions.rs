//! Database query functions for the `executions` and `processes` tables.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Execution, ExecutionStatus, Process, ProcessStatus};

pub async fn insert_execution(pool: &PgPool, task_id: Uuid) -> Result<Execution> {
    let execution = sqlx::query_as::<_, Execution>(
        "INSERT INTO executions (task_id) VALUES ($1) RETURNING *",
    )
    .bind(task_id)
    .fetch_one(pool)
    .await
    .context("failed to insert execution")?;

    Ok(execution)
}

pub async fn get_execution(pool: &PgPool, id: Uuid) -> Result<Option<Execution>> {
    let execution = sqlx::query_as::<_, Execution>("SELECT * FROM executions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch execution")?;

    Ok(execution)
}

pub async fn list_executions_for_task(pool: &PgPool, task_id: Uuid) -> Result<Vec<Execution>> {
    let executions = sqlx::query_as::<_, Execution>(
        "SELECT * FROM executions WHERE task_id = $1 ORDER BY created_at ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list executions for task")?;

    Ok(executions)
}

pub async fn mark_execution_running(pool: &PgPool, id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE executions SET status = $1, started_at = now() \
         WHERE id = $2 AND status = $3",
    )
    .bind(ExecutionStatus::Running)
    .bind(id)
    .bind(ExecutionStatus::Pending)
    .execute(pool)
    .await
    .context("failed to mark execution running")?;

    Ok(result.rows_affected())
}

pub async fn update_execution_progress(pool: &PgPool, id: Uuid, progress: f64) -> Result<u64> {
    let result = sqlx::query("UPDATE executions SET progress = $1 WHERE id = $2")
        .bind(progress)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update execution progress")?;

    Ok(result.rows_affected())
}

pub async fn complete_execution(
    pool: &PgPool,
    id: Uuid,
    status: ExecutionStatus,
    result: Option<serde_json::Value>,
    error_message: Option<&str>,
) -> Result<u64> {
    let affected = sqlx::query(
        "UPDATE executions \
         SET status = $1, completed_at = now(), result = $2, error_message = $3 \
         WHERE id = $4 AND status = $5",
    )
    .bind(status)
    .bind(result)
    .bind(error_message)
    .bind(id)
    .bind(ExecutionStatus::Running)
    .execute(pool)
    .await
    .context("failed to complete execution")?;

    Ok(affected.rows_affected())
}

pub async fn insert_process(
    pool: &PgPool,
    execution_id: Uuid,
    command: &str,
    working_dir: &str,
    env: serde_json::Value,
) -> Result<Process> {
    let process = sqlx::query_as::<_, Process>(
        "INSERT INTO processes (execution_id, command, working_dir, env) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(execution_id)
    .bind(command)
    .bind(working_dir)
    .bind(env)
    .fetch_one(pool)
    .await
    .context("failed to insert process")?;

    Ok(process)
}

pub async fn set_process_pid(pool: &PgPool, id: Uuid, os_pid: i32) -> Result<u64> {
    let result = sqlx::query("UPDATE processes SET os_pid = $1 WHERE id = $2")
        .bind(os_pid)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to set process pid")?;

    Ok(result.rows_affected())
}

pub async fn finish_process(
    pool: &PgPool,
    id: Uuid,
    status: ProcessStatus,
    resource_usage: Option<serde_json::Value>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE processes SET status = $1, resource_usage = $2 WHERE id = $3",
    )
    .bind(status)
    .bind(resource_usage)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to finish process")?;

    Ok(result.rows_affected())
}

/// Executions left `running` with no terminal update, used by restart
/// recovery to reconcile process state after a crash.
pub async fn list_orphaned_executions(pool: &PgPool) -> Result<Vec<Execution>> {
    let executions = sqlx::query_as::<_, Execution>(
        "SELECT * FROM executions WHERE status = 'running' ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list orphaned executions")?;

    Ok(executions)
}
