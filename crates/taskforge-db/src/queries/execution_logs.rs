//! Database query functions for the `execution_logs` table.
//!
//! Log lines are append-only and strictly ordered per execution (invariant
//! I5): `line_number` is assigned by the caller, which must hold the
//! monotonically increasing counter for its execution (the Log Parser does
//! this in memory while draining one process's output stream).

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ExecutionLog, LogSource, LogType};

/// Fields needed to append one parsed log line.
#[derive(Debug, Clone)]
pub struct NewExecutionLog {
    pub execution_id: Uuid,
    pub line_number: i64,
    pub level: String,
    pub source: LogSource,
    pub message: String,
    pub log_type: LogType,
    pub tool_name: Option<String>,
    pub tool_use_id: Option<String>,
    pub parsed_content: Option<serde_json::Value>,
    pub is_error: bool,
    pub duration_ms: Option<i64>,
    pub num_turns: Option<i32>,
}

pub async fn insert_execution_log(pool: &PgPool, new: &NewExecutionLog) -> Result<ExecutionLog> {
    let row = sqlx::query_as::<_, ExecutionLog>(
        "INSERT INTO execution_logs \
         (execution_id, line_number, level, source, message, log_type, \
          tool_name, tool_use_id, parsed_content, is_error, duration_ms, num_turns) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         RETURNING *",
    )
    .bind(new.execution_id)
    .bind(new.line_number)
    .bind(&new.level)
    .bind(new.source)
    .bind(&new.message)
    .bind(new.log_type)
    .bind(&new.tool_name)
    .bind(&new.tool_use_id)
    .bind(&new.parsed_content)
    .bind(new.is_error)
    .bind(new.duration_ms)
    .bind(new.num_turns)
    .fetch_one(pool)
    .await
    .with_context(|| {
        format!(
            "failed to insert execution log line {} for execution {}",
            new.line_number, new.execution_id
        )
    })?;

    Ok(row)
}

pub async fn list_logs_for_execution(
    pool: &PgPool,
    execution_id: Uuid,
) -> Result<Vec<ExecutionLog>> {
    let rows = sqlx::query_as::<_, ExecutionLog>(
        "SELECT * FROM execution_logs WHERE execution_id = $1 ORDER BY line_number ASC",
    )
    .bind(execution_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list execution logs for execution {execution_id}"))?;

    Ok(rows)
}

/// Logs for an execution beyond a given line number, used to resume a
/// realtime subscriber that reconnects mid-stream.
pub async fn list_logs_since(
    pool: &PgPool,
    execution_id: Uuid,
    after_line: i64,
) -> Result<Vec<ExecutionLog>> {
    let rows = sqlx::query_as::<_, ExecutionLog>(
        "SELECT * FROM execution_logs \
         WHERE execution_id = $1 AND line_number > $2 \
         ORDER BY line_number ASC",
    )
    .bind(execution_id)
    .bind(after_line)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list execution logs since line {after_line}"))?;

    Ok(rows)
}

pub async fn max_line_number(pool: &PgPool, execution_id: Uuid) -> Result<i64> {
    let row: (Option<i64>,) = sqlx::query_as(
        "SELECT MAX(line_number) FROM execution_logs WHERE execution_id = $1",
    )
    .bind(execution_id)
    .fetch_one(pool)
    .await
    .context("failed to compute max line number")?;

    Ok(row.0.unwrap_or(0))
}
