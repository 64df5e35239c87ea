//! `taskforge log` command: show execution log lines for a task.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use taskforge_db::models::ExecutionLog;
use taskforge_db::queries::{execution_logs, executions, tasks as task_db};

/// Run the log command.
///
/// When `execution_id_str` is `None`, shows the most recent execution for
/// the task. Otherwise shows the given execution, which must belong to the
/// task.
pub async fn run_log(pool: &PgPool, task_id_str: &str, execution_id_str: Option<&str>) -> Result<()> {
    let task_id =
        Uuid::parse_str(task_id_str).with_context(|| format!("invalid task ID: {task_id_str}"))?;

    let task = task_db::get_task(pool, task_id)
        .await?
        .with_context(|| format!("task {task_id} not found"))?;

    println!("Task: {} ({})", task.title, task.id);
    println!("Status: {}", task.status);
    println!();

    let execution = match execution_id_str {
        Some(id_str) => {
            let execution_id = Uuid::parse_str(id_str)
                .with_context(|| format!("invalid execution ID: {id_str}"))?;
            let execution = executions::get_execution(pool, execution_id)
                .await?
                .with_context(|| format!("execution {execution_id} not found"))?;
            if execution.task_id != task_id {
                anyhow::bail!("execution {execution_id} does not belong to task {task_id}");
            }
            execution
        }
        None => {
            let mut list = executions::list_executions_for_task(pool, task_id).await?;
            list.pop().with_context(|| format!("task {task_id} has no executions"))?
        }
    };

    println!(
        "Execution: {} (status={}, progress={:.0}%)",
        execution.id,
        execution.status,
        execution.progress * 100.0
    );
    if let Some(msg) = &execution.error_message {
        println!("Error: {msg}");
    }
    println!();

    let logs: Vec<ExecutionLog> = execution_logs::list_logs_for_execution(pool, execution.id).await?;

    if logs.is_empty() {
        println!("No log lines recorded.");
        return Ok(());
    }

    println!("Log ({} lines):", logs.len());
    for line in &logs {
        let time = line.timestamp.format("%H:%M:%S%.3f");
        let summary = summarize_log_line(line);
        let marker = if line.is_error { "!" } else { " " };
        println!("  [{time}]{marker}[{}:{}] {summary}", line.source, line.log_type);
    }

    Ok(())
}

/// Generate a one-line summary of a parsed log line.
fn summarize_log_line(line: &ExecutionLog) -> String {
    let mut summary = match &line.tool_name {
        Some(tool) => format!("{tool}: {}", line.message),
        None => line.message.clone(),
    };

    if summary.len() > 120 {
        summary.truncate(117);
        summary.push_str("...");
    }

    if let Some(ms) = line.duration_ms {
        summary.push_str(&format!(" ({ms}ms)"));
    }

    summary
}
