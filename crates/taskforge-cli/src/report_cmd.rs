//! `taskforge report` command: show execution duration and outcome report for a project.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use taskforge_db::models::{ExecutionStatus, TaskStatus};
use taskforge_db::queries::{executions, projects, tasks as task_db};

/// Run the report command.
pub async fn run_report(pool: &PgPool, project_id_str: &str) -> Result<()> {
    let project_id = Uuid::parse_str(project_id_str)
        .with_context(|| format!("invalid project ID: {project_id_str}"))?;

    let project = projects::get_project(pool, project_id)
        .await?
        .with_context(|| format!("project {project_id} not found"))?;

    println!("Project: {} ({})", project.name, project.id);
    println!();

    let task_list = task_db::list_tasks_for_project(pool, project_id).await?;

    let mut done_count: usize = 0;
    let mut cancelled_count: usize = 0;
    let total_count = task_list.len();

    println!(
        "{:<30} {:<16} {:>10} {:>12}",
        "TASK", "STATUS", "RUNS", "TOTAL TIME"
    );
    println!("{}", "-".repeat(72));

    for task in &task_list {
        match task.status {
            TaskStatus::Done => done_count += 1,
            TaskStatus::Cancelled => cancelled_count += 1,
            _ => {}
        }

        let task_executions = executions::list_executions_for_task(pool, task.id).await?;
        let run_count = task_executions.len();

        let total_secs: i64 = task_executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Completed || e.status == ExecutionStatus::Failed)
            .filter_map(|e| match (e.started_at, e.completed_at) {
                (Some(start), Some(end)) => Some((end - start).num_seconds()),
                _ => None,
            })
            .sum();

        let wall_str = if total_secs > 0 { format!("{total_secs}s") } else { "-".to_string() };

        let name_display =
            if task.title.len() > 28 { format!("{}...", &task.title[..25]) } else { task.title.clone() };

        println!("{:<30} {:<16} {:>10} {:>12}", name_display, task.status, run_count, wall_str);
    }

    println!();
    println!(
        "Done: {done_count}/{total_count}, cancelled: {cancelled_count}/{total_count} ({:.0}% done)",
        if total_count > 0 { (done_count as f64 / total_count as f64) * 100.0 } else { 0.0 }
    );

    Ok(())
}
