//! `taskforge status` command: show project progress and per-task status.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use taskforge_db::queries::{projects, tasks};

/// When `project_id_str` is `Some`, shows detailed status for that project.
/// When `None`, lists all projects with a progress summary.
pub async fn run_status(pool: &PgPool, project_id_str: Option<&str>) -> Result<()> {
    match project_id_str {
        Some(id_str) => run_project_status(pool, id_str).await,
        None => run_fleet_status(pool).await,
    }
}

async fn run_project_status(pool: &PgPool, project_id_str: &str) -> Result<()> {
    let project_id =
        Uuid::parse_str(project_id_str).with_context(|| format!("invalid project ID: {project_id_str}"))?;

    let project = projects::get_project(pool, project_id)
        .await?
        .with_context(|| format!("project {project_id} not found"))?;

    println!("Project: {} ({})", project.name, project.id);
    println!("Main branch: {}", project.main_branch);
    println!("Executor: {}", project.executor_type);
    println!();

    let progress = tasks::get_task_progress(pool, project_id).await?;
    println!("Progress: {}/{} done", progress.done, progress.total);
    println!(
        "  todo={} planning={} plan_reviewing={} implementing={} code_reviewing={} done={} cancelled={}",
        progress.todo,
        progress.planning,
        progress.plan_reviewing,
        progress.implementing,
        progress.code_reviewing,
        progress.done,
        progress.cancelled,
    );
    println!();

    let task_list = tasks::list_tasks_for_project(pool, project_id).await?;
    println!("Tasks:");
    for task in &task_list {
        let status_icon = match task.status.to_string().as_str() {
            "todo" => ".",
            "planning" => ">",
            "plan_reviewing" => "?",
            "implementing" => "*",
            "code_reviewing" => "~",
            "done" => "+",
            "cancelled" => "x",
            _ => " ",
        };
        println!("  [{}] {} ({})", status_icon, task.title, task.status);
    }

    Ok(())
}

async fn run_fleet_status(pool: &PgPool) -> Result<()> {
    let project_list = projects::list_projects(pool).await?;

    if project_list.is_empty() {
        println!("No projects found.");
        return Ok(());
    }

    println!("{:<38} {:<30} {:>10}", "ID", "NAME", "PROGRESS");
    println!("{}", "-".repeat(82));

    for project in &project_list {
        let progress = tasks::get_task_progress(pool, project.id).await?;
        let progress_str =
            if progress.total > 0 { format!("{}/{}", progress.done, progress.total) } else { "0/0".to_string() };
        let name_display =
            if project.name.len() > 28 { format!("{}...", &project.name[..25]) } else { project.name.clone() };
        println!("{:<38} {:<30} {:>10}", project.id, name_display, progress_str);
    }

    Ok(())
}
