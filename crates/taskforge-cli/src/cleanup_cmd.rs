//! `taskforge cleanup <project-id>` command: remove worktrees for finished tasks.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use taskforge_core::config::{Config, WorktreeLimits};
use taskforge_core::worktree::WorktreeManager;
use taskforge_db::queries::{projects, tasks as task_db, worktrees as worktree_db};

/// Run the cleanup command.
///
/// Removes worktrees belonging to tasks whose status is terminal (`done` or
/// `cancelled`). With `all`, removes every worktree for the project
/// regardless of task status.
pub async fn run_cleanup(pool: &PgPool, core_config: &Config, project_id_str: &str, all: bool) -> Result<()> {
    let project_id = Uuid::parse_str(project_id_str)
        .with_context(|| format!("invalid project ID: {project_id_str}"))?;

    let project = projects::get_project(pool, project_id)
        .await?
        .with_context(|| format!("project {project_id} not found"))?;

    let limits = WorktreeLimits::from_config(core_config);
    let worktree_manager = WorktreeManager::new(
        std::path::Path::new(&project.worktree_base_path),
        limits.root,
        limits.max_path_len,
        limits.min_free_disk_bytes,
    )
    .await
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    let task_list = task_db::list_tasks_for_project(pool, project_id).await?;

    let mut removed = 0;
    let mut skipped = 0;

    for task in &task_list {
        if !all && !task.status.is_terminal() {
            skipped += 1;
            continue;
        }

        let Some(worktree) = worktree_db::get_worktree_for_task(pool, task.id).await? else {
            continue;
        };

        let path = std::path::Path::new(&worktree.worktree_path);
        match worktree_manager.remove_worktree(path, &worktree.branch_name).await {
            Ok(()) => {
                worktree_db::soft_delete_worktree(pool, worktree.id).await?;
                println!("  Removed: {} ({})", task.title, worktree.worktree_path);
                removed += 1;
            }
            Err(e) => {
                eprintln!("  Warning: failed to remove worktree for {}: {e}", task.title);
            }
        }
    }

    let _ = worktree_manager.cleanup_stale().await;

    println!("\nCleanup complete: {removed} worktree(s) removed, {skipped} skipped.");

    Ok(())
}
