//! Query helpers for task progress tracking.
//!
//! These re-export and wrap the lower-level DB queries from
//! [`taskforge_db::queries::tasks`] for use in the orchestration layer.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

pub use taskforge_db::queries::tasks::TaskProgress;

/// Get a progress summary (counts by status) for a project's tasks.
pub async fn get_task_progress(pool: &PgPool, project_id: Uuid) -> Result<TaskProgress> {
    taskforge_db::queries::tasks::get_task_progress(pool, project_id).await
}

/// Check whether every task in a project has reached a terminal status.
pub async fn is_project_complete(pool: &PgPool, project_id: Uuid) -> Result<bool> {
    let progress = taskforge_db::queries::tasks::get_task_progress(pool, project_id).await?;
    Ok(progress.total > 0 && progress.done + progress.cancelled == progress.total)
}
