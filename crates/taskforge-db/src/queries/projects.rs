//! Database query functions for the `projects` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Project;

#[allow(clippy::too_many_arguments)]
pub async fn insert_project(
    pool: &PgPool,
    name: &str,
    main_branch: &str,
    worktree_base_path: &str,
    init_script: Option<&str>,
    executor_type: &str,
    remote_repository_url: Option<&str>,
) -> Result<Project> {
    let project = sqlx::query_as::<_, Project>(
        "INSERT INTO projects (name, main_branch, worktree_base_path, init_script, executor_type, remote_repository_url) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(name)
    .bind(main_branch)
    .bind(worktree_base_path)
    .bind(init_script)
    .bind(executor_type)
    .bind(remote_repository_url)
    .fetch_one(pool)
    .await
    .context("failed to insert project")?;

    Ok(project)
}

pub async fn get_project(pool: &PgPool, id: Uuid) -> Result<Option<Project>> {
    let project =
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch project")?;

    Ok(project)
}

pub async fn list_projects(pool: &PgPool) -> Result<Vec<Project>> {
    let projects = sqlx::query_as::<_, Project>(
        "SELECT * FROM projects WHERE deleted_at IS NULL ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list projects")?;

    Ok(projects)
}

pub async fn soft_delete_project(pool: &PgPool, id: Uuid) -> Result<()> {
    let result = sqlx::query(
        "UPDATE projects SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(pool)
    .await
    .context("failed to delete project")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("project {id} not found");
    }

    Ok(())
}
