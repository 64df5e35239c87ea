//! Database query functions for the `pull_requests` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{PullRequest, PullRequestState};

#[allow(clippy::too_many_arguments)]
pub async fn insert_pull_request(
    pool: &PgPool,
    task_id: Uuid,
    remote_number: i64,
    repository: &str,
    head_branch: &str,
    base_branch: &str,
    url: &str,
) -> Result<PullRequest> {
    let pr = sqlx::query_as::<_, PullRequest>(
        "INSERT INTO pull_requests (task_id, remote_number, repository, head_branch, base_branch, url) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(remote_number)
    .bind(repository)
    .bind(head_branch)
    .bind(base_branch)
    .bind(url)
    .fetch_one(pool)
    .await
    .context("failed to insert pull request")?;

    Ok(pr)
}

/// Find an existing open PR for this (task, branch) pair, used to dedup
/// open-PR attempts under at-least-once delivery.
pub async fn find_open_pr_for_branch(
    pool: &PgPool,
    task_id: Uuid,
    head_branch: &str,
) -> Result<Option<PullRequest>> {
    let pr = sqlx::query_as::<_, PullRequest>(
        "SELECT * FROM pull_requests \
         WHERE task_id = $1 AND head_branch = $2 AND state = 'open' AND deleted_at IS NULL",
    )
    .bind(task_id)
    .bind(head_branch)
    .fetch_optional(pool)
    .await
    .context("failed to look up open pull request")?;

    Ok(pr)
}

pub async fn list_open_pull_requests(pool: &PgPool) -> Result<Vec<PullRequest>> {
    let prs = sqlx::query_as::<_, PullRequest>(
        "SELECT * FROM pull_requests WHERE state = 'open' AND deleted_at IS NULL",
    )
    .fetch_all(pool)
    .await
    .context("failed to list open pull requests")?;

    Ok(prs)
}

pub async fn transition_pr_state(
    pool: &PgPool,
    id: Uuid,
    to: PullRequestState,
    merge_commit_sha: Option<&str>,
) -> Result<u64> {
    let timestamp_column = match to {
        PullRequestState::Merged => "merged_at",
        PullRequestState::Closed => "closed_at",
        PullRequestState::Open => return Ok(0),
    };

    let query = format!(
        "UPDATE pull_requests \
         SET state = $1, merge_commit_sha = $2, {timestamp_column} = now() \
         WHERE id = $3 AND state = 'open'"
    );

    let result = sqlx::query(&query)
        .bind(to)
        .bind(merge_commit_sha)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to transition pull request state")?;

    Ok(result.rows_affected())
}
