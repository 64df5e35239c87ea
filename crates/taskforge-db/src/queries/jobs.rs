//! Database query functions for the `jobs` table, the storage backing the
//! Job Queue. `SELECT ... FOR UPDATE SKIP LOCKED` lets multiple workers
//! poll the same table without blocking each other.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Job, JobStatus};

pub async fn enqueue(
    pool: &PgPool,
    queue: &str,
    kind: &str,
    payload: serde_json::Value,
    max_attempts: i32,
) -> Result<Job> {
    let job = sqlx::query_as::<_, Job>(
        "INSERT INTO jobs (queue, kind, payload, max_attempts) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(queue)
    .bind(kind)
    .bind(payload)
    .bind(max_attempts)
    .fetch_one(pool)
    .await
    .context("failed to enqueue job")?;

    Ok(job)
}

/// Claim one visible job from `queue`, marking it `running` and locking it
/// to `worker_id`. Skips rows already locked by a concurrent poller.
pub async fn dequeue(pool: &PgPool, queue: &str, worker_id: &str) -> Result<Option<Job>> {
    let mut tx = pool.begin().await.context("failed to start transaction")?;

    let candidate = sqlx::query_as::<_, Job>(
        "SELECT * FROM jobs \
         WHERE queue = $1 AND status = 'queued' AND visible_at <= now() \
         ORDER BY visible_at ASC \
         LIMIT 1 \
         FOR UPDATE SKIP LOCKED",
    )
    .bind(queue)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to select next job")?;

    let Some(candidate) = candidate else {
        tx.commit().await.ok();
        return Ok(None);
    };

    let claimed = sqlx::query_as::<_, Job>(
        "UPDATE jobs \
         SET status = 'running', attempts = attempts + 1, locked_by = $1, locked_at = now() \
         WHERE id = $2 \
         RETURNING *",
    )
    .bind(worker_id)
    .bind(candidate.id)
    .fetch_one(&mut *tx)
    .await
    .context("failed to claim job")?;

    tx.commit().await.context("failed to commit job claim")?;

    Ok(Some(claimed))
}

pub async fn ack(pool: &PgPool, id: Uuid) -> Result<u64> {
    let result = sqlx::query("UPDATE jobs SET status = $1 WHERE id = $2")
        .bind(JobStatus::Done)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to ack job")?;

    Ok(result.rows_affected())
}

/// Fail a job. If it has attempts remaining, requeue it with exponential
/// backoff; otherwise mark it permanently failed.
pub async fn nack(pool: &PgPool, id: Uuid, backoff_seconds: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE jobs \
         SET status = CASE WHEN attempts < max_attempts THEN 'queued' ELSE 'failed' END, \
             visible_at = now() + make_interval(secs => $1), \
             locked_by = NULL, \
             locked_at = NULL \
         WHERE id = $2",
    )
    .bind(backoff_seconds as f64)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to nack job")?;

    Ok(result.rows_affected())
}

/// Jobs claimed by a worker that never acked or nacked them, used by
/// restart recovery to put orphaned jobs back in the queue.
pub async fn reap_stale_running(pool: &PgPool, older_than_seconds: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE jobs \
         SET status = 'queued', locked_by = NULL, locked_at = NULL \
         WHERE status = 'running' AND locked_at < now() - make_interval(secs => $1)",
    )
    .bind(older_than_seconds as f64)
    .execute(pool)
    .await
    .context("failed to reap stale jobs")?;

    Ok(result.rows_affected())
}
