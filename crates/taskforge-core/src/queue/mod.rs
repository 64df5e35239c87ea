//! Job Queue: a durable, at-least-once work queue backed by the `jobs`
//! table in Postgres, polled with `SELECT ... FOR UPDATE SKIP LOCKED`.
//!
//! The external contract (enqueue, dequeue-with-visibility-timeout, ack,
//! nack-with-backoff) is storage-agnostic: callers never see SQL, only
//! [`Job`] rows and this module's retry policy, so a different backing
//! store could be swapped in without touching the orchestrators.

use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use taskforge_db::models::Job;
use taskforge_db::queries::jobs;

/// Typed job kinds the orchestrators know how to handle.
pub const KIND_TASK_PLANNING: &str = "task_planning";
pub const KIND_TASK_IMPLEMENTATION: &str = "task_implementation";
pub const KIND_PR_SYNC_TICK: &str = "pr_sync_tick";

const DEFAULT_MAX_ATTEMPTS: i32 = 5;
const BASE_BACKOFF_SECS: i64 = 2;
const MAX_BACKOFF_SECS: i64 = 300;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// A thin client over the `jobs` table, scoped to one named queue.
#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
    queue: String,
}

impl JobQueue {
    pub fn new(pool: PgPool, queue: impl Into<String>) -> Self {
        Self {
            pool,
            queue: queue.into(),
        }
    }

    pub async fn enqueue<P: Serialize>(&self, kind: &str, payload: &P) -> Result<Job, QueueError> {
        self.enqueue_with_attempts(kind, payload, DEFAULT_MAX_ATTEMPTS).await
    }

    pub async fn enqueue_with_attempts<P: Serialize>(
        &self,
        kind: &str,
        payload: &P,
        max_attempts: i32,
    ) -> Result<Job, QueueError> {
        let payload = serde_json::to_value(payload).map_err(|e| QueueError::Storage(e.into()))?;
        let job = jobs::enqueue(&self.pool, &self.queue, kind, payload, max_attempts).await?;
        debug!(job_id = %job.id, kind, queue = %self.queue, "enqueued job");
        Ok(job)
    }

    pub async fn dequeue(&self, worker_id: &str) -> Result<Option<Job>, QueueError> {
        Ok(jobs::dequeue(&self.pool, &self.queue, worker_id).await?)
    }

    pub async fn ack(&self, id: Uuid) -> Result<(), QueueError> {
        jobs::ack(&self.pool, id).await?;
        Ok(())
    }

    /// Fail a job; applies exponential backoff with jitter based on the
    /// job's current attempt count.
    pub async fn nack(&self, id: Uuid, attempt: i32) -> Result<(), QueueError> {
        let backoff = backoff_with_jitter(attempt);
        jobs::nack(&self.pool, id, backoff.as_secs() as i64).await?;
        Ok(())
    }

    pub async fn reap_stale(&self, older_than: Duration) -> Result<u64, QueueError> {
        Ok(jobs::reap_stale_running(&self.pool, older_than.as_secs() as i64).await?)
    }
}

/// Exponential backoff with full jitter, capped at [`MAX_BACKOFF_SECS`].
fn backoff_with_jitter(attempt: i32) -> Duration {
    let exp = BASE_BACKOFF_SECS.saturating_mul(1i64 << attempt.clamp(0, 10)).min(MAX_BACKOFF_SECS);
    let jittered = rand::rng().random_range(0..=exp.max(1));
    Duration::from_secs(jittered as u64)
}

/// A job handler invoked once per claimed job. Handlers must be
/// idempotent: a job retried after partial progress should resume by
/// inspecting current state, not redoing completed steps.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> anyhow::Result<()>;
}

/// Poll `queue` forever (until `shutdown` is cancelled), dispatching each
/// claimed job to `handler`. Runs `concurrency` handlers in parallel.
pub async fn run_consumer(
    queue: JobQueue,
    worker_id: String,
    handler: std::sync::Arc<dyn JobHandler>,
    concurrency: usize,
    poll_interval: Duration,
    shutdown: CancellationToken,
) {
    let semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(concurrency.max(1)));

    loop {
        if shutdown.is_cancelled() {
            info!(worker_id, "job queue consumer shutting down");
            break;
        }

        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        let job = match queue.dequeue(&worker_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.cancelled() => {}
                }
                continue;
            }
            Err(e) => {
                warn!(error = %e, "failed to dequeue job");
                drop(permit);
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        let queue = queue.clone();
        let handler = std::sync::Arc::clone(&handler);
        tokio::spawn(async move {
            let _permit = permit;
            let attempt = job.attempts;
            match handler.handle(&job).await {
                Ok(()) => {
                    if let Err(e) = queue.ack(job.id).await {
                        warn!(job_id = %job.id, error = %e, "failed to ack job");
                    }
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "job handler failed");
                    if let Err(e) = queue.nack(job.id, attempt).await {
                        warn!(job_id = %job.id, error = %e, "failed to nack job");
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let small = backoff_with_jitter(0);
        let large = backoff_with_jitter(20);
        assert!(small.as_secs() <= BASE_BACKOFF_SECS as u64);
        assert!(large.as_secs() <= MAX_BACKOFF_SECS as u64);
    }

    #[test]
    fn job_kinds_are_distinct() {
        let kinds = [KIND_TASK_PLANNING, KIND_TASK_IMPLEMENTATION, KIND_PR_SYNC_TICK];
        for (i, a) in kinds.iter().enumerate() {
            for (j, b) in kinds.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b);
                }
            }
        }
    }
}
