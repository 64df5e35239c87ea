//! Task state machine transitions.
//!
//! Validates and executes state transitions for tasks, enforcing the
//! allowed transition graph and optimistic locking.

pub mod dispatch;
pub mod queries;

use anyhow::{bail, Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use taskforge_db::models::TaskStatus;
use taskforge_db::queries::task_status_history;
use taskforge_db::queries::tasks as db;

/// The task state machine.
///
/// Enforces the valid transition graph:
///
/// ```text
/// todo           -> planning
/// planning       -> plan_reviewing
/// plan_reviewing -> implementing   (plan approved)
/// plan_reviewing -> planning       (plan rejected, re-plan)
/// implementing   -> code_reviewing
/// code_reviewing -> done
/// code_reviewing -> implementing   (review requested changes)
/// todo | planning | plan_reviewing | implementing | code_reviewing -> cancelled
/// ```
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Check whether a transition from `from` to `to` is a valid edge in
    /// the state graph.
    pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;
        if to == Cancelled {
            return !from.is_terminal();
        }
        matches!(
            (from, to),
            (Todo, Planning)
                | (Planning, PlanReviewing)
                | (PlanReviewing, Implementing)
                | (PlanReviewing, Planning)
                | (Implementing, CodeReviewing)
                | (CodeReviewing, Done)
                | (CodeReviewing, Implementing)
        )
    }

    /// Execute a state transition with optimistic locking and an audit
    /// trail entry.
    ///
    /// Returns an error if the transition is not a legal edge, or if the
    /// current status in the database no longer matches `from` (optimistic
    /// lock failure).
    pub async fn transition(
        pool: &PgPool,
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
        changed_by: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        if !Self::is_valid_transition(from, to) {
            bail!(
                "invalid state transition: {} -> {} for task {}",
                from,
                to,
                task_id
            );
        }

        let mut tx = pool.begin().await.context("failed to start transaction")?;

        let rows = db::transition_task_status(&mut *tx, task_id, from, to)
            .await
            .with_context(|| {
                format!(
                    "failed to transition task {} from {} to {}",
                    task_id, from, to
                )
            })?;

        if rows == 0 {
            let task = db::get_task(pool, task_id).await?;
            match task {
                None => bail!("task {} not found", task_id),
                Some(t) => bail!(
                    "optimistic lock failed: task {} has status {}, expected {}",
                    task_id,
                    t.status,
                    from
                ),
            }
        }

        task_status_history::record_transition(&mut *tx, task_id, Some(from), to, changed_by, reason)
            .await
            .context("failed to record task status history")?;

        tx.commit().await.context("failed to commit task status transition")?;

        Ok(())
    }
}
