//! Convenience dispatch helpers that wrap [`super::TaskStateMachine`]
//! transitions with semantic names.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use taskforge_db::models::TaskStatus;
use taskforge_db::queries::plans;

use super::TaskStateMachine;

/// Start planning: transition `todo -> planning`.
pub async fn start_planning(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::transition(
        pool,
        task_id,
        TaskStatus::Todo,
        TaskStatus::Planning,
        "planning-orchestrator",
        None,
    )
    .await
}

/// Hand a generated plan to the operator: transition `planning -> plan_reviewing`.
pub async fn enter_plan_reviewing(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::transition(
        pool,
        task_id,
        TaskStatus::Planning,
        TaskStatus::PlanReviewing,
        "planning-orchestrator",
        None,
    )
    .await
}

/// Approve the plan: transition `plan_reviewing -> implementing`.
pub async fn approve_plan(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::transition(
        pool,
        task_id,
        TaskStatus::PlanReviewing,
        TaskStatus::Implementing,
        "operator",
        Some("plan approved"),
    )
    .await
}

/// Reject the plan and send the task back to planning. Soft-deletes the
/// rejected plan so the next planning run can insert a fresh one (only one
/// non-deleted plan per task is allowed).
pub async fn reject_plan(pool: &PgPool, task_id: Uuid, reason: &str) -> Result<()> {
    TaskStateMachine::transition(
        pool,
        task_id,
        TaskStatus::PlanReviewing,
        TaskStatus::Planning,
        "operator",
        Some(reason),
    )
    .await?;

    if let Some(plan) = plans::get_plan_for_task(pool, task_id).await? {
        plans::soft_delete_plan(pool, plan.id).await?;
    }

    Ok(())
}

/// Implementation finished: transition `implementing -> code_reviewing`.
pub async fn enter_code_reviewing(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::transition(
        pool,
        task_id,
        TaskStatus::Implementing,
        TaskStatus::CodeReviewing,
        "implementation-orchestrator",
        None,
    )
    .await
}

/// Pull request merged: transition `code_reviewing -> done`.
pub async fn complete_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::transition(
        pool,
        task_id,
        TaskStatus::CodeReviewing,
        TaskStatus::Done,
        "pr-monitor",
        Some("pull request merged"),
    )
    .await
}

/// Reviewer requested changes: transition `code_reviewing -> implementing`.
pub async fn request_changes(pool: &PgPool, task_id: Uuid, reason: &str) -> Result<()> {
    TaskStateMachine::transition(
        pool,
        task_id,
        TaskStatus::CodeReviewing,
        TaskStatus::Implementing,
        "operator",
        Some(reason),
    )
    .await
}

/// Cancel a task from any non-terminal status.
pub async fn cancel_task(
    pool: &PgPool,
    task_id: Uuid,
    from: TaskStatus,
    reason: &str,
) -> Result<()> {
    TaskStateMachine::transition(
        pool,
        task_id,
        from,
        TaskStatus::Cancelled,
        "operator",
        Some(reason),
    )
    .await
}
