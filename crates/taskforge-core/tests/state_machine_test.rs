//! Integration tests for the task state machine and its semantic dispatch
//! helpers, run against a real PostgreSQL instance.

use taskforge_core::state::dispatch;
use taskforge_core::state::TaskStateMachine;
use taskforge_db::models::TaskStatus;
use taskforge_db::queries::{plans, projects, task_status_history, tasks};
use taskforge_test_utils::{create_test_db, drop_test_db};

async fn seed_task(pool: &sqlx::PgPool) -> uuid::Uuid {
    let project = projects::insert_project(
        pool,
        "widgets",
        "main",
        "/tmp/widgets-worktrees",
        None,
        "fake-code",
        Some("https://github.com/acme/widgets.git"),
    )
    .await
    .expect("failed to insert project");

    let task = tasks::insert_task(pool, project.id, "Add health check", "Expose GET /healthz")
        .await
        .expect("failed to insert task");

    task.id
}

#[tokio::test]
async fn valid_transition_succeeds_and_records_history() {
    let (pool, db_name) = create_test_db().await;
    let task_id = seed_task(&pool).await;

    dispatch::start_planning(&pool, task_id).await.expect("start_planning failed");

    let task = tasks::get_task(&pool, task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Planning);

    let history = task_status_history::list_for_task(&pool, task_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from_status, Some(TaskStatus::Todo));
    assert_eq!(history[0].to_status, TaskStatus::Planning);
    assert_eq!(history[0].changed_by, "planning-orchestrator");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn invalid_transition_is_rejected() {
    let (pool, db_name) = create_test_db().await;
    let task_id = seed_task(&pool).await;

    // Task is still `todo`; jumping straight to `implementing` is not a
    // legal edge in the transition graph.
    let result = TaskStateMachine::transition(
        &pool,
        task_id,
        TaskStatus::Todo,
        TaskStatus::Implementing,
        "test",
        None,
    )
    .await;
    assert!(result.is_err());

    let task = tasks::get_task(&pool, task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Todo);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn optimistic_lock_failure_is_reported() {
    let (pool, db_name) = create_test_db().await;
    let task_id = seed_task(&pool).await;

    dispatch::start_planning(&pool, task_id).await.expect("start_planning failed");

    // The task has already moved to `planning`; a second attempt claiming
    // it was still `todo` must fail rather than silently re-applying.
    let result = TaskStateMachine::transition(
        &pool,
        task_id,
        TaskStatus::Todo,
        TaskStatus::Planning,
        "test",
        None,
    )
    .await;
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("optimistic lock failed"));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn cancel_is_allowed_from_any_non_terminal_status() {
    let (pool, db_name) = create_test_db().await;
    let task_id = seed_task(&pool).await;

    dispatch::start_planning(&pool, task_id).await.expect("start_planning failed");
    dispatch::cancel_task(&pool, task_id, TaskStatus::Planning, "no longer needed").await.expect("cancel failed");

    let task = tasks::get_task(&pool, task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn cancel_is_rejected_from_a_terminal_status() {
    let (pool, db_name) = create_test_db().await;
    let task_id = seed_task(&pool).await;

    dispatch::start_planning(&pool, task_id).await.expect("start_planning failed");
    dispatch::cancel_task(&pool, task_id, TaskStatus::Planning, "cancelling").await.expect("cancel failed");

    let result = dispatch::cancel_task(&pool, task_id, TaskStatus::Cancelled, "cancel again").await;
    assert!(result.is_err());

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn rejecting_a_plan_soft_deletes_it_so_replanning_can_insert_a_fresh_one() {
    let (pool, db_name) = create_test_db().await;
    let task_id = seed_task(&pool).await;

    dispatch::start_planning(&pool, task_id).await.expect("start_planning failed");
    let plan = plans::insert_plan(&pool, task_id, "1. Add route\n2. Add test").await.expect("insert_plan failed");
    dispatch::enter_plan_reviewing(&pool, task_id).await.expect("enter_plan_reviewing failed");

    dispatch::reject_plan(&pool, task_id, "needs more detail").await.expect("reject_plan failed");

    let task = tasks::get_task(&pool, task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Planning);
    assert!(plans::get_plan_for_task(&pool, task_id).await.unwrap().is_none());

    // Invariant I1 (at most one non-deleted plan per task) must not block
    // a fresh plan from being inserted after rejection.
    let new_plan = plans::insert_plan(&pool, task_id, "1. Revised approach").await;
    assert!(new_plan.is_ok());
    assert_ne!(new_plan.unwrap().id, plan.id);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn full_happy_path_reaches_done() {
    let (pool, db_name) = create_test_db().await;
    let task_id = seed_task(&pool).await;

    dispatch::start_planning(&pool, task_id).await.unwrap();
    plans::insert_plan(&pool, task_id, "1. Add route").await.unwrap();
    dispatch::enter_plan_reviewing(&pool, task_id).await.unwrap();
    dispatch::approve_plan(&pool, task_id).await.unwrap();
    dispatch::enter_code_reviewing(&pool, task_id).await.unwrap();
    dispatch::complete_task(&pool, task_id).await.unwrap();

    let task = tasks::get_task(&pool, task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Done);

    let history = task_status_history::list_for_task(&pool, task_id).await.unwrap();
    assert_eq!(history.len(), 5);

    drop_test_db(&db_name).await;
}
