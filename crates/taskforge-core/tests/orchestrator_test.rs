//! End-to-end tests for the planning and implementation orchestrators:
//! task creation through a merged pull request, driven entirely by the
//! in-repo fake executor and hosting client (no subprocess, no network).

use std::process::Command;
use std::time::Duration;

use tempfile::TempDir;

use taskforge_core::config::WorktreeLimits;
use taskforge_core::events::EventBus;
use taskforge_core::executor::{ExecutorRegistry, FakeCodeExecutor};
use taskforge_core::orchestrator::{ImplementationOutcome, ImplementationOrchestrator, PlanningOrchestrator, PlanningOutcome};
use taskforge_core::prmonitor::{FakeHostingClient, PrMonitor};
use taskforge_db::models::{PlanStatus, PullRequestState, TaskStatus};
use taskforge_db::queries::{plans, projects, pull_requests, tasks};
use taskforge_test_utils::{create_test_db, drop_test_db};

fn git(repo: &std::path::Path, args: &[&str]) {
    let output = Command::new("git").args(args).current_dir(repo).output().expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Set up a bare "remote" repo plus a checked-out main repo with `origin`
/// pointing at it, on branch `main`, with an initial commit.
fn setup_repo() -> (TempDir, TempDir, std::path::PathBuf) {
    let bare_dir = TempDir::new().expect("failed to create bare dir");
    git(bare_dir.path(), &["init", "--bare", "--initial-branch", "main"]);

    let main_dir = TempDir::new().expect("failed to create main dir");
    let main_path = main_dir.path().to_path_buf();
    git(&main_path, &["init", "--initial-branch", "main"]);
    git(&main_path, &["config", "user.email", "test@taskforge.dev"]);
    git(&main_path, &["config", "user.name", "Taskforge Test"]);
    std::fs::write(main_path.join("README.md"), "# widgets\n").unwrap();
    git(&main_path, &["add", "."]);
    git(&main_path, &["commit", "-m", "initial commit"]);
    git(&main_path, &["remote", "add", "origin", bare_dir.path().to_str().unwrap()]);
    git(&main_path, &["push", "origin", "main"]);

    (bare_dir, main_dir, main_path)
}

#[tokio::test]
async fn planning_then_implementation_opens_a_pull_request() {
    let (pool, db_name) = create_test_db().await;
    let (_bare_dir, _main_dir, main_path) = setup_repo();
    let worktree_base = TempDir::new().expect("failed to create worktree base");

    let project = projects::insert_project(
        &pool,
        "widgets",
        "main",
        main_path.to_str().unwrap(),
        None,
        "fake-code",
        Some("https://github.com/acme/widgets.git"),
    )
    .await
    .expect("failed to insert project");

    let task = tasks::insert_task(&pool, project.id, "Add health check", "Expose GET /healthz")
        .await
        .expect("failed to insert task");

    let bus = EventBus::new(pool.clone());
    let mut executors = ExecutorRegistry::new();
    executors.register(FakeCodeExecutor::new());

    let worktree_limits =
        WorktreeLimits { root: worktree_base.path().to_path_buf(), max_path_len: 4096, min_free_disk_bytes: 0 };

    let planning = PlanningOrchestrator::new(
        pool.clone(),
        bus.clone(),
        &executors,
        Duration::from_secs(10),
        worktree_limits.clone(),
    );
    let outcome = planning.run(task.id).await.expect("planning run failed");
    let plan_id = match outcome {
        PlanningOutcome::PlanCreated { plan_id } => plan_id,
        other => panic!("expected PlanCreated, got {other:?}"),
    };

    let task_after_planning = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(task_after_planning.status, TaskStatus::PlanReviewing);

    // FakeCodeExecutor's stream() always emits the same canned transcript
    // regardless of prompt, so the plan body is that fixed text rather
    // than anything prompt-specific.
    let plan = plans::get_plan(&pool, plan_id).await.unwrap().expect("plan not found");
    assert!(!plan.content.trim().is_empty());

    plans::transition_plan_status(&pool, plan_id, PlanStatus::Reviewing, PlanStatus::Approved)
        .await
        .expect("failed to approve plan");

    let hosting = FakeHostingClient::new();
    let implementation = ImplementationOrchestrator::new(
        pool.clone(),
        bus.clone(),
        &executors,
        &hosting,
        Duration::from_secs(10),
        worktree_limits,
    );
    let outcome = implementation.run(task.id).await.expect("implementation run failed");
    let pull_request_id = match outcome {
        ImplementationOutcome::PrOpened { pull_request_id } => pull_request_id,
        other => panic!("expected PrOpened, got {other:?}"),
    };

    let task_after_implementation = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(task_after_implementation.status, TaskStatus::CodeReviewing);
    assert!(task_after_implementation.pr_url.is_some());

    let worktree_path = std::path::PathBuf::from(task_after_implementation.worktree_path.unwrap());
    assert!(worktree_path.join("FAKE_CODE_CHANGE.txt").exists());

    let open_prs = pull_requests::list_open_pull_requests(&pool).await.unwrap();
    let pr = open_prs.into_iter().find(|p| p.id == pull_request_id).expect("pull request not found");
    assert_eq!(pr.state, PullRequestState::Open);

    // Simulate the remote merging the pull request; the PR monitor should
    // observe it and drive the task to `done`.
    hosting
        .set_state(
            &pr.repository,
            pr.remote_number,
            taskforge_core::prmonitor::RemotePrState {
                state: PullRequestState::Merged,
                merge_commit_sha: Some("deadbeef".to_string()),
            },
        )
        .await;

    let monitor = PrMonitor::new(pool.clone(), bus.clone(), hosting.clone());
    monitor.sync_all().await.expect("pr sync failed");

    let task_final = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(task_final.status, TaskStatus::Done);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn implementation_is_skipped_when_plan_not_yet_approved() {
    let (pool, db_name) = create_test_db().await;
    let (_bare_dir, _main_dir, main_path) = setup_repo();
    let worktree_base = TempDir::new().expect("failed to create worktree base");

    let project = projects::insert_project(
        &pool,
        "widgets",
        "main",
        main_path.to_str().unwrap(),
        None,
        "fake-code",
        Some("https://github.com/acme/widgets.git"),
    )
    .await
    .expect("failed to insert project");

    let task = tasks::insert_task(&pool, project.id, "Add health check", "Expose GET /healthz")
        .await
        .expect("failed to insert task");

    let bus = EventBus::new(pool.clone());
    let mut executors = ExecutorRegistry::new();
    executors.register(FakeCodeExecutor::new());

    let worktree_limits =
        WorktreeLimits { root: worktree_base.path().to_path_buf(), max_path_len: 4096, min_free_disk_bytes: 0 };

    let planning = PlanningOrchestrator::new(
        pool.clone(),
        bus.clone(),
        &executors,
        Duration::from_secs(10),
        worktree_limits.clone(),
    );
    planning.run(task.id).await.expect("planning run failed");

    let hosting = FakeHostingClient::new();
    let implementation = ImplementationOrchestrator::new(
        pool.clone(),
        bus.clone(),
        &executors,
        &hosting,
        Duration::from_secs(10),
        worktree_limits,
    );
    let outcome = implementation.run(task.id).await.expect("implementation run failed");
    assert_eq!(outcome, ImplementationOutcome::Skipped);

    drop_test_db(&db_name).await;
}
