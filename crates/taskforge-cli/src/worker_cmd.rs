//! `taskforge worker` command: runs the job queue consumer that drives
//! tasks through planning and implementation, plus a periodic PR sync tick.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use taskforge_core::config::WorktreeLimits;
use taskforge_core::events::EventBus;
use taskforge_core::executor::{ClaudeCodeExecutor, ExecutorRegistry, FakeCodeExecutor};
use taskforge_core::orchestrator::{ImplementationOrchestrator, PlanningOrchestrator};
use taskforge_core::prmonitor::github::GitHubHostingClient;
use taskforge_core::prmonitor::{HostingClient, PrMonitor};
use taskforge_core::queue::{
    run_consumer, Job, JobHandler, JobQueue, KIND_PR_SYNC_TICK, KIND_TASK_IMPLEMENTATION, KIND_TASK_PLANNING,
};

const QUEUE_NAME: &str = "taskforge";
const WORKER_QUEUE_POLL_INTERVAL: Duration = Duration::from_secs(2);
const STALE_JOB_REAP_AGE: Duration = Duration::from_secs(1800);

/// Entry point for `taskforge worker`.
pub async fn run_worker(pool: PgPool, core_config: taskforge_core::config::Config) -> Result<()> {
    let bus = EventBus::new(pool.clone());

    let mut executors = ExecutorRegistry::new();
    executors.register(ClaudeCodeExecutor::with_binary(core_config.claude_code_binary.clone()));
    executors.register(FakeCodeExecutor::new());
    let executors = Arc::new(executors);

    let shutdown = CancellationToken::new();
    let shutdown_on_ctrlc = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_on_ctrlc.cancel();
    });

    let queue = JobQueue::new(pool.clone(), QUEUE_NAME);
    let worker_id = format!("worker-{}", Uuid::new_v4());

    match core_config.code_host_token.clone() {
        Some(token) => {
            let hosting = Arc::new(GitHubHostingClient::new(token).context("failed to build GitHub hosting client")?);
            run_with_hosting(pool, bus, queue, worker_id, executors, hosting, core_config, shutdown).await
        }
        None => {
            tracing::warn!("TASKFORGE_CODE_HOST_TOKEN not set; pull requests will not be opened or synced");
            let hosting = Arc::new(taskforge_core::prmonitor::FakeHostingClient::new());
            run_with_hosting(pool, bus, queue, worker_id, executors, hosting, core_config, shutdown).await
        }
    }
}

async fn run_with_hosting<H: HostingClient + 'static>(
    pool: PgPool,
    bus: EventBus,
    queue: JobQueue,
    worker_id: String,
    executors: Arc<ExecutorRegistry>,
    hosting: Arc<H>,
    core_config: taskforge_core::config::Config,
    shutdown: CancellationToken,
) -> Result<()> {
    let handler = Arc::new(TaskforgeJobHandler {
        pool: pool.clone(),
        bus: bus.clone(),
        executors,
        hosting,
        default_timeout: core_config.default_execution_timeout,
        worktree_limits: WorktreeLimits::from_config(&core_config),
    });

    let pr_sync_queue = queue.clone();
    let pr_sync_interval = core_config.pr_sync_interval;
    let pr_sync_shutdown = shutdown.clone();
    let pr_sync_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(pr_sync_interval) => {
                    if let Err(e) = pr_sync_queue.enqueue(KIND_PR_SYNC_TICK, &serde_json::json!({})).await {
                        tracing::warn!(error = %e, "failed to enqueue pr_sync_tick");
                    }
                }
                _ = pr_sync_shutdown.cancelled() => break,
            }
        }
    });

    let reap_queue = queue.clone();
    let reap_shutdown = shutdown.clone();
    let reap_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(STALE_JOB_REAP_AGE / 2) => {
                    if let Err(e) = reap_queue.reap_stale(STALE_JOB_REAP_AGE).await {
                        tracing::warn!(error = %e, "failed to reap stale jobs");
                    }
                }
                _ = reap_shutdown.cancelled() => break,
            }
        }
    });

    run_consumer(queue, worker_id, handler, core_config.job_worker_concurrency, WORKER_QUEUE_POLL_INTERVAL, shutdown)
        .await;

    pr_sync_task.abort();
    reap_task.abort();
    let _ = bus;

    Ok(())
}

struct TaskforgeJobHandler<H: HostingClient> {
    pool: PgPool,
    bus: EventBus,
    executors: Arc<ExecutorRegistry>,
    hosting: Arc<H>,
    default_timeout: Duration,
    worktree_limits: WorktreeLimits,
}

#[async_trait::async_trait]
impl<H: HostingClient + 'static> JobHandler for TaskforgeJobHandler<H> {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        match job.kind.as_str() {
            KIND_TASK_PLANNING => {
                let task_id = parse_task_id(job)?;
                let orchestrator = PlanningOrchestrator::new(
                    self.pool.clone(),
                    self.bus.clone(),
                    &self.executors,
                    self.default_timeout,
                    self.worktree_limits.clone(),
                );
                orchestrator.run(task_id).await?;
            }
            KIND_TASK_IMPLEMENTATION => {
                let task_id = parse_task_id(job)?;
                let orchestrator = ImplementationOrchestrator::new(
                    self.pool.clone(),
                    self.bus.clone(),
                    &self.executors,
                    &self.hosting,
                    self.default_timeout,
                    self.worktree_limits.clone(),
                );
                orchestrator.run(task_id).await?;
            }
            KIND_PR_SYNC_TICK => {
                let monitor = PrMonitor::new(self.pool.clone(), self.bus.clone(), self.hosting.clone());
                monitor.sync_all().await?;
            }
            other => anyhow::bail!("unknown job kind: {other}"),
        }
        Ok(())
    }
}

fn parse_task_id(job: &Job) -> anyhow::Result<Uuid> {
    let task_id = job
        .payload
        .get("task_id")
        .and_then(|v| v.as_str())
        .with_context(|| format!("job {} payload missing task_id", job.id))?;
    Uuid::parse_str(task_id).with_context(|| format!("job {} has invalid task_id", job.id))
}
