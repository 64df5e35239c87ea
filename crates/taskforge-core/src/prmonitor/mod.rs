//! PR Monitor: polls the remote hosting API for each open pull request and
//! maps remote state back onto task status. The polling/mapping logic is
//! independent of which code host is configured via the [`HostingClient`]
//! trait; production uses [`octocrab`] against GitHub, tests use
//! [`FakeHostingClient`].

pub mod github;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use taskforge_db::models::{PullRequest, PullRequestState, TaskStatus};
use taskforge_db::queries::{pull_requests, tasks, worktrees};

use crate::events::{EventBus, EventPayload};
use crate::state::TaskStateMachine;

#[derive(Debug, Error)]
pub enum PrMonitorError {
    #[error("remote hosting API error: {0}")]
    Remote(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

/// Remote state of a single pull request, as reported by the code host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePrState {
    pub state: PullRequestState,
    pub merge_commit_sha: Option<String>,
}

/// Thin trait boundary over the code-hosting API. Keeps the monitor's
/// polling/mapping logic independent of which host is configured.
#[async_trait]
pub trait HostingClient: Send + Sync {
    async fn fetch_pr_state(&self, repository: &str, remote_number: i64) -> Result<RemotePrState, PrMonitorError>;

    async fn open_pull_request(
        &self,
        repository: &str,
        base_branch: &str,
        head_branch: &str,
        title: &str,
        body: &str,
    ) -> Result<(i64, String), PrMonitorError>;
}

/// Drives `pr_sync_tick` handling and on-demand sync. Holds no internal
/// timer; callers (the job queue consumer, or an operator command) decide
/// when to invoke [`PrMonitor::sync_all`] / [`PrMonitor::sync_one`].
pub struct PrMonitor<H: HostingClient> {
    pool: PgPool,
    bus: EventBus,
    client: H,
}

impl<H: HostingClient> PrMonitor<H> {
    pub fn new(pool: PgPool, bus: EventBus, client: H) -> Self {
        Self { pool, bus, client }
    }

    /// Poll every non-terminal pull request and apply any observed state
    /// change. Idempotent: a PR already reflecting the remote's state is
    /// a no-op.
    pub async fn sync_all(&self) -> Result<()> {
        let open = pull_requests::list_open_pull_requests(&self.pool).await?;
        for pr in open {
            if let Err(e) = self.sync_one(&pr).await {
                warn!(pull_request_id = %pr.id, error = %e, "pr sync failed for one pull request, continuing");
            }
        }
        Ok(())
    }

    pub async fn sync_one(&self, pr: &PullRequest) -> Result<()> {
        let remote = self
            .client
            .fetch_pr_state(&pr.repository, pr.remote_number)
            .await
            .context("failed to fetch remote pull request state")?;

        if remote.state == pr.state {
            return Ok(());
        }

        pull_requests::transition_pr_state(&self.pool, pr.id, remote.state, remote.merge_commit_sha.as_deref()).await?;

        let task_id = pr.task_id;
        let project_id = tasks::get_task(&self.pool, task_id)
            .await?
            .map(|t| t.project_id)
            .unwrap_or(Uuid::nil());

        self.bus
            .publish(project_id, EventPayload::PrUpdated { task_id, pull_request_id: pr.id })
            .await
            .ok();

        match remote.state {
            PullRequestState::Merged => {
                self.bus.publish(project_id, EventPayload::PrMerged { task_id, pull_request_id: pr.id }).await.ok();
                match TaskStateMachine::transition(
                    &self.pool,
                    task_id,
                    TaskStatus::CodeReviewing,
                    TaskStatus::Done,
                    "pr-monitor",
                    Some("pull request merged"),
                )
                .await
                {
                    Ok(()) => {
                        self.bus
                            .publish(
                                project_id,
                                EventPayload::TaskStatusChanged {
                                    task_id,
                                    from: Some("code_reviewing".to_string()),
                                    to: "done".to_string(),
                                },
                            )
                            .await
                            .ok();
                    }
                    Err(e) => {
                        warn!(task_id = %task_id, error = %e, "task was not in code_reviewing when its pr merged");
                    }
                }

                if let Some(worktree) = worktrees::get_worktree_for_task(&self.pool, task_id).await? {
                    worktrees::soft_delete_worktree(&self.pool, worktree.id).await?;
                }
            }
            PullRequestState::Closed => {
                self.bus.publish(project_id, EventPayload::PrClosed { task_id, pull_request_id: pr.id }).await.ok();
                match TaskStateMachine::transition(
                    &self.pool,
                    task_id,
                    TaskStatus::CodeReviewing,
                    TaskStatus::Cancelled,
                    "pr-monitor",
                    Some("pull request closed without merge"),
                )
                .await
                {
                    Ok(()) => {
                        self.bus
                            .publish(
                                project_id,
                                EventPayload::TaskStatusChanged {
                                    task_id,
                                    from: Some("code_reviewing".to_string()),
                                    to: "cancelled".to_string(),
                                },
                            )
                            .await
                            .ok();
                    }
                    Err(e) => {
                        info!(task_id = %task_id, error = %e, "pr closed while task already left code_reviewing, no transition applied");
                    }
                }
            }
            PullRequestState::Open => {}
        }

        Ok(())
    }
}

/// Lets an `Arc<H>` stand in for `H` so one hosting client can be shared
/// across the Implementation Orchestrator and the PR Monitor without
/// requiring `H: Clone`.
#[async_trait]
impl<T: HostingClient + ?Sized> HostingClient for Arc<T> {
    async fn fetch_pr_state(&self, repository: &str, remote_number: i64) -> Result<RemotePrState, PrMonitorError> {
        (**self).fetch_pr_state(repository, remote_number).await
    }

    async fn open_pull_request(
        &self,
        repository: &str,
        base_branch: &str,
        head_branch: &str,
        title: &str,
        body: &str,
    ) -> Result<(i64, String), PrMonitorError> {
        (**self).open_pull_request(repository, base_branch, head_branch, title, body).await
    }
}

/// Deterministic, in-memory [`HostingClient`] for tests. Pre-load
/// expected states with [`FakeHostingClient::set_state`].
#[derive(Default, Clone)]
pub struct FakeHostingClient {
    states: std::sync::Arc<tokio::sync::Mutex<std::collections::HashMap<(String, i64), RemotePrState>>>,
    next_number: std::sync::Arc<std::sync::atomic::AtomicI64>,
}

impl FakeHostingClient {
    pub fn new() -> Self {
        Self {
            states: Default::default(),
            next_number: std::sync::Arc::new(std::sync::atomic::AtomicI64::new(1)),
        }
    }

    pub async fn set_state(&self, repository: &str, remote_number: i64, state: RemotePrState) {
        self.states
            .lock()
            .await
            .insert((repository.to_string(), remote_number), state);
    }
}

#[async_trait]
impl HostingClient for FakeHostingClient {
    async fn fetch_pr_state(&self, repository: &str, remote_number: i64) -> Result<RemotePrState, PrMonitorError> {
        self.states
            .lock()
            .await
            .get(&(repository.to_string(), remote_number))
            .cloned()
            .ok_or_else(|| PrMonitorError::Remote(format!("no fake state for {repository}#{remote_number}")))
    }

    async fn open_pull_request(
        &self,
        repository: &str,
        _base_branch: &str,
        _head_branch: &str,
        _title: &str,
        _body: &str,
    ) -> Result<(i64, String), PrMonitorError> {
        let number = self.next_number.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let url = format!("https://example.invalid/{repository}/pull/{number}");
        self.set_state(
            repository,
            number,
            RemotePrState { state: PullRequestState::Open, merge_commit_sha: None },
        )
        .await;
        Ok((number, url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_client_open_then_fetch_round_trips() {
        let client = FakeHostingClient::new();
        let (number, url) = client.open_pull_request("org/repo", "main", "task-1", "title", "body").await.unwrap();
        assert!(url.contains(&number.to_string()));

        let state = client.fetch_pr_state("org/repo", number).await.unwrap();
        assert_eq!(state.state, PullRequestState::Open);
    }

    #[tokio::test]
    async fn fake_client_unknown_pr_errors() {
        let client = FakeHostingClient::new();
        let result = client.fetch_pr_state("org/repo", 999).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fake_client_state_transitions_are_observable() {
        let client = FakeHostingClient::new();
        let (number, _) = client.open_pull_request("org/repo", "main", "task-1", "t", "b").await.unwrap();

        client
            .set_state(
                "org/repo",
                number,
                RemotePrState { state: PullRequestState::Merged, merge_commit_sha: Some("abc123".into()) },
            )
            .await;

        let state = client.fetch_pr_state("org/repo", number).await.unwrap();
        assert_eq!(state.state, PullRequestState::Merged);
        assert_eq!(state.merge_commit_sha.as_deref(), Some("abc123"));
    }
}
