//! `octocrab`-backed [`super::HostingClient`] for GitHub.

use async_trait::async_trait;
use octocrab::Octocrab;
use octocrab::models::IssueState;
use tracing::debug;

use taskforge_db::models::PullRequestState;

use super::{HostingClient, PrMonitorError, RemotePrState};

pub struct GitHubHostingClient {
    client: Octocrab,
}

impl GitHubHostingClient {
    pub fn new(token: String) -> Result<Self, PrMonitorError> {
        let client = Octocrab::builder()
            .personal_token(token)
            .build()
            .map_err(|e| PrMonitorError::Remote(e.to_string()))?;
        Ok(Self { client })
    }

    fn split_repository(repository: &str) -> Result<(&str, &str), PrMonitorError> {
        repository
            .split_once('/')
            .ok_or_else(|| PrMonitorError::Remote(format!("repository must be 'owner/name', got '{repository}'")))
    }
}

#[async_trait]
impl HostingClient for GitHubHostingClient {
    async fn fetch_pr_state(&self, repository: &str, remote_number: i64) -> Result<RemotePrState, PrMonitorError> {
        let (owner, repo) = Self::split_repository(repository)?;

        let pr = self
            .client
            .pulls(owner, repo)
            .get(remote_number as u64)
            .await
            .map_err(|e| {
                if is_rate_limited(&e) {
                    PrMonitorError::RateLimited { retry_after_secs: 60 }
                } else {
                    PrMonitorError::Remote(e.to_string())
                }
            })?;

        let state = match (pr.state, pr.merged_at.is_some()) {
            (_, true) => PullRequestState::Merged,
            (Some(IssueState::Closed), false) => PullRequestState::Closed,
            _ => PullRequestState::Open,
        };

        Ok(RemotePrState {
            state,
            merge_commit_sha: pr.merge_commit_sha,
        })
    }

    async fn open_pull_request(
        &self,
        repository: &str,
        base_branch: &str,
        head_branch: &str,
        title: &str,
        body: &str,
    ) -> Result<(i64, String), PrMonitorError> {
        let (owner, repo) = Self::split_repository(repository)?;

        let pr = self
            .client
            .pulls(owner, repo)
            .create(title, head_branch, base_branch)
            .body(body)
            .send()
            .await
            .map_err(|e| PrMonitorError::Remote(e.to_string()))?;

        debug!(number = pr.number, repository, "opened pull request");

        let url = pr
            .html_url
            .map(|u| u.to_string())
            .unwrap_or_else(|| format!("https://github.com/{repository}/pull/{}", pr.number));

        Ok((pr.number as i64, url))
    }
}

fn is_rate_limited(error: &octocrab::Error) -> bool {
    matches!(error, octocrab::Error::GitHub { source, .. } if source.message.to_lowercase().contains("rate limit"))
}
