//! Process-wide configuration, populated from the environment once at
//! startup. Mirrors the `DbConfig::from_env()` pattern: documented
//! defaults, a single constructor, no runtime reload.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use taskforge_db::config::DbConfig;

/// Top-level configuration for the orchestration engine.
#[derive(Debug, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub worktree_root: PathBuf,
    pub worktree_max_path_len: usize,
    pub worktree_min_free_disk_bytes: u64,
    pub worktree_cleanup_interval: Duration,
    pub code_host_token: Option<String>,
    pub code_host_base_url: String,
    pub default_merge_method: MergeMethod,
    pub claude_code_binary: String,
    pub default_execution_timeout: Duration,
    pub job_worker_concurrency: usize,
    pub pr_sync_interval: Duration,
}

/// Merge strategy used when the PR Monitor or an operator closes out a
/// pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMethod {
    Merge,
    Squash,
    Rebase,
}

impl MergeMethod {
    fn parse(s: &str) -> Self {
        match s {
            "squash" => Self::Squash,
            "rebase" => Self::Rebase,
            _ => Self::Merge,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            db: DbConfig::from_env(),
            worktree_root: env::var("TASKFORGE_WORKTREE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/taskforge-worktrees")),
            worktree_max_path_len: env_parse("TASKFORGE_WORKTREE_MAX_PATH_LEN", 4096),
            worktree_min_free_disk_bytes: env_parse("TASKFORGE_WORKTREE_MIN_FREE_DISK_BYTES", 500 * 1024 * 1024),
            worktree_cleanup_interval: Duration::from_secs(env_parse("TASKFORGE_WORKTREE_CLEANUP_INTERVAL_SECS", 300)),
            code_host_token: env::var("TASKFORGE_CODE_HOST_TOKEN").ok(),
            code_host_base_url: env::var("TASKFORGE_CODE_HOST_BASE_URL")
                .unwrap_or_else(|_| "https://api.github.com".to_string()),
            default_merge_method: env::var("TASKFORGE_DEFAULT_MERGE_METHOD")
                .map(|s| MergeMethod::parse(&s))
                .unwrap_or(MergeMethod::Merge),
            claude_code_binary: env::var("TASKFORGE_CLAUDE_CODE_BINARY").unwrap_or_else(|_| "claude".to_string()),
            default_execution_timeout: Duration::from_secs(env_parse("TASKFORGE_EXECUTION_TIMEOUT_SECS", 1800)),
            job_worker_concurrency: env_parse("TASKFORGE_JOB_WORKER_CONCURRENCY", 4),
            pr_sync_interval: Duration::from_secs(env_parse("TASKFORGE_PR_SYNC_INTERVAL_SECS", 60)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

/// The subset of [`Config`] that governs worktree placement and limits,
/// bundled together so it can be threaded into a [`crate::worktree::WorktreeManager`]
/// without passing the whole `Config`.
#[derive(Debug, Clone)]
pub struct WorktreeLimits {
    pub root: PathBuf,
    pub max_path_len: usize,
    pub min_free_disk_bytes: u64,
}

impl WorktreeLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            root: config.worktree_root.clone(),
            max_path_len: config.worktree_max_path_len,
            min_free_disk_bytes: config.worktree_min_free_disk_bytes,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
