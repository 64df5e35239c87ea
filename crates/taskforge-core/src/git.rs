//! Git Facade: stateless git plumbing shared by the Worktree Manager and
//! the Implementation Orchestrator. Every function takes the repository
//! path explicitly rather than holding one, since callers operate against
//! whichever worktree (or the main checkout) is relevant to the call.
//!
//! Invocations are timeout-bounded and retried on transient failures
//! (network hiccups, lock contention) so a flaky remote doesn't surface as
//! a hard failure on the first attempt.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to run git {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed (exit {code}): {stderr}")]
    Exit {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("git {command} timed out after {after:?}")]
    Timeout { command: String, after: Duration },
}

/// Outcome of a merge attempt. Conflicted merges are aborted automatically
/// rather than left half-applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    Success,
    Conflict { details: String },
}

/// A single entry from `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head_commit: String,
}

/// Non-empty lines of `git status --porcelain`, plus whether the tree is
/// clean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    pub clean: bool,
    pub entries: Vec<String>,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// One initial attempt plus up to three retries on a transient failure.
const MAX_ATTEMPTS: u32 = 4;
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);

/// Stderr markers that indicate a failure is worth retrying (network
/// blips, host resolution hiccups) rather than a permanent rejection.
const TRANSIENT_MARKERS: [&str; 6] = [
    "could not resolve host",
    "connection timed out",
    "connection reset",
    "unable to access",
    "the remote end hung up unexpectedly",
    "early eof",
];

fn is_transient(output: &std::process::Output) -> bool {
    if output.status.success() {
        return false;
    }
    let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| stderr.contains(marker))
}

/// Run `git <args>` in `repo`, bounded by [`DEFAULT_TIMEOUT`] per attempt
/// and retried with exponential backoff while the failure looks transient.
async fn run(repo: &Path, args: &[&str]) -> Result<std::process::Output, GitError> {
    let mut backoff = INITIAL_BACKOFF;
    let mut last_err = None;

    for attempt in 1..=MAX_ATTEMPTS {
        let spawn = Command::new("git").args(args).current_dir(repo).output();
        match tokio::time::timeout(DEFAULT_TIMEOUT, spawn).await {
            Err(_elapsed) => {
                last_err = Some(GitError::Timeout { command: args.join(" "), after: DEFAULT_TIMEOUT });
            }
            Ok(Err(e)) => return Err(GitError::Spawn { command: args.join(" "), source: e }),
            Ok(Ok(output)) => {
                if output.status.success() || !is_transient(&output) {
                    return Ok(output);
                }
                last_err = Some(exit_err(args, &output));
            }
        }

        if attempt < MAX_ATTEMPTS {
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }

    Err(last_err.expect("loop records an error on every iteration before exhausting attempts"))
}

fn exit_err(args: &[&str], output: &std::process::Output) -> GitError {
    GitError::Exit {
        command: args.join(" "),
        code: output.status.code().unwrap_or(-1),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

/// Confirm `dir` is a git repository (or a worktree checkout of one).
pub async fn validate(dir: &Path) -> Result<bool, GitError> {
    let output = run(dir, &["rev-parse", "--git-dir"]).await?;
    Ok(output.status.success())
}

/// Fetch the URL of remote `name`, or `None` if it isn't configured.
pub async fn remote_url(repo: &Path, name: &str) -> Result<Option<String>, GitError> {
    let args = ["remote", "get-url", name];
    let output = run(repo, &args).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such remote") {
            return Ok(None);
        }
        return Err(exit_err(&args, &output));
    }
    Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
}

/// Working-tree status, summarised from `git status --porcelain`.
pub async fn status(repo: &Path) -> Result<StatusSummary, GitError> {
    let args = ["status", "--porcelain"];
    let output = run(repo, &args).await?;
    if !output.status.success() {
        return Err(exit_err(&args, &output));
    }
    let entries: Vec<String> =
        String::from_utf8_lossy(&output.stdout).lines().map(|line| line.to_string()).collect();
    Ok(StatusSummary { clean: entries.is_empty(), entries })
}

/// Local branch names, short form (no `refs/heads/` prefix).
pub async fn list_branches(repo: &Path) -> Result<Vec<String>, GitError> {
    let args = ["for-each-ref", "--format=%(refname:short)", "refs/heads/"];
    let output = run(repo, &args).await?;
    if !output.status.success() {
        return Err(exit_err(&args, &output));
    }
    Ok(String::from_utf8_lossy(&output.stdout).lines().map(|line| line.to_string()).collect())
}

pub async fn branch_exists(repo: &Path, branch: &str) -> Result<bool, GitError> {
    let output = run(repo, &["rev-parse", "--verify", &format!("refs/heads/{branch}")]).await?;
    Ok(output.status.success())
}

pub async fn checkout(repo: &Path, branch: &str) -> Result<(), GitError> {
    let args = ["checkout", branch];
    let output = run(repo, &args).await?;
    if !output.status.success() {
        return Err(exit_err(&args, &output));
    }
    Ok(())
}

/// Register a new worktree at `new_worktree_dir` on `new_branch`. If
/// `new_branch` already exists it is checked out as-is; otherwise it is
/// created from `base_branch`.
pub async fn create_worktree(
    base_dir: &Path,
    base_branch: &str,
    new_worktree_dir: &Path,
    new_branch: &str,
) -> Result<(), GitError> {
    let dir_str = new_worktree_dir.to_string_lossy().into_owned();

    let output = if branch_exists(base_dir, new_branch).await? {
        let args = ["worktree", "add", dir_str.as_str(), new_branch];
        run(base_dir, &args).await?
    } else {
        let args = ["worktree", "add", "-b", new_branch, dir_str.as_str(), base_branch];
        run(base_dir, &args).await?
    };

    if !output.status.success() {
        return Err(exit_err(&["worktree", "add"], &output));
    }
    Ok(())
}

/// Unregister the worktree at `worktree_dir`. A worktree git no longer
/// knows about is treated as already removed.
pub async fn delete_worktree(base_dir: &Path, worktree_dir: &Path) -> Result<(), GitError> {
    let dir_str = worktree_dir.to_string_lossy().into_owned();
    let args = ["worktree", "remove", "--force", dir_str.as_str()];
    let output = run(base_dir, &args).await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("is not a working tree") {
            return Ok(());
        }
        return Err(exit_err(&args, &output));
    }
    Ok(())
}

pub async fn list_worktrees(repo: &Path) -> Result<Vec<WorktreeEntry>, GitError> {
    let args = ["worktree", "list", "--porcelain"];
    let output = run(repo, &args).await?;
    if !output.status.success() {
        return Err(exit_err(&args, &output));
    }
    Ok(parse_worktree_porcelain(&String::from_utf8_lossy(&output.stdout)))
}

/// Drop references to worktrees whose directories were removed outside of
/// git.
pub async fn prune_worktrees(repo: &Path) -> Result<(), GitError> {
    let args = ["worktree", "prune"];
    let output = run(repo, &args).await?;
    if !output.status.success() {
        return Err(exit_err(&args, &output));
    }
    Ok(())
}

/// Merge `head` into the currently checked out branch of `repo` with
/// `--no-ff`. Conflicted merges are aborted and reported rather than left
/// for the caller to clean up.
pub async fn merge_branch(repo: &Path, head: &str) -> Result<MergeResult, GitError> {
    let args = ["merge", "--no-ff", head];
    let output = run(repo, &args).await?;

    if output.status.success() {
        return Ok(MergeResult::Success);
    }

    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

    if stderr.contains("CONFLICT") || stdout.contains("CONFLICT") || stderr.contains("Automatic merge failed") {
        let _ = run(repo, &["merge", "--abort"]).await;
        return Ok(MergeResult::Conflict {
            details: format!("{stdout}\n{stderr}").trim().to_string(),
        });
    }

    Err(exit_err(&args, &output))
}

/// Delete a local branch. `force` maps to `-D` instead of `-d`, needed
/// after a `--no-ff` merge where git can't prove the branch is merged.
pub async fn delete_branch(repo: &Path, branch: &str, force: bool) -> Result<(), GitError> {
    let flag = if force { "-D" } else { "-d" };
    let args = ["branch", flag, branch];
    let output = run(repo, &args).await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("not found") {
            return Ok(());
        }
        return Err(exit_err(&args, &output));
    }

    Ok(())
}

/// Stage every change in the worktree and commit it. Returns `None` if
/// the worktree was already clean (nothing to commit).
pub async fn commit_all(repo: &Path, message: &str) -> Result<Option<String>, GitError> {
    let add_args = ["add", "-A"];
    let add_output = run(repo, &add_args).await?;
    if !add_output.status.success() {
        return Err(exit_err(&add_args, &add_output));
    }

    let status_output = run(repo, &["status", "--porcelain"]).await?;
    if String::from_utf8_lossy(&status_output.stdout).trim().is_empty() {
        return Ok(None);
    }

    let commit_args = ["commit", "-m", message];
    let commit_output = run(repo, &commit_args).await?;
    if !commit_output.status.success() {
        return Err(exit_err(&commit_args, &commit_output));
    }

    let rev_output = run(repo, &["rev-parse", "HEAD"]).await?;
    let sha = String::from_utf8_lossy(&rev_output.stdout).trim().to_string();
    Ok(Some(sha))
}

pub async fn push(repo: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
    let args = ["push", remote, branch];
    let output = run(repo, &args).await?;
    if !output.status.success() {
        return Err(exit_err(&args, &output));
    }
    Ok(())
}

/// Parse the porcelain output of `git worktree list --porcelain`. Never
/// fails: unparseable or truncated blocks are dropped rather than
/// surfaced as an error.
fn parse_worktree_porcelain(output: &str) -> Vec<WorktreeEntry> {
    let mut worktrees = Vec::new();
    let mut current_path: Option<PathBuf> = None;
    let mut current_head: Option<String> = None;
    let mut current_branch: Option<String> = None;

    for line in output.lines() {
        if line.is_empty() {
            if let (Some(path), Some(head)) = (current_path.take(), current_head.take()) {
                worktrees.push(WorktreeEntry { path, branch: current_branch.take(), head_commit: head });
            } else {
                current_path = None;
                current_head = None;
                current_branch = None;
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("worktree ") {
            current_path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            current_head = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("branch ") {
            current_branch = Some(rest.strip_prefix("refs/heads/").unwrap_or(rest).to_string());
        }
    }

    if let (Some(path), Some(head)) = (current_path, current_head) {
        worktrees.push(WorktreeEntry { path, branch: current_branch, head_commit: head });
    }

    worktrees
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::process::Command;

    async fn create_temp_repo() -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().expect("failed to create temp dir");
        let repo_path = dir.path().to_path_buf();

        Command::new("git").arg("init").current_dir(&repo_path).output().await.unwrap();
        Command::new("git").args(["config", "user.email", "test@taskforge.dev"]).current_dir(&repo_path).output().await.unwrap();
        Command::new("git").args(["config", "user.name", "Taskforge Test"]).current_dir(&repo_path).output().await.unwrap();

        std::fs::write(repo_path.join("README.md"), "# Test repo\n").unwrap();
        Command::new("git").args(["add", "."]).current_dir(&repo_path).output().await.unwrap();
        Command::new("git").args(["commit", "-m", "Initial commit"]).current_dir(&repo_path).output().await.unwrap();

        (dir, repo_path)
    }

    #[tokio::test]
    async fn commit_all_returns_none_when_clean() {
        let (_dir, repo_path) = create_temp_repo().await;
        let sha = commit_all(&repo_path, "nothing to commit").await.unwrap();
        assert!(sha.is_none());
    }

    #[tokio::test]
    async fn commit_all_commits_changes() {
        let (_dir, repo_path) = create_temp_repo().await;
        std::fs::write(repo_path.join("new.txt"), "content\n").unwrap();
        let sha = commit_all(&repo_path, "add new file").await.unwrap();
        assert!(sha.is_some());
    }

    #[tokio::test]
    async fn delete_branch_is_idempotent() {
        let (_dir, repo_path) = create_temp_repo().await;
        delete_branch(&repo_path, "does-not-exist", true).await.unwrap();
    }

    #[tokio::test]
    async fn branch_exists_false_for_unknown_branch() {
        let (_dir, repo_path) = create_temp_repo().await;
        assert!(!branch_exists(&repo_path, "nope").await.unwrap());
    }

    #[tokio::test]
    async fn validate_true_for_git_repo_false_otherwise() {
        let (_dir, repo_path) = create_temp_repo().await;
        assert!(validate(&repo_path).await.unwrap());

        let not_a_repo = TempDir::new().unwrap();
        assert!(!validate(not_a_repo.path()).await.unwrap());
    }

    #[tokio::test]
    async fn remote_url_is_none_when_unconfigured() {
        let (_dir, repo_path) = create_temp_repo().await;
        assert_eq!(remote_url(&repo_path, "origin").await.unwrap(), None);
    }

    #[tokio::test]
    async fn status_reports_clean_tree() {
        let (_dir, repo_path) = create_temp_repo().await;
        let status = status(&repo_path).await.unwrap();
        assert!(status.clean);
        assert!(status.entries.is_empty());
    }

    #[tokio::test]
    async fn status_reports_untracked_file() {
        let (_dir, repo_path) = create_temp_repo().await;
        std::fs::write(repo_path.join("untracked.txt"), "x\n").unwrap();
        let status = status(&repo_path).await.unwrap();
        assert!(!status.clean);
        assert_eq!(status.entries.len(), 1);
    }

    #[tokio::test]
    async fn list_branches_includes_current_branch() {
        let (_dir, repo_path) = create_temp_repo().await;
        let branches = list_branches(&repo_path).await.unwrap();
        assert_eq!(branches.len(), 1);
    }

    #[tokio::test]
    async fn create_and_list_and_delete_worktree_round_trips() {
        let (_dir, repo_path) = create_temp_repo().await;
        let base_branch = list_branches(&repo_path).await.unwrap().into_iter().next().unwrap();
        let worktree_dir = TempDir::new().unwrap();
        let target = worktree_dir.path().join("checkout");

        create_worktree(&repo_path, &base_branch, &target, "feature-x").await.unwrap();
        assert!(target.exists());

        let worktrees = list_worktrees(&repo_path).await.unwrap();
        assert!(worktrees.iter().any(|w| w.branch.as_deref() == Some("feature-x")));

        delete_worktree(&repo_path, &target).await.unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn parse_worktree_porcelain_basic() {
        let input = "\
worktree /home/user/project
HEAD abc123def456
branch refs/heads/main

worktree /home/user/worktrees/feature
HEAD 789abc012def
branch refs/heads/task-x

worktree /home/user/worktrees/detached
HEAD 111222333444
detached

";
        let result = parse_worktree_porcelain(input);
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].branch.as_deref(), Some("main"));
        assert_eq!(result[1].branch.as_deref(), Some("task-x"));
        assert_eq!(result[2].branch, None);
    }

    #[test]
    fn parse_worktree_porcelain_empty() {
        assert!(parse_worktree_porcelain("").is_empty());
    }
}
