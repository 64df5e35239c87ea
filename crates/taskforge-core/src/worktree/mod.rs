//! Git worktree management for task isolation.
//!
//! Each task runs in its own git worktree, providing filesystem isolation
//! without the overhead of full repository clones. Worktrees share the
//! object store of the main repository but have independent working
//! directories and index files. Placement, sanitisation, and disk/length
//! limits are enforced here; the actual `git` invocations are delegated to
//! the [`crate::git`] facade so every worktree operation gets its
//! timeout-and-retry treatment for free.

#[cfg(unix)]
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::git;

/// Errors that can occur during worktree operations.
#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("not a git repository: {0}")]
    NoProjectRepo(PathBuf),

    #[error("worktree already exists at {0}")]
    WorktreeExists(PathBuf),

    #[error("unsafe worktree path: {0}")]
    PathUnsafe(String),

    #[error("insufficient free disk space: {available} bytes available, {required} bytes required")]
    DiskSpaceLow { available: u64, required: u64 },

    #[error("git operation failed: {0}")]
    GitFailed(#[from] git::GitError),

    #[error("filesystem operation failed: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse worktree list output: {0}")]
    ParseError(String),

    #[error("init script failed (exit {code}): {stderr}")]
    InitScriptFailed { code: i32, stderr: String },

    #[error("init script timed out after {0:?}")]
    InitScriptTimeout(Duration),
}

/// Information about a single git worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head_commit: String,
}

impl From<git::WorktreeEntry> for WorktreeInfo {
    fn from(entry: git::WorktreeEntry) -> Self {
        Self { path: entry.path, branch: entry.branch, head_commit: entry.head_commit }
    }
}

const INIT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Characters that are unsafe in a path component, per the sanitisation
/// rule: replace with `_`, collapse duplicates, trim, truncate to 100.
const UNSAFE_PATH_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];
const MAX_COMPONENT_LEN: usize = 100;

/// Replace unsafe characters and whitespace in a single path component,
/// collapsing runs of replacements into one `_` and trimming the result.
/// A component that sanitises to nothing (or to only dots, which would
/// otherwise resolve to `.`/`..`) becomes `_`.
pub fn sanitize_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_sep = false;

    for ch in input.chars() {
        if UNSAFE_PATH_CHARS.contains(&ch) || ch.is_whitespace() {
            if !last_was_sep {
                out.push('_');
                last_was_sep = true;
            }
        } else {
            out.push(ch);
            last_was_sep = false;
        }
    }

    let trimmed = out.trim_matches('_');
    let truncated: String = trimmed.chars().take(MAX_COMPONENT_LEN).collect();

    if truncated.is_empty() || truncated.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        truncated
    }
}

/// Turn a task title into the hyphenated, lowercase slug used in branch
/// names (`"Add hello endpoint"` -> `"add-hello-endpoint"`).
fn slugify_title(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_was_hyphen = true;

    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }

    let slug = slug.trim_end_matches('-');
    let slug: String = slug.chars().take(MAX_COMPONENT_LEN).collect();
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug
    }
}

/// Manages git worktrees for task isolation.
///
/// Git does not support concurrent worktree operations on the same
/// repository (it uses a lock file on the shared object store). This
/// manager serialises all mutating git operations through an internal
/// async mutex so that concurrent task lifecycles do not race.
#[derive(Debug, Clone)]
pub struct WorktreeManager {
    repo_path: PathBuf,
    worktree_root: PathBuf,
    max_path_len: usize,
    min_free_disk_bytes: u64,
    git_lock: Arc<Mutex<()>>,
}

impl WorktreeManager {
    /// Create a new `WorktreeManager`.
    ///
    /// `repo_path` is the project's main git checkout that worktrees are
    /// branched from. `worktree_root` is the configured root directory
    /// under which every project's and task's worktree is placed
    /// (`<worktree_root>/project-<project-id>/task-<task-id>/`).
    pub async fn new(
        repo_path: impl Into<PathBuf>,
        worktree_root: PathBuf,
        max_path_len: usize,
        min_free_disk_bytes: u64,
    ) -> Result<Self, WorktreeError> {
        let repo_path = repo_path.into();

        match git::validate(&repo_path).await {
            Ok(true) => {}
            Ok(false) => return Err(WorktreeError::NoProjectRepo(repo_path)),
            Err(e) => return Err(WorktreeError::GitFailed(e)),
        }

        Ok(Self {
            repo_path,
            worktree_root,
            max_path_len,
            min_free_disk_bytes,
            git_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn worktree_root(&self) -> &Path {
        &self.worktree_root
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Build the conventional branch name for a task: `task-<task-id>-<title-slug>`.
    pub fn branch_name(task_id: Uuid, title: &str) -> String {
        format!("task-{task_id}-{}", slugify_title(title))
    }

    /// Compute (but do not create) the worktree path for a project/task
    /// pair: `<worktree_root>/project-<project-id>/task-<task-id>/`.
    fn worktree_path(&self, project_id: Uuid, task_id: Uuid) -> PathBuf {
        let project_component = sanitize_component(&format!("project-{project_id}"));
        let task_component = sanitize_component(&format!("task-{task_id}"));
        self.worktree_root.join(project_component).join(task_component)
    }

    fn check_path_safety(&self, path: &Path) -> Result<(), WorktreeError> {
        let path_str = path.to_string_lossy();
        if path_str.len() > self.max_path_len {
            return Err(WorktreeError::PathUnsafe(format!(
                "worktree path is {} chars, exceeding the configured maximum of {}: {path_str}",
                path_str.len(),
                self.max_path_len
            )));
        }
        if !path.starts_with(&self.worktree_root) {
            return Err(WorktreeError::PathUnsafe(format!(
                "worktree path {path_str} escapes the configured worktree root {}",
                self.worktree_root.display()
            )));
        }
        Ok(())
    }

    /// Check free disk space on the nearest existing ancestor of `path`
    /// against `min_free_disk_bytes`. A stat failure doesn't block worktree
    /// creation — there's nothing more useful to do with it than log it.
    #[cfg(unix)]
    fn check_free_disk(&self, path: &Path) -> Result<(), WorktreeError> {
        if self.min_free_disk_bytes == 0 {
            return Ok(());
        }

        let mut probe = path.to_path_buf();
        while !probe.exists() {
            match probe.parent() {
                Some(parent) => probe = parent.to_path_buf(),
                None => break,
            }
        }

        let Ok(c_path) = CString::new(probe.to_string_lossy().as_bytes()) else {
            return Ok(());
        };

        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if ret != 0 {
            tracing::warn!(path = %probe.display(), "failed to stat free disk space, skipping check");
            return Ok(());
        }

        let available = stat.f_bavail as u64 * stat.f_frsize as u64;
        if available < self.min_free_disk_bytes {
            return Err(WorktreeError::DiskSpaceLow { available, required: self.min_free_disk_bytes });
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn check_free_disk(&self, _path: &Path) -> Result<(), WorktreeError> {
        Ok(())
    }

    /// Create a new worktree for `(project_id, task_id)` on `branch_name`,
    /// forked from `base_branch`.
    ///
    /// Fails with [`WorktreeError::WorktreeExists`] if the target path is
    /// already occupied (e.g. a leftover directory from a crashed run
    /// whose `Worktree` row was never written) rather than silently
    /// reusing it. Callers that want idempotence check the `Worktree`
    /// table themselves before calling this.
    pub async fn create_worktree(
        &self,
        project_id: Uuid,
        task_id: Uuid,
        base_branch: &str,
        branch_name: &str,
    ) -> Result<WorktreeInfo, WorktreeError> {
        let _lock = self.git_lock.lock().await;

        let worktree_path = self.worktree_path(project_id, task_id);
        self.check_path_safety(&worktree_path)?;

        if worktree_path.exists() {
            return Err(WorktreeError::WorktreeExists(worktree_path));
        }

        std::fs::create_dir_all(&self.worktree_root).map_err(|e| WorktreeError::Io {
            message: format!("failed to create worktree root {}", self.worktree_root.display()),
            source: e,
        })?;
        self.check_free_disk(&self.worktree_root)?;

        if let Some(parent) = worktree_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| WorktreeError::Io {
                message: format!("failed to create worktree parent directory {}", parent.display()),
                source: e,
            })?;
        }

        if let Err(e) = git::create_worktree(&self.repo_path, base_branch, &worktree_path, branch_name).await {
            self.cleanup_partial(&worktree_path).await;
            return Err(WorktreeError::GitFailed(e));
        }

        self.find_worktree_by_path(&worktree_path).await
    }

    /// Run a project's init script inside a freshly created worktree.
    /// Failures here are reported to the caller as a warning, not a fatal
    /// error: the worktree itself is already usable.
    pub async fn run_init_script(&self, worktree_path: &Path, script: &str) -> Result<(), WorktreeError> {
        let attempt = async {
            let output = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(script)
                .current_dir(worktree_path)
                .env("WORKTREE_PATH", worktree_path)
                .output()
                .await
                .map_err(|e| WorktreeError::Io { message: "failed to spawn init script".into(), source: e })?;

            if !output.status.success() {
                return Err(WorktreeError::InitScriptFailed {
                    code: output.status.code().unwrap_or(-1),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                });
            }
            Ok(())
        };

        match tokio::time::timeout(INIT_SCRIPT_TIMEOUT, attempt).await {
            Ok(result) => result,
            Err(_elapsed) => Err(WorktreeError::InitScriptTimeout(INIT_SCRIPT_TIMEOUT)),
        }
    }

    /// Remove a worktree: deletes the branch (best-effort), removes the
    /// worktree registration via the Git Facade, then deletes the
    /// directory. No-op if nothing is there to remove.
    pub async fn remove_worktree(&self, path: &Path, branch_name: &str) -> Result<(), WorktreeError> {
        let _lock = self.git_lock.lock().await;

        let _ = git::delete_branch(&self.repo_path, branch_name, true).await;

        if let Err(e) = git::delete_worktree(&self.repo_path, path).await {
            tracing::warn!(path = %path.display(), error = %e, "git worktree remove failed, deleting directory directly");
        }

        if path.exists() {
            std::fs::remove_dir_all(path)
                .map_err(|e| WorktreeError::Io { message: format!("failed to remove worktree directory {}", path.display()), source: e })?;
        }

        let _ = git::prune_worktrees(&self.repo_path).await;
        Ok(())
    }

    pub async fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, WorktreeError> {
        let entries = git::list_worktrees(&self.repo_path).await?;
        Ok(entries.into_iter().map(WorktreeInfo::from).collect())
    }

    /// Prune stale worktree entries (directories removed outside of git).
    pub async fn cleanup_stale(&self) -> Result<(), WorktreeError> {
        git::prune_worktrees(&self.repo_path).await?;
        Ok(())
    }

    async fn find_worktree_by_path(&self, path: &Path) -> Result<WorktreeInfo, WorktreeError> {
        let worktrees = self.list_worktrees().await?;
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        for wt in worktrees {
            let wt_canonical = wt.path.canonicalize().unwrap_or_else(|_| wt.path.clone());
            if wt_canonical == canonical {
                return Ok(wt);
            }
        }

        Err(WorktreeError::ParseError(format!("worktree not found at path: {}", path.display())))
    }

    async fn cleanup_partial(&self, path: &Path) {
        if path.exists() {
            tracing::warn!(path = %path.display(), "cleaning up partial worktree directory");
            let _ = std::fs::remove_dir_all(path);
        }
        let _ = git::prune_worktrees(&self.repo_path).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::process::Command;

    async fn create_temp_repo() -> (TempDir, PathBuf) {
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

    async fn manager_for(repo_path: &Path, worktree_root: &Path) -> WorktreeManager {
        WorktreeManager::new(repo_path, worktree_root.to_path_buf(), 4096, 0).await.expect("failed to build manager")
    }

    #[tokio::test]
    async fn new_with_valid_repo() {
        let (_dir, repo_path) = create_temp_repo().await;
        let root = TempDir::new().unwrap();
        let mgr = WorktreeManager::new(&repo_path, root.path().to_path_buf(), 4096, 0).await;
        assert!(mgr.is_ok());
        assert_eq!(mgr.unwrap().repo_path(), repo_path);
    }

    #[tokio::test]
    async fn new_with_invalid_repo() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let root = TempDir::new().unwrap();
        let result = WorktreeManager::new(dir.path(), root.path().to_path_buf(), 4096, 0).await;
        assert!(matches!(result, Err(WorktreeError::NoProjectRepo(_))));
    }

    #[test]
    fn branch_name_is_task_id_and_title_slug() {
        let id = Uuid::nil();
        assert_eq!(
            WorktreeManager::branch_name(id, "Add hello endpoint"),
            format!("task-{id}-add-hello-endpoint")
        );
    }

    #[test]
    fn branch_name_falls_back_when_title_has_no_alphanumerics() {
        let id = Uuid::nil();
        assert_eq!(WorktreeManager::branch_name(id, "!!!"), format!("task-{id}-task"));
    }

    #[test]
    fn sanitize_component_replaces_unsafe_characters_and_collapses_runs() {
        assert_eq!(sanitize_component("a/b\\c: d"), "a_b_c_d");
        assert_eq!(sanitize_component("  leading and trailing  "), "leading_and_trailing");
    }

    #[test]
    fn sanitize_component_neutralises_dot_segments() {
        assert_eq!(sanitize_component(".."), "_");
        assert_eq!(sanitize_component("."), "_");
    }

    #[test]
    fn sanitize_component_truncates_to_100_chars() {
        let long = "a".repeat(250);
        assert_eq!(sanitize_component(&long).len(), 100);
    }

    #[tokio::test]
    async fn create_and_list_worktree() {
        let (_dir, repo_path) = create_temp_repo().await;
        let root = TempDir::new().unwrap();
        let mgr = manager_for(&repo_path, root.path()).await;

        let project_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        let branch = WorktreeManager::branch_name(task_id, "Add hello endpoint");
        let info = mgr.create_worktree(project_id, task_id, "master", &branch).await.expect("create_worktree failed");

        assert!(info.path.exists());
        assert_eq!(info.branch.as_deref(), Some(branch.as_str()));
        assert_eq!(
            info.path,
            root.path().join(format!("project-{project_id}")).join(format!("task-{task_id}"))
        );

        let worktrees = mgr.list_worktrees().await.expect("list_worktrees failed");
        assert!(worktrees.len() >= 2);
    }

    #[tokio::test]
    async fn create_worktree_fails_when_path_already_occupied() {
        let (_dir, repo_path) = create_temp_repo().await;
        let root = TempDir::new().unwrap();
        let mgr = manager_for(&repo_path, root.path()).await;

        let project_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        let branch = WorktreeManager::branch_name(task_id, "Add hello endpoint");
        mgr.create_worktree(project_id, task_id, "master", &branch).await.expect("first create failed");

        let result = mgr.create_worktree(project_id, task_id, "master", &branch).await;
        assert!(matches!(result, Err(WorktreeError::WorktreeExists(_))));
    }

    #[tokio::test]
    async fn create_worktree_rejects_disk_space_below_minimum() {
        let (_dir, repo_path) = create_temp_repo().await;
        let root = TempDir::new().unwrap();
        let mgr = WorktreeManager::new(&repo_path, root.path().to_path_buf(), 4096, u64::MAX).await.unwrap();

        let project_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        let branch = WorktreeManager::branch_name(task_id, "Add hello endpoint");
        let result = mgr.create_worktree(project_id, task_id, "master", &branch).await;
        assert!(matches!(result, Err(WorktreeError::DiskSpaceLow { .. })));
    }

    #[tokio::test]
    async fn create_worktree_rejects_path_over_max_length() {
        let (_dir, repo_path) = create_temp_repo().await;
        let root = TempDir::new().unwrap();
        let mgr = WorktreeManager::new(&repo_path, root.path().to_path_buf(), 10, 0).await.unwrap();

        let project_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        let branch = WorktreeManager::branch_name(task_id, "Add hello endpoint");
        let result = mgr.create_worktree(project_id, task_id, "master", &branch).await;
        assert!(matches!(result, Err(WorktreeError::PathUnsafe(_))));
    }

    #[tokio::test]
    async fn remove_worktree_is_idempotent() {
        let (_dir, repo_path) = create_temp_repo().await;
        let root = TempDir::new().unwrap();
        let mgr = manager_for(&repo_path, root.path()).await;

        let project_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        let branch = WorktreeManager::branch_name(task_id, "Add hello endpoint");
        let info = mgr.create_worktree(project_id, task_id, "master", &branch).await.expect("create failed");

        mgr.remove_worktree(&info.path, &branch).await.expect("first remove failed");
        mgr.remove_worktree(&info.path, &branch).await.expect("second remove should not fail");
        assert!(!info.path.exists());
    }
}
