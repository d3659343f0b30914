//! The `RepoBackend` capability-set (§4.B): abstract worktree/branch
//! primitives, with a concrete implementation over `git2` + the `git` CLI,
//! matching the split the teacher uses between read operations (git2) and
//! worktree-mutating operations (subprocess).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex as AsyncMutex;

use super::repo::GitRepo;
use crate::config::MergeStrategy;
use crate::error::RepoError;

pub type RepoResult<T> = std::result::Result<T, RepoError>;

const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);

/// Result of a no-commit merge probe (§4.B `dry_merge`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeProbe {
    Clean,
    Conflict(Vec<PathBuf>),
}

/// One entry of `list_worktrees()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub branch: String,
}

/// Abstract worktree/branch primitives consumed by `WorktreeManager` and
/// `MergeValidator`. Every primitive either succeeds or fails with a
/// `RepoError` of one of the five kinds named in §4.B.
#[async_trait]
pub trait RepoBackend: Send + Sync {
    async fn main_branch(&self) -> RepoResult<String>;
    async fn create_branch(&self, name: &str, from: &str) -> RepoResult<()>;
    async fn add_worktree(&self, path: &Path, branch: &str) -> RepoResult<()>;
    async fn current_branch(&self, path: &Path) -> RepoResult<String>;
    async fn has_changes(&self, path: &Path) -> RepoResult<bool>;
    async fn commit_all(&self, path: &Path, message: &str) -> RepoResult<()>;
    async fn status(&self, path: &Path) -> RepoResult<Vec<String>>;
    async fn dry_merge(&self, source_branch: &str) -> RepoResult<MergeProbe>;
    async fn merge(&self, source_branch: &str, strategy: MergeStrategy, message: &str) -> RepoResult<String>;
    async fn merge_abort(&self) -> RepoResult<()>;
    async fn remove_worktree(&self, path: &Path, force: bool) -> RepoResult<()>;
    async fn prune(&self) -> RepoResult<()>;
    async fn list_worktrees(&self) -> RepoResult<Vec<WorktreeEntry>>;
}

/// Implementation backed by a real checkout: `git2` for read-only queries,
/// the `git` CLI for worktree and merge mutations (the same split the
/// teacher's `GitRepo` uses between `repo.rs`/`branch.rs` and
/// `worktree.rs`). Holds one exclusive token per repository root so the
/// main directory is never the target of two mutating operations at once.
pub struct GitRepoBackend {
    repo: GitRepo,
    token: Arc<AsyncMutex<()>>,
    deadline: Duration,
}

impl GitRepoBackend {
    pub fn new(repo: GitRepo) -> Self {
        Self {
            repo,
            token: Arc::new(AsyncMutex::new(())),
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    fn root(&self) -> &Path {
        self.repo.root()
    }

    async fn run_git(&self, dir: &Path, args: &[&str]) -> RepoResult<std::process::Output> {
        let op = args.join(" ");
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let fut = cmd.output();
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(RepoError::Io(e.to_string())),
            Err(_) => Err(RepoError::Timeout {
                op,
                elapsed: self.deadline,
            }),
        }
    }
}

#[async_trait]
impl RepoBackend for GitRepoBackend {
    async fn main_branch(&self) -> RepoResult<String> {
        self.repo
            .default_branch()
            .map_err(|e| RepoError::Missing(e.to_string()))
    }

    async fn create_branch(&self, name: &str, from: &str) -> RepoResult<()> {
        let _guard = self.token.lock().await;

        // Idempotent: if the branch already exists and points at `from`'s
        // commit, nothing to do.
        let show = self
            .run_git(self.root(), &["rev-parse", "--verify", name])
            .await;
        if let Ok(ref output) = show {
            if output.status.success() {
                return Ok(());
            }
        }

        let output = self
            .run_git(self.root(), &["branch", name, from])
            .await?;
        if !output.status.success() {
            return Err(RepoError::Io(String::from_utf8_lossy(&output.stderr).into_owned()));
        }
        Ok(())
    }

    async fn add_worktree(&self, path: &Path, branch: &str) -> RepoResult<()> {
        let _guard = self.token.lock().await;

        if path.exists() {
            let existing = self.current_branch_unlocked(path).await?;
            if existing == branch {
                return Ok(());
            }
            return Err(RepoError::Busy(format!(
                "{} already checked out to branch {existing}",
                path.display()
            )));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RepoError::Io(e.to_string()))?;
        }

        let path_str = path.to_string_lossy().into_owned();
        let output = self
            .run_git(self.root(), &["worktree", "add", "-b", branch, &path_str])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("already exists") {
                return Err(RepoError::Busy(stderr.into_owned()));
            }
            return Err(RepoError::Io(stderr.into_owned()));
        }
        Ok(())
    }

    async fn current_branch(&self, path: &Path) -> RepoResult<String> {
        self.current_branch_unlocked(path).await
    }

    async fn has_changes(&self, path: &Path) -> RepoResult<bool> {
        Ok(!self.status(path).await?.is_empty())
    }

    async fn commit_all(&self, path: &Path, message: &str) -> RepoResult<()> {
        let _guard = self.token.lock().await;
        let add = self.run_git(path, &["add", "-A"]).await?;
        if !add.status.success() {
            return Err(RepoError::Io(String::from_utf8_lossy(&add.stderr).into_owned()));
        }
        let commit = self.run_git(path, &["commit", "-m", message]).await?;
        if !commit.status.success() {
            let stderr = String::from_utf8_lossy(&commit.stderr);
            if stderr.contains("nothing to commit") {
                return Ok(());
            }
            return Err(RepoError::Io(stderr.into_owned()));
        }
        Ok(())
    }

    async fn status(&self, path: &Path) -> RepoResult<Vec<String>> {
        let output = self.run_git(path, &["status", "--porcelain"]).await?;
        if !output.status.success() {
            return Err(RepoError::Io(String::from_utf8_lossy(&output.stderr).into_owned()));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .collect())
    }

    async fn dry_merge(&self, source_branch: &str) -> RepoResult<MergeProbe> {
        let _guard = self.token.lock().await;
        let output = self
            .run_git(self.root(), &["merge", "--no-commit", "--no-ff", source_branch])
            .await?;

        let probe = if output.status.success() {
            MergeProbe::Clean
        } else {
            let conflicts = self.run_git(self.root(), &["diff", "--name-only", "--diff-filter=U"]).await?;
            let files = String::from_utf8_lossy(&conflicts.stdout)
                .lines()
                .map(PathBuf::from)
                .collect();
            MergeProbe::Conflict(files)
        };

        // Unconditional abort regardless of outcome.
        let _ = self.run_git(self.root(), &["merge", "--abort"]).await;
        Ok(probe)
    }

    async fn merge(&self, source_branch: &str, strategy: MergeStrategy, message: &str) -> RepoResult<String> {
        let _guard = self.token.lock().await;

        let output = match strategy {
            MergeStrategy::Regular => {
                self.run_git(self.root(), &["merge", "--no-ff", "-m", message, source_branch])
                    .await?
            }
            MergeStrategy::Squash => {
                let squash = self
                    .run_git(self.root(), &["merge", "--squash", source_branch])
                    .await?;
                if !squash.status.success() {
                    return Err(RepoError::Io(String::from_utf8_lossy(&squash.stderr).into_owned()));
                }
                self.run_git(self.root(), &["commit", "-m", message]).await?
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.to_lowercase().contains("conflict") {
                return Err(RepoError::Conflict(Vec::new()));
            }
            return Err(RepoError::Io(stderr.into_owned()));
        }

        let rev = self.run_git(self.root(), &["rev-parse", "HEAD"]).await?;
        Ok(String::from_utf8_lossy(&rev.stdout).trim().to_string())
    }

    async fn merge_abort(&self) -> RepoResult<()> {
        let _ = self.run_git(self.root(), &["merge", "--abort"]).await;
        Ok(())
    }

    async fn remove_worktree(&self, path: &Path, force: bool) -> RepoResult<()> {
        let _guard = self.token.lock().await;
        let path_str = path.to_string_lossy().into_owned();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&path_str);
        let output = self.run_git(self.root(), &args).await?;
        if !output.status.success() && path.exists() {
            tokio::fs::remove_dir_all(path)
                .await
                .map_err(|e| RepoError::Io(e.to_string()))?;
        }
        Ok(())
    }

    async fn prune(&self) -> RepoResult<()> {
        let _guard = self.token.lock().await;
        let output = self.run_git(self.root(), &["worktree", "prune"]).await?;
        if !output.status.success() {
            return Err(RepoError::Io(String::from_utf8_lossy(&output.stderr).into_owned()));
        }
        Ok(())
    }

    async fn list_worktrees(&self) -> RepoResult<Vec<WorktreeEntry>> {
        let output = self
            .run_git(self.root(), &["worktree", "list", "--porcelain"])
            .await?;
        if !output.status.success() {
            return Err(RepoError::Io(String::from_utf8_lossy(&output.stderr).into_owned()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut entries = Vec::new();
        let mut current_path: Option<PathBuf> = None;
        for line in stdout.lines() {
            if let Some(path) = line.strip_prefix("worktree ") {
                current_path = Some(PathBuf::from(path));
            } else if let Some(branch_ref) = line.strip_prefix("branch ") {
                if let Some(path) = current_path.take() {
                    let branch = branch_ref
                        .rsplit('/')
                        .next()
                        .unwrap_or(branch_ref)
                        .to_string();
                    entries.push(WorktreeEntry { path, branch });
                }
            }
        }
        Ok(entries)
    }
}

impl GitRepoBackend {
    async fn current_branch_unlocked(&self, path: &Path) -> RepoResult<String> {
        let output = self
            .run_git(path, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        if !output.status.success() {
            return Err(RepoError::Missing(String::from_utf8_lossy(&output.stderr).into_owned()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_probe_equality() {
        assert_eq!(MergeProbe::Clean, MergeProbe::Clean);
        assert_ne!(
            MergeProbe::Clean,
            MergeProbe::Conflict(vec![PathBuf::from("a.txt")])
        );
    }
}
