//! In-memory `RepoBackend` for scheduler and merge-validator tests (§9).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use super::backend::{MergeProbe, RepoBackend, RepoResult, WorktreeEntry};
use crate::config::MergeStrategy;
use crate::error::RepoError;

#[derive(Default)]
struct State {
    worktrees: HashMap<PathBuf, String>,
    branches: HashSet<String>,
    dirty: HashSet<PathBuf>,
    merge_in_progress: bool,
    next_conflict: Option<Vec<PathBuf>>,
    commit_counter: u64,
}

/// A fake backend that models worktrees and branches entirely in memory.
/// `queue_conflict` makes the next `dry_merge`/`merge` call report a
/// conflict, to exercise the §4.D conflict path without real git state.
pub struct FakeRepoBackend {
    main_branch: String,
    state: Mutex<State>,
}

impl FakeRepoBackend {
    pub fn new(main_branch: impl Into<String>) -> Self {
        let main_branch = main_branch.into();
        let mut state = State::default();
        state.branches.insert(main_branch.clone());
        Self {
            main_branch,
            state: Mutex::new(state),
        }
    }

    pub fn mark_dirty(&self, path: &Path) {
        self.state.lock().unwrap().dirty.insert(path.to_path_buf());
    }

    pub fn queue_conflict(&self, files: Vec<PathBuf>) {
        self.state.lock().unwrap().next_conflict = Some(files);
    }
}

#[async_trait]
impl RepoBackend for FakeRepoBackend {
    async fn main_branch(&self) -> RepoResult<String> {
        Ok(self.main_branch.clone())
    }

    async fn create_branch(&self, name: &str, _from: &str) -> RepoResult<()> {
        self.state.lock().unwrap().branches.insert(name.to_string());
        Ok(())
    }

    async fn add_worktree(&self, path: &Path, branch: &str) -> RepoResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.worktrees.get(path) {
            if existing != branch {
                return Err(RepoError::Busy(format!(
                    "{} checked out to {existing}",
                    path.display()
                )));
            }
            return Ok(());
        }
        state.branches.insert(branch.to_string());
        state.worktrees.insert(path.to_path_buf(), branch.to_string());
        Ok(())
    }

    async fn current_branch(&self, path: &Path) -> RepoResult<String> {
        self.state
            .lock()
            .unwrap()
            .worktrees
            .get(path)
            .cloned()
            .ok_or_else(|| RepoError::Missing(format!("no worktree at {}", path.display())))
    }

    async fn has_changes(&self, path: &Path) -> RepoResult<bool> {
        Ok(self.state.lock().unwrap().dirty.contains(path))
    }

    async fn commit_all(&self, path: &Path, _message: &str) -> RepoResult<()> {
        self.state.lock().unwrap().dirty.remove(path);
        Ok(())
    }

    async fn status(&self, path: &Path) -> RepoResult<Vec<String>> {
        if self.state.lock().unwrap().dirty.contains(path) {
            Ok(vec!["M changed-file".to_string()])
        } else {
            Ok(Vec::new())
        }
    }

    async fn dry_merge(&self, _source_branch: &str) -> RepoResult<MergeProbe> {
        let mut state = self.state.lock().unwrap();
        Ok(match state.next_conflict.take() {
            Some(files) => MergeProbe::Conflict(files),
            None => MergeProbe::Clean,
        })
    }

    async fn merge(&self, _source_branch: &str, _strategy: MergeStrategy, _message: &str) -> RepoResult<String> {
        let mut state = self.state.lock().unwrap();
        if let Some(files) = state.next_conflict.take() {
            return Err(RepoError::Conflict(files));
        }
        state.commit_counter += 1;
        Ok(format!("fake-commit-{}", state.commit_counter))
    }

    async fn merge_abort(&self) -> RepoResult<()> {
        self.state.lock().unwrap().merge_in_progress = false;
        Ok(())
    }

    async fn remove_worktree(&self, path: &Path, _force: bool) -> RepoResult<()> {
        self.state.lock().unwrap().worktrees.remove(path);
        Ok(())
    }

    async fn prune(&self) -> RepoResult<()> {
        Ok(())
    }

    async fn list_worktrees(&self) -> RepoResult<Vec<WorktreeEntry>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .worktrees
            .iter()
            .map(|(path, branch)| WorktreeEntry {
                path: path.clone(),
                branch: branch.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_worktree_is_idempotent_for_same_branch() {
        let backend = FakeRepoBackend::new("main");
        let path = PathBuf::from("/tmp/w/epic-1");
        backend.add_worktree(&path, "epic/e1-foo").await.unwrap();
        backend.add_worktree(&path, "epic/e1-foo").await.unwrap();
        assert_eq!(backend.list_worktrees().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn add_worktree_rejects_branch_mismatch_as_busy() {
        let backend = FakeRepoBackend::new("main");
        let path = PathBuf::from("/tmp/w/epic-1");
        backend.add_worktree(&path, "epic/e1-foo").await.unwrap();
        let err = backend.add_worktree(&path, "epic/e1-bar").await.unwrap_err();
        assert!(matches!(err, RepoError::Busy(_)));
    }

    #[tokio::test]
    async fn queued_conflict_surfaces_from_dry_merge() {
        let backend = FakeRepoBackend::new("main");
        backend.queue_conflict(vec![PathBuf::from("a.txt")]);
        let probe = backend.dry_merge("epic/e1-foo").await.unwrap();
        assert_eq!(probe, MergeProbe::Conflict(vec![PathBuf::from("a.txt")]));
    }
}
