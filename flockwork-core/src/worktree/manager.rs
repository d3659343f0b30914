//! `WorktreeManager`: creates, merges, cleans up, and recovers epic
//! worktrees (§4.C).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use crate::config::MergeStrategy;
use crate::error::RepoError;
use crate::git::RepoBackend;
use crate::model::{Epic, ProjectId, Worktree, WorktreeId, WorktreeStatus};
use crate::store::WorktreeStore;
use crate::worktree::naming::branch_name;
use crate::worktree::record::WorktreeRecord;
use crate::{Error, Result};

/// Outcome of a `recover_state` pass: how many on-disk worktrees were
/// reattached to store rows, and how many orphaned directories were
/// removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub recovered: usize,
    pub cleaned: usize,
}

pub struct WorktreeManager {
    backend: Arc<dyn RepoBackend>,
    store: Arc<dyn WorktreeStore>,
    worktree_dir: PathBuf,
}

impl WorktreeManager {
    pub fn new(backend: Arc<dyn RepoBackend>, store: Arc<dyn WorktreeStore>, worktree_dir: PathBuf) -> Self {
        Self {
            backend,
            store,
            worktree_dir,
        }
    }

    fn path_for(&self, epic: &Epic) -> PathBuf {
        self.worktree_dir.join(format!("epic-{}", epic.id))
    }

    /// Idempotent: if a correctly-branched worktree already exists at the
    /// expected path, it is reused. Otherwise any stale directory there is
    /// forcibly removed and a fresh worktree created. The store row is only
    /// written once the filesystem primitive has succeeded (§4.C).
    pub async fn create_worktree(&self, project: &ProjectId, epic: &Epic) -> Result<Worktree> {
        if let Some(existing) = self.store.by_epic(project, &epic.id).await? {
            if existing.path.exists() {
                return Ok(existing);
            }
        }

        let branch = branch_name(&epic.id.0, &epic.name);
        let path = self.path_for(epic);

        if path.exists() {
            self.backend.remove_worktree(&path, true).await.map_err(Error::Repo)?;
        }

        let main_branch = self.backend.main_branch().await.map_err(Error::Repo)?;
        self.backend.create_branch(&branch, &main_branch).await.map_err(Error::Repo)?;
        self.backend.add_worktree(&path, &branch).await.map_err(Error::Repo)?;

        std::fs::create_dir_all(&path)?;
        let record = WorktreeRecord::new(project.clone(), epic.id.clone(), branch.clone());
        record.save(&path)?;

        let worktree = Worktree {
            id: WorktreeId::from(format!("wt-{}", epic.id)),
            project_id: project.clone(),
            epic_id: epic.id.clone(),
            branch,
            path,
            status: WorktreeStatus::Active,
            created_at: Utc::now(),
            merged_at: None,
            merge_commit: None,
        };
        self.store.create(worktree.clone()).await?;
        Ok(worktree)
    }

    /// Transitions `Active` -> `Merging` and delegates to the
    /// caller-supplied merge. On success the worktree stays at `Merging` —
    /// the store row only becomes `Merged` once the caller (the merge
    /// pipeline's optional test-suite step, §4.D step 5) confirms the merge
    /// should stick and calls `finalize_merge`. On conflict the worktree
    /// settles at `Conflict`.
    pub async fn merge_worktree(
        &self,
        worktree: &Worktree,
        strategy: MergeStrategy,
        message: &str,
    ) -> Result<String> {
        if !worktree.status.can_transition_to(WorktreeStatus::Merging) {
            return Err(Error::InvariantViolation(format!(
                "worktree {} cannot merge from status {:?}",
                worktree.id, worktree.status
            )));
        }
        self.store.set_status(&worktree.id, WorktreeStatus::Merging).await?;

        match self.backend.merge(&worktree.branch, strategy, message).await {
            Ok(commit) => Ok(commit),
            Err(RepoError::Conflict(files)) => {
                self.store.set_status(&worktree.id, WorktreeStatus::Conflict).await?;
                Err(Error::Repo(RepoError::Conflict(files)))
            }
            Err(other) => Err(Error::Repo(other)),
        }
    }

    /// Settles a `Merging` worktree on `Merged` once the post-merge test
    /// suite (if any) has passed (§4.D step 5).
    pub async fn finalize_merge(&self, id: &WorktreeId, commit: &str) -> Result<()> {
        self.store.mark_merged(id, commit).await
    }

    /// Reverts a `Merging` worktree back to `Active` after the backend merge
    /// succeeded but the post-merge test suite failed and the merge itself
    /// was rolled back (§4.D step 5's `TestFailed` outcome).
    pub async fn revert_merge(&self, id: &WorktreeId) -> Result<()> {
        self.store.set_status(id, WorktreeStatus::Active).await
    }

    /// Allowed only when the worktree is `merged` or `stale` (§4.C).
    pub async fn cleanup_worktree(&self, worktree: &Worktree) -> Result<()> {
        if !matches!(worktree.status, WorktreeStatus::Merged | WorktreeStatus::Stale) {
            return Err(Error::InvariantViolation(format!(
                "worktree {} cannot be cleaned up from status {:?}",
                worktree.id, worktree.status
            )));
        }
        self.backend
            .remove_worktree(&worktree.path, false)
            .await
            .map_err(Error::Repo)?;
        self.store.delete(&worktree.id).await?;
        Ok(())
    }

    /// Reconciles the store, the backend's live worktree list, and the
    /// on-disk directories under `worktree_dir`, preferring the filesystem
    /// as ground truth: a store row whose directory is gone is dropped, and
    /// a directory with a valid sidecar record but no store row is
    /// reattached.
    pub async fn recover_state(&self, project: &ProjectId) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for worktree in self.store.list(project).await? {
            if !worktree.path.exists() {
                self.store.delete(&worktree.id).await?;
                report.cleaned += 1;
            }
        }

        if !self.worktree_dir.exists() {
            return Ok(report);
        }
        let mut entries = tokio::fs::read_dir(&self.worktree_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if self.has_store_row(project, &path).await? {
                continue;
            }
            match WorktreeRecord::load(&path)? {
                Some(record) if record.project_id == *project => {
                    let worktree = Worktree {
                        id: WorktreeId::from(format!("wt-{}", record.epic_id)),
                        project_id: record.project_id,
                        epic_id: record.epic_id,
                        branch: record.branch,
                        path: path.clone(),
                        status: record.status,
                        created_at: record.created_at,
                        merged_at: None,
                        merge_commit: None,
                    };
                    self.store.create(worktree).await?;
                    report.recovered += 1;
                }
                _ => {
                    self.backend.remove_worktree(&path, true).await.map_err(Error::Repo)?;
                    report.cleaned += 1;
                }
            }
        }

        Ok(report)
    }

    async fn has_store_row(&self, project: &ProjectId, path: &Path) -> Result<bool> {
        Ok(self
            .store
            .list(project)
            .await?
            .iter()
            .any(|w| w.path == path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::FakeRepoBackend;
    use crate::model::EpicId;
    use crate::store::fakes::InMemoryWorktreeStore;
    use std::collections::BTreeSet;

    fn sample_epic() -> Epic {
        Epic {
            id: EpicId::from("e1"),
            name: "Add user auth".to_string(),
            priority: 0,
            depends_on: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn create_worktree_is_idempotent_when_directory_still_exists() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeRepoBackend::new("main"));
        let store = Arc::new(InMemoryWorktreeStore::default());
        let manager = WorktreeManager::new(backend, store, dir.path().to_path_buf());
        let project = ProjectId::from("p1");
        let epic = sample_epic();

        let first = manager.create_worktree(&project, &epic).await.unwrap();
        std::fs::create_dir_all(&first.path).unwrap();
        let second = manager.create_worktree(&project, &epic).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.branch, second.branch);
    }

    #[tokio::test]
    async fn cleanup_rejects_active_worktree() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeRepoBackend::new("main"));
        let store = Arc::new(InMemoryWorktreeStore::default());
        let manager = WorktreeManager::new(backend, store, dir.path().to_path_buf());
        let project = ProjectId::from("p1");
        let epic = sample_epic();

        let worktree = manager.create_worktree(&project, &epic).await.unwrap();
        let err = manager.cleanup_worktree(&worktree).await.unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn recover_state_drops_store_rows_whose_directory_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeRepoBackend::new("main"));
        let store = Arc::new(InMemoryWorktreeStore::default());
        let manager = WorktreeManager::new(backend, store.clone(), dir.path().to_path_buf());
        let project = ProjectId::from("p1");
        let epic = sample_epic();

        let worktree = manager.create_worktree(&project, &epic).await.unwrap();
        std::fs::remove_dir_all(&worktree.path).ok();

        let report = manager.recover_state(&project).await.unwrap();
        assert_eq!(report.cleaned, 1);
        assert!(store.list(&project).await.unwrap().is_empty());
    }
}
