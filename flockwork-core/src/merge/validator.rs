//! `MergeValidator`: the post-batch merge pipeline (§4.D).

use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;

use crate::config::MergeStrategy;
use crate::error::RepoError;
use crate::git::RepoBackend;
use crate::model::{EpicId, Worktree};
use crate::worktree::WorktreeManager;
use crate::{Error, Result};

/// Outcome of one merge attempt. Conflicts and test failures are ordinary
/// return values, never `Error` variants (§9 design note): a merge that
/// cannot proceed cleanly is an expected, common outcome.
#[derive(Debug)]
pub enum MergeOutcome {
    Merged { commit: String },
    Conflict { files: Vec<std::path::PathBuf> },
    TestFailed { output: String },
}

pub struct MergeValidator {
    backend: Arc<dyn RepoBackend>,
    manager: Arc<WorktreeManager>,
    test_command: Option<String>,
}

impl MergeValidator {
    pub fn new(backend: Arc<dyn RepoBackend>, manager: Arc<WorktreeManager>, test_command: Option<String>) -> Self {
        Self {
            backend,
            manager,
            test_command,
        }
    }

    /// Runs the six-step procedure against `worktree`, whose epic's tasks
    /// in the current batch are all done.
    pub async fn merge_epic(&self, epic_id: &EpicId, worktree: &Worktree, strategy: MergeStrategy) -> Result<MergeOutcome> {
        if self.backend.has_changes(&worktree.path).await.map_err(Error::Repo)? {
            let message = format!("final changes for epic {epic_id}");
            self.backend
                .commit_all(&worktree.path, &message)
                .await
                .map_err(Error::Repo)?;
        }

        let probe = self.backend.dry_merge(&worktree.branch).await.map_err(Error::Repo)?;
        if let crate::git::MergeProbe::Conflict(files) = probe {
            return Ok(MergeOutcome::Conflict { files });
        }

        let message = format!("Merge epic {epic_id}: {}", worktree.branch);
        let commit = match self.manager.merge_worktree(worktree, strategy, &message).await {
            Ok(commit) => commit,
            Err(Error::Repo(RepoError::Conflict(files))) => return Ok(MergeOutcome::Conflict { files }),
            Err(other) => return Err(other),
        };

        // `worktree` is now `Merging` in the store, not `Active` as the
        // caller's stale copy still shows — track that locally so the
        // cleanup call below sees the status it actually requires.
        let mut merging = worktree.clone();
        merging.status = crate::model::WorktreeStatus::Merging;

        if let Some(command) = &self.test_command {
            if let Some(output) = self.run_test_suite(command).await? {
                self.abort_merge(strategy).await?;
                self.manager.revert_merge(&merging.id).await?;
                return Ok(MergeOutcome::TestFailed { output });
            }
        }

        self.manager.finalize_merge(&merging.id, &commit).await?;
        merging.status = crate::model::WorktreeStatus::Merged;
        self.manager.cleanup_worktree(&merging).await?;
        Ok(MergeOutcome::Merged { commit })
    }

    /// Runs the configured test suite in the main directory. `Ok(None)`
    /// means it passed; `Ok(Some(output))` carries the captured output of a
    /// failing run.
    async fn run_test_suite(&self, command: &str) -> Result<Option<String>> {
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            return Ok(None);
        };
        let output = Command::new(program)
            .args(parts)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        if output.status.success() {
            Ok(None)
        } else {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            Ok(Some(combined))
        }
    }

    /// For `regular`, an explicit `merge --abort` path; for `squash`, revert
    /// the squash commit instead (it is already fully committed, so there is
    /// nothing in progress to abort).
    async fn abort_merge(&self, strategy: MergeStrategy) -> Result<()> {
        match strategy {
            MergeStrategy::Regular => self.backend.merge_abort().await.map_err(Error::Repo),
            MergeStrategy::Squash => {
                let output = Command::new("git")
                    .args(["revert", "--no-edit", "HEAD"])
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .output()
                    .await?;
                if !output.status.success() {
                    return Err(Error::Repo(RepoError::Io(
                        String::from_utf8_lossy(&output.stderr).into_owned(),
                    )));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::FakeRepoBackend;
    use crate::model::{ProjectId, WorktreeId, WorktreeStatus};
    use crate::store::fakes::InMemoryWorktreeStore;
    use chrono::Utc;

    fn sample_worktree(path: std::path::PathBuf) -> Worktree {
        Worktree {
            id: WorktreeId::from("wt-e1"),
            project_id: ProjectId::from("p1"),
            epic_id: EpicId::from("e1"),
            branch: "epic/e1-foo".to_string(),
            path,
            status: WorktreeStatus::Active,
            created_at: Utc::now(),
            merged_at: None,
            merge_commit: None,
        }
    }

    #[tokio::test]
    async fn clean_merge_commits_uncommitted_changes_first() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeRepoBackend::new("main"));
        backend.mark_dirty(dir.path());
        let store = Arc::new(InMemoryWorktreeStore::default());
        let manager = Arc::new(WorktreeManager::new(
            backend.clone(),
            store,
            dir.path().to_path_buf(),
        ));
        let validator = MergeValidator::new(backend.clone(), manager, None);

        let worktree = sample_worktree(dir.path().to_path_buf());
        let outcome = validator
            .merge_epic(&EpicId::from("e1"), &worktree, MergeStrategy::Regular)
            .await
            .unwrap();

        assert!(matches!(outcome, MergeOutcome::Merged { .. }));
        assert!(!backend.has_changes(dir.path()).await.unwrap());
    }

    #[tokio::test]
    async fn queued_conflict_is_reported_without_touching_main() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeRepoBackend::new("main"));
        backend.queue_conflict(vec![std::path::PathBuf::from("a.txt")]);
        let store = Arc::new(InMemoryWorktreeStore::default());
        let manager = Arc::new(WorktreeManager::new(
            backend.clone(),
            store,
            dir.path().to_path_buf(),
        ));
        let validator = MergeValidator::new(backend, manager, None);

        let worktree = sample_worktree(dir.path().to_path_buf());
        let outcome = validator
            .merge_epic(&EpicId::from("e1"), &worktree, MergeStrategy::Regular)
            .await
            .unwrap();

        assert!(matches!(outcome, MergeOutcome::Conflict { .. }));
    }

    #[tokio::test]
    async fn failing_test_suite_reverts_worktree_to_active() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeRepoBackend::new("main"));
        let store = Arc::new(InMemoryWorktreeStore::default());
        let worktree = sample_worktree(dir.path().to_path_buf());
        store.create(worktree.clone()).await.unwrap();

        let manager = Arc::new(WorktreeManager::new(
            backend.clone(),
            store.clone(),
            dir.path().to_path_buf(),
        ));
        let validator = MergeValidator::new(backend, manager, Some("false".to_string()));

        let outcome = validator
            .merge_epic(&EpicId::from("e1"), &worktree, MergeStrategy::Regular)
            .await
            .unwrap();

        assert!(matches!(outcome, MergeOutcome::TestFailed { .. }));
        let reloaded = store.by_epic(&worktree.project_id, &worktree.epic_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, WorktreeStatus::Active);
    }

    #[tokio::test]
    async fn passing_test_suite_finalizes_merge_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeRepoBackend::new("main"));
        let store = Arc::new(InMemoryWorktreeStore::default());
        let worktree = sample_worktree(dir.path().to_path_buf());
        store.create(worktree.clone()).await.unwrap();

        let manager = Arc::new(WorktreeManager::new(
            backend.clone(),
            store.clone(),
            dir.path().to_path_buf(),
        ));
        let validator = MergeValidator::new(backend, manager, Some("true".to_string()));

        let outcome = validator
            .merge_epic(&EpicId::from("e1"), &worktree, MergeStrategy::Regular)
            .await
            .unwrap();

        assert!(matches!(outcome, MergeOutcome::Merged { .. }));
        assert!(store.by_epic(&worktree.project_id, &worktree.epic_id).await.unwrap().is_none());
    }
}
