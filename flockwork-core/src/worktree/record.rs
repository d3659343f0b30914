//! Sidecar metadata written alongside each worktree, used by
//! `recover_state` to tell "this directory is one of ours" apart from an
//! arbitrary directory under `worktree_dir` (§4.C).

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{EpicId, ProjectId, WorktreeStatus};
use crate::Result;

const METADATA_FILE: &str = ".flockwork-worktree.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeRecord {
    pub project_id: ProjectId,
    pub epic_id: EpicId,
    pub branch: String,
    pub created_at: DateTime<Utc>,
    pub status: WorktreeStatus,
}

impl WorktreeRecord {
    pub fn new(project_id: ProjectId, epic_id: EpicId, branch: impl Into<String>) -> Self {
        Self {
            project_id,
            epic_id,
            branch: branch.into(),
            created_at: Utc::now(),
            status: WorktreeStatus::Active,
        }
    }

    pub fn save(&self, worktree_path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Other(format!("failed to serialize worktree record: {e}")))?;
        std::fs::write(worktree_path.join(METADATA_FILE), contents)?;
        Ok(())
    }

    pub fn load(worktree_path: &Path) -> Result<Option<Self>> {
        let path = worktree_path.join(METADATA_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        let record: Self = toml::from_str(&contents)?;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let record = WorktreeRecord::new(ProjectId::from("p1"), EpicId::from("e1"), "epic/e1-foo");
        record.save(dir.path()).unwrap();

        let loaded = WorktreeRecord::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.epic_id, EpicId::from("e1"));
        assert_eq!(loaded.branch, "epic/e1-foo");
    }

    #[test]
    fn missing_metadata_file_is_none_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(WorktreeRecord::load(dir.path()).unwrap().is_none());
    }
}
