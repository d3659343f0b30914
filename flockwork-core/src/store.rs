//! Transactional store capability-set (§6): the external persistence
//! collaborator the engine requires but does not implement itself.
//! `flockwork-store` ships the concrete SQLite-backed implementation; the
//! in-memory fakes here let the resolver, scheduler, and merge validator be
//! tested without it (§9).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{
    Batch, BatchId, BatchStatus, CostRecord, Domain, Epic, EpicId, ExpertiseContent, ExpertiseFile,
    ProjectId, SessionId, Task, TaskId, Worktree, WorktreeId, WorktreeStatus,
};
use crate::Result;

/// A task plus whether every test it is responsible for currently passes,
/// the fact `update_done_safe` checks before flipping `done` (invariant 4,
/// §3).
#[derive(Debug, Clone)]
pub struct TaskWithTests {
    pub task: Task,
    pub tests_passing: bool,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn list_pending(&self, project: &ProjectId) -> Result<Vec<Task>>;
    async fn get_with_tests(&self, id: &TaskId) -> Result<Option<TaskWithTests>>;
    /// Locks the row, verifies tests pass, then flips `done`. Returns
    /// `false` (not an error) if tests are failing — the caller decides
    /// whether that is itself an `invariant_violation`.
    async fn update_done_safe(&self, id: &TaskId, done: bool) -> Result<bool>;
}

#[async_trait]
pub trait EpicStore: Send + Sync {
    async fn list(&self, project: &ProjectId) -> Result<Vec<Epic>>;
    async fn get(&self, id: &EpicId) -> Result<Option<Epic>>;
}

#[async_trait]
pub trait BatchStore: Send + Sync {
    async fn create(&self, project: &ProjectId, number: u32, task_ids: &[TaskId]) -> Result<BatchId>;
    async fn set_status(
        &self,
        id: &BatchId,
        status: BatchStatus,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn list(&self, project: &ProjectId) -> Result<Vec<Batch>>;
}

#[async_trait]
pub trait WorktreeStore: Send + Sync {
    async fn create(&self, worktree: Worktree) -> Result<()>;
    async fn by_epic(&self, project: &ProjectId, epic: &EpicId) -> Result<Option<Worktree>>;
    async fn list(&self, project: &ProjectId) -> Result<Vec<Worktree>>;
    async fn set_status(&self, id: &WorktreeId, status: WorktreeStatus) -> Result<()>;
    async fn mark_merged(&self, id: &WorktreeId, commit: &str) -> Result<()>;
    async fn delete(&self, id: &WorktreeId) -> Result<()>;
}

/// Aggregation bucket keys for `CostStore` rollups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CostAggregationKey {
    Model(String),
    TaskType(String),
}

#[async_trait]
pub trait CostStore: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        project: &ProjectId,
        session: &SessionId,
        task: &TaskId,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        operation_type: &str,
        cost: f64,
    ) -> Result<()>;
    async fn total_spent(&self, project: &ProjectId) -> Result<f64>;
    async fn aggregate_by(
        &self,
        project: &ProjectId,
        key: CostAggregationKey,
    ) -> Result<HashMap<String, f64>>;
}

/// One recorded change to an expertise file, for audit/inspection.
#[derive(Debug, Clone)]
pub struct ExpertiseUpdate {
    pub expertise_id: String,
    pub session: SessionId,
    pub kind: String,
    pub summary: String,
    pub diff: String,
}

#[async_trait]
pub trait ExpertiseStore: Send + Sync {
    async fn get(&self, project: &ProjectId, domain: Domain) -> Result<Option<ExpertiseFile>>;
    /// Upserts content, incrementing `version`. Returns the new version.
    async fn upsert(&self, project: &ProjectId, domain: Domain, content: ExpertiseContent) -> Result<u64>;
    async fn record_update(&self, update: ExpertiseUpdate) -> Result<()>;
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn save(&self, project: &ProjectId, plan_json: &str) -> Result<()>;
    async fn get(&self, project: &ProjectId) -> Result<Option<String>>;
}

/// In-memory implementations of the store traits, for tests (§9).
pub mod fakes {
    use super::*;

    #[derive(Default)]
    pub struct InMemoryTaskStore {
        tasks: Mutex<HashMap<TaskId, TaskWithTests>>,
    }

    impl InMemoryTaskStore {
        pub fn new(tasks: Vec<TaskWithTests>) -> Self {
            Self {
                tasks: Mutex::new(tasks.into_iter().map(|t| (t.task.id.clone(), t)).collect()),
            }
        }
    }

    #[async_trait]
    impl TaskStore for InMemoryTaskStore {
        async fn list_pending(&self, project: &ProjectId) -> Result<Vec<Task>> {
            let _ = project;
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| !t.task.done)
                .map(|t| t.task.clone())
                .collect())
        }

        async fn get_with_tests(&self, id: &TaskId) -> Result<Option<TaskWithTests>> {
            Ok(self.tasks.lock().unwrap().get(id).cloned())
        }

        async fn update_done_safe(&self, id: &TaskId, done: bool) -> Result<bool> {
            let mut tasks = self.tasks.lock().unwrap();
            let Some(entry) = tasks.get_mut(id) else {
                return Ok(false);
            };
            if done && !entry.tests_passing {
                return Ok(false);
            }
            entry.task.done = done;
            Ok(true)
        }
    }

    #[derive(Default)]
    pub struct InMemoryEpicStore {
        epics: Mutex<HashMap<EpicId, Epic>>,
    }

    impl InMemoryEpicStore {
        pub fn new(epics: Vec<Epic>) -> Self {
            Self {
                epics: Mutex::new(epics.into_iter().map(|e| (e.id.clone(), e)).collect()),
            }
        }
    }

    #[async_trait]
    impl EpicStore for InMemoryEpicStore {
        async fn list(&self, _project: &ProjectId) -> Result<Vec<Epic>> {
            Ok(self.epics.lock().unwrap().values().cloned().collect())
        }

        async fn get(&self, id: &EpicId) -> Result<Option<Epic>> {
            Ok(self.epics.lock().unwrap().get(id).cloned())
        }
    }

    #[derive(Default)]
    pub struct InMemoryBatchStore {
        batches: Mutex<Vec<Batch>>,
    }

    #[async_trait]
    impl BatchStore for InMemoryBatchStore {
        async fn create(&self, project: &ProjectId, number: u32, task_ids: &[TaskId]) -> Result<BatchId> {
            let id = BatchId::from(format!("batch-{number}"));
            self.batches.lock().unwrap().push(Batch {
                id: id.clone(),
                project_id: project.clone(),
                batch_number: number,
                task_ids: task_ids.iter().cloned().collect(),
                status: BatchStatus::Pending,
                started_at: None,
                completed_at: None,
            });
            Ok(id)
        }

        async fn set_status(
            &self,
            id: &BatchId,
            status: BatchStatus,
            started_at: Option<DateTime<Utc>>,
            completed_at: Option<DateTime<Utc>>,
        ) -> Result<()> {
            if let Some(batch) = self.batches.lock().unwrap().iter_mut().find(|b| &b.id == id) {
                batch.status = status;
                if started_at.is_some() {
                    batch.started_at = started_at;
                }
                if completed_at.is_some() {
                    batch.completed_at = completed_at;
                }
            }
            Ok(())
        }

        async fn list(&self, project: &ProjectId) -> Result<Vec<Batch>> {
            Ok(self
                .batches
                .lock()
                .unwrap()
                .iter()
                .filter(|b| &b.project_id == project)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    pub struct InMemoryWorktreeStore {
        worktrees: Mutex<HashMap<WorktreeId, Worktree>>,
    }

    #[async_trait]
    impl WorktreeStore for InMemoryWorktreeStore {
        async fn create(&self, worktree: Worktree) -> Result<()> {
            self.worktrees.lock().unwrap().insert(worktree.id.clone(), worktree);
            Ok(())
        }

        async fn by_epic(&self, project: &ProjectId, epic: &EpicId) -> Result<Option<Worktree>> {
            Ok(self
                .worktrees
                .lock()
                .unwrap()
                .values()
                .find(|w| &w.project_id == project && &w.epic_id == epic)
                .cloned())
        }

        async fn list(&self, project: &ProjectId) -> Result<Vec<Worktree>> {
            Ok(self
                .worktrees
                .lock()
                .unwrap()
                .values()
                .filter(|w| &w.project_id == project)
                .cloned()
                .collect())
        }

        async fn set_status(&self, id: &WorktreeId, status: WorktreeStatus) -> Result<()> {
            if let Some(w) = self.worktrees.lock().unwrap().get_mut(id) {
                w.status = status;
            }
            Ok(())
        }

        async fn mark_merged(&self, id: &WorktreeId, commit: &str) -> Result<()> {
            if let Some(w) = self.worktrees.lock().unwrap().get_mut(id) {
                w.status = WorktreeStatus::Merged;
                w.merge_commit = Some(commit.to_string());
                w.merged_at = Some(Utc::now());
            }
            Ok(())
        }

        async fn delete(&self, id: &WorktreeId) -> Result<()> {
            self.worktrees.lock().unwrap().remove(id);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct InMemoryCostStore {
        records: Mutex<Vec<CostRecord>>,
    }

    #[async_trait]
    impl CostStore for InMemoryCostStore {
        async fn record(
            &self,
            project: &ProjectId,
            session: &SessionId,
            task: &TaskId,
            model: &str,
            input_tokens: u64,
            output_tokens: u64,
            operation_type: &str,
            cost: f64,
        ) -> Result<()> {
            self.records.lock().unwrap().push(CostRecord {
                project_id: project.clone(),
                session_id: session.clone(),
                task_id: task.clone(),
                model: model.to_string(),
                input_tokens,
                output_tokens,
                cost,
                operation_type: operation_type.to_string(),
                at: Utc::now(),
            });
            Ok(())
        }

        async fn total_spent(&self, project: &ProjectId) -> Result<f64> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| &r.project_id == project)
                .map(|r| r.cost)
                .sum())
        }

        async fn aggregate_by(
            &self,
            project: &ProjectId,
            key: CostAggregationKey,
        ) -> Result<HashMap<String, f64>> {
            let mut totals: HashMap<String, f64> = HashMap::new();
            for record in self.records.lock().unwrap().iter() {
                if &record.project_id != project {
                    continue;
                }
                let bucket = match &key {
                    CostAggregationKey::Model(_) => record.model.clone(),
                    CostAggregationKey::TaskType(_) => record.operation_type.clone(),
                };
                *totals.entry(bucket).or_default() += record.cost;
            }
            Ok(totals)
        }
    }

    #[derive(Default)]
    pub struct InMemoryExpertiseStore {
        files: Mutex<HashMap<(ProjectId, String), ExpertiseFile>>,
        updates: Mutex<Vec<ExpertiseUpdate>>,
    }

    #[async_trait]
    impl ExpertiseStore for InMemoryExpertiseStore {
        async fn get(&self, project: &ProjectId, domain: Domain) -> Result<Option<ExpertiseFile>> {
            Ok(self
                .files
                .lock()
                .unwrap()
                .get(&(project.clone(), domain.to_string()))
                .cloned())
        }

        async fn upsert(&self, project: &ProjectId, domain: Domain, content: ExpertiseContent) -> Result<u64> {
            let mut files = self.files.lock().unwrap();
            let key = (project.clone(), domain.to_string());
            let version = files.get(&key).map(|f| f.version + 1).unwrap_or(1);
            let line_count = content.core_files.len()
                + content.patterns.len()
                + content.techniques.len()
                + content.effective_patterns.len()
                + content.learned_from_failures.len()
                + content.successful_techniques.len();
            files.insert(
                key,
                ExpertiseFile {
                    project_id: project.clone(),
                    domain,
                    content,
                    version,
                    line_count,
                    last_validated: None,
                },
            );
            Ok(version)
        }

        async fn record_update(&self, update: ExpertiseUpdate) -> Result<()> {
            self.updates.lock().unwrap().push(update);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct InMemoryPlanStore {
        plans: Mutex<HashMap<ProjectId, String>>,
    }

    #[async_trait]
    impl PlanStore for InMemoryPlanStore {
        async fn save(&self, project: &ProjectId, plan_json: &str) -> Result<()> {
            self.plans
                .lock()
                .unwrap()
                .insert(project.clone(), plan_json.to_string());
            Ok(())
        }

        async fn get(&self, project: &ProjectId) -> Result<Option<String>> {
            Ok(self.plans.lock().unwrap().get(project).cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;
    use crate::model::DependencyType;
    use std::collections::BTreeSet;

    fn sample_task(id: &str, done: bool) -> Task {
        Task {
            id: TaskId::from(id),
            epic_id: EpicId::from("e1"),
            priority: 0,
            description: String::new(),
            action: String::new(),
            depends_on: BTreeSet::new(),
            dependency_type: DependencyType::Hard,
            done,
            predicted_files: None,
        }
    }

    #[tokio::test]
    async fn update_done_safe_rejects_transition_with_failing_tests() {
        let store = InMemoryTaskStore::new(vec![TaskWithTests {
            task: sample_task("t1", false),
            tests_passing: false,
        }]);
        let applied = store.update_done_safe(&TaskId::from("t1"), true).await.unwrap();
        assert!(!applied);
    }

    #[tokio::test]
    async fn update_done_safe_applies_when_tests_pass() {
        let store = InMemoryTaskStore::new(vec![TaskWithTests {
            task: sample_task("t1", false),
            tests_passing: true,
        }]);
        let applied = store.update_done_safe(&TaskId::from("t1"), true).await.unwrap();
        assert!(applied);
        let reloaded = store.get_with_tests(&TaskId::from("t1")).await.unwrap().unwrap();
        assert!(reloaded.task.done);
    }

    #[tokio::test]
    async fn expertise_upsert_increments_version() {
        let store = InMemoryExpertiseStore::default();
        let project = ProjectId::from("p1");
        let v1 = store
            .upsert(&project, Domain::General, ExpertiseContent::default())
            .await
            .unwrap();
        let v2 = store
            .upsert(&project, Domain::General, ExpertiseContent::default())
            .await
            .unwrap();
        assert_eq!(v1, 1);
        assert_eq!(v2, 2);
    }
}
