//! `SqliteStore`: implements every trait in `flockwork_core::store` against
//! the schema in `migrations/0001_init.sql`.
//!
//! Trait methods return `flockwork_core::Result<T>`, not this crate's own
//! `Result` — callers in `flockwork-core` never need to know the store is
//! backed by sqlx. Every `sqlx::Error` is folded into `Error::Store` at the
//! boundary.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use flockwork_core::model::{
    Batch, BatchId, BatchStatus, DependencyType, Domain, Epic, EpicId, ExpertiseContent, ExpertiseFile,
    ProjectId, SessionId, Task, TaskId, Worktree, WorktreeId, WorktreeStatus,
};
use flockwork_core::store::{
    BatchStore, CostAggregationKey, CostStore, EpicStore, ExpertiseStore, ExpertiseUpdate, PlanStore, TaskStore,
    TaskWithTests, WorktreeStore,
};
use flockwork_core::{Error as CoreError, Result as CoreResult};

fn store_err(e: sqlx::Error) -> CoreError {
    CoreError::Store(e.to_string())
}

fn json_err(e: serde_json::Error) -> CoreError {
    CoreError::Store(format!("serialization error: {e}"))
}

fn ids_from_json(s: &str) -> CoreResult<BTreeSet<TaskId>> {
    let raw: Vec<String> = serde_json::from_str(s).map_err(json_err)?;
    Ok(raw.into_iter().map(TaskId::from).collect())
}

fn ids_to_json(ids: &BTreeSet<TaskId>) -> String {
    let raw: Vec<&str> = ids.iter().map(|id| id.0.as_str()).collect();
    serde_json::to_string(&raw).unwrap_or_else(|_| "[]".to_string())
}

fn epic_ids_from_json(s: &str) -> CoreResult<BTreeSet<EpicId>> {
    let raw: Vec<String> = serde_json::from_str(s).map_err(json_err)?;
    Ok(raw.into_iter().map(EpicId::from).collect())
}

fn epic_ids_to_json(ids: &BTreeSet<EpicId>) -> String {
    let raw: Vec<&str> = ids.iter().map(|id| id.0.as_str()).collect();
    serde_json::to_string(&raw).unwrap_or_else(|_| "[]".to_string())
}

fn dependency_type_from_str(s: &str) -> DependencyType {
    match s {
        "soft" => DependencyType::Soft,
        _ => DependencyType::Hard,
    }
}

fn dependency_type_to_str(t: DependencyType) -> &'static str {
    match t {
        DependencyType::Hard => "hard",
        DependencyType::Soft => "soft",
    }
}

fn worktree_status_from_str(s: &str) -> WorktreeStatus {
    match s {
        "merging" => WorktreeStatus::Merging,
        "merged" => WorktreeStatus::Merged,
        "conflict" => WorktreeStatus::Conflict,
        "stale" => WorktreeStatus::Stale,
        _ => WorktreeStatus::Active,
    }
}

fn worktree_status_to_str(s: WorktreeStatus) -> &'static str {
    match s {
        WorktreeStatus::Active => "active",
        WorktreeStatus::Merging => "merging",
        WorktreeStatus::Merged => "merged",
        WorktreeStatus::Conflict => "conflict",
        WorktreeStatus::Stale => "stale",
    }
}

fn batch_status_from_str(s: &str) -> BatchStatus {
    match s {
        "running" => BatchStatus::Running,
        "merging" => BatchStatus::Merging,
        "completed" => BatchStatus::Completed,
        "failed" => BatchStatus::Failed,
        "cancelled" => BatchStatus::Cancelled,
        _ => BatchStatus::Pending,
    }
}

fn batch_status_to_str(s: BatchStatus) -> &'static str {
    match s {
        BatchStatus::Pending => "pending",
        BatchStatus::Running => "running",
        BatchStatus::Merging => "merging",
        BatchStatus::Completed => "completed",
        BatchStatus::Failed => "failed",
        BatchStatus::Cancelled => "cancelled",
    }
}

fn domain_from_str(s: &str) -> Domain {
    match s {
        "database" => Domain::Database,
        "api" => Domain::Api,
        "frontend" => Domain::Frontend,
        "testing" => Domain::Testing,
        "security" => Domain::Security,
        "deployment" => Domain::Deployment,
        _ => Domain::General,
    }
}

/// SQLite-backed implementation of every store trait, sharing one pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn list_pending(&self, project: &ProjectId) -> CoreResult<Vec<Task>> {
        let rows = sqlx::query(
            "SELECT id, epic_id, priority, description, action, depends_on, dependency_type, done, predicted_files \
             FROM tasks WHERE project_id = ? AND done = 0 ORDER BY priority DESC",
        )
        .bind(&project.0)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            tasks.push(task_from_row(&row)?);
        }
        Ok(tasks)
    }

    async fn get_with_tests(&self, id: &TaskId) -> CoreResult<Option<TaskWithTests>> {
        let row = sqlx::query(
            "SELECT id, epic_id, priority, description, action, depends_on, dependency_type, done, \
             predicted_files, tests_passing FROM tasks WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let Some(row) = row else { return Ok(None) };
        let task = task_from_row(&row)?;
        let tests_passing: i64 = row.try_get("tests_passing").map_err(store_err)?;
        Ok(Some(TaskWithTests {
            task,
            tests_passing: tests_passing != 0,
        }))
    }

    /// Locks the row inside an immediate transaction, checks `tests_passing`,
    /// and only then flips `done` — the one write path invariant 4 (§3)
    /// requires every caller to go through.
    async fn update_done_safe(&self, id: &TaskId, done: bool) -> CoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let row = sqlx::query("SELECT tests_passing FROM tasks WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_err)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(store_err)?;
            return Ok(false);
        };

        let tests_passing: i64 = row.try_get("tests_passing").map_err(store_err)?;
        if done && tests_passing == 0 {
            tx.rollback().await.map_err(store_err)?;
            return Ok(false);
        }

        sqlx::query("UPDATE tasks SET done = ? WHERE id = ?")
            .bind(done)
            .bind(&id.0)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(true)
    }
}

fn task_from_row(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Task> {
    let depends_on: String = row.try_get("depends_on").map_err(store_err)?;
    let dependency_type: String = row.try_get("dependency_type").map_err(store_err)?;
    let predicted_files: Option<String> = row.try_get("predicted_files").map_err(store_err)?;
    let done: i64 = row.try_get("done").map_err(store_err)?;

    Ok(Task {
        id: TaskId::from(row.try_get::<String, _>("id").map_err(store_err)?),
        epic_id: EpicId::from(row.try_get::<String, _>("epic_id").map_err(store_err)?),
        priority: row.try_get("priority").map_err(store_err)?,
        description: row.try_get("description").map_err(store_err)?,
        action: row.try_get("action").map_err(store_err)?,
        depends_on: ids_from_json(&depends_on)?,
        dependency_type: dependency_type_from_str(&dependency_type),
        done: done != 0,
        predicted_files: predicted_files
            .map(|s| serde_json::from_str(&s).map_err(json_err))
            .transpose()?,
    })
}

#[async_trait]
impl EpicStore for SqliteStore {
    async fn list(&self, project: &ProjectId) -> CoreResult<Vec<Epic>> {
        let rows = sqlx::query("SELECT id, name, priority, depends_on FROM epics WHERE project_id = ?")
            .bind(&project.0)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.iter().map(epic_from_row).collect()
    }

    async fn get(&self, id: &EpicId) -> CoreResult<Option<Epic>> {
        let row = sqlx::query("SELECT id, name, priority, depends_on FROM epics WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        row.as_ref().map(epic_from_row).transpose()
    }
}

fn epic_from_row(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Epic> {
    let depends_on: String = row.try_get("depends_on").map_err(store_err)?;
    Ok(Epic {
        id: EpicId::from(row.try_get::<String, _>("id").map_err(store_err)?),
        name: row.try_get("name").map_err(store_err)?,
        priority: row.try_get("priority").map_err(store_err)?,
        depends_on: epic_ids_from_json(&depends_on)?,
    })
}

#[async_trait]
impl BatchStore for SqliteStore {
    async fn create(&self, project: &ProjectId, number: u32, task_ids: &[TaskId]) -> CoreResult<BatchId> {
        let id = BatchId::from(uuid::Uuid::new_v4().to_string());
        let ids_json = ids_to_json(&task_ids.iter().cloned().collect());
        sqlx::query(
            "INSERT INTO batches (id, project_id, batch_number, task_ids, status) VALUES (?, ?, ?, ?, 'pending')",
        )
        .bind(&id.0)
        .bind(&project.0)
        .bind(number as i64)
        .bind(ids_json)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(id)
    }

    async fn set_status(
        &self,
        id: &BatchId,
        status: BatchStatus,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
    ) -> CoreResult<()> {
        sqlx::query("UPDATE batches SET status = ?, started_at = ?, completed_at = ? WHERE id = ?")
            .bind(batch_status_to_str(status))
            .bind(started_at.map(|t| t.to_rfc3339()))
            .bind(completed_at.map(|t| t.to_rfc3339()))
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn list(&self, project: &ProjectId) -> CoreResult<Vec<Batch>> {
        let rows = sqlx::query(
            "SELECT id, batch_number, task_ids, status, started_at, completed_at FROM batches \
             WHERE project_id = ? ORDER BY batch_number ASC",
        )
        .bind(&project.0)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(|row| {
                let task_ids: String = row.try_get("task_ids").map_err(store_err)?;
                let status: String = row.try_get("status").map_err(store_err)?;
                let started_at: Option<String> = row.try_get("started_at").map_err(store_err)?;
                let completed_at: Option<String> = row.try_get("completed_at").map_err(store_err)?;
                Ok(Batch {
                    id: BatchId::from(row.try_get::<String, _>("id").map_err(store_err)?),
                    project_id: project.clone(),
                    batch_number: row.try_get::<i64, _>("batch_number").map_err(store_err)? as u32,
                    task_ids: ids_from_json(&task_ids)?,
                    status: batch_status_from_str(&status),
                    started_at: started_at.map(|s| parse_rfc3339(&s)).transpose()?,
                    completed_at: completed_at.map(|s| parse_rfc3339(&s)).transpose()?,
                })
            })
            .collect()
    }
}

fn parse_rfc3339(s: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CoreError::Store(format!("invalid timestamp {s:?}: {e}")))
}

#[async_trait]
impl WorktreeStore for SqliteStore {
    async fn create(&self, worktree: Worktree) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO worktrees (id, project_id, epic_id, branch, path, status, created_at, merged_at, merge_commit) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&worktree.id.0)
        .bind(&worktree.project_id.0)
        .bind(&worktree.epic_id.0)
        .bind(&worktree.branch)
        .bind(worktree.path.to_string_lossy().to_string())
        .bind(worktree_status_to_str(worktree.status))
        .bind(worktree.created_at.to_rfc3339())
        .bind(worktree.merged_at.map(|t| t.to_rfc3339()))
        .bind(worktree.merge_commit)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn by_epic(&self, project: &ProjectId, epic: &EpicId) -> CoreResult<Option<Worktree>> {
        let row = sqlx::query(
            "SELECT id, project_id, epic_id, branch, path, status, created_at, merged_at, merge_commit \
             FROM worktrees WHERE project_id = ? AND epic_id = ?",
        )
        .bind(&project.0)
        .bind(&epic.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.as_ref().map(worktree_from_row).transpose()
    }

    async fn list(&self, project: &ProjectId) -> CoreResult<Vec<Worktree>> {
        let rows = sqlx::query(
            "SELECT id, project_id, epic_id, branch, path, status, created_at, merged_at, merge_commit \
             FROM worktrees WHERE project_id = ?",
        )
        .bind(&project.0)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.iter().map(worktree_from_row).collect()
    }

    async fn set_status(&self, id: &WorktreeId, status: WorktreeStatus) -> CoreResult<()> {
        sqlx::query("UPDATE worktrees SET status = ? WHERE id = ?")
            .bind(worktree_status_to_str(status))
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn mark_merged(&self, id: &WorktreeId, commit: &str) -> CoreResult<()> {
        sqlx::query("UPDATE worktrees SET status = 'merged', merged_at = ?, merge_commit = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(commit)
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn delete(&self, id: &WorktreeId) -> CoreResult<()> {
        sqlx::query("DELETE FROM worktrees WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

fn worktree_from_row(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Worktree> {
    let status: String = row.try_get("status").map_err(store_err)?;
    let created_at: String = row.try_get("created_at").map_err(store_err)?;
    let merged_at: Option<String> = row.try_get("merged_at").map_err(store_err)?;
    let path: String = row.try_get("path").map_err(store_err)?;

    Ok(Worktree {
        id: WorktreeId::from(row.try_get::<String, _>("id").map_err(store_err)?),
        project_id: ProjectId::from(row.try_get::<String, _>("project_id").map_err(store_err)?),
        epic_id: EpicId::from(row.try_get::<String, _>("epic_id").map_err(store_err)?),
        branch: row.try_get("branch").map_err(store_err)?,
        path: path.into(),
        status: worktree_status_from_str(&status),
        created_at: parse_rfc3339(&created_at)?,
        merged_at: merged_at.map(|s| parse_rfc3339(&s)).transpose()?,
        merge_commit: row.try_get("merge_commit").map_err(store_err)?,
    })
}

#[async_trait]
impl CostStore for SqliteStore {
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
    ) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO cost_records \
             (project_id, session_id, task_id, model, input_tokens, output_tokens, cost, operation_type, at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&project.0)
        .bind(&session.0)
        .bind(&task.0)
        .bind(model)
        .bind(input_tokens as i64)
        .bind(output_tokens as i64)
        .bind(cost)
        .bind(operation_type)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn total_spent(&self, project: &ProjectId) -> CoreResult<f64> {
        let row = sqlx::query("SELECT COALESCE(SUM(cost), 0.0) AS total FROM cost_records WHERE project_id = ?")
            .bind(&project.0)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        row.try_get("total").map_err(store_err)
    }

    async fn aggregate_by(&self, project: &ProjectId, key: CostAggregationKey) -> CoreResult<HashMap<String, f64>> {
        let column = match key {
            CostAggregationKey::Model(_) => "model",
            CostAggregationKey::TaskType(_) => "operation_type",
        };
        // `column` only ever takes one of the two literal values above, never
        // caller-supplied text, so interpolating it here doesn't open up
        // injection the way binding a user value would.
        let sql =
            format!("SELECT {column} AS bucket, SUM(cost) AS total FROM cost_records WHERE project_id = ? GROUP BY {column}");
        let rows = sqlx::query(&sql).bind(&project.0).fetch_all(&self.pool).await.map_err(store_err)?;

        let mut totals = HashMap::new();
        for row in rows {
            let bucket: String = row.try_get("bucket").map_err(store_err)?;
            let total: f64 = row.try_get("total").map_err(store_err)?;
            totals.insert(bucket, total);
        }
        Ok(totals)
    }
}

#[async_trait]
impl ExpertiseStore for SqliteStore {
    async fn get(&self, project: &ProjectId, domain: Domain) -> CoreResult<Option<ExpertiseFile>> {
        let row = sqlx::query(
            "SELECT content, version, line_count, last_validated FROM expertise_files \
             WHERE project_id = ? AND domain = ?",
        )
        .bind(&project.0)
        .bind(domain.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let Some(row) = row else { return Ok(None) };
        let content: String = row.try_get("content").map_err(store_err)?;
        let version: i64 = row.try_get("version").map_err(store_err)?;
        let line_count: i64 = row.try_get("line_count").map_err(store_err)?;
        let last_validated: Option<String> = row.try_get("last_validated").map_err(store_err)?;

        Ok(Some(ExpertiseFile {
            project_id: project.clone(),
            domain,
            content: serde_json::from_str(&content).map_err(json_err)?,
            version: version as u64,
            line_count: line_count as usize,
            last_validated: last_validated.map(|s| parse_rfc3339(&s)).transpose()?,
        }))
    }

    async fn upsert(&self, project: &ProjectId, domain: Domain, content: ExpertiseContent) -> CoreResult<u64> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let existing: Option<i64> = sqlx::query("SELECT version FROM expertise_files WHERE project_id = ? AND domain = ?")
            .bind(&project.0)
            .bind(domain.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_err)?
            .map(|row| row.try_get("version"))
            .transpose()
            .map_err(store_err)?;

        let version = existing.unwrap_or(0) + 1;
        let line_count = content.core_files.len()
            + content.patterns.len()
            + content.techniques.len()
            + content.effective_patterns.len()
            + content.learned_from_failures.len()
            + content.successful_techniques.len();
        let content_json = serde_json::to_string(&content).map_err(json_err)?;

        sqlx::query(
            "INSERT INTO expertise_files (project_id, domain, content, version, line_count) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(project_id, domain) DO UPDATE SET content = excluded.content, version = excluded.version, \
             line_count = excluded.line_count",
        )
        .bind(&project.0)
        .bind(domain.to_string())
        .bind(content_json)
        .bind(version)
        .bind(line_count as i64)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(version as u64)
    }

    async fn record_update(&self, update: ExpertiseUpdate) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO expertise_updates (expertise_id, session_id, kind, summary, diff, at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&update.expertise_id)
        .bind(&update.session.0)
        .bind(&update.kind)
        .bind(&update.summary)
        .bind(&update.diff)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl PlanStore for SqliteStore {
    async fn save(&self, project: &ProjectId, plan_json: &str) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO plans (project_id, plan_json) VALUES (?, ?) \
             ON CONFLICT(project_id) DO UPDATE SET plan_json = excluded.plan_json",
        )
        .bind(&project.0)
        .bind(plan_json)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get(&self, project: &ProjectId) -> CoreResult<Option<String>> {
        let row = sqlx::query("SELECT plan_json FROM plans WHERE project_id = ?")
            .bind(&project.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        row.map(|r| r.try_get("plan_json").map_err(store_err)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn sample_task(id: &str) -> Task {
        Task {
            id: TaskId::from(id),
            epic_id: EpicId::from("e1"),
            priority: 1,
            description: "do a thing".to_string(),
            action: "implement it".to_string(),
            depends_on: BTreeSet::new(),
            dependency_type: DependencyType::Hard,
            done: false,
            predicted_files: None,
        }
    }

    async fn insert_epic_and_task(store: &SqliteStore, project: &ProjectId, task: &Task) {
        sqlx::query("INSERT INTO epics (id, project_id, name, priority, depends_on) VALUES (?, ?, 'e1', 0, '[]')")
            .bind(&task.epic_id.0)
            .bind(&project.0)
            .execute(&store.pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO tasks (id, project_id, epic_id, priority, description, action, depends_on, \
             dependency_type, done, tests_passing) VALUES (?, ?, ?, ?, ?, ?, '[]', 'hard', 0, 1)",
        )
        .bind(&task.id.0)
        .bind(&project.0)
        .bind(&task.epic_id.0)
        .bind(task.priority)
        .bind(&task.description)
        .bind(&task.action)
        .execute(&store.pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn list_pending_round_trips_a_task() {
        let store = SqliteStore::new(test_pool().await);
        let project = ProjectId::from("p1");
        let task = sample_task("t1");
        insert_epic_and_task(&store, &project, &task).await;

        let pending = store.list_pending(&project).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, task.id);
        assert_eq!(pending[0].dependency_type, DependencyType::Hard);
    }

    #[tokio::test]
    async fn update_done_safe_rejects_when_tests_failing() {
        let store = SqliteStore::new(test_pool().await);
        let project = ProjectId::from("p1");
        let task = sample_task("t1");
        insert_epic_and_task(&store, &project, &task).await;
        sqlx::query("UPDATE tasks SET tests_passing = 0 WHERE id = ?")
            .bind(&task.id.0)
            .execute(&store.pool)
            .await
            .unwrap();

        let applied = store.update_done_safe(&task.id, true).await.unwrap();
        assert!(!applied);
        let reloaded = store.get_with_tests(&task.id).await.unwrap().unwrap();
        assert!(!reloaded.task.done);
    }

    #[tokio::test]
    async fn update_done_safe_applies_when_tests_pass() {
        let store = SqliteStore::new(test_pool().await);
        let project = ProjectId::from("p1");
        let task = sample_task("t1");
        insert_epic_and_task(&store, &project, &task).await;

        let applied = store.update_done_safe(&task.id, true).await.unwrap();
        assert!(applied);
        let reloaded = store.get_with_tests(&task.id).await.unwrap().unwrap();
        assert!(reloaded.task.done);
    }

    #[tokio::test]
    async fn cost_store_aggregates_by_model() {
        let store = SqliteStore::new(test_pool().await);
        let project = ProjectId::from("p1");
        let session = SessionId::from("s1");
        let task_id = TaskId::from("t1");

        store
            .record(&project, &session, &task_id, "haiku", 100, 50, "implement", 0.01)
            .await
            .unwrap();
        store
            .record(&project, &session, &task_id, "opus", 200, 100, "implement", 0.5)
            .await
            .unwrap();

        let total = store.total_spent(&project).await.unwrap();
        assert!((total - 0.51).abs() < 1e-9);

        let by_model = store
            .aggregate_by(&project, CostAggregationKey::Model(String::new()))
            .await
            .unwrap();
        assert_eq!(by_model.get("haiku"), Some(&0.01));
        assert_eq!(by_model.get("opus"), Some(&0.5));
    }

    #[tokio::test]
    async fn expertise_upsert_increments_version_and_round_trips() {
        let store = SqliteStore::new(test_pool().await);
        let project = ProjectId::from("p1");
        let mut content = ExpertiseContent::default();
        content.patterns.push("use sqlx query builders, not raw strings".to_string());

        let v1 = store.upsert(&project, Domain::Database, content.clone()).await.unwrap();
        assert_eq!(v1, 1);
        let v2 = store.upsert(&project, Domain::Database, content).await.unwrap();
        assert_eq!(v2, 2);

        let file = store.get(&project, Domain::Database).await.unwrap().unwrap();
        assert_eq!(file.version, 2);
        assert_eq!(file.content.patterns.len(), 1);
    }

    #[tokio::test]
    async fn plan_store_upserts_on_save() {
        let store = SqliteStore::new(test_pool().await);
        let project = ProjectId::from("p1");
        store.save(&project, "{\"a\":1}").await.unwrap();
        store.save(&project, "{\"a\":2}").await.unwrap();
        let saved = store.get(&project).await.unwrap().unwrap();
        assert_eq!(saved, "{\"a\":2}");
    }
}
