//! `ParallelExecutor`: the epic-serial / batch-parallel scheduler (§4.E).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tokio::sync::{watch, Semaphore};

use crate::agent::{AgentRunner, AgentStatus, AgentTaskContext};
use crate::config::Config;
use crate::error::PlanError;
use crate::events::{Event, EventBus, EventType};
use crate::expertise::ExpertiseManager;
use crate::git::RepoBackend;
use crate::merge::{MergeOutcome, MergeValidator};
use crate::model::{
    BatchStatus, Domain, Epic, EpicId, ProjectId, RunningAgent, SessionId, Task, TaskId, Worktree,
};
use crate::resolver::resolve;
use crate::selector::{ModelSelector, ModelTier, TierPrice};
use crate::store::{BatchStore, CostStore, EpicStore, ExpertiseStore, PlanStore, TaskStore, WorktreeStore};
use crate::worktree::WorktreeManager;
use crate::{Error, Result};

/// Bound on the expertise Markdown injected into a single prompt. Distinct
/// from `LearningConfig::expertise_max_lines`, which bounds what is stored.
const PROMPT_MAX_CHARS: usize = 4_000;

/// Result of [`ParallelExecutor::execute_project`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionSummary {
    pub total_batches: u32,
    pub completed_batches: u32,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub failed_tasks: Vec<TaskId>,
    pub total_duration: Duration,
    pub total_cost: f64,
}

/// Result of [`ParallelExecutor::execute_batch`].
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub batch_number: u32,
    pub completed_tasks: Vec<TaskId>,
    pub failed_tasks: Vec<TaskId>,
    pub merged_epics: Vec<EpicId>,
    pub conflicted_epics: Vec<EpicId>,
    pub cancelled: bool,
}

/// Snapshot returned by [`ParallelExecutor::status`].
#[derive(Debug, Clone)]
pub struct ExecutorStatus {
    pub active_agents: Vec<RunningAgent>,
    pub max_concurrency: u32,
}

/// Everything an epic-worker needs, shared behind `Arc` so `tokio::spawn`
/// can take ownership of a clone per epic.
struct ExecutorCore {
    project: ProjectId,
    config: Config,
    agent_runner: Arc<dyn AgentRunner>,
    task_store: Arc<dyn TaskStore>,
    epic_store: Arc<dyn EpicStore>,
    batch_store: Arc<dyn BatchStore>,
    plan_store: Arc<dyn PlanStore>,
    cost_store: Arc<dyn CostStore>,
    worktree_manager: Arc<WorktreeManager>,
    merge_validator: Arc<MergeValidator>,
    selector: Arc<ModelSelector>,
    expertise: Arc<ExpertiseManager>,
    events: Arc<EventBus>,
    semaphore: Arc<Semaphore>,
    running: Arc<Mutex<HashMap<TaskId, RunningAgent>>>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

pub struct ParallelExecutor {
    core: Arc<ExecutorCore>,
}

impl ParallelExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        project: ProjectId,
        config: Config,
        backend: Arc<dyn RepoBackend>,
        agent_runner: Arc<dyn AgentRunner>,
        task_store: Arc<dyn TaskStore>,
        epic_store: Arc<dyn EpicStore>,
        batch_store: Arc<dyn BatchStore>,
        worktree_store: Arc<dyn WorktreeStore>,
        cost_store: Arc<dyn CostStore>,
        expertise_store: Arc<dyn ExpertiseStore>,
        plan_store: Arc<dyn PlanStore>,
        events: Arc<EventBus>,
        prices: HashMap<ModelTier, TierPrice>,
    ) -> Self {
        let worktree_manager = Arc::new(WorktreeManager::new(
            backend.clone(),
            worktree_store,
            config.repo.worktree_dir.clone(),
        ));
        let merge_validator = Arc::new(MergeValidator::new(
            backend,
            worktree_manager.clone(),
            config.repo.test_command.clone(),
        ));
        let selector = Arc::new(ModelSelector::new(config.cost.clone(), prices));
        let expertise = Arc::new(ExpertiseManager::new(expertise_store, config.learning.clone()));
        let semaphore = Arc::new(Semaphore::new(config.parallel.max_concurrency as usize));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        Self {
            core: Arc::new(ExecutorCore {
                project,
                config,
                task_store,
                epic_store,
                batch_store,
                plan_store,
                cost_store,
                worktree_manager,
                merge_validator,
                selector,
                expertise,
                events,
                semaphore,
                running: Arc::new(Mutex::new(HashMap::new())),
                cancel_tx,
                cancel_rx,
                agent_runner,
            }),
        }
    }

    /// Resolves the project's pending tasks into batches, persists the
    /// plan, then drives each batch to completion in order. Batch *k+1*
    /// never starts before batch *k* has completed or the run was
    /// cancelled (§4.E ordering guarantee).
    pub async fn execute_project(&self) -> Result<ExecutionSummary> {
        let started = Instant::now();
        let core = &self.core;

        let tasks = core.task_store.list_pending(&core.project).await?;
        let epics = core.epic_store.list(&core.project).await?;
        let graph = resolve(&tasks, &epics);

        if !graph.is_acyclic() {
            let size: usize = graph.circular_deps.iter().map(|c| c.len()).sum();
            core.events.publish(Event::new(
                EventType::PlanFailed,
                core.project.clone(),
                json!({"reason": "cycle", "task_count": size}),
            ));
            return Err(Error::Plan(PlanError::Cycle(size)));
        }

        let plan_json = serde_json::to_string(&graph)?;
        core.plan_store.save(&core.project, &plan_json).await?;

        let mut summary = ExecutionSummary {
            total_batches: graph.batches.len() as u32,
            total_tasks: tasks.len() as u32,
            ..Default::default()
        };

        for (idx, batch) in graph.batches.iter().enumerate() {
            if *core.cancel_rx.borrow() {
                break;
            }
            let task_ids: Vec<TaskId> = batch.iter().cloned().collect();
            let result = self.execute_batch(idx as u32 + 1, &task_ids).await?;
            summary.completed_batches += 1;
            summary.completed_tasks += result.completed_tasks.len() as u32;
            summary.failed_tasks.extend(result.failed_tasks);
            if result.cancelled {
                break;
            }
        }

        summary.total_cost = core.cost_store.total_spent(&core.project).await?;
        summary.total_duration = started.elapsed();
        Ok(summary)
    }

    /// Runs one batch: partitions tasks by epic, creates worktrees, runs
    /// one epic-worker per epic concurrently (bounded by the global
    /// semaphore), then merges every epic whose tasks all succeeded.
    pub async fn execute_batch(&self, batch_number: u32, task_ids: &[TaskId]) -> Result<BatchResult> {
        let core = self.core.clone();

        let batch_id = core.batch_store.create(&core.project, batch_number, task_ids).await?;
        core.batch_store
            .set_status(&batch_id, BatchStatus::Running, Some(Utc::now()), None)
            .await?;
        core.events.publish(Event::new(
            EventType::BatchStart,
            core.project.clone(),
            json!({"batch_number": batch_number, "task_count": task_ids.len()}),
        ));

        let mut tasks_by_epic: HashMap<EpicId, Vec<Task>> = HashMap::new();
        for id in task_ids {
            match core.task_store.get_with_tests(id).await? {
                Some(with_tests) => {
                    tasks_by_epic.entry(with_tests.task.epic_id.clone()).or_default().push(with_tests.task);
                }
                None => tracing::warn!("batch {batch_number}: task {id} not found, skipping"),
            }
        }

        let mut worktrees: HashMap<EpicId, Worktree> = HashMap::new();
        let mut epics: HashMap<EpicId, Epic> = HashMap::new();
        let mut failed_tasks: Vec<TaskId> = Vec::new();
        let mut epics_with_failure: HashSet<EpicId> = HashSet::new();

        for epic_id in tasks_by_epic.keys() {
            let Some(epic) = core.epic_store.get(epic_id).await? else {
                tracing::warn!("batch {batch_number}: epic {epic_id} not found, failing its tasks");
                epics_with_failure.insert(epic_id.clone());
                failed_tasks.extend(tasks_by_epic[epic_id].iter().map(|t| t.id.clone()));
                continue;
            };
            match core.worktree_manager.create_worktree(&core.project, &epic).await {
                Ok(worktree) => {
                    core.events.publish(Event::new(
                        EventType::WorktreeCreated,
                        core.project.clone(),
                        json!({"epic_id": epic_id.0, "branch": worktree.branch}),
                    ));
                    worktrees.insert(epic_id.clone(), worktree);
                    epics.insert(epic_id.clone(), epic);
                }
                Err(e) => {
                    tracing::warn!("batch {batch_number}: worktree creation failed for epic {epic_id}: {e}");
                    epics_with_failure.insert(epic_id.clone());
                    failed_tasks.extend(tasks_by_epic[epic_id].iter().map(|t| t.id.clone()));
                }
            }
        }

        let mut join_set = tokio::task::JoinSet::new();
        for (epic_id, mut epic_tasks) in tasks_by_epic {
            if epics_with_failure.contains(&epic_id) {
                continue;
            }
            let Some(worktree) = worktrees.get(&epic_id).cloned() else {
                continue;
            };
            let epic_priority = epics.get(&epic_id).map(|e| e.priority).unwrap_or(0);
            epic_tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.0.cmp(&b.id.0)));

            let worker_core = core.clone();
            join_set.spawn(async move {
                run_epic_worker(worker_core, epic_id, epic_priority, epic_tasks, worktree).await
            });
        }

        let mut completed_tasks = Vec::new();
        let mut cancelled = false;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(outcome)) => {
                    completed_tasks.extend(outcome.completed);
                    failed_tasks.extend(outcome.failed);
                    if outcome.had_failure {
                        epics_with_failure.insert(outcome.epic_id);
                    }
                    cancelled |= outcome.cancelled;
                }
                Ok(Err(e)) => return Err(e),
                Err(join_err) => tracing::error!("epic worker task panicked: {join_err}"),
            }
        }

        let mut merged_epics = Vec::new();
        let mut conflicted_epics = Vec::new();
        if !cancelled {
            for (epic_id, worktree) in &worktrees {
                if epics_with_failure.contains(epic_id) {
                    continue;
                }
                match core
                    .merge_validator
                    .merge_epic(epic_id, worktree, core.config.parallel.merge_strategy)
                    .await
                {
                    Ok(MergeOutcome::Merged { commit }) => {
                        merged_epics.push(epic_id.clone());
                        core.events.publish(Event::new(
                            EventType::WorktreeMerged,
                            core.project.clone(),
                            json!({"epic_id": epic_id.0, "commit": commit}),
                        ));
                    }
                    Ok(MergeOutcome::Conflict { files }) => {
                        conflicted_epics.push(epic_id.clone());
                        core.events.publish(Event::new(
                            EventType::WorktreeConflict,
                            core.project.clone(),
                            json!({"epic_id": epic_id.0, "files": files.iter().map(|p| p.display().to_string()).collect::<Vec<_>>()}),
                        ));
                    }
                    Ok(MergeOutcome::TestFailed { output }) => {
                        conflicted_epics.push(epic_id.clone());
                        core.events.publish(Event::new(
                            EventType::WorktreeConflict,
                            core.project.clone(),
                            json!({"epic_id": epic_id.0, "test_output": output}),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!("batch {batch_number}: merge failed for epic {epic_id}: {e}");
                        conflicted_epics.push(epic_id.clone());
                    }
                }
            }
        }

        let status = if cancelled {
            BatchStatus::Cancelled
        } else if !failed_tasks.is_empty() {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        };
        core.batch_store
            .set_status(&batch_id, status, None, Some(Utc::now()))
            .await?;
        core.events.publish(Event::new(
            EventType::BatchComplete,
            core.project.clone(),
            json!({"batch_number": batch_number, "status": format!("{status:?}").to_lowercase()}),
        ));

        Ok(BatchResult {
            batch_number,
            completed_tasks,
            failed_tasks,
            merged_epics,
            conflicted_epics,
            cancelled,
        })
    }

    /// Idempotent: signals every in-flight and future agent call to stop.
    /// Scheduling of new batches and new tasks within a batch halts;
    /// already-committed work is left in place.
    pub fn cancel(&self) {
        let _ = self.core.cancel_tx.send(true);
    }

    pub fn status(&self) -> ExecutorStatus {
        ExecutorStatus {
            active_agents: self.core.running.lock().unwrap().values().cloned().collect(),
            max_concurrency: self.core.config.parallel.max_concurrency,
        }
    }
}

/// What one epic-worker produced over its stream of tasks.
struct EpicWorkerOutcome {
    epic_id: EpicId,
    completed: Vec<TaskId>,
    failed: Vec<TaskId>,
    had_failure: bool,
    cancelled: bool,
}

/// Pulls `tasks` (already sorted by priority, highest first) in order,
/// one agent call at a time, acquiring a semaphore token per call so the
/// global concurrency cap is respected across every epic's stream (§4.E
/// steps 2-4).
async fn run_epic_worker(
    core: Arc<ExecutorCore>,
    epic_id: EpicId,
    epic_priority: i64,
    tasks: Vec<Task>,
    worktree: Worktree,
) -> Result<EpicWorkerOutcome> {
    let mut completed = Vec::new();
    let mut failed = Vec::new();
    let mut had_failure = false;
    let mut cancelled = false;
    let mut previous_domain: Option<Domain> = None;

    for task in tasks {
        if *core.cancel_rx.borrow() {
            cancelled = true;
            break;
        }

        let _permit = core.semaphore.clone().acquire_owned().await.map_err(|e| Error::Other(e.to_string()))?;

        let domain = core.expertise.classify(&task, previous_domain);
        previous_domain = Some(domain);

        let expertise_text = if core.config.learning.enabled {
            core.expertise
                .format_for_prompt(&core.project, domain, PROMPT_MAX_CHARS)
                .await?
        } else {
            String::new()
        };

        let spent = core.cost_store.total_spent(&core.project).await?;
        let (tier, _estimated) = match core.selector.select(&task, &domain.to_string(), epic_priority, spent) {
            Ok(picked) => picked,
            Err(Error::BudgetExhausted) => {
                core.events.publish(Event::new(
                    EventType::BudgetWarning,
                    core.project.clone(),
                    json!({"task_id": task.id.0, "epic_id": epic_id.0}),
                ));
                failed.push(task.id.clone());
                had_failure = true;
                if core.config.parallel.fatal_epic {
                    break;
                }
                continue;
            }
            Err(e) => return Err(e),
        };

        let prompt = build_prompt(&task, &expertise_text);

        {
            let mut running = core.running.lock().unwrap();
            running.insert(
                task.id.clone(),
                RunningAgent {
                    task_id: task.id.clone(),
                    epic_id: epic_id.clone(),
                    worktree_path: worktree.path.clone(),
                    model: tier.as_str().to_string(),
                    started_at: Utc::now(),
                },
            );
        }
        core.events.publish(Event::new(
            EventType::TaskStart,
            core.project.clone(),
            json!({"task_id": task.id.0, "epic_id": epic_id.0, "model": tier.as_str()}),
        ));

        let cancel_rx = core.cancel_rx.clone();
        let ctx = AgentTaskContext {
            task_id: task.id.0.clone(),
            prompt,
            model: tier.as_str().to_string(),
            workdir: &worktree.path,
            timeout: core.config.agent.per_task_timeout,
        };
        let run_result = core.agent_runner.run(ctx, cancel_rx).await;

        core.running.lock().unwrap().remove(&task.id);

        match run_result {
            Ok(outcome) => {
                let cost = core.selector.actual_cost(tier, outcome.input_tokens, outcome.output_tokens);
                let session = SessionId::from(uuid::Uuid::new_v4().to_string());
                core.cost_store
                    .record(
                        &core.project,
                        &session,
                        &task.id,
                        tier.as_str(),
                        outcome.input_tokens,
                        outcome.output_tokens,
                        &domain.to_string(),
                        cost,
                    )
                    .await?;
                core.events.publish(Event::new(
                    EventType::CostUpdate,
                    core.project.clone(),
                    json!({"task_id": task.id.0, "cost": cost, "model": tier.as_str()}),
                ));

                if core.config.learning.enabled {
                    let changes = core
                        .expertise
                        .learn_from_session(&core.project, domain, &outcome, &task.description, &outcome.touched_files)
                        .await?;
                    if changes.failure_recorded
                        || changes.technique_recorded
                        || !changes.patterns_added.is_empty()
                        || !changes.core_files_added.is_empty()
                    {
                        core.events.publish(Event::new(
                            EventType::ExpertiseLearned,
                            core.project.clone(),
                            json!({"task_id": task.id.0, "domain": domain.to_string()}),
                        ));
                    }
                }

                core.selector.record_outcome(&domain.to_string(), outcome.succeeded());

                let mut status_label = "success";
                match &outcome.status {
                    AgentStatus::Success => {
                        let applied = core.task_store.update_done_safe(&task.id, true).await?;
                        if applied {
                            completed.push(task.id.clone());
                        } else {
                            tracing::warn!("task {} succeeded but store rejected the done transition", task.id);
                            failed.push(task.id.clone());
                            had_failure = true;
                            status_label = "rejected";
                        }
                    }
                    AgentStatus::Failure(msg) => {
                        tracing::warn!("task {} failed: {msg}", task.id);
                        failed.push(task.id.clone());
                        had_failure = true;
                        status_label = "failure";
                    }
                    AgentStatus::Cancelled => {
                        cancelled = true;
                        status_label = "cancelled";
                    }
                }
                core.events.publish(Event::new(
                    EventType::TaskComplete,
                    core.project.clone(),
                    json!({"task_id": task.id.0, "status": status_label}),
                ));

                if cancelled {
                    break;
                }
                if matches!(outcome.status, AgentStatus::Failure(_)) && core.config.parallel.fatal_epic {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("task {} agent invocation error: {e}", task.id);
                failed.push(task.id.clone());
                had_failure = true;
                core.events.publish(Event::new(
                    EventType::TaskComplete,
                    core.project.clone(),
                    json!({"task_id": task.id.0, "status": "error"}),
                ));
                if !e.is_task_local() {
                    return Err(e);
                }
                if core.config.parallel.fatal_epic {
                    break;
                }
            }
        }
    }

    Ok(EpicWorkerOutcome {
        epic_id,
        completed,
        failed,
        had_failure,
        cancelled,
    })
}

fn build_prompt(task: &Task, expertise: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(&task.description);
    if !task.action.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&task.action);
    }
    if !expertise.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(expertise);
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::FakeAgentRunner;
    use crate::config::Config;
    use crate::git::FakeRepoBackend;
    use crate::model::DependencyType;
    use crate::selector::TierPrice;
    use crate::store::fakes::{
        InMemoryBatchStore, InMemoryCostStore, InMemoryEpicStore, InMemoryExpertiseStore, InMemoryPlanStore,
        InMemoryTaskStore, InMemoryWorktreeStore,
    };
    use crate::store::TaskWithTests;
    use std::collections::BTreeSet;

    fn prices() -> HashMap<ModelTier, TierPrice> {
        let mut prices = HashMap::new();
        for tier in [ModelTier::Haiku, ModelTier::Sonnet, ModelTier::Opus] {
            prices.insert(
                tier,
                TierPrice {
                    input_per_million: 1.0,
                    output_per_million: 1.0,
                },
            );
        }
        prices
    }

    fn task(id: &str, epic: &str, priority: i64, deps: &[&str]) -> Task {
        Task {
            id: TaskId::from(id),
            epic_id: EpicId::from(epic),
            priority,
            description: format!("do {id}"),
            action: String::new(),
            depends_on: deps.iter().map(|s| TaskId::from(*s)).collect(),
            dependency_type: DependencyType::Hard,
            done: false,
            predicted_files: None,
        }
    }

    fn epic(id: &str) -> Epic {
        Epic {
            id: EpicId::from(id),
            name: id.to_string(),
            priority: 0,
            depends_on: BTreeSet::new(),
        }
    }

    fn executor(
        tasks: Vec<Task>,
        epics: Vec<Epic>,
        agent_runner: Arc<dyn AgentRunner>,
        dir: &std::path::Path,
    ) -> ParallelExecutor {
        let with_tests: Vec<TaskWithTests> = tasks
            .into_iter()
            .map(|task| TaskWithTests { task, tests_passing: true })
            .collect();
        let mut config = Config::default();
        config.repo.worktree_dir = dir.to_path_buf();

        ParallelExecutor::new(
            ProjectId::from("p1"),
            config,
            Arc::new(FakeRepoBackend::new("main")),
            agent_runner,
            Arc::new(InMemoryTaskStore::new(with_tests)),
            Arc::new(InMemoryEpicStore::new(epics)),
            Arc::new(InMemoryBatchStore::default()),
            Arc::new(InMemoryWorktreeStore::default()),
            Arc::new(InMemoryCostStore::default()),
            Arc::new(InMemoryExpertiseStore::default()),
            Arc::new(InMemoryPlanStore::default()),
            Arc::new(EventBus::new()),
            prices(),
        )
    }

    #[tokio::test]
    async fn successful_single_task_batch_completes_and_merges() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(
            vec![task("t1", "e1", 0, &[])],
            vec![epic("e1")],
            Arc::new(FakeAgentRunner::succeeding()),
            dir.path(),
        );

        let result = exec.execute_batch(1, &[TaskId::from("t1")]).await.unwrap();
        assert_eq!(result.completed_tasks, vec![TaskId::from("t1")]);
        assert!(result.failed_tasks.is_empty());
        assert_eq!(result.merged_epics, vec![EpicId::from("e1")]);
        assert!(!result.cancelled);
    }

    #[tokio::test]
    async fn failing_task_keeps_epic_unmerged() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(
            vec![task("t1", "e1", 0, &[])],
            vec![epic("e1")],
            Arc::new(FakeAgentRunner::failing("boom")),
            dir.path(),
        );

        let result = exec.execute_batch(1, &[TaskId::from("t1")]).await.unwrap();
        assert_eq!(result.failed_tasks, vec![TaskId::from("t1")]);
        assert!(result.merged_epics.is_empty());
    }

    #[tokio::test]
    async fn distinct_epics_in_one_batch_both_progress() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(
            vec![task("t1", "e1", 0, &[]), task("t2", "e2", 0, &[])],
            vec![epic("e1"), epic("e2")],
            Arc::new(FakeAgentRunner::succeeding()),
            dir.path(),
        );

        let result = exec
            .execute_batch(1, &[TaskId::from("t1"), TaskId::from("t2")])
            .await
            .unwrap();
        assert_eq!(result.completed_tasks.len(), 2);
        assert_eq!(result.merged_epics.len(), 2);
    }

    #[tokio::test]
    async fn project_cycle_is_reported_and_nothing_runs() {
        let dir = tempfile::tempdir().unwrap();
        let t1 = task("t1", "e1", 0, &["t2"]);
        let t2 = task("t2", "e1", 0, &["t1"]);
        let exec = executor(vec![t1, t2], vec![epic("e1")], Arc::new(FakeAgentRunner::succeeding()), dir.path());

        let err = exec.execute_project().await.unwrap_err();
        assert!(matches!(err, Error::Plan(PlanError::Cycle(_))));
    }

    #[tokio::test]
    async fn cancel_before_batch_start_stops_the_project_run() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(
            vec![task("t1", "e1", 0, &[])],
            vec![epic("e1")],
            Arc::new(FakeAgentRunner::succeeding()),
            dir.path(),
        );
        exec.cancel();

        let summary = exec.execute_project().await.unwrap();
        assert_eq!(summary.completed_batches, 0);
    }

    #[tokio::test]
    async fn status_reports_the_configured_concurrency_cap() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(vec![], vec![], Arc::new(FakeAgentRunner::succeeding()), dir.path());
        let status = exec.status();
        assert_eq!(status.max_concurrency, 3);
        assert!(status.active_agents.is_empty());
    }
}
