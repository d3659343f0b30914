//! Core library for an autonomous multi-agent build orchestrator.
//!
//! This crate turns a pending set of tasks into ordered, concurrency-bounded
//! agent runs: resolving dependencies into batches, giving each epic its own
//! worktree, picking a model per task, invoking agents, merging finished
//! epics back into the main branch, and learning from every session along
//! the way.

pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod expertise;
pub mod git;
pub mod merge;
pub mod model;
pub mod resolver;
pub mod selector;
pub mod store;
pub mod worktree;

pub use agent::{
    AgentOutcome, AgentRunner, AgentStatus, AgentTaskContext, AssistantMessage, CancelSignal,
    CostInfo, FakeAgentRunner, OutputStreamer, RecordingHandler, StreamHandler, StreamMessage,
    SubprocessAgentRunner,
};
pub use config::{AgentConfig, Config};
pub use error::{Error, PlanError, RepoError, Result};
pub use events::{Event, EventBus, EventSubscription, EventType};
pub use executor::{BatchResult, ExecutionSummary, ExecutorStatus, ParallelExecutor};
pub use expertise::{classify, ExpertiseManager, LearningChanges};
pub use git::{
    FakeRepoBackend, GitRepo, GitRepoBackend, MergeProbe, RemoteInfo, RepoBackend, RepoResult,
    WorktreeEntry,
};
pub use merge::{MergeOutcome, MergeValidator};
pub use model::{
    Batch, BatchId, BatchStatus, CostRecord, DependencyType, Domain, Epic, EpicId,
    ExpertiseContent, ExpertiseFile, FailureLearning, ProjectId, RunningAgent, SessionId, Task,
    TaskId, Worktree, WorktreeId, WorktreeStatus,
};
pub use resolver::{resolve, to_ascii, to_mermaid, DependencyGraph};
pub use selector::{score, ComplexityScore, ModelSelector, ModelTier, TierPrice};
pub use store::{
    BatchStore, CostAggregationKey, CostStore, EpicStore, ExpertiseStore, ExpertiseUpdate,
    PlanStore, TaskStore, TaskWithTests, WorktreeStore,
};
pub use worktree::{branch_name, RecoveryReport, WorktreeManager, WorktreeRecord};
