//! Entities shared across the execution engine (§3).

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier newtypes. Keeping each entity's id a distinct type
/// stops a `TaskId` being passed where an `EpicId` is expected.
macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

opaque_id!(TaskId);
opaque_id!(EpicId);
opaque_id!(ProjectId);
opaque_id!(WorktreeId);
opaque_id!(BatchId);
opaque_id!(SessionId);

/// Whether a task dependency must complete before the dependent task can
/// be scheduled (`hard`), or only influences intra-batch ordering (`soft`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    Hard,
    Soft,
}

/// A single unit of work driven by one `AgentRunner` invocation.
///
/// Immutable except for `done`, which the store transitions atomically
/// with a check that the task's tests pass (invariant 4, §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub epic_id: EpicId,
    pub priority: i64,
    pub description: String,
    pub action: String,
    pub depends_on: BTreeSet<TaskId>,
    pub dependency_type: DependencyType,
    pub done: bool,
    pub predicted_files: Option<Vec<PathBuf>>,
}

impl Task {
    pub fn predicted_files(&self) -> &[PathBuf] {
        self.predicted_files.as_deref().unwrap_or(&[])
    }
}

/// A named group of tasks that share a worktree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epic {
    pub id: EpicId,
    pub name: String,
    pub priority: i64,
    pub depends_on: BTreeSet<EpicId>,
}

/// Status of a `Worktree` row (§3). Mirrors the state machine in §4.C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorktreeStatus {
    Active,
    Merging,
    Merged,
    Conflict,
    Stale,
}

impl WorktreeStatus {
    /// Valid next states reachable from this one in the §4.C state machine.
    pub fn can_transition_to(self, next: WorktreeStatus) -> bool {
        use WorktreeStatus::*;
        matches!(
            (self, next),
            (Active, Merging)
                | (Merging, Merged)
                | (Merging, Conflict)
                | (Merging, Active)
                | (Conflict, Merged)
                | (Conflict, Stale)
                | (Active, Stale)
        )
    }
}

/// One active working tree bound to an epic within a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worktree {
    pub id: WorktreeId,
    pub project_id: ProjectId,
    pub epic_id: EpicId,
    pub branch: String,
    pub path: PathBuf,
    pub status: WorktreeStatus,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub merge_commit: Option<String>,
}

/// Status of a scheduled `Batch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Running,
    Merging,
    Completed,
    Failed,
    Cancelled,
}

/// A maximal anti-chain of tasks scheduled to run concurrently (§3, §4.A).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub project_id: ProjectId,
    pub batch_number: u32,
    pub task_ids: BTreeSet<TaskId>,
    pub status: BatchStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// In-memory record of a task currently inside an `AgentRunner` call.
/// Never persisted — owned solely by the `ParallelExecutor`.
#[derive(Debug, Clone)]
pub struct RunningAgent {
    pub task_id: TaskId,
    pub epic_id: EpicId,
    pub worktree_path: PathBuf,
    pub model: String,
    pub started_at: DateTime<Utc>,
}

/// One billed agent call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub project_id: ProjectId,
    pub session_id: SessionId,
    pub task_id: TaskId,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub operation_type: String,
    pub at: DateTime<Utc>,
}

/// Domains the expertise store classifies tasks into (§3, §4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Database,
    Api,
    Frontend,
    Testing,
    Security,
    Deployment,
    General,
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Domain::Database => "database",
            Domain::Api => "api",
            Domain::Frontend => "frontend",
            Domain::Testing => "testing",
            Domain::Security => "security",
            Domain::Deployment => "deployment",
            Domain::General => "general",
        };
        write!(f, "{s}")
    }
}

/// A single entry learned from a failing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureLearning {
    pub issue: String,
    pub error: String,
    pub solution: Option<String>,
    pub at: DateTime<Utc>,
}

/// Per-domain bounded document of learned patterns injected into prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertiseContent {
    pub core_files: Vec<String>,
    pub patterns: Vec<String>,
    pub techniques: Vec<String>,
    pub effective_patterns: Vec<String>,
    pub learned_from_failures: Vec<FailureLearning>,
    pub successful_techniques: Vec<String>,
}

impl Default for ExpertiseContent {
    fn default() -> Self {
        Self {
            core_files: Vec::new(),
            patterns: Vec::new(),
            techniques: Vec::new(),
            effective_patterns: Vec::new(),
            learned_from_failures: Vec::new(),
            successful_techniques: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertiseFile {
    pub project_id: ProjectId,
    pub domain: Domain,
    pub content: ExpertiseContent,
    pub version: u64,
    pub line_count: usize,
    pub last_validated: Option<DateTime<Utc>>,
}
