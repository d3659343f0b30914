//! The `AgentRunner` capability-set (§1, §9): the engine treats the AI
//! coding agent itself as an opaque collaborator invoked per task.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// Outcome of one `AgentRunner::run` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStatus {
    Success,
    Failure(String),
    Cancelled,
}

/// Everything the scheduler needs back from a completed agent call: enough
/// to build a `CostRecord` (§3) and to hand off to `ExpertiseManager` for
/// learning (§4.G).
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub status: AgentStatus,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tool_sequence: Vec<String>,
    /// Paths touched by write-shaped tool calls (Write/Edit/...), normalized
    /// project-relative paths where the agent reported them as such. Fed to
    /// `ExpertiseManager::learn_from_session`'s `core_files` update (§4.G).
    pub touched_files: Vec<String>,
    pub final_text: String,
    pub duration: Duration,
}

impl AgentOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == AgentStatus::Success
    }
}

/// A cooperative cancellation signal. `*signal.borrow()` becomes `true`
/// once `cancel()` has been called; runners must poll it at suspension
/// points (§5) and `changed()` to wake promptly.
pub type CancelSignal = tokio::sync::watch::Receiver<bool>;

/// Everything a task needs to invoke the agent.
pub struct AgentTaskContext<'a> {
    pub task_id: String,
    pub prompt: String,
    pub model: String,
    pub workdir: &'a Path,
    pub timeout: Option<Duration>,
}

/// The opaque AI coding agent. Implementations may shell out to a CLI
/// (the default, see [`super::subprocess::SubprocessAgentRunner`]), call an
/// HTTP API, or — in tests — return canned outcomes
/// (see [`super::fakes::FakeAgentRunner`]).
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, ctx: AgentTaskContext<'_>, cancel: CancelSignal) -> Result<AgentOutcome>;
}
