//! Error types for the execution engine

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias used throughout the engine
pub type Result<T> = std::result::Result<T, Error>;

/// Repository primitive failures, raised by a `RepoBackend` and handled by
/// the worktree manager and merge validator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepoError {
    #[error("{op} timed out after {elapsed:?}")]
    Timeout { op: String, elapsed: Duration },

    #[error("merge conflict in {0} file(s)")]
    Conflict(Vec<PathBuf>),

    #[error("missing: {0}")]
    Missing(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("busy: {0}")]
    Busy(String),
}

/// Plan-time failures surfaced by the dependency resolver.
///
/// `Cycle` aborts the whole run; `MissingDependency` is recorded in the
/// plan's diagnostics and is otherwise non-fatal, so it is rarely
/// constructed as an `Error` — it exists so callers that treat the resolver
/// as fallible (e.g. a caller requiring an acyclic plan) have something to
/// match on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("dependency cycle across {0} task(s)")]
    Cycle(usize),

    #[error("task {task} depends on missing task {missing}")]
    MissingDependency { task: String, missing: String },
}

/// Top-level error type for the execution engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("agent failure: {0}")]
    AgentFailure(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("budget exhausted")]
    BudgetExhausted,

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for errors the epic-worker should treat as confined to a single
    /// task rather than fatal to the whole run (§7 propagation policy).
    pub fn is_task_local(&self) -> bool {
        !matches!(self, Error::Plan(PlanError::Cycle(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_error_converts_into_engine_error() {
        let e: Error = RepoError::Busy("worktree locked".into()).into();
        assert!(matches!(e, Error::Repo(RepoError::Busy(_))));
    }

    #[test]
    fn cycle_is_not_task_local() {
        let e: Error = PlanError::Cycle(3).into();
        assert!(!e.is_task_local());
    }
}
