//! In-memory `AgentRunner` for scheduler and resolver tests (§9).

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::runner::{AgentOutcome, AgentRunner, AgentStatus, AgentTaskContext, CancelSignal};
use crate::Result;

/// Returns a fixed outcome (default: success, zero cost) for every call,
/// and records the prompts it was invoked with for assertions.
pub struct FakeAgentRunner {
    outcome: AgentStatus,
    calls: Mutex<Vec<String>>,
}

impl FakeAgentRunner {
    pub fn new(outcome: AgentStatus) -> Self {
        Self {
            outcome,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(AgentStatus::Success)
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(AgentStatus::Failure(message.into()))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentRunner for FakeAgentRunner {
    async fn run(&self, ctx: AgentTaskContext<'_>, mut cancel: CancelSignal) -> Result<AgentOutcome> {
        self.calls.lock().unwrap().push(ctx.task_id.clone());

        if *cancel.borrow() {
            return Ok(AgentOutcome {
                status: AgentStatus::Cancelled,
                input_tokens: 0,
                output_tokens: 0,
                tool_sequence: Vec::new(),
                touched_files: Vec::new(),
                final_text: String::new(),
                duration: Duration::from_millis(1),
            });
        }

        Ok(AgentOutcome {
            status: self.outcome.clone(),
            input_tokens: 100,
            output_tokens: 50,
            tool_sequence: vec!["Read".into(), "Edit".into()],
            touched_files: Vec::new(),
            final_text: "applied the requested change.".into(),
            duration: Duration::from_millis(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_task_ids_it_was_invoked_with() {
        let runner = FakeAgentRunner::succeeding();
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let dir = tempfile::tempdir().unwrap();
        let ctx = AgentTaskContext {
            task_id: "t1".into(),
            prompt: "do it".into(),
            model: "haiku".into(),
            workdir: dir.path(),
            timeout: None,
        };
        let outcome = runner.run(ctx, rx).await.unwrap();
        assert!(outcome.succeeded());
        assert_eq!(runner.calls(), vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn already_cancelled_signal_short_circuits() {
        let runner = FakeAgentRunner::succeeding();
        let (tx, rx) = tokio::sync::watch::channel(false);
        tx.send(true).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ctx = AgentTaskContext {
            task_id: "t1".into(),
            prompt: "do it".into(),
            model: "haiku".into(),
            workdir: dir.path(),
            timeout: None,
        };
        let outcome = runner.run(ctx, rx).await.unwrap();
        assert_eq!(outcome.status, AgentStatus::Cancelled);
    }
}
