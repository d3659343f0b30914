//! Default `AgentRunner`: spawns a configurable CLI in `stream-json` mode
//! and parses its output incrementally, the way `ClaudeBackend` does.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use super::output::{OutputStreamer, RecordingHandler, StreamHandler};
use super::runner::{AgentOutcome, AgentRunner, AgentStatus, AgentTaskContext, CancelSignal};
use crate::{Error, Result};

/// Spawns `executable --print --verbose --output-format stream-json
/// --model <model> <prompt>` in the task's worktree and streams its output.
#[derive(Debug, Clone)]
pub struct SubprocessAgentRunner {
    executable: String,
}

impl SubprocessAgentRunner {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    fn build_command(&self, ctx: &AgentTaskContext<'_>) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("--print")
            .arg("--verbose")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--model")
            .arg(&ctx.model)
            .arg(&ctx.prompt)
            .current_dir(ctx.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null());
        cmd
    }
}

#[async_trait]
impl AgentRunner for SubprocessAgentRunner {
    async fn run(&self, ctx: AgentTaskContext<'_>, mut cancel: CancelSignal) -> Result<AgentOutcome> {
        if !ctx.workdir.exists() {
            return Err(Error::AgentFailure(format!(
                "worktree directory does not exist: {}",
                ctx.workdir.display()
            )));
        }

        let mut child = self.build_command(&ctx).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::AgentFailure(format!(
                    "agent executable '{}' not found",
                    self.executable
                ))
            } else {
                Error::Io(e)
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::AgentFailure("agent process has no stdout pipe".into()))?;

        let mut streamer = OutputStreamer::new(stdout);
        let mut handler = RecordingHandler::default();
        let started = Instant::now();

        let timeout_fut = async {
            match ctx.timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        let status = tokio::select! {
            result = streamer.stream(&mut handler) => {
                result?;
                let exit = child.wait().await.map_err(Error::Io)?;
                if exit.success() {
                    AgentStatus::Success
                } else {
                    AgentStatus::Failure(format!("agent exited with {exit}"))
                }
            }
            _ = cancel.changed() => {
                let _ = child.kill().await;
                AgentStatus::Cancelled
            }
            () = timeout_fut => {
                let _ = child.kill().await;
                AgentStatus::Failure("agent timed out".into())
            }
        };

        let cost = handler.cost.unwrap_or_default();
        Ok(AgentOutcome {
            status,
            input_tokens: cost.input_tokens,
            output_tokens: cost.output_tokens,
            tool_sequence: handler.tool_sequence,
            touched_files: handler.touched_files,
            final_text: handler.final_text,
            duration: started.elapsed().max(Duration::from_millis(1)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[tokio::test]
    async fn missing_executable_reports_agent_failure() {
        let runner = SubprocessAgentRunner::new("definitely-not-a-real-binary-xyz");
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let dir = tempfile::tempdir().unwrap();
        let ctx = AgentTaskContext {
            task_id: "t1".into(),
            prompt: "do something".into(),
            model: "haiku".into(),
            workdir: dir.path(),
            timeout: None,
        };
        let result = runner.run(ctx, rx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_workdir_reports_agent_failure() {
        let runner = SubprocessAgentRunner::new("true");
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let ctx = AgentTaskContext {
            task_id: "t1".into(),
            prompt: "do something".into(),
            model: "haiku".into(),
            workdir: Path::new("/nonexistent/path/for/flockwork/tests"),
            timeout: None,
        };
        let result = runner.run(ctx, rx).await;
        assert!(result.is_err());
    }
}
