//! Parsing of the agent subprocess's `stream-json` output format.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStdout;

use crate::{Error, Result};

/// One line of the agent's `stream-json` output.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    Assistant {
        #[serde(default)]
        message: AssistantMessage,
    },
    ToolUse {
        tool: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        #[serde(default)]
        output: String,
        #[serde(default)]
        is_error: bool,
    },
    Result {
        #[serde(default)]
        cost: Option<CostInfo>,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: String,
}

/// Token counts reported in the final `result` message, used to build a
/// `CostRecord` (§3, §4.F).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CostInfo {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Callbacks fired for each message in an agent's output stream.
pub trait StreamHandler: Send {
    fn on_system(&mut self, _subtype: Option<&str>, _session_id: Option<&str>) {}
    fn on_assistant_text(&mut self, text: &str);
    fn on_tool_use(&mut self, _tool: &str, _input: &serde_json::Value) {}
    fn on_tool_result(&mut self, _output: &str, _is_error: bool) {}
    fn on_complete(&mut self, _cost: Option<&CostInfo>, _duration_ms: Option<u64>) {}
    fn on_parse_error(&mut self, _line: &str, _error: &serde_json::Error) {}
}

/// Collects the data `ExpertiseManager::learn_from_session` and
/// `ModelSelector::record_outcome` need: the tool-use sequence, the files
/// touched by write-shaped tools, the final assistant text, and the
/// reported token counts.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    pub tool_sequence: Vec<String>,
    pub touched_files: Vec<String>,
    pub final_text: String,
    pub cost: Option<CostInfo>,
    pub duration_ms: Option<u64>,
}

/// Tool names whose `input` carries a file path worth recording for
/// `ExpertiseManager::learn_from_session`'s `core_files` update.
const WRITE_SHAPED_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];

impl StreamHandler for RecordingHandler {
    fn on_assistant_text(&mut self, text: &str) {
        self.final_text.push_str(text);
    }

    fn on_tool_use(&mut self, tool: &str, input: &serde_json::Value) {
        self.tool_sequence.push(tool.to_string());
        if WRITE_SHAPED_TOOLS.contains(&tool) {
            for key in ["file_path", "path", "notebook_path"] {
                if let Some(path) = input.get(key).and_then(|v| v.as_str()) {
                    self.touched_files.push(path.to_string());
                    break;
                }
            }
        }
    }

    fn on_complete(&mut self, cost: Option<&CostInfo>, duration_ms: Option<u64>) {
        self.cost = cost.cloned();
        self.duration_ms = duration_ms;
    }

    fn on_parse_error(&mut self, line: &str, error: &serde_json::Error) {
        tracing::debug!("discarding unparseable agent output line ({error}): {line}");
    }
}

/// Reads a subprocess's stdout line by line, dispatching each parsed
/// message to a [`StreamHandler`].
pub struct OutputStreamer {
    reader: BufReader<ChildStdout>,
}

impl OutputStreamer {
    pub fn new(stdout: ChildStdout) -> Self {
        Self {
            reader: BufReader::new(stdout),
        }
    }

    pub async fn stream<H: StreamHandler>(&mut self, handler: &mut H) -> Result<()> {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await.map_err(Error::Io)?;
            if bytes_read == 0 {
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<StreamMessage>(trimmed) {
                Ok(msg) => Self::dispatch_message(handler, msg),
                Err(e) => handler.on_parse_error(trimmed, &e),
            }
        }
        Ok(())
    }

    fn dispatch_message<H: StreamHandler>(handler: &mut H, msg: StreamMessage) {
        match msg {
            StreamMessage::System { subtype, session_id } => {
                handler.on_system(subtype.as_deref(), session_id.as_deref());
            }
            StreamMessage::Assistant { message } => {
                handler.on_assistant_text(&message.content);
            }
            StreamMessage::ToolUse { tool, input } => {
                handler.on_tool_use(&tool, &input);
            }
            StreamMessage::ToolResult { output, is_error } => {
                handler.on_tool_result(&output, is_error);
            }
            StreamMessage::Result { cost, duration_ms } => {
                handler.on_complete(cost.as_ref(), duration_ms);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assistant_message() {
        let json = r#"{"type":"assistant","message":{"content":"hello"}}"#;
        let msg: StreamMessage = serde_json::from_str(json).unwrap();
        match msg {
            StreamMessage::Assistant { message } => assert_eq!(message.content, "hello"),
            _ => panic!("expected assistant message"),
        }
    }

    #[test]
    fn parses_tool_use() {
        let json = r#"{"type":"tool_use","tool":"Read","input":{"file":"/x.rs"}}"#;
        let msg: StreamMessage = serde_json::from_str(json).unwrap();
        match msg {
            StreamMessage::ToolUse { tool, input } => {
                assert_eq!(tool, "Read");
                assert_eq!(input["file"], "/x.rs");
            }
            _ => panic!("expected tool use message"),
        }
    }

    #[test]
    fn parses_result_with_cost() {
        let json = r#"{"type":"result","cost":{"input_tokens":100,"output_tokens":50},"duration_ms":1200}"#;
        let msg: StreamMessage = serde_json::from_str(json).unwrap();
        match msg {
            StreamMessage::Result { cost, duration_ms } => {
                let c = cost.unwrap();
                assert_eq!(c.input_tokens, 100);
                assert_eq!(c.output_tokens, 50);
                assert_eq!(duration_ms, Some(1200));
            }
            _ => panic!("expected result message"),
        }
    }

    #[test]
    fn recording_handler_accumulates_tool_sequence_and_text() {
        let mut handler = RecordingHandler::default();
        handler.on_tool_use("Read", &serde_json::Value::Null);
        handler.on_tool_use("Edit", &serde_json::Value::Null);
        handler.on_assistant_text("done.");
        handler.on_complete(
            Some(&CostInfo {
                input_tokens: 10,
                output_tokens: 5,
            }),
            Some(42),
        );

        assert_eq!(handler.tool_sequence, vec!["Read", "Edit"]);
        assert_eq!(handler.final_text, "done.");
        assert_eq!(handler.cost.unwrap().input_tokens, 10);
        assert_eq!(handler.duration_ms, Some(42));
    }
}
