//! Agent invocation: the `AgentRunner` capability-set and its
//! implementations (§1, §9).

mod fakes;
mod output;
mod runner;
mod subprocess;

pub use fakes::FakeAgentRunner;
pub use output::{
    AssistantMessage, CostInfo, OutputStreamer, RecordingHandler, StreamHandler, StreamMessage,
};
pub use runner::{AgentOutcome, AgentRunner, AgentStatus, AgentTaskContext, CancelSignal};
pub use subprocess::SubprocessAgentRunner;
