//! Tool calls requested by the agent
//!
//! The multiplexer hands each `TOOL_CALL` to a [`ToolHandler`] and writes
//! back whatever text it returns. Handlers never fail: errors are part of
//! the reply.

pub mod bridge;
pub mod vision;

use crate::protocol::ToolCall;

pub use bridge::ToolCallBridge;
pub use vision::{Detection, DisabledVision, ObjectDetector, ObjectIdentifier, RankedMatch};

/// Executes one tool call and produces the `TOOL_RESPONSE` result text.
///
/// Called from the blocking pool; may take as long as it needs.
pub trait ToolHandler: Send + Sync {
    fn handle(&self, call: &ToolCall) -> String;
}

impl<F> ToolHandler for F
where
    F: Fn(&ToolCall) -> String + Send + Sync,
{
    fn handle(&self, call: &ToolCall) -> String {
        self(call)
    }
}
