//! JSON protocol types for the Claude CLI control protocol.
//!
//! The peer writes newline-delimited JSON records on stdout and reads the same
//! framing on stdin. Every record carries a `type`:
//!
//! - `control_request` / `control_response` / `control_cancel_request`:
//!   correlated request traffic in both directions, see [`control`]
//! - `keep_alive`: ignored
//! - anything else: a plain [`Message`] forwarded to the caller
//!
//! # Example
//!
//! ```
//! use claude_query::protocol::{Message, Record};
//!
//! let value = serde_json::json!({
//!     "type": "assistant",
//!     "message": {"id": "msg_01", "role": "assistant", "content": [{"type": "text", "text": "Hello!"}]}
//! });
//!
//! if let Record::Message(Message::Assistant(assistant)) = Record::from_value(value) {
//!     assert_eq!(assistant.message.text(), "Hello!");
//! }
//! ```

pub mod control;
mod content;
mod messages;
mod records;
mod usage;

pub use content::{
    ContentBlock, ImageBlock, ImageSource, RedactedThinkingBlock, TextBlock, ThinkingBlock,
    ToolResultBlock, ToolResultContent, ToolResultContentBlock, ToolUseBlock,
};
pub use control::{
    AccountInfo, ControlRequest, ControlResponse, InitializationResult, McpServerStatus,
    McpSetServersResult, ModelInfo, PeerRequest, SlashCommand,
};
pub use messages::{
    AssistantMessage, AssistantMessageContent, Message, ResultMessage, StreamEventMessage,
    SystemMessage, UserContent, UserMessage, UserMessageContent,
};
pub use records::Record;
pub use usage::{Usage, UsageTracker};
