//! Plain message types forwarded from the peer to the caller.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::content::ContentBlock;
use super::usage::Usage;

/// A plain (non-control) message emitted by the peer.
///
/// Known message kinds are decoded into typed variants; anything else is kept
/// verbatim in [`Message::Unknown`] so newer peers never lose records.
/// Unrecognized fields of known kinds are preserved in each struct's `extra`.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// System message (`init`, `compact_boundary`, status updates, ...).
    System(SystemMessage),
    /// Assistant response message.
    Assistant(AssistantMessage),
    /// User message (prompts echoed back, tool results).
    User(UserMessage),
    /// Partial streaming event.
    StreamEvent(StreamEventMessage),
    /// Terminal result of a turn.
    Result(ResultMessage),
    /// A record this crate does not model.
    Unknown(Value),
}

/// System message sent at session start and for out-of-band notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    /// Subtype of system message.
    pub subtype: String,
    /// Current working directory.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Session identifier.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Available tools.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Model being used.
    #[serde(default)]
    pub model: Option<String>,
    /// Permission mode.
    #[serde(default, rename = "permissionMode")]
    pub permission_mode: Option<String>,
    /// Claude Code version.
    #[serde(default)]
    pub claude_code_version: Option<String>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SystemMessage {
    /// Check if this is an init message.
    pub fn is_init(&self) -> bool {
        self.subtype == "init"
    }
}

/// Assistant response message containing model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// The message content.
    pub message: AssistantMessageContent,
    /// Tool use this message belongs to, for sub-agent output.
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    /// Session identifier.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Content of an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessageContent {
    /// Message ID. Several records may share one id when a step is split.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub role: String,
    /// Content blocks.
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    /// Token usage for this step.
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl AssistantMessageContent {
    /// Get all text content concatenated.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| block.text())
            .collect::<Vec<_>>()
            .join("")
    }

    /// Get all tool use blocks.
    pub fn tool_uses(&self) -> Vec<&super::content::ToolUseBlock> {
        self.content
            .iter()
            .filter_map(|block| block.as_tool_use())
            .collect()
    }
}

/// User message, either a prompt or tool results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub message: UserMessageContent,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Content of a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessageContent {
    #[serde(default)]
    pub role: String,
    pub content: UserContent,
}

/// User content is either a bare string or a list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl UserMessageContent {
    /// Get all tool result blocks.
    pub fn tool_results(&self) -> Vec<&super::content::ToolResultBlock> {
        match &self.content {
            UserContent::Text(_) => Vec::new(),
            UserContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| block.as_tool_result())
                .collect(),
        }
    }
}

/// Wrapper for partial streaming events. The inner event is forwarded as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEventMessage {
    pub event: Value,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
}

/// Terminal message of a turn, carrying the authoritative accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    /// `success` or one of the `error_*` subtypes.
    pub subtype: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub duration_api_ms: Option<u64>,
    #[serde(default)]
    pub num_turns: Option<u32>,
    /// Final text result.
    #[serde(default)]
    pub result: Option<String>,
    /// Total cost in USD.
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    /// Total token usage.
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResultMessage {
    /// Check if this is a success result.
    pub fn is_success(&self) -> bool {
        self.subtype == "success" && !self.is_error
    }

    /// Check if this is an error result (`error_max_turns`, `error_during_execution`, ...).
    pub fn is_error(&self) -> bool {
        self.subtype.starts_with("error") || self.is_error
    }

    /// Get the duration as a std::time::Duration.
    pub fn duration(&self) -> Option<std::time::Duration> {
        self.duration_ms.map(std::time::Duration::from_millis)
    }
}

impl Message {
    /// Decode a plain message, falling back to [`Message::Unknown`].
    ///
    /// A known `type` whose body does not fit the typed shape is also kept as
    /// `Unknown`; it is a forward-compatibility case, not a desync.
    pub fn from_value(value: Value) -> Self {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let decoded = match kind.as_str() {
            "system" => serde_json::from_value(value.clone()).map(Message::System),
            "assistant" => serde_json::from_value(value.clone()).map(Message::Assistant),
            "user" => serde_json::from_value(value.clone()).map(Message::User),
            "stream_event" => serde_json::from_value(value.clone()).map(Message::StreamEvent),
            "result" => serde_json::from_value(value.clone()).map(Message::Result),
            _ => return Message::Unknown(value),
        };
        decoded.unwrap_or_else(|e| {
            tracing::warn!(kind = %kind, error = %e, "message did not match its declared shape");
            Message::Unknown(value)
        })
    }

    /// Get the session ID if present.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Message::System(m) => m.session_id.as_deref(),
            Message::Assistant(m) => m.session_id.as_deref(),
            Message::User(m) => m.session_id.as_deref(),
            Message::StreamEvent(m) => m.session_id.as_deref(),
            Message::Result(m) => m.session_id.as_deref(),
            Message::Unknown(v) => v.get("session_id").and_then(Value::as_str),
        }
    }

    /// Wire `type` of the message.
    pub fn kind(&self) -> &str {
        match self {
            Message::System(_) => "system",
            Message::Assistant(_) => "assistant",
            Message::User(_) => "user",
            Message::StreamEvent(_) => "stream_event",
            Message::Result(_) => "result",
            Message::Unknown(v) => v.get("type").and_then(Value::as_str).unwrap_or("unknown"),
        }
    }

    /// Check if this is a system init message.
    pub fn is_system_init(&self) -> bool {
        matches!(self, Message::System(m) if m.is_init())
    }

    /// Check if this is a result message.
    pub fn is_result(&self) -> bool {
        matches!(self, Message::Result(_))
    }

    /// Get as assistant message.
    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Message::Assistant(m) => Some(m),
            _ => None,
        }
    }

    /// Get as result message.
    pub fn as_result(&self) -> Option<&ResultMessage> {
        match self {
            Message::Result(m) => Some(m),
            _ => None,
        }
    }
}
