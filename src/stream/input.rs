//! Input sent to the peer.

use serde_json::{json, Value};

use crate::config::SessionId;
use crate::protocol::{ContentBlock, UserContent};

/// How a query receives its input.
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    /// One prompt. Input closes after the first `result`.
    Text(String),
    /// Input is pushed later with [`Query::send`](super::Query::send) or
    /// [`Query::stream_input`](super::Query::stream_input).
    Streaming,
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Prompt::Text(text.to_string())
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Prompt::Text(text)
    }
}

/// One user turn written to the peer's input.
#[derive(Debug, Clone, PartialEq)]
pub struct UserInput {
    pub content: UserContent,
    pub parent_tool_use_id: Option<String>,
}

impl UserInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: UserContent::Text(text.into()),
            parent_tool_use_id: None,
        }
    }

    /// A turn made of content blocks (text, images, ...).
    pub fn blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            content: UserContent::Blocks(blocks),
            parent_tool_use_id: None,
        }
    }

    pub fn with_parent_tool_use_id(mut self, id: impl Into<String>) -> Self {
        self.parent_tool_use_id = Some(id.into());
        self
    }

    /// Wire record. The session id is empty until the peer reports one.
    pub fn to_wire(&self, session_id: Option<&SessionId>) -> Value {
        json!({
            "type": "user",
            "session_id": session_id.map(SessionId::as_str).unwrap_or_default(),
            "message": {"role": "user", "content": self.content},
            "parent_tool_use_id": self.parent_tool_use_id,
        })
    }
}

impl From<&str> for UserInput {
    fn from(text: &str) -> Self {
        UserInput::text(text)
    }
}

impl From<String> for UserInput {
    fn from(text: String) -> Self {
        UserInput::text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_turn_wire_shape() {
        assert_eq!(
            UserInput::text("hi").to_wire(None),
            json!({
                "type": "user",
                "session_id": "",
                "message": {"role": "user", "content": "hi"},
                "parent_tool_use_id": null
            })
        );
    }

    #[test]
    fn session_and_blocks_are_threaded_through() {
        let session = SessionId::new("sess_1");
        let wire = UserInput::blocks(vec![ContentBlock::text_block("look")])
            .with_parent_tool_use_id("toolu_9")
            .to_wire(Some(&session));
        assert_eq!(wire["session_id"], "sess_1");
        assert_eq!(wire["parent_tool_use_id"], "toolu_9");
        assert_eq!(wire["message"]["content"][0]["type"], "text");
        assert_eq!(wire["message"]["content"][0]["text"], "look");
    }
}
