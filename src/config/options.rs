//! Type-safe configuration options shared by the config builder and the
//! runtime control methods.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Model selection with escape hatch for new models.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    /// Claude Sonnet (balanced performance and cost).
    #[default]
    Sonnet,
    /// Claude Opus (highest capability).
    Opus,
    /// Claude Haiku (fastest, lowest cost).
    Haiku,
    /// Custom model identifier for new or specialized models.
    #[serde(untagged)]
    Custom(String),
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Model::Sonnet => write!(f, "sonnet"),
            Model::Opus => write!(f, "opus"),
            Model::Haiku => write!(f, "haiku"),
            Model::Custom(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Model {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "sonnet" => Model::Sonnet,
            "opus" => Model::Opus,
            "haiku" => Model::Haiku,
            _ => Model::Custom(s.to_string()),
        }
    }
}

impl From<String> for Model {
    fn from(s: String) -> Self {
        Model::from(s.as_str())
    }
}

/// Permission modes understood by the peer.
///
/// Sent as a CLI flag at spawn time and as the payload of the
/// `set_permission_mode` control request at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Ask before potentially dangerous operations.
    #[default]
    Default,
    /// Read-only planning, no tool execution.
    Plan,
    /// Auto-approve file edits, ask for other tools.
    AcceptEdits,
    /// Auto-approve everything.
    BypassPermissions,
    /// Deny anything that would otherwise prompt.
    DontAsk,
}

impl PermissionMode {
    /// Wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::Plan => "plan",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
            PermissionMode::DontAsk => "dontAsk",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Newtype for session IDs to prevent string mixups.
///
/// The peer owns the conversation; this id is only threaded through so a
/// caller can resume it later.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create a new SessionId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        SessionId(id.into())
    }

    /// Get the session ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True until the peer has reported a session.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        SessionId(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Built-in tool names, handy for hook matchers.
pub mod tools {
    pub const READ: &str = "Read";
    pub const WRITE: &str = "Write";
    pub const EDIT: &str = "Edit";
    pub const BASH: &str = "Bash";
    pub const GLOB: &str = "Glob";
    pub const GREP: &str = "Grep";
    pub const TASK: &str = "Task";
    pub const WEB_FETCH: &str = "WebFetch";
    pub const WEB_SEARCH: &str = "WebSearch";
    pub const TODO_WRITE: &str = "TodoWrite";
    pub const NOTEBOOK_EDIT: &str = "NotebookEdit";
}
