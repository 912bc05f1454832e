//! Hook events, inputs and outputs.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::BoxError;

/// Lifecycle events the peer can raise hooks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HookEvent {
    PreToolUse,
    PostToolUse,
    PostToolUseFailure,
    Notification,
    UserPromptSubmit,
    SessionStart,
    SessionEnd,
    Stop,
    SubagentStart,
    SubagentStop,
    PreCompact,
    PermissionRequest,
}

impl HookEvent {
    /// Wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::PreToolUse => "PreToolUse",
            HookEvent::PostToolUse => "PostToolUse",
            HookEvent::PostToolUseFailure => "PostToolUseFailure",
            HookEvent::Notification => "Notification",
            HookEvent::UserPromptSubmit => "UserPromptSubmit",
            HookEvent::SessionStart => "SessionStart",
            HookEvent::SessionEnd => "SessionEnd",
            HookEvent::Stop => "Stop",
            HookEvent::SubagentStart => "SubagentStart",
            HookEvent::SubagentStop => "SubagentStop",
            HookEvent::PreCompact => "PreCompact",
            HookEvent::PermissionRequest => "PermissionRequest",
        }
    }

    /// Input field a matcher is tested against, if the event has one.
    ///
    /// Events without such a field run every registered group.
    pub fn match_field(&self) -> Option<&'static str> {
        match self {
            HookEvent::PreToolUse
            | HookEvent::PostToolUse
            | HookEvent::PostToolUseFailure
            | HookEvent::PermissionRequest => Some("tool_name"),
            HookEvent::SessionStart => Some("source"),
            HookEvent::SessionEnd => Some("reason"),
            HookEvent::PreCompact => Some("trigger"),
            HookEvent::Notification => Some("notification_type"),
            HookEvent::SubagentStart => Some("agent_type"),
            HookEvent::UserPromptSubmit | HookEvent::Stop | HookEvent::SubagentStop => None,
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input passed to a hook callback.
#[derive(Debug, Clone, PartialEq)]
pub struct HookInput {
    pub event: HookEvent,
    /// Tool use the event refers to, for tool events.
    pub tool_use_id: Option<String>,
    /// The peer's full input object (`tool_name`, `tool_input`, `session_id`, ...).
    pub payload: Value,
}

impl HookInput {
    pub fn new(event: HookEvent, payload: Value, tool_use_id: Option<String>) -> Self {
        Self {
            event,
            tool_use_id,
            payload,
        }
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.payload.get("tool_name").and_then(Value::as_str)
    }

    pub fn tool_input(&self) -> Option<&Value> {
        self.payload.get("tool_input")
    }

    pub fn session_id(&self) -> Option<&str> {
        self.payload.get("session_id").and_then(Value::as_str)
    }

    /// Value the event's matchers are tested against.
    pub fn match_target(&self) -> Option<&str> {
        self.event
            .match_field()
            .and_then(|field| self.payload.get(field))
            .and_then(Value::as_str)
    }
}

/// Top-level decision of a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookDecision {
    Approve,
    Block,
}

/// Permission decision carried in `hookSpecificOutput`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    Allow,
    Deny,
    Ask,
}

/// Event-specific part of a hook's output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSpecificOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_event_name: Option<HookEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<PermissionDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
}

/// Output returned by a hook callback, in the peer's wire shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<HookDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<HookSpecificOutput>,
}

impl HookOutput {
    /// An output that changes nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Allow the tool call.
    pub fn allow() -> Self {
        Self::empty().with_permission(PermissionDecision::Allow, None)
    }

    /// Deny the tool call with a reason shown to the model.
    pub fn deny(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            decision: Some(HookDecision::Block),
            reason: Some(reason.clone()),
            ..Self::empty()
        }
        .with_permission(PermissionDecision::Deny, Some(reason))
    }

    /// Stop the session after this hook.
    pub fn stop(reason: impl Into<String>) -> Self {
        Self {
            continue_: Some(false),
            stop_reason: Some(reason.into()),
            ..Self::empty()
        }
    }

    pub fn with_permission(mut self, decision: PermissionDecision, reason: Option<String>) -> Self {
        let specific = self.hook_specific_output.get_or_insert_with(Default::default);
        specific.permission_decision = Some(decision);
        specific.permission_decision_reason = reason;
        self
    }

    /// Replace the tool input.
    pub fn with_updated_input(mut self, input: Value) -> Self {
        self.hook_specific_output
            .get_or_insert_with(Default::default)
            .updated_input = Some(input);
        self
    }

    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    /// Extra context handed to the model.
    pub fn with_additional_context(mut self, context: impl Into<String>) -> Self {
        self.hook_specific_output
            .get_or_insert_with(Default::default)
            .additional_context = Some(context.into());
        self
    }

    /// True when the output blocks or denies the action.
    pub fn is_deny(&self) -> bool {
        self.decision == Some(HookDecision::Block)
            || self.permission_decision() == Some(PermissionDecision::Deny)
    }

    pub fn permission_decision(&self) -> Option<PermissionDecision> {
        self.hook_specific_output
            .as_ref()
            .and_then(|s| s.permission_decision)
    }

    pub fn updated_input(&self) -> Option<&Value> {
        self.hook_specific_output
            .as_ref()
            .and_then(|s| s.updated_input.as_ref())
    }

    /// Reason attached to a deny, if any.
    pub fn deny_reason(&self) -> Option<&str> {
        self.hook_specific_output
            .as_ref()
            .and_then(|s| s.permission_decision_reason.as_deref())
            .or(self.reason.as_deref())
    }
}

/// A user hook callback.
///
/// Implemented for any `Fn(HookInput) -> impl Future<Output = Result<HookOutput, BoxError>>`.
#[async_trait]
pub trait HookCallback: Send + Sync {
    async fn call(&self, input: HookInput) -> std::result::Result<HookOutput, BoxError>;
}

#[async_trait]
impl<F, Fut> HookCallback for F
where
    F: Fn(HookInput) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<HookOutput, BoxError>> + Send,
{
    async fn call(&self, input: HookInput) -> std::result::Result<HookOutput, BoxError> {
        (self)(input).await
    }
}
