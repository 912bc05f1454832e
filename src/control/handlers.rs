//! Answers to peer-initiated control requests.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::hooks::{Diagnostics, HookDispatcher, HookEvent};
use crate::permissions::{PermissionBroker, ToolPermissionContext};
use crate::protocol::PeerRequest;
use crate::tools::ToolProxy;
use crate::{Error, Result};

/// Routes `hook_callback`, `can_use_tool` and `mcp_message` requests.
///
/// Registrations are fixed at construction; handlers run concurrently.
#[derive(Debug)]
pub struct PeerHandlers {
    hooks: HookDispatcher,
    permissions: PermissionBroker,
    tools: ToolProxy,
    diagnostics: Arc<Diagnostics>,
}

impl PeerHandlers {
    pub fn new(
        hooks: HookDispatcher,
        permissions: PermissionBroker,
        tools: ToolProxy,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            hooks,
            permissions,
            tools,
            diagnostics,
        }
    }

    pub fn hooks(&self) -> &HookDispatcher {
        &self.hooks
    }

    pub fn tools(&self) -> &ToolProxy {
        &self.tools
    }

    /// Produce the success payload for a peer request.
    ///
    /// An `Err` becomes an error response; it never ends the channel.
    pub async fn handle(&self, request: PeerRequest) -> Result<Value> {
        match request {
            PeerRequest::HookCallback {
                callback_id,
                input,
                tool_use_id,
            } => {
                let tool_use_id = tool_use_id.or_else(|| {
                    input
                        .get("tool_use_id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                });
                let outcome = self
                    .hooks
                    .invoke(&callback_id, input, tool_use_id.clone())
                    .await?;
                for failure in outcome.failures {
                    self.diagnostics.record(failure);
                }
                if let Some(id) = &tool_use_id {
                    match outcome.event {
                        HookEvent::PreToolUse => {
                            self.permissions.record_hook_decision(id, &outcome.output)
                        }
                        HookEvent::PostToolUse | HookEvent::PostToolUseFailure => {
                            self.permissions.forget_hook_decision(id)
                        }
                        _ => {}
                    }
                }
                serde_json::to_value(&outcome.output).map_err(Error::Json)
            }
            PeerRequest::CanUseTool {
                tool_name,
                input,
                permission_suggestions,
                blocked_path,
                tool_use_id,
            } => {
                let context = ToolPermissionContext {
                    suggestions: permission_suggestions,
                    blocked_path,
                    tool_use_id,
                };
                let result = self.permissions.decide(&tool_name, &input, &context).await?;
                tracing::debug!(tool = %tool_name, allow = result.is_allow(), "permission decided");
                Ok(result.to_wire(&input))
            }
            PeerRequest::McpMessage {
                server_name,
                message,
            } => {
                let response = self.tools.handle_message(&server_name, message).await?;
                Ok(json!({ "mcp_response": response }))
            }
            PeerRequest::Other { subtype, .. } => Err(Error::Callback {
                message: format!("unsupported control request subtype: {subtype}"),
            }),
        }
    }
}
