//! Control request and response payloads.
//!
//! Outbound requests are initiated by this side (`initialize`, `interrupt`,
//! `set_model`, ...). Inbound requests are initiated by the peer and must be
//! answered exactly once (`hook_callback`, `can_use_tool`, `mcp_message`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::PermissionMode;

/// A request this side sends to the peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Handshake: registers hook handles and in-process tool servers.
    Initialize {
        #[serde(skip_serializing_if = "Option::is_none")]
        hooks: Option<Value>,
        #[serde(rename = "sdkMcpServers", skip_serializing_if = "Vec::is_empty")]
        sdk_mcp_servers: Vec<String>,
    },
    Interrupt,
    SetModel {
        model: Option<String>,
    },
    SetPermissionMode {
        mode: PermissionMode,
    },
    SetMaxThinkingTokens {
        max_thinking_tokens: Option<u32>,
    },
    McpStatus,
    McpReconnect {
        #[serde(rename = "serverName")]
        server_name: String,
    },
    McpToggle {
        #[serde(rename = "serverName")]
        server_name: String,
        enabled: bool,
    },
    McpSetServers {
        servers: Value,
    },
}

impl ControlRequest {
    /// Wire subtype, used for logging.
    pub fn subtype(&self) -> &'static str {
        match self {
            ControlRequest::Initialize { .. } => "initialize",
            ControlRequest::Interrupt => "interrupt",
            ControlRequest::SetModel { .. } => "set_model",
            ControlRequest::SetPermissionMode { .. } => "set_permission_mode",
            ControlRequest::SetMaxThinkingTokens { .. } => "set_max_thinking_tokens",
            ControlRequest::McpStatus => "mcp_status",
            ControlRequest::McpReconnect { .. } => "mcp_reconnect",
            ControlRequest::McpToggle { .. } => "mcp_toggle",
            ControlRequest::McpSetServers { .. } => "mcp_set_servers",
        }
    }
}

/// A request initiated by the peer.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerRequest {
    /// Invoke the hook callbacks registered under a handle.
    HookCallback {
        callback_id: String,
        input: Value,
        tool_use_id: Option<String>,
    },
    /// Ask whether a tool may run.
    CanUseTool {
        tool_name: String,
        input: Value,
        permission_suggestions: Vec<Value>,
        blocked_path: Option<String>,
        tool_use_id: Option<String>,
    },
    /// A JSON-RPC message for an in-process tool server.
    McpMessage { server_name: String, message: Value },
    /// A subtype this side does not handle; answered with an error.
    Other { subtype: String, raw: Value },
}

#[derive(Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
enum KnownPeerRequest {
    HookCallback {
        callback_id: String,
        #[serde(default)]
        input: Value,
        #[serde(default)]
        tool_use_id: Option<String>,
    },
    CanUseTool {
        tool_name: String,
        #[serde(default)]
        input: Value,
        #[serde(default)]
        permission_suggestions: Option<Vec<Value>>,
        #[serde(default)]
        blocked_path: Option<String>,
        #[serde(default)]
        tool_use_id: Option<String>,
    },
    McpMessage {
        server_name: String,
        message: Value,
    },
}

impl PeerRequest {
    /// Decode the `request` body of an inbound control request.
    ///
    /// Never fails: unknown or malformed bodies become [`PeerRequest::Other`]
    /// so the request can still be answered.
    pub fn from_value(raw: Value) -> Self {
        let subtype = raw
            .get("subtype")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match serde_json::from_value::<KnownPeerRequest>(raw.clone()) {
            Ok(KnownPeerRequest::HookCallback {
                callback_id,
                input,
                tool_use_id,
            }) => PeerRequest::HookCallback {
                callback_id,
                input,
                tool_use_id,
            },
            Ok(KnownPeerRequest::CanUseTool {
                tool_name,
                input,
                permission_suggestions,
                blocked_path,
                tool_use_id,
            }) => PeerRequest::CanUseTool {
                tool_name,
                input,
                permission_suggestions: permission_suggestions.unwrap_or_default(),
                blocked_path,
                tool_use_id,
            },
            Ok(KnownPeerRequest::McpMessage {
                server_name,
                message,
            }) => PeerRequest::McpMessage {
                server_name,
                message,
            },
            Err(_) => PeerRequest::Other { subtype, raw },
        }
    }

    /// Wire subtype, used for logging.
    pub fn subtype(&self) -> &str {
        match self {
            PeerRequest::HookCallback { .. } => "hook_callback",
            PeerRequest::CanUseTool { .. } => "can_use_tool",
            PeerRequest::McpMessage { .. } => "mcp_message",
            PeerRequest::Other { subtype, .. } => subtype,
        }
    }
}

/// The peer's answer to one of our control requests.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlResponse {
    pub request_id: String,
    /// Success payload or the peer's error message.
    pub outcome: std::result::Result<Value, String>,
}

/// Envelope for an outbound control request.
pub(crate) fn request_envelope(request_id: &str, request: Value) -> Value {
    serde_json::json!({
        "type": "control_request",
        "request_id": request_id,
        "request": request,
    })
}

/// Envelope answering a peer-initiated request.
pub(crate) fn response_envelope(request_id: &str, outcome: std::result::Result<Value, String>) -> Value {
    let response = match outcome {
        Ok(payload) => serde_json::json!({
            "subtype": "success",
            "request_id": request_id,
            "response": payload,
        }),
        Err(message) => serde_json::json!({
            "subtype": "error",
            "request_id": request_id,
            "error": message,
        }),
    };
    serde_json::json!({"type": "control_response", "response": response})
}

/// Payload returned by the `initialize` handshake.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InitializationResult {
    pub commands: Vec<SlashCommand>,
    pub models: Vec<ModelInfo>,
    pub account: Option<AccountInfo>,
    #[serde(alias = "outputStyle")]
    pub output_style: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A slash command the peer supports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SlashCommand {
    pub name: String,
    pub description: String,
    pub argument_hint: String,
}

/// A model the peer can switch to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelInfo {
    pub value: String,
    pub display_name: String,
    pub description: String,
}

/// Account details reported during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccountInfo {
    pub email: Option<String>,
    pub organization: Option<String>,
    pub subscription_type: Option<String>,
    pub token_source: Option<String>,
    pub api_key_source: Option<String>,
}

/// Status of one MCP server as reported by `mcp_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerStatus {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub server_info: Option<Value>,
}

/// Result of replacing the dynamic MCP server set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McpSetServersResult {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub errors: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_requests_use_wire_field_names() {
        let value = serde_json::to_value(ControlRequest::McpToggle {
            server_name: "db".into(),
            enabled: false,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"subtype": "mcp_toggle", "serverName": "db", "enabled": false})
        );

        let value = serde_json::to_value(ControlRequest::SetPermissionMode {
            mode: PermissionMode::AcceptEdits,
        })
        .unwrap();
        assert_eq!(value, json!({"subtype": "set_permission_mode", "mode": "acceptEdits"}));

        let value = serde_json::to_value(ControlRequest::Interrupt).unwrap();
        assert_eq!(value, json!({"subtype": "interrupt"}));
    }

    #[test]
    fn initialize_omits_empty_registrations() {
        let value = serde_json::to_value(ControlRequest::Initialize {
            hooks: None,
            sdk_mcp_servers: Vec::new(),
        })
        .unwrap();
        assert_eq!(value, json!({"subtype": "initialize"}));
    }

    #[test]
    fn decode_can_use_tool() {
        let request = PeerRequest::from_value(json!({
            "subtype": "can_use_tool",
            "tool_name": "Bash",
            "input": {"command": "ls"},
            "permission_suggestions": [{"type": "addRules"}],
            "tool_use_id": "toolu_1"
        }));
        assert_eq!(
            request,
            PeerRequest::CanUseTool {
                tool_name: "Bash".into(),
                input: json!({"command": "ls"}),
                permission_suggestions: vec![json!({"type": "addRules"})],
                blocked_path: None,
                tool_use_id: Some("toolu_1".into()),
            }
        );
    }

    #[test]
    fn unknown_subtype_is_kept() {
        let raw = json!({"subtype": "elicitation", "message": "?"});
        let request = PeerRequest::from_value(raw.clone());
        assert_eq!(request.subtype(), "elicitation");
        assert_eq!(
            request,
            PeerRequest::Other {
                subtype: "elicitation".into(),
                raw
            }
        );
    }

    #[test]
    fn response_envelopes() {
        assert_eq!(
            response_envelope("r1", Ok(json!({"ok": true}))),
            json!({
                "type": "control_response",
                "response": {"subtype": "success", "request_id": "r1", "response": {"ok": true}}
            })
        );
        assert_eq!(
            response_envelope("r2", Err("nope".into()))["response"],
            json!({"subtype": "error", "request_id": "r2", "error": "nope"})
        );
    }

    #[test]
    fn initialization_result_tolerates_missing_fields() {
        let init: InitializationResult = serde_json::from_value(json!({
            "commands": [{"name": "compact", "description": "Compact", "argumentHint": ""}],
            "output_style": "default"
        }))
        .unwrap();
        assert_eq!(init.commands[0].name, "compact");
        assert!(init.models.is_empty());
        assert_eq!(init.output_style.as_deref(), Some("default"));
    }
}
