//! A cloneable handle for a query's control requests.

use std::sync::Arc;

use serde_json::Value;

use crate::config::{Model, PermissionMode, SessionId};
use crate::control::ControlChannel;
use crate::protocol::{ControlRequest, McpServerStatus, McpSetServersResult};
use crate::{Error, Result};

/// Issues control requests on a running [`Query`](super::Query).
///
/// Obtained from [`Query::controller`](super::Query::controller). The
/// handle does not borrow the query, so one task can call [`interrupt`]
/// while another is waiting for the next message. Once the query closes,
/// every method fails with [`Error::PeerClosed`].
///
/// [`interrupt`]: QueryController::interrupt
#[derive(Clone)]
pub struct QueryController {
    channel: Arc<ControlChannel>,
}

impl QueryController {
    pub(crate) fn new(channel: Arc<ControlChannel>) -> Self {
        Self { channel }
    }

    /// Interrupt the current turn.
    pub async fn interrupt(&self) -> Result<()> {
        self.control(ControlRequest::Interrupt).await.map(drop)
    }

    /// Switch model. `None` restores the default.
    pub async fn set_model(&self, model: Option<Model>) -> Result<()> {
        self.control(ControlRequest::SetModel {
            model: model.map(|m| m.to_string()),
        })
        .await
        .map(drop)
    }

    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<()> {
        self.control(ControlRequest::SetPermissionMode { mode })
            .await
            .map(drop)
    }

    /// Limit thinking tokens. `None` removes the limit.
    pub async fn set_max_thinking_tokens(&self, tokens: Option<u32>) -> Result<()> {
        self.control(ControlRequest::SetMaxThinkingTokens {
            max_thinking_tokens: tokens,
        })
        .await
        .map(drop)
    }

    pub async fn mcp_server_status(&self) -> Result<Vec<McpServerStatus>> {
        let response = self.control(ControlRequest::McpStatus).await?;
        let servers = response
            .get("mcpServers")
            .cloned()
            .ok_or_else(|| Error::UnexpectedResponse(format!("mcp_status without mcpServers: {response}")))?;
        serde_json::from_value(servers).map_err(|e| Error::UnexpectedResponse(e.to_string()))
    }

    /// Reconnect an MCP server. An unknown name is an [`Error::Peer`].
    pub async fn reconnect_mcp_server(&self, server_name: &str) -> Result<()> {
        self.control(ControlRequest::McpReconnect {
            server_name: server_name.to_string(),
        })
        .await
        .map(drop)
    }

    pub async fn toggle_mcp_server(&self, server_name: &str, enabled: bool) -> Result<()> {
        self.control(ControlRequest::McpToggle {
            server_name: server_name.to_string(),
            enabled,
        })
        .await
        .map(drop)
    }

    /// Replace the dynamically configured MCP servers.
    pub async fn set_mcp_servers(&self, servers: Value) -> Result<McpSetServersResult> {
        let response = self
            .control(ControlRequest::McpSetServers { servers })
            .await?;
        serde_json::from_value(response).map_err(|e| Error::UnexpectedResponse(e.to_string()))
    }

    /// Restore working files to the checkpoint of a user message.
    ///
    /// Unlike the other methods this is not a round trip: the peer-side
    /// mechanism is undocumented, so it always fails locally with
    /// [`Error::NotImplemented`] and nothing is written to the peer.
    pub async fn rewind_files(&self, user_message_id: &str) -> Result<()> {
        tracing::debug!(user_message_id, "rewind_files is not supported");
        Err(Error::NotImplemented("rewind_files"))
    }

    /// Send a control request by subtype. Escape hatch for newer peers.
    pub async fn send_control_request(&self, kind: &str, payload: Value) -> Result<Value> {
        self.ensure_open()?;
        self.channel.send_control_request(kind, payload).await
    }

    /// Session id reported by the peer, for later resumption.
    pub fn session_id(&self) -> Option<SessionId> {
        self.channel.session_id()
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    async fn control(&self, request: ControlRequest) -> Result<Value> {
        self.ensure_open()?;
        self.channel.send(request).await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::peer_closed("query closed"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for QueryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryController")
            .field("channel", &self.channel)
            .finish()
    }
}
