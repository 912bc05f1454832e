//! Routing tool traffic from the peer to in-process servers.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::server::ToolServer;
use super::tool::ToolResult;
use crate::{Error, Result};

/// Prefix the peer adds to tools of MCP servers.
const MCP_PREFIX: &str = "mcp__";

/// Routes `mcp_message` requests and qualified tool calls to servers.
#[derive(Debug, Clone, Default)]
pub struct ToolProxy {
    servers: HashMap<String, Arc<ToolServer>>,
}

impl ToolProxy {
    pub fn new(servers: impl IntoIterator<Item = Arc<ToolServer>>) -> Self {
        Self {
            servers: servers
                .into_iter()
                .map(|server| (server.name().to_string(), server))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Server names, sorted, for the `initialize` request.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Answer an `mcp_message` request with the server's JSON-RPC response.
    pub async fn handle_message(&self, server_name: &str, message: Value) -> Result<Value> {
        let server = self
            .servers
            .get(server_name)
            .ok_or_else(|| Error::UnknownServer {
                name: server_name.to_string(),
            })?;
        Ok(server.handle_message(message).await)
    }

    /// Call a tool by qualified name (`server__tool` or `mcp__server__tool`).
    pub async fn call(&self, qualified_name: &str, args: Value) -> Result<ToolResult> {
        let unknown = || Error::UnknownTool {
            name: qualified_name.to_string(),
        };
        let name = qualified_name
            .strip_prefix(MCP_PREFIX)
            .unwrap_or(qualified_name);
        let (server_name, tool_name) = name.split_once("__").ok_or_else(unknown)?;
        let server = self.servers.get(server_name).ok_or_else(unknown)?;
        server.call_tool(tool_name, args).await.map_err(|_| unknown())
    }
}
