//! In-process tool servers.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use super::jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
use super::tool::{Tool, ToolCallError, ToolResult};
use crate::{Error, Result};

/// A named set of tools the peer reaches through `mcp_message` requests.
///
/// ```
/// use claude_query::tools::{Tool, ToolResult, ToolServer};
///
/// let server = ToolServer::new("greeter").version("2.0.0").tool(Tool::new(
///     "greet",
///     "Greet someone",
///     serde_json::json!({"type": "object", "properties": {"name": {"type": "string"}}}),
///     |args: serde_json::Map<String, serde_json::Value>| async move {
///         let name = args.get("name").and_then(|v| v.as_str()).unwrap_or("world");
///         Ok::<_, claude_query::BoxError>(ToolResult::text(format!("Hello, {name}!")))
///     },
/// ));
/// assert_eq!(server.tool_names(), vec!["greet"]);
/// ```
#[derive(Debug, Clone)]
pub struct ToolServer {
    name: String,
    version: String,
    tools: BTreeMap<String, Tool>,
}

impl ToolServer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            tools: BTreeMap::new(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_version(&self) -> &str {
        &self.version
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Call a tool by its local name.
    ///
    /// Bad arguments and handler failures come back as error results for the
    /// model; only an unknown tool is an `Err`.
    pub async fn call_tool(&self, tool_name: &str, args: Value) -> Result<ToolResult> {
        let tool = self.tools.get(tool_name).ok_or_else(|| Error::UnknownTool {
            name: format!("{}__{}", self.name, tool_name),
        })?;
        match tool.invoke(args).await {
            Ok(result) => Ok(result),
            Err(ToolCallError::InvalidArguments(message)) => {
                let err = Error::InvalidArguments {
                    tool: tool_name.to_string(),
                    message,
                };
                tracing::debug!(server = %self.name, error = %err, "rejected tool call");
                Ok(ToolResult::error(err.to_string()))
            }
            Err(ToolCallError::Failed(e)) => {
                tracing::debug!(server = %self.name, tool = tool_name, error = %e, "tool handler failed");
                Ok(ToolResult::error(e.to_string()))
            }
        }
    }

    /// Answer one JSON-RPC message.
    pub async fn handle_message(&self, message: Value) -> Value {
        let request: JsonRpcRequest = match serde_json::from_value(message) {
            Ok(request) => request,
            Err(e) => {
                return to_value(JsonRpcResponse::error(
                    Value::Null,
                    JsonRpcError::invalid_request(e.to_string()),
                ))
            }
        };
        let id = request.id.clone().unwrap_or(Value::Null);

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": self.name, "version": self.version},
                }),
            ),
            "notifications/initialized" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => {
                let tools: Vec<Value> = self.tools.values().map(Tool::to_tool_info).collect();
                JsonRpcResponse::success(id, json!({ "tools": tools }))
            }
            "tools/call" => self.handle_tools_call(id, request.params).await,
            other => JsonRpcResponse::error(id, JsonRpcError::method_not_found(other)),
        };
        to_value(response)
    }

    async fn handle_tools_call(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params = params.unwrap_or(Value::Null);
        let Some(tool_name) = params.get("name").and_then(Value::as_str) else {
            return JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_params("tools/call requires a tool name"),
            );
        };
        let args = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));

        match self.call_tool(tool_name, args).await {
            Ok(result) => JsonRpcResponse::success(id, to_value(result)),
            Err(e) => JsonRpcResponse::error(id, JsonRpcError::invalid_params(e.to_string())),
        }
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoxError;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct AddArgs {
        a: i64,
        b: i64,
    }

    fn calc() -> ToolServer {
        ToolServer::new("calc")
            .tool(Tool::new(
                "add",
                "Add two integers",
                json!({"type": "object", "required": ["a", "b"]}),
                |args: AddArgs| async move {
                    Ok::<_, BoxError>(ToolResult::text((args.a + args.b).to_string()))
                },
            ))
            .tool(Tool::new(
                "fail",
                "Always fails",
                json!({"type": "object"}),
                |_args: Value| async move { Err::<ToolResult, BoxError>("disk full".into()) },
            ))
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let response = calc()
            .handle_message(json!({"jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {}}))
            .await;
        assert_eq!(response["result"]["serverInfo"]["name"], "calc");
        assert_eq!(response["result"]["protocolVersion"], MCP_PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn tools_list_is_sorted() {
        let response = calc()
            .handle_message(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
            .await;
        let names: Vec<_> = response["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["add", "fail"]);
    }

    #[tokio::test]
    async fn tools_call_returns_handler_content_unchanged() {
        let response = calc()
            .handle_message(json!({
                "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                "params": {"name": "add", "arguments": {"a": 2, "b": 3}}
            }))
            .await;
        assert_eq!(response["id"], 2);
        assert_eq!(response["result"], json!({"content": [{"type": "text", "text": "5"}]}));
    }

    #[tokio::test]
    async fn invalid_arguments_and_failures_are_error_content() {
        let server = calc();
        let result = server.call_tool("add", json!({"a": "two"})).await.unwrap();
        assert!(result.is_error);

        let result = server.call_tool("fail", json!({})).await.unwrap();
        assert_eq!(result, ToolResult::error("disk full"));
    }

    #[tokio::test]
    async fn unknown_tool_and_method() {
        let server = calc();
        assert!(matches!(
            server.call_tool("mul", json!({})).await,
            Err(Error::UnknownTool { name }) if name == "calc__mul"
        ));

        let response = server
            .handle_message(json!({
                "jsonrpc": "2.0", "id": 3, "method": "tools/call",
                "params": {"name": "mul", "arguments": {}}
            }))
            .await;
        assert_eq!(response["error"]["code"], -32602);

        let response = server
            .handle_message(json!({"jsonrpc": "2.0", "id": 4, "method": "resources/list"}))
            .await;
        assert_eq!(response["error"]["code"], -32601);
    }
}
