//! In-process tools exposed to the peer.
//!
//! A [`ToolServer`] groups [`Tool`]s under a name. Servers registered in the
//! query config are announced during `initialize`; the peer then lists and
//! calls their tools with JSON-RPC carried in `mcp_message` control requests.
//! The model sees each tool as `mcp__<server>__<tool>`.

mod jsonrpc;
mod proxy;
mod server;
mod tool;

pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use proxy::ToolProxy;
pub use server::ToolServer;
pub use tool::{Tool, ToolContent, ToolResult};
