//! # claude-query
//!
//! Async Rust client for the Claude Code CLI's bidirectional control
//! protocol.
//!
//! The CLI runs as a child process speaking newline-delimited JSON on its
//! stdin and stdout. This library provides:
//! - A [`Query`] stream of typed [`Message`]s
//! - Control requests (`interrupt`, `set_model`, MCP management, ...)
//! - Hook callbacks with matcher-based dispatch
//! - Tool permission decisions through [`CanUseTool`]
//! - In-process tool servers reachable from the model
//!
//! ## Quick Start
//!
//! ```no_run
//! use claude_query::{ClaudeClient, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = ClaudeClient::new()?;
//!     let answer = client.ask("What is 2+2?").await?;
//!     println!("{answer}");
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming
//!
//! ```no_run
//! use futures::StreamExt;
//! use claude_query::{ClaudeClient, Message};
//!
//! # async fn example() -> claude_query::Result<()> {
//! let client = ClaudeClient::new()?;
//! let mut query = client.query("Write a poem").await?;
//! while let Some(message) = query.next().await {
//!     match message? {
//!         Message::Assistant(assistant) => print!("{}", assistant.message.text()),
//!         Message::Result(result) => println!("\ncost: {:?}", result.total_cost_usd),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Hooks and Permissions
//!
//! ```no_run
//! use claude_query::{
//!     BoxError, ClaudeClient, HookEvent, HookInput, HookMatcher, HookOutput, PermissionResult,
//!     ToolPermissionContext,
//! };
//! use serde_json::Value;
//!
//! # fn main() -> claude_query::Result<()> {
//! let client = ClaudeClient::builder()
//!     .hook(
//!         HookEvent::PreToolUse,
//!         HookMatcher::new("Bash").hook(|input: HookInput| async move {
//!             let command = input.tool_input().and_then(|i| i["command"].as_str());
//!             if command.is_some_and(|c| c.contains("rm -rf")) {
//!                 return Ok::<_, BoxError>(HookOutput::deny("destructive command"));
//!             }
//!             Ok(HookOutput::empty())
//!         }),
//!     )
//!     .can_use_tool(|tool: String, _input: Value, _ctx: ToolPermissionContext| async move {
//!         if tool == "Read" {
//!             Ok::<_, BoxError>(PermissionResult::allow())
//!         } else {
//!             Ok(PermissionResult::deny("read-only session"))
//!         }
//!     })
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod control;
mod error;
pub mod hooks;
pub mod permissions;
pub mod process;
pub mod protocol;
pub mod stream;
pub mod tools;

pub use error::{BoxError, Error, Result};

// Re-export the main client types at crate root
pub use client::{ClaudeClient, ClientBuilder};

// Re-export commonly used config types at crate root
pub use config::{Model, PermissionMode, QueryConfig, QueryConfigBuilder, SessionId};

// Re-export callback surfaces at crate root
pub use hooks::{HookCallback, HookEvent, HookInput, HookMatcher, HookOutput, Hooks};
pub use permissions::{CanUseTool, PermissionFallback, PermissionResult, ToolPermissionContext};
pub use tools::{Tool, ToolResult, ToolServer};

// Re-export commonly used protocol types at crate root
pub use protocol::{ContentBlock, Message, ResultMessage, Usage};

// Re-export commonly used stream types at crate root
pub use stream::{CollectedResponse, Prompt, Query, QueryController, QueryState, UserInput};
