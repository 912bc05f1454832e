//! High-level client for running queries.
//!
//! [`ClaudeClient`] holds a validated [`QueryConfig`] and starts a fresh
//! [`Query`] per call. It is cheap to clone and safe to share across tasks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Model, PermissionMode, QueryConfig, QueryConfigBuilder, SessionId};
use crate::hooks::{HookEvent, HookMatcher, Hooks};
use crate::permissions::{CanUseTool, PermissionFallback};
use crate::stream::{CollectedResponse, Prompt, Query};
use crate::tools::ToolServer;
use crate::Result;

/// Entry point for talking to a Claude CLI peer.
///
/// # Example
///
/// ```no_run
/// use claude_query::ClaudeClient;
///
/// # async fn example() -> claude_query::Result<()> {
/// let client = ClaudeClient::new()?;
/// let answer = client.ask("What is 2+2?").await?;
/// println!("{answer}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ClaudeClient {
    config: Arc<QueryConfig>,
}

impl ClaudeClient {
    /// Create a client with default settings.
    ///
    /// The CLI is located on `PATH` when the first query spawns.
    pub fn new() -> Result<Self> {
        Ok(Self::with_config(QueryConfig::builder().build()?))
    }

    /// Create a client from an existing configuration.
    pub fn with_config(config: QueryConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Create a builder for configuring the client.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use claude_query::{ClaudeClient, Model, PermissionMode};
    ///
    /// # fn main() -> claude_query::Result<()> {
    /// let client = ClaudeClient::builder()
    ///     .model(Model::Opus)
    ///     .permission_mode(PermissionMode::AcceptEdits)
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Start a one-shot query.
    ///
    /// Input closes once the peer answers the prompt; the returned
    /// [`Query`] yields every message up to and including the `result`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use futures::StreamExt;
    /// # use claude_query::ClaudeClient;
    ///
    /// # async fn example(client: ClaudeClient) -> claude_query::Result<()> {
    /// let mut query = client.query("Write a haiku").await?;
    /// while let Some(message) = query.next().await {
    ///     if let Some(assistant) = message?.as_assistant() {
    ///         print!("{}", assistant.message.text());
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn query(&self, prompt: impl Into<String>) -> Result<Query> {
        Query::spawn(&self.config, Prompt::Text(prompt.into())).await
    }

    /// Start a query whose input is pushed later with
    /// [`Query::send`] or [`Query::stream_input`].
    pub async fn query_stream(&self) -> Result<Query> {
        Query::spawn(&self.config, Prompt::Streaming).await
    }

    /// Run a prompt to completion and return the assistant text.
    ///
    /// An error `result` from the peer is returned as [`Error::Peer`](crate::Error::Peer).
    pub async fn ask(&self, prompt: impl Into<String>) -> Result<String> {
        self.query(prompt).await?.collect_text().await
    }

    /// Run a prompt to completion and gather everything the peer sent.
    pub async fn collect(&self, prompt: impl Into<String>) -> Result<CollectedResponse> {
        self.query(prompt).await?.collect().await
    }

    /// Get a reference to the client's configuration.
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }
}

/// Builder for [`ClaudeClient`].
///
/// This wraps [`QueryConfigBuilder`] and builds directly into a [`ClaudeClient`].
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    inner: QueryConfigBuilder,
}

impl ClientBuilder {
    /// Create a new client builder with default settings.
    pub fn new() -> Self {
        Self {
            inner: QueryConfigBuilder::default(),
        }
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`](crate::Error::InvalidConfig) when
    /// validation in [`QueryConfigBuilder::build`] fails.
    pub fn build(self) -> Result<ClaudeClient> {
        let config = self.inner.build()?;
        Ok(ClaudeClient::with_config(config))
    }

    // -------------------------------------------------------------------------
    // Model and permissions
    // -------------------------------------------------------------------------

    /// Set the model to use.
    pub fn model(mut self, model: impl Into<Model>) -> Self {
        self.inner = self.inner.model(model);
        self
    }

    /// Set the permission mode.
    pub fn permission_mode(mut self, mode: PermissionMode) -> Self {
        self.inner = self.inner.permission_mode(mode);
        self
    }

    pub fn permission_fallback(mut self, fallback: PermissionFallback) -> Self {
        self.inner = self.inner.permission_fallback(fallback);
        self
    }

    /// Decide tool permissions with a callback.
    pub fn can_use_tool(mut self, callback: impl CanUseTool + 'static) -> Self {
        self.inner = self.inner.can_use_tool(callback);
        self
    }

    pub fn max_thinking_tokens(mut self, tokens: u32) -> Self {
        self.inner = self.inner.max_thinking_tokens(tokens);
        self
    }

    // -------------------------------------------------------------------------
    // Sessions
    // -------------------------------------------------------------------------

    /// Resume a specific session by ID on every query.
    pub fn resume(mut self, id: impl Into<SessionId>) -> Self {
        self.inner = self.inner.resume(id);
        self
    }

    /// Continue the most recent session.
    pub fn continue_session(mut self, cont: bool) -> Self {
        self.inner = self.inner.continue_session(cont);
        self
    }

    pub fn include_partial_messages(mut self, include: bool) -> Self {
        self.inner = self.inner.include_partial_messages(include);
        self
    }

    // -------------------------------------------------------------------------
    // Hooks and tools
    // -------------------------------------------------------------------------

    /// Register a matcher group for a hook event.
    pub fn hook(mut self, event: HookEvent, matcher: HookMatcher) -> Self {
        self.inner = self.inner.hook(event, matcher);
        self
    }

    /// Replace all hook registrations.
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.inner = self.inner.hooks(hooks);
        self
    }

    /// Serve an in-process tool server to the peer.
    pub fn tool_server(mut self, server: ToolServer) -> Self {
        self.inner = self.inner.tool_server(server);
        self
    }

    // -------------------------------------------------------------------------
    // Channel and process options
    // -------------------------------------------------------------------------

    pub fn control_timeout(mut self, duration: Duration) -> Self {
        self.inner = self.inner.control_timeout(duration);
        self
    }

    /// Receive each line the peer writes to stderr.
    pub fn on_stderr(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.inner = self.inner.on_stderr(callback);
        self
    }

    /// Path to claude CLI binary.
    pub fn cli_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.inner = self.inner.cli_path(path);
        self
    }

    /// Working directory for claude process.
    pub fn working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.inner = self.inner.working_directory(path);
        self
    }

    /// Add/override environment variable for subprocess.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner = self.inner.env(key, value);
        self
    }

    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.inner = self.inner.inherit_env(inherit);
        self
    }

    /// Extra CLI arguments appended after the generated ones.
    pub fn extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inner = self.inner.extra_args(args);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn builder_produces_client() {
        let client = ClaudeClient::builder()
            .model(Model::Haiku)
            .permission_mode(PermissionMode::Plan)
            .control_timeout(Duration::from_secs(8))
            .build()
            .unwrap();
        assert_eq!(client.config().model(), Some(&Model::Haiku));
        assert_eq!(client.config().permission_mode(), PermissionMode::Plan);
        assert_eq!(
            client.config().control_timeout(),
            Some(Duration::from_secs(8))
        );
    }

    #[test]
    fn builder_validates() {
        let err = ClaudeClient::builder()
            .control_timeout(Duration::ZERO)
            .build().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn clones_share_config() {
        let client = ClaudeClient::builder().cli_path("/opt/claude").build().unwrap();
        let other = client.clone();
        assert!(Arc::ptr_eq(&client.config, &other.config));
        assert_eq!(other.config().cli_command(), PathBuf::from("/opt/claude"));
    }

    #[tokio::test]
    async fn missing_cli_is_reported() {
        let client = ClaudeClient::builder()
            .cli_path("/nonexistent/claude-binary")
            .build()
            .unwrap();
        let err = client.ask("hi").await.unwrap_err();
        assert!(matches!(err, Error::CliNotFound { .. }), "{err:?}");
    }
}
