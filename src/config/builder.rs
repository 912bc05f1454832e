//! Query configuration and builder.
//!
//! # Example
//!
//! ```no_run
//! use claude_query::config::{Model, PermissionMode, QueryConfig};
//!
//! # fn main() -> claude_query::Result<()> {
//! let config = QueryConfig::builder()
//!     .model(Model::Opus)
//!     .permission_mode(PermissionMode::AcceptEdits)
//!     .max_thinking_tokens(8_000)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::options::{Model, PermissionMode, SessionId};
use crate::hooks::{HookEvent, HookMatcher, Hooks};
use crate::permissions::{CanUseTool, PermissionFallback};
use crate::process::StderrCallback;
use crate::tools::ToolServer;
use crate::{Error, Result};

/// Default binary searched on `PATH`.
pub const DEFAULT_CLI: &str = "claude";

/// Configuration for one query against a Claude CLI peer.
///
/// Use [`QueryConfig::builder()`] to create a new configuration.
#[derive(Clone)]
pub struct QueryConfig {
    // Model and permissions
    pub(crate) model: Option<Model>,
    pub(crate) permission_mode: PermissionMode,
    pub(crate) permission_fallback: Option<PermissionFallback>,
    pub(crate) max_thinking_tokens: Option<u32>,

    // Session options
    pub(crate) resume: Option<SessionId>,
    pub(crate) continue_session: bool,
    pub(crate) include_partial_messages: bool,

    // Callbacks and in-process servers
    pub(crate) hooks: Hooks,
    pub(crate) can_use_tool: Option<Arc<dyn CanUseTool>>,
    pub(crate) tool_servers: Vec<Arc<ToolServer>>,
    pub(crate) on_stderr: Option<StderrCallback>,

    // Channel options
    pub(crate) control_timeout: Option<Duration>,

    // Process options
    pub(crate) cli_path: Option<PathBuf>,
    pub(crate) working_directory: Option<PathBuf>,
    pub(crate) env_vars: HashMap<String, String>,
    pub(crate) inherit_env: bool,
    pub(crate) extra_args: Vec<String>,
}

impl QueryConfig {
    /// Create a new builder for QueryConfig.
    pub fn builder() -> QueryConfigBuilder {
        QueryConfigBuilder::default()
    }

    pub fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    pub fn permission_mode(&self) -> PermissionMode {
        self.permission_mode
    }

    /// Local deadline applied to outbound control requests.
    pub fn control_timeout(&self) -> Option<Duration> {
        self.control_timeout
    }

    pub fn working_directory(&self) -> Option<&PathBuf> {
        self.working_directory.as_ref()
    }

    /// Binary to execute: the configured path or `claude` on `PATH`.
    pub fn cli_command(&self) -> PathBuf {
        self.cli_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CLI))
    }

    /// Environment overrides passed to the peer.
    pub fn env_vars(&self) -> &HashMap<String, String> {
        &self.env_vars
    }

    /// Fallback used by the permission broker when no callback is set.
    ///
    /// Unless overridden, bypass mode allows everything and every other mode
    /// denies.
    pub fn effective_permission_fallback(&self) -> PermissionFallback {
        self.permission_fallback
            .unwrap_or_else(|| PermissionFallback::for_mode(self.permission_mode))
    }

    /// Arguments passed to the CLI. Input and output are always stream-json.
    pub fn cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--input-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];

        if let Some(ref model) = self.model {
            args.push("--model".to_string());
            args.push(model.to_string());
        }

        if self.permission_mode != PermissionMode::Default {
            args.push("--permission-mode".to_string());
            args.push(self.permission_mode.to_string());
        }

        if self.can_use_tool.is_some() {
            args.push("--permission-prompt-tool".to_string());
            args.push("stdio".to_string());
        }

        if let Some(tokens) = self.max_thinking_tokens {
            args.push("--max-thinking-tokens".to_string());
            args.push(tokens.to_string());
        }

        if !self.tool_servers.is_empty() {
            let servers: serde_json::Map<String, serde_json::Value> = self
                .tool_servers
                .iter()
                .map(|server| {
                    (
                        server.name().to_string(),
                        serde_json::json!({"type": "sdk", "name": server.name()}),
                    )
                })
                .collect();
            args.push("--mcp-config".to_string());
            args.push(serde_json::json!({ "mcpServers": servers }).to_string());
        }

        if let Some(ref id) = self.resume {
            args.push("--resume".to_string());
            args.push(id.to_string());
        } else if self.continue_session {
            args.push("--continue".to_string());
        }

        if self.include_partial_messages {
            args.push("--include-partial-messages".to_string());
        }

        args.extend(self.extra_args.iter().cloned());
        args
    }
}

impl fmt::Debug for QueryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryConfig")
            .field("model", &self.model)
            .field("permission_mode", &self.permission_mode)
            .field("permission_fallback", &self.permission_fallback)
            .field("resume", &self.resume)
            .field("continue_session", &self.continue_session)
            .field("hooks", &self.hooks)
            .field("can_use_tool", &self.can_use_tool.is_some())
            .field("tool_servers", &self.tool_servers)
            .field("control_timeout", &self.control_timeout)
            .field("cli_path", &self.cli_path)
            .field("working_directory", &self.working_directory)
            .finish_non_exhaustive()
    }
}

/// Builder for [`QueryConfig`].
///
/// Validation happens in [`build()`](QueryConfigBuilder::build).
#[derive(Clone)]
pub struct QueryConfigBuilder {
    model: Option<Model>,
    permission_mode: PermissionMode,
    permission_fallback: Option<PermissionFallback>,
    max_thinking_tokens: Option<u32>,
    resume: Option<SessionId>,
    continue_session: bool,
    include_partial_messages: bool,
    hooks: Hooks,
    can_use_tool: Option<Arc<dyn CanUseTool>>,
    tool_servers: Vec<Arc<ToolServer>>,
    on_stderr: Option<StderrCallback>,
    control_timeout: Option<Duration>,
    cli_path: Option<PathBuf>,
    working_directory: Option<PathBuf>,
    env_vars: HashMap<String, String>,
    inherit_env: bool,
    extra_args: Vec<String>,
}

impl Default for QueryConfigBuilder {
    fn default() -> Self {
        Self {
            model: None,
            permission_mode: PermissionMode::default(),
            permission_fallback: None,
            max_thinking_tokens: None,
            resume: None,
            continue_session: false,
            include_partial_messages: false,
            hooks: Hooks::default(),
            can_use_tool: None,
            tool_servers: Vec::new(),
            on_stderr: None,
            control_timeout: None,
            cli_path: None,
            working_directory: None,
            env_vars: HashMap::new(),
            inherit_env: true,
            extra_args: Vec::new(),
        }
    }
}

impl QueryConfigBuilder {
    // -------------------------------------------------------------------------
    // Model and permissions
    // -------------------------------------------------------------------------

    /// Set the model to use.
    pub fn model(mut self, model: impl Into<Model>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the permission mode for tool execution.
    pub fn permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = mode;
        self
    }

    /// Override the answer given to permission checks when no callback is set.
    pub fn permission_fallback(mut self, fallback: PermissionFallback) -> Self {
        self.permission_fallback = Some(fallback);
        self
    }

    /// Decide tool permissions with a callback.
    pub fn can_use_tool(mut self, callback: impl CanUseTool + 'static) -> Self {
        self.can_use_tool = Some(Arc::new(callback));
        self
    }

    pub fn max_thinking_tokens(mut self, tokens: u32) -> Self {
        self.max_thinking_tokens = Some(tokens);
        self
    }

    // -------------------------------------------------------------------------
    // Session options
    // -------------------------------------------------------------------------

    /// Resume a specific session by ID.
    pub fn resume(mut self, id: impl Into<SessionId>) -> Self {
        self.resume = Some(id.into());
        self
    }

    /// Continue the most recent session.
    pub fn continue_session(mut self, cont: bool) -> Self {
        self.continue_session = cont;
        self
    }

    /// Ask the peer for `stream_event` partial messages.
    pub fn include_partial_messages(mut self, include: bool) -> Self {
        self.include_partial_messages = include;
        self
    }

    // -------------------------------------------------------------------------
    // Hooks and tools
    // -------------------------------------------------------------------------

    /// Register a matcher group for a hook event.
    pub fn hook(mut self, event: HookEvent, matcher: HookMatcher) -> Self {
        self.hooks.register(event, matcher);
        self
    }

    /// Replace all hook registrations.
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Serve an in-process tool server to the peer.
    pub fn tool_server(mut self, server: ToolServer) -> Self {
        self.tool_servers.push(Arc::new(server));
        self
    }

    // -------------------------------------------------------------------------
    // Channel options
    // -------------------------------------------------------------------------

    /// Local deadline for outbound control requests. None waits for the peer.
    pub fn control_timeout(mut self, duration: Duration) -> Self {
        self.control_timeout = Some(duration);
        self
    }

    /// Receive each line the peer writes to stderr.
    pub fn on_stderr(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_stderr = Some(Arc::new(callback));
        self
    }

    // -------------------------------------------------------------------------
    // Process options
    // -------------------------------------------------------------------------

    /// Path to claude CLI binary (default: search PATH for "claude").
    pub fn cli_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cli_path = Some(path.into());
        self
    }

    /// Working directory for claude process.
    pub fn working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(path.into());
        self
    }

    /// Add/override environment variable for subprocess.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// Don't inherit parent environment (default: inherit).
    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    /// Extra CLI arguments appended after the generated ones.
    pub fn extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    // -------------------------------------------------------------------------
    // Build
    // -------------------------------------------------------------------------

    /// Build the configuration.
    ///
    /// This validates:
    /// - The control timeout is non-zero if set
    /// - The working directory exists if set
    /// - Tool server names are unique
    ///
    /// Note: CLI existence is checked lazily at spawn time.
    pub fn build(self) -> Result<QueryConfig> {
        if self.control_timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidConfig(
                "control_timeout must be greater than zero".into(),
            ));
        }

        if let Some(ref dir) = self.working_directory {
            if !dir.is_dir() {
                return Err(Error::InvalidConfig(format!(
                    "working directory does not exist: {}",
                    dir.display()
                )));
            }
        }

        let mut names = std::collections::HashSet::new();
        for server in &self.tool_servers {
            if !names.insert(server.name()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate tool server name: {}",
                    server.name()
                )));
            }
        }

        Ok(QueryConfig {
            model: self.model,
            permission_mode: self.permission_mode,
            permission_fallback: self.permission_fallback,
            max_thinking_tokens: self.max_thinking_tokens,
            resume: self.resume,
            continue_session: self.continue_session,
            include_partial_messages: self.include_partial_messages,
            hooks: self.hooks,
            can_use_tool: self.can_use_tool,
            tool_servers: self.tool_servers,
            on_stderr: self.on_stderr,
            control_timeout: self.control_timeout,
            cli_path: self.cli_path,
            working_directory: self.working_directory,
            env_vars: self.env_vars,
            inherit_env: self.inherit_env,
            extra_args: self.extra_args,
        })
    }
}

impl fmt::Debug for QueryConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryConfigBuilder")
            .field("model", &self.model)
            .field("permission_mode", &self.permission_mode)
            .field("hooks", &self.hooks)
            .field("control_timeout", &self.control_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{PermissionResult, ToolPermissionContext};

    #[test]
    fn defaults() {
        let config = QueryConfig::builder().build().unwrap();
        assert_eq!(config.cli_command(), PathBuf::from("claude"));
        assert!(config.control_timeout().is_none());
        assert!(config.inherit_env);
        assert_eq!(
            config.effective_permission_fallback(),
            PermissionFallback::DenyAll
        );
    }

    #[test]
    fn base_args_are_stream_json() {
        let args = QueryConfig::builder().build().unwrap().cli_args();
        assert_eq!(
            &args[..5],
            &["--output-format", "stream-json", "--input-format", "stream-json", "--verbose"]
        );
        assert!(!args.contains(&"--permission-mode".to_string()));
        assert!(!args.contains(&"--permission-prompt-tool".to_string()));
    }

    #[test]
    fn args_with_options() {
        let config = QueryConfig::builder()
            .model(Model::Opus)
            .permission_mode(PermissionMode::Plan)
            .max_thinking_tokens(1024)
            .continue_session(true)
            .extra_args(["--debug"])
            .build()
            .unwrap();

        let args = config.cli_args();
        let pos = args.iter().position(|a| a == "--model").unwrap();
        assert_eq!(args[pos + 1], "opus");
        let pos = args.iter().position(|a| a == "--permission-mode").unwrap();
        assert_eq!(args[pos + 1], "plan");
        let pos = args.iter().position(|a| a == "--max-thinking-tokens").unwrap();
        assert_eq!(args[pos + 1], "1024");
        assert!(args.contains(&"--continue".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--debug"));
    }

    #[test]
    fn resume_wins_over_continue() {
        let args = QueryConfig::builder()
            .resume("test-session")
            .continue_session(true)
            .build()
            .unwrap()
            .cli_args();
        assert!(args.contains(&"--resume".to_string()));
        assert!(args.contains(&"test-session".to_string()));
        assert!(!args.contains(&"--continue".to_string()));
    }

    #[test]
    fn permission_callback_routes_prompts_over_stdio() {
        let config = QueryConfig::builder()
            .can_use_tool(
                |_name: String, _input: serde_json::Value, _ctx: ToolPermissionContext| async {
                    Ok::<_, crate::BoxError>(PermissionResult::allow())
                },
            )
            .build()
            .unwrap();
        let args = config.cli_args();
        let pos = args.iter().position(|a| a == "--permission-prompt-tool").unwrap();
        assert_eq!(args[pos + 1], "stdio");
    }

    #[test]
    fn tool_servers_are_listed_in_mcp_config() {
        let args = QueryConfig::builder()
            .tool_server(ToolServer::new("calc"))
            .build()
            .unwrap()
            .cli_args();
        let pos = args.iter().position(|a| a == "--mcp-config").unwrap();
        let listed: serde_json::Value = serde_json::from_str(&args[pos + 1]).unwrap();
        assert_eq!(
            listed,
            serde_json::json!({"mcpServers": {"calc": {"type": "sdk", "name": "calc"}}})
        );
    }

    #[test]
    fn bypass_mode_allows_by_default() {
        let config = QueryConfig::builder()
            .permission_mode(PermissionMode::BypassPermissions)
            .build()
            .unwrap();
        assert_eq!(
            config.effective_permission_fallback(),
            PermissionFallback::AllowAll
        );

        let config = QueryConfig::builder()
            .permission_mode(PermissionMode::BypassPermissions)
            .permission_fallback(PermissionFallback::DenyAll)
            .build()
            .unwrap();
        assert_eq!(
            config.effective_permission_fallback(),
            PermissionFallback::DenyAll
        );
    }

    #[test]
    fn validation_errors() {
        assert!(matches!(
            QueryConfig::builder()
                .control_timeout(Duration::ZERO)
                .build(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            QueryConfig::builder()
                .working_directory("/nonexistent/path/that/does/not/exist")
                .build(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            QueryConfig::builder()
                .tool_server(ToolServer::new("dup"))
                .tool_server(ToolServer::new("dup"))
                .build(),
            Err(Error::InvalidConfig(msg)) if msg.contains("dup")
        ));
    }

    #[test]
    fn working_directory_accepts_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = QueryConfig::builder()
            .working_directory(dir.path())
            .build()
            .unwrap();
        assert_eq!(config.working_directory(), Some(&dir.path().to_path_buf()));
    }
}
