//! The message stream of one peer session.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::{AbortHandle, JoinHandle};

use super::control::QueryController;
use super::input::{Prompt, UserInput};
use crate::config::{Model, PermissionMode, QueryConfig, SessionId};
use crate::control::{ControlChannel, MessageReceiver, PeerHandlers, PeerWatch};
use crate::hooks::{Diagnostics, HookDispatcher, HookFailure};
use crate::permissions::PermissionBroker;
use crate::process::{spawn_stderr_pump, PeerProcess, StderrTail};
use crate::protocol::{
    AccountInfo, AssistantMessage, ControlRequest, InitializationResult, McpServerStatus,
    McpSetServersResult, Message, ModelInfo, ResultMessage, SlashCommand, Usage, UsageTracker,
};
use crate::tools::ToolProxy;
use crate::{Error, Result};

/// Time the peer gets to exit after its input closes on `close()`.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of a [`Query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// Spawned, handshake not finished.
    Created,
    /// Messages are flowing.
    Running,
    /// Terminal. The stream yields nothing more.
    Closed,
}

/// A running session with the peer.
///
/// `Query` is a [`Stream`] of [`Message`]s in arrival order. A fatal
/// failure (undecodable output, abnormal peer exit) is yielded once as an
/// `Err` and then the stream ends. Control methods borrow the query; to
/// call them from another task while the stream is being consumed, take a
/// [`Query::controller`] handle first.
///
/// # Cancellation
///
/// [`Query::close`] stops input, fails outstanding control requests with
/// [`Error::PeerClosed`], and terminates the peer. Dropping a `Query` kills
/// the peer without waiting.
///
/// # Example
///
/// ```no_run
/// use claude_query::{Prompt, Query, QueryConfig};
/// use futures::StreamExt;
///
/// # async fn example() -> claude_query::Result<()> {
/// let config = QueryConfig::builder().build()?;
/// let mut query = Query::spawn(&config, Prompt::from("What is 2 + 2?")).await?;
/// while let Some(message) = query.next().await {
///     let message = message?;
///     if let Some(assistant) = message.as_assistant() {
///         println!("{}", assistant.message.text());
///     }
/// }
/// query.close().await;
/// # Ok(())
/// # }
/// ```
pub struct Query {
    state: QueryState,
    torn_down: bool,
    messages: MessageReceiver,
    channel: Arc<ControlChannel>,
    process: Option<PeerProcess>,
    stderr_task: Option<JoinHandle<()>>,
    input_task: Option<AbortHandle>,
    sent: Arc<AtomicU64>,
    init: Option<InitializationResult>,
    usage: UsageTracker,
    diagnostics: Arc<Diagnostics>,
}

impl Query {
    /// Spawn the peer, run the `initialize` handshake, and send the prompt.
    pub async fn spawn(config: &QueryConfig, prompt: Prompt) -> Result<Self> {
        let mut process = PeerProcess::spawn(config).await?;
        let missing = |pipe: &str| {
            Error::ProcessSpawn(std::io::Error::other(format!("peer {pipe} is not piped")))
        };
        let stdin = process.take_stdin().ok_or_else(|| missing("stdin"))?;
        let stdout = process.take_stdout().ok_or_else(|| missing("stdout"))?;
        let stderr = process.take_stderr().ok_or_else(|| missing("stderr"))?;

        let tail = StderrTail::default();
        let stderr_task = spawn_stderr_pump(stderr, config.on_stderr.clone(), tail.clone());
        let watch = PeerWatch {
            exit: process.exit_future(),
            stderr: tail,
        };

        let mut query = Self::assemble(stdout, stdin, config, Some(watch));
        query.process = Some(process);
        query.stderr_task = Some(stderr_task);
        query.start(prompt).await?;
        Ok(query)
    }

    /// Run a session over an already connected transport.
    ///
    /// `reader` carries the peer's output and `writer` its input. Exit
    /// detection and stderr capture are unavailable.
    pub async fn from_transport<R, W>(
        reader: R,
        writer: W,
        config: &QueryConfig,
        prompt: Prompt,
    ) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut query = Self::assemble(reader, writer, config, None);
        query.start(prompt).await?;
        Ok(query)
    }

    fn assemble<R, W>(
        reader: R,
        writer: W,
        config: &QueryConfig,
        watch: Option<PeerWatch>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let diagnostics = Arc::new(Diagnostics::default());
        let handlers = Arc::new(PeerHandlers::new(
            HookDispatcher::new(&config.hooks),
            PermissionBroker::new(
                config.can_use_tool.clone(),
                config.effective_permission_fallback(),
            ),
            ToolProxy::new(config.tool_servers.iter().cloned()),
            Arc::clone(&diagnostics),
        ));
        let (channel, messages) = ControlChannel::start(
            reader,
            writer,
            handlers,
            config.control_timeout(),
            watch,
        );

        Self {
            state: QueryState::Created,
            torn_down: false,
            messages,
            channel: Arc::new(channel),
            process: None,
            stderr_task: None,
            input_task: None,
            sent: Arc::new(AtomicU64::new(0)),
            init: None,
            usage: UsageTracker::new(),
            diagnostics,
        }
    }

    async fn start(&mut self, prompt: Prompt) -> Result<()> {
        let handlers = self.channel.handlers();
        let request = ControlRequest::Initialize {
            hooks: handlers.hooks().initialize_payload(),
            sdk_mcp_servers: handlers.tools().server_names(),
        };
        let response = match self.channel.send(request).await {
            Ok(response) => response,
            Err(e) => return self.close_with(e).await,
        };
        self.init = match serde_json::from_value(response) {
            Ok(init) => Some(init),
            Err(e) => {
                tracing::warn!(error = %e, "unexpected initialize response shape");
                Some(InitializationResult::default())
            }
        };
        self.state = QueryState::Running;
        tracing::debug!("query initialized");

        if let Prompt::Text(text) = prompt {
            if let Err(e) = self.send(UserInput::text(text)).await {
                return self.close_with(e).await;
            }
            self.close_input_after_replies();
        }
        Ok(())
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == QueryState::Closed
    }

    /// Receive the next message. `None` once the stream is done.
    pub async fn next_message(&mut self) -> Option<Result<Message>> {
        self.next().await
    }

    // -------------------------------------------------------------------------
    // Input
    // -------------------------------------------------------------------------

    /// Send one user turn.
    pub async fn send(&self, input: impl Into<UserInput>) -> Result<()> {
        self.ensure_running()?;
        let record = input.into().to_wire(self.channel.session_id().as_ref());
        self.channel.write_message(&record).await?;
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Send every turn of `input` in the background.
    ///
    /// Once the stream ends and every sent turn has a `result`, the peer's
    /// input is closed. Replaces any earlier background input.
    pub fn stream_input<S>(&mut self, input: S) -> Result<()>
    where
        S: Stream<Item = UserInput> + Send + 'static,
    {
        self.ensure_running()?;
        if let Some(previous) = self.input_task.take() {
            previous.abort();
        }
        let channel = Arc::clone(&self.channel);
        let sent = Arc::clone(&self.sent);
        let task = tokio::spawn(async move {
            let mut input = Box::pin(input);
            while let Some(turn) = input.next().await {
                let record = turn.to_wire(channel.session_id().as_ref());
                if let Err(e) = channel.write_message(&record).await {
                    tracing::debug!(error = %e, "stopped streaming input");
                    return;
                }
                sent.fetch_add(1, Ordering::SeqCst);
            }
            close_input_when_answered(&channel, sent.load(Ordering::SeqCst)).await;
        });
        self.input_task = Some(task.abort_handle());
        Ok(())
    }

    /// Close the peer's input now. The peer finishes the current turn.
    pub async fn end_input(&self) {
        self.channel.close_input().await;
    }

    fn close_input_after_replies(&mut self) {
        let channel = Arc::clone(&self.channel);
        let turns = self.sent.load(Ordering::SeqCst);
        let task = tokio::spawn(async move { close_input_when_answered(&channel, turns).await });
        self.input_task = Some(task.abort_handle());
    }

    // -------------------------------------------------------------------------
    // Control methods
    // -------------------------------------------------------------------------

    /// A cloneable handle for control requests.
    ///
    /// Use it to call [`QueryController::interrupt`] (or any other control
    /// method) from another task while this query is being polled.
    pub fn controller(&self) -> QueryController {
        QueryController::new(Arc::clone(&self.channel))
    }

    /// Interrupt the current turn.
    pub async fn interrupt(&self) -> Result<()> {
        self.ensure_open()?;
        self.controller().interrupt().await
    }

    /// Switch model. `None` restores the default.
    pub async fn set_model(&self, model: Option<Model>) -> Result<()> {
        self.ensure_open()?;
        self.controller().set_model(model).await
    }

    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<()> {
        self.ensure_open()?;
        self.controller().set_permission_mode(mode).await
    }

    /// Limit thinking tokens. `None` removes the limit.
    pub async fn set_max_thinking_tokens(&self, tokens: Option<u32>) -> Result<()> {
        self.ensure_open()?;
        self.controller().set_max_thinking_tokens(tokens).await
    }

    pub async fn mcp_server_status(&self) -> Result<Vec<McpServerStatus>> {
        self.ensure_open()?;
        self.controller().mcp_server_status().await
    }

    /// Reconnect an MCP server. An unknown name is an [`Error::Peer`].
    pub async fn reconnect_mcp_server(&self, server_name: &str) -> Result<()> {
        self.ensure_open()?;
        self.controller().reconnect_mcp_server(server_name).await
    }

    pub async fn toggle_mcp_server(&self, server_name: &str, enabled: bool) -> Result<()> {
        self.ensure_open()?;
        self.controller().toggle_mcp_server(server_name, enabled).await
    }

    /// Replace the dynamically configured MCP servers.
    pub async fn set_mcp_servers(&self, servers: Value) -> Result<McpSetServersResult> {
        self.ensure_open()?;
        self.controller().set_mcp_servers(servers).await
    }

    /// Restore working files to the checkpoint of a user message.
    ///
    /// Not a control round trip: this fails locally with
    /// [`Error::NotImplemented`] and writes nothing to the peer. See
    /// [`QueryController::rewind_files`].
    pub async fn rewind_files(&self, user_message_id: &str) -> Result<()> {
        self.controller().rewind_files(user_message_id).await
    }

    /// Send a control request by subtype. Escape hatch for newer peers.
    pub async fn send_control_request(&self, kind: &str, payload: Value) -> Result<Value> {
        self.ensure_open()?;
        self.controller().send_control_request(kind, payload).await
    }

    // -------------------------------------------------------------------------
    // Handshake results
    // -------------------------------------------------------------------------

    pub fn initialization_result(&self) -> Option<&InitializationResult> {
        self.init.as_ref()
    }

    pub fn supported_commands(&self) -> &[SlashCommand] {
        self.init.as_ref().map(|i| i.commands.as_slice()).unwrap_or_default()
    }

    pub fn supported_models(&self) -> &[ModelInfo] {
        self.init.as_ref().map(|i| i.models.as_slice()).unwrap_or_default()
    }

    pub fn account_info(&self) -> Option<&AccountInfo> {
        self.init.as_ref()?.account.as_ref()
    }

    // -------------------------------------------------------------------------
    // Session state
    // -------------------------------------------------------------------------

    /// Session id reported by the peer, for later resumption.
    pub fn session_id(&self) -> Option<SessionId> {
        self.channel.session_id()
    }

    /// Token usage of messages consumed so far.
    pub fn usage(&self) -> Usage {
        self.usage.usage()
    }

    pub fn total_cost_usd(&self) -> Option<f64> {
        self.usage.total_cost_usd()
    }

    /// Hook callbacks that failed or timed out.
    pub fn diagnostics(&self) -> Vec<HookFailure> {
        self.diagnostics.snapshot()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(PeerProcess::pid)
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Close the query. Idempotent.
    pub async fn close(&mut self) {
        self.state = QueryState::Closed;
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Some(task) = self.input_task.take() {
            task.abort();
        }
        self.channel.shutdown(Error::peer_closed("query closed")).await;
        self.messages.close();
        if let Some(process) = &self.process {
            let exit = process.shutdown(SHUTDOWN_GRACE).await;
            tracing::debug!(code = ?exit.code, killed = exit.killed, "query closed");
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }

    /// Close the query and hand `error` back to the caller.
    pub async fn close_with<T>(&mut self, error: Error) -> Result<T> {
        self.close().await;
        Err(error)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::peer_closed("query closed"));
        }
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state {
            QueryState::Running => Ok(()),
            QueryState::Created => Err(Error::InvalidConfig("query is not initialized".into())),
            QueryState::Closed => Err(Error::peer_closed("query closed")),
        }
    }

    // -------------------------------------------------------------------------
    // Collection helpers
    // -------------------------------------------------------------------------

    /// Collect the assistant text of the whole session.
    ///
    /// An error `result` is returned as [`Error::Peer`].
    pub async fn collect_text(self) -> Result<String> {
        let response = self.collect().await?;
        if let Some(result) = response.result.as_ref().filter(|r| r.is_error()) {
            return Err(Error::Peer {
                message: result
                    .result
                    .clone()
                    .unwrap_or_else(|| result.subtype.clone()),
            });
        }
        Ok(response.text)
    }

    /// Consume the stream and close the query.
    pub async fn collect(mut self) -> Result<CollectedResponse> {
        let mut response = CollectedResponse::default();
        while let Some(message) = self.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => return self.close_with(e).await,
            };
            match &message {
                Message::Assistant(assistant) => {
                    response.text.push_str(&assistant.message.text());
                    response.messages.push(assistant.clone());
                }
                Message::Result(result) => response.result = Some(result.clone()),
                _ => {}
            }
        }
        response.session_id = self.session_id();
        response.usage = self.usage();
        response.cost_usd = self.total_cost_usd();
        self.close().await;
        Ok(response)
    }
}

async fn close_input_when_answered(channel: &ControlChannel, turns: u64) {
    let mut results = channel.results();
    if results.wait_for(|n| *n >= turns).await.is_ok() {
        tracing::debug!(turns, "all turns answered, closing input");
        channel.close_input().await;
    }
}

impl Stream for Query {
    type Item = Result<Message>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.state == QueryState::Closed {
            return Poll::Ready(None);
        }
        match this.messages.poll_recv(cx) {
            Poll::Ready(Some(Ok(message))) => {
                this.usage.observe(&message);
                Poll::Ready(Some(Ok(message)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => {
                this.state = QueryState::Closed;
                if let Some(task) = this.input_task.take() {
                    task.abort();
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("state", &self.state)
            .field("pid", &self.pid())
            .field("session_id", &self.session_id())
            .finish_non_exhaustive()
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        if let Some(task) = self.input_task.take() {
            task.abort();
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        // The process kills itself on drop.
        self.channel.terminate(Error::peer_closed("query dropped"));
    }
}

/// Everything a finished query produced.
#[derive(Debug, Clone, Default)]
pub struct CollectedResponse {
    pub session_id: Option<SessionId>,
    /// Concatenated assistant text.
    pub text: String,
    pub messages: Vec<AssistantMessage>,
    /// The last `result` message.
    pub result: Option<ResultMessage>,
    pub usage: Usage,
    pub cost_usd: Option<f64>,
}

impl CollectedResponse {
    pub fn is_success(&self) -> bool {
        self.result.as_ref().is_some_and(ResultMessage::is_success)
    }

    /// The peer's final answer, if it reported one.
    pub fn result_text(&self) -> Option<&str> {
        self.result.as_ref()?.result.as_deref()
    }
}
