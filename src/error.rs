use std::time::Duration;

/// Boxed error returned by user callbacks (hooks, permission checks, tool handlers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur when driving a Claude CLI peer.
///
/// Errors are organized by category:
/// - Configuration errors: detected at `build()` time
/// - Spawn errors: failed to start the peer process
/// - IO errors: communication failures with the subprocess
/// - Protocol errors: malformed or desynchronized peer output
/// - Peer errors: the peer answered a control request with an error
/// - Callback errors: a user-supplied handler failed
/// - Runtime errors: timeouts, closure, unimplemented operations
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    // -------------------------------------------------------------------------
    // Configuration errors (detected at build() time)
    // -------------------------------------------------------------------------
    /// Invalid configuration provided to builder.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // -------------------------------------------------------------------------
    // Spawn errors
    // -------------------------------------------------------------------------
    /// Claude CLI binary not found.
    #[error("claude CLI not found (searched: {searched})")]
    CliNotFound { searched: String },

    /// Failed to spawn the claude subprocess.
    #[error("failed to spawn claude process: {0}")]
    ProcessSpawn(#[source] std::io::Error),

    // -------------------------------------------------------------------------
    // IO errors
    // -------------------------------------------------------------------------
    /// IO error communicating with the claude subprocess.
    #[error("IO error: {0}")]
    Io(#[source] std::io::Error),

    /// The peer's input stream was already closed.
    #[error("peer input is closed")]
    InputClosed,

    // -------------------------------------------------------------------------
    // Protocol errors
    // -------------------------------------------------------------------------
    /// A line of peer output was not valid JSON. The stream is desynchronized.
    #[error("failed to decode peer output: {source} (line: {line})")]
    ProtocolDecode {
        /// The offending line, truncated for display.
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// Failed to encode an outbound record.
    #[error("failed to encode JSON: {0}")]
    Json(#[source] serde_json::Error),

    /// A control response did not have the expected shape.
    #[error("unexpected control response: {0}")]
    UnexpectedResponse(String),

    // -------------------------------------------------------------------------
    // Peer errors
    // -------------------------------------------------------------------------
    /// The channel to the peer is closed; the request can never be answered.
    #[error("peer closed: {reason}")]
    PeerClosed { reason: String },

    /// The peer answered a control request with an error payload.
    #[error("peer error: {message}")]
    Peer { message: String },

    /// The peer exited abnormally without sending a terminal message.
    #[error("claude process exited with {code:?}: {stderr}")]
    PeerExited {
        code: Option<i32>,
        /// Tail of the peer's stderr.
        stderr: String,
    },

    // -------------------------------------------------------------------------
    // Callback errors
    // -------------------------------------------------------------------------
    /// A user-supplied callback failed.
    #[error("callback failed: {message}")]
    Callback { message: String },

    /// The peer called a tool that is not registered.
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    /// The peer addressed a tool server that is not registered.
    #[error("SDK MCP server not found: {name}")]
    UnknownServer { name: String },

    /// Tool arguments did not match the tool's declared input shape.
    #[error("invalid arguments for tool {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    // -------------------------------------------------------------------------
    // Runtime errors
    // -------------------------------------------------------------------------
    /// Request exceeded the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The operation has no implementation yet.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

/// A specialized Result type for claude-query operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a decode error, keeping a bounded copy of the raw line.
    pub fn protocol_decode(source: serde_json::Error, raw: &str) -> Self {
        Self::ProtocolDecode {
            line: raw.chars().take(200).collect(),
            source,
        }
    }

    /// Create an IO error.
    pub fn io(source: std::io::Error) -> Self {
        Self::Io(source)
    }

    /// Create a closure error with the given reason.
    pub fn peer_closed(reason: impl Into<String>) -> Self {
        Self::PeerClosed {
            reason: reason.into(),
        }
    }

    /// Convert a failed user callback into a crate error.
    pub fn callback(err: &BoxError) -> Self {
        Self::Callback {
            message: err.to_string(),
        }
    }

    /// Check if this error terminates the whole query rather than one request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::CliNotFound { .. }
                | Error::ProcessSpawn(_)
                | Error::ProtocolDecode { .. }
                | Error::PeerExited { .. }
        )
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Io(_))
    }

    /// Rebuild an equivalent error for fan-out to several waiters.
    ///
    /// Sources that cannot be cloned are flattened into a closure reason.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Error::PeerClosed { reason } => Error::peer_closed(reason.clone()),
            Error::Timeout(d) => Error::Timeout(*d),
            Error::PeerExited { code, stderr } => Error::PeerExited {
                code: *code,
                stderr: stderr.clone(),
            },
            other => Error::peer_closed(other.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}
