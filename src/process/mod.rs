//! Process management for the Claude CLI peer.
//!
//! One peer process is spawned per query and driven over its pipes:
//!
//! ```text
//! claude_query                        claude CLI
//! ┌──────────────┐                   ┌─────────────┐
//! │ControlChannel│───stdin (NDJSON)─▶│             │
//! │              │◀──stdout (NDJSON)─│             │
//! │  stderr pump │◀──stderr (logs)───│             │
//! └──────────────┘                   └─────────────┘
//! ```
//!
//! The [`PeerProcess`] supervisor owns the child and reports its exit; the
//! pipes are handed to a [`FrameDecoder`] and a [`ProcessWriter`].

mod io;
mod spawn;

pub use io::{
    spawn_stderr_pump, FrameDecoder, ProcessWriter, StderrCallback, StderrTail, STDERR_TAIL_LINES,
};
pub use spawn::{PeerExit, PeerProcess, Signal};

/// Minimum CLI version required for the control protocol.
pub const MIN_CLI_VERSION: &str = "2.0.0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PeerProcess>();
        assert_send_sync::<FrameDecoder<tokio::process::ChildStdout>>();
    }
}
