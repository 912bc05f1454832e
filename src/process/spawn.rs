//! Process spawning and lifecycle management.

use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, watch};

use super::MIN_CLI_VERSION;
use crate::config::QueryConfig;
use crate::{Error, Result};

/// Version check state. We only check once per process.
static VERSION_CHECKED: AtomicBool = AtomicBool::new(false);

/// How long `claude --version` may take before the check is skipped.
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Signal delivered by [`PeerProcess::kill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ask the peer to exit (SIGTERM on unix).
    Terminate,
    /// Kill the peer immediately.
    Kill,
}

/// How the peer process ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerExit {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal number, if any.
    pub signal: Option<i32>,
    /// Whether the exit followed a local kill request.
    pub killed: bool,
}

impl PeerExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// An exit that nobody asked for and that did not report success.
    pub fn is_abnormal(&self) -> bool {
        !self.killed && !self.success()
    }

    fn from_status(status: std::io::Result<ExitStatus>, killed: bool) -> Self {
        let Ok(status) = status else {
            return Self {
                killed,
                ..Self::default()
            };
        };
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
            killed,
        }
    }
}

/// A running peer process.
///
/// The child itself is owned by a reaper task that waits for it and
/// publishes the exit. The pipes are taken once by whoever drives the
/// protocol.
///
/// # Cancellation
///
/// Dropping a `PeerProcess` kills the subprocess if it's still running.
pub struct PeerProcess {
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    signals: mpsc::UnboundedSender<Signal>,
    exit: watch::Receiver<Option<PeerExit>>,
}

impl PeerProcess {
    /// Spawn the Claude CLI described by `config`.
    pub async fn spawn(config: &QueryConfig) -> Result<Self> {
        check_version_once(config).await;
        let searched = config.cli_command().display().to_string();
        let cmd = build_command(config);
        Self::from_command(cmd).map_err(|e| match e {
            Error::ProcessSpawn(io) if io.kind() == std::io::ErrorKind::NotFound => {
                Error::CliNotFound { searched }
            }
            other => other,
        })
    }

    /// Spawn an arbitrary command with piped stdio.
    ///
    /// Must be called within a Tokio runtime.
    pub fn from_command(mut cmd: Command) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(Error::ProcessSpawn)?;
        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(reap(child, signal_rx, exit_tx));
        tracing::debug!(pid, "spawned peer process");

        Ok(Self {
            pid,
            stdin,
            stdout,
            stderr,
            signals: signal_tx,
            exit: exit_rx,
        })
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Get the process ID of the running CLI.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit information, once the process has exited.
    pub fn exit_status(&self) -> Option<PeerExit> {
        *self.exit.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.exit_status().is_none()
    }

    /// Deliver a signal. A no-op once the process has exited.
    pub fn kill(&self, signal: Signal) {
        let _ = self.signals.send(signal);
    }

    /// Wait for the process to exit.
    pub async fn wait(&self) -> PeerExit {
        wait_exit(self.exit.clone()).await
    }

    /// A detached future resolving at process exit.
    pub fn exit_future(&self) -> BoxFuture<'static, PeerExit> {
        wait_exit(self.exit.clone()).boxed()
    }

    /// Terminate, then kill if the peer has not exited after `grace`.
    pub async fn shutdown(&self, grace: Duration) -> PeerExit {
        if let Some(exit) = self.exit_status() {
            return exit;
        }
        self.kill(Signal::Terminate);
        match tokio::time::timeout(grace, self.wait()).await {
            Ok(exit) => exit,
            Err(_) => {
                tracing::debug!(pid = self.pid, "peer ignored terminate, killing");
                self.kill(Signal::Kill);
                self.wait().await
            }
        }
    }
}

impl std::fmt::Debug for PeerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerProcess")
            .field("pid", &self.pid)
            .field("exit", &self.exit_status())
            .finish_non_exhaustive()
    }
}

impl Drop for PeerProcess {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.signals.send(Signal::Kill);
        }
    }
}

async fn wait_exit(mut exit: watch::Receiver<Option<PeerExit>>) -> PeerExit {
    match exit.wait_for(Option::is_some).await {
        Ok(exit) => (*exit).unwrap_or_default(),
        Err(_) => PeerExit::default(),
    }
}

/// Own the child until it exits, delivering signals on request.
///
/// When every [`PeerProcess`] handle is gone the child is killed.
async fn reap(
    mut child: Child,
    mut signals: mpsc::UnboundedReceiver<Signal>,
    exit: watch::Sender<Option<PeerExit>>,
) {
    let mut killed = false;
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            signal = signals.recv() => {
                let signal = signal.unwrap_or(Signal::Kill);
                killed = true;
                deliver(&mut child, signal);
                if signal == Signal::Kill {
                    break child.wait().await;
                }
            }
        }
    };
    let peer_exit = PeerExit::from_status(status, killed);
    tracing::debug!(code = ?peer_exit.code, signal = ?peer_exit.signal, killed, "peer process exited");
    let _ = exit.send(Some(peer_exit));
}

fn deliver(child: &mut Child, signal: Signal) {
    match signal {
        #[cfg(unix)]
        Signal::Terminate => {
            use nix::sys::signal::{kill, Signal as NixSignal};
            use nix::unistd::Pid;

            let Some(pid) = child.id() else { return };
            if let Err(e) = kill(Pid::from_raw(pid as i32), NixSignal::SIGTERM) {
                tracing::debug!(pid, error = %e, "failed to send SIGTERM");
            }
        }
        #[cfg(not(unix))]
        Signal::Terminate => {
            let _ = child.start_kill();
        }
        Signal::Kill => {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "failed to kill peer process");
            }
        }
    }
}

/// Build a tokio Command from the config.
fn build_command(config: &QueryConfig) -> Command {
    let mut cmd = Command::new(config.cli_command());

    if let Some(dir) = config.working_directory() {
        cmd.current_dir(dir);
    }

    if !config.inherit_env {
        cmd.env_clear();
    }
    cmd.envs(config.env_vars());
    cmd.args(config.cli_args());
    cmd
}

/// Check CLI version once per process.
async fn check_version_once(config: &QueryConfig) {
    if VERSION_CHECKED.swap(true, Ordering::SeqCst) {
        return;
    }

    match tokio::time::timeout(VERSION_CHECK_TIMEOUT, check_cli_version(config)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("CLI version check failed: {}", e),
        Err(_) => tracing::debug!("CLI version check timed out"),
    }
}

/// Check the CLI version and warn if below minimum.
async fn check_cli_version(config: &QueryConfig) -> Result<()> {
    let output = Command::new(config.cli_command())
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(Error::io)?;

    if !output.status.success() {
        tracing::debug!("claude --version returned non-zero exit code");
        return Ok(());
    }

    let version_str = String::from_utf8_lossy(&output.stdout);
    match parse_version(&version_str) {
        Some(version) if version_below_min(version) => tracing::warn!(
            "Claude CLI version {} is below minimum recommended version {}. \
             Control requests may be rejected.",
            version_str.trim(),
            MIN_CLI_VERSION
        ),
        Some(_) => tracing::debug!("Claude CLI version: {}", version_str.trim()),
        None => tracing::debug!("Could not parse CLI version from: {}", version_str.trim()),
    }
    Ok(())
}

/// Parse a version string like "claude 2.0.76" into (major, minor, patch).
fn parse_version(s: &str) -> Option<(u32, u32, u32)> {
    fn numeric_prefix(part: &str) -> Option<u32> {
        let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }

    s.split_whitespace().find_map(|word| {
        let word = word.strip_prefix('v').unwrap_or(word);
        let mut parts = word.split('.');
        let major = numeric_prefix(parts.next()?)?;
        let minor = numeric_prefix(parts.next()?)?;
        let patch = numeric_prefix(parts.next()?)?;
        Some((major, minor, patch))
    })
}

fn version_below_min(version: (u32, u32, u32)) -> bool {
    let min = parse_version(MIN_CLI_VERSION).unwrap_or((2, 0, 0));
    version < min
}
