//! Framing for the peer's pipes.
//!
//! Both directions carry one JSON record per `\n`-terminated line. The
//! decoder and writer are generic over any async byte stream so they work
//! equally on child pipes and in-memory duplex streams.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::Stream;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

use crate::{Error, Result};

/// Number of stderr lines kept for error reports.
pub const STDERR_TAIL_LINES: usize = 32;

/// Decodes newline-delimited JSON frames from a byte stream.
///
/// Partial lines are buffered until their terminator arrives. Empty lines are
/// skipped. The first line that is not valid JSON ends the sequence with
/// [`Error::ProtocolDecode`].
pub struct FrameDecoder<R> {
    reader: BufReader<R>,
    buffer: Vec<u8>,
    failed: bool,
}

impl<R: AsyncRead + Unpin> FrameDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buffer: Vec::with_capacity(4096),
            failed: false,
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` at end of stream. A trailing line without a
    /// terminator is still decoded.
    pub async fn next_frame(&mut self) -> Result<Option<Value>> {
        if self.failed {
            return Ok(None);
        }
        loop {
            self.buffer.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.buffer)
                .await
                .map_err(Error::io)?;
            if read == 0 {
                return Ok(None);
            }

            let line = trim_ascii(&self.buffer);
            if line.is_empty() {
                continue;
            }

            // Invalid UTF-8 is a decode error too, not a lossy rewrite.
            return match serde_json::from_slice(line) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    self.failed = true;
                    Err(Error::protocol_decode(e, &String::from_utf8_lossy(line)))
                }
            };
        }
    }

    /// Turn the decoder into a stream of frames that ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Value>> {
        futures::stream::unfold(self, |mut decoder| async move {
            match decoder.next_frame().await {
                Ok(Some(frame)) => Some((Ok(frame), decoder)),
                Ok(None) => None,
                Err(e) => {
                    decoder.failed = true;
                    Some((Err(e), decoder))
                }
            }
        })
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// Writes newline-delimited JSON records to the peer's input.
///
/// Once closed, every write fails with [`Error::InputClosed`].
pub struct ProcessWriter {
    inner: Option<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl ProcessWriter {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Some(Box::new(writer)),
        }
    }

    /// Serialize one record and write it followed by `\n`.
    pub async fn write_record(&mut self, record: &Value) -> Result<()> {
        let writer = self.inner.as_mut().ok_or(Error::InputClosed)?;
        let mut line = serde_json::to_vec(record).map_err(Error::Json)?;
        line.push(b'\n');
        writer.write_all(&line).await.map_err(Error::io)?;
        writer.flush().await.map_err(Error::io)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Close the peer's input. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.inner.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(error = %e, "shutting down peer input failed");
            }
        }
    }
}

/// Callback receiving each stderr line from the peer.
pub type StderrCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Bounded tail of the peer's stderr, shared with error reporting.
#[derive(Debug, Clone, Default)]
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
    pub fn push(&self, line: &str) {
        let Ok(mut lines) = self.lines.lock() else {
            return;
        };
        if lines.len() == STDERR_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line.to_string());
    }

    /// Retained lines joined with `\n`.
    pub fn contents(&self) -> String {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }
}

/// Forward stderr lines to `tracing`, the optional callback, and the tail.
pub fn spawn_stderr_pump<R>(
    stderr: R,
    callback: Option<StderrCallback>,
    tail: StderrTail,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::debug!(target: "claude_query::peer", "{}", line);
                    tail.push(&line);
                    if let Some(callback) = &callback {
                        callback(&line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "stderr read failed");
                    break;
                }
            }
        }
    })
}
