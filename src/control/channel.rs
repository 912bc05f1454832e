//! The single reader and writer of the peer's pipes.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use super::handlers::PeerHandlers;
use super::pending::PendingRequests;
use crate::config::SessionId;
use crate::process::{FrameDecoder, PeerExit, ProcessWriter, StderrTail};
use crate::protocol::control::{request_envelope, response_envelope};
use crate::protocol::{ControlRequest, Message, PeerRequest, Record};
use crate::{Error, Result};

/// How long to wait for an exit status once the peer's output ends.
const EXIT_WAIT: Duration = Duration::from_secs(2);

/// Error text sent when the peer cancels one of its requests.
const CANCELLED: &str = "cancelled";

/// Exit information the consumer checks when the peer's output ends.
pub struct PeerWatch {
    pub exit: BoxFuture<'static, PeerExit>,
    pub stderr: StderrTail,
}

/// Items delivered to the message stream.
///
/// Unbounded: the consumer must keep routing control responses while the
/// caller is not reading messages.
pub type MessageReceiver = mpsc::UnboundedReceiver<Result<Message>>;

struct Shared {
    writer: tokio::sync::Mutex<ProcessWriter>,
    pending: PendingRequests,
    in_flight: Mutex<HashMap<String, AbortHandle>>,
    handlers: Arc<PeerHandlers>,
    next_id: AtomicU64,
    token: String,
    request_timeout: Option<Duration>,
    results: watch::Sender<u64>,
    session_id: Mutex<Option<SessionId>>,
}

/// Bidirectional control channel over one peer's stdin/stdout.
///
/// A background consumer processes peer records in arrival order:
/// responses resolve pending requests, peer requests are answered by
/// [`PeerHandlers`], and plain messages go to the [`MessageReceiver`].
pub struct ControlChannel {
    shared: Arc<Shared>,
    consumer: AbortHandle,
}

impl ControlChannel {
    /// Start the consumer. Must be called within a Tokio runtime.
    pub fn start<R, W>(
        reader: R,
        writer: W,
        handlers: Arc<PeerHandlers>,
        request_timeout: Option<Duration>,
        peer_watch: Option<PeerWatch>,
    ) -> (Self, MessageReceiver)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(ProcessWriter::new(writer)),
            pending: PendingRequests::default(),
            in_flight: Mutex::new(HashMap::new()),
            handlers,
            next_id: AtomicU64::new(0),
            token: token[..8].to_string(),
            request_timeout,
            results: watch::channel(0).0,
            session_id: Mutex::new(None),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(consume(
            Arc::clone(&shared),
            FrameDecoder::new(reader),
            tx,
            peer_watch,
        ));

        (
            Self {
                shared,
                consumer: consumer.abort_handle(),
            },
            rx,
        )
    }

    /// Send a control request and wait for the peer's answer.
    ///
    /// `payload` holds the request fields; `kind` becomes its `subtype`.
    /// A peer error payload is returned as [`Error::Peer`]. If the channel
    /// closes first the call fails with [`Error::PeerClosed`].
    pub async fn send_control_request(&self, kind: &str, payload: Value) -> Result<Value> {
        let mut body = match payload {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(Error::InvalidConfig(format!(
                    "control request payload must be an object, got {other}"
                )))
            }
        };
        body.insert("subtype".to_string(), Value::String(kind.to_string()));

        let id = self.shared.next_request_id();
        let waiter = self.shared.pending.register(&id)?;
        let envelope = request_envelope(&id, Value::Object(body));
        if let Err(e) = self.shared.writer.lock().await.write_record(&envelope).await {
            self.shared.pending.abandon(&id);
            return Err(e);
        }
        tracing::debug!(request_id = %id, subtype = kind, "sent control request");

        let outcome = match self.shared.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, waiter).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.shared.pending.abandon(&id);
                    tracing::warn!(request_id = %id, subtype = kind, "control request timed out");
                    return Err(Error::Timeout(limit));
                }
            },
            None => waiter.await,
        };
        outcome.unwrap_or_else(|_| Err(Error::peer_closed("control channel dropped")))
    }

    /// Send a typed control request.
    pub async fn send(&self, request: ControlRequest) -> Result<Value> {
        let kind = request.subtype();
        let payload = serde_json::to_value(&request).map_err(Error::Json)?;
        self.send_control_request(kind, payload).await
    }

    /// Write a plain record (a user message) to the peer.
    pub async fn write_message(&self, message: &Value) -> Result<()> {
        self.shared.writer.lock().await.write_record(message).await
    }

    /// Close the peer's input. Idempotent.
    pub async fn close_input(&self) {
        self.shared.writer.lock().await.close().await;
    }

    pub async fn is_input_closed(&self) -> bool {
        self.shared.writer.lock().await.is_closed()
    }

    /// Watch the number of `result` messages received so far.
    pub fn results(&self) -> watch::Receiver<u64> {
        self.shared.results.subscribe()
    }

    /// Session id reported by the peer, once known.
    pub fn session_id(&self) -> Option<SessionId> {
        self.shared.session_id.lock().ok()?.clone()
    }

    pub fn handlers(&self) -> &PeerHandlers {
        &self.shared.handlers
    }

    pub fn is_closed(&self) -> bool {
        self.shared.pending.is_closed()
    }

    /// Stop the consumer and abandon every in-flight exchange.
    ///
    /// Pending requests fail with `reason`. Idempotent.
    pub async fn shutdown(&self, reason: Error) {
        self.terminate(reason);
        self.close_input().await;
    }

    /// Synchronous part of [`shutdown`](Self::shutdown): stop the consumer
    /// and fail every waiter. Input stays open.
    pub fn terminate(&self, reason: Error) {
        self.consumer.abort();
        self.shared.pending.close_all(reason);
        self.shared.abort_in_flight();
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("pending", &self.shared.pending.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.terminate(Error::peer_closed("control channel dropped"));
    }
}

impl Shared {
    fn next_request_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("req_{}_{}", n, self.token)
    }

    fn observe(&self, message: &Message) {
        if message.is_system_init() || message.is_result() {
            if let Some(id) = message.session_id().filter(|id| !id.is_empty()) {
                if let Ok(mut session) = self.session_id.lock() {
                    *session = Some(SessionId::new(id));
                }
            }
        }
    }

    /// Run a handler for a peer request and answer it exactly once.
    fn spawn_handler(self: &Arc<Self>, request_id: String, request: PeerRequest) {
        let Ok(mut in_flight) = self.in_flight.lock() else {
            return;
        };
        let shared = Arc::clone(self);
        let id = request_id.clone();
        let task = tokio::spawn(async move {
            let subtype = request.subtype().to_string();
            let outcome = match AssertUnwindSafe(shared.handlers.handle(request))
                .catch_unwind()
                .await
            {
                Ok(Ok(payload)) => Ok(payload),
                Ok(Err(e)) => {
                    tracing::warn!(request_id = %id, %subtype, error = %e, "control request handler failed");
                    Err(e.to_string())
                }
                Err(_) => {
                    tracing::error!(request_id = %id, %subtype, "control request handler panicked");
                    Err(format!("{subtype} handler panicked"))
                }
            };
            if shared.finish(&id) {
                shared.respond(&id, outcome).await;
            }
        });
        in_flight.insert(request_id, task.abort_handle());
    }

    /// Remove an in-flight entry. Whoever removes it sends the response.
    fn finish(&self, request_id: &str) -> bool {
        self.in_flight
            .lock()
            .map(|mut in_flight| in_flight.remove(request_id).is_some())
            .unwrap_or(false)
    }

    async fn cancel(&self, request_id: &str) {
        let handle = self
            .in_flight
            .lock()
            .ok()
            .and_then(|mut in_flight| in_flight.remove(request_id));
        match handle {
            Some(handle) => {
                handle.abort();
                tracing::debug!(request_id, "peer cancelled control request");
                self.respond(request_id, Err(CANCELLED.to_string())).await;
            }
            None => tracing::debug!(request_id, "cancel for unknown or finished request"),
        }
    }

    async fn respond(&self, request_id: &str, outcome: std::result::Result<Value, String>) {
        let envelope = response_envelope(request_id, outcome);
        if let Err(e) = self.writer.lock().await.write_record(&envelope).await {
            tracing::debug!(request_id, error = %e, "could not answer control request");
        }
    }

    fn abort_in_flight(&self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            for (_, handle) in in_flight.drain() {
                handle.abort();
            }
        }
    }
}

async fn consume<R>(
    shared: Arc<Shared>,
    mut decoder: FrameDecoder<R>,
    messages: mpsc::UnboundedSender<Result<Message>>,
    peer_watch: Option<PeerWatch>,
) where
    R: AsyncRead + Unpin,
{
    let mut saw_result = false;
    let reason = loop {
        let frame = match decoder.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                if let Some(err) = check_exit(peer_watch, saw_result).await {
                    let reason = err.duplicate();
                    let _ = messages.send(Err(err));
                    break reason;
                }
                break Error::peer_closed("peer output ended");
            }
            Err(e) => {
                tracing::error!(error = %e, "peer output desynchronized");
                let reason = e.duplicate();
                let _ = messages.send(Err(e));
                break reason;
            }
        };

        match Record::from_value(frame) {
            Record::Message(message) => {
                saw_result = message.is_result();
                shared.observe(&message);
                if saw_result {
                    shared.results.send_modify(|n| *n += 1);
                }
                if messages.send(Ok(message)).is_err() {
                    break Error::peer_closed("message stream dropped");
                }
            }
            Record::ControlResponse(response) => {
                let outcome = response.outcome.map_err(|message| Error::Peer { message });
                if !shared.pending.resolve(&response.request_id, outcome) {
                    tracing::warn!(request_id = %response.request_id, "control response for unknown request");
                }
            }
            Record::ControlRequest {
                request_id,
                request,
            } => {
                tracing::debug!(%request_id, subtype = request.subtype(), "peer control request");
                shared.spawn_handler(request_id, request);
            }
            Record::ControlCancel { request_id } => shared.cancel(&request_id).await,
            Record::KeepAlive => tracing::trace!("keep_alive"),
            Record::Invalid { reason, raw } => {
                tracing::warn!(reason, record = %raw, "dropping invalid control record");
            }
        }
    };

    tracing::debug!(reason = %reason, "control channel consumer finished");
    shared.pending.close_all(reason);
}

/// Turn an abnormal exit into an error, unless a result already arrived.
async fn check_exit(peer_watch: Option<PeerWatch>, saw_result: bool) -> Option<Error> {
    let peer_watch = peer_watch?;
    if saw_result {
        return None;
    }
    let exit = tokio::time::timeout(EXIT_WAIT, peer_watch.exit).await.ok()?;
    if !exit.is_abnormal() {
        return None;
    }
    let stderr = peer_watch.stderr.contents();
    tracing::warn!(code = ?exit.code, signal = ?exit.signal, "peer exited without a result");
    Some(Error::PeerExited {
        code: exit.code,
        stderr,
    })
}
