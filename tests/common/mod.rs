//! Test utilities for claude-query integration tests.
//!
//! [`FakePeer`] plays the CLI's side of the protocol over in-memory pipes.

#![allow(dead_code)]

use claude_query::{Prompt, Query, QueryConfig, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Route library logs to the test harness. `RUST_LOG=claude_query=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The CLI end of an in-memory transport.
pub struct FakePeer {
    to_query: Option<DuplexStream>,
    from_query: Lines<BufReader<DuplexStream>>,
}

impl FakePeer {
    /// Write one record to the query.
    pub async fn send(&mut self, record: Value) {
        let mut line = record.to_string();
        line.push('\n');
        self.write_raw(&line).await;
    }

    /// Write raw bytes, for malformed input.
    pub async fn write_raw(&mut self, text: &str) {
        let pipe = self.to_query.as_mut().expect("peer output already closed");
        pipe.write_all(text.as_bytes()).await.unwrap();
    }

    /// Read the next record the query wrote. Panics at end of input.
    pub async fn recv(&mut self) -> Value {
        self.try_recv().await.expect("query closed its output")
    }

    /// Read the next record, or `None` once the query closed our input.
    pub async fn try_recv(&mut self) -> Option<Value> {
        let line = self.from_query.next_line().await.unwrap()?;
        Some(serde_json::from_str(&line).unwrap())
    }

    /// Read the next record and check it is a control request of `subtype`.
    pub async fn expect_request(&mut self, subtype: &str) -> Value {
        let record = self.recv().await;
        assert_eq!(record["type"], "control_request", "{record}");
        assert_eq!(record["request"]["subtype"], subtype, "{record}");
        record
    }

    /// Read the next record and check it is a control response.
    pub async fn expect_response(&mut self) -> Value {
        let record = self.recv().await;
        assert_eq!(record["type"], "control_response", "{record}");
        record["response"].clone()
    }

    /// Answer one of the query's control requests.
    pub async fn reply(&mut self, request: &Value, payload: Value) {
        self.send(json!({
            "type": "control_response",
            "response": {
                "subtype": "success",
                "request_id": request["request_id"],
                "response": payload,
            }
        }))
        .await;
    }

    /// Fail one of the query's control requests.
    pub async fn reply_error(&mut self, request: &Value, message: &str) {
        self.send(json!({
            "type": "control_response",
            "response": {
                "subtype": "error",
                "request_id": request["request_id"],
                "error": message,
            }
        }))
        .await;
    }

    /// Issue a request of our own to the query.
    pub async fn request(&mut self, request_id: &str, body: Value) {
        self.send(json!({
            "type": "control_request",
            "request_id": request_id,
            "request": body,
        }))
        .await;
    }

    /// Close the peer's output. The query sees end of stream.
    pub fn close_output(&mut self) {
        self.to_query = None;
    }
}

/// Start a query against a fake peer and complete the handshake.
///
/// Returns the query, the peer, and the `initialize` request the query sent.
pub async fn connect(config: &QueryConfig, prompt: Prompt) -> (Query, FakePeer, Value) {
    connect_with_init(config, prompt, initialize_response()).await
}

/// Like [`connect`] with a custom handshake answer.
pub async fn connect_with_init(
    config: &QueryConfig,
    prompt: Prompt,
    init: Value,
) -> (Query, FakePeer, Value) {
    init_tracing();
    let (mut peer, starting) = start(config, prompt);
    let request = peer.expect_request("initialize").await;
    peer.reply(&request, init).await;
    let query = starting.await.unwrap().unwrap();
    (query, peer, request)
}

/// Start a query without answering the handshake.
pub fn start(
    config: &QueryConfig,
    prompt: Prompt,
) -> (FakePeer, tokio::task::JoinHandle<Result<Query>>) {
    let (peer_out, query_in) = tokio::io::duplex(PIPE_CAPACITY);
    let (query_out, peer_in) = tokio::io::duplex(PIPE_CAPACITY);
    let config = config.clone();
    let starting = tokio::spawn(async move {
        Query::from_transport(query_in, query_out, &config, prompt).await
    });
    let peer = FakePeer {
        to_query: Some(peer_out),
        from_query: BufReader::new(peer_in).lines(),
    };
    (peer, starting)
}

// -----------------------------------------------------------------------------
// Records
// -----------------------------------------------------------------------------

pub fn initialize_response() -> Value {
    json!({
        "commands": [{"name": "compact", "description": "Compact the conversation", "argumentHint": ""}],
        "models": [{"value": "sonnet", "displayName": "Sonnet", "description": "Balanced"}],
        "account": {"email": "dev@example.com", "subscriptionType": "pro"},
        "output_style": "default"
    })
}

pub fn system_init(session_id: &str) -> Value {
    json!({
        "type": "system",
        "subtype": "init",
        "cwd": "/tmp",
        "session_id": session_id,
        "tools": ["Read", "Write", "Bash"],
        "model": "claude-sonnet-4-5",
        "permissionMode": "default",
        "claude_code_version": "2.0.14"
    })
}

pub fn assistant_text(session_id: &str, message_id: &str, text: &str) -> Value {
    json!({
        "type": "assistant",
        "session_id": session_id,
        "parent_tool_use_id": null,
        "message": {
            "id": message_id,
            "model": "claude-sonnet-4-5",
            "role": "assistant",
            "content": [{"type": "text", "text": text}],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }
    })
}

pub fn result_success(session_id: &str, text: &str, cost: f64) -> Value {
    json!({
        "type": "result",
        "subtype": "success",
        "is_error": false,
        "duration_ms": 1200,
        "num_turns": 1,
        "result": text,
        "total_cost_usd": cost,
        "usage": {"input_tokens": 100, "output_tokens": 20},
        "session_id": session_id
    })
}

pub fn result_error(session_id: &str, subtype: &str) -> Value {
    json!({
        "type": "result",
        "subtype": subtype,
        "is_error": true,
        "session_id": session_id
    })
}
