//! Classification of decoded frames.

use serde_json::Value;

use super::control::{ControlResponse, PeerRequest};
use super::messages::Message;

/// One decoded record from the peer's output stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A plain message for the caller.
    Message(Message),
    /// A request initiated by the peer.
    ControlRequest {
        request_id: String,
        request: PeerRequest,
    },
    /// An answer to one of our requests.
    ControlResponse(ControlResponse),
    /// The peer abandoned one of its own requests.
    ControlCancel { request_id: String },
    KeepAlive,
    /// A control record missing its correlation id. Logged and dropped.
    Invalid { reason: &'static str, raw: Value },
}

impl Record {
    /// Classify a decoded JSON frame by its `type` field.
    pub fn from_value(value: Value) -> Self {
        match value.get("type").and_then(Value::as_str) {
            Some("control_request") => {
                let Some(request_id) = string_field(&value, "request_id") else {
                    return Record::Invalid {
                        reason: "control_request without request_id",
                        raw: value,
                    };
                };
                let body = value.get("request").cloned().unwrap_or(Value::Null);
                Record::ControlRequest {
                    request_id,
                    request: PeerRequest::from_value(body),
                }
            }
            Some("control_response") => {
                let response = value.get("response").cloned().unwrap_or(Value::Null);
                let Some(request_id) = string_field(&response, "request_id") else {
                    return Record::Invalid {
                        reason: "control_response without request_id",
                        raw: value,
                    };
                };
                let outcome = if response.get("subtype").and_then(Value::as_str) == Some("error") {
                    Err(string_field(&response, "error")
                        .unwrap_or_else(|| "unknown peer error".to_string()))
                } else {
                    Ok(response.get("response").cloned().unwrap_or(Value::Null))
                };
                Record::ControlResponse(ControlResponse {
                    request_id,
                    outcome,
                })
            }
            Some("control_cancel_request") => match string_field(&value, "request_id") {
                Some(request_id) => Record::ControlCancel { request_id },
                None => Record::Invalid {
                    reason: "control_cancel_request without request_id",
                    raw: value,
                },
            },
            Some("keep_alive") => Record::KeepAlive,
            _ => Record::Message(Message::from_value(value)),
        }
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}
