// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! JSON-RPC message model for the extension wire protocol.
//!
//! Inbound payloads are classified by which keys they carry. Outbound
//! messages are serialized through small borrowed wire structs so the
//! `"jsonrpc": "2.0"` tag is always present.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use keel_core::{KeelError, RpcError};

const JSONRPC_VERSION: &str = "2.0";

/// Reserved method names used by the lifecycle handshake.
pub mod methods {
    pub const INITIALIZE: &str = "$/initialize";
    pub const ACTIVATE: &str = "$/activate";
    pub const DEACTIVATE: &str = "$/deactivate";
    pub const SHUTDOWN: &str = "$/shutdown";
    pub const CANCEL: &str = "$/cancel";
    /// An extension announcing one of its own events.
    pub const EVENT: &str = "$/event";
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: u64,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Response {
        id: u64,
        result: Value,
    },
    /// An error reply. Without an id it is an unsolicited error report.
    Error {
        id: Option<u64>,
        error: RpcError,
    },
}

/// Every key any message kind may carry.
#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    notification: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

impl Message {
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        Message::Request {
            id,
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Message::Notification {
            method: method.into(),
            params,
        }
    }

    pub fn response(id: u64, result: Value) -> Self {
        Message::Response { id, result }
    }

    pub fn error(id: Option<u64>, error: RpcError) -> Self {
        Message::Error { id, error }
    }

    /// Classifies a frame body.
    pub fn parse(body: &[u8]) -> Result<Self, KeelError> {
        let raw: RawMessage = serde_json::from_slice(body)
            .map_err(|e| KeelError::Protocol(format!("malformed message: {e}")))?;
        let id = raw.id.as_ref().map(parse_id).transpose()?;
        let params = raw.params.unwrap_or(Value::Null);

        if let Some(error) = raw.error {
            return Ok(Message::Error { id, error });
        }
        if let Some(result) = raw.result {
            let id = id.ok_or_else(|| {
                KeelError::Protocol("response without an id".to_string())
            })?;
            return Ok(Message::Response { id, result });
        }
        if let Some(method) = raw.method {
            return Ok(match id {
                Some(id) => Message::Request { id, method, params },
                None => Message::Notification { method, params },
            });
        }
        if let Some(method) = raw.notification {
            return Ok(Message::Notification { method, params });
        }
        // `{"id": 3, "result": null}` deserializes `result` as None.
        if let Some(id) = id {
            return Ok(Message::Response {
                id,
                result: Value::Null,
            });
        }
        Err(KeelError::Protocol(
            "message carries neither method, result nor error".to_string(),
        ))
    }

    /// Serializes the message to a JSON body (not yet framed).
    pub fn to_bytes(&self) -> Result<Vec<u8>, KeelError> {
        let encoded = match self {
            Message::Request { id, method, params } => serde_json::to_vec(&WireRequest {
                jsonrpc: JSONRPC_VERSION,
                id: *id,
                method,
                params,
            }),
            Message::Notification { method, params } => {
                serde_json::to_vec(&WireNotification {
                    jsonrpc: JSONRPC_VERSION,
                    notification: method,
                    params,
                })
            }
            Message::Response { id, result } => serde_json::to_vec(&WireResponse {
                jsonrpc: JSONRPC_VERSION,
                id: *id,
                result,
            }),
            Message::Error { id, error } => serde_json::to_vec(&WireError {
                jsonrpc: JSONRPC_VERSION,
                id: *id,
                error,
            }),
        };
        encoded.map_err(|e| KeelError::Internal(format!("failed to encode message: {e}")))
    }

    /// Short label for log lines.
    pub fn describe(&self) -> String {
        match self {
            Message::Request { id, method, .. } => format!("request {id} {method}"),
            Message::Notification { method, .. } => format!("notification {method}"),
            Message::Response { id, .. } => format!("response {id}"),
            Message::Error { id: Some(id), error } => format!("error {id} ({})", error.code),
            Message::Error { id: None, error } => format!("error ({})", error.code),
        }
    }
}

fn parse_id(id: &Value) -> Result<u64, KeelError> {
    match id {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| KeelError::Protocol(format!("unsupported message id {n}"))),
        // Some peers echo ids back as strings.
        Value::String(s) => s
            .parse()
            .map_err(|_| KeelError::Protocol(format!("unsupported message id \"{s}\""))),
        other => Err(KeelError::Protocol(format!("unsupported message id {other}"))),
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Serialize)]
struct WireNotification<'a> {
    jsonrpc: &'static str,
    notification: &'a str,
    params: &'a Value,
}

#[derive(Serialize)]
struct WireResponse<'a> {
    jsonrpc: &'static str,
    id: u64,
    result: &'a Value,
}

#[derive(Serialize)]
struct WireError<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    error: &'a RpcError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::ErrorCode;
    use serde_json::json;

    fn parse(value: Value) -> Message {
        Message::parse(&serde_json::to_vec(&value).unwrap()).unwrap()
    }

    #[test]
    fn classifies_by_keys() {
        assert_eq!(
            parse(json!({"jsonrpc": "2.0", "id": 4, "method": "core/getComponentList"})),
            Message::request(4, "core/getComponentList", Value::Null)
        );
        assert_eq!(
            parse(json!({"jsonrpc": "2.0", "method": "gui/ping", "params": [1]})),
            Message::notification("gui/ping", json!([1]))
        );
        assert_eq!(
            parse(json!({"jsonrpc": "2.0", "notification": "gui/ping", "params": {}})),
            Message::notification("gui/ping", json!({}))
        );
        assert_eq!(
            parse(json!({"jsonrpc": "2.0", "id": 2, "result": {"ok": true}})),
            Message::response(2, json!({"ok": true}))
        );
        assert_eq!(
            parse(json!({"jsonrpc": "2.0", "id": 3, "result": null})),
            Message::response(3, Value::Null)
        );
    }

    #[test]
    fn errors_with_and_without_id() {
        let with_id = parse(json!({"id": 9, "error": {"code": -32601, "message": "nope"}}));
        let Message::Error { id, error } = with_id else {
            panic!("expected error");
        };
        assert_eq!(id, Some(9));
        assert_eq!(error.error_code(), Some(ErrorCode::MethodNotFound));

        let bare = parse(json!({"error": {"code": -32603}}));
        assert!(matches!(bare, Message::Error { id: None, .. }));
    }

    #[test]
    fn string_ids_are_accepted() {
        assert_eq!(
            parse(json!({"id": "12", "result": 1})),
            Message::response(12, json!(1))
        );
    }

    #[test]
    fn rejects_unclassifiable_payloads() {
        assert!(matches!(
            Message::parse(b"not json"),
            Err(KeelError::Protocol(_))
        ));
        assert!(matches!(
            Message::parse(br#"{"jsonrpc":"2.0"}"#),
            Err(KeelError::Protocol(_))
        ));
        assert!(matches!(
            Message::parse(br#"{"result":1}"#),
            Err(KeelError::Protocol(_))
        ));
    }

    #[test]
    fn outbound_shapes() {
        let request: Value =
            serde_json::from_slice(&Message::request(1, "$/initialize", json!({})).to_bytes().unwrap())
                .unwrap();
        assert_eq!(
            request,
            json!({"jsonrpc": "2.0", "id": 1, "method": "$/initialize", "params": {}})
        );

        let notification: Value = serde_json::from_slice(
            &Message::notification("$/cancel", json!({"id": 7}))
                .to_bytes()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(
            notification,
            json!({"jsonrpc": "2.0", "notification": "$/cancel", "params": {"id": 7}})
        );

        let error: Value = serde_json::from_slice(
            &Message::error(Some(5), RpcError::new(ErrorCode::InvalidParams, "bad"))
                .to_bytes()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(
            error,
            json!({"jsonrpc": "2.0", "id": 5, "error": {"code": -32602, "message": "bad"}})
        );
    }

    #[test]
    fn outbound_notifications_parse_back() {
        let bytes = Message::notification("gui/changed", json!({"a": 1}))
            .to_bytes()
            .unwrap();
        assert_eq!(
            Message::parse(&bytes).unwrap(),
            Message::notification("gui/changed", json!({"a": 1}))
        );
    }
}
