// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the keel plugin host.
//!
//! Every failure that can cross a component or process boundary maps onto one
//! [`ErrorCode`] and renders to the `{code, message?}` wire shape ([`RpcError`]).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Protocol-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum ErrorCode {
    /// The peer sent bytes that are not a well-formed message.
    ParseError,
    /// Operation not valid in the current state.
    InvalidRequest,
    /// No handler for the address.
    MethodNotFound,
    /// Malformed or unknown request shape or target.
    InvalidParams,
    /// Unexpected implementation fault.
    InternalError,
    /// Explicit cancellation or disposal.
    RequestCancelled,
    /// Watchdog expiry.
    TimedOut,
}

impl ErrorCode {
    /// Numeric value carried on the wire.
    pub const fn as_i64(self) -> i64 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::RequestCancelled => -32800,
            ErrorCode::TimedOut => -32000,
        }
    }

    /// Maps a wire value back to a known code.
    pub fn from_i64(code: i64) -> Option<Self> {
        [
            ErrorCode::ParseError,
            ErrorCode::InvalidRequest,
            ErrorCode::MethodNotFound,
            ErrorCode::InvalidParams,
            ErrorCode::InternalError,
            ErrorCode::RequestCancelled,
            ErrorCode::TimedOut,
        ]
        .into_iter()
        .find(|known| known.as_i64() == code)
    }
}

/// The `{code, message?}` error object exchanged with extensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_i64(),
            message: Some(message.into()),
            data: None,
        }
    }

    /// The known code, if the numeric value is one keel defines.
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_i64(self.code)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.error_code(), &self.message) {
            (Some(code), Some(message)) => write!(f, "{code} ({}): {message}", self.code),
            (Some(code), None) => write!(f, "{code} ({})", self.code),
            (None, Some(message)) => write!(f, "error {}: {message}", self.code),
            (None, None) => write!(f, "error {}", self.code),
        }
    }
}

/// The primary error type used across keel crates.
///
/// Cloneable so that one underlying cause (for example a process exit) can be
/// delivered to every request that was waiting on it.
#[derive(Debug, Clone, Error)]
pub enum KeelError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// A request to an extension passed its deadline.
    #[error("request {request_id} timed out")]
    TimedOut { request_id: u64 },

    #[error("request cancelled: {0}")]
    Cancelled(String),

    /// Error object returned by an extension, kept verbatim.
    #[error("remote error: {0}")]
    Remote(RpcError),

    /// The extension process exited while work was outstanding.
    #[error("extension `{component}` exited ({status})")]
    ProcessExited { component: String, status: String },

    /// A launcher could not start a process.
    #[error("failed to launch `{path}`: {message}")]
    Launch {
        path: String,
        message: String,
        source: Option<Arc<std::io::Error>>,
    },

    /// Malformed frame or message on an extension stream.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Manifest or configuration problems.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("i/o error while {context}: {source}")]
    Io {
        context: String,
        source: Arc<std::io::Error>,
    },

    /// Several independent failures, e.g. from one dispose pass.
    #[error("{} errors occurred: {}", .0.len(), join_messages(.0))]
    Aggregate(Vec<KeelError>),

    #[error("internal error: {0}")]
    Internal(String),
}

fn join_messages(errors: &[KeelError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl KeelError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        KeelError::Io {
            context: context.into(),
            source: Arc::new(source),
        }
    }

    /// The protocol code this error is reported under.
    pub fn code(&self) -> ErrorCode {
        match self {
            KeelError::InvalidParams(_) | KeelError::Config(_) => ErrorCode::InvalidParams,
            KeelError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            KeelError::MethodNotFound(_) => ErrorCode::MethodNotFound,
            KeelError::TimedOut { .. } => ErrorCode::TimedOut,
            KeelError::Cancelled(_) | KeelError::ProcessExited { .. } => {
                ErrorCode::RequestCancelled
            }
            KeelError::Remote(error) => error.error_code().unwrap_or(ErrorCode::InternalError),
            KeelError::Protocol(_) => ErrorCode::ParseError,
            KeelError::Launch { .. }
            | KeelError::Io { .. }
            | KeelError::Aggregate(_)
            | KeelError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Renders this error as the wire error object.
    ///
    /// Remote errors pass through untouched so an extension's own code and
    /// message reach the original caller.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            KeelError::Remote(error) => error.clone(),
            other => RpcError::new(other.code(), other.to_string()),
        }
    }
}

impl From<RpcError> for KeelError {
    fn from(error: RpcError) -> Self {
        KeelError::Remote(error)
    }
}

impl From<serde_json::Error> for KeelError {
    fn from(error: serde_json::Error) -> Self {
        KeelError::InvalidParams(error.to_string())
    }
}
