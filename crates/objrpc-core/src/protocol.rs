//! Shared JSON-RPC 2.0 envelope types and the object reference token.
//!
//! Both the dispatcher and the client speak plain JSON-RPC 2.0 with one
//! extension: a registered live object travels as the string `hash:<id>`.

use crate::config::ProtocolConfig;
use crate::error::{RemoteException, RpcErrorKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

static REFERENCE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^hash:(\d+)$").expect("reference token regex must compile"));

/// Process-wide request id counter.
static REQUEST_ID: AtomicU64 = AtomicU64::new(0);

/// Generates a unique request id.
pub fn next_request_id() -> u64 {
    REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// Format the wire token for an object id.
pub fn reference_token(id: u64) -> String {
    format!("{}{}", ProtocolConfig::REFERENCE_PREFIX, id)
}

/// Parse a `hash:<digits>` token. Anything else is not a reference.
pub fn parse_reference(token: &str) -> Option<u64> {
    REFERENCE_TOKEN
        .captures(token)
        .and_then(|caps| caps.get(1))
        .and_then(|digits| digits.as_str().parse().ok())
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RequestEnvelope {
    /// Create a request with a fresh id.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: ProtocolConfig::JSONRPC_VERSION.to_string(),
            id: Some(Value::from(next_request_id())),
            method: method.into(),
            params,
        }
    }

    /// Create a notification: processed by the server, never answered.
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: ProtocolConfig::JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// `error.data` of a failure envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub exception: String,
    #[serde(default)]
    pub message: String,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: ErrorData,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseEnvelope {
    Success {
        jsonrpc: String,
        id: Option<Value>,
        result: Value,
    },
    Failure {
        jsonrpc: String,
        id: Option<Value>,
        error: ErrorObject,
    },
}

impl ResponseEnvelope {
    /// Create a success response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        ResponseEnvelope::Success {
            jsonrpc: ProtocolConfig::JSONRPC_VERSION.to_string(),
            id,
            result,
        }
    }

    /// Create an error response.
    ///
    /// The top-level message is `"<kind>: <detail>"`; `data` keeps the
    /// original exception name and message apart for diagnostics.
    pub fn error(
        id: Option<Value>,
        kind: RpcErrorKind,
        exception: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        let detail = detail.into();
        let message = match kind {
            RpcErrorKind::ApplicationError => kind.label().to_string(),
            _ => format!("{}: {}", kind.label(), detail),
        };
        ResponseEnvelope::Failure {
            jsonrpc: ProtocolConfig::JSONRPC_VERSION.to_string(),
            id,
            error: ErrorObject {
                code: kind.code(),
                message,
                data: ErrorData {
                    exception: exception.into(),
                    message: detail,
                },
            },
        }
    }

    pub fn id(&self) -> Option<&Value> {
        match self {
            ResponseEnvelope::Success { id, .. } | ResponseEnvelope::Failure { id, .. } => {
                id.as_ref()
            }
        }
    }

    /// Split into the result value or the decoded remote exception.
    pub fn into_result(self) -> std::result::Result<Value, RemoteException> {
        match self {
            ResponseEnvelope::Success { result, .. } => Ok(result),
            ResponseEnvelope::Failure { error, .. } => Err(RemoteException {
                code: error.code,
                message: error.message,
                exception: error.data.exception,
                detail: error.data.message,
            }),
        }
    }
}
