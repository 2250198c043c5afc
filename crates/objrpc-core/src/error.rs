//! Error types for objrpc.
//!
//! Server-origin failures are described by [`RpcErrorKind`] (the code carried in
//! an error envelope) and [`Fault`] (the "exception" raised by application code
//! or by member resolution). Client-origin failures are [`ClientError`].

use thiserror::Error;

/// Protocol error kinds and their JSON-RPC codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcErrorKind {
    /// Payload is not valid JSON.
    ParseError,
    /// Missing `jsonrpc` or `method`.
    InvalidRequest,
    /// Dotted method path does not resolve.
    MethodNotFound,
    /// Params are neither a sequence nor a mapping.
    InvalidParams,
    /// Reserved for dispatcher-internal faults.
    InternalError,
    /// Generic server-side fault.
    ServerError,
    /// Application code raised during invocation.
    ApplicationError,
}

impl RpcErrorKind {
    /// Convert to a JSON-RPC error code.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32600: Invalid Request
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    /// - -32000: Server error
    ///
    /// Application exceptions use code `1`, outside the reserved range.
    pub fn code(self) -> i64 {
        match self {
            RpcErrorKind::ParseError => -32700,
            RpcErrorKind::InvalidRequest => -32600,
            RpcErrorKind::MethodNotFound => -32601,
            RpcErrorKind::InvalidParams => -32602,
            RpcErrorKind::InternalError => -32603,
            RpcErrorKind::ServerError => -32000,
            RpcErrorKind::ApplicationError => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -32700 => Some(RpcErrorKind::ParseError),
            -32600 => Some(RpcErrorKind::InvalidRequest),
            -32601 => Some(RpcErrorKind::MethodNotFound),
            -32602 => Some(RpcErrorKind::InvalidParams),
            -32603 => Some(RpcErrorKind::InternalError),
            -32000 => Some(RpcErrorKind::ServerError),
            1 => Some(RpcErrorKind::ApplicationError),
            _ => None,
        }
    }

    /// Prefix used for the top-level `message` of an error envelope.
    pub fn label(self) -> &'static str {
        match self {
            RpcErrorKind::ParseError => "ParseError",
            RpcErrorKind::InvalidRequest => "InvalidRequest",
            RpcErrorKind::MethodNotFound => "MethodNotFound",
            RpcErrorKind::InvalidParams => "InvalidParams",
            RpcErrorKind::InternalError => "InternalError",
            RpcErrorKind::ServerError => "ServerError",
            RpcErrorKind::ApplicationError => "application exception",
        }
    }
}

/// An exception raised on the server side.
///
/// `exception` is the type name reported in `data.exception`, `message` ends up
/// in `data.message`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{exception}: {message}")]
pub struct Fault {
    pub exception: String,
    pub message: String,
}

impl Fault {
    pub const ATTRIBUTE_ERROR: &'static str = "AttributeError";
    pub const TYPE_ERROR: &'static str = "TypeError";
    pub const VALUE_ERROR: &'static str = "ValueError";
    pub const KEY_ERROR: &'static str = "KeyError";
    pub const NOT_FOUND: &'static str = "NotFound";

    pub fn new(exception: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exception: exception.into(),
            message: message.into(),
        }
    }

    pub fn attribute(message: impl Into<String>) -> Self {
        Self::new(Self::ATTRIBUTE_ERROR, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(Self::TYPE_ERROR, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(Self::VALUE_ERROR, message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::new(Self::KEY_ERROR, message)
    }

    /// Attribute faults are reported as `MethodNotFound` by the dispatcher.
    pub fn is_attribute_error(&self) -> bool {
        self.exception == Self::ATTRIBUTE_ERROR
    }
}

/// Registry lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("No object registered under id {0}")]
    NotFound(u64),

    #[error("Object registry lock poisoned")]
    LockPoisoned,
}

impl From<RegistryError> for Fault {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => Fault::new(Fault::NOT_FOUND, err.to_string()),
            RegistryError::LockPoisoned => Fault::new("InternalError", err.to_string()),
        }
    }
}

/// Failures of the transport collaborator, surfaced unchanged to callers.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} from {endpoint}")]
    Status { endpoint: String, status: u16 },

    #[error("No route for endpoint {0}")]
    NoRoute(String),

    #[error("Response body is not JSON: {0}")]
    MalformedBody(#[source] serde_json::Error),
}

/// A decoded error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{exception}: {detail}")]
pub struct RemoteException {
    /// `error.code` of the envelope.
    pub code: i64,
    /// Top-level `error.message`.
    pub message: String,
    /// `error.data.exception`: type name of the original exception.
    pub exception: String,
    /// `error.data.message`: message of the original exception.
    pub detail: String,
}

impl RemoteException {
    pub fn kind(&self) -> Option<RpcErrorKind> {
        RpcErrorKind::from_code(self.code)
    }
}

/// Client-side error type.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Remote exception {0}")]
    Remote(#[from] RemoteException),

    #[error("No attribute named {member} exists on {target}")]
    NoSuchMember { target: String, member: String },

    #[error("Will not attempt to change function {member} on {target}")]
    ImmutableMember { target: String, member: String },

    #[error("Member {member} of {target} is not {expected}")]
    MemberKind {
        target: String,
        member: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Thunk was produced by a different batch")]
    ForeignThunk,
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
