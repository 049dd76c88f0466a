//! Error types for the appbridge runtime
//!
//! Domain errors use thiserror; request-scoped failures are rendered into
//! wire error objects at the channel boundary.

use std::io;
use std::path::PathBuf;

use serde_json::{Value, json};
use thiserror::Error;

use super::envelope::ErrorObject;
use super::schema::FieldViolation;

/// JSON-RPC code for an envelope that could not be understood.
pub const CODE_INVALID_REQUEST: i64 = -32600;
/// JSON-RPC code for an unrecognised request method.
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC code for argument validation failures.
pub const CODE_INVALID_PARAMS: i64 = -32602;
/// No tool with the requested name is registered.
pub const CODE_UNKNOWN_TOOL: i64 = -32001;
/// The channel has not completed the readiness handshake.
pub const CODE_PROTOCOL: i64 = -32002;
/// The tool exists but is not reachable from the caller's context.
pub const CODE_NOT_AUTHORIZED: i64 = -32003;
/// The tool handler failed.
pub const CODE_TOOL_EXECUTION: i64 = -32010;
/// No response arrived in time.
pub const CODE_TIMEOUT: i64 = -32011;
/// The channel was torn down while the request was pending.
pub const CODE_CHANNEL_CLOSED: i64 = -32012;
/// Too many requests are in flight on the channel.
pub const CODE_TOO_MANY_PENDING: i64 = -32013;

/// Top-level host error
#[derive(Debug, Error)]
pub enum HostError {
    /// Codec errors
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Request-scoped errors
    #[error("Request error: {0}")]
    Rpc(#[from] RpcError),

    /// Registration errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Message codec errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// The envelope does not have exactly one valid shape
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The frame was not valid JSON at all
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}

impl CodecError {
    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        CodecError::MalformedEnvelope(detail.into())
    }
}

/// Convenience result alias for codec operations
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Request-scoped errors. None of these tear down the channel except
/// `ChannelClosed`, which is reported once per pending request on teardown.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RpcError {
    /// No tool is registered under this name
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The tool exists but its namespace is not connected
    #[error("tool '{0}' is not authorized for this connection")]
    ToolNotAuthorized(String),

    /// The resource exists but its namespace is not connected, or it is unknown
    #[error("resource '{0}' is not available")]
    ResourceUnavailable(String),

    /// Arguments failed the tool's input contract
    #[error("invalid arguments: {}", summarize(.0))]
    InvalidArguments(Vec<FieldViolation>),

    /// The tool handler failed
    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    /// No response arrived before the deadline
    #[error("request {id} ({method}) timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Request identifier
        id: u64,
        /// Method of the timed-out request
        method: String,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// The channel closed before a response arrived
    #[error("channel closed")]
    ChannelClosed,

    /// The pending-request limit for the channel is exhausted
    #[error("too many pending requests (limit {0})")]
    TooManyPending(usize),

    /// The request method is not handled by this host
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Request params were missing or of the wrong shape
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// The request is not permitted in the channel's current state
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer answered with an error response
    #[error("remote error {}: {}", .0.code, .0.message)]
    Remote(ErrorObject),
}

fn summarize(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl RpcError {
    /// Numeric wire code for this error.
    pub fn code(&self) -> i64 {
        match self {
            RpcError::UnknownTool(_) => CODE_UNKNOWN_TOOL,
            RpcError::ToolNotAuthorized(_) | RpcError::ResourceUnavailable(_) => {
                CODE_NOT_AUTHORIZED
            }
            RpcError::InvalidArguments(_) | RpcError::InvalidParams(_) => CODE_INVALID_PARAMS,
            RpcError::ToolExecution(_) => CODE_TOOL_EXECUTION,
            RpcError::RequestTimeout { .. } => CODE_TIMEOUT,
            RpcError::ChannelClosed => CODE_CHANNEL_CLOSED,
            RpcError::TooManyPending(_) => CODE_TOO_MANY_PENDING,
            RpcError::MethodNotFound(_) => CODE_METHOD_NOT_FOUND,
            RpcError::Protocol(_) => CODE_PROTOCOL,
            RpcError::Remote(obj) => obj.code,
        }
    }

    /// Render the error as a wire error object.
    ///
    /// Authorization failures carry a generic message only: the tool or
    /// resource name, its namespace, and its contract never reach the caller.
    pub fn to_error_object(&self) -> ErrorObject {
        match self {
            RpcError::ToolNotAuthorized(_) | RpcError::ResourceUnavailable(_) => {
                ErrorObject::new(self.code(), "access denied")
            }
            RpcError::InvalidArguments(violations) => {
                let details: Vec<Value> = violations
                    .iter()
                    .map(|v| json!({ "field": v.field, "reason": v.reason }))
                    .collect();
                ErrorObject::new(self.code(), "invalid arguments")
                    .with_data(json!({ "violations": details }))
            }
            RpcError::Remote(obj) => obj.clone(),
            other => ErrorObject::new(other.code(), other.to_string()),
        }
    }
}

/// Convenience result alias for request-scoped operations
pub type RpcResult<T> = std::result::Result<T, RpcError>;

/// Startup-time registration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A tool with this name is already registered
    #[error("Tool '{0}' already registered")]
    DuplicateTool(String),

    /// A resource with this URI is already registered
    #[error("Resource '{0}' already registered")]
    DuplicateResource(String),

    /// A tool references a resource that does not exist
    #[error("Tool '{tool}' references unknown resource '{resource}'")]
    DanglingResource {
        /// Tool being registered
        tool: String,
        /// Missing resource URI
        resource: String,
    },

    /// A resource URI does not follow `ui://<namespace>/<path>`
    #[error("Invalid resource URI '{0}'")]
    InvalidResourceUri(String),

    /// A tool name is empty
    #[error("Tool name must not be empty")]
    EmptyToolName,
}

/// Convenience result alias for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds an unusable value
    #[error("Invalid value for '{field}': {detail}")]
    InvalidValue {
        /// Field name
        field: &'static str,
        /// Description of the problem
        detail: String,
    },

    /// Config file could not be written atomically
    #[error("Atomic write failed for {path}: {detail}")]
    AtomicWriteFailed {
        /// Path where write failed
        path: PathBuf,
        /// Error details
        detail: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Transport errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer side of the transport is gone
    #[error("transport closed")]
    Closed,
}

/// Result type using HostError
pub type Result<T> = std::result::Result<T, HostError>;
