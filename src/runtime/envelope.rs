//! Envelope codec for the host/app wire protocol.
//!
//! Every frame on a channel is one JSON object tagged with the protocol
//! version. The shape of the object decides what it is:
//!
//! - `id` + `method` → request
//! - `method` without `id` → notification
//! - `id` without `method`, with exactly one of `result`/`error` → response
//!
//! Anything else is rejected as [`CodecError::MalformedEnvelope`]. Method
//! names are mapped onto the closed [`Method`] enum so dispatch is a `match`
//! rather than a string lookup.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{CodecError, CodecResult};
use crate::PROTOCOL_VERSION;

/// Wire key carrying the protocol tag.
pub const TAG_KEY: &str = "jsonrpc";
/// Short alias for the protocol tag accepted on decode.
pub const TAG_ALIAS: &str = "v";

/// Request identifier, allocated per channel.
pub type RequestId = u64;

/// Error body of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric error code
    pub code: i64,
    /// Human-readable message
    pub message: String,
    /// Optional structured details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Build an error object without details.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured details. `null` means no details.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = (!data.is_null()).then_some(data);
        self
    }
}

/// Methods understood by the host, with a fallback for everything else.
///
/// Equality and hashing go by wire name, so `Other("ping")` and `Ping`
/// are the same method.
#[derive(Debug, Clone)]
pub enum Method {
    /// `ui/initialize` handshake request
    Initialize,
    /// `ui/ready` readiness notification
    Ready,
    /// `tools/call` request
    ToolsCall,
    /// `tools/list` request
    ToolsList,
    /// `resources/read` request
    ResourcesRead,
    /// `resources/list` request
    ResourcesList,
    /// `ui/notifications/tool-result` notification pushed after a tool call
    ToolResult,
    /// `ui/notifications/tool-input` notification pushed before a tool call
    ToolInput,
    /// `ui/resource-teardown` request sent before detaching
    Teardown,
    /// `ping` liveness request
    Ping,
    /// Any method not listed above
    Other(String),
}

impl Method {
    /// Wire name of the method.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Initialize => "ui/initialize",
            Method::Ready => "ui/ready",
            Method::ToolsCall => "tools/call",
            Method::ToolsList => "tools/list",
            Method::ResourcesRead => "resources/read",
            Method::ResourcesList => "resources/list",
            Method::ToolResult => "ui/notifications/tool-result",
            Method::ToolInput => "ui/notifications/tool-input",
            Method::Teardown => "ui/resource-teardown",
            Method::Ping => "ping",
            Method::Other(name) => name,
        }
    }
}

impl PartialEq for Method {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Method {}

impl Hash for Method {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl From<&str> for Method {
    fn from(name: &str) -> Self {
        match name {
            "ui/initialize" => Method::Initialize,
            "ui/ready" => Method::Ready,
            "tools/call" => Method::ToolsCall,
            "tools/list" => Method::ToolsList,
            "resources/read" => Method::ResourcesRead,
            "resources/list" => Method::ResourcesList,
            "ui/notifications/tool-result" => Method::ToolResult,
            "ui/notifications/tool-input" => Method::ToolInput,
            "ui/resource-teardown" => Method::Teardown,
            "ping" => Method::Ping,
            other => Method::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of wire communication.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// A call expecting a response with the same id
    Request {
        /// Caller-assigned identifier
        id: RequestId,
        /// Method being invoked
        method: Method,
        /// Structured parameters (object or array)
        params: Value,
    },
    /// Fire-and-forget message
    Notification {
        /// Method being signalled
        method: Method,
        /// Structured parameters (object or array)
        params: Value,
    },
    /// Answer to an earlier request
    Response {
        /// Identifier of the request being answered
        id: RequestId,
        /// Either the result or the error body
        outcome: Result<Value, ErrorObject>,
    },
}

impl Envelope {
    /// Build a request envelope.
    ///
    /// Params are stored in wire shape: `null` becomes `{}` and a bare
    /// scalar is wrapped in a one-element array.
    pub fn request(id: RequestId, method: Method, params: Value) -> Self {
        Envelope::Request {
            id,
            method,
            params: structured_params(params),
        }
    }

    /// Build a notification envelope. Params are normalized as in
    /// [`Envelope::request`].
    pub fn notification(method: Method, params: Value) -> Self {
        Envelope::Notification {
            method,
            params: structured_params(params),
        }
    }

    /// Build a successful response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Envelope::Response {
            id,
            outcome: Ok(result),
        }
    }

    /// Build an error response.
    pub fn failure(id: RequestId, error: ErrorObject) -> Self {
        Envelope::Response {
            id,
            outcome: Err(error),
        }
    }

    /// Identifier, if the envelope has one.
    pub fn id(&self) -> Option<RequestId> {
        match self {
            Envelope::Request { id, .. } | Envelope::Response { id, .. } => Some(*id),
            Envelope::Notification { .. } => None,
        }
    }

    /// Method, if the envelope has one.
    pub fn method(&self) -> Option<&Method> {
        match self {
            Envelope::Request { method, .. } | Envelope::Notification { method, .. } => {
                Some(method)
            }
            Envelope::Response { .. } => None,
        }
    }

    /// Encode into a JSON value.
    pub fn encode(&self) -> Value {
        let mut obj = Map::new();
        obj.insert(TAG_KEY.into(), Value::String(PROTOCOL_VERSION.into()));
        match self {
            Envelope::Request { id, method, params } => {
                obj.insert("id".into(), Value::from(*id));
                obj.insert("method".into(), Value::String(method.as_str().into()));
                obj.insert("params".into(), structured_params(params.clone()));
            }
            Envelope::Notification { method, params } => {
                obj.insert("method".into(), Value::String(method.as_str().into()));
                obj.insert("params".into(), structured_params(params.clone()));
            }
            Envelope::Response { id, outcome } => {
                obj.insert("id".into(), Value::from(*id));
                match outcome {
                    Ok(result) => {
                        obj.insert("result".into(), result.clone());
                    }
                    Err(error) => {
                        obj.insert("error".into(), error_to_value(error));
                    }
                }
            }
        }
        Value::Object(obj)
    }

    /// Encode into a single NDJSON line (without the trailing newline).
    pub fn encode_line(&self) -> String {
        self.encode().to_string()
    }

    /// Decode a JSON value, validating the envelope shape.
    pub fn decode(value: Value) -> CodecResult<Self> {
        let Value::Object(mut obj) = value else {
            return Err(CodecError::malformed("envelope must be a JSON object"));
        };

        let tag = obj.remove(TAG_KEY).or_else(|| obj.remove(TAG_ALIAS));
        match tag {
            Some(Value::String(tag)) if tag == PROTOCOL_VERSION => {}
            Some(other) => {
                return Err(CodecError::malformed(format!(
                    "protocol tag mismatch: expected {}, got {}",
                    PROTOCOL_VERSION, other
                )));
            }
            None => return Err(CodecError::malformed("missing protocol tag")),
        }

        let id = match obj.remove("id") {
            None => None,
            Some(value) => Some(value.as_u64().ok_or_else(|| {
                CodecError::malformed(format!("id must be an unsigned integer, got {value}"))
            })?),
        };

        let method = match obj.remove("method") {
            None => None,
            Some(Value::String(name)) => Some(Method::from(name.as_str())),
            Some(other) => {
                return Err(CodecError::malformed(format!(
                    "method must be a string, got {other}"
                )));
            }
        };

        let result = obj.remove("result");
        let error = obj.remove("error");
        if result.is_some() && error.is_some() {
            return Err(CodecError::malformed("both result and error present"));
        }

        match (id, method) {
            (None, None) => Err(CodecError::malformed("neither id nor method present")),
            (id, Some(method)) => {
                if result.is_some() || error.is_some() {
                    return Err(CodecError::malformed(format!(
                        "{method} carries a response body"
                    )));
                }
                let params = decode_params(obj.remove("params"))?;
                Ok(match id {
                    Some(id) => Envelope::Request { id, method, params },
                    None => Envelope::Notification { method, params },
                })
            }
            (Some(id), None) => {
                let outcome = match (result, error) {
                    (Some(result), None) => Ok(result),
                    (None, Some(error)) => Err(decode_error(error)?),
                    _ => {
                        return Err(CodecError::malformed(format!(
                            "response {id} has neither result nor error"
                        )));
                    }
                };
                Ok(Envelope::Response { id, outcome })
            }
        }
    }

    /// Decode one NDJSON line.
    pub fn decode_str(line: &str) -> CodecResult<Self> {
        let value: Value =
            serde_json::from_str(line).map_err(|err| CodecError::InvalidJson(err.to_string()))?;
        Self::decode(value)
    }
}

fn structured_params(params: Value) -> Value {
    match params {
        Value::Null => Value::Object(Map::new()),
        value @ (Value::Object(_) | Value::Array(_)) => value,
        scalar => Value::Array(vec![scalar]),
    }
}

fn decode_params(params: Option<Value>) -> CodecResult<Value> {
    match params {
        None | Some(Value::Null) => Ok(Value::Object(Map::new())),
        Some(value @ (Value::Object(_) | Value::Array(_))) => Ok(value),
        Some(other) => Err(CodecError::malformed(format!(
            "params must be an object or array, got {other}"
        ))),
    }
}

fn decode_error(value: Value) -> CodecResult<ErrorObject> {
    serde_json::from_value(value)
        .map_err(|err| CodecError::malformed(format!("invalid error body: {err}")))
}

fn error_to_value(error: &ErrorObject) -> Value {
    let mut obj = Map::new();
    obj.insert("code".into(), Value::from(error.code));
    obj.insert("message".into(), Value::String(error.message.clone()));
    if let Some(data) = &error.data {
        obj.insert("data".into(), data.clone());
    }
    Value::Object(obj)
}
