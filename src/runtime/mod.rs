//! Protocol core and public API
//!
//! This module groups the pieces of the host runtime: the envelope codec,
//! per-channel correlation and notification routing, the tool and resource
//! registries with their access filter, and the session manager that ties
//! them to live transports.

pub mod access;
pub mod channel;
pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod notification;
pub mod registry;
pub mod schema;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use access::{ConnectionContext, ContextProvider, SharedConnections, resolve_visible_tools};
pub use channel::{Channel, ChannelState, PushOutcome, SessionId};
pub use config::{HostConfig, RevocationPolicy};
pub use envelope::{Envelope, ErrorObject, Method};
pub use error::{HostError, Result, RpcError};
pub use registry::{Catalog, Registry, ResourceDefinition, ToolDefinition, ToolOutput};
pub use schema::{FieldKind, FieldSpec, InputContract};
pub use session::{SessionInfo, SessionManager};
pub use transport::Endpoint;
