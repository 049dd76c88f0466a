//! Appbridge – host-side runtime for sandboxed UI apps
//!
//! This crate implements the host half of a small RPC protocol spoken with
//! sandboxed UI clients:
//! - A strict envelope codec for requests, responses, and notifications
//! - Per-channel request correlation with timeouts and teardown rejection
//! - Per-channel notification routing with contained handler failures
//! - Tool and UI-resource registries frozen at startup
//! - Namespace-based access filtering driven by an explicit connection context
//! - A session manager that owns channel lifecycles and pushes tool results
//! - A newline-delimited JSON service for stdio and TCP clients

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Protocol core modules
pub mod runtime;

/// Line-delimited JSON front end
pub mod service;

// Re-export key types for convenience
pub use runtime::{HostConfig, SessionManager};

/// Current version of the appbridge runtime
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol tag carried by every envelope
pub const PROTOCOL_VERSION: &str = "2.0";
