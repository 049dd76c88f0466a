//! Newline-delimited JSON front end for the session manager.
//!
//! Each connection (stdio, or one accepted TCP stream) becomes one channel:
//! the byte stream is framed as NDJSON, attached to the [`SessionManager`],
//! and served until the peer disconnects or the session is detached. This
//! backs the `appbridge-cli serve` command.

use std::io;
use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::runtime::channel::{ChannelState, SessionId};
use crate::runtime::config::HostConfig;
use crate::runtime::error::RpcError;
use crate::runtime::registry::{Catalog, ResourceDefinition, ToolDefinition, ToolOutput, UI_MIME_TYPE};
use crate::runtime::schema::{FieldKind, FieldSpec, InputContract};
use crate::runtime::session::SessionManager;
use crate::runtime::transport::spawn_line_transport;

/// Errors produced while serving a connection.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The client could not be attached
    #[error("attach failed: {0}")]
    Attach(#[from] RpcError),
    /// Socket-level failure
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Serves NDJSON connections as channels of one session manager.
pub struct Service {
    manager: Arc<SessionManager>,
    resource_uri: Option<String>,
}

impl Service {
    /// Serve clients rendering `resource_uri` (or no resource).
    pub fn new(manager: Arc<SessionManager>, resource_uri: Option<String>) -> Self {
        Self {
            manager,
            resource_uri,
        }
    }

    /// The underlying session manager.
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Serve one connection until the peer disconnects or the session closes.
    pub async fn handle<R, W>(&self, reader: R, writer: W) -> Result<SessionId, ServiceError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        serve_lines(&self.manager, self.resource_uri.as_deref(), reader, writer).await
    }

    /// Accept TCP connections forever, one channel per connection.
    pub async fn listen(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        let local = listener.local_addr()?;
        info!(addr = %local, "listening");

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "failed to accept connection");
                    continue;
                }
            };

            let service = self.clone();
            tokio::spawn(async move {
                let (reader, writer) = stream.into_split();
                match service.handle(reader, writer).await {
                    Ok(id) => info!(session = %id, peer = %peer, "connection finished"),
                    Err(err) => warn!(peer = %peer, error = %err, "connection error"),
                }
            });
        }
    }
}

/// Attach one channel to an NDJSON byte stream and serve it until the
/// stream ends or the session is detached.
pub async fn serve_lines<R, W>(
    manager: &SessionManager,
    resource_uri: Option<&str>,
    reader: R,
    writer: W,
) -> Result<SessionId, ServiceError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let endpoint = spawn_line_transport(reader, writer);
    let channel = manager.attach(resource_uri, endpoint)?;
    let id = channel.id();

    let mut state = channel.subscribe();
    drop(channel);
    let _ = state
        .wait_for(|state| *state == ChannelState::Closed)
        .await;

    Ok(id)
}

/// Build a catalog holding every resource listed in `config`, plus the
/// built-in `echo` utility tool.
pub fn catalog_from_config(config: &HostConfig) -> anyhow::Result<Catalog> {
    let mut catalog = Catalog::new();
    for source in &config.resources {
        let content = std::fs::read_to_string(&source.path)
            .with_context(|| format!("Failed to read resource file: {:?}", source.path))?;
        let mime = source.mime_type.as_deref().unwrap_or(UI_MIME_TYPE);
        let resource = ResourceDefinition::new(&source.uri, content, mime)?;
        catalog.register_resource(resource)?;
    }
    catalog.register_tool(echo_tool())?;
    Ok(catalog)
}

/// Utility tool that returns its `message` argument.
pub fn echo_tool() -> ToolDefinition {
    ToolDefinition::from_fn(
        "echo",
        InputContract::new().field(
            FieldSpec::new("message", FieldKind::String)
                .required()
                .describe("Text to send back"),
        ),
        |args| {
            let message = args
                .get("message")
                .and_then(|value| value.as_str())
                .unwrap_or_default()
                .to_string();
            Ok(ToolOutput::text(message.clone()).with_structured(json!({ "message": message })))
        },
    )
    .describe("Echo a message back to the caller")
}
