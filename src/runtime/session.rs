//! Session manager
//!
//! Owns the set of live channels. Attaching a client creates a channel and
//! spawns its driver task; the channel removes itself from the manager when
//! the driver stops. The manager is also the entry point for externally
//! triggered tool calls, whose inputs and results are pushed to every
//! channel rendering the tool's namespace.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::access::{ConnectionContext, ContextProvider, resource_visible};
use super::channel::{Channel, ChannelState, HostShared, PushOutcome, SessionId};
use super::config::{HostConfig, RevocationPolicy};
use super::dispatch;
use super::envelope::Method;
use super::error::{RpcError, RpcResult};
use super::registry::{Registry, ResourceUri, ToolDefinition, ToolOutput};
use super::transport::Endpoint;

/// Snapshot of one live session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    /// Session identifier
    pub id: SessionId,
    /// Rendered UI resource
    pub resource_uri: Option<String>,
    /// Namespace of the rendered resource
    pub namespace: Option<String>,
    /// Lifecycle state
    pub state: ChannelState,
    /// Host-to-client requests awaiting a response
    pub pending: usize,
    /// When the client attached
    pub attached_at: DateTime<Utc>,
}

impl SessionInfo {
    fn of(channel: &Channel) -> Self {
        Self {
            id: channel.id(),
            resource_uri: channel.resource().map(|uri| uri.as_str().to_string()),
            namespace: channel.namespace().map(str::to_string),
            state: channel.state(),
            pending: channel.pending_count(),
            attached_at: channel.attached_at(),
        }
    }
}

type SessionMap = Arc<RwLock<HashMap<SessionId, Arc<Channel>>>>;

/// Owner of all live channels.
pub struct SessionManager {
    host: Arc<HostShared>,
    sessions: SessionMap,
}

impl SessionManager {
    /// Create a manager over a frozen registry.
    ///
    /// `contexts` is consulted afresh for every client-initiated request.
    pub fn new(registry: Registry, contexts: Arc<dyn ContextProvider>, config: HostConfig) -> Self {
        Self {
            host: Arc::new(HostShared {
                registry,
                contexts,
                config,
            }),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The shared registry.
    pub fn registry(&self) -> &Registry {
        &self.host.registry
    }

    /// The host configuration.
    pub fn config(&self) -> &HostConfig {
        &self.host.config
    }

    /// Attach a client rendering `resource_uri` over `endpoint`.
    ///
    /// The resource must be registered and its namespace connected in the
    /// current context. A client without a resource (`None`) only reaches
    /// tools and resources through the access filter. Must be called from
    /// within a tokio runtime.
    pub fn attach(&self, resource_uri: Option<&str>, endpoint: Endpoint) -> RpcResult<Arc<Channel>> {
        let resource = match resource_uri {
            Some(uri) => {
                let context = self.host.contexts.connection_context();
                let parsed = ResourceUri::parse(uri)
                    .filter(|_| self.host.registry.resource(uri).is_some())
                    .filter(|_| resource_visible(uri, &context))
                    .ok_or_else(|| RpcError::ResourceUnavailable(uri.to_string()))?;
                Some(parsed)
            }
            None => None,
        };

        let (outbox, inbox) = endpoint.split();
        let channel = Channel::new(self.host.clone(), resource, outbox);
        let id = channel.id();
        self.sessions.write().insert(id, channel.clone());
        info!(session = %id, resource = ?resource_uri, "channel attached");

        let sessions = self.sessions.clone();
        let driver = channel.clone();
        tokio::spawn(async move {
            driver.run(inbox).await;
            sessions.write().remove(&id);
            debug!(session = %id, "channel driver stopped");
        });

        Ok(channel)
    }

    /// Look up a live channel.
    pub fn channel(&self, id: &SessionId) -> Option<Arc<Channel>> {
        self.sessions.read().get(id).cloned()
    }

    /// Snapshot of every live session.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut out: Vec<SessionInfo> = self
            .sessions
            .read()
            .values()
            .map(|channel| SessionInfo::of(channel))
            .collect();
        out.sort_by_key(|info| info.attached_at);
        out
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Detach a client. A ready client first gets a `ui/resource-teardown`
    /// request, bounded by the configured teardown timeout; the channel is
    /// then closed. Returns how many pending requests were rejected, or
    /// `None` if the session is unknown.
    pub async fn detach(&self, id: &SessionId) -> Option<usize> {
        let channel = self.sessions.write().remove(id)?;

        if channel.state() == ChannelState::Ready {
            let teardown = channel
                .request_with_timeout(
                    Method::Teardown,
                    json!({}),
                    self.host.config.teardown_timeout(),
                )
                .await;
            if let Err(err) = teardown {
                debug!(session = %id, error = %err, "teardown request not acknowledged");
            }
        }

        Some(channel.close())
    }

    /// Run a tool on behalf of an external caller (e.g. an agent turn).
    ///
    /// Once the call is authorized and its arguments validate, channels
    /// rendering the tool's namespace receive `ui/notifications/tool-input`;
    /// after success they receive `ui/notifications/tool-result`. Channels
    /// that are not ready yet get the notifications once they are. A call
    /// rejected before execution pushes nothing.
    pub async fn invoke_tool(
        &self,
        name: &str,
        arguments: Value,
        context: &ConnectionContext,
    ) -> RpcResult<ToolOutput> {
        let tool = dispatch::authorize(&self.host.registry, name, &arguments, context)?;
        let targets = self.channels_rendering(tool);

        for channel in &targets {
            channel.push(
                Method::ToolInput,
                json!({ "toolName": name, "arguments": arguments }),
            );
        }

        let output = dispatch::execute(tool, arguments).await?;

        for channel in &targets {
            let outcome = channel.push(
                Method::ToolResult,
                json!({ "toolName": name, "structuredContent": output.structured_content }),
            );
            if outcome == PushOutcome::Dropped {
                debug!(session = %channel.id(), tool = name, "tool result not delivered");
            }
        }

        Ok(output)
    }

    /// Apply the revocation policy against a new context. Returns the
    /// sessions whose namespace is no longer connected; with
    /// [`RevocationPolicy::Close`] those sessions are also torn down.
    pub async fn revalidate(&self, context: &ConnectionContext) -> Vec<SessionId> {
        let revoked: Vec<Arc<Channel>> = self
            .sessions
            .read()
            .values()
            .filter(|channel| {
                channel
                    .namespace()
                    .is_some_and(|ns| !context.is_connected(ns))
            })
            .cloned()
            .collect();

        let ids: Vec<SessionId> = revoked.iter().map(|channel| channel.id()).collect();
        match self.host.config.revocation_policy {
            RevocationPolicy::Keep => {
                for id in &ids {
                    info!(session = %id, "namespace disconnected; keeping session open");
                }
            }
            RevocationPolicy::Close => {
                for id in &ids {
                    warn!(session = %id, "namespace disconnected; closing session");
                    self.detach(id).await;
                }
            }
        }
        ids
    }

    /// Close every session.
    pub async fn shutdown(&self) {
        let ids: Vec<SessionId> = self.sessions.read().keys().copied().collect();
        for id in ids {
            self.detach(&id).await;
        }
    }

    fn channels_rendering(&self, tool: &ToolDefinition) -> Vec<Arc<Channel>> {
        let Some(namespace) = tool.namespace() else {
            return Vec::new();
        };

        self.sessions
            .read()
            .values()
            .filter(|channel| channel.namespace() == Some(namespace))
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("registry", &self.host.registry)
            .field("sessions", &self.sessions.read().len())
            .finish()
    }
}
