//! Live binding between the host and one sandboxed client.
//!
//! A channel owns its correlation table, its notification handlers, and a
//! backlog of host-initiated notifications that are held until the client
//! announces readiness. Lifecycle:
//!
//! ```text
//! Attaching ──ui/ready──▶ Ready ──detach/error──▶ Closing ──drained──▶ Closed
//!     └────────────────detach/error─────────────────▲
//! ```
//!
//! Inbound envelopes are handled in arrival order on the channel's own task.
//! Responses and notifications complete synchronously; requests start in
//! order and may then interleave at their await points, so a slow tool call
//! does not hold up responses to the host's own requests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::access::{ContextProvider, resolve_visible_tools, resource_visible};
use super::config::HostConfig;
use super::correlation::{CorrelationTable, PendingSummary};
use super::dispatch::{self, CallToolParams};
use super::envelope::{Envelope, ErrorObject, Method, RequestId};
use super::error::{CODE_INVALID_REQUEST, RpcError, RpcResult};
use super::notification::NotificationRouter;
use super::registry::{Registry, ResourceUri};
use super::transport::{Frame, Inbox, Outbox};
use crate::PROTOCOL_VERSION;

/// Session identifier
pub type SessionId = Uuid;

/// Lifecycle state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// Transport established, client has not announced readiness
    Attaching,
    /// Client announced readiness
    Ready,
    /// Teardown in progress
    Closing,
    /// Terminal
    Closed,
}

impl ChannelState {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: ChannelState) -> bool {
        use ChannelState::*;
        matches!(
            (self, next),
            (Attaching, Ready) | (Attaching, Closing) | (Ready, Closing) | (Closing, Closed)
        )
    }
}

/// Result of a host-initiated notification push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Written to the transport
    Sent,
    /// Held until the client is ready
    Buffered,
    /// Discarded (channel closing or transport gone)
    Dropped,
}

/// State shared by every channel of one session manager.
pub(crate) struct HostShared {
    pub(crate) registry: Registry,
    pub(crate) contexts: Arc<dyn ContextProvider>,
    pub(crate) config: HostConfig,
}

/// One attached client.
pub struct Channel {
    id: SessionId,
    resource: Option<ResourceUri>,
    attached_at: DateTime<Utc>,
    state: watch::Sender<ChannelState>,
    outbox: Outbox,
    correlation: CorrelationTable,
    router: NotificationRouter,
    backlog: Mutex<VecDeque<(Method, Value)>>,
    host: Arc<HostShared>,
}

impl Channel {
    pub(crate) fn new(
        host: Arc<HostShared>,
        resource: Option<ResourceUri>,
        outbox: Outbox,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ChannelState::Attaching);
        Arc::new(Self {
            id: Uuid::new_v4(),
            resource,
            attached_at: Utc::now(),
            state,
            outbox,
            correlation: CorrelationTable::new(host.config.max_pending_requests),
            router: NotificationRouter::new(),
            backlog: Mutex::new(VecDeque::new()),
            host,
        })
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Watch lifecycle changes.
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// UI resource rendered by this client, if any.
    pub fn resource(&self) -> Option<&ResourceUri> {
        self.resource.as_ref()
    }

    /// Namespace of the rendered resource.
    pub fn namespace(&self) -> Option<&str> {
        self.resource.as_ref().map(ResourceUri::namespace)
    }

    /// When the client attached.
    pub fn attached_at(&self) -> DateTime<Utc> {
        self.attached_at
    }

    /// Outbound requests still awaiting a response.
    pub fn pending_requests(&self) -> Vec<PendingSummary> {
        self.correlation.pending()
    }

    /// Number of outbound requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.correlation.pending_count()
    }

    /// Register a notification handler, replacing any previous one for
    /// `method`. Returns whether a handler was replaced; fails once the
    /// channel is closing.
    pub fn on<F>(&self, method: Method, handler: F) -> RpcResult<bool>
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if self.state() >= ChannelState::Closing {
            return Err(RpcError::ChannelClosed);
        }
        let replaced = self.router.on(method, handler);
        // close() may have cleared the router between the check and the insert.
        if self.state() >= ChannelState::Closing {
            self.router.clear();
            return Err(RpcError::ChannelClosed);
        }
        Ok(replaced)
    }

    /// Remove the handler for `method`.
    pub fn off(&self, method: &Method) -> bool {
        self.router.off(method)
    }

    /// Send a request to the client using the configured timeout.
    pub async fn request(&self, method: Method, params: Value) -> RpcResult<Value> {
        self.request_with_timeout(method, params, self.host.config.request_timeout())
            .await
    }

    /// Send a request to the client with an explicit timeout.
    pub async fn request_with_timeout(
        &self,
        method: Method,
        params: Value,
        timeout: Duration,
    ) -> RpcResult<Value> {
        if self.state() >= ChannelState::Closing {
            return Err(RpcError::ChannelClosed);
        }
        self.correlation
            .issue(&self.outbox, method, params, timeout)
            .await
    }

    /// Push a host-initiated notification, holding it until the client is ready.
    pub fn push(&self, method: Method, params: Value) -> PushOutcome {
        let mut backlog = self.backlog.lock();
        match self.state() {
            ChannelState::Ready => match self.outbox.send(&Envelope::notification(method, params)) {
                Ok(()) => PushOutcome::Sent,
                Err(_) => PushOutcome::Dropped,
            },
            ChannelState::Attaching => {
                let limit = self.host.config.notification_buffer;
                if limit == 0 {
                    return PushOutcome::Dropped;
                }
                if backlog.len() >= limit {
                    if let Some((dropped, _)) = backlog.pop_front() {
                        warn!(session = %self.id, method = %dropped, "backlog full, dropping oldest notification");
                    }
                }
                backlog.push_back((method, params));
                PushOutcome::Buffered
            }
            ChannelState::Closing | ChannelState::Closed => PushOutcome::Dropped,
        }
    }

    /// Tear the channel down. Rejects every pending request with
    /// `ChannelClosed`, drops notification handlers and the backlog, and
    /// returns how many requests were rejected. Idempotent.
    pub fn close(&self) -> usize {
        if !self.transition(ChannelState::Closing) {
            return 0;
        }
        let rejected = self.correlation.close();
        self.router.clear();
        self.backlog.lock().clear();
        self.transition(ChannelState::Closed);
        info!(session = %self.id, rejected, "channel closed");
        rejected
    }

    fn transition(&self, next: ChannelState) -> bool {
        let id = self.id;
        self.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                debug!(session = %id, from = ?state, to = ?next, "channel state change");
                *state = next;
                true
            } else {
                false
            }
        })
    }

    fn mark_ready(&self) -> bool {
        let mut backlog = self.backlog.lock();
        if !self.transition(ChannelState::Ready) {
            return false;
        }
        let flushed = backlog.len();
        for (method, params) in backlog.drain(..) {
            if let Err(err) = self.outbox.send(&Envelope::notification(method, params)) {
                warn!(session = %self.id, error = %err, "failed to flush backlog");
                break;
            }
        }
        info!(session = %self.id, flushed, "channel ready");
        true
    }

    fn ensure_ready(&self) -> RpcResult<()> {
        if self.state() == ChannelState::Ready {
            Ok(())
        } else {
            Err(RpcError::Protocol(
                "ui/ready required before issuing requests".into(),
            ))
        }
    }

    /// Drive the channel until the peer disconnects or the channel is closed.
    pub(crate) async fn run(self: Arc<Self>, mut inbox: Inbox) {
        let mut state_rx = self.state.subscribe();
        let mut in_flight: FuturesUnordered<BoxFuture<'static, ()>> = FuturesUnordered::new();

        loop {
            tokio::select! {
                biased;
                _ = wait_closing(&mut state_rx) => break,
                _ = self.outbox.closed() => {
                    warn!(session = %self.id, "transport can no longer deliver frames");
                    break;
                }
                frame = inbox.recv() => match frame {
                    Some(frame) => {
                        if let Some(task) = self.handle_frame(frame) {
                            in_flight.push(task);
                        }
                    }
                    None => {
                        debug!(session = %self.id, "transport closed by peer");
                        break;
                    }
                },
                Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
            }
        }

        self.close();
        // In-flight handlers run to completion; their responses are discarded.
        while in_flight.next().await.is_some() {}
    }

    fn handle_frame(self: &Arc<Self>, frame: Frame) -> Option<BoxFuture<'static, ()>> {
        // Only frames that name a method were meant as requests.
        let request_id = frame
            .get("method")
            .and(frame.get("id"))
            .and_then(Value::as_u64);

        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(session = %self.id, error = %err, "dropping malformed envelope");
                if let Some(id) = request_id {
                    let reply = ErrorObject::new(CODE_INVALID_REQUEST, err.to_string());
                    let _ = self.outbox.send(&Envelope::failure(id, reply));
                }
                return None;
            }
        };

        match envelope {
            Envelope::Response { id, outcome } => {
                if !self.correlation.resolve(id, outcome) {
                    debug!(session = %self.id, request_id = id, "ignoring response for unknown or expired request");
                }
                None
            }
            Envelope::Notification { method, params } => {
                self.handle_notification(method, params);
                None
            }
            Envelope::Request { id, method, params } => {
                let this = Arc::clone(self);
                Some(async move { this.serve_request(id, method, params).await }.boxed())
            }
        }
    }

    fn handle_notification(&self, method: Method, params: Value) {
        match (&method, self.state()) {
            (Method::Ready, ChannelState::Attaching) => {
                self.mark_ready();
                self.router.dispatch(&method, &params);
            }
            (_, ChannelState::Ready) => {
                self.router.dispatch(&method, &params);
            }
            (_, state) => {
                debug!(session = %self.id, method = %method, ?state, "ignoring notification before ready");
            }
        }
    }

    async fn serve_request(self: Arc<Self>, id: RequestId, method: Method, params: Value) {
        let envelope = match self.answer(&method, params).await {
            Ok(result) => Envelope::success(id, result),
            Err(err) => {
                debug!(session = %self.id, request_id = id, method = %method, error = %err, "request failed");
                Envelope::failure(id, err.to_error_object())
            }
        };

        if self.state() >= ChannelState::Closing {
            debug!(session = %self.id, request_id = id, "channel closed before response was sent");
            return;
        }
        if let Err(err) = self.outbox.send(&envelope) {
            warn!(session = %self.id, request_id = id, error = %err, "response not delivered, closing");
            self.close();
        }
    }

    async fn answer(&self, method: &Method, params: Value) -> RpcResult<Value> {
        match method {
            Method::Initialize => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "host": { "name": "appbridge", "version": crate::VERSION },
                "sessionId": self.id.to_string(),
                "resourceUri": self.resource.as_ref().map(ResourceUri::as_str),
            })),
            Method::Ping => Ok(json!({})),
            Method::ToolsCall => {
                self.ensure_ready()?;
                let call = CallToolParams::from_params(params)?;
                let context = self.host.contexts.connection_context();
                let output =
                    dispatch::invoke(&self.host.registry, &call.name, call.arguments, &context)
                        .await?;
                serde_json::to_value(output)
                    .map_err(|err| RpcError::ToolExecution(format!("unserializable output: {err}")))
            }
            Method::ToolsList => {
                self.ensure_ready()?;
                let context = self.host.contexts.connection_context();
                let tools: Vec<Value> = resolve_visible_tools(&self.host.registry, &context)
                    .into_iter()
                    .map(|tool| tool.describe_json())
                    .collect();
                Ok(json!({ "tools": tools }))
            }
            Method::ResourcesList => {
                self.ensure_ready()?;
                let context = self.host.contexts.connection_context();
                let resources: Vec<Value> = self
                    .host
                    .registry
                    .resources()
                    .into_iter()
                    .filter(|resource| resource_visible(resource.uri().as_str(), &context))
                    .map(|resource| resource.describe())
                    .collect();
                Ok(json!({ "resources": resources }))
            }
            Method::ResourcesRead => {
                self.ensure_ready()?;
                let uri = params
                    .get("uri")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::InvalidParams("resources/read: missing uri".into()))?;
                let context = self.host.contexts.connection_context();
                match self.host.registry.resource(uri) {
                    Some(resource) if resource_visible(uri, &context) => Ok(resource.contents()),
                    _ => Err(RpcError::ResourceUnavailable(uri.to_string())),
                }
            }
            other => Err(RpcError::MethodNotFound(other.to_string())),
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn wait_closing(rx: &mut watch::Receiver<ChannelState>) {
    let _ = rx
        .wait_for(|state| *state >= ChannelState::Closing)
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_never_skip_states() {
        use ChannelState::*;
        assert!(Attaching.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
        assert!(Attaching.can_transition_to(Closing));

        assert!(!Attaching.can_transition_to(Closed));
        assert!(!Ready.can_transition_to(Closed));
        assert!(!Ready.can_transition_to(Attaching));
        assert!(!Closed.can_transition_to(Attaching));
        assert!(!Closed.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Ready));
    }
}
