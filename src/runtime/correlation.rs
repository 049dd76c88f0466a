//! Per-channel correlation of outbound requests with their responses.
//!
//! Every outbound request gets the next id from a monotonic counter and a
//! [`PendingRequest`] entry holding a oneshot responder. An entry leaves the
//! table exactly once: when its response arrives, when its timeout expires,
//! or when the channel closes. Ids are never reused, so a response that
//! arrives after its entry has gone is simply ignored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::envelope::{Envelope, ErrorObject, Method, RequestId};
use super::error::{RpcError, RpcResult};
use super::transport::Outbox;

/// An in-flight outbound request.
#[derive(Debug)]
pub struct PendingRequest {
    /// Request identifier
    pub id: RequestId,
    /// Method that was invoked
    pub method: Method,
    /// When the request was issued
    pub issued_at: DateTime<Utc>,
    responder: oneshot::Sender<RpcResult<Value>>,
}

/// Diagnostic view of a pending request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingSummary {
    /// Request identifier
    pub id: RequestId,
    /// Method name
    pub method: String,
    /// When the request was issued
    pub issued_at: DateTime<Utc>,
}

struct Table {
    entries: HashMap<RequestId, PendingRequest>,
    closed: bool,
}

/// Correlation table owned by one channel.
pub struct CorrelationTable {
    next_id: AtomicU64,
    table: Mutex<Table>,
    max_pending: usize,
}

impl CorrelationTable {
    /// Empty table allowing up to `max_pending` concurrent requests.
    pub fn new(max_pending: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            table: Mutex::new(Table {
                entries: HashMap::new(),
                closed: false,
            }),
            max_pending,
        }
    }

    /// Allocate an id and register a pending entry for it.
    pub fn register(
        &self,
        method: &Method,
    ) -> RpcResult<(RequestId, oneshot::Receiver<RpcResult<Value>>)> {
        let mut table = self.table.lock();
        if table.closed {
            return Err(RpcError::ChannelClosed);
        }
        if table.entries.len() >= self.max_pending {
            return Err(RpcError::TooManyPending(self.max_pending));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        table.entries.insert(
            id,
            PendingRequest {
                id,
                method: method.clone(),
                issued_at: Utc::now(),
                responder: tx,
            },
        );
        Ok((id, rx))
    }

    /// Send a request through `outbox` and wait for its outcome.
    pub async fn issue(
        &self,
        outbox: &Outbox,
        method: Method,
        params: Value,
        timeout: Duration,
    ) -> RpcResult<Value> {
        let (id, rx) = self.register(&method)?;
        let method_name = method.to_string();

        if outbox.send(&Envelope::request(id, method, params)).is_err() {
            self.forget(id);
            return Err(RpcError::ChannelClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RpcError::ChannelClosed),
            Err(_) => {
                self.forget(id);
                warn!(request_id = id, method = %method_name, "request timed out");
                Err(RpcError::RequestTimeout {
                    id,
                    method: method_name,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Deliver a response. Returns `false` if no request with `id` is pending.
    pub fn resolve(&self, id: RequestId, outcome: Result<Value, ErrorObject>) -> bool {
        let entry = self.table.lock().entries.remove(&id);
        match entry {
            Some(pending) => {
                let result = outcome.map_err(RpcError::Remote);
                if pending.responder.send(result).is_err() {
                    debug!(request_id = id, "requester went away before response");
                }
                true
            }
            None => false,
        }
    }

    /// Reject every pending request with `ChannelClosed` and refuse new ones.
    /// Returns how many requests were rejected.
    pub fn close(&self) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut table = self.table.lock();
            table.closed = true;
            table.entries.drain().map(|(_, pending)| pending).collect()
        };

        let count = drained.len();
        for pending in drained {
            let _ = pending.responder.send(Err(RpcError::ChannelClosed));
        }
        count
    }

    /// Number of requests in flight.
    pub fn pending_count(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Whether `id` is still awaiting a response.
    pub fn is_pending(&self, id: RequestId) -> bool {
        self.table.lock().entries.contains_key(&id)
    }

    /// Pending requests ordered by id.
    pub fn pending(&self) -> Vec<PendingSummary> {
        let table = self.table.lock();
        let mut out: Vec<PendingSummary> = table
            .entries
            .values()
            .map(|p| PendingSummary {
                id: p.id,
                method: p.method.to_string(),
                issued_at: p.issued_at,
            })
            .collect();
        out.sort_by_key(|p| p.id);
        out
    }

    fn forget(&self, id: RequestId) {
        self.table.lock().entries.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::transport::Endpoint;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let table = CorrelationTable::new(10);
        let (a, _ra) = table.register(&Method::Ping).unwrap();
        assert!(table.resolve(a, Ok(json!({}))));
        let (b, _rb) = table.register(&Method::Ping).unwrap();
        assert!(b > a);
    }

    #[test]
    fn limit_is_enforced() {
        let table = CorrelationTable::new(1);
        let _first = table.register(&Method::Ping).unwrap();
        assert_eq!(
            table.register(&Method::Ping).unwrap_err(),
            RpcError::TooManyPending(1)
        );
    }

    #[tokio::test]
    async fn out_of_order_responses_reach_their_callers() {
        let table = Arc::new(CorrelationTable::new(10));
        let (host, mut client) = Endpoint::pair();
        let (outbox, _inbox) = host.split();

        let first = {
            let table = table.clone();
            let outbox = outbox.clone();
            tokio::spawn(async move {
                table
                    .issue(&outbox, Method::Other("a".into()), json!({}), Duration::from_secs(5))
                    .await
            })
        };
        let req_a = client.recv_envelope().await.unwrap();

        let second = {
            let table = table.clone();
            let outbox = outbox.clone();
            tokio::spawn(async move {
                table
                    .issue(&outbox, Method::Other("b".into()), json!({}), Duration::from_secs(5))
                    .await
            })
        };
        let req_b = client.recv_envelope().await.unwrap();

        assert!(table.resolve(req_b.id().unwrap(), Ok(json!("B"))));
        assert!(table.resolve(req_a.id().unwrap(), Ok(json!("A"))));

        assert_eq!(first.await.unwrap().unwrap(), json!("A"));
        assert_eq!(second.await.unwrap().unwrap(), json!("B"));
    }

    #[tokio::test]
    async fn error_responses_reject() {
        let table = Arc::new(CorrelationTable::new(10));
        let (host, mut client) = Endpoint::pair();
        let (outbox, _inbox) = host.split();

        let call = {
            let table = table.clone();
            tokio::spawn(async move {
                table
                    .issue(&outbox, Method::Ping, json!({}), Duration::from_secs(5))
                    .await
            })
        };
        let req = client.recv_envelope().await.unwrap();
        table.resolve(req.id().unwrap(), Err(ErrorObject::new(-5, "nope")));

        assert_eq!(
            call.await.unwrap().unwrap_err(),
            RpcError::Remote(ErrorObject::new(-5, "nope"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_entry_and_ignores_late_response() {
        let table = CorrelationTable::new(10);
        let (host, mut client) = Endpoint::pair();
        let (outbox, _inbox) = host.split();

        let err = table
            .issue(&outbox, Method::Ping, json!({}), Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::RequestTimeout { id: 1, timeout_ms: 250, .. }));
        assert_eq!(table.pending_count(), 0);

        let req = client.recv_envelope().await.unwrap();
        assert!(!table.resolve(req.id().unwrap(), Ok(json!("late"))));
    }

    #[tokio::test]
    async fn close_rejects_every_pending_request() {
        let table = Arc::new(CorrelationTable::new(10));
        let (host, _client) = Endpoint::pair();
        let (outbox, _inbox) = host.split();

        let mut calls = Vec::new();
        for _ in 0..3 {
            let table = table.clone();
            let outbox = outbox.clone();
            calls.push(tokio::spawn(async move {
                table
                    .issue(&outbox, Method::Ping, json!({}), Duration::from_secs(60))
                    .await
            }));
        }
        while table.pending_count() < 3 {
            tokio::task::yield_now().await;
        }

        assert_eq!(table.close(), 3);
        for call in calls {
            assert_eq!(call.await.unwrap().unwrap_err(), RpcError::ChannelClosed);
        }
        assert_eq!(table.register(&Method::Ping).unwrap_err(), RpcError::ChannelClosed);
        assert!(!table.resolve(1, Ok(json!({}))));
    }
}
