//! Correlation table matching in-flight requests to device responses
//!
//! Each pending request owns a oneshot channel. The inbound drain task
//! resolves slots as responses arrive; a waiting caller suspends only on its
//! own receiver, so no wait can starve the drain task or another request.

use crate::error::ClientError;
use crate::protocol::{RequestId, RpcResponse};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Concurrency-safe map from request id to its pending slot
///
/// The lock is never held across an await; register and resolve are short
/// synchronous critical sections.
#[derive(Default)]
pub struct CorrelationTable {
    slots: Mutex<HashMap<RequestId, oneshot::Sender<RpcResponse>>>,
}

impl CorrelationTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a pending slot for `id`
    ///
    /// Ids are generated uniquely, so an existing slot means a caller bug,
    /// not a protocol condition.
    pub fn register(self: &Arc<Self>, id: RequestId) -> Result<PendingRequest, ClientError> {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots.lock().expect("correlation table lock poisoned");
        if slots.contains_key(&id) {
            return Err(ClientError::DuplicateId(id));
        }
        slots.insert(id.clone(), tx);
        drop(slots);

        Ok(PendingRequest {
            id,
            rx: Some(rx),
            table: Arc::clone(self),
        })
    }

    /// Resolve the slot for `id`, waking its waiter
    ///
    /// Unknown ids are the normal case for late or duplicate device
    /// responses and are silently ignored. First write wins.
    pub fn resolve(&self, id: &RequestId, response: RpcResponse) {
        let sender = self
            .slots
            .lock()
            .expect("correlation table lock poisoned")
            .remove(id);

        match sender {
            Some(tx) => {
                if tx.send(response).is_err() {
                    // Waiter gave up between its deadline and our removal
                    trace!(%id, "waiter gone before resolution");
                }
            }
            None => trace!(%id, "no pending slot for response, dropping"),
        }
    }

    /// Number of requests currently in flight
    pub fn pending_count(&self) -> usize {
        self.slots
            .lock()
            .expect("correlation table lock poisoned")
            .len()
    }

    fn discard(&self, id: &RequestId) {
        self.slots
            .lock()
            .expect("correlation table lock poisoned")
            .remove(id);
    }
}

/// Caller-side handle to one in-flight request
///
/// Dropping the handle releases the table slot, so a torn-down caller never
/// leaks its entry.
pub struct PendingRequest {
    id: RequestId,
    rx: Option<oneshot::Receiver<RpcResponse>>,
    table: Arc<CorrelationTable>,
}

impl PendingRequest {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Suspend until the slot is resolved or the deadline elapses
    ///
    /// The table entry is gone in both cases, so later arrivals for this id
    /// become no-ops in [`CorrelationTable::resolve`].
    pub async fn wait(mut self, deadline: Duration) -> Result<RpcResponse, ClientError> {
        let rx = self.rx.take().expect("receiver consumed only by wait");

        match timeout(deadline, rx).await {
            Ok(Ok(response)) => Ok(response),
            // Sender dropped without resolving; only happens on shutdown,
            // report it the same way as a timeout
            Ok(Err(_)) => Err(ClientError::Timeout {
                id: self.id.clone(),
                timeout: deadline,
            }),
            Err(_) => {
                debug!(id = %self.id, ?deadline, "request timed out");
                Err(ClientError::Timeout {
                    id: self.id.clone(),
                    timeout: deadline,
                })
            }
        }
        // Drop of `self` removes any leftover table entry
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.table.discard(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RpcStatus;
    use serde_json::json;

    fn response(id: &str, data: serde_json::Value) -> RpcResponse {
        RpcResponse {
            id: RequestId::from_raw(id),
            status: RpcStatus::Success,
            data: Some(data),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_register_resolve_wait() {
        let table = CorrelationTable::new();
        let id = RequestId::from_raw("req-1");
        let pending = table.register(id.clone()).unwrap();

        table.resolve(&id, response("req-1", json!({"ok": true})));

        let resolved = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(resolved.data.unwrap()["ok"], true);
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_register_rejected() {
        let table = CorrelationTable::new();
        let id = RequestId::from_raw("req-1");
        let _pending = table.register(id.clone()).unwrap();

        match table.register(id) {
            Err(ClientError::DuplicateId(_)) => {}
            other => panic!("expected DuplicateId, got {:?}", other.map(|p| p.id().clone())),
        }
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_is_noop() {
        let table = CorrelationTable::new();
        table.resolve(
            &RequestId::from_raw("req-unknown"),
            response("req-unknown", json!({})),
        );
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_second_resolve_is_noop() {
        let table = CorrelationTable::new();
        let id = RequestId::from_raw("req-1");
        let pending = table.register(id.clone()).unwrap();

        table.resolve(&id, response("req-1", json!({"first": true})));
        table.resolve(&id, response("req-1", json!({"second": true})));

        let resolved = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(resolved.data.unwrap()["first"], true);
    }

    #[tokio::test]
    async fn test_wait_timeout_purges_slot() {
        let table = CorrelationTable::new();
        let id = RequestId::from_raw("req-1");
        let pending = table.register(id.clone()).unwrap();

        let result = pending.wait(Duration::from_millis(20)).await;
        match result {
            Err(ClientError::Timeout { id: timed_out, .. }) => assert_eq!(timed_out, id),
            other => panic!("expected Timeout, got {:?}", other.map(|r| r.id)),
        }
        assert_eq!(table.pending_count(), 0);

        // A late arrival after the purge is a no-op
        table.resolve(&id, response("req-1", json!({})));
    }

    #[tokio::test]
    async fn test_drop_releases_slot() {
        let table = CorrelationTable::new();
        let pending = table.register(RequestId::from_raw("req-1")).unwrap();
        assert_eq!(table.pending_count(), 1);
        drop(pending);
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_never_cross() {
        let table = CorrelationTable::new();
        let id_a = RequestId::from_raw("req-a");
        let id_b = RequestId::from_raw("req-b");
        let pending_a = table.register(id_a.clone()).unwrap();
        let pending_b = table.register(id_b.clone()).unwrap();

        // Resolve in reverse registration order
        table.resolve(&id_b, response("req-b", json!({"who": "b"})));
        table.resolve(&id_a, response("req-a", json!({"who": "a"})));

        let (got_a, got_b) = tokio::join!(
            pending_a.wait(Duration::from_secs(1)),
            pending_b.wait(Duration::from_secs(1)),
        );
        assert_eq!(got_a.unwrap().data.unwrap()["who"], "a");
        assert_eq!(got_b.unwrap().data.unwrap()["who"], "b");
    }
}
