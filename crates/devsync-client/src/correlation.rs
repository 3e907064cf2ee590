//! Request/response correlation.
//!
//! Client-initiated requests (manage, unmanage, location, diagnostics) all
//! flow through here: a fresh `reqId` is stamped on the envelope, the
//! message is queued for publish, and the caller awaits the matching
//! response or the timeout. Requests the server has not answered yet are
//! kept so a reconnect can republish them in their original order.

use crate::error::ClientError;
use crate::publisher::Outbound;
use crate::transport::Qos;
use devsync_proto::{DmResponse, RequestEnvelope};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// How long a caller waits for a response before giving up.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(120);

struct Pending {
    req_id: String,
    topic: String,
    payload: Vec<u8>,
    qos: Qos,
    waiter: oneshot::Sender<DmResponse>,
}

/// Pending-request table plus the publish/await front door.
pub struct CorrelationEngine {
    outbound: mpsc::UnboundedSender<Outbound>,
    pending: Mutex<Vec<Pending>>,
    timeout: Duration,
}

impl CorrelationEngine {
    /// Create an engine publishing through `outbound`.
    #[must_use]
    pub fn new(outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self::with_timeout(outbound, RESPONSE_TIMEOUT)
    }

    /// Create an engine with a non-default response timeout.
    #[must_use]
    pub fn with_timeout(outbound: mpsc::UnboundedSender<Outbound>, timeout: Duration) -> Self {
        Self {
            outbound,
            pending: Mutex::new(Vec::new()),
            timeout,
        }
    }

    /// Publish a request and wait for the correlated response.
    ///
    /// Returns `Ok(None)` when the timeout elapses; the pending entry is
    /// removed so a late response is dropped like any other unknown `reqId`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the request cannot be encoded or the
    /// session runtime has shut down.
    pub async fn send_and_wait(
        &self,
        topic: &str,
        body: Option<Value>,
        qos: Qos,
    ) -> Result<Option<DmResponse>, ClientError> {
        let req_id = Uuid::new_v4().to_string();
        let envelope = RequestEnvelope {
            d: body,
            req_id: Some(req_id.clone()),
        };
        let payload = envelope.encode()?;

        let (waiter, response) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap();
            pending.push(Pending {
                req_id: req_id.clone(),
                topic: topic.to_string(),
                payload: payload.clone(),
                qos,
                waiter,
            });
        }

        self.outbound
            .send(Outbound::Publish {
                topic: topic.to_string(),
                payload,
                qos,
            })
            .map_err(|_| ClientError::ShutDown)?;

        match tokio::time::timeout(self.timeout, response).await {
            Ok(Ok(response)) => Ok(Some(response)),
            // Waiter dropped during shutdown, or timeout: absent response.
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                self.remove(&req_id);
                tracing::debug!(req_id = %req_id, topic, "request timed out");
                Ok(None)
            }
        }
    }

    /// Route an inbound response to its waiter.
    ///
    /// Responses with no pending entry (foreign `reqId`s, duplicates from
    /// at-least-once delivery, late answers after timeout) are dropped.
    pub fn complete(&self, response: DmResponse) {
        let entry = {
            let mut pending = self.pending.lock().unwrap();
            pending
                .iter()
                .position(|p| p.req_id == response.req_id)
                .map(|idx| pending.remove(idx))
        };
        match entry {
            Some(entry) => {
                // Waiter gone means its timeout already fired.
                let _ = entry.waiter.send(response);
            }
            None => {
                tracing::debug!(req_id = %response.req_id, rc = response.rc, "dropping unmatched response");
            }
        }
    }

    /// Requeue every unanswered request, oldest first. Called on reconnect.
    pub fn republish(&self) {
        let pending = self.pending.lock().unwrap();
        for entry in pending.iter() {
            tracing::debug!(req_id = %entry.req_id, topic = %entry.topic, "republishing pending request");
            let _ = self.outbound.send(Outbound::Publish {
                topic: entry.topic.clone(),
                payload: entry.payload.clone(),
                qos: entry.qos,
            });
        }
    }

    /// Number of unanswered requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    fn remove(&self, req_id: &str) {
        let mut pending = self.pending.lock().unwrap();
        pending.retain(|p| p.req_id != req_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devsync_proto::ResponseCode;
    use serde_json::json;
    use std::sync::Arc;

    fn req_id_of(item: &Outbound) -> String {
        match item {
            Outbound::Publish { payload, .. } => RequestEnvelope::decode(payload)
                .unwrap()
                .req_id
                .unwrap(),
            Outbound::Shutdown => panic!("expected publish"),
        }
    }

    #[tokio::test]
    async fn concurrent_waiters_each_get_their_own_response() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = Arc::new(CorrelationEngine::new(tx));

        let first = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .send_and_wait("iotdevice-1/mgmt/manage", Some(json!({"a": 1})), Qos::AtLeastOnce)
                    .await
            })
        };
        let second = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .send_and_wait("iotdevice-1/mgmt/unmanage", None, Qos::AtLeastOnce)
                    .await
            })
        };

        let id_a = req_id_of(&rx.recv().await.unwrap());
        let id_b = req_id_of(&rx.recv().await.unwrap());

        // Answer in reverse order with distinct codes.
        engine.complete(DmResponse::new(ResponseCode::BadRequest, id_b.clone()));
        engine.complete(DmResponse::new(ResponseCode::Success, id_a.clone()));

        let first = first.await.unwrap().unwrap().unwrap();
        let second = second.await.unwrap().unwrap().unwrap();
        assert_eq!(first.req_id, id_a);
        assert_eq!(first.rc, 200);
        assert_eq!(second.req_id, id_b);
        assert_eq!(second.rc, 400);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_yields_absent_response() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let engine = CorrelationEngine::new(tx);

        let result = engine
            .send_and_wait("iotdevice-1/mgmt/manage", None, Qos::AtLeastOnce)
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn unmatched_response_is_dropped() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let engine = CorrelationEngine::new(tx);

        engine.complete(DmResponse::new(ResponseCode::Success, "nobody-waiting"));
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn republish_requeues_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = Arc::new(CorrelationEngine::new(tx));

        let waiter = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .send_and_wait("iotdevice-1/mgmt/manage", Some(json!({})), Qos::AtLeastOnce)
                    .await
            })
        };
        let original = req_id_of(&rx.recv().await.unwrap());

        engine.republish();
        let replayed = req_id_of(&rx.recv().await.unwrap());
        assert_eq!(original, replayed);

        engine.complete(DmResponse::new(ResponseCode::Success, original));
        waiter.await.unwrap().unwrap().unwrap();
    }
}
