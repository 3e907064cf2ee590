//! Outbound publish worker.
//!
//! All publishes from the session (requests, responses, notifications) go
//! through one single-consumer queue so ordering is preserved and transient
//! broker trouble is absorbed in one place instead of at every call site.

use crate::transport::{Qos, Transport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Backoff while the connection is down.
const NOT_CONNECTED_BACKOFF: Duration = Duration::from_secs(5);

/// Backoff while the broker's in-flight window is full.
const IN_FLIGHT_BACKOFF: Duration = Duration::from_millis(50);

/// An item on the outbound queue.
#[derive(Debug)]
pub enum Outbound {
    /// Publish a payload.
    Publish {
        /// Destination topic
        topic: String,
        /// Encoded payload
        payload: Vec<u8>,
        /// Requested delivery guarantee
        qos: Qos,
    },
    /// Stop the worker after the items already queued ahead of this one.
    Shutdown,
}

/// Single-consumer worker draining the outbound queue.
pub struct PublishWorker;

impl PublishWorker {
    /// Spawn the worker task.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        mut queue: mpsc::UnboundedReceiver<Outbound>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(item) = queue.recv().await {
                match item {
                    Outbound::Shutdown => {
                        tracing::debug!("publish worker stopping");
                        break;
                    }
                    Outbound::Publish {
                        topic,
                        payload,
                        qos,
                    } => {
                        publish_with_retry(transport.as_ref(), &topic, &payload, qos).await;
                    }
                }
            }
        })
    }
}

/// Publish one message, retrying transient failures until it goes out.
/// Non-transient failures drop the message; the session stays up.
async fn publish_with_retry(transport: &dyn Transport, topic: &str, payload: &[u8], qos: Qos) {
    loop {
        match transport.publish(topic, payload, qos).await {
            Ok(()) => return,
            Err(err) if err.is_transient() => {
                let backoff = if matches!(err, TransportError::NotConnected) {
                    tracing::debug!(topic, "publish deferred, not connected");
                    NOT_CONNECTED_BACKOFF
                } else {
                    IN_FLIGHT_BACKOFF
                };
                tokio::time::sleep(backoff).await;
            }
            Err(err) => {
                tracing::error!(error = %err, topic, "dropping outbound message");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FlakyTransport {
        attempts: AtomicUsize,
        fail_first: usize,
        error: TransportError,
        published: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Transport for FlakyTransport {
        async fn publish(
            &self,
            topic: &str,
            _payload: &[u8],
            _qos: Qos,
        ) -> Result<(), TransportError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(self.error.clone());
            }
            self.published.lock().unwrap().push(topic.to_string());
            Ok(())
        }

        async fn subscribe(&self, _topics: &[String], _qos: Qos) -> Result<(), TransportError> {
            Ok(())
        }

        async fn unsubscribe(&self, _topics: &[String]) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_connected() {
        let transport = Arc::new(FlakyTransport {
            attempts: AtomicUsize::new(0),
            fail_first: 2,
            error: TransportError::NotConnected,
            published: Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = PublishWorker::spawn(Arc::clone(&transport) as Arc<dyn Transport>, rx);

        tx.send(Outbound::Publish {
            topic: "iotdevice-1/notify".to_string(),
            payload: b"{}".to_vec(),
            qos: Qos::AtLeastOnce,
        })
        .unwrap();
        tx.send(Outbound::Shutdown).unwrap();

        worker.await.unwrap();
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(
            transport.published.lock().unwrap().as_slice(),
            ["iotdevice-1/notify"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn full_in_flight_window_retries_on_the_short_backoff() {
        let transport = Arc::new(FlakyTransport {
            attempts: AtomicUsize::new(0),
            fail_first: 1,
            error: TransportError::InFlightLimit,
            published: Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = PublishWorker::spawn(Arc::clone(&transport) as Arc<dyn Transport>, rx);

        tx.send(Outbound::Publish {
            topic: "iotdevice-1/response".to_string(),
            payload: b"{}".to_vec(),
            qos: Qos::AtLeastOnce,
        })
        .unwrap();
        tx.send(Outbound::Shutdown).unwrap();

        let start = tokio::time::Instant::now();
        worker.await.unwrap();
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(start.elapsed(), IN_FLIGHT_BACKOFF);
    }

    #[tokio::test]
    async fn fatal_error_drops_message_and_keeps_going() {
        struct FailOnce {
            failed: AtomicBool,
            published: Mutex<Vec<String>>,
        }

        #[async_trait::async_trait]
        impl Transport for FailOnce {
            async fn publish(
                &self,
                topic: &str,
                _payload: &[u8],
                _qos: Qos,
            ) -> Result<(), TransportError> {
                if !self.failed.swap(true, Ordering::SeqCst) {
                    return Err(TransportError::Other("boom".to_string()));
                }
                self.published.lock().unwrap().push(topic.to_string());
                Ok(())
            }

            async fn subscribe(&self, _t: &[String], _q: Qos) -> Result<(), TransportError> {
                Ok(())
            }

            async fn unsubscribe(&self, _t: &[String]) -> Result<(), TransportError> {
                Ok(())
            }

            fn is_connected(&self) -> bool {
                true
            }
        }

        let transport = Arc::new(FailOnce {
            failed: AtomicBool::new(false),
            published: Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = PublishWorker::spawn(Arc::clone(&transport) as Arc<dyn Transport>, rx);

        tx.send(Outbound::Publish {
            topic: "a".to_string(),
            payload: Vec::new(),
            qos: Qos::AtLeastOnce,
        })
        .unwrap();
        tx.send(Outbound::Publish {
            topic: "b".to_string(),
            payload: Vec::new(),
            qos: Qos::AtLeastOnce,
        })
        .unwrap();
        tx.send(Outbound::Shutdown).unwrap();

        worker.await.unwrap();
        // "a" was dropped after the fatal error, "b" still went out.
        assert_eq!(transport.published.lock().unwrap().as_slice(), ["b"]);
    }
}
