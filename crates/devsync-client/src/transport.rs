//! Transport abstraction over the pub/sub broker.
//!
//! The client engine never talks to a concrete MQTT library. A [`Transport`]
//! implementation performs publishes and (un)subscribes; inbound traffic and
//! connection state changes arrive as [`TransportEvent`]s on an mpsc channel
//! owned by the session runtime.

use async_trait::async_trait;

/// Delivery guarantee requested for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    /// Fire and forget
    AtMostOnce,
    /// Delivered at least once
    AtLeastOnce,
    /// Delivered exactly once
    ExactlyOnce,
}

/// Outbound half of the broker connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a payload.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`]; transient variants are retried by the
    /// publish worker.
    async fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> Result<(), TransportError>;

    /// Subscribe to a batch of topics in one call.
    ///
    /// # Errors
    ///
    /// Returns error if the subscription cannot be issued.
    async fn subscribe(&self, topics: &[String], qos: Qos) -> Result<(), TransportError>;

    /// Unsubscribe from a batch of topics in one call.
    ///
    /// # Errors
    ///
    /// Returns error if the unsubscription cannot be issued.
    async fn unsubscribe(&self, topics: &[String]) -> Result<(), TransportError>;

    /// Whether the connection is currently up.
    fn is_connected(&self) -> bool;
}

/// Inbound events delivered by the transport implementation.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A message arrived on a subscribed topic.
    Message {
        /// Topic the message arrived on
        topic: String,
        /// Raw payload bytes
        payload: Vec<u8>,
    },
    /// The connection dropped.
    ConnectionLost,
    /// The connection came back after a drop.
    Reconnected,
}

/// Errors raised by transport operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The connection is currently down
    #[error("not connected")]
    NotConnected,
    /// Too many unacknowledged messages in flight
    #[error("in-flight message limit reached")]
    InFlightLimit,
    /// Any other transport failure
    #[error("transport failure: {0}")]
    Other(String),
}

impl TransportError {
    /// Transient errors are retried with backoff by the publish worker;
    /// everything else is fatal for the one affected operation.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::NotConnected | TransportError::InFlightLimit
        )
    }
}
