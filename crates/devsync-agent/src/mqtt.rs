//! MQTT transport implementation backed by rumqttc.
//!
//! [`MqttTransport`] owns the `AsyncClient` half of the connection; a pump
//! task drains the event loop, maintains the connected flag and translates
//! broker traffic into [`TransportEvent`]s for the session runtime.

use async_trait::async_trait;
use devsync_client::{Qos, Transport, TransportError, TransportEvent};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Pause between reconnect attempts after an event loop error.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// MQTT broker connection implementing the client [`Transport`] seam.
pub struct MqttTransport {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Connect to the broker and spawn the event pump.
    ///
    /// The returned receiver carries inbound messages and connection state
    /// changes; hand it to the session runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the broker URL cannot be parsed.
    pub fn connect(
        mqtt_broker: &str,
        client_id: &str,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>), MqttError> {
        let (host, port) = parse_mqtt_url(mqtt_broker)?;

        let mut mqtt_options = MqttOptions::new(client_id, host, port);
        mqtt_options.set_keep_alive(Duration::from_secs(30));

        let (client, eventloop) = AsyncClient::new(mqtt_options, 100);
        let connected = Arc::new(AtomicBool::new(false));

        let (events, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(eventloop, Arc::clone(&connected), events));

        Ok((Arc::new(Self { client, connected }), events_rx))
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.client
            .publish(topic, map_qos(qos), false, payload)
            .await
            .map_err(|e| TransportError::Other(e.to_string()))
    }

    async fn subscribe(&self, topics: &[String], qos: Qos) -> Result<(), TransportError> {
        // rumqttc queues the subscription and issues it once the connection
        // is up, so there is no connected-flag gate here.
        let filters = topics
            .iter()
            .map(|t| rumqttc::SubscribeFilter::new(t.clone(), map_qos(qos)));
        self.client
            .subscribe_many(filters)
            .await
            .map_err(|e| TransportError::Other(e.to_string()))
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        for topic in topics {
            self.client
                .unsubscribe(topic)
                .await
                .map_err(|e| TransportError::Other(e.to_string()))?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Drain the rumqttc event loop and feed the session runtime.
async fn pump(
    mut eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut was_connected = false;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::SeqCst);
                if was_connected {
                    tracing::info!("MQTT connection reestablished");
                    if events.send(TransportEvent::Reconnected).is_err() {
                        return;
                    }
                } else {
                    tracing::info!("MQTT connection established");
                    was_connected = true;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let event = TransportEvent::Message {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => {
                let lost = connected.swap(false, Ordering::SeqCst);
                tracing::warn!(error = %e, "MQTT event loop error, retrying");
                if lost && events.send(TransportEvent::ConnectionLost).is_err() {
                    return;
                }
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }
    }
}

fn map_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Parse MQTT URL into host and port.
fn parse_mqtt_url(input: &str) -> Result<(String, u16), MqttError> {
    if input.contains("://") {
        let url = url::Url::parse(input)
            .map_err(|e| MqttError::InvalidBrokerUrl(format!("{input}: {e}")))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            scheme => {
                return Err(MqttError::InvalidBrokerUrl(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| MqttError::InvalidBrokerUrl(format!("{input}: missing host")))?;
        let port = url.port().unwrap_or(1883);

        return Ok((host.to_string(), port));
    }

    let mut parts = input.split(':');
    let host = parts
        .next()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| MqttError::InvalidBrokerUrl(format!("{input}: missing host")))?;
    let port = match parts.next() {
        None => 1883,
        Some(port) => port
            .parse()
            .map_err(|_| MqttError::InvalidBrokerUrl(format!("{input}: invalid port '{port}'")))?,
    };
    if parts.next().is_some() {
        return Err(MqttError::InvalidBrokerUrl(format!(
            "{input}: too many ':' separators"
        )));
    }

    Ok((host.to_string(), port))
}

/// Errors raised while setting up the broker connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MqttError {
    /// Invalid MQTT broker URL
    #[error("invalid MQTT broker URL: {0}")]
    InvalidBrokerUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_url_forms() {
        assert_eq!(
            parse_mqtt_url("tcp://broker.example:8883").unwrap(),
            ("broker.example".to_string(), 8883)
        );
        assert_eq!(
            parse_mqtt_url("mqtt://broker.example").unwrap(),
            ("broker.example".to_string(), 1883)
        );
        assert_eq!(
            parse_mqtt_url("localhost").unwrap(),
            ("localhost".to_string(), 1883)
        );
        assert_eq!(
            parse_mqtt_url("localhost:2883").unwrap(),
            ("localhost".to_string(), 2883)
        );
    }

    #[test]
    fn rejects_bad_urls() {
        assert!(parse_mqtt_url("ws://broker.example").is_err());
        assert!(parse_mqtt_url(":1883").is_err());
        assert!(parse_mqtt_url("host:port:extra").is_err());
        assert!(parse_mqtt_url("host:notaport").is_err());
    }
}
