use devsync_agent::MqttTransport;
use devsync_client::{ManagedClient, SessionOptions};
use devsync_core::{DeviceInfo, DeviceModel};
use devsync_proto::{DmResponse, RequestEnvelope, ResponseCode, Supports};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use uuid::Uuid;

fn parse_mqtt_url(url: &str) -> (String, u16) {
    let url = url
        .strip_prefix("tcp://")
        .or_else(|| url.strip_prefix("mqtt://"))
        .unwrap_or(url);

    let parts: Vec<&str> = url.split(':').collect();

    let host = parts.first().copied().unwrap_or("localhost").to_string();
    let port = parts.get(1).and_then(|p| p.parse().ok()).unwrap_or(1883);

    (host, port)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn manage_roundtrip_over_broker() {
    if std::env::var("DEVSYNC_INTEGRATION").is_err() {
        eprintln!("Skipping integration test; set DEVSYNC_INTEGRATION=1 to run");
        return;
    }

    let broker =
        std::env::var("DEVSYNC_MQTT_BROKER").unwrap_or_else(|_| "tcp://localhost:1883".to_string());
    let (host, port) = parse_mqtt_url(&broker);

    // Fake server: answers the manage request on the server response topic
    // and hands the received envelope to the test.
    let mut srv_opts = MqttOptions::new(format!("srv-{}", Uuid::new_v4()), host, port);
    srv_opts.set_keep_alive(Duration::from_secs(5));
    let (srv_client, mut srv_eventloop) = AsyncClient::new(srv_opts, 10);
    srv_client
        .subscribe("iotdevice-1/mgmt/manage", QoS::AtLeastOnce)
        .await
        .unwrap();

    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut tx = Some(tx);
        loop {
            match srv_eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let envelope = RequestEnvelope::decode(&publish.payload).unwrap();
                    let req_id = envelope.req_id.clone().unwrap();
                    let response = DmResponse::new(ResponseCode::Success, req_id);
                    srv_client
                        .publish(
                            "iotdm-1/response",
                            QoS::AtLeastOnce,
                            false,
                            response.encode().unwrap(),
                        )
                        .await
                        .unwrap();
                    if let Some(tx) = tx.take() {
                        let _ = tx.send(envelope);
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;

    let info = DeviceInfo::new().serial_number("itest-0001");
    let model = DeviceModel::new("itest", format!("dev-{}", Uuid::new_v4()), info, None);
    let (transport, events) = MqttTransport::connect(&broker, "d:itest:integration").unwrap();
    let client = Arc::new(ManagedClient::new(
        transport,
        model,
        SessionOptions::default(),
    ));
    tokio::spawn(Arc::clone(&client).run(events));

    let supports = Supports {
        device_actions: true,
        firmware_actions: false,
    };
    let rc = timeout(Duration::from_secs(5), client.manage(600, supports))
        .await
        .expect("timeout waiting for manage response")
        .unwrap();

    assert_eq!(rc, Some(ResponseCode::Success));
    assert!(client.is_managed());

    let envelope = timeout(Duration::from_secs(5), rx)
        .await
        .expect("timeout waiting for manage request")
        .expect("fake server dropped");
    let body = envelope.d.unwrap();
    assert_eq!(body["lifetime"], 600);
    assert_eq!(body["supports"]["deviceActions"], true);
    assert_eq!(body["deviceInfo"]["serialNumber"], "itest-0001");

    client.unmanage().await.unwrap();
    assert!(!client.is_managed());
}
