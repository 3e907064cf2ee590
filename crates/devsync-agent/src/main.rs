//! Agent entry point. Connects to the MQTT broker, registers the device as
//! managed and serves server-initiated operations until interrupted.

use anyhow::{Context, Result};
use devsync_agent::actions::{LoggingCustomActions, LoggingDeviceActions, SimulatedFirmware};
use devsync_agent::{AgentConfig, MqttTransport};
use devsync_client::{ManagedClient, SessionOptions};
use devsync_core::{DeviceInfo, DeviceModel};
use devsync_proto::Supports;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting devsync agent"
    );

    // Load configuration
    let config = AgentConfig::from_env()?;

    let model = build_model(&config);
    let client_id = format!("d:{}:{}:{}", config.org, config.type_id, config.device_id);

    let (transport, events) =
        MqttTransport::connect(&config.mqtt_broker, &client_id).context("MQTT setup failed")?;

    let options = SessionOptions {
        device_actions: config
            .supports_device_actions
            .then(|| Arc::new(LoggingDeviceActions) as _),
        firmware: config
            .supports_firmware_actions
            .then(|| Arc::new(SimulatedFirmware) as _),
        custom_actions: Some(Arc::new(LoggingCustomActions)),
        ..SessionOptions::default()
    };

    let client = Arc::new(ManagedClient::new(transport, model, options));
    let runtime = tokio::spawn(Arc::clone(&client).run(events));

    let supports = Supports {
        device_actions: config.supports_device_actions,
        firmware_actions: config.supports_firmware_actions,
    };
    match client.manage(config.lifetime, supports).await? {
        Some(rc) => tracing::info!(rc = rc.code(), device_id = %config.device_id, "Device managed"),
        None => tracing::warn!("Manage request not acknowledged yet, continuing"),
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    if let Err(err) = client.unmanage().await {
        tracing::warn!(error = %err, "unmanage failed during shutdown");
    }
    client.shutdown().await;
    runtime.abort();

    Ok(())
}

fn build_model(config: &AgentConfig) -> DeviceModel {
    let mut info = DeviceInfo::new();
    if let Some(serial) = &config.serial_number {
        info = info.serial_number(serial);
    }
    if let Some(manufacturer) = &config.manufacturer {
        info = info.manufacturer(manufacturer);
    }
    if let Some(model) = &config.model {
        info = info.model(model);
    }
    if let Some(version) = &config.fw_version {
        info = info.fw_version(version);
    }
    DeviceModel::new(
        config.type_id.clone(),
        config.device_id.clone(),
        info,
        config.metadata.clone(),
    )
}
