//! Agent configuration.

use anyhow::{Context, Result};

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Organization identifier, used in the MQTT client id
    pub org: String,

    /// Device type identifier
    pub type_id: String,

    /// Device identifier
    pub device_id: String,

    /// MQTT broker URL
    pub mqtt_broker: String,

    /// Registration lifetime in seconds (0 = no expiry)
    pub lifetime: u64,

    /// Advertise reboot / factory reset support
    pub supports_device_actions: bool,

    /// Advertise firmware action support
    pub supports_firmware_actions: bool,

    /// Device serial number
    pub serial_number: Option<String>,

    /// Device manufacturer
    pub manufacturer: Option<String>,

    /// Device model designation
    pub model: Option<String>,

    /// Installed firmware version
    pub fw_version: Option<String>,

    /// Free-form metadata, JSON object
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            org: "local".to_string(),
            type_id: "device".to_string(),
            device_id: "dev-0".to_string(),
            mqtt_broker: "tcp://localhost:1883".to_string(),
            lifetime: 3600,
            supports_device_actions: false,
            supports_firmware_actions: false,
            serial_number: None,
            manufacturer: None,
            model: None,
            fw_version: None,
            metadata: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DEVSYNC_ORG`: Organization identifier
    /// - `DEVSYNC_TYPE_ID`: Device type identifier
    /// - `DEVSYNC_DEVICE_ID`: Device identifier
    /// - `DEVSYNC_MQTT_BROKER`: MQTT broker URL
    /// - `DEVSYNC_LIFETIME`: Registration lifetime in seconds
    /// - `DEVSYNC_DEVICE_ACTIONS` / `DEVSYNC_FIRMWARE_ACTIONS`: capability
    ///   flags ("true"/"false")
    /// - `DEVSYNC_SERIAL_NUMBER`, `DEVSYNC_MANUFACTURER`, `DEVSYNC_MODEL`,
    ///   `DEVSYNC_FW_VERSION`: device info attributes
    /// - `DEVSYNC_METADATA`: free-form JSON object
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(org) = std::env::var("DEVSYNC_ORG") {
            config.org = org;
        }

        if let Ok(type_id) = std::env::var("DEVSYNC_TYPE_ID") {
            config.type_id = type_id;
        }

        if let Ok(device_id) = std::env::var("DEVSYNC_DEVICE_ID") {
            config.device_id = device_id;
        }

        if let Ok(broker) = std::env::var("DEVSYNC_MQTT_BROKER") {
            config.mqtt_broker = broker;
        }

        if let Ok(lifetime) = std::env::var("DEVSYNC_LIFETIME") {
            config.lifetime = lifetime.parse().context("Invalid DEVSYNC_LIFETIME")?;
        }

        if let Ok(flag) = std::env::var("DEVSYNC_DEVICE_ACTIONS") {
            config.supports_device_actions =
                flag.parse().context("Invalid DEVSYNC_DEVICE_ACTIONS")?;
        }

        if let Ok(flag) = std::env::var("DEVSYNC_FIRMWARE_ACTIONS") {
            config.supports_firmware_actions =
                flag.parse().context("Invalid DEVSYNC_FIRMWARE_ACTIONS")?;
        }

        if let Ok(serial) = std::env::var("DEVSYNC_SERIAL_NUMBER") {
            config.serial_number = Some(serial);
        }

        if let Ok(manufacturer) = std::env::var("DEVSYNC_MANUFACTURER") {
            config.manufacturer = Some(manufacturer);
        }

        if let Ok(model) = std::env::var("DEVSYNC_MODEL") {
            config.model = Some(model);
        }

        if let Ok(version) = std::env::var("DEVSYNC_FW_VERSION") {
            config.fw_version = Some(version);
        }

        if let Ok(metadata) = std::env::var("DEVSYNC_METADATA") {
            config.metadata =
                Some(serde_json::from_str(&metadata).context("Invalid DEVSYNC_METADATA JSON")?);
        }

        Ok(config)
    }
}
