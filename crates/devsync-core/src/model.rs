//! The device management model.
//!
//! [`DeviceModel`] assembles the per-session resource tree out of the
//! standard management objects — `deviceInfo`, `location`, `metadata` and
//! `mgmt.firmware` — and exposes typed accessors for the firmware state
//! machine so handlers never poke raw JSON paths.

use crate::resource::{ResourceNode, ResourceTree};
use crate::value::ResourceValue;
use serde_json::{json, Value};

/// Resource name of the device info object.
pub const DEVICE_INFO: &str = "deviceInfo";
/// Resource name of the location object.
pub const LOCATION: &str = "location";
/// Resource name of the metadata object.
pub const METADATA: &str = "metadata";
/// Canonical path of the firmware object.
pub const FIRMWARE_PATH: &str = "mgmt.firmware";

/// Firmware download state (`mgmt.firmware.state`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirmwareState {
    /// No download in progress
    #[default]
    Idle,
    /// A download is running
    Downloading,
    /// An image is downloaded and ready to install
    Downloaded,
}

impl FirmwareState {
    /// Wire code of the state.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            FirmwareState::Idle => 0,
            FirmwareState::Downloading => 1,
            FirmwareState::Downloaded => 2,
        }
    }

    /// Decode a wire code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FirmwareState::Idle),
            1 => Some(FirmwareState::Downloading),
            2 => Some(FirmwareState::Downloaded),
            _ => None,
        }
    }
}

/// Firmware installation status (`mgmt.firmware.updateStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirmwareUpdateStatus {
    /// Installed successfully
    #[default]
    Success,
    /// Installation started but not finished
    InProgress,
    /// Installation failed: out of memory
    OutOfMemory,
    /// Installation failed: connection lost during download
    ConnectionLost,
    /// Installation failed: image verification failed
    VerificationFailed,
    /// Installation failed: unsupported image
    UnsupportedImage,
    /// Installation failed: invalid download URI
    InvalidUri,
}

impl FirmwareUpdateStatus {
    /// Wire code of the status.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            FirmwareUpdateStatus::Success => 0,
            FirmwareUpdateStatus::InProgress => 1,
            FirmwareUpdateStatus::OutOfMemory => 2,
            FirmwareUpdateStatus::ConnectionLost => 3,
            FirmwareUpdateStatus::VerificationFailed => 4,
            FirmwareUpdateStatus::UnsupportedImage => 5,
            FirmwareUpdateStatus::InvalidUri => 6,
        }
    }

    /// Decode a wire code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FirmwareUpdateStatus::Success),
            1 => Some(FirmwareUpdateStatus::InProgress),
            2 => Some(FirmwareUpdateStatus::OutOfMemory),
            3 => Some(FirmwareUpdateStatus::ConnectionLost),
            4 => Some(FirmwareUpdateStatus::VerificationFailed),
            5 => Some(FirmwareUpdateStatus::UnsupportedImage),
            6 => Some(FirmwareUpdateStatus::InvalidUri),
            _ => None,
        }
    }
}

/// Static device description, reported with the manage request and
/// updatable by the server.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    /// Serial number of the device
    pub serial_number: Option<String>,
    /// Manufacturer name
    pub manufacturer: Option<String>,
    /// Model designation
    pub model: Option<String>,
    /// Device class
    pub device_class: Option<String>,
    /// Free-text description
    pub description: Option<String>,
    /// Installed firmware version
    pub fw_version: Option<String>,
    /// Hardware revision
    pub hw_version: Option<String>,
    /// Human-readable location ("server room 42")
    pub descriptive_location: Option<String>,
}

impl DeviceInfo {
    /// Create an empty device info.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the serial number.
    #[must_use]
    pub fn serial_number(mut self, value: impl Into<String>) -> Self {
        self.serial_number = Some(value.into());
        self
    }

    /// Set the manufacturer.
    #[must_use]
    pub fn manufacturer(mut self, value: impl Into<String>) -> Self {
        self.manufacturer = Some(value.into());
        self
    }

    /// Set the model designation.
    #[must_use]
    pub fn model(mut self, value: impl Into<String>) -> Self {
        self.model = Some(value.into());
        self
    }

    /// Set the device class.
    #[must_use]
    pub fn device_class(mut self, value: impl Into<String>) -> Self {
        self.device_class = Some(value.into());
        self
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, value: impl Into<String>) -> Self {
        self.description = Some(value.into());
        self
    }

    /// Set the firmware version.
    #[must_use]
    pub fn fw_version(mut self, value: impl Into<String>) -> Self {
        self.fw_version = Some(value.into());
        self
    }

    /// Set the hardware revision.
    #[must_use]
    pub fn hw_version(mut self, value: impl Into<String>) -> Self {
        self.hw_version = Some(value.into());
        self
    }

    /// Set the descriptive location.
    #[must_use]
    pub fn descriptive_location(mut self, value: impl Into<String>) -> Self {
        self.descriptive_location = Some(value.into());
        self
    }

    fn node(&self) -> ResourceNode {
        let mut node = ResourceNode::new(DEVICE_INFO);
        let fields = [
            ("serialNumber", &self.serial_number),
            ("manufacturer", &self.manufacturer),
            ("model", &self.model),
            ("deviceClass", &self.device_class),
            ("description", &self.description),
            ("fwVersion", &self.fw_version),
            ("hwVersion", &self.hw_version),
            ("descriptiveLocation", &self.descriptive_location),
        ];
        for (name, value) in fields {
            if let Some(value) = value {
                node.attach(ResourceNode::leaf(
                    name,
                    ResourceValue::String(value.clone()),
                ));
            }
        }
        node
    }
}

/// The full management model for one session: identity plus resource tree.
#[derive(Debug)]
pub struct DeviceModel {
    type_id: String,
    device_id: String,
    tree: ResourceTree,
}

impl DeviceModel {
    /// Assemble the model tree for a device.
    #[must_use]
    pub fn new(
        type_id: impl Into<String>,
        device_id: impl Into<String>,
        info: DeviceInfo,
        metadata: Option<serde_json::Map<String, Value>>,
    ) -> Self {
        let mut tree = ResourceTree::new();
        tree.add_child(info.node());
        tree.add_child(ResourceNode::new(LOCATION));

        let mut mgmt = ResourceNode::new("mgmt");
        let mut firmware = ResourceNode::new("firmware");
        firmware.attach(ResourceNode::leaf("state", ResourceValue::Number(0.0)));
        firmware.attach(ResourceNode::leaf(
            "updateStatus",
            ResourceValue::Number(0.0),
        ));
        mgmt.attach(firmware);
        tree.add_child(mgmt);

        if let Some(metadata) = metadata {
            tree.add_child(ResourceNode::leaf(
                METADATA,
                ResourceValue::Object(metadata),
            ));
        }

        Self {
            type_id: type_id.into(),
            device_id: device_id.into(),
            tree,
        }
    }

    /// The device type identifier.
    #[must_use]
    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    /// The device identifier.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Borrow the resource tree.
    #[must_use]
    pub fn tree(&self) -> &ResourceTree {
        &self.tree
    }

    /// Borrow the resource tree mutably.
    pub fn tree_mut(&mut self) -> &mut ResourceTree {
        &mut self.tree
    }

    /// Device info in its wire form, for the manage request.
    #[must_use]
    pub fn device_info_json(&self) -> Option<Value> {
        self.tree.resolve(DEVICE_INFO).map(ResourceNode::to_json)
    }

    /// Metadata in its wire form, for the manage request.
    #[must_use]
    pub fn metadata_json(&self) -> Option<Value> {
        self.tree.resolve(METADATA).map(ResourceNode::to_json)
    }

    /// Current firmware download state.
    #[must_use]
    pub fn firmware_state(&self) -> FirmwareState {
        self.firmware_number("state")
            .and_then(|code| FirmwareState::from_code(code as u8))
            .unwrap_or_default()
    }

    /// Transition the firmware download state and fire internal listeners
    /// of `mgmt.firmware` so observers are told.
    pub fn set_firmware_state(&mut self, state: FirmwareState) {
        self.set_firmware_field("state", json!(f64::from(state.code())));
    }

    /// Current firmware installation status.
    #[must_use]
    pub fn firmware_update_status(&self) -> FirmwareUpdateStatus {
        self.firmware_number("updateStatus")
            .and_then(|code| FirmwareUpdateStatus::from_code(code as u8))
            .unwrap_or_default()
    }

    /// Report the firmware installation status.
    ///
    /// On [`FirmwareUpdateStatus::Success`] with a non-empty firmware
    /// version, the version is propagated to `deviceInfo.fwVersion` and the
    /// verifier is cleared, in this one call.
    pub fn set_firmware_update_status(&mut self, status: FirmwareUpdateStatus) {
        self.set_firmware_field("updateStatus", json!(f64::from(status.code())));
        if status != FirmwareUpdateStatus::Success {
            return;
        }
        if let Some(version) = self.firmware_version().filter(|v| !v.is_empty()) {
            if let Some(info) = self.tree.resolve_mut(DEVICE_INFO) {
                info.attach(ResourceNode::leaf(
                    "fwVersion",
                    ResourceValue::String(version),
                ));
            }
        }
        if let Some(firmware) = self.tree.resolve_mut(FIRMWARE_PATH) {
            firmware.detach("verifier");
        }
    }

    /// Download URL of the pending firmware image.
    #[must_use]
    pub fn firmware_url(&self) -> Option<String> {
        self.firmware_string("url")
    }

    /// Set the firmware download URL.
    pub fn set_firmware_url(&mut self, url: impl Into<String>) {
        self.set_firmware_field("url", Value::String(url.into()));
    }

    /// Version string of the pending firmware image.
    #[must_use]
    pub fn firmware_version(&self) -> Option<String> {
        self.firmware_string("version")
    }

    /// Set the firmware version.
    pub fn set_firmware_version(&mut self, version: impl Into<String>) {
        self.set_firmware_field("version", Value::String(version.into()));
    }

    /// Verifier (checksum/signature) of the pending firmware image.
    #[must_use]
    pub fn firmware_verifier(&self) -> Option<String> {
        self.firmware_string("verifier")
    }

    /// Set the firmware verifier.
    pub fn set_firmware_verifier(&mut self, verifier: impl Into<String>) {
        self.set_firmware_field("verifier", Value::String(verifier.into()));
    }

    /// Apply a location fragment to the tree, firing location observers.
    pub fn update_location(&mut self, fragment: &Value) {
        if let Some(Err(err)) = self.tree.update(LOCATION, fragment, true) {
            tracing::warn!(error = %err, "Location fragment rejected by tree");
        }
    }

    fn firmware_string(&self, field: &str) -> Option<String> {
        self.tree
            .resolve(FIRMWARE_PATH)?
            .child(field)?
            .to_json()
            .as_str()
            .map(str::to_string)
    }

    fn firmware_number(&self, field: &str) -> Option<f64> {
        self.tree
            .resolve(FIRMWARE_PATH)?
            .child(field)?
            .to_json()
            .as_f64()
    }

    // Applies the leaf change without a leaf event, then fires the firmware
    // composite once, as observers watch `mgmt.firmware`.
    fn set_firmware_field(&mut self, field: &str, value: Value) {
        let Some(firmware) = self.tree.resolve_mut(FIRMWARE_PATH) else {
            return;
        };
        let changed = match firmware.child_mut(field) {
            Some(child) => match child.update(&value, false) {
                Ok(changed) => changed,
                Err(err) => {
                    tracing::warn!(field, error = %err, "Ignoring ill-typed firmware value");
                    return;
                }
            },
            None => match ResourceValue::infer(&value) {
                Some(typed) => {
                    firmware.attach(ResourceNode::leaf(field, typed));
                    true
                }
                None => false,
            },
        };
        if changed {
            firmware.fire_internal();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> DeviceModel {
        DeviceModel::new(
            "thermostat",
            "t-100",
            DeviceInfo::new()
                .serial_number("SN-1")
                .manufacturer("acme")
                .fw_version("1.0.0"),
            None,
        )
    }

    #[test]
    fn tree_has_standard_objects() {
        let model = model();
        assert!(model.tree().resolve("deviceInfo.serialNumber").is_some());
        assert!(model.tree().resolve("location").is_some());
        assert_eq!(model.firmware_state(), FirmwareState::Idle);
        assert!(model.metadata_json().is_none());
    }

    #[test]
    fn update_status_success_propagates_version_and_clears_verifier() {
        let mut model = model();
        model.set_firmware_version("2.0.0");
        model.set_firmware_verifier("sha256:abc");
        model.set_firmware_state(FirmwareState::Downloaded);

        model.set_firmware_update_status(FirmwareUpdateStatus::Success);

        let info = model.device_info_json().unwrap();
        assert_eq!(info["fwVersion"], "2.0.0");
        assert_eq!(model.firmware_verifier(), None);
    }

    #[test]
    fn update_status_failure_keeps_verifier() {
        let mut model = model();
        model.set_firmware_verifier("sha256:abc");
        model.set_firmware_update_status(FirmwareUpdateStatus::OutOfMemory);
        assert_eq!(model.firmware_verifier().as_deref(), Some("sha256:abc"));
        assert_eq!(
            model.device_info_json().unwrap()["fwVersion"],
            "1.0.0",
            "failed update must not touch deviceInfo"
        );
    }

    #[test]
    fn firmware_state_changes_fire_observers() {
        use crate::resource::ListenerScope;
        use std::sync::{Arc, Mutex};

        let mut model = model();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        model
            .tree_mut()
            .resolve_mut(FIRMWARE_PATH)
            .unwrap()
            .on_change(
                ListenerScope::Internal,
                Arc::new(move |path, value| {
                    sink.lock().unwrap().push((path.to_string(), value.clone()));
                }),
            );

        model.set_firmware_state(FirmwareState::Downloading);
        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "mgmt.firmware");
        assert_eq!(events[0].1["state"], 1.0);
    }

    #[test]
    fn location_fragment_writes_tree() {
        let mut model = model();
        model.update_location(&json!({
            "latitude": 48.13,
            "longitude": 11.58,
            "elevation": 520.0,
            "measuredDateTime": "2024-06-01T12:00:00.000Z",
        }));

        assert_eq!(
            model.tree().resolve("location.longitude").unwrap().to_json(),
            serde_json::json!(11.58)
        );
        assert_eq!(
            model.tree().resolve("location.measuredDateTime").unwrap().to_json(),
            serde_json::json!("2024-06-01T12:00:00.000Z")
        );
    }
}
