//! Built-in action handlers for the standalone agent.
//!
//! The agent binary has no real device behind it, so these handlers log the
//! request and walk the expected state transitions. A device integration
//! replaces them with its own [`DeviceActionHandler`] / [`FirmwareHandler`]
//! implementations.

use async_trait::async_trait;
use devsync_client::{
    ActionRequest, ActionStatus, CustomAction, CustomActionHandler, DeviceActionHandler,
    FirmwareHandle, FirmwareHandler,
};
use devsync_core::{FirmwareState, FirmwareUpdateStatus};

/// Logs reboot and factory reset requests and reports them as started.
pub struct LoggingDeviceActions;

#[async_trait]
impl DeviceActionHandler for LoggingDeviceActions {
    async fn reboot(&self, request: ActionRequest) {
        tracing::info!(req_id = %request.req_id(), "reboot requested");
        request.complete(ActionStatus::Accepted, None);
    }

    async fn factory_reset(&self, request: ActionRequest) {
        tracing::info!(req_id = %request.req_id(), "factory reset requested");
        request.complete(
            ActionStatus::Unsupported,
            Some("factory reset is not available on this device".to_string()),
        );
    }
}

/// Walks the firmware state machine without fetching or flashing anything.
pub struct SimulatedFirmware;

#[async_trait]
impl FirmwareHandler for SimulatedFirmware {
    async fn download(&self, firmware: FirmwareHandle) {
        match firmware.url() {
            Some(url) => {
                tracing::info!(url = %url, "simulating firmware download");
                firmware.set_state(FirmwareState::Downloaded);
            }
            None => {
                tracing::warn!("firmware url vanished before the download started");
                firmware.set_update_status(FirmwareUpdateStatus::InvalidUri);
                firmware.set_state(FirmwareState::Idle);
            }
        }
    }

    async fn update(&self, firmware: FirmwareHandle) {
        tracing::info!(version = ?firmware.version(), "simulating firmware update");
        firmware.set_update_status(FirmwareUpdateStatus::Success);
        firmware.set_state(FirmwareState::Idle);
    }
}

/// Accepts every custom action and logs its payload.
pub struct LoggingCustomActions;

#[async_trait]
impl CustomActionHandler for LoggingCustomActions {
    async fn run(&self, action: CustomAction) {
        tracing::info!(
            bundle_id = %action.bundle_id,
            action_id = %action.action_id,
            payload = ?action.payload,
            "custom action requested"
        );
        action.request.complete(ActionStatus::Accepted, None);
    }
}
