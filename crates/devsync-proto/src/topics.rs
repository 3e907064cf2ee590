//! MQTT topic scheme for device management.
//!
//! Two fixed prefixes split the conversation by direction:
//!
//! - `iotdevice-1/…` — published by the agent (requests and responses to
//!   server requests)
//! - `iotdm-1/…` — published by the server (requests and responses to
//!   agent requests)
//!
//! Custom actions use a two-level suffix, `mgmt/custom/{bundle}/{action}`,
//! subscribed with a `+/+` wildcard.

use serde::{Deserialize, Serialize};

/// Prefix for agent-published topics.
pub const AGENT_PREFIX: &str = "iotdevice-1";

/// Prefix for server-published topics.
pub const SERVER_PREFIX: &str = "iotdm-1";

/// Topic scheme configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicScheme {
    /// Prefix for topics the agent publishes
    pub agent_prefix: String,
    /// Prefix for topics the server publishes
    pub server_prefix: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self {
            agent_prefix: AGENT_PREFIX.to_string(),
            server_prefix: SERVER_PREFIX.to_string(),
        }
    }
}

impl TopicScheme {
    /// Create the standard scheme.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Agent-published topics.

    /// Topic for manage requests.
    #[must_use]
    pub fn manage(&self) -> String {
        format!("{}/mgmt/manage", self.agent_prefix)
    }

    /// Topic for unmanage requests.
    #[must_use]
    pub fn unmanage(&self) -> String {
        format!("{}/mgmt/unmanage", self.agent_prefix)
    }

    /// Topic for location updates.
    #[must_use]
    pub fn update_location(&self) -> String {
        format!("{}/device/update/location", self.agent_prefix)
    }

    /// Topic for appending a diagnostic log entry.
    #[must_use]
    pub fn add_diag_log(&self) -> String {
        format!("{}/add/diag/log", self.agent_prefix)
    }

    /// Topic for clearing diagnostic log entries.
    #[must_use]
    pub fn clear_diag_log(&self) -> String {
        format!("{}/clear/diag/log", self.agent_prefix)
    }

    /// Topic for appending a diagnostic error code.
    #[must_use]
    pub fn add_error_codes(&self) -> String {
        format!("{}/add/diag/errorCodes", self.agent_prefix)
    }

    /// Topic for clearing diagnostic error codes.
    #[must_use]
    pub fn clear_error_codes(&self) -> String {
        format!("{}/clear/diag/errorCodes", self.agent_prefix)
    }

    /// Topic for observe notifications.
    #[must_use]
    pub fn notify(&self) -> String {
        format!("{}/notify", self.agent_prefix)
    }

    /// Topic on which the agent publishes responses to server requests.
    #[must_use]
    pub fn agent_response(&self) -> String {
        format!("{}/response", self.agent_prefix)
    }

    // Server-published topics.

    /// Topic on which the server publishes responses to agent requests.
    #[must_use]
    pub fn server_response(&self) -> String {
        format!("{}/response", self.server_prefix)
    }

    /// Topic for device attribute updates.
    #[must_use]
    pub fn device_update(&self) -> String {
        format!("{}/device/update", self.server_prefix)
    }

    /// Topic for observe requests.
    #[must_use]
    pub fn observe(&self) -> String {
        format!("{}/observe", self.server_prefix)
    }

    /// Topic for observe cancellation.
    #[must_use]
    pub fn cancel(&self) -> String {
        format!("{}/cancel", self.server_prefix)
    }

    /// Topic for reboot initiation.
    #[must_use]
    pub fn initiate_reboot(&self) -> String {
        format!("{}/mgmt/initiate/device/reboot", self.server_prefix)
    }

    /// Topic for factory reset initiation.
    #[must_use]
    pub fn initiate_factory_reset(&self) -> String {
        format!("{}/mgmt/initiate/device/factory_reset", self.server_prefix)
    }

    /// Topic for firmware download initiation.
    #[must_use]
    pub fn initiate_firmware_download(&self) -> String {
        format!("{}/mgmt/initiate/firmware/download", self.server_prefix)
    }

    /// Topic for firmware update initiation.
    #[must_use]
    pub fn initiate_firmware_update(&self) -> String {
        format!("{}/mgmt/initiate/firmware/update", self.server_prefix)
    }

    /// Topic for a specific custom action.
    #[must_use]
    pub fn custom(&self, bundle_id: &str, action_id: &str) -> String {
        format!("{}/mgmt/custom/{bundle_id}/{action_id}", self.server_prefix)
    }

    /// Wildcard subscription matching every custom action.
    #[must_use]
    pub fn custom_wildcard(&self) -> String {
        format!("{}/mgmt/custom/+/+", self.server_prefix)
    }

    /// All server topics a managed agent subscribes to.
    #[must_use]
    pub fn agent_subscriptions(&self) -> Vec<String> {
        vec![
            self.server_response(),
            self.device_update(),
            self.observe(),
            self.cancel(),
            self.initiate_reboot(),
            self.initiate_factory_reset(),
            self.initiate_firmware_download(),
            self.initiate_firmware_update(),
            self.custom_wildcard(),
        ]
    }

    /// Classify an inbound server topic.
    ///
    /// Returns `None` for topics outside the server prefix and for malformed
    /// custom-action suffixes.
    #[must_use]
    pub fn parse(&self, topic: &str) -> Option<ServerRequest> {
        let suffix = topic
            .strip_prefix(self.server_prefix.as_str())?
            .strip_prefix('/')?;

        match suffix {
            "response" => Some(ServerRequest::Response),
            "device/update" => Some(ServerRequest::DeviceUpdate),
            "observe" => Some(ServerRequest::Observe),
            "cancel" => Some(ServerRequest::Cancel),
            "mgmt/initiate/device/reboot" => Some(ServerRequest::Reboot),
            "mgmt/initiate/device/factory_reset" => Some(ServerRequest::FactoryReset),
            "mgmt/initiate/firmware/download" => Some(ServerRequest::FirmwareDownload),
            "mgmt/initiate/firmware/update" => Some(ServerRequest::FirmwareUpdate),
            _ => {
                let rest = suffix.strip_prefix("mgmt/custom/")?;
                let (bundle_id, action_id) = rest.split_once('/')?;
                if bundle_id.is_empty() || action_id.is_empty() || action_id.contains('/') {
                    return None;
                }
                Some(ServerRequest::Custom {
                    bundle_id: bundle_id.to_string(),
                    action_id: action_id.to_string(),
                })
            }
        }
    }
}

/// Inbound server request kinds, keyed by topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerRequest {
    /// Response to an agent-initiated request
    Response,
    /// Device attribute update
    DeviceUpdate,
    /// Observe one or more fields
    Observe,
    /// Cancel observation of one or more fields
    Cancel,
    /// Initiate a reboot
    Reboot,
    /// Initiate a factory reset
    FactoryReset,
    /// Initiate a firmware download
    FirmwareDownload,
    /// Initiate a firmware update
    FirmwareUpdate,
    /// Initiate a custom bundle action
    Custom {
        /// Bundle identifier from the topic
        bundle_id: String,
        /// Action identifier from the topic
        action_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_topics() {
        let scheme = TopicScheme::new();

        assert_eq!(scheme.manage(), "iotdevice-1/mgmt/manage");
        assert_eq!(scheme.unmanage(), "iotdevice-1/mgmt/unmanage");
        assert_eq!(scheme.update_location(), "iotdevice-1/device/update/location");
        assert_eq!(scheme.add_diag_log(), "iotdevice-1/add/diag/log");
        assert_eq!(scheme.clear_error_codes(), "iotdevice-1/clear/diag/errorCodes");
        assert_eq!(scheme.notify(), "iotdevice-1/notify");
        assert_eq!(scheme.agent_response(), "iotdevice-1/response");
    }

    #[test]
    fn server_topic_parsing() {
        let scheme = TopicScheme::new();

        assert_eq!(
            scheme.parse("iotdm-1/response"),
            Some(ServerRequest::Response)
        );
        assert_eq!(
            scheme.parse("iotdm-1/device/update"),
            Some(ServerRequest::DeviceUpdate)
        );
        assert_eq!(
            scheme.parse("iotdm-1/mgmt/initiate/firmware/download"),
            Some(ServerRequest::FirmwareDownload)
        );
        assert_eq!(scheme.parse("iotdevice-1/notify"), None);
        assert_eq!(scheme.parse("iotdm-1/unknown"), None);
    }

    #[test]
    fn custom_action_parsing() {
        let scheme = TopicScheme::new();

        assert_eq!(
            scheme.parse("iotdm-1/mgmt/custom/example-bundle/restart-app"),
            Some(ServerRequest::Custom {
                bundle_id: "example-bundle".to_string(),
                action_id: "restart-app".to_string(),
            })
        );
        // Depth must be exactly two below mgmt/custom.
        assert_eq!(scheme.parse("iotdm-1/mgmt/custom/only-bundle"), None);
        assert_eq!(scheme.parse("iotdm-1/mgmt/custom/a/b/c"), None);
    }

    #[test]
    fn subscription_list_covers_custom_wildcard() {
        let scheme = TopicScheme::new();
        let subs = scheme.agent_subscriptions();

        assert_eq!(subs.len(), 9);
        assert!(subs.contains(&"iotdm-1/mgmt/custom/+/+".to_string()));
        assert!(subs.contains(&"iotdm-1/response".to_string()));
    }
}
