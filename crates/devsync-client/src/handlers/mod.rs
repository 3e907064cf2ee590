//! Operation handlers for server-initiated requests.
//!
//! One handler instance per operation kind per session, collected in a
//! [`HandlerRegistry`]. Handlers share state only through the
//! [`HandlerContext`] (resource tree, observation cache, outbound queue);
//! long-running work is handed to the per-category action workers so the
//! dispatch path never blocks.

mod action;
mod cancel;
mod custom;
mod firmware;
mod observe;
mod update;

pub use action::{FactoryResetHandler, RebootHandler};
pub use cancel::CancelHandler;
pub use custom::{CustomAction, CustomHandler};
pub use firmware::{FirmwareDownloadHandler, FirmwareHandle, FirmwareUpdateHandler};
pub use observe::ObserveHandler;
pub use update::UpdateHandler;

use crate::publisher::Outbound;
use crate::transport::Qos;
use crate::worker::ActionJob;
use async_trait::async_trait;
use devsync_core::{DeviceModel, ListenerId, ObservationSet};
use devsync_proto::{DmResponse, RequestEnvelope, ResponseCode, ServerRequest, TopicScheme};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Operation kinds a handler can claim. Custom actions collapse to one
/// kind; the bundle and action identifiers travel in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// Device attribute update
    Update,
    /// Observe fields
    Observe,
    /// Cancel observation
    Cancel,
    /// Reboot
    Reboot,
    /// Factory reset
    FactoryReset,
    /// Firmware download
    FirmwareDownload,
    /// Firmware update
    FirmwareUpdate,
    /// Custom bundle action
    Custom,
}

impl HandlerKind {
    /// The kind responsible for an inbound request, if any. Responses are
    /// routed to the correlation engine, not to a handler.
    #[must_use]
    pub fn of(request: &ServerRequest) -> Option<Self> {
        match request {
            ServerRequest::Response => None,
            ServerRequest::DeviceUpdate => Some(HandlerKind::Update),
            ServerRequest::Observe => Some(HandlerKind::Observe),
            ServerRequest::Cancel => Some(HandlerKind::Cancel),
            ServerRequest::Reboot => Some(HandlerKind::Reboot),
            ServerRequest::FactoryReset => Some(HandlerKind::FactoryReset),
            ServerRequest::FirmwareDownload => Some(HandlerKind::FirmwareDownload),
            ServerRequest::FirmwareUpdate => Some(HandlerKind::FirmwareUpdate),
            ServerRequest::Custom { .. } => Some(HandlerKind::Custom),
        }
    }
}

/// Result a device action eventually reports for its deferred response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    /// The action was started
    Accepted,
    /// The action failed
    Failed,
    /// The device cannot perform the action
    Unsupported,
}

impl ActionStatus {
    fn response_code(self) -> ResponseCode {
        match self {
            ActionStatus::Accepted => ResponseCode::Accepted,
            ActionStatus::Failed => ResponseCode::InternalError,
            ActionStatus::Unsupported => ResponseCode::NotImplemented,
        }
    }
}

/// Single-use completion handle for a deferred action response.
///
/// Handed to the device-supplied handler; reporting consumes the handle, so
/// each request is answered at most once.
pub struct ActionRequest {
    req_id: String,
    response_topic: String,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl ActionRequest {
    fn new(req_id: String, ctx: &HandlerContext) -> Self {
        Self {
            req_id,
            response_topic: ctx.topics.agent_response(),
            outbound: ctx.outbound.clone(),
        }
    }

    /// The correlation id of the request being served.
    #[must_use]
    pub fn req_id(&self) -> &str {
        &self.req_id
    }

    /// Publish the deferred response.
    pub fn complete(self, status: ActionStatus, message: Option<String>) {
        let mut response = DmResponse::new(status.response_code(), self.req_id);
        response.message = message;
        match response.encode() {
            Ok(payload) => {
                let _ = self.outbound.send(Outbound::Publish {
                    topic: self.response_topic,
                    payload,
                    qos: Qos::AtLeastOnce,
                });
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to encode action response");
            }
        }
    }
}

/// Device-supplied reboot / factory reset implementation.
#[async_trait]
pub trait DeviceActionHandler: Send + Sync {
    /// Reboot the device, reporting the outcome on `request`.
    async fn reboot(&self, request: ActionRequest);

    /// Factory-reset the device, reporting the outcome on `request`.
    async fn factory_reset(&self, request: ActionRequest);
}

/// Device-supplied firmware implementation.
#[async_trait]
pub trait FirmwareHandler: Send + Sync {
    /// Download the firmware image named by the handle's `url`. Must leave
    /// the state at `Downloaded` on success or back at `Idle` on failure.
    async fn download(&self, firmware: FirmwareHandle);

    /// Flash the downloaded image. Must set the final update status (which
    /// propagates the version on success) and return the state to `Idle`.
    async fn update(&self, firmware: FirmwareHandle);
}

/// Device-supplied custom bundle action implementation.
#[async_trait]
pub trait CustomActionHandler: Send + Sync {
    /// Execute the action, reporting the outcome on the embedded request.
    async fn run(&self, action: CustomAction);
}

/// Shared per-session state handlers operate on.
pub struct HandlerContext {
    /// The session's device model
    pub model: Arc<Mutex<DeviceModel>>,
    /// Observe/notify snapshot cache
    pub observations: Arc<Mutex<ObservationSet>>,
    /// Internal listener handles per observed field
    pub observe_listeners: Mutex<HashMap<String, ListenerId>>,
    /// Outbound publish queue
    pub outbound: mpsc::UnboundedSender<Outbound>,
    /// Topic scheme of the session
    pub topics: TopicScheme,
    /// Reboot / factory reset implementation, if the device has one
    pub device_actions: Option<Arc<dyn DeviceActionHandler>>,
    /// Firmware implementation, if the device has one
    pub firmware: Option<Arc<dyn FirmwareHandler>>,
    /// Custom action implementation, if the device has one
    pub custom_actions: Option<Arc<dyn CustomActionHandler>>,
    /// Queue of the device-action worker
    pub device_worker: mpsc::UnboundedSender<ActionJob>,
    /// Queue of the firmware worker
    pub firmware_worker: mpsc::UnboundedSender<ActionJob>,
    /// Queue of the custom-action worker
    pub custom_worker: mpsc::UnboundedSender<ActionJob>,
}

impl HandlerContext {
    /// Queue a response on the agent response topic.
    pub fn respond(&self, response: DmResponse) {
        match response.encode() {
            Ok(payload) => {
                let _ = self.outbound.send(Outbound::Publish {
                    topic: self.topics.agent_response(),
                    payload,
                    qos: Qos::AtLeastOnce,
                });
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to encode response");
            }
        }
    }
}

/// One operation's request-to-response contract.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// The operation kind this handler serves.
    fn kind(&self) -> HandlerKind;

    /// Handle one inbound request.
    async fn handle(&self, request: &ServerRequest, envelope: RequestEnvelope, ctx: &HandlerContext);
}

/// Per-session table of operation handlers.
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKind, Box<dyn OperationHandler>>,
}

impl HandlerRegistry {
    /// Registry with the eight standard operation handlers.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        registry.register(Box::new(UpdateHandler));
        registry.register(Box::new(ObserveHandler));
        registry.register(Box::new(CancelHandler));
        registry.register(Box::new(RebootHandler));
        registry.register(Box::new(FactoryResetHandler));
        registry.register(Box::new(FirmwareDownloadHandler));
        registry.register(Box::new(FirmwareUpdateHandler));
        registry.register(Box::new(CustomHandler));
        registry
    }

    fn register(&mut self, handler: Box<dyn OperationHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    /// Decode the payload and hand it to the matching handler.
    ///
    /// Malformed payloads are logged and dropped without a response; the
    /// server retries or times out.
    pub async fn dispatch(&self, request: &ServerRequest, payload: &[u8], ctx: &HandlerContext) {
        let Some(kind) = HandlerKind::of(request) else {
            return;
        };
        let envelope = match RequestEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(error = %err, ?kind, "dropping malformed request");
                return;
            }
        };
        if let Some(handler) = self.handlers.get(&kind) {
            handler.handle(request, envelope, ctx).await;
        }
    }
}
