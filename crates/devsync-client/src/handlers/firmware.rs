//! Firmware download and update handlers.
//!
//! The server first pushes the image location into `mgmt.firmware` via a
//! device update, then initiates the download, then the update. Both
//! operations respond `202` immediately and run the device-supplied
//! [`FirmwareHandler`](super::FirmwareHandler) on the firmware worker; state
//! transitions flow through the resource tree so observers see them.

use super::{HandlerContext, HandlerKind, OperationHandler};
use crate::worker::ActionJob;
use async_trait::async_trait;
use devsync_core::{DeviceModel, FirmwareState, FirmwareUpdateStatus};
use devsync_proto::{DmResponse, RequestEnvelope, ResponseCode, ServerRequest};
use std::sync::{Arc, Mutex};

/// Shared firmware view handed to the device-supplied handler.
///
/// Setters go through the device model, so each transition fires the
/// observers of `mgmt.firmware` and the success side effects apply.
#[derive(Clone)]
pub struct FirmwareHandle {
    model: Arc<Mutex<DeviceModel>>,
}

impl FirmwareHandle {
    pub(crate) fn new(model: Arc<Mutex<DeviceModel>>) -> Self {
        Self { model }
    }

    /// URI of the image to fetch.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        self.model.lock().unwrap().firmware_url()
    }

    /// Version advertised for the new image.
    #[must_use]
    pub fn version(&self) -> Option<String> {
        self.model.lock().unwrap().firmware_version()
    }

    /// Checksum/signature to verify the image against.
    #[must_use]
    pub fn verifier(&self) -> Option<String> {
        self.model.lock().unwrap().firmware_verifier()
    }

    /// Current download state.
    #[must_use]
    pub fn state(&self) -> FirmwareState {
        self.model.lock().unwrap().firmware_state()
    }

    /// Transition the download state.
    pub fn set_state(&self, state: FirmwareState) {
        self.model.lock().unwrap().set_firmware_state(state);
    }

    /// Report the outcome of an update. `Success` propagates the version to
    /// the device info and clears the verifier.
    pub fn set_update_status(&self, status: FirmwareUpdateStatus) {
        self.model.lock().unwrap().set_firmware_update_status(status);
    }
}

/// Handler for `mgmt/initiate/firmware/download`.
pub struct FirmwareDownloadHandler;

#[async_trait]
impl OperationHandler for FirmwareDownloadHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::FirmwareDownload
    }

    async fn handle(
        &self,
        _request: &ServerRequest,
        envelope: RequestEnvelope,
        ctx: &HandlerContext,
    ) {
        let Some(req_id) = envelope.req_id else {
            tracing::warn!("dropping firmware download request without reqId");
            return;
        };
        let Some(handler) = ctx.firmware.clone() else {
            ctx.respond(DmResponse::new(ResponseCode::NotImplemented, req_id));
            return;
        };

        let eligibility = {
            let model = ctx.model.lock().unwrap();
            if model.firmware_state() != FirmwareState::Idle {
                Err("firmware download already in progress")
            } else if model.firmware_url().is_none() {
                Err("firmware url is not set")
            } else {
                Ok(())
            }
        };
        if let Err(reason) = eligibility {
            tracing::warn!(req_id = %req_id, reason, "rejecting firmware download");
            let mut response = DmResponse::new(ResponseCode::BadRequest, req_id);
            response.message = Some(reason.to_string());
            ctx.respond(response);
            return;
        }

        ctx.respond(DmResponse::new(ResponseCode::Accepted, req_id));

        let firmware = FirmwareHandle::new(Arc::clone(&ctx.model));
        let job = ActionJob::Run(Box::pin(async move {
            firmware.set_state(FirmwareState::Downloading);
            handler.download(firmware).await;
        }));
        if ctx.firmware_worker.send(job).is_err() {
            tracing::error!("firmware worker is gone");
        }
    }
}

/// Handler for `mgmt/initiate/firmware/update`.
pub struct FirmwareUpdateHandler;

#[async_trait]
impl OperationHandler for FirmwareUpdateHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::FirmwareUpdate
    }

    async fn handle(
        &self,
        _request: &ServerRequest,
        envelope: RequestEnvelope,
        ctx: &HandlerContext,
    ) {
        let Some(req_id) = envelope.req_id else {
            tracing::warn!("dropping firmware update request without reqId");
            return;
        };
        let Some(handler) = ctx.firmware.clone() else {
            ctx.respond(DmResponse::new(ResponseCode::NotImplemented, req_id));
            return;
        };

        let downloaded =
            ctx.model.lock().unwrap().firmware_state() == FirmwareState::Downloaded;
        if !downloaded {
            tracing::warn!(req_id = %req_id, "rejecting firmware update, image not downloaded");
            let mut response = DmResponse::new(ResponseCode::BadRequest, req_id);
            response.message = Some("firmware image is not downloaded".to_string());
            ctx.respond(response);
            return;
        }

        ctx.respond(DmResponse::new(ResponseCode::Accepted, req_id));

        let firmware = FirmwareHandle::new(Arc::clone(&ctx.model));
        let job = ActionJob::Run(Box::pin(async move {
            handler.update(firmware).await;
        }));
        if ctx.firmware_worker.send(job).is_err() {
            tracing::error!("firmware worker is gone");
        }
    }
}
