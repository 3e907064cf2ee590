//! Reboot and factory reset handlers.
//!
//! Both operations defer their response: the device-supplied handler runs
//! on the device-action worker and reports the outcome through the
//! [`ActionRequest`](super::ActionRequest) handle when it knows whether the
//! action started. No synchronous response is sent on the accept path.

use super::{ActionRequest, HandlerContext, HandlerKind, OperationHandler};
use crate::worker::ActionJob;
use async_trait::async_trait;
use devsync_proto::{DmResponse, RequestEnvelope, ResponseCode, ServerRequest};

/// Handler for `mgmt/initiate/device/reboot`.
pub struct RebootHandler;

#[async_trait]
impl OperationHandler for RebootHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Reboot
    }

    async fn handle(
        &self,
        _request: &ServerRequest,
        envelope: RequestEnvelope,
        ctx: &HandlerContext,
    ) {
        dispatch_device_action(envelope, ctx, DeviceActionKind::Reboot);
    }
}

/// Handler for `mgmt/initiate/device/factory_reset`.
pub struct FactoryResetHandler;

#[async_trait]
impl OperationHandler for FactoryResetHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::FactoryReset
    }

    async fn handle(
        &self,
        _request: &ServerRequest,
        envelope: RequestEnvelope,
        ctx: &HandlerContext,
    ) {
        dispatch_device_action(envelope, ctx, DeviceActionKind::FactoryReset);
    }
}

#[derive(Clone, Copy)]
enum DeviceActionKind {
    Reboot,
    FactoryReset,
}

fn dispatch_device_action(envelope: RequestEnvelope, ctx: &HandlerContext, kind: DeviceActionKind) {
    let Some(req_id) = envelope.req_id else {
        tracing::warn!("dropping device action request without reqId");
        return;
    };
    let Some(handler) = ctx.device_actions.clone() else {
        ctx.respond(DmResponse::new(ResponseCode::NotImplemented, req_id));
        return;
    };

    let request = ActionRequest::new(req_id.clone(), ctx);
    let job = ActionJob::Run(Box::pin(async move {
        match kind {
            DeviceActionKind::Reboot => handler.reboot(request).await,
            DeviceActionKind::FactoryReset => handler.factory_reset(request).await,
        }
    }));
    if ctx.device_worker.send(job).is_err() {
        tracing::error!(req_id = %req_id, "device action worker is gone");
        ctx.respond(DmResponse::new(ResponseCode::InternalError, req_id));
    }
}
