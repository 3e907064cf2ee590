//! Custom bundle action handler.
//!
//! Custom actions arrive on `mgmt/custom/{bundleId}/{actionId}`; the ids
//! come from the topic, the request body travels along untouched. Execution
//! and the deferred response work exactly like reboot.

use super::{ActionRequest, HandlerContext, HandlerKind, OperationHandler};
use crate::worker::ActionJob;
use async_trait::async_trait;
use devsync_proto::{DmResponse, RequestEnvelope, ResponseCode, ServerRequest};
use serde_json::Value;

/// A custom action pulled off the wire, handed to the device-supplied
/// handler together with its completion handle.
pub struct CustomAction {
    /// Bundle identifier from the topic
    pub bundle_id: String,
    /// Action identifier from the topic
    pub action_id: String,
    /// Raw request body, if any
    pub payload: Option<Value>,
    /// Completion handle for the deferred response
    pub request: ActionRequest,
}

/// Handler for `mgmt/custom/{bundleId}/{actionId}` requests.
pub struct CustomHandler;

#[async_trait]
impl OperationHandler for CustomHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Custom
    }

    async fn handle(
        &self,
        request: &ServerRequest,
        envelope: RequestEnvelope,
        ctx: &HandlerContext,
    ) {
        let ServerRequest::Custom {
            bundle_id,
            action_id,
        } = request
        else {
            return;
        };
        let Some(req_id) = envelope.req_id else {
            tracing::warn!("dropping custom action request without reqId");
            return;
        };
        let Some(handler) = ctx.custom_actions.clone() else {
            ctx.respond(DmResponse::new(ResponseCode::NotImplemented, req_id));
            return;
        };

        let action = CustomAction {
            bundle_id: bundle_id.clone(),
            action_id: action_id.clone(),
            payload: envelope.d,
            request: ActionRequest::new(req_id.clone(), ctx),
        };
        tracing::debug!(bundle_id = %action.bundle_id, action_id = %action.action_id, "queuing custom action");
        let job = ActionJob::Run(Box::pin(async move {
            handler.run(action).await;
        }));
        if ctx.custom_worker.send(job).is_err() {
            tracing::error!(req_id = %req_id, "custom action worker is gone");
            ctx.respond(DmResponse::new(ResponseCode::InternalError, req_id));
        }
    }
}
