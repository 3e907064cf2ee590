//! Observe cancellation handler.

use super::{HandlerContext, HandlerKind, OperationHandler};
use async_trait::async_trait;
use devsync_proto::{DmResponse, FieldsBody, RequestEnvelope, ResponseCode, ServerRequest};

/// Handler for `cancel` requests. Idempotent: fields that were never
/// observed still yield a success response.
pub struct CancelHandler;

#[async_trait]
impl OperationHandler for CancelHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Cancel
    }

    async fn handle(
        &self,
        _request: &ServerRequest,
        envelope: RequestEnvelope,
        ctx: &HandlerContext,
    ) {
        let Some(req_id) = envelope.req_id else {
            tracing::warn!("dropping cancel request without reqId");
            return;
        };
        let Some(body) = envelope
            .d
            .and_then(|d| serde_json::from_value::<FieldsBody>(d).ok())
        else {
            tracing::warn!("dropping cancel request with malformed fields");
            return;
        };

        {
            let mut model = ctx.model.lock().unwrap();
            let mut observations = ctx.observations.lock().unwrap();
            let mut listeners = ctx.observe_listeners.lock().unwrap();
            for spec in &body.fields {
                tracing::debug!(field = %spec.field, "canceling observation");
                observations.cancel([spec.field.as_str()]);
                if let Some(id) = listeners.remove(&spec.field) {
                    if let Some(node) = model.tree_mut().resolve_mut(&spec.field) {
                        node.remove_listener(id);
                    }
                }
            }
        }

        ctx.respond(DmResponse::new(ResponseCode::Success, req_id));
    }
}
