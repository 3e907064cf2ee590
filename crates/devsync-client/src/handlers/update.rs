//! Device attribute update handler.
//!
//! The server pushes new values for writable parts of the model (location,
//! metadata, deviceInfo, mgmt.firmware). Values apply with internal events
//! suppressed so a bulk update fires no duplicate observe traffic; external
//! application listeners fire asynchronously after the response, once per
//! touched resource, against the fully updated tree.

use super::{HandlerContext, HandlerKind, OperationHandler};
use async_trait::async_trait;
use devsync_proto::{DmResponse, FieldsBody, RequestEnvelope, ResponseCode, ServerRequest};
use serde_json::{json, Value};
use std::sync::Arc;

/// Handler for `device/update` requests.
pub struct UpdateHandler;

#[async_trait]
impl OperationHandler for UpdateHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Update
    }

    async fn handle(
        &self,
        _request: &ServerRequest,
        envelope: RequestEnvelope,
        ctx: &HandlerContext,
    ) {
        let Some(req_id) = envelope.req_id else {
            tracing::warn!("dropping update request without reqId");
            return;
        };
        let fields = match envelope.d {
            Some(d) => match serde_json::from_value::<FieldsBody>(d) {
                Ok(body) => body.fields,
                Err(err) => {
                    tracing::warn!(error = %err, "dropping update request with malformed fields");
                    return;
                }
            },
            // An empty update is not an error.
            None => Vec::new(),
        };

        let mut touched: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();
        let mut message: Option<String> = None;
        {
            let mut model = ctx.model.lock().unwrap();
            for spec in &fields {
                let value = spec.value.clone().unwrap_or(Value::Null);
                match model.tree_mut().update(&spec.field, &value, false) {
                    Some(Ok(true)) => touched.push(spec.field.clone()),
                    // An identical value is a success but touches nothing.
                    Some(Ok(false)) => {}
                    Some(Err(err)) => {
                        tracing::warn!(field = %spec.field, error = %err, "update failed");
                        message = Some(err.to_string());
                        failed.push(spec.field.clone());
                    }
                    None => {
                        tracing::debug!(field = %spec.field, "update for unknown field");
                        failed.push(spec.field.clone());
                    }
                }
            }
        }

        let mut response = if failed.is_empty() {
            DmResponse::new(ResponseCode::Success, req_id)
        } else {
            DmResponse::with_data(ResponseCode::NotFound, req_id, json!({ "fields": failed }))
        };
        response.message = message;
        ctx.respond(response);

        if !touched.is_empty() {
            let model = Arc::clone(&ctx.model);
            tokio::spawn(async move {
                let model = model.lock().unwrap();
                for field in &touched {
                    if let Some(node) = model.tree().resolve(field) {
                        node.notify_external_listeners();
                    }
                }
            });
        }
    }
}
