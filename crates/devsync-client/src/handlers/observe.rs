//! Observe handler.
//!
//! For every requested field the current value is snapshotted into the
//! response and an internal listener is hooked to the resource. Later
//! changes run through the observation cache's diff; only changed portions
//! go out as notify messages.

use super::{HandlerContext, HandlerKind, OperationHandler};
use crate::publisher::Outbound;
use crate::transport::Qos;
use async_trait::async_trait;
use devsync_core::resource::ChangeCallback;
use devsync_core::{ListenerScope, ObservationSet};
use devsync_proto::{
    DmResponse, FieldSpec, FieldsBody, RequestEnvelope, ResponseCode, ServerRequest, TopicScheme,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Handler for `observe` requests.
pub struct ObserveHandler;

#[async_trait]
impl OperationHandler for ObserveHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Observe
    }

    async fn handle(
        &self,
        _request: &ServerRequest,
        envelope: RequestEnvelope,
        ctx: &HandlerContext,
    ) {
        let Some(req_id) = envelope.req_id else {
            tracing::warn!("dropping observe request without reqId");
            return;
        };
        let Some(body) = envelope
            .d
            .and_then(|d| serde_json::from_value::<FieldsBody>(d).ok())
        else {
            tracing::warn!("dropping observe request with malformed fields");
            return;
        };

        let mut response_fields: Vec<FieldSpec> = Vec::new();
        let mut resolved = 0usize;
        {
            let mut model = ctx.model.lock().unwrap();
            let mut observations = ctx.observations.lock().unwrap();
            let mut listeners = ctx.observe_listeners.lock().unwrap();
            for spec in &body.fields {
                let Some(node) = model.tree_mut().resolve_mut(&spec.field) else {
                    tracing::warn!(field = %spec.field, "observe for unknown field");
                    response_fields.push(FieldSpec {
                        field: spec.field.clone(),
                        value: Some(Value::Null),
                    });
                    continue;
                };
                let value = node.to_json();
                // Re-observing refreshes the snapshot without stacking a
                // second listener.
                if !listeners.contains_key(&spec.field) {
                    let id = node.on_change(
                        ListenerScope::Internal,
                        notify_callback(
                            Arc::clone(&ctx.observations),
                            ctx.outbound.clone(),
                            &ctx.topics,
                        ),
                    );
                    listeners.insert(spec.field.clone(), id);
                }
                observations.observe(spec.field.as_str(), value.clone());
                response_fields.push(FieldSpec {
                    field: spec.field.clone(),
                    value: Some(value),
                });
                resolved += 1;
            }
        }

        let rc = if resolved == 0 && !body.fields.is_empty() {
            ResponseCode::NotFound
        } else {
            ResponseCode::Success
        };
        let d = serde_json::json!({
            "fields": response_fields
                .iter()
                .map(|f| serde_json::json!({"field": f.field, "value": f.value}))
                .collect::<Vec<_>>()
        });
        ctx.respond(DmResponse::with_data(rc, req_id, d));
    }
}

/// Internal listener that diffs a change against the observation cache and
/// publishes the trimmed delta as a notify message.
fn notify_callback(
    observations: Arc<Mutex<ObservationSet>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    topics: &TopicScheme,
) -> ChangeCallback {
    let topic = topics.notify();
    Arc::new(move |path: &str, value: &Value| {
        let delta = observations.lock().unwrap().diff(path, value);
        let Some(delta) = delta else {
            return;
        };
        let body = FieldsBody::single(path, delta);
        let envelope = RequestEnvelope {
            d: serde_json::to_value(&body).ok(),
            req_id: None,
        };
        match envelope.encode() {
            Ok(payload) => {
                let _ = outbound.send(Outbound::Publish {
                    topic: topic.clone(),
                    payload,
                    qos: Qos::AtLeastOnce,
                });
            }
            Err(err) => {
                tracing::warn!(error = %err, field = path, "failed to encode notify");
            }
        }
    })
}
