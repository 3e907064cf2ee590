//! Managed-session lifecycle.
//!
//! A [`ManagedClient`] owns one device model, one handler registry and the
//! background workers for a single managed session. `manage` registers the
//! device with the server and opens the session; while managed, the runtime
//! dispatches server requests, renews the registration shortly before its
//! lifetime expires, and recovers the session after a reconnect.

use crate::correlation::{CorrelationEngine, RESPONSE_TIMEOUT};
use crate::error::ClientError;
use crate::handlers::{
    CustomActionHandler, DeviceActionHandler, FirmwareHandler, HandlerContext, HandlerRegistry,
};
use crate::publisher::{Outbound, PublishWorker};
use crate::transport::{Qos, Transport, TransportEvent};
use crate::worker::{ActionJob, ActionWorker};
use chrono::{SecondsFormat, Utc};
use devsync_core::{DeviceModel, ObservationSet};
use devsync_proto::{
    DiagLogBody, DmResponse, ErrorCodeBody, LocationBody, LogSeverity, ManageBody, MessageError,
    ResponseCode, ServerRequest, Supports, TopicScheme,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Safety margin before the dormant deadline at which the registration is
/// renewed.
pub const RENEWAL_MARGIN: Duration = Duration::from_secs(120);

/// Pause before retrying a renewal whose manage request failed or went
/// unanswered.
const RENEWAL_RETRY: Duration = Duration::from_secs(30);

/// Optional pieces of a session.
pub struct SessionOptions {
    /// Response timeout for client-initiated requests
    pub response_timeout: Duration,
    /// Reboot / factory reset implementation
    pub device_actions: Option<Arc<dyn DeviceActionHandler>>,
    /// Firmware implementation
    pub firmware: Option<Arc<dyn FirmwareHandler>>,
    /// Custom bundle action implementation
    pub custom_actions: Option<Arc<dyn CustomActionHandler>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            response_timeout: RESPONSE_TIMEOUT,
            device_actions: None,
            firmware: None,
            custom_actions: None,
        }
    }
}

struct SessionState {
    managed: bool,
    lifetime: u64,
    supports: Supports,
    dormant_deadline: Option<Instant>,
}

/// One managed device session over an abstract transport.
pub struct ManagedClient {
    transport: Arc<dyn Transport>,
    topics: TopicScheme,
    correlation: CorrelationEngine,
    outbound: mpsc::UnboundedSender<Outbound>,
    ctx: Arc<HandlerContext>,
    registry: HandlerRegistry,
    state: Mutex<SessionState>,
    renewal_changed: Notify,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ManagedClient {
    /// Wire up the session: publish worker, one action worker per category,
    /// handler registry and correlation engine.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, model: DeviceModel, options: SessionOptions) -> Self {
        let topics = TopicScheme::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (device_worker, device_rx) = mpsc::unbounded_channel();
        let (firmware_worker, firmware_rx) = mpsc::unbounded_channel();
        let (custom_worker, custom_rx) = mpsc::unbounded_channel();

        let workers = vec![
            PublishWorker::spawn(Arc::clone(&transport), outbound_rx),
            ActionWorker::spawn("device", device_rx),
            ActionWorker::spawn("firmware", firmware_rx),
            ActionWorker::spawn("custom", custom_rx),
        ];

        let ctx = Arc::new(HandlerContext {
            model: Arc::new(Mutex::new(model)),
            observations: Arc::new(Mutex::new(ObservationSet::new())),
            observe_listeners: Mutex::new(HashMap::new()),
            outbound: outbound.clone(),
            topics: topics.clone(),
            device_actions: options.device_actions,
            firmware: options.firmware,
            custom_actions: options.custom_actions,
            device_worker,
            firmware_worker,
            custom_worker,
        });

        Self {
            transport,
            topics,
            correlation: CorrelationEngine::with_timeout(
                outbound.clone(),
                options.response_timeout,
            ),
            outbound,
            ctx,
            registry: HandlerRegistry::standard(),
            state: Mutex::new(SessionState {
                managed: false,
                lifetime: 0,
                supports: Supports {
                    device_actions: false,
                    firmware_actions: false,
                },
                dormant_deadline: None,
            }),
            renewal_changed: Notify::new(),
            workers: Mutex::new(workers),
        }
    }

    /// The session's device model, shared with application code.
    #[must_use]
    pub fn model(&self) -> Arc<Mutex<DeviceModel>> {
        Arc::clone(&self.ctx.model)
    }

    /// Whether a manage request has been acknowledged and not yet undone.
    #[must_use]
    pub fn is_managed(&self) -> bool {
        self.state.lock().unwrap().managed
    }

    /// Register the device as managed.
    ///
    /// Subscribes to all server topics in one bulk call, then publishes the
    /// manage request carrying the device info, metadata and capabilities.
    /// A `lifetime` of 0 registers without expiry; otherwise the runtime
    /// renews the registration [`RENEWAL_MARGIN`] before it lapses.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on subscribe or encode failure. An
    /// unanswered request is `Ok(None)`, not an error.
    pub async fn manage(
        &self,
        lifetime: u64,
        supports: Supports,
    ) -> Result<Option<ResponseCode>, ClientError> {
        self.subscribe_all().await?;
        self.manage_request(lifetime, supports).await
    }

    /// Unregister the device.
    ///
    /// The local session is torn down whether or not the server answers:
    /// topics are unsubscribed and all observations are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the request cannot be issued.
    pub async fn unmanage(&self) -> Result<Option<ResponseCode>, ClientError> {
        let response = self
            .correlation
            .send_and_wait(&self.topics.unmanage(), None, Qos::AtLeastOnce)
            .await?;

        {
            let mut state = self.state.lock().unwrap();
            state.managed = false;
            state.dormant_deadline = None;
        }
        if let Err(err) = self
            .transport
            .unsubscribe(&self.topics.agent_subscriptions())
            .await
        {
            tracing::warn!(error = %err, "bulk unsubscribe failed");
        }
        self.clear_observations();

        Ok(response.as_ref().and_then(DmResponse::response_code))
    }

    /// Report a new device location.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotManaged`] outside a managed session.
    pub async fn update_location(
        &self,
        latitude: f64,
        longitude: f64,
        elevation: Option<f64>,
        accuracy: Option<f64>,
    ) -> Result<Option<ResponseCode>, ClientError> {
        self.ensure_managed()?;
        let body = LocationBody {
            latitude,
            longitude,
            elevation,
            measured_date_time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            accuracy,
        };
        let body = serde_json::to_value(&body)
            .map_err(|e| ClientError::Protocol(MessageError::Serialize(e.to_string())))?;
        self.ctx.model.lock().unwrap().update_location(&body);
        self.request(&self.topics.update_location(), Some(body)).await
    }

    /// Append a diagnostic log entry.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotManaged`] outside a managed session.
    pub async fn add_log(
        &self,
        message: &str,
        severity: LogSeverity,
        data: Option<&[u8]>,
    ) -> Result<Option<ResponseCode>, ClientError> {
        self.ensure_managed()?;
        let body = DiagLogBody::new(message, Utc::now(), severity, data);
        let body = serde_json::to_value(&body)
            .map_err(|e| ClientError::Protocol(MessageError::Serialize(e.to_string())))?;
        self.request(&self.topics.add_diag_log(), Some(body)).await
    }

    /// Clear all diagnostic log entries.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotManaged`] outside a managed session.
    pub async fn clear_logs(&self) -> Result<Option<ResponseCode>, ClientError> {
        self.ensure_managed()?;
        self.request(&self.topics.clear_diag_log(), None).await
    }

    /// Report a device error code.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotManaged`] outside a managed session.
    pub async fn add_error_code(&self, code: i64) -> Result<Option<ResponseCode>, ClientError> {
        self.ensure_managed()?;
        let body = serde_json::to_value(ErrorCodeBody { error_code: code })
            .map_err(|e| ClientError::Protocol(MessageError::Serialize(e.to_string())))?;
        self.request(&self.topics.add_error_codes(), Some(body)).await
    }

    /// Clear all reported error codes.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotManaged`] outside a managed session.
    pub async fn clear_error_codes(&self) -> Result<Option<ResponseCode>, ClientError> {
        self.ensure_managed()?;
        self.request(&self.topics.clear_error_codes(), None).await
    }

    /// Drive the session: dispatch inbound traffic, renew the registration
    /// before it lapses, recover after reconnects. Runs until the event
    /// stream closes.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        loop {
            let renewal_at = self.renewal_deadline();
            tokio::select! {
                event = events.recv() => {
                    match event {
                        None => {
                            tracing::debug!("transport event stream closed");
                            break;
                        }
                        Some(TransportEvent::Message { topic, payload }) => {
                            self.dispatch(&topic, &payload).await;
                        }
                        Some(TransportEvent::ConnectionLost) => {
                            tracing::warn!("transport connection lost");
                        }
                        Some(TransportEvent::Reconnected) => {
                            let client = Arc::clone(&self);
                            tokio::spawn(async move { client.recover().await });
                        }
                    }
                }
                () = tokio::time::sleep_until(renewal_at.unwrap_or_else(Instant::now)),
                        if renewal_at.is_some() => {
                    // Clear the deadline so the timer does not refire while
                    // the renewal is in flight; the manage response restores
                    // it, a failed renewal schedules a retry.
                    self.state.lock().unwrap().dormant_deadline = None;
                    let client = Arc::clone(&self);
                    tokio::spawn(async move { client.renew().await });
                }
                // A renewal outcome landed off the event path; re-read the
                // schedule.
                () = self.renewal_changed.notified() => {}
            }
        }
    }

    /// Stop all background workers. Queued outbound messages ahead of the
    /// shutdown marker still go out; queued actions do not start.
    pub async fn shutdown(&self) {
        let _ = self.ctx.device_worker.send(ActionJob::Shutdown);
        let _ = self.ctx.firmware_worker.send(ActionJob::Shutdown);
        let _ = self.ctx.custom_worker.send(ActionJob::Shutdown);
        let _ = self.outbound.send(Outbound::Shutdown);
        let workers: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }
    }

    async fn dispatch(&self, topic: &str, payload: &[u8]) {
        let Some(request) = self.topics.parse(topic) else {
            tracing::debug!(topic, "ignoring message on unrecognized topic");
            return;
        };
        if request == ServerRequest::Response {
            match DmResponse::decode(payload) {
                Ok(response) => self.correlation.complete(response),
                Err(err) => tracing::warn!(error = %err, "dropping malformed response"),
            }
            return;
        }
        // At-least-once delivery can hand over requests queued before the
        // unmanage unsubscribe; a torn-down session must not serve them.
        if !self.is_managed() {
            tracing::debug!(topic, "dropping server request outside a managed session");
            return;
        }
        tracing::debug!(topic, "dispatching server request");
        self.registry.dispatch(&request, payload, &self.ctx).await;
    }

    async fn manage_request(
        &self,
        lifetime: u64,
        supports: Supports,
    ) -> Result<Option<ResponseCode>, ClientError> {
        let body = {
            let model = self.ctx.model.lock().unwrap();
            ManageBody {
                lifetime: (lifetime > 0).then_some(lifetime),
                supports,
                device_info: model.device_info_json(),
                metadata: model.metadata_json(),
            }
        };
        let body = serde_json::to_value(&body)
            .map_err(|e| ClientError::Protocol(MessageError::Serialize(e.to_string())))?;

        let response = self
            .correlation
            .send_and_wait(&self.topics.manage(), Some(body), Qos::AtLeastOnce)
            .await?;
        let rc = response.as_ref().and_then(DmResponse::response_code);

        if rc == Some(ResponseCode::Success) {
            let mut state = self.state.lock().unwrap();
            state.managed = true;
            state.lifetime = lifetime;
            state.supports = supports;
            state.dormant_deadline =
                (lifetime > 0).then(|| Instant::now() + Duration::from_secs(lifetime));
            if lifetime > 0 && lifetime <= RENEWAL_MARGIN.as_secs() {
                tracing::warn!(
                    lifetime,
                    "lifetime shorter than the renewal margin, registration will lapse"
                );
            }
            tracing::info!(lifetime, "device is managed");
        } else {
            tracing::warn!(?rc, "manage request not acknowledged");
        }
        Ok(rc)
    }

    async fn request(
        &self,
        topic: &str,
        body: Option<Value>,
    ) -> Result<Option<ResponseCode>, ClientError> {
        let response = self
            .correlation
            .send_and_wait(topic, body, Qos::AtLeastOnce)
            .await?;
        Ok(response.as_ref().and_then(DmResponse::response_code))
    }

    async fn subscribe_all(&self) -> Result<(), ClientError> {
        let topics = self.topics.agent_subscriptions();
        tracing::debug!(count = topics.len(), "bulk subscribing to server topics");
        self.transport
            .subscribe(&topics, Qos::AtLeastOnce)
            .await
            .map_err(ClientError::from)
    }

    fn renewal_deadline(&self) -> Option<Instant> {
        let state = self.state.lock().unwrap();
        if !state.managed || state.lifetime == 0 {
            return None;
        }
        if state.lifetime <= RENEWAL_MARGIN.as_secs() {
            return None;
        }
        state.dormant_deadline.map(|d| d - RENEWAL_MARGIN)
    }

    async fn renew(&self) {
        let (lifetime, supports) = {
            let state = self.state.lock().unwrap();
            if !state.managed {
                return;
            }
            (state.lifetime, state.supports)
        };
        tracing::info!(lifetime, "renewing managed session");
        match self.manage_request(lifetime, supports).await {
            Ok(Some(ResponseCode::Success)) => {}
            Ok(rc) => {
                tracing::warn!(?rc, "session renewal not acknowledged, scheduling retry");
                self.schedule_renewal_retry();
            }
            Err(err) => {
                tracing::error!(error = %err, "session renewal failed, scheduling retry");
                self.schedule_renewal_retry();
            }
        }
    }

    /// Re-arm the renewal timer after a failed renewal. The session stays
    /// managed; the registration may have lapsed server-side, but the next
    /// manage request reopens it.
    fn schedule_renewal_retry(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if !state.managed || state.dormant_deadline.is_some() {
                return;
            }
            state.dormant_deadline = Some(Instant::now() + RENEWAL_MARGIN + RENEWAL_RETRY);
        }
        self.renewal_changed.notify_one();
    }

    /// Reconnect recovery: resubscribe, replay unanswered requests, then
    /// re-manage with whatever lifetime the registration still had when the
    /// connection came back. An expired registration is reopened with the
    /// originally configured lifetime.
    async fn recover(&self) {
        let (lifetime, supports) = {
            let state = self.state.lock().unwrap();
            if !state.managed {
                return;
            }
            let remaining = match state.dormant_deadline {
                // No deadline also covers a renewal that is in flight or
                // just failed; fall back to the configured lifetime
                // (0 = no expiry).
                None => state.lifetime,
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now()).as_secs();
                    if left == 0 {
                        tracing::warn!("registration lapsed while disconnected");
                        state.lifetime
                    } else {
                        left
                    }
                }
            };
            (remaining, state.supports)
        };
        tracing::info!(lifetime, "reconnected, recovering managed session");

        if let Err(err) = self.subscribe_all().await {
            tracing::error!(error = %err, "resubscribe after reconnect failed");
        }
        self.correlation.republish();
        match self.manage_request(lifetime, supports).await {
            Ok(Some(ResponseCode::Success)) => {}
            Ok(rc) => tracing::warn!(?rc, "re-manage after reconnect not acknowledged"),
            Err(err) => tracing::error!(error = %err, "re-manage after reconnect failed"),
        }
    }

    fn ensure_managed(&self) -> Result<(), ClientError> {
        if self.state.lock().unwrap().managed {
            Ok(())
        } else {
            Err(ClientError::NotManaged)
        }
    }

    fn clear_observations(&self) {
        let mut model = self.ctx.model.lock().unwrap();
        let mut observations = self.ctx.observations.lock().unwrap();
        let mut listeners = self.ctx.observe_listeners.lock().unwrap();
        for (field, id) in listeners.drain() {
            if let Some(node) = model.tree_mut().resolve_mut(&field) {
                node.remove_listener(id);
            }
        }
        observations.clear();
    }
}
