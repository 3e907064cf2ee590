//! # devsync Protocol
//!
//! Wire protocol definitions and MQTT topic scheme for device management.
//!
//! ## Messages
//!
//! - `RequestEnvelope` / `DmResponse`: the `{d, reqId}` / `{rc, reqId, d}`
//!   JSON envelopes used in both directions
//! - Operation bodies: manage, field arrays, notify, location, diagnostics
//!
//! ## MQTT Topics
//!
//! Agent-published topics live under `iotdevice-1/…`, server-published
//! topics under `iotdm-1/…`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod messages;
pub mod topics;

pub use messages::{
    DiagLogBody, DmResponse, ErrorCodeBody, FieldSpec, FieldsBody, LocationBody, LogSeverity,
    ManageBody, MessageError, RequestEnvelope, ResponseCode, Supports,
};
pub use topics::{ServerRequest, TopicScheme};
