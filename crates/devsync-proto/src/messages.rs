//! Wire messages for device management.
//!
//! Every request travels as a JSON envelope `{"d": <body>, "reqId": <uuid>}`
//! where either member may be absent; responses are `{"rc": <code>,
//! "reqId": <uuid>}` with an optional `d` carrying operation data.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Response codes shared by both directions of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    /// Operation succeeded
    Success,
    /// Operation accepted and started, completion reported later
    Accepted,
    /// Attribute update succeeded
    UpdateSuccess,
    /// Request was malformed
    BadRequest,
    /// Addressed field or resource does not exist
    NotFound,
    /// Handler failed internally
    InternalError,
    /// Operation is not supported by this device
    NotImplemented,
}

impl ResponseCode {
    /// Numeric wire value.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            ResponseCode::Success => 200,
            ResponseCode::Accepted => 202,
            ResponseCode::UpdateSuccess => 204,
            ResponseCode::BadRequest => 400,
            ResponseCode::NotFound => 404,
            ResponseCode::InternalError => 500,
            ResponseCode::NotImplemented => 501,
        }
    }

    /// Decode a numeric wire value.
    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            200 => Some(ResponseCode::Success),
            202 => Some(ResponseCode::Accepted),
            204 => Some(ResponseCode::UpdateSuccess),
            400 => Some(ResponseCode::BadRequest),
            404 => Some(ResponseCode::NotFound),
            500 => Some(ResponseCode::InternalError),
            501 => Some(ResponseCode::NotImplemented),
            _ => None,
        }
    }
}

/// Severity of a diagnostic log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSeverity {
    /// Informational event
    Informational,
    /// Warning
    Warning,
    /// Error
    Error,
}

impl LogSeverity {
    /// Numeric wire value (0 to 2).
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            LogSeverity::Informational => 0,
            LogSeverity::Warning => 1,
            LogSeverity::Error => 2,
        }
    }
}

/// Generic request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Operation body, absent for bodiless requests (e.g. clear log)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
    /// Correlation id, absent for fire-and-forget notifications
    #[serde(rename = "reqId", default, skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
}

impl RequestEnvelope {
    /// Envelope with a body and a fresh correlation id.
    #[must_use]
    pub fn with_body(d: Value) -> Self {
        Self {
            d: Some(d),
            req_id: Some(Uuid::new_v4().to_string()),
        }
    }

    /// Bodiless envelope with a fresh correlation id.
    #[must_use]
    pub fn bodiless() -> Self {
        Self {
            d: None,
            req_id: Some(Uuid::new_v4().to_string()),
        }
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        serde_json::to_vec(self).map_err(|e| MessageError::Serialize(e.to_string()))
    }

    /// Deserialize from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the payload is not a valid envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        serde_json::from_slice(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

/// Response message, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmResponse {
    /// Numeric response code
    pub rc: u16,
    /// Correlation id of the request being answered
    #[serde(rename = "reqId")]
    pub req_id: String,
    /// Human-readable detail, set when `rc` is not a success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Operation data (e.g. current values in an observe response)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

impl DmResponse {
    /// Create a response without data.
    #[must_use]
    pub fn new(rc: ResponseCode, req_id: impl Into<String>) -> Self {
        Self {
            rc: rc.code(),
            req_id: req_id.into(),
            message: None,
            d: None,
        }
    }

    /// Create a response carrying operation data.
    #[must_use]
    pub fn with_data(rc: ResponseCode, req_id: impl Into<String>, d: Value) -> Self {
        Self {
            rc: rc.code(),
            req_id: req_id.into(),
            message: None,
            d: Some(d),
        }
    }

    /// Decode the numeric `rc`, if it is a known code.
    #[must_use]
    pub fn response_code(&self) -> Option<ResponseCode> {
        ResponseCode::from_code(self.rc)
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        serde_json::to_vec(self).map_err(|e| MessageError::Serialize(e.to_string()))
    }

    /// Deserialize from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the payload is not a valid response.
    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        serde_json::from_slice(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

/// Body of a manage request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManageBody {
    /// Registration lifetime in seconds; 0 or absent means no expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<u64>,
    /// Capabilities the agent supports
    pub supports: Supports,
    /// Device info attributes, when published with the registration
    #[serde(rename = "deviceInfo", default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<Value>,
    /// Free-form metadata, when published with the registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Capability flags advertised in a manage request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Supports {
    /// Reboot and factory reset
    #[serde(rename = "deviceActions")]
    pub device_actions: bool,
    /// Firmware download and update
    #[serde(rename = "firmwareActions")]
    pub firmware_actions: bool,
}

/// One entry in a `fields` array.
///
/// Update requests and observe responses carry a value per field; observe
/// and cancel requests name fields only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Dotted resource path
    pub field: String,
    /// Field value, when the operation carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Body shape of update, observe and cancel requests, observe responses
/// and notify messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldsBody {
    /// Addressed fields
    pub fields: Vec<FieldSpec>,
}

impl FieldsBody {
    /// Body carrying a single field and value, as used by notify.
    #[must_use]
    pub fn single(field: impl Into<String>, value: Value) -> Self {
        Self {
            fields: vec![FieldSpec {
                field: field.into(),
                value: Some(value),
            }],
        }
    }
}

/// Body of a location update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationBody {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Elevation in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
    /// When the measurement was taken, RFC 3339 UTC
    #[serde(rename = "measuredDateTime")]
    pub measured_date_time: String,
    /// Accuracy of the position in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

/// Body of an add-diagnostic-log request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagLogBody {
    /// Log message
    pub message: String,
    /// When the event occurred, RFC 3339 UTC
    pub timestamp: String,
    /// Severity, 0 to 2
    pub severity: u8,
    /// Optional binary payload, base64 encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl DiagLogBody {
    /// Build a log entry, base64-encoding the optional binary payload.
    #[must_use]
    pub fn new(
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
        severity: LogSeverity,
        data: Option<&[u8]>,
    ) -> Self {
        Self {
            message: message.into(),
            timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            severity: severity.code(),
            data: data.map(|bytes| BASE64.encode(bytes)),
        }
    }
}

/// Body of an add-error-code request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorCodeBody {
    /// Numeric device error code
    #[serde(rename = "errorCode")]
    pub error_code: i64,
}

/// Errors for message serialization/deserialization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_code_roundtrip() {
        for rc in [
            ResponseCode::Success,
            ResponseCode::Accepted,
            ResponseCode::UpdateSuccess,
            ResponseCode::BadRequest,
            ResponseCode::NotFound,
            ResponseCode::InternalError,
            ResponseCode::NotImplemented,
        ] {
            assert_eq!(ResponseCode::from_code(rc.code()), Some(rc));
        }
        assert_eq!(ResponseCode::from_code(418), None);
    }

    #[test]
    fn manage_envelope_shape() {
        let body = ManageBody {
            lifetime: Some(3600),
            supports: Supports {
                device_actions: true,
                firmware_actions: false,
            },
            device_info: Some(json!({"serialNumber": "10087"})),
            metadata: None,
        };
        let envelope = RequestEnvelope::with_body(serde_json::to_value(&body).unwrap());
        let wire: Value = serde_json::from_slice(&envelope.encode().unwrap()).unwrap();

        assert_eq!(wire["d"]["lifetime"], json!(3600));
        assert_eq!(wire["d"]["supports"]["deviceActions"], json!(true));
        assert_eq!(wire["d"]["deviceInfo"]["serialNumber"], json!("10087"));
        assert!(wire["d"].get("metadata").is_none());
        assert!(wire["reqId"].is_string());
    }

    #[test]
    fn bodiless_envelope_omits_d() {
        let wire: Value =
            serde_json::from_slice(&RequestEnvelope::bodiless().encode().unwrap()).unwrap();
        assert!(wire.get("d").is_none());
        assert!(wire["reqId"].is_string());
    }

    #[test]
    fn response_decode() {
        let resp = DmResponse::decode(br#"{"rc": 200, "reqId": "abc"}"#).unwrap();
        assert_eq!(resp.response_code(), Some(ResponseCode::Success));
        assert_eq!(resp.req_id, "abc");
        assert!(resp.d.is_none());
    }

    #[test]
    fn fields_body_value_optional() {
        let body: FieldsBody =
            serde_json::from_value(json!({"fields": [{"field": "mgmt.firmware"}]})).unwrap();
        assert_eq!(body.fields[0].field, "mgmt.firmware");
        assert!(body.fields[0].value.is_none());
    }

    #[test]
    fn diag_log_encodes_data() {
        let ts = "2024-05-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let body = DiagLogBody::new("memory low", ts, LogSeverity::Warning, Some(b"\x01\x02"));

        assert_eq!(body.severity, 1);
        assert_eq!(body.timestamp, "2024-05-01T12:00:00.000Z");
        assert_eq!(body.data.as_deref(), Some("AQI="));
    }
}
