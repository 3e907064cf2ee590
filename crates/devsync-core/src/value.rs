//! Typed leaf values for resource tree nodes.
//!
//! The management model stores scalars (strings, numbers, dates) and
//! free-form JSON objects (metadata). A single tagged union covers all of
//! them; type-specific behavior lives in free functions rather than a type
//! hierarchy.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// A typed value held by a leaf resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceValue {
    /// UTF-8 string attribute
    String(String),
    /// Numeric attribute (all wire numbers are carried as f64)
    Number(f64),
    /// Timestamp attribute, serialized as RFC 3339 UTC
    Date(DateTime<Utc>),
    /// Free-form JSON object (used for metadata)
    Object(serde_json::Map<String, Value>),
}

impl ResourceValue {
    /// Render the value in its wire (JSON) form.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            ResourceValue::String(s) => Value::String(s.clone()),
            ResourceValue::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(Value::Null, Value::Number),
            ResourceValue::Date(d) => {
                Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            ResourceValue::Object(map) => Value::Object(map.clone()),
        }
    }

    /// Apply a wire value to this slot, keeping the slot's type.
    ///
    /// A JSON `null` (or absent field, which callers encode as `null`) is a
    /// no-op that preserves the prior state, matching the partial-update
    /// semantics of the wire protocol. Returns `true` when the value changed.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::TypeMismatch`] when the incoming JSON cannot be
    /// read as this slot's type.
    pub fn apply(&mut self, incoming: &Value) -> Result<bool, ValueError> {
        if incoming.is_null() {
            return Ok(false);
        }
        let parsed = match self {
            ResourceValue::String(_) => from_json_string(incoming)?,
            ResourceValue::Number(_) => from_json_number(incoming)?,
            ResourceValue::Date(_) => from_json_date(incoming)?,
            ResourceValue::Object(_) => from_json_object(incoming)?,
        };
        if *self == parsed {
            return Ok(false);
        }
        *self = parsed;
        Ok(true)
    }

    /// Infer a typed value from a wire value. Returns `None` for `null`,
    /// arrays, and booleans (the model has no attributes of those shapes).
    #[must_use]
    pub fn infer(incoming: &Value) -> Option<Self> {
        match incoming {
            Value::String(s) => Some(ResourceValue::String(s.clone())),
            Value::Number(n) => n.as_f64().map(ResourceValue::Number),
            Value::Object(map) => Some(ResourceValue::Object(map.clone())),
            _ => None,
        }
    }
}

fn from_json_string(v: &Value) -> Result<ResourceValue, ValueError> {
    v.as_str()
        .map(|s| ResourceValue::String(s.to_string()))
        .ok_or_else(|| ValueError::TypeMismatch {
            expected: "string",
            got: v.clone(),
        })
}

fn from_json_number(v: &Value) -> Result<ResourceValue, ValueError> {
    v.as_f64()
        .map(ResourceValue::Number)
        .ok_or_else(|| ValueError::TypeMismatch {
            expected: "number",
            got: v.clone(),
        })
}

fn from_json_date(v: &Value) -> Result<ResourceValue, ValueError> {
    let s = v.as_str().ok_or_else(|| ValueError::TypeMismatch {
        expected: "RFC 3339 date string",
        got: v.clone(),
    })?;
    let parsed = DateTime::parse_from_rfc3339(s).map_err(|_| ValueError::TypeMismatch {
        expected: "RFC 3339 date string",
        got: v.clone(),
    })?;
    Ok(ResourceValue::Date(parsed.with_timezone(&Utc)))
}

fn from_json_object(v: &Value) -> Result<ResourceValue, ValueError> {
    v.as_object()
        .map(|m| ResourceValue::Object(m.clone()))
        .ok_or_else(|| ValueError::TypeMismatch {
            expected: "object",
            got: v.clone(),
        })
}

/// Errors raised when applying wire values to typed slots.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValueError {
    /// The incoming JSON does not match the slot's type.
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Human-readable name of the expected type
        expected: &'static str,
        /// The offending wire value
        got: Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_is_a_noop() {
        let mut v = ResourceValue::String("1.0.2".to_string());
        assert!(!v.apply(&Value::Null).unwrap());
        assert_eq!(v, ResourceValue::String("1.0.2".to_string()));
    }

    #[test]
    fn string_slot_rejects_number() {
        let mut v = ResourceValue::String("abc".to_string());
        assert!(v.apply(&json!(42)).is_err());
    }

    #[test]
    fn apply_reports_change() {
        let mut v = ResourceValue::Number(1.0);
        assert!(v.apply(&json!(2.5)).unwrap());
        assert!(!v.apply(&json!(2.5)).unwrap());
        assert_eq!(v.to_json(), json!(2.5));
    }

    #[test]
    fn date_roundtrip() {
        let mut v = ResourceValue::Date(Utc::now());
        assert!(v.apply(&json!("2024-01-01T00:00:00.000Z")).unwrap());
        assert_eq!(v.to_json(), json!("2024-01-01T00:00:00.000Z"));
    }

    #[test]
    fn infer_shapes() {
        assert!(matches!(
            ResourceValue::infer(&json!("x")),
            Some(ResourceValue::String(_))
        ));
        assert!(matches!(
            ResourceValue::infer(&json!(1)),
            Some(ResourceValue::Number(_))
        ));
        assert!(ResourceValue::infer(&Value::Null).is_none());
    }
}
