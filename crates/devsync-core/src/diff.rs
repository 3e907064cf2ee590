//! Observe/notify diffing.
//!
//! The server observes fields by name; the client pushes changes instead of
//! being polled. [`ObservationSet`] caches the last value reported for every
//! observed field and answers "what, if anything, should be notified" for a
//! new value. The cache tracks the last *notified* state, not the
//! resource's live state, so a field that changed and was already reported
//! is not sent again.

use serde_json::Value;
use std::collections::HashMap;

/// Cache of observed fields and their last-notified values.
#[derive(Debug, Default)]
pub struct ObservationSet {
    snapshots: HashMap<String, Value>,
}

impl ObservationSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start observing `field`, seeding the cache with the value that was
    /// reported in the observe response.
    pub fn observe(&mut self, field: impl Into<String>, snapshot: Value) {
        self.snapshots.insert(field.into(), snapshot);
    }

    /// Whether `field` currently has an observer.
    #[must_use]
    pub fn is_observed(&self, field: &str) -> bool {
        self.snapshots.contains_key(field)
    }

    /// Decide what to notify for a new value of `field`.
    ///
    /// Returns `None` when the field is not observed or nothing changed
    /// relative to the last notification. For scalar values the whole new
    /// value is returned on inequality. For object values only the changed
    /// fields are returned, and the cache is advanced to the notified state
    /// so the next diff is relative to it.
    pub fn diff(&mut self, field: &str, new_value: &Value) -> Option<Value> {
        let cached = self.snapshots.get_mut(field)?;

        if !cached.is_object() {
            if cached == new_value {
                return None;
            }
            *cached = new_value.clone();
            return Some(new_value.clone());
        }

        let previous = cached.as_object_mut()?;
        let mut changed = serde_json::Map::new();
        for (key, old) in previous.iter_mut() {
            let new = new_value.get(key).cloned().unwrap_or(Value::Null);
            if *old != new {
                changed.insert(key.clone(), new.clone());
                *old = new;
            }
        }
        if changed.is_empty() {
            None
        } else {
            Some(Value::Object(changed))
        }
    }

    /// Stop observing the given fields and drop their cached snapshots.
    /// Unknown fields are ignored; cancel is idempotent.
    pub fn cancel<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for field in fields {
            self.snapshots.remove(field.as_ref());
        }
    }

    /// Drop every observation.
    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_diff_on_change_only() {
        let mut set = ObservationSet::new();
        set.observe("location.latitude", json!(48.1));

        assert_eq!(set.diff("location.latitude", &json!(48.1)), None);
        assert_eq!(
            set.diff("location.latitude", &json!(48.2)),
            Some(json!(48.2))
        );
        // Reported once; identical value again stays quiet.
        assert_eq!(set.diff("location.latitude", &json!(48.2)), None);
    }

    #[test]
    fn object_diff_reports_only_changed_fields() {
        let mut set = ObservationSet::new();
        set.observe(
            "mgmt.firmware",
            json!({"state": 0.0, "version": "1.0", "url": "http://x"}),
        );

        let delta = set
            .diff(
                "mgmt.firmware",
                &json!({"state": 1.0, "version": "1.0", "url": "http://x"}),
            )
            .unwrap();
        assert_eq!(delta, json!({"state": 1.0}));
    }

    #[test]
    fn identical_object_produces_no_notification() {
        let mut set = ObservationSet::new();
        set.observe("mgmt.firmware", json!({"state": 0.0}));
        assert_eq!(set.diff("mgmt.firmware", &json!({"state": 0.0})), None);
    }

    #[test]
    fn cache_advances_to_notified_state() {
        let mut set = ObservationSet::new();
        set.observe("mgmt.firmware", json!({"state": 0.0, "version": "1.0"}));

        assert!(set
            .diff("mgmt.firmware", &json!({"state": 2.0, "version": "1.0"}))
            .is_some());
        // The state change was already reported; only the version is new.
        let delta = set
            .diff("mgmt.firmware", &json!({"state": 2.0, "version": "2.0"}))
            .unwrap();
        assert_eq!(delta, json!({"version": "2.0"}));
    }

    #[test]
    fn removed_key_diffs_to_null() {
        let mut set = ObservationSet::new();
        set.observe("mgmt.firmware", json!({"verifier": "sha256:abc"}));
        let delta = set.diff("mgmt.firmware", &json!({})).unwrap();
        assert_eq!(delta, json!({"verifier": null}));
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut set = ObservationSet::new();
        set.observe("a", json!(1));

        set.cancel(["a", "never-observed"]);
        set.cancel(["a"]);
        assert!(!set.is_observed("a"));
        // A canceled field stops generating notifications immediately.
        assert_eq!(set.diff("a", &json!(2)), None);
    }

    #[test]
    fn unobserved_field_never_notifies() {
        let mut set = ObservationSet::new();
        assert_eq!(set.diff("x", &json!(1)), None);
    }
}
