//! Hierarchical resource tree with change listeners.
//!
//! Every managed session owns one tree. Nodes are addressed by their
//! canonical dotted path (e.g. `mgmt.firmware.state`), fixed when the node
//! is attached. Listeners come in two scopes: internal listeners feed the
//! observe/notify machinery, external listeners belong to application code,
//! so observe-triggered traffic never reenters application callbacks.

use crate::value::{ResourceValue, ValueError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Name of the synthetic root node. Never part of a canonical path.
pub const ROOT_RESOURCE_NAME: &str = "root";

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Which listener list a callback is registered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerScope {
    /// Library-internal listeners (observe/notify engine)
    Internal,
    /// Application listeners
    External,
}

/// Handle returned by [`ResourceNode::on_change`], used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A change callback. Receives the node's canonical path and its
/// materialized wire value.
pub type ChangeCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// A named node in the resource tree.
///
/// Leaf nodes hold a [`ResourceValue`]; composite nodes materialize their
/// value from their children.
pub struct ResourceNode {
    name: String,
    path: String,
    value: Option<ResourceValue>,
    children: BTreeMap<String, ResourceNode>,
    internal: Vec<(ListenerId, ChangeCallback)>,
    external: Vec<(ListenerId, ChangeCallback)>,
}

impl std::fmt::Debug for ResourceNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceNode")
            .field("path", &self.path)
            .field("value", &self.value)
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ResourceNode {
    /// Create an empty composite node.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: name.clone(),
            name,
            value: None,
            children: BTreeMap::new(),
            internal: Vec::new(),
            external: Vec::new(),
        }
    }

    /// Create a leaf node holding `value`.
    #[must_use]
    pub fn leaf(name: impl Into<String>, value: ResourceValue) -> Self {
        let mut node = Self::new(name);
        node.value = Some(value);
        node
    }

    /// The node's name, unique among its siblings.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The canonical dot-joined path from the root.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Attach `child` under this node, replacing any same-named sibling.
    ///
    /// Canonical paths of the child and all of its descendants are rewritten
    /// here; paths never change afterwards.
    pub fn attach(&mut self, mut child: ResourceNode) {
        let prefix = if self.path == ROOT_RESOURCE_NAME {
            String::new()
        } else {
            format!("{}.", self.path)
        };
        child.rewrite_paths(&prefix);
        self.children.insert(child.name.clone(), child);
    }

    fn rewrite_paths(&mut self, prefix: &str) {
        self.path = format!("{prefix}{}", self.name);
        let child_prefix = format!("{}.", self.path);
        for child in self.children.values_mut() {
            child.rewrite_paths(&child_prefix);
        }
    }

    /// Look up a direct child by name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&ResourceNode> {
        self.children.get(name)
    }

    /// Detach a direct child, returning it. Used for nullable attributes
    /// (e.g. clearing the firmware verifier); absence materializes as the
    /// field missing from the wire value.
    pub fn detach(&mut self, name: &str) -> Option<ResourceNode> {
        self.children.remove(name)
    }

    /// Look up a direct child by name, mutably.
    pub fn child_mut(&mut self, name: &str) -> Option<&mut ResourceNode> {
        self.children.get_mut(name)
    }

    /// Resolve a dotted path relative to this node.
    #[must_use]
    pub fn resolve(&self, dotted: &str) -> Option<&ResourceNode> {
        let mut node = self;
        for part in dotted.split('.') {
            node = node.children.get(part)?;
        }
        Some(node)
    }

    /// Resolve a dotted path relative to this node, mutably.
    pub fn resolve_mut(&mut self, dotted: &str) -> Option<&mut ResourceNode> {
        let mut node = self;
        for part in dotted.split('.') {
            node = node.children.get_mut(part)?;
        }
        Some(node)
    }

    /// Materialize this node's wire value: the leaf value, or an object
    /// assembled from the children.
    #[must_use]
    pub fn to_json(&self) -> Value {
        if let Some(value) = &self.value {
            return value.to_json();
        }
        let mut map = serde_json::Map::new();
        for (name, child) in &self.children {
            map.insert(name.clone(), child.to_json());
        }
        Value::Object(map)
    }

    /// Apply a JSON fragment to this subtree.
    ///
    /// Object fragments are walked key by key: keys naming an existing child
    /// recurse, unknown keys holding a usable scalar/object grow a new leaf,
    /// `null` values are no-ops. Scalar fragments apply to the leaf value.
    /// When `fire` is set and anything changed, internal listeners of this
    /// node fire synchronously, once, after the whole fragment is applied.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] when a fragment value does not match the
    /// target slot's type. Earlier keys of the fragment stay applied.
    pub fn update(&mut self, fragment: &Value, fire: bool) -> Result<bool, ValueError> {
        let changed = self.apply_fragment(fragment)?;
        if changed && fire {
            self.fire_internal();
        }
        Ok(changed)
    }

    fn apply_fragment(&mut self, fragment: &Value) -> Result<bool, ValueError> {
        // Leaf slots (including object-valued metadata) take the fragment
        // directly; composites walk it key by key.
        if let Some(value) = &mut self.value {
            return value.apply(fragment);
        }
        let Some(entries) = fragment.as_object() else {
            if fragment.is_null() {
                return Ok(false);
            }
            return Err(ValueError::TypeMismatch {
                expected: "object",
                got: fragment.clone(),
            });
        };
        let mut changed = false;
        for (key, incoming) in entries {
            if let Some(child) = self.children.get_mut(key) {
                changed |= child.apply_fragment(incoming)?;
            } else if let Some(value) = ResourceValue::infer(incoming) {
                self.attach(ResourceNode::leaf(key.clone(), value));
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Register a change callback. Callbacks fire synchronously in
    /// registration order.
    pub fn on_change(&mut self, scope: ListenerScope, callback: ChangeCallback) -> ListenerId {
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        match scope {
            ListenerScope::Internal => self.internal.push((id, callback)),
            ListenerScope::External => self.external.push((id, callback)),
        }
        id
    }

    /// Remove a previously registered callback. Returns `false` when the
    /// handle is unknown (already removed).
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.internal.len() + self.external.len();
        self.internal.retain(|(lid, _)| *lid != id);
        self.external.retain(|(lid, _)| *lid != id);
        before != self.internal.len() + self.external.len()
    }

    /// Fire internal listeners with the node's current value.
    pub fn fire_internal(&self) {
        let value = self.to_json();
        for (_, callback) in &self.internal {
            callback(&self.path, &value);
        }
    }

    /// Fire external (application) listeners with the node's current value.
    pub fn notify_external_listeners(&self) {
        let value = self.to_json();
        for (_, callback) in &self.external {
            callback(&self.path, &value);
        }
    }
}

/// The per-session resource tree.
///
/// A thin wrapper around the synthetic root node; top-level children are the
/// management-model objects (`deviceInfo`, `location`, `metadata`, `mgmt`).
#[derive(Debug)]
pub struct ResourceTree {
    root: ResourceNode,
}

impl Default for ResourceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceTree {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: ResourceNode::new(ROOT_RESOURCE_NAME),
        }
    }

    /// Attach a top-level node.
    pub fn add_child(&mut self, node: ResourceNode) {
        self.root.attach(node);
    }

    /// Resolve a canonical dotted path.
    #[must_use]
    pub fn resolve(&self, dotted: &str) -> Option<&ResourceNode> {
        self.root.resolve(dotted)
    }

    /// Resolve a canonical dotted path, mutably.
    pub fn resolve_mut(&mut self, dotted: &str) -> Option<&mut ResourceNode> {
        self.root.resolve_mut(dotted)
    }

    /// Apply a fragment to the node at `dotted`. Returns `None` when the
    /// path does not resolve.
    ///
    /// # Errors
    ///
    /// Propagates [`ValueError`] from the node update.
    pub fn update(
        &mut self,
        dotted: &str,
        fragment: &Value,
        fire: bool,
    ) -> Option<Result<bool, ValueError>> {
        self.root
            .resolve_mut(dotted)
            .map(|node| node.update(fragment, fire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn firmware_subtree() -> ResourceNode {
        let mut mgmt = ResourceNode::new("mgmt");
        let mut firmware = ResourceNode::new("firmware");
        firmware.attach(ResourceNode::leaf(
            "version",
            ResourceValue::String("1.0".to_string()),
        ));
        firmware.attach(ResourceNode::leaf("state", ResourceValue::Number(0.0)));
        mgmt.attach(firmware);
        mgmt
    }

    #[test]
    fn canonical_paths_follow_attachment() {
        let mut tree = ResourceTree::new();
        tree.add_child(firmware_subtree());

        let node = tree.resolve("mgmt.firmware.version").unwrap();
        assert_eq!(node.path(), "mgmt.firmware.version");
        assert_eq!(tree.resolve("mgmt.firmware").unwrap().path(), "mgmt.firmware");
        assert!(tree.resolve("mgmt.bogus").is_none());
    }

    #[test]
    fn composite_value_materializes_children() {
        let mut tree = ResourceTree::new();
        tree.add_child(firmware_subtree());

        let value = tree.resolve("mgmt.firmware").unwrap().to_json();
        assert_eq!(value, json!({"state": 0.0, "version": "1.0"}));
    }

    #[test]
    fn update_walks_fragment_and_skips_nulls() {
        let mut tree = ResourceTree::new();
        tree.add_child(firmware_subtree());

        let changed = tree
            .update(
                "mgmt.firmware",
                &json!({"version": "2.0", "state": null}),
                false,
            )
            .unwrap()
            .unwrap();
        assert!(changed);

        let value = tree.resolve("mgmt.firmware").unwrap().to_json();
        assert_eq!(value, json!({"state": 0.0, "version": "2.0"}));
    }

    #[test]
    fn update_grows_unknown_scalar_keys() {
        let mut tree = ResourceTree::new();
        tree.add_child(ResourceNode::new("location"));

        tree.update("location", &json!({"latitude": 48.1}), false)
            .unwrap()
            .unwrap();
        assert_eq!(
            tree.resolve("location.latitude").unwrap().to_json(),
            json!(48.1)
        );
        assert_eq!(
            tree.resolve("location.latitude").unwrap().path(),
            "location.latitude"
        );
    }

    #[test]
    fn internal_listeners_fire_once_per_update() {
        let mut tree = ResourceTree::new();
        tree.add_child(firmware_subtree());

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let node = tree.resolve_mut("mgmt.firmware").unwrap();
        node.on_change(
            ListenerScope::Internal,
            Arc::new(move |path, _| sink.lock().unwrap().push(path.to_string())),
        );

        tree.update(
            "mgmt.firmware",
            &json!({"version": "3.0", "state": 1.0}),
            true,
        )
        .unwrap()
        .unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), ["mgmt.firmware"]);

        // No change, no event.
        tree.update("mgmt.firmware", &json!({"version": "3.0"}), true)
            .unwrap()
            .unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn external_listeners_are_separate() {
        let mut tree = ResourceTree::new();
        tree.add_child(firmware_subtree());

        let internal_hits = Arc::new(Mutex::new(0usize));
        let external_hits = Arc::new(Mutex::new(0usize));
        let node = tree.resolve_mut("mgmt.firmware").unwrap();
        {
            let hits = Arc::clone(&internal_hits);
            node.on_change(
                ListenerScope::Internal,
                Arc::new(move |_, _| *hits.lock().unwrap() += 1),
            );
        }
        {
            let hits = Arc::clone(&external_hits);
            node.on_change(
                ListenerScope::External,
                Arc::new(move |_, _| *hits.lock().unwrap() += 1),
            );
        }

        tree.update("mgmt.firmware", &json!({"version": "4.0"}), true)
            .unwrap()
            .unwrap();
        assert_eq!(*internal_hits.lock().unwrap(), 1);
        assert_eq!(*external_hits.lock().unwrap(), 0);

        tree.resolve("mgmt.firmware")
            .unwrap()
            .notify_external_listeners();
        assert_eq!(*external_hits.lock().unwrap(), 1);
    }

    #[test]
    fn removed_listener_stops_firing() {
        let mut node = ResourceNode::leaf("state", ResourceValue::Number(0.0));
        let hits = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&hits);
        let id = node.on_change(
            ListenerScope::Internal,
            Arc::new(move |_, _| *sink.lock().unwrap() += 1),
        );

        node.update(&json!(1.0), true).unwrap();
        assert!(node.remove_listener(id));
        assert!(!node.remove_listener(id));
        node.update(&json!(2.0), true).unwrap();
        assert_eq!(*hits.lock().unwrap(), 1);
    }
}
