//! [`NodeTree`]: the in-memory tree rooted at `/`.
//!
//! Backed by a flat [`HashMap`] keyed by [`NodePath`] plus a per-node
//! ordered child-name list, so lookup, insertion, and child enumeration are
//! all O(1).

use std::collections::HashMap;

use dsa_error::{Error, ErrorKind};
use dsa_path::{NodePath, PathPattern};

use crate::node::{Node, NodeEvent, NodeInfo};

/// Fires once per node whose absolute path matches a registered
/// [`PathPattern`]. `bool` distinguishes
/// normal creation (`false`) from startup deserialization (`true`).
pub type CreationCallback = std::sync::Arc<dyn Fn(&NodePath, bool) + Send + Sync>;

/// The in-memory responder node tree.
#[derive(Clone)]
pub struct NodeTree {
    nodes: HashMap<NodePath, Node>,
    patterns: HashMap<String, (PathPattern, CreationCallback)>,
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTree {
    /// Constructs a tree containing only the root node.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(NodePath::root(), Node::new(NodePath::root(), "node"));
        Self {
            nodes,
            patterns: HashMap::new(),
        }
    }

    pub fn exists(&self, path: &NodePath) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn get(&self, path: &NodePath) -> Option<&Node> {
        self.nodes.get(path)
    }

    pub fn get_mut(&mut self, path: &NodePath) -> Option<&mut Node> {
        self.nodes.get_mut(path)
    }

    pub fn node_info(&self, path: &NodePath) -> Option<NodeInfo> {
        self.nodes.get(path).map(NodeInfo::from)
    }

    /// Registers (or replaces) the creation callback fired for every node
    /// whose absolute path matches `pattern`. A pattern that matches only
    /// the root has no effect.
    pub fn register_creation_callback(&mut self, pattern: PathPattern, callback: CreationCallback) {
        if pattern.matches_only_root() {
            return;
        }
        let key = format!("{pattern:?}");
        self.patterns.insert(key, (pattern, callback));
    }

    fn fire_creation_callbacks(&self, path: &NodePath, is_deserialization: bool) {
        for (pattern, callback) in self.patterns.values() {
            if pattern.matches(path) {
                callback(path, is_deserialization);
            }
        }
    }

    /// Inserts a node produced by [`crate::builder::NodeBuilder::submit`].
    /// Requires the parent to already exist. Fires any matching
    /// creation callback with `is_deserialization = false`.
    pub(crate) fn insert_built(&mut self, node: Node) {
        self.insert_internal(node, false);
    }

    /// Inserts a node recovered from `nodes.json` at startup, flagging its
    /// creation context so pattern callbacks can distinguish it.
    pub fn insert_deserialized(&mut self, mut node: Node) {
        node.created_via_deserialization = true;
        self.insert_internal(node, true);
    }

    fn insert_internal(&mut self, node: Node, is_deserialization: bool) {
        let path = node.path.clone();
        let parent_path = path.parent();
        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            if !parent.children.iter().any(|c| c == path.name()) {
                parent.children.push(path.name().to_owned());
            }
        }
        self.nodes.insert(path.clone(), node);
        self.fire_creation_callbacks(&path, is_deserialization);
    }

    /// Returns `path` itself plus every descendant currently in the tree,
    /// in no particular order. Empty if `path` doesn't exist. Meant to be
    /// called before [`NodeTree::remove`] so a caller can notify
    /// subscribers on the whole subtree before it disappears.
    pub fn subtree_paths(&self, path: &NodePath) -> Vec<NodePath> {
        if !self.exists(path) {
            return Vec::new();
        }
        self.nodes
            .keys()
            .filter(|p| *p == path || path.is_ancestor_of(p))
            .cloned()
            .collect()
    }

    /// Removes `path` and its entire subtree.
    pub fn remove(&mut self, path: &NodePath) -> Result<(), Error> {
        if !self.exists(path) {
            return Err(Error::new(ErrorKind::PathNotFound));
        }
        let descendants: Vec<NodePath> = self
            .nodes
            .keys()
            .filter(|p| path.is_ancestor_of(p) && *p != path)
            .cloned()
            .collect();
        for descendant in descendants {
            self.nodes.remove(&descendant);
        }
        self.nodes.remove(path);
        let parent_path = path.parent();
        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            parent.children.retain(|c| c != path.name());
        }
        Ok(())
    }

    /// Sets a node's value, bumping its timestamp, and fires the
    /// `value-changed` event handler.
    pub fn set_value(&mut self, path: &NodePath, value: dsa_value::Value) -> Result<(), Error> {
        let node = self
            .nodes
            .get_mut(path)
            .ok_or_else(|| Error::new(ErrorKind::PathNotFound))?;
        if node.value_type == dsa_value::ValueType::None {
            return Err(Error::new(ErrorKind::NotAValueNode));
        }
        node.set_value_now(value.clone());
        node.fire_on_event(NodeEvent::ValueChanged(value));
        Ok(())
    }

    /// Creates a node if missing, or sets its value and timestamp if
    /// present.
    pub fn create_or_set(
        &mut self,
        path: NodePath,
        profile: impl Into<String>,
        value_type: dsa_value::ValueType,
        value: dsa_value::Value,
        permission: crate::permission::Permission,
        writable: crate::permission::Writable,
        enum_values: Option<String>,
        serialization_mode: crate::permission::SerializationMode,
    ) -> Result<NodePath, Error> {
        if self.exists(&path) {
            self.set_value(&path, value)?;
            return Ok(path);
        }
        let parent_path = path.parent();
        if !self.exists(&parent_path) {
            return Err(Error::new(ErrorKind::PathNotFound));
        }
        let mut node = Node::new(path.clone(), profile);
        node.value_type = value_type;
        node.permission = permission;
        node.writable = writable;
        node.enum_values = enum_values;
        node.serialization_mode = serialization_mode;
        node.set_value_now(value);
        self.insert_built(node);
        Ok(path)
    }

    /// Remote-peer write entry point: validates writability, sets the
    /// value, and fires the node's on-write handler with the new value.
    pub fn remote_set(&mut self, path: &NodePath, value: dsa_value::Value) -> Result<(), Error> {
        let node = self
            .nodes
            .get(path)
            .ok_or_else(|| Error::new(ErrorKind::PathNotFound))?;
        if node.writable == crate::permission::Writable::Never {
            return Err(Error::new(ErrorKind::NodeIsNotWritable));
        }
        if node.value_type == dsa_value::ValueType::None {
            return Err(Error::new(ErrorKind::NotAValueNode));
        }
        self.set_value(path, value.clone())?;
        if let Some(node) = self.nodes.get(path) {
            node.fire_on_write(&value);
        }
        Ok(())
    }

    /// Iterates every node in the tree (unordered), for the serializer and
    /// test tooling.
    pub fn iter(&self) -> impl Iterator<Item = (&NodePath, &Node)> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::NodeBuilder;
    use dsa_value::{Value, ValueType};

    #[test]
    fn remove_drops_entire_subtree() {
        let mut tree = NodeTree::new();
        let mut builder = NodeBuilder::new(NodePath::root());
        builder.make_node("a");
        builder.submit(&mut tree);
        let mut builder = NodeBuilder::new(NodePath::parse("/a"));
        builder.make_node("b");
        builder.submit(&mut tree);

        tree.remove(&NodePath::parse("/a")).unwrap();
        assert!(!tree.exists(&NodePath::parse("/a")));
        assert!(!tree.exists(&NodePath::parse("/a/b")));
    }

    #[test]
    fn set_value_on_none_type_fails() {
        let mut tree = NodeTree::new();
        let mut builder = NodeBuilder::new(NodePath::root());
        builder.make_node("a");
        builder.submit(&mut tree);
        let err = tree
            .set_value(&NodePath::parse("/a"), Value::Int(1))
            .unwrap_err();
        assert_eq!(err.kind(), dsa_error::ErrorKind::NotAValueNode);
    }

    #[test]
    fn create_or_set_creates_then_updates() {
        let mut tree = NodeTree::new();
        let path = NodePath::parse("/counter");
        tree.create_or_set(
            path.clone(),
            "node",
            ValueType::Int,
            Value::Int(1),
            crate::permission::Permission::Read,
            crate::permission::Writable::Never,
            None,
            crate::permission::SerializationMode::Everything,
        )
        .unwrap();
        assert_eq!(tree.get(&path).unwrap().value(), Some(&Value::Int(1)));
        tree.create_or_set(
            path.clone(),
            "node",
            ValueType::Int,
            Value::Int(2),
            crate::permission::Permission::Read,
            crate::permission::Writable::Never,
            None,
            crate::permission::SerializationMode::Everything,
        )
        .unwrap();
        assert_eq!(tree.get(&path).unwrap().value(), Some(&Value::Int(2)));
    }

    #[test]
    fn creation_callback_fires_for_matching_pattern() {
        let mut tree = NodeTree::new();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        tree.register_creation_callback(
            PathPattern::parse("/devices/*"),
            std::sync::Arc::new(move |path, is_deser| {
                seen2.lock().unwrap().push((path.clone(), is_deser));
            }),
        );
        let mut builder = NodeBuilder::new(NodePath::root());
        builder.make_node("devices");
        builder.submit(&mut tree);
        let mut builder = NodeBuilder::new(NodePath::parse("/devices"));
        builder.make_node("d1");
        builder.submit(&mut tree);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, NodePath::parse("/devices/d1"));
        assert!(!seen[0].1);
    }

    #[test]
    fn remote_set_on_non_writable_fails() {
        let mut tree = NodeTree::new();
        let mut builder = NodeBuilder::new(NodePath::root());
        builder
            .make_node("ro")
            .value_type(ValueType::Int)
            .value(Value::Int(1));
        builder.submit(&mut tree);
        let err = tree
            .remote_set(&NodePath::parse("/ro"), Value::Int(2))
            .unwrap_err();
        assert_eq!(err.kind(), dsa_error::ErrorKind::NodeIsNotWritable);
    }
}
