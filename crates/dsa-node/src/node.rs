//! The [`Node`] type: one vertex in the responder's tree.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dsa_path::NodePath;
use dsa_value::{Value, ValueType};

use crate::action::Action;
use crate::editor::Editor;
use crate::permission::{Permission, SerializationMode, Writable};

/// Fires on value-changed, metadata-changed, list-open, subscribe, and
/// unsubscribe.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    ValueChanged(Value),
    MetadataChanged,
    ListOpen,
    Subscribe,
    Unsubscribe,
}

pub type OnWriteHandler = Arc<dyn Fn(&Value) + Send + Sync>;
pub type OnSubscribeHandler = Arc<dyn Fn(bool) + Send + Sync>;
pub type OnEventHandler = Arc<dyn Fn(NodeEvent) + Send + Sync>;

/// One vertex of the responder's node tree, identified by its absolute
/// path.
#[derive(Clone)]
pub struct Node {
    pub(crate) path: NodePath,
    pub profile: String,
    pub display_name: Option<String>,
    pub value_type: ValueType,
    pub enum_values: Option<String>,
    pub permission: Permission,
    pub writable: Writable,
    pub(crate) value: Option<Value>,
    pub(crate) timestamp: DateTime<Utc>,
    pub hidden: bool,
    pub serialization_mode: SerializationMode,
    pub action: Option<Action>,
    pub configs: BTreeMap<String, Value>,
    pub attributes: BTreeMap<String, Value>,
    pub editor: Option<Editor>,
    pub(crate) children: Vec<String>,
    pub on_write: Option<OnWriteHandler>,
    pub on_subscribe: Option<OnSubscribeHandler>,
    pub on_event: Option<OnEventHandler>,
    /// Set when this node's most recent creation happened during startup
    /// deserialization rather than a live builder submission.
    pub(crate) created_via_deserialization: bool,
}

impl Node {
    pub(crate) fn new(path: NodePath, profile: impl Into<String>) -> Self {
        Self {
            path,
            profile: profile.into(),
            display_name: None,
            value_type: ValueType::None,
            enum_values: None,
            permission: Permission::Read,
            writable: Writable::Never,
            value: None,
            timestamp: Utc::now(),
            hidden: false,
            serialization_mode: SerializationMode::None,
            action: None,
            configs: BTreeMap::new(),
            attributes: BTreeMap::new(),
            editor: None,
            children: Vec::new(),
            on_write: None,
            on_subscribe: None,
            on_event: None,
            created_via_deserialization: false,
        }
    }

    /// Constructs a bare node for the serializer's deserialization path.
    /// Attribute setters on the result behave exactly like a freshly-built
    /// node; [`crate::tree::NodeTree::insert_deserialized`] is responsible
    /// for flagging `created_via_deserialization`.
    pub fn new_for_deserialization(path: NodePath, profile: impl Into<String>) -> Self {
        Self::new(path, profile)
    }

    pub fn path(&self) -> &NodePath {
        &self.path
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn is_action(&self) -> bool {
        self.action.is_some()
    }

    pub fn created_via_deserialization(&self) -> bool {
        self.created_via_deserialization
    }

    /// Sets the value and bumps the timestamp monotonically to the current
    /// time, never moving it backwards.
    pub(crate) fn set_value_now(&mut self, value: Value) {
        let now = Utc::now();
        self.timestamp = if now > self.timestamp { now } else { self.timestamp };
        self.value = Some(value);
    }

    /// Sets a node's restored value directly, without bumping the timestamp
    /// to the current time -- the restored value is as of the last snapshot,
    /// not as of this process start.
    pub fn set_value_from_deserialization(&mut self, value: Value) {
        self.value = Some(value);
    }

    pub(crate) fn fire_on_write(&self, value: &Value) {
        if let Some(handler) = &self.on_write {
            handler(value);
        }
    }

    pub(crate) fn fire_on_subscribe(&self, subscribed: bool) {
        if let Some(handler) = &self.on_subscribe {
            handler(subscribed);
        }
    }

    pub(crate) fn fire_on_event(&self, event: NodeEvent) {
        if let Some(handler) = &self.on_event {
            handler(event);
        }
    }
}

/// A read-only snapshot of every attribute of a node, bundled in one call
/// instead of requiring several round trips.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub path: NodePath,
    pub name: String,
    pub profile: String,
    pub serializable: bool,
    pub display_name: Option<String>,
    pub value_type: ValueType,
    pub enum_values: Option<String>,
    pub permission: Permission,
    pub writable: Writable,
    pub value: Option<Value>,
    pub hidden: bool,
    pub is_action: bool,
    pub timestamp: DateTime<Utc>,
    pub configs: BTreeMap<String, Value>,
    pub attributes: BTreeMap<String, Value>,
}

impl From<&Node> for NodeInfo {
    fn from(node: &Node) -> Self {
        NodeInfo {
            path: node.path.clone(),
            name: node.path.name().to_owned(),
            profile: node.profile.clone(),
            serializable: !matches!(node.serialization_mode, SerializationMode::None),
            display_name: node.display_name.clone(),
            value_type: node.value_type,
            enum_values: node.enum_values.clone(),
            permission: node.permission,
            writable: node.writable,
            value: node.value.clone(),
            hidden: node.hidden,
            is_action: node.is_action(),
            timestamp: node.timestamp,
            configs: node.configs.clone(),
            attributes: node.attributes.clone(),
        }
    }
}
