//! [`NodeBuilder`]: batch node creation under a single parent path.

use std::collections::BTreeMap;

use dsa_error::{Error, ErrorKind};
use dsa_path::{validate_name, NodePath};
use dsa_value::{Value, ValueType};

use crate::action::Action;
use crate::editor::Editor;
use crate::node::Node;
use crate::permission::{Permission, SerializationMode, Writable};
use crate::tree::NodeTree;

/// One pending node description inside a [`NodeBuilder`] batch.
#[derive(Clone)]
struct NodeDescription {
    name: String,
    profile: String,
    display_name: Option<String>,
    value_type: ValueType,
    enum_values: Option<String>,
    permission: Permission,
    writable: Writable,
    value: Option<Value>,
    hidden: bool,
    serialization_mode: SerializationMode,
    action: Option<Action>,
    configs: BTreeMap<String, Value>,
    attributes: BTreeMap<String, Value>,
    editor: Option<Editor>,
    on_write: Option<crate::node::OnWriteHandler>,
}

impl NodeDescription {
    fn new(name: String, profile: String) -> Self {
        Self {
            name,
            profile,
            display_name: None,
            value_type: ValueType::None,
            enum_values: None,
            permission: Permission::Read,
            writable: Writable::Never,
            value: None,
            hidden: false,
            serialization_mode: SerializationMode::None,
            action: None,
            configs: BTreeMap::new(),
            attributes: BTreeMap::new(),
            editor: None,
            on_write: None,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        validate_name(&self.name)?;
        if self.enum_values.is_some() && self.value_type == ValueType::None {
            return Err(Error::with_detail(
                ErrorKind::NoNodeDefinedYet,
                format!(
                    "enum list set on node {:?} before a value type was set",
                    self.name
                ),
            ));
        }
        if self.value.is_some() && self.value_type == ValueType::None {
            return Err(Error::with_detail(
                ErrorKind::NotAValueNode,
                format!(
                    "value set on node {:?} before a value type was set",
                    self.name
                ),
            ));
        }
        if self.on_write.is_some() && self.writable == Writable::Never {
            return Err(Error::with_detail(
                ErrorKind::NodeIsNotWritable,
                format!(
                    "on-write callback attached to node {:?} with writable=never",
                    self.name
                ),
            ));
        }
        if let Some(editor) = self.editor {
            if editor.value_type() != self.value_type {
                return Err(Error::with_detail(
                    ErrorKind::InvalidEditorType,
                    format!(
                        "editor {} declares {} but node {:?} is {}",
                        editor.name(),
                        editor.value_type(),
                        self.name,
                        self.value_type
                    ),
                ));
            }
            if !editor.allowed_on_value_node() {
                return Err(Error::with_detail(
                    ErrorKind::EditorTypeNotAllowed,
                    format!("editor {} is not allowed directly on a value node", editor.name()),
                ));
            }
        }
        if self.writable != Writable::Never && self.value_type == ValueType::None {
            return Err(Error::with_detail(
                ErrorKind::NotAValueNode,
                format!(
                    "node {:?} declared writable without a value type",
                    self.name
                ),
            ));
        }
        if let Some(action) = &self.action {
            action.validate_permission()?;
        }
        Ok(())
    }
}

/// Collects an ordered batch of node descriptions under a single parent
/// path and submits them atomically.
///
/// `make_node` begins a new description; every subsequent setter call
/// applies to the latest description until the next `make_node`. Calling a
/// setter before any `make_node` is a [`dsa_error::ErrorKind::NoNodeDefinedYet`]
/// error, surfaced when [`NodeBuilder::submit`] runs.
pub struct NodeBuilder {
    parent: NodePath,
    descriptions: Vec<NodeDescription>,
    pending_error: Option<Error>,
}

/// The outcome of submitting a [`NodeBuilder`] batch.
#[derive(Debug, Default)]
pub struct BuilderSubmitResult {
    /// Paths actually created by this submission (nodes that already
    /// existed are skipped, not reported as an error).
    pub created: Vec<NodePath>,
    /// The aggregate validation/submission error, if any. When present,
    /// no node in this batch was created.
    pub error: Option<Error>,
}

impl NodeBuilder {
    pub fn new(parent: impl Into<NodePath>) -> Self {
        Self {
            parent: parent.into(),
            descriptions: Vec::new(),
            pending_error: None,
        }
    }

    /// Begins a new node description named `name`, with the default
    /// profile `"node"`.
    pub fn make_node(&mut self, name: impl Into<String>) -> &mut Self {
        self.descriptions
            .push(NodeDescription::new(name.into(), "node".to_owned()));
        self
    }

    /// Begins a new node description with an explicit profile.
    pub fn make_node_with_profile(&mut self, name: impl Into<String>, profile: impl Into<String>) -> &mut Self {
        self.descriptions
            .push(NodeDescription::new(name.into(), profile.into()));
        self
    }

    fn current(&mut self) -> Result<&mut NodeDescription, Error> {
        if self.pending_error.is_some() {
            // Once an error has been recorded, keep collecting calls inert
            // so the host's fluent chain doesn't panic mid-batch.
            return Err(self.pending_error.clone().unwrap());
        }
        match self.descriptions.last_mut() {
            Some(desc) => Ok(desc),
            None => {
                let err = Error::new(ErrorKind::NoNodeDefinedYet);
                self.pending_error = Some(err.clone());
                Err(err)
            }
        }
    }

    fn apply(&mut self, f: impl FnOnce(&mut NodeDescription)) -> &mut Self {
        if let Ok(desc) = self.current() {
            f(desc);
        }
        self
    }

    pub fn display_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.apply(|d| d.display_name = Some(name.into()))
    }

    pub fn value_type(&mut self, value_type: ValueType) -> &mut Self {
        self.apply(|d| d.value_type = value_type)
    }

    pub fn enum_values(&mut self, values: impl Into<String>) -> &mut Self {
        let values = values.into();
        if let Ok(desc) = self.current() {
            if desc.value_type == ValueType::None {
                self.pending_error = Some(Error::with_detail(
                    ErrorKind::NoNodeDefinedYet,
                    "enum_values set before a value type",
                ));
                return self;
            }
            desc.enum_values = Some(values);
        }
        self
    }

    pub fn permission(&mut self, permission: Permission) -> &mut Self {
        self.apply(|d| d.permission = permission)
    }

    pub fn writable(&mut self, writable: Writable) -> &mut Self {
        self.apply(|d| d.writable = writable)
    }

    pub fn value(&mut self, value: Value) -> &mut Self {
        self.apply(|d| d.value = Some(value))
    }

    pub fn hidden(&mut self, hidden: bool) -> &mut Self {
        self.apply(|d| d.hidden = hidden)
    }

    pub fn serialization_mode(&mut self, mode: SerializationMode) -> &mut Self {
        self.apply(|d| d.serialization_mode = mode)
    }

    pub fn action(&mut self, action: Action) -> &mut Self {
        self.apply(|d| d.action = Some(action))
    }

    pub fn editor(&mut self, editor: Editor) -> &mut Self {
        self.apply(|d| d.editor = Some(editor))
    }

    pub fn on_write(&mut self, handler: crate::node::OnWriteHandler) -> &mut Self {
        self.apply(|d| d.on_write = Some(handler))
    }

    pub fn config(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.apply(|d| {
            d.configs.insert(key.into(), value);
        })
    }

    pub fn attribute(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.apply(|d| {
            d.attributes.insert(key.into(), value);
        })
    }

    /// Validates and atomically creates every description that does not
    /// already exist in `tree`. If any description fails validation, no
    /// node in the batch is created and the error is returned alongside an
    /// empty `created` list.
    pub fn submit(self, tree: &mut NodeTree) -> BuilderSubmitResult {
        if let Some(error) = self.pending_error {
            return BuilderSubmitResult {
                created: Vec::new(),
                error: Some(error),
            };
        }
        if !tree.exists(&self.parent) {
            return BuilderSubmitResult {
                created: Vec::new(),
                error: Some(Error::with_detail(
                    ErrorKind::PathNotFound,
                    format!("parent path {} does not exist", self.parent),
                )),
            };
        }
        for desc in &self.descriptions {
            if let Err(error) = desc.validate() {
                return BuilderSubmitResult {
                    created: Vec::new(),
                    error: Some(error),
                };
            }
        }

        let mut created = Vec::new();
        for desc in self.descriptions {
            let path = self.parent.join(&desc.name);
            if tree.exists(&path) {
                continue;
            }
            let mut node = Node::new(path.clone(), desc.profile);
            node.display_name = desc.display_name;
            node.value_type = desc.value_type;
            node.enum_values = desc.enum_values;
            node.permission = desc.permission;
            node.writable = desc.writable;
            node.hidden = desc.hidden;
            node.serialization_mode = desc.serialization_mode;
            node.action = desc.action;
            node.configs = desc.configs;
            node.attributes = desc.attributes;
            node.editor = desc.editor;
            node.on_write = desc.on_write;
            if let Some(value) = desc.value {
                node.set_value_now(value);
            }
            tree.insert_built(node);
            created.push(path);
        }
        BuilderSubmitResult {
            created,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_creates_described_nodes() {
        let mut tree = NodeTree::new();
        let mut builder = NodeBuilder::new(NodePath::root());
        builder
            .make_node("temperature")
            .value_type(ValueType::Number)
            .value(Value::Float(21.5))
            .writable(Writable::Write);
        let result = builder.submit(&mut tree);
        assert!(result.error.is_none());
        assert_eq!(result.created, vec![NodePath::parse("/temperature")]);
        let node = tree.get(&NodePath::parse("/temperature")).unwrap();
        assert_eq!(node.value(), Some(&Value::Float(21.5)));
    }

    #[test]
    fn setter_before_make_node_errors_on_submit() {
        let mut tree = NodeTree::new();
        let mut builder = NodeBuilder::new(NodePath::root());
        builder.display_name("oops");
        let result = builder.submit(&mut tree);
        assert_eq!(
            result.error.unwrap().kind(),
            dsa_error::ErrorKind::NoNodeDefinedYet
        );
        assert!(result.created.is_empty());
    }

    #[test]
    fn illegal_name_rejects_whole_batch() {
        let mut tree = NodeTree::new();
        let mut builder = NodeBuilder::new(NodePath::root());
        builder.make_node("ok");
        builder.make_node("bad/name");
        let result = builder.submit(&mut tree);
        assert!(result.error.is_some());
        assert!(result.created.is_empty());
        assert!(!tree.exists(&NodePath::parse("/ok")));
    }

    #[test]
    fn existing_node_is_skipped_not_errored() {
        let mut tree = NodeTree::new();
        let mut first = NodeBuilder::new(NodePath::root());
        first.make_node("a");
        first.submit(&mut tree);

        let mut second = NodeBuilder::new(NodePath::root());
        second.make_node("a");
        second.make_node("b");
        let result = second.submit(&mut tree);
        assert!(result.error.is_none());
        assert_eq!(result.created, vec![NodePath::parse("/b")]);
    }

    #[test]
    fn submit_under_missing_parent_errors() {
        let mut tree = NodeTree::new();
        let mut builder = NodeBuilder::new(NodePath::parse("/no-such-parent"));
        builder.make_node("child");
        let result = builder.submit(&mut tree);
        assert_eq!(
            result.error.unwrap().kind(),
            dsa_error::ErrorKind::PathNotFound
        );
        assert!(result.created.is_empty());
        assert!(!tree.exists(&NodePath::parse("/no-such-parent/child")));
    }

    #[test]
    fn writable_without_value_type_errors() {
        let mut tree = NodeTree::new();
        let mut builder = NodeBuilder::new(NodePath::root());
        builder.make_node("bad").writable(Writable::Write);
        let result = builder.submit(&mut tree);
        assert_eq!(
            result.error.unwrap().kind(),
            dsa_error::ErrorKind::NotAValueNode
        );
    }
}
