//! [`NodeUpdater`]: atomic, partial mutation of one existing node.

use dsa_error::{Error, ErrorKind};
use dsa_path::NodePath;
use dsa_value::ValueType;

use crate::action::Action;
use crate::editor::Editor;
use crate::node::NodeEvent;
use crate::permission::{Permission, Writable};
use crate::tree::NodeTree;

enum ConfigOp {
    Add(String, dsa_value::Value),
    Remove(String),
}

enum AttributeOp {
    Add(String, dsa_value::Value),
    Remove(String),
}

/// Targets one existing path; setters mutate only the named fields and a
/// single [`NodeUpdater::submit`] commits every change atomically.
#[derive(Default)]
pub struct NodeUpdater {
    path: Option<NodePath>,
    display_name: Option<Option<String>>,
    value_type: Option<ValueType>,
    enum_values: Option<Option<String>>,
    permission: Option<Permission>,
    writable: Option<Writable>,
    hidden: Option<bool>,
    action: Option<Option<Action>>,
    editor: Option<Option<Editor>>,
    configs: Vec<ConfigOp>,
    attributes: Vec<AttributeOp>,
}

impl NodeUpdater {
    pub fn new(path: impl Into<NodePath>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn display_name(mut self, name: Option<String>) -> Self {
        self.display_name = Some(name);
        self
    }

    pub fn value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = Some(value_type);
        self
    }

    pub fn enum_values(mut self, values: Option<String>) -> Self {
        self.enum_values = Some(values);
        self
    }

    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission = Some(permission);
        self
    }

    pub fn writable(mut self, writable: Writable) -> Self {
        self.writable = Some(writable);
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = Some(hidden);
        self
    }

    pub fn action(mut self, action: Option<Action>) -> Self {
        self.action = Some(action);
        self
    }

    pub fn editor(mut self, editor: Option<Editor>) -> Self {
        self.editor = Some(editor);
        self
    }

    pub fn add_config(mut self, key: impl Into<String>, value: dsa_value::Value) -> Self {
        self.configs.push(ConfigOp::Add(key.into(), value));
        self
    }

    pub fn remove_config(mut self, key: impl Into<String>) -> Self {
        self.configs.push(ConfigOp::Remove(key.into()));
        self
    }

    pub fn add_attribute(mut self, key: impl Into<String>, value: dsa_value::Value) -> Self {
        self.attributes.push(AttributeOp::Add(key.into(), value));
        self
    }

    pub fn remove_attribute(mut self, key: impl Into<String>) -> Self {
        self.attributes.push(AttributeOp::Remove(key.into()));
        self
    }

    /// Commits every set field in one atomic step. Unset fields remain
    /// untouched.
    pub fn submit(self, tree: &mut NodeTree) -> Result<(), Error> {
        let path = self.path.ok_or_else(|| Error::new(ErrorKind::InternalError))?;
        if let Some(action) = &self.action {
            if let Some(action) = action {
                action.validate_permission()?;
            }
        }
        if let Some(Some(editor)) = &self.editor {
            let target_type = self.value_type;
            let node_type = tree
                .get(&path)
                .ok_or_else(|| Error::new(ErrorKind::PathNotFound))?
                .value_type;
            let effective_type = target_type.unwrap_or(node_type);
            if editor.value_type() != effective_type {
                return Err(Error::new(ErrorKind::InvalidEditorType));
            }
            if !editor.allowed_on_value_node() {
                return Err(Error::new(ErrorKind::EditorTypeNotAllowed));
            }
        }

        let node = tree
            .get_mut(&path)
            .ok_or_else(|| Error::new(ErrorKind::PathNotFound))?;

        if let Some(display_name) = self.display_name {
            node.display_name = display_name;
        }
        if let Some(value_type) = self.value_type {
            node.value_type = value_type;
        }
        if let Some(enum_values) = self.enum_values {
            node.enum_values = enum_values;
        }
        if let Some(permission) = self.permission {
            node.permission = permission;
        }
        if let Some(writable) = self.writable {
            node.writable = writable;
        }
        if let Some(hidden) = self.hidden {
            node.hidden = hidden;
        }
        if let Some(action) = self.action {
            node.action = action;
        }
        if let Some(editor) = self.editor {
            node.editor = editor;
        }
        for op in self.configs {
            match op {
                ConfigOp::Add(key, value) => {
                    node.configs.insert(key, value);
                }
                ConfigOp::Remove(key) => {
                    node.configs.remove(&key);
                }
            }
        }
        for op in self.attributes {
            match op {
                AttributeOp::Add(key, value) => {
                    node.attributes.insert(key, value);
                }
                AttributeOp::Remove(key) => {
                    node.attributes.remove(&key);
                }
            }
        }
        node.fire_on_event(NodeEvent::MetadataChanged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::NodeBuilder;
    use dsa_value::Value;

    fn tree_with_node() -> NodeTree {
        let mut tree = NodeTree::new();
        let mut builder = NodeBuilder::new(NodePath::root());
        builder.make_node("a").value_type(ValueType::String);
        builder.submit(&mut tree);
        tree
    }

    #[test]
    fn submit_only_touches_set_fields() {
        let mut tree = tree_with_node();
        NodeUpdater::new(NodePath::parse("/a"))
            .display_name(Some("A".to_owned()))
            .submit(&mut tree)
            .unwrap();
        let node = tree.get(&NodePath::parse("/a")).unwrap();
        assert_eq!(node.display_name.as_deref(), Some("A"));
        assert_eq!(node.value_type, ValueType::String);
    }

    #[test]
    fn submit_on_missing_path_errors() {
        let mut tree = NodeTree::new();
        let err = NodeUpdater::new(NodePath::parse("/missing"))
            .hidden(true)
            .submit(&mut tree)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathNotFound);
    }

    #[test]
    fn add_and_remove_config_in_one_submit() {
        let mut tree = tree_with_node();
        NodeUpdater::new(NodePath::parse("/a"))
            .add_config("$writable", Value::Bool(true))
            .submit(&mut tree)
            .unwrap();
        assert!(tree
            .get(&NodePath::parse("/a"))
            .unwrap()
            .configs
            .contains_key("$writable"));

        NodeUpdater::new(NodePath::parse("/a"))
            .remove_config("$writable")
            .submit(&mut tree)
            .unwrap();
        assert!(!tree
            .get(&NodePath::parse("/a"))
            .unwrap()
            .configs
            .contains_key("$writable"));
    }
}
