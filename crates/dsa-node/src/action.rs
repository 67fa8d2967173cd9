//! Action metadata attached to a node and the shared
//! result-stream vocabulary the invocation engine (`dsa-action`) dispatches
//! against.
//!
//! `ActionResultSink` is the seam between this crate and `dsa-action`: this
//! crate defines the shape of a result and the trait a stream must
//! implement, `dsa-action` provides the implementation plus the
//! invocation/state-machine logic. That keeps the dependency arrow pointing
//! one way (`dsa-action` depends on `dsa-node`, not the reverse).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dsa_error::{Error, ErrorKind};
use dsa_path::NodePath;
use dsa_value::{Value, ValueType};

use crate::editor::Editor;
use crate::permission::Permission;

/// One ordered parameter of an action invocation.
#[derive(Debug, Clone)]
pub struct ActionParameter {
    pub name: String,
    pub value_type: ValueType,
    pub default: Option<Value>,
    pub enum_values: Option<Vec<String>>,
    pub placeholder: Option<String>,
    pub description: Option<String>,
    pub editor: Option<Editor>,
}

impl ActionParameter {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            default: None,
            enum_values: None,
            placeholder: None,
            description: None,
            editor: None,
        }
    }

    pub fn with_editor(mut self, editor: Editor) -> Result<Self, Error> {
        if editor.value_type() != self.value_type {
            return Err(Error::with_detail(
                ErrorKind::InvalidEditorType,
                format!(
                    "editor {} declares {} but parameter {} is {}",
                    editor.name(),
                    editor.value_type(),
                    self.name,
                    self.value_type
                ),
            ));
        }
        self.editor = Some(editor);
        Ok(self)
    }
}

/// One ordered result column.
#[derive(Debug, Clone)]
pub struct ActionColumn {
    pub name: String,
    pub value_type: ValueType,
    pub default: Option<Value>,
    pub enum_values: Option<Vec<String>>,
    pub editor: Option<Editor>,
}

impl ActionColumn {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            default: None,
            enum_values: None,
            editor: None,
        }
    }

    pub fn with_editor(mut self, editor: Editor) -> Result<Self, Error> {
        if editor.value_type() != self.value_type {
            return Err(Error::with_detail(
                ErrorKind::InvalidEditorType,
                format!(
                    "editor {} declares {} but column {} is {}",
                    editor.name(),
                    editor.value_type(),
                    self.name,
                    self.value_type
                ),
            ));
        }
        self.editor = Some(editor);
        Ok(self)
    }
}

/// The shape of an action's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultShape {
    Values,
    Table,
    Stream,
}

/// Per-emission instruction to the peer describing how rows should be
/// merged into its cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamingMode {
    /// Clear the peer's cache and replace with the new rows.
    Refresh,
    /// Append to the peer's cache.
    Append,
    /// Append, with the peer authorized to drop the oldest entries.
    Stream,
}

/// Auxiliary instruction on a table result specifying insert/replace
/// semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableModifier {
    Insert { offset: u64 },
    Replace { start: u64, end: u64 },
}

impl TableModifier {
    /// Constructs an `insert` modifier.
    pub fn insert(offset: u64) -> Self {
        TableModifier::Insert { offset }
    }

    /// Constructs a `replace` modifier, validating `end >= start`
    /// synchronously.
    pub fn replace(start: u64, end: u64) -> Result<Self, Error> {
        if end < start {
            return Err(Error::with_detail(
                ErrorKind::InvalidTableReplaceModifierIndex,
                format!("replace end {end} < start {start}"),
            ));
        }
        Ok(TableModifier::Replace { start, end })
    }
}

/// A single action result payload: rows plus the streaming instructions
/// that go with them, or an error terminating the stream.
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub rows: Vec<Vec<Value>>,
    pub mode: StreamingMode,
    pub modifier: Option<TableModifier>,
    pub error: Option<ActionResultError>,
}

/// The error marker carried by a result that should abort the stream.
#[derive(Debug, Clone)]
pub struct ActionResultError {
    pub code: Option<String>,
    pub message: String,
}

impl ActionResult {
    /// A successful result with no modifier, default streaming mode
    /// `refresh`.
    pub fn rows(rows: Vec<Vec<Value>>) -> Self {
        Self {
            rows,
            mode: StreamingMode::Refresh,
            modifier: None,
            error: None,
        }
    }

    pub fn with_mode(mut self, mode: StreamingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_modifier(mut self, modifier: TableModifier) -> Self {
        self.modifier = Some(modifier);
        self
    }

    /// An error result: causes the engine to send an error response and
    /// close the stream regardless of shape.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            rows: Vec::new(),
            mode: StreamingMode::Refresh,
            modifier: None,
            error: Some(ActionResultError {
                code: None,
                message: message.into(),
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// The engine-facing operations an in-flight invocation's stream exposes to
/// the user callback.
pub trait ActionResultSink: Send + Sync {
    /// Attaches the first result payload.
    fn set_result(&self, result: ActionResult) -> Result<(), Error>;
    /// Flushes buffered rows to the peer (`table`/`stream` shapes only).
    /// Returns `false` if the stream is already closed.
    fn commit(&self) -> bool;
    /// Explicit termination; idempotent.
    fn close(&self);
}

/// Callback invoked for each incoming invocation of an action.
pub type ActionCallback = Arc<
    dyn Fn(Arc<dyn ActionResultSink>, NodePath, BTreeMap<String, Value>, Option<Error>)
        + Send
        + Sync,
>;

/// Action metadata attached to a node.
#[derive(Clone)]
pub struct Action {
    pub permission: Permission,
    pub group: Option<String>,
    pub group_subtitle: Option<String>,
    pub parameters: Vec<ActionParameter>,
    pub columns: Vec<ActionColumn>,
    pub result_shape: ResultShape,
    pub callback: ActionCallback,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("permission", &self.permission)
            .field("group", &self.group)
            .field("group_subtitle", &self.group_subtitle)
            .field("parameters", &self.parameters)
            .field("columns", &self.columns)
            .field("result_shape", &self.result_shape)
            .finish_non_exhaustive()
    }
}

impl Action {
    /// Validates that permission is at least `read` (minimum for
    /// action-bearing nodes), failing with `invalid-permission-specified`
    /// otherwise.
    pub fn validate_permission(&self) -> Result<(), Error> {
        if !self.permission.meets(Permission::Read) {
            return Err(Error::with_detail(
                ErrorKind::InvalidPermissionSpecified,
                format!(
                    "action permission {} is below the required minimum of read",
                    self.permission
                ),
            ));
        }
        Ok(())
    }
}
