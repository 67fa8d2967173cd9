//! The in-memory responder node tree: metadata/value lifecycle,
//! construction via [`builder::NodeBuilder`], mutation via
//! [`updater::NodeUpdater`].

pub mod action;
pub mod builder;
pub mod editor;
pub mod node;
pub mod permission;
pub mod tree;
pub mod updater;

pub use action::{
    Action, ActionCallback, ActionColumn, ActionParameter, ActionResult, ActionResultError,
    ActionResultSink, ResultShape, StreamingMode, TableModifier,
};
pub use builder::{BuilderSubmitResult, NodeBuilder};
pub use editor::Editor;
pub use node::{Node, NodeEvent, NodeInfo, OnEventHandler, OnSubscribeHandler, OnWriteHandler};
pub use permission::{Permission, SerializationMode, Writable};
pub use tree::{CreationCallback, NodeTree};
pub use updater::NodeUpdater;
