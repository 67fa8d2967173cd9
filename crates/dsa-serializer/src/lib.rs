//! Periodic `nodes.json` snapshot and startup deserialization.
//!
//! On a configurable interval the serializer walks every node whose
//! `serialization_mode != none` and writes the whole set to disk in one
//! atomic write-to-temp-then-rename, mirroring the same pattern
//! `dsa_redo_log`'s ack marker uses. Deserialization runs once at startup,
//! before the host's `initialized` handler fires; the merge rule is that
//! pre-existing serialized metadata wins over a re-declaring builder call,
//! which `dsa_node::NodeTree`/`NodeBuilder` already implement by skipping
//! builder descriptions for paths that already exist.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dsa_error::{Error, ErrorKind};
use dsa_node::{
    NodeTree, Permission, SerializationMode, Writable,
};
use dsa_path::NodePath;
use dsa_scheduler::Scheduler;
use dsa_value::{Value, ValueType};
use serde::{Deserialize, Serialize};

/// One node's on-disk representation. Action metadata, handlers, and
/// children are never persisted -- they are recreated by the host
/// application at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedNode {
    pub path: NodePath,
    pub profile: String,
    pub display_name: Option<String>,
    pub value_type: ValueType,
    pub enum_values: Option<String>,
    pub permission: Permission,
    pub writable: Writable,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub hidden: bool,
    pub serialization_mode: SerializationMode,
    #[serde(default)]
    pub configs: std::collections::BTreeMap<String, Value>,
    #[serde(default)]
    pub attributes: std::collections::BTreeMap<String, Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotDocument {
    nodes: Vec<SerializedNode>,
}

/// Serializer configuration.
#[derive(Debug, Clone)]
pub struct SerializerConfig {
    /// Milliseconds between snapshots; `0` means write continuously (on
    /// every node-model mutation rather than on a timer).
    pub interval_ms: u64,
    /// When false, only metadata is written; values are omitted even for
    /// nodes with `serialization_mode == everything`.
    pub serialize_values: bool,
    /// Destination file, conventionally `nodes.json` under the link's data
    /// directory.
    pub path: PathBuf,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            serialize_values: true,
            path: PathBuf::from("nodes.json"),
        }
    }
}

/// Walks `tree`, builds the snapshot document, and writes it to
/// `config.path` via write-to-temp-then-rename. Nodes whose
/// `serialization_mode == none` are skipped entirely; `metadata-only` nodes
/// are written without a value regardless of `serialize_values`.
pub fn write_snapshot(tree: &NodeTree, config: &SerializerConfig) -> Result<(), Error> {
    let mut nodes: Vec<SerializedNode> = tree
        .iter()
        .filter(|(_, node)| node.serialization_mode != SerializationMode::None)
        .map(|(path, node)| SerializedNode {
            path: path.clone(),
            profile: node.profile.clone(),
            display_name: node.display_name.clone(),
            value_type: node.value_type,
            enum_values: node.enum_values.clone(),
            permission: node.permission,
            writable: node.writable,
            value: if config.serialize_values && node.serialization_mode == SerializationMode::Everything {
                node.value().cloned()
            } else {
                None
            },
            hidden: node.hidden,
            serialization_mode: node.serialization_mode,
            configs: node.configs.clone(),
            attributes: node.attributes.clone(),
        })
        .collect();
    nodes.sort_by(|a, b| a.path.as_str().cmp(b.path.as_str()));

    let document = SnapshotDocument { nodes };
    let json = serde_json::to_vec_pretty(&document)
        .map_err(|e| Error::with_detail(ErrorKind::InternalError, e.to_string()))?;

    let tmp_path = tmp_path_for(&config.path);
    fs::write(&tmp_path, &json)
        .map_err(|e| Error::with_detail(ErrorKind::InternalError, e.to_string()))?;
    fs::rename(&tmp_path, &config.path)
        .map_err(|e| Error::with_detail(ErrorKind::InternalError, e.to_string()))?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = tmp
        .file_name()
        .map(|n| format!("{}.tmp", n.to_string_lossy()))
        .unwrap_or_else(|| "nodes.json.tmp".to_owned());
    tmp.set_file_name(file_name);
    tmp
}

/// Reads and parses `path`. Returns an empty list if the file does not
/// exist yet (first-ever startup).
pub fn read_snapshot(path: &Path) -> Result<Vec<SerializedNode>, Error> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let document: SnapshotDocument = serde_json::from_str(&contents)
                .map_err(|e| Error::with_detail(ErrorKind::InternalError, e.to_string()))?;
            Ok(document.nodes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(Error::with_detail(ErrorKind::InternalError, e.to_string())),
    }
}

/// Applies a loaded snapshot to `tree` via [`NodeTree::insert_deserialized`],
/// skipping any node whose parent has not yet appeared (callers should sort
/// or retry; [`read_snapshot`]'s lexicographic ordering already guarantees
/// parents precede children). Must run once at startup, before the host's
/// `initialized` handler fires.
pub fn apply_snapshot(tree: &mut NodeTree, nodes: Vec<SerializedNode>) {
    for serialized in nodes {
        if serialized.path.is_root() {
            continue;
        }
        let mut node = dsa_node::Node::new_for_deserialization(serialized.path.clone(), serialized.profile);
        node.display_name = serialized.display_name;
        node.value_type = serialized.value_type;
        node.enum_values = serialized.enum_values;
        node.permission = serialized.permission;
        node.writable = serialized.writable;
        node.hidden = serialized.hidden;
        node.serialization_mode = serialized.serialization_mode;
        node.configs = serialized.configs;
        node.attributes = serialized.attributes;
        if let Some(value) = serialized.value {
            node.set_value_from_deserialization(value);
        }
        tree.insert_deserialized(node);
    }
}

/// Schedules [`write_snapshot`] to run repeatedly on `scheduler` at
/// `config.interval_ms`, reading the tree through `snapshot_fn` each time
/// (the caller supplies this so the serializer never needs to know how the
/// host synchronizes access to its live `NodeTree`). A zero interval is
/// treated as "write continuously" by the caller invoking [`write_snapshot`]
/// directly after every mutation instead of calling this function.
pub fn schedule_periodic(
    scheduler: &Scheduler,
    config: SerializerConfig,
    snapshot_fn: impl Fn() -> NodeTree + Send + Sync + 'static,
) {
    if config.interval_ms == 0 {
        return;
    }
    let scheduler_clone = scheduler.clone();
    let interval = Duration::from_millis(config.interval_ms);
    schedule_tick(scheduler_clone, interval, config, std::sync::Arc::new(snapshot_fn));
}

fn schedule_tick(
    scheduler: Scheduler,
    interval: Duration,
    config: SerializerConfig,
    snapshot_fn: std::sync::Arc<dyn Fn() -> NodeTree + Send + Sync>,
) {
    let scheduler_for_task = scheduler.clone();
    scheduler.submit_delayed(interval, move || {
        let tree = snapshot_fn();
        if let Err(error) = write_snapshot(&tree, &config) {
            tracing::warn!(%error, "periodic nodes.json snapshot failed");
        }
        schedule_tick(scheduler_for_task, interval, config, snapshot_fn);
    });
}
