//! `Responder`: the node-tree side of a [`crate::link::Link`], wrapping
//! [`NodeTree`], [`SubscriptionEngine`], and [`ActionEngine`] behind one
//! handle.

use std::sync::{Arc, Mutex};

use dsa_action::{ActionEngine, ActionTransport, StreamId};
use dsa_error::{Error, ErrorKind};
use dsa_node::{
    NodeBuilder, NodeInfo, NodeTree, Permission, SerializationMode, Writable,
};
use dsa_path::NodePath;
use dsa_redo_log::RedoLogStore;
use dsa_scheduler::Scheduler;
use dsa_subscription::{Qos, SubscriptionEngine, SubscriptionEngineConfig};
use dsa_value::{Value, ValueType};

/// Minimal-vs-full constructors for a create-or-set call.
pub enum CreateOrSetValueDescription {
    Minimal {
        path: NodePath,
        value_type: ValueType,
        value: Value,
    },
    Full {
        path: NodePath,
        profile: String,
        value_type: ValueType,
        value: Value,
        permission: Permission,
        writable: Writable,
        enum_values: Option<String>,
        serialization_mode: SerializationMode,
    },
}

impl CreateOrSetValueDescription {
    pub fn minimal(path: NodePath, value_type: ValueType, value: Value) -> Self {
        CreateOrSetValueDescription::Minimal {
            path,
            value_type,
            value,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn full(
        path: NodePath,
        profile: impl Into<String>,
        value_type: ValueType,
        value: Value,
        permission: Permission,
        writable: Writable,
        enum_values: Option<String>,
        serialization_mode: SerializationMode,
    ) -> Self {
        CreateOrSetValueDescription::Full {
            path,
            profile: profile.into(),
            value_type,
            value,
            permission,
            writable,
            enum_values,
            serialization_mode,
        }
    }
}

/// The responder half of a link: owns the node tree and the engines that
/// act on it.
pub struct Responder {
    tree: Mutex<NodeTree>,
    subscriptions: Arc<SubscriptionEngine>,
    actions: ActionEngine,
    redo: Arc<RedoLogStore>,
}

impl Responder {
    pub fn new(
        scheduler: Scheduler,
        subscription_config: SubscriptionEngineConfig,
        redo: Arc<RedoLogStore>,
        action_transport: Arc<dyn ActionTransport>,
    ) -> Self {
        Self {
            tree: Mutex::new(NodeTree::new()),
            subscriptions: Arc::new(SubscriptionEngine::new(subscription_config, redo.clone())),
            actions: ActionEngine::new(scheduler, action_transport),
            redo,
        }
    }

    /// Runs `f` with exclusive access to the node tree. Every tree mutation
    /// goes through this single lock, so at most one worker mutates a given
    /// subtree at a time.
    pub fn with_tree<T>(&self, f: impl FnOnce(&mut NodeTree) -> T) -> T {
        let mut tree = self.tree.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut tree)
    }

    pub fn node_info(&self, path: &NodePath) -> Option<NodeInfo> {
        self.with_tree(|tree| tree.node_info(path))
    }

    /// Clones the tree for the serializer's periodic snapshot, so the
    /// snapshot's `fs::write` never runs while the tree lock is held.
    pub fn snapshot_tree(&self) -> NodeTree {
        self.with_tree(|tree| tree.clone())
    }

    /// Applies a startup snapshot before the host's `initialized` handler
    /// fires.
    pub fn apply_snapshot(&self, nodes: Vec<dsa_serializer::SerializedNode>) {
        self.with_tree(|tree| dsa_serializer::apply_snapshot(tree, nodes));
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionEngine> {
        &self.subscriptions
    }

    pub fn redo_log(&self) -> &Arc<RedoLogStore> {
        &self.redo
    }

    /// Submits a batch of node descriptions under `parent`.
    pub fn build(&self, parent: NodePath, f: impl FnOnce(&mut NodeBuilder)) -> Result<Vec<NodePath>, Error> {
        let mut builder = NodeBuilder::new(parent);
        f(&mut builder);
        self.with_tree(|tree| {
            let result = builder.submit(tree);
            match result.error {
                Some(error) => Err(error),
                None => Ok(result.created),
            }
        })
    }

    /// Creates `path` if it does not exist, or sets its value if it does.
    pub fn create_node_or_set_value(&self, description: CreateOrSetValueDescription) -> Result<NodePath, Error> {
        self.with_tree(|tree| match description {
            CreateOrSetValueDescription::Minimal {
                path,
                value_type,
                value,
            } => tree.create_or_set(
                path,
                "node",
                value_type,
                value,
                Permission::Read,
                Writable::Never,
                None,
                SerializationMode::None,
            ),
            CreateOrSetValueDescription::Full {
                path,
                profile,
                value_type,
                value,
                permission,
                writable,
                enum_values,
                serialization_mode,
            } => tree.create_or_set(
                path,
                profile,
                value_type,
                value,
                permission,
                writable,
                enum_values,
                serialization_mode,
            ),
        })
    }

    /// Removes `path` and its entire subtree, notifying every subscriber on
    /// the removed paths with [`dsa_subscription::UpdateStatus::Removed`]
    /// before their subscriptions are dropped.
    pub fn remove(&self, path: &NodePath) -> Result<(), Error> {
        let affected = self.with_tree(|tree| tree.subtree_paths(path));
        self.with_tree(|tree| tree.remove(path))?;
        let timestamp = chrono::Utc::now();
        for affected_path in affected {
            self.subscriptions.notify_removed(&affected_path, timestamp)?;
        }
        Ok(())
    }

    pub fn set_value(&self, path: &NodePath, value: Value) -> Result<(), Error> {
        self.with_tree(|tree| tree.set_value(path, value.clone()))?;
        let timestamp = self
            .with_tree(|tree| tree.get(path).map(|n| n.timestamp()))
            .unwrap_or_else(chrono::Utc::now);
        self.subscriptions.notify_value_change(path, &value, timestamp)
    }

    /// A remote peer's `set` request against a writable node.
    pub fn remote_set(&self, path: &NodePath, value: Value) -> Result<(), Error> {
        self.with_tree(|tree| tree.remote_set(path, value.clone()))?;
        let timestamp = self
            .with_tree(|tree| tree.get(path).map(|n| n.timestamp()))
            .unwrap_or_else(chrono::Utc::now);
        self.subscriptions.notify_value_change(path, &value, timestamp)
    }

    /// A remote peer's `subscribe` request. Fires the
    /// node's on-subscribe handler with `true` before returning if this is
    /// the first subscriber, satisfying the ordering invariant that
    /// on-subscribe must precede any delivered update.
    pub fn subscribe(&self, subscriber_id: &str, path: &NodePath, qos: Qos) -> Result<(), Error> {
        if !self.with_tree(|tree| tree.exists(path)) {
            return Err(Error::new(ErrorKind::PathNotFound));
        }
        let is_first = self.subscriptions.subscribe(subscriber_id, path, qos)?;
        if is_first {
            self.with_tree(|tree| {
                if let Some(node) = tree.get(path) {
                    node.fire_on_subscribe(true);
                }
            });
        }
        Ok(())
    }

    pub fn unsubscribe(&self, subscriber_id: &str, path: &NodePath) {
        let was_last = self.subscriptions.unsubscribe(subscriber_id, path);
        if was_last {
            self.with_tree(|tree| {
                if let Some(node) = tree.get(path) {
                    node.fire_on_subscribe(false);
                }
            });
        }
    }

    /// A remote peer's `invoke` request.
    pub fn invoke(
        &self,
        path: &NodePath,
        params: std::collections::BTreeMap<String, Value>,
    ) -> Result<StreamId, Error> {
        let action = self
            .with_tree(|tree| tree.get(path).and_then(|n| n.action.clone()))
            .ok_or_else(|| Error::new(ErrorKind::PathNotFound))?;
        self.actions.invoke(action, path.clone(), params)
    }

    pub fn close_invoke(&self, stream: StreamId) {
        self.actions.close(stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsa_redo_log::RedoLogConfig;
    use dsa_scheduler::Scheduler;
    use std::sync::mpsc;

    struct NullTransport;
    impl ActionTransport for NullTransport {
        fn send(&self, _stream: StreamId, _path: &NodePath, _frame: dsa_action::OutboundFrame) {}
    }

    fn make_responder(dir: &std::path::Path) -> (Responder, dsa_scheduler::SchedulerGuard) {
        let guard = Scheduler::start(1);
        let scheduler = guard.handle();
        let redo = Arc::new(RedoLogStore::new(RedoLogConfig {
            base_dir: dir.to_path_buf(),
            ..Default::default()
        }));
        let responder = Responder::new(
            scheduler,
            SubscriptionEngineConfig::default(),
            redo,
            Arc::new(NullTransport),
        );
        (responder, guard)
    }

    #[test]
    fn create_or_set_minimal_then_full_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let (responder, _guard) = make_responder(dir.path());
        let path = NodePath::parse("/counter");
        responder
            .create_node_or_set_value(CreateOrSetValueDescription::minimal(
                path.clone(),
                ValueType::Int,
                Value::Int(1),
            ))
            .unwrap();
        assert_eq!(responder.node_info(&path).unwrap().value, Some(Value::Int(1)));

        responder
            .create_node_or_set_value(CreateOrSetValueDescription::minimal(
                path.clone(),
                ValueType::Int,
                Value::Int(2),
            ))
            .unwrap();
        assert_eq!(responder.node_info(&path).unwrap().value, Some(Value::Int(2)));
    }

    #[test]
    fn subscribe_fires_on_subscribe_before_notify() {
        let dir = tempfile::TempDir::new().unwrap();
        let (responder, _guard) = make_responder(dir.path());
        let (tx, rx) = mpsc::channel();
        responder
            .build(NodePath::root(), |b| {
                b.make_node("temp")
                    .value_type(ValueType::Number)
                    .value(Value::Float(1.0));
            })
            .unwrap();
        let path = NodePath::parse("/temp");
        responder.with_tree(|tree| {
            let node = tree.get_mut(&path).unwrap();
            node.on_subscribe = Some(Arc::new(move |subscribed| {
                tx.send(subscribed).unwrap();
            }));
        });

        responder.subscribe("peer-1", &path, Qos::None).unwrap();
        assert_eq!(rx.try_recv().unwrap(), true);

        responder.unsubscribe("peer-1", &path);
        assert_eq!(rx.try_recv().unwrap(), false);
    }

    #[test]
    fn remove_notifies_subscribers_as_removed() {
        let dir = tempfile::TempDir::new().unwrap();
        let (responder, _guard) = make_responder(dir.path());
        responder
            .build(NodePath::root(), |b| {
                b.make_node("temp")
                    .value_type(ValueType::Number)
                    .value(Value::Float(1.0));
            })
            .unwrap();
        let path = NodePath::parse("/temp");
        responder.subscribe("peer-1", &path, Qos::None).unwrap();

        responder.remove(&path).unwrap();

        let update = responder
            .subscriptions()
            .next_delivery("peer-1", &path)
            .unwrap()
            .unwrap();
        assert_eq!(update.status, dsa_subscription::UpdateStatus::Removed);
        assert!(!responder.with_tree(|tree| tree.exists(&path)));
    }

    #[test]
    fn subscribe_unknown_path_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let (responder, _guard) = make_responder(dir.path());
        let err = responder
            .subscribe("peer-1", &NodePath::parse("/missing"), Qos::None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathNotFound);
    }
}
