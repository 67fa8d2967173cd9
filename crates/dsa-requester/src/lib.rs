//! The requester-side stream table: allocates outgoing
//! request ids and demultiplexes inbound responses back to the callback
//! that issued the request.
//!
//! The wire codec that actually frames `ListResponse`/`SubscriptionUpdate`/
//! `InvokeResponse` bytes is out of scope; this crate models
//! only the bookkeeping those frames are dispatched into once decoded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dsa_error::{Error, ErrorKind};
use dsa_path::NodePath;
use dsa_value::Value;

/// A monotonically-allocated outgoing request id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// The kind of outgoing request a [`RequestId`] was allocated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    List,
    Subscribe,
    Invoke,
    Set,
    Remove,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Initialize,
    Open,
    Closed,
}

/// One page of a `list` response: a path's current children, or a removal
/// notice for a previously-listed child.
#[derive(Debug, Clone)]
pub struct ListResponse {
    pub path: NodePath,
    pub children: Vec<String>,
    pub removed: Vec<String>,
}

/// Mirrors `dsa_node::StreamingMode` for the requester side, kept as a local
/// type so this crate stays independent of the responder's node model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequesterStreamMode {
    Refresh,
    Append,
    Stream,
}

/// Mirrors `dsa_node::TableModifier` for the requester side, kept local for
/// the same reason [`RequesterStreamMode`] is: this crate stays independent
/// of the responder's node model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequesterTableModifier {
    Insert { offset: u64 },
    Replace { start: u64, end: u64 },
}

#[derive(Debug, Clone)]
pub struct InvokeResponse {
    pub rows: Vec<Vec<Value>>,
    pub mode: RequesterStreamMode,
    pub modifier: Option<RequesterTableModifier>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
    pub path: NodePath,
    pub value: Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

pub type ListCallback = Arc<dyn Fn(ListResponse) + Send + Sync>;
pub type SubscribeUpdateCallback = Arc<dyn Fn(SubscriptionUpdate) + Send + Sync>;
pub type InvokeCallback = Arc<dyn Fn(InvokeResponse) + Send + Sync>;
type OneShot = Mutex<Option<Box<dyn FnOnce(Result<(), Error>) + Send>>>;

enum Callbacks {
    List(ListCallback),
    Subscribe {
        ack: OneShot,
        update: Mutex<SubscribeUpdateCallback>,
    },
    Invoke(InvokeCallback),
    OneShot(OneShot),
}

/// One outstanding outgoing request.
pub struct StreamEntry {
    pub id: RequestId,
    pub kind: StreamKind,
    pub path: NodePath,
    status: Mutex<StreamStatus>,
    callbacks: Callbacks,
}

impl StreamEntry {
    pub fn status(&self) -> StreamStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Demultiplexes inbound responses by request id and enforces the
/// at-most-one policy for `(requester, path, kind)` where kind is `list` or
/// `subscribe`.
pub struct RequesterStreamTable {
    next_id: AtomicU64,
    entries: Mutex<HashMap<RequestId, Arc<StreamEntry>>>,
    coalesce_index: Mutex<HashMap<(NodePath, StreamKind), RequestId>>,
}

impl Default for RequesterStreamTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RequesterStreamTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
            coalesce_index: Mutex::new(HashMap::new()),
        }
    }

    fn alloc_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Opens a `list` stream. A concurrent `list` already outstanding for
    /// `path` coalesces onto it: the existing id is returned and no new
    /// entry is created.
    pub fn open_list(&self, path: NodePath, callback: ListCallback) -> RequestId {
        let mut coalesce = self.coalesce_index.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = coalesce.get(&(path.clone(), StreamKind::List)) {
            return *existing;
        }
        let id = self.alloc_id();
        let entry = Arc::new(StreamEntry {
            id,
            kind: StreamKind::List,
            path: path.clone(),
            status: Mutex::new(StreamStatus::Initialize),
            callbacks: Callbacks::List(callback),
        });
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, entry);
        coalesce.insert((path, StreamKind::List), id);
        id
    }

    /// Opens a `subscribe` stream. Re-subscribing to a path that already
    /// has an outstanding subscription replaces the update callback but
    /// retains the original request id.
    pub fn open_subscribe(
        &self,
        path: NodePath,
        ack: impl FnOnce(Result<(), Error>) + Send + 'static,
        update: SubscribeUpdateCallback,
    ) -> RequestId {
        let mut coalesce = self.coalesce_index.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing_id) = coalesce.get(&(path.clone(), StreamKind::Subscribe)).copied() {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = entries.get(&existing_id) {
                if let Callbacks::Subscribe { update: slot, .. } = &entry.callbacks {
                    *slot.lock().unwrap_or_else(|e| e.into_inner()) = update;
                }
                // The subscription is already acked; a fresh coalescing
                // caller observes success immediately rather than waiting
                // on a response that will never re-arrive for this id.
                ack(Ok(()));
                return existing_id;
            }
        }
        drop(coalesce);

        let id = self.alloc_id();
        let entry = Arc::new(StreamEntry {
            id,
            kind: StreamKind::Subscribe,
            path: path.clone(),
            status: Mutex::new(StreamStatus::Initialize),
            callbacks: Callbacks::Subscribe {
                ack: Mutex::new(Some(Box::new(ack))),
                update: Mutex::new(update),
            },
        });
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, entry);
        self.coalesce_index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((path, StreamKind::Subscribe), id);
        id
    }

    pub fn open_invoke(&self, path: NodePath, callback: InvokeCallback) -> RequestId {
        let id = self.alloc_id();
        let entry = Arc::new(StreamEntry {
            id,
            kind: StreamKind::Invoke,
            path,
            status: Mutex::new(StreamStatus::Initialize),
            callbacks: Callbacks::Invoke(callback),
        });
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, entry);
        id
    }

    /// Opens a one-shot `set`/`remove`/`close` entry; it is removed as soon
    /// as its callback fires.
    pub fn open_oneshot(
        &self,
        kind: StreamKind,
        path: NodePath,
        callback: impl FnOnce(Result<(), Error>) + Send + 'static,
    ) -> RequestId {
        debug_assert!(matches!(
            kind,
            StreamKind::Set | StreamKind::Remove | StreamKind::Close
        ));
        let id = self.alloc_id();
        let entry = Arc::new(StreamEntry {
            id,
            kind,
            path,
            status: Mutex::new(StreamStatus::Initialize),
            callbacks: Callbacks::OneShot(Mutex::new(Some(Box::new(callback)))),
        });
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, entry);
        id
    }

    pub fn status(&self, id: RequestId) -> Option<StreamStatus> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .map(|entry| entry.status())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn set_status(&self, entry: &StreamEntry, status: StreamStatus) {
        *entry.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    fn remove_entry(&self, id: RequestId) -> Option<Arc<StreamEntry>> {
        let entry = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        if let Some(entry) = &entry {
            self.coalesce_index
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&(entry.path.clone(), entry.kind));
        }
        entry
    }

    /// Dispatches a decoded `ListResponse` for `id`. Fires repeatedly until
    /// the stream is locally or remotely closed.
    pub fn dispatch_list(&self, id: RequestId, response: ListResponse) -> Result<(), Error> {
        let entry = self.lookup(id, StreamKind::List)?;
        self.set_status(&entry, StreamStatus::Open);
        if let Callbacks::List(callback) = &entry.callbacks {
            callback(response);
        }
        Ok(())
    }

    /// Dispatches the one-time acknowledgement for a `subscribe` request.
    pub fn dispatch_subscribe_ack(&self, id: RequestId, result: Result<(), Error>) -> Result<(), Error> {
        let entry = self.lookup(id, StreamKind::Subscribe)?;
        self.set_status(&entry, StreamStatus::Open);
        if let Callbacks::Subscribe { ack, .. } = &entry.callbacks {
            if let Some(ack) = ack.lock().unwrap_or_else(|e| e.into_inner()).take() {
                ack(result);
            }
        }
        Ok(())
    }

    /// Dispatches a `SubscriptionUpdate` for `id`. Fires repeatedly until an
    /// `unsubscribe` is issued for the path.
    pub fn dispatch_subscribe_update(&self, id: RequestId, update: SubscriptionUpdate) -> Result<(), Error> {
        let entry = self.lookup(id, StreamKind::Subscribe)?;
        if let Callbacks::Subscribe { update: callback, .. } = &entry.callbacks {
            let callback = callback.lock().unwrap_or_else(|e| e.into_inner()).clone();
            callback(update);
        }
        Ok(())
    }

    /// Removes the subscription entry for `path`, if any.
    pub fn unsubscribe(&self, path: &NodePath) -> bool {
        let id = self
            .coalesce_index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(path.clone(), StreamKind::Subscribe))
            .copied();
        match id {
            Some(id) => {
                if let Some(entry) = self.remove_entry(id) {
                    self.set_status(&entry, StreamStatus::Closed);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Dispatches an `InvokeResponse` for `id`. Table/stream-shaped actions
    /// can fire this repeatedly; passing `closed = true` removes the entry.
    pub fn dispatch_invoke(&self, id: RequestId, response: InvokeResponse, closed: bool) -> Result<(), Error> {
        let entry = self.lookup(id, StreamKind::Invoke)?;
        self.set_status(&entry, StreamStatus::Open);
        if let Callbacks::Invoke(callback) = &entry.callbacks {
            callback(response);
        }
        if closed {
            self.remove_entry(id);
        }
        Ok(())
    }

    /// Closes a locally-initiated invoke stream without waiting for the
    /// peer, e.g. in response to a user cancellation.
    pub fn close_invoke(&self, id: RequestId) -> bool {
        match self.remove_entry(id) {
            Some(entry) if entry.kind == StreamKind::Invoke => {
                self.set_status(&entry, StreamStatus::Closed);
                true
            }
            Some(other) => {
                // Not an invoke entry; put it back untouched.
                self.entries
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(id, other.clone());
                self.coalesce_index
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert((other.path.clone(), other.kind), id);
                false
            }
            None => false,
        }
    }

    /// Dispatches a one-shot `set`/`remove`/`close` response and removes the
    /// entry.
    pub fn dispatch_oneshot(&self, id: RequestId, result: Result<(), Error>) -> Result<(), Error> {
        let entry = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::InvalidStream))?;
        if !matches!(entry.kind, StreamKind::Set | StreamKind::Remove | StreamKind::Close) {
            return Err(Error::new(ErrorKind::InvalidStream));
        }
        self.remove_entry(id);
        self.set_status(&entry, StreamStatus::Closed);
        if let Callbacks::OneShot(slot) = &entry.callbacks {
            if let Some(callback) = slot.lock().unwrap_or_else(|e| e.into_inner()).take() {
                callback(result);
            }
        }
        Ok(())
    }

    fn lookup(&self, id: RequestId, expected: StreamKind) -> Result<Arc<StreamEntry>, Error> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(&id).ok_or_else(|| Error::new(ErrorKind::InvalidStream))?;
        if entry.kind != expected {
            return Err(Error::new(ErrorKind::InvalidStream));
        }
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn concurrent_list_requests_coalesce() {
        let table = RequesterStreamTable::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let id1 = table.open_list(
            NodePath::parse("/a"),
            Arc::new(move |_| {
                calls2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let id2 = table.open_list(NodePath::parse("/a"), Arc::new(|_| {}));
        assert_eq!(id1, id2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn resubscribe_keeps_id_and_replaces_callback() {
        let table = RequesterStreamTable::new();
        let first_updates = Arc::new(AtomicUsize::new(0));
        let first_updates2 = first_updates.clone();
        let id1 = table.open_subscribe(
            NodePath::parse("/temp"),
            |_| {},
            Arc::new(move |_| {
                first_updates2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        table.dispatch_subscribe_ack(id1, Ok(())).unwrap();

        let second_updates = Arc::new(AtomicUsize::new(0));
        let second_updates2 = second_updates.clone();
        let id2 = table.open_subscribe(
            NodePath::parse("/temp"),
            |_| {},
            Arc::new(move |_| {
                second_updates2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(id1, id2);

        table
            .dispatch_subscribe_update(
                id1,
                SubscriptionUpdate {
                    path: NodePath::parse("/temp"),
                    value: Value::Int(1),
                    timestamp: chrono::Utc::now(),
                },
            )
            .unwrap();
        assert_eq!(first_updates.load(Ordering::SeqCst), 0);
        assert_eq!(second_updates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invoke_closed_response_removes_entry() {
        let table = RequesterStreamTable::new();
        let id = table.open_invoke(NodePath::parse("/do"), Arc::new(|_| {}));
        table
            .dispatch_invoke(
                id,
                InvokeResponse {
                    rows: vec![],
                    mode: RequesterStreamMode::Refresh,
                    modifier: None,
                    error: None,
                },
                true,
            )
            .unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn table_replace_is_visible_in_invoke_response() {
        let table = RequesterStreamTable::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received2 = received.clone();
        let id = table.open_invoke(
            NodePath::parse("/t"),
            Arc::new(move |response: InvokeResponse| {
                received2.lock().unwrap().push(response);
            }),
        );

        let first: Vec<Vec<Value>> = (0..5).map(|i| vec![Value::Int(i)]).collect();
        table
            .dispatch_invoke(
                id,
                InvokeResponse {
                    rows: first,
                    mode: RequesterStreamMode::Refresh,
                    modifier: None,
                    error: None,
                },
                false,
            )
            .unwrap();

        let replacement: Vec<Vec<Value>> = (0..5).map(|i| vec![Value::Int(i + 100)]).collect();
        table
            .dispatch_invoke(
                id,
                InvokeResponse {
                    rows: replacement.clone(),
                    mode: RequesterStreamMode::Append,
                    modifier: Some(RequesterTableModifier::Replace { start: 0, end: 4 }),
                    error: None,
                },
                true,
            )
            .unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[1].mode, RequesterStreamMode::Append);
        assert_eq!(
            received[1].modifier,
            Some(RequesterTableModifier::Replace { start: 0, end: 4 })
        );
        assert_eq!(received[1].rows, replacement);
        assert!(table.is_empty(), "closed=true must remove the entry");
    }

    #[test]
    fn oneshot_removes_entry_after_firing() {
        let table = RequesterStreamTable::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let id = table.open_oneshot(StreamKind::Set, NodePath::parse("/a"), move |_| {
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        table.dispatch_oneshot(id, Ok(())).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(table.is_empty());
        assert!(table.dispatch_oneshot(id, Ok(())).is_err());
    }

    #[test]
    fn unsubscribe_removes_coalesce_entry_and_allows_fresh_subscribe() {
        let table = RequesterStreamTable::new();
        let id1 = table.open_subscribe(NodePath::parse("/x"), |_| {}, Arc::new(|_| {}));
        assert!(table.unsubscribe(&NodePath::parse("/x")));
        assert!(table.is_empty());
        let id2 = table.open_subscribe(NodePath::parse("/x"), |_| {}, Arc::new(|_| {}));
        assert_ne!(id1, id2);
    }
}
