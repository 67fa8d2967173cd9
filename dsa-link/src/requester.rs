//! `Requester`: the outgoing-request side of a [`crate::link::Link`],
//! wrapping [`RequesterStreamTable`] behind the same wire-delegation seam
//! `dsa_action::ActionTransport` uses on the responder side.

use std::sync::Arc;

use dsa_path::NodePath;
use dsa_requester::{
    InvokeCallback, ListCallback, RequestId, RequesterStreamTable, StreamKind, StreamStatus,
    SubscribeUpdateCallback,
};
use dsa_value::Value;

/// One outgoing request frame a [`Requester`] hands to its
/// [`RequesterTransport`].
#[derive(Debug, Clone)]
pub enum OutgoingRequest {
    List(NodePath),
    Subscribe(NodePath),
    Unsubscribe(NodePath),
    Invoke {
        path: NodePath,
        params: std::collections::BTreeMap<String, Value>,
    },
    Set {
        path: NodePath,
        value: Value,
    },
    Remove(NodePath),
    Close(RequestId),
}

/// The wire-facing collaborator a [`Requester`] sends outgoing request
/// frames through, mirroring [`dsa_action::ActionTransport`] on the
/// responder side.
pub trait RequesterTransport: Send + Sync {
    fn send(&self, id: RequestId, request: OutgoingRequest);
}

/// The requester half of a link: allocates outgoing request ids and routes
/// inbound responses back to callers, delegating actual framing to an
/// injected [`RequesterTransport`].
pub struct Requester {
    table: RequesterStreamTable,
    transport: Arc<dyn RequesterTransport>,
}

impl Requester {
    pub fn new(transport: Arc<dyn RequesterTransport>) -> Self {
        Self {
            table: RequesterStreamTable::new(),
            transport,
        }
    }

    pub fn list(&self, path: NodePath, callback: ListCallback) -> RequestId {
        let id = self.table.open_list(path.clone(), callback);
        self.transport.send(id, OutgoingRequest::List(path));
        id
    }

    pub fn subscribe(
        &self,
        path: NodePath,
        ack: impl FnOnce(Result<(), dsa_error::Error>) + Send + 'static,
        update: SubscribeUpdateCallback,
    ) -> RequestId {
        let id = self.table.open_subscribe(path.clone(), ack, update);
        if self.table.status(id) == Some(StreamStatus::Initialize) {
            self.transport.send(id, OutgoingRequest::Subscribe(path));
        }
        id
    }

    pub fn unsubscribe(&self, path: &NodePath) {
        if self.table.unsubscribe(path) {
            self.transport
                .send(RequestId(0), OutgoingRequest::Unsubscribe(path.clone()));
        }
    }

    pub fn invoke(
        &self,
        path: NodePath,
        params: std::collections::BTreeMap<String, Value>,
        callback: InvokeCallback,
    ) -> RequestId {
        let id = self.table.open_invoke(path.clone(), callback);
        self.transport
            .send(id, OutgoingRequest::Invoke { path, params });
        id
    }

    pub fn close_invoke(&self, id: RequestId) {
        self.table.close_invoke(id);
        self.transport.send(id, OutgoingRequest::Close(id));
    }

    pub fn set(
        &self,
        path: NodePath,
        value: Value,
        callback: impl FnOnce(Result<(), dsa_error::Error>) + Send + 'static,
    ) -> RequestId {
        let id = self.table.open_oneshot(StreamKind::Set, path.clone(), callback);
        self.transport.send(id, OutgoingRequest::Set { path, value });
        id
    }

    pub fn remove(
        &self,
        path: NodePath,
        callback: impl FnOnce(Result<(), dsa_error::Error>) + Send + 'static,
    ) -> RequestId {
        let id = self.table.open_oneshot(StreamKind::Remove, path.clone(), callback);
        self.transport.send(id, OutgoingRequest::Remove(path));
        id
    }

    pub fn table(&self) -> &RequesterStreamTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingTransport {
        sent: Mutex<Vec<(RequestId, OutgoingRequest)>>,
    }

    impl RecordingTransport {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl RequesterTransport for RecordingTransport {
        fn send(&self, id: RequestId, request: OutgoingRequest) {
            self.sent.lock().unwrap().push((id, request));
        }
    }

    #[test]
    fn list_sends_exactly_one_frame_for_coalesced_callers() {
        let transport = Arc::new(RecordingTransport::new());
        let requester = Requester::new(transport.clone());
        let path = NodePath::parse("/devices");
        let id1 = requester.list(path.clone(), Arc::new(|_| {}));
        let id2 = requester.list(path.clone(), Arc::new(|_| {}));
        assert_eq!(id1, id2);
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn resubscribe_does_not_resend_subscribe_frame() {
        let transport = Arc::new(RecordingTransport::new());
        let requester = Requester::new(transport.clone());
        let path = NodePath::parse("/temp");
        let id1 = requester.subscribe(path.clone(), |_| {}, Arc::new(|_| {}));
        let id2 = requester.subscribe(path.clone(), |_| {}, Arc::new(|_| {}));
        assert_eq!(id1, id2);
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].1, OutgoingRequest::Subscribe(_)));
    }

    #[test]
    fn invoke_and_set_emit_their_frames() {
        let transport = Arc::new(RecordingTransport::new());
        let requester = Requester::new(transport.clone());
        requester.invoke(NodePath::parse("/run"), Default::default(), Arc::new(|_| {}));
        requester.set(NodePath::parse("/value"), Value::Int(3), |_| {});
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0].1, OutgoingRequest::Invoke { .. }));
        assert!(matches!(sent[1].1, OutgoingRequest::Set { .. }));
    }
}
