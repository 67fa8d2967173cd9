//! The action invocation engine: dispatches an incoming
//! invocation to a node's [`dsa_node::Action`] callback and drives its
//! result stream through the `initialize -> open -> closed` state machine.
//!
//! The engine itself never talks to the wire: every outbound frame (a row
//! batch, an error, or a close) is handed to an injected [`ActionTransport`],
//! the same seam-by-trait-object pattern `dsa_node::action::ActionResultSink`
//! uses to keep this crate decoupled from both the node tree and the
//! (out-of-scope) wire codec.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dsa_error::{Error, ErrorKind};
use dsa_node::{Action, ActionResult, ActionResultSink, ResultShape, StreamingMode, TableModifier};
use dsa_path::NodePath;
use dsa_scheduler::Scheduler;
use dsa_value::Value;

/// Opaque per-invocation identifier, unique for the lifetime of the engine
/// that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

/// One frame an [`ActionResultStream`] hands to its [`ActionTransport`].
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Rows {
        rows: Vec<Vec<Value>>,
        mode: StreamingMode,
        modifier: Option<TableModifier>,
    },
    Error {
        message: String,
    },
    Close,
}

/// The wire-facing collaborator an [`ActionEngine`] sends invoke-response
/// frames through. Implemented by the link facade; stubbed with a channel in
/// tests.
pub trait ActionTransport: Send + Sync {
    fn send(&self, stream: StreamId, path: &NodePath, frame: OutboundFrame);
}

/// An [`ActionTransport`] that forwards every frame into an
/// [`std::sync::mpsc`] channel, for tests and simple embedders that want to
/// observe outbound frames directly.
pub struct ChannelTransport {
    sender: std::sync::mpsc::Sender<(StreamId, NodePath, OutboundFrame)>,
}

impl ChannelTransport {
    pub fn new() -> (Self, std::sync::mpsc::Receiver<(StreamId, NodePath, OutboundFrame)>) {
        let (sender, receiver) = std::sync::mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl ActionTransport for ChannelTransport {
    fn send(&self, stream: StreamId, path: &NodePath, frame: OutboundFrame) {
        let _ = self.sender.send((stream, path.clone(), frame));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Initialize,
    Open,
    Closed,
}

struct StreamInner {
    state: StreamState,
    pending: Option<ActionResult>,
}

/// One in-flight invocation's result stream.
///
/// Implements [`ActionResultSink`], which is the only surface the action's
/// callback sees; [`ActionEngine`] owns the `Arc` and also uses it to close
/// the stream on peer disconnect.
pub struct ActionResultStream {
    id: StreamId,
    path: NodePath,
    shape: ResultShape,
    transport: Arc<dyn ActionTransport>,
    inner: Mutex<StreamInner>,
}

impl ActionResultStream {
    fn new(id: StreamId, path: NodePath, shape: ResultShape, transport: Arc<dyn ActionTransport>) -> Self {
        Self {
            id,
            path,
            shape,
            transport,
            inner: Mutex::new(StreamInner {
                state: StreamState::Initialize,
                pending: None,
            }),
        }
    }

    fn send_rows(&self, result: &ActionResult) {
        self.transport.send(
            self.id,
            &self.path,
            OutboundFrame::Rows {
                rows: result.rows.clone(),
                mode: result.mode,
                modifier: result.modifier,
            },
        );
    }

    /// Transitions to `closed` and notifies the transport, unless already
    /// closed.
    fn close_locked(&self, inner: &mut StreamInner) {
        if inner.state == StreamState::Closed {
            return;
        }
        inner.state = StreamState::Closed;
        inner.pending = None;
        self.transport.send(self.id, &self.path, OutboundFrame::Close);
    }
}

impl ActionResultSink for ActionResultStream {
    fn set_result(&self, result: ActionResult) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state == StreamState::Closed {
            return Err(Error::new(ErrorKind::InvalidStream));
        }
        inner.state = StreamState::Open;

        if let Some(err) = &result.error {
            self.transport.send(
                self.id,
                &self.path,
                OutboundFrame::Error {
                    message: err.message.clone(),
                },
            );
            self.close_locked(&mut inner);
            return Ok(());
        }

        match self.shape {
            // values sends immediately and closes automatically.
            ResultShape::Values => {
                self.send_rows(&result);
                self.close_locked(&mut inner);
            }
            // table and stream shapes stage the result; commit() flushes it.
            ResultShape::Table | ResultShape::Stream => {
                inner.pending = Some(result);
            }
        }
        Ok(())
    }

    fn commit(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state != StreamState::Open {
            return false;
        }
        if self.shape == ResultShape::Values {
            // already auto-flushed and closed by set_result
            return false;
        }
        match inner.pending.take() {
            Some(result) => {
                self.send_rows(&result);
                true
            }
            None => true,
        }
    }

    fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.close_locked(&mut inner);
    }
}

/// Dispatches invocations against a node's [`Action`] and tracks every
/// in-flight [`ActionResultStream`] so a peer disconnect (or explicit
/// cancellation) can close streams it no longer owns.
pub struct ActionEngine {
    scheduler: Scheduler,
    transport: Arc<dyn ActionTransport>,
    next_id: AtomicU64,
    streams: Mutex<std::collections::HashMap<StreamId, Arc<ActionResultStream>>>,
}

impl ActionEngine {
    pub fn new(scheduler: Scheduler, transport: Arc<dyn ActionTransport>) -> Self {
        Self {
            scheduler,
            transport,
            next_id: AtomicU64::new(1),
            streams: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Validates the invoking permission, allocates a stream, and schedules
    /// the action's callback on a scheduler worker thread. Returns the
    /// new stream's id immediately; the callback runs asynchronously.
    pub fn invoke(
        &self,
        action: Action,
        path: NodePath,
        params: BTreeMap<String, Value>,
    ) -> Result<StreamId, Error> {
        action.validate_permission()?;
        for param in &action.parameters {
            if let Some(value) = params.get(&param.name) {
                if !param.value_type.accepts(value) {
                    return Err(Error::with_detail(
                        ErrorKind::InvalidValue,
                        format!("parameter {} expects {}", param.name, param.value_type),
                    ));
                }
            }
        }

        let id = StreamId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let stream = Arc::new(ActionResultStream::new(
            id,
            path.clone(),
            action.result_shape,
            self.transport.clone(),
        ));
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, stream.clone());

        let callback = action.callback.clone();
        self.scheduler.submit(move || {
            let sink: Arc<dyn ActionResultSink> = stream;
            callback(sink, path, params, None);
        });

        Ok(id)
    }

    /// Closes and deregisters a stream, e.g. on peer disconnect.
    pub fn close(&self, id: StreamId) {
        let stream = self
            .streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        if let Some(stream) = stream {
            stream.close();
        }
    }

    /// Number of streams still tracked (closed streams are removed only via
    /// [`ActionEngine::close`] or [`ActionEngine::reap_closed`]).
    pub fn open_stream_count(&self) -> usize {
        self.streams.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drops bookkeeping for any tracked stream that has already closed
    /// itself (e.g. a `values`-shape action that auto-closed after its
    /// first result).
    pub fn reap_closed(&self) {
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, stream| {
                stream.inner.lock().unwrap_or_else(|e| e.into_inner()).state != StreamState::Closed
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsa_node::{ActionColumn, ActionParameter};
    use dsa_scheduler::Scheduler as SchedulerStart;
    use dsa_value::ValueType;
    use std::time::Duration;

    fn values_action(result: ActionResult) -> Action {
        Action {
            permission: dsa_node::Permission::Read,
            group: None,
            group_subtitle: None,
            parameters: vec![ActionParameter::new("x", ValueType::Int)],
            columns: vec![ActionColumn::new("y", ValueType::Int)],
            result_shape: ResultShape::Values,
            callback: Arc::new(move |sink, _path, _params, _err| {
                sink.set_result(result.clone()).unwrap();
            }),
        }
    }

    #[test]
    fn values_shape_sends_one_frame_and_closes() {
        let guard = SchedulerStart::start(1);
        let (transport, rx) = ChannelTransport::new();
        let engine = ActionEngine::new(guard.handle(), Arc::new(transport));
        let action = values_action(ActionResult::rows(vec![vec![Value::Int(1)]]));
        engine
            .invoke(action, NodePath::parse("/do"), BTreeMap::new())
            .unwrap();

        let (_, _, frame) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(frame, OutboundFrame::Rows { .. }));
        let (_, _, frame) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(frame, OutboundFrame::Close));
        guard.shutdown();
    }

    #[test]
    fn table_shape_stages_until_commit() {
        let guard = SchedulerStart::start(1);
        let (transport, rx) = ChannelTransport::new();
        let transport = Arc::new(transport);
        let stream = Arc::new(ActionResultStream::new(
            StreamId(1),
            NodePath::parse("/t"),
            ResultShape::Table,
            transport,
        ));
        let sink: Arc<dyn ActionResultSink> = stream.clone();
        sink.set_result(ActionResult::rows(vec![vec![Value::Int(1)]]))
            .unwrap();
        assert!(rx.try_recv().is_err(), "table shape must not auto-flush");
        assert!(sink.commit());
        let (_, _, frame) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(frame, OutboundFrame::Rows { .. }));
        guard.shutdown();
    }

    #[test]
    fn table_replace_after_initial_commit() {
        let (transport, rx) = ChannelTransport::new();
        let stream = Arc::new(ActionResultStream::new(
            StreamId(1),
            NodePath::parse("/t"),
            ResultShape::Table,
            Arc::new(transport),
        ));
        let sink: Arc<dyn ActionResultSink> = stream;
        let first: Vec<Vec<Value>> = (0..5).map(|i| vec![Value::Int(i)]).collect();
        sink.set_result(ActionResult::rows(first)).unwrap();
        sink.commit();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();

        let replacement: Vec<Vec<Value>> = (0..5).map(|i| vec![Value::Int(i + 100)]).collect();
        let modifier = TableModifier::replace(0, 4).unwrap();
        sink.set_result(
            ActionResult::rows(replacement)
                .with_mode(StreamingMode::Append)
                .with_modifier(modifier),
        )
        .unwrap();
        sink.commit();
        let (_, _, frame) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        match frame {
            OutboundFrame::Rows { mode, modifier, .. } => {
                assert_eq!(mode, StreamingMode::Append);
                assert_eq!(modifier, Some(TableModifier::Replace { start: 0, end: 4 }));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn error_result_closes_regardless_of_shape() {
        let (transport, rx) = ChannelTransport::new();
        let stream = Arc::new(ActionResultStream::new(
            StreamId(1),
            NodePath::parse("/t"),
            ResultShape::Stream,
            Arc::new(transport),
        ));
        let sink: Arc<dyn ActionResultSink> = stream;
        sink.set_result(ActionResult::error("boom")).unwrap();
        let (_, _, frame) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(frame, OutboundFrame::Error { .. }));
        let (_, _, frame) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(frame, OutboundFrame::Close));
        assert!(!sink.commit());
    }

    #[test]
    fn commit_after_close_returns_false() {
        let (transport, _rx) = ChannelTransport::new();
        let stream = Arc::new(ActionResultStream::new(
            StreamId(1),
            NodePath::parse("/t"),
            ResultShape::Values,
            Arc::new(transport),
        ));
        let sink: Arc<dyn ActionResultSink> = stream;
        sink.set_result(ActionResult::rows(vec![vec![Value::Int(1)]]))
            .unwrap();
        assert!(!sink.commit());
        sink.close();
        assert!(!sink.commit());
    }

    #[test]
    fn invalid_parameter_type_rejected_before_invocation() {
        let guard = SchedulerStart::start(1);
        let (transport, _rx) = ChannelTransport::new();
        let engine = ActionEngine::new(guard.handle(), Arc::new(transport));
        let action = values_action(ActionResult::rows(vec![]));
        let mut params = BTreeMap::new();
        params.insert("x".to_owned(), Value::String("not an int".to_owned()));
        let err = engine
            .invoke(action, NodePath::parse("/do"), params)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
        guard.shutdown();
    }
}
