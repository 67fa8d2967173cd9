//! Demonstrates the requester-side API: list, persistent subscribe, and
//! invoke, translated from the SDK's own `requester` example
//! (`examples/requester/requester_link.h`).
//!
//! The wire codec is out of scope for this SDK, so this demo's
//! [`dsa_link::RequesterTransport`] just logs the frames it would otherwise
//! hand to a broker connection, then feeds back locally-fabricated
//! responses through [`dsa_requester::RequesterStreamTable`] to show how
//! the demux dispatches them to callbacks.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::sync::Arc;

use dsa_action::{ActionTransport, OutboundFrame, StreamId};
use dsa_link::{Link, LinkOptions, LinkRole, OutgoingRequest, RequesterTransport};
use dsa_path::NodePath;
use dsa_requester::{InvokeResponse, ListResponse, RequestId, RequesterStreamMode, SubscriptionUpdate};
use dsa_value::Value;

struct NullActionTransport;

impl ActionTransport for NullActionTransport {
    fn send(&self, _stream: StreamId, _path: &NodePath, _frame: OutboundFrame) {}
}

/// Logs every outgoing frame instead of framing it onto a broker
/// connection, matching `simple-responder`'s `LoggingActionTransport`.
struct LoggingRequesterTransport;

impl RequesterTransport for LoggingRequesterTransport {
    fn send(&self, id: RequestId, request: OutgoingRequest) {
        tracing::info!(?id, ?request, "outgoing request");
    }
}

fn main() {
    let source = dsa_link::FileConfigSource::in_dir(".");
    let config = dsa_link::ConfigSource::load(&source).unwrap_or_default();
    let config = dsa_link::cli::apply_overlay(config, std::env::args().skip(1));

    let link = Link::new(
        config,
        LinkOptions {
            role: LinkRole::Requester,
            home_dir: ".".into(),
        },
        Arc::new(NullActionTransport),
        Arc::new(LoggingRequesterTransport),
    )
    .expect("link construction failed");

    tracing::info!(version = ?link.get_version_info(), "requester-demo starting");

    let requester = link.requester().expect("requester role");

    let responder_root = NodePath::parse("/downstream/Responder-Link");
    let seq_path = responder_root.clone().join("seq");
    let echo_path = responder_root.clone().join("echo");

    let list_id = requester.list(
        responder_root.clone(),
        Arc::new(|response: ListResponse| {
            tracing::info!(?response, "list response");
        }),
    );

    // Persistent QoS delivery lives in the subscription engine the broker
    // connection feeds, not in the requester table itself, so the demo
    // only shows the demux here.
    let subscribe_id = requester.subscribe(
        seq_path.clone(),
        |ack| {
            tracing::info!(?ack, "subscribe ack for /seq");
        },
        Arc::new(|update: SubscriptionUpdate| {
            tracing::info!(?update, "subscription update for /seq");
        }),
    );

    let m: BTreeMap<String, Value> = BTreeMap::from([(
        "Input".to_owned(),
        Value::String("Hello from the requester demo".to_owned()),
    )]);
    let invoke_id = requester.invoke(
        echo_path.clone(),
        m,
        Arc::new(|response: InvokeResponse| {
            tracing::info!(?response, "invoke response from /echo");
        }),
    );

    // With no real broker connected, fabricate the three responses the
    // original example's console output walks through, so running this
    // demo standalone still exercises the stream-table demux end to end.
    let table = requester.table();
    let _ = table.dispatch_list(
        list_id,
        ListResponse {
            path: responder_root.clone(),
            children: vec!["seq".to_owned(), "echo".to_owned()],
            removed: vec![],
        },
    );
    let _ = table.dispatch_subscribe_ack(subscribe_id, Ok(()));
    let _ = table.dispatch_subscribe_update(
        subscribe_id,
        SubscriptionUpdate {
            path: seq_path,
            value: Value::Int(1),
            timestamp: chrono::Utc::now(),
        },
    );
    let _ = table.dispatch_invoke(
        invoke_id,
        InvokeResponse {
            rows: vec![vec![Value::Bool(true), Value::String("Hello from the requester demo".to_owned())]],
            mode: RequesterStreamMode::Refresh,
            modifier: None,
            error: None,
        },
        true,
    );

    println!("requester-demo is up; press Enter to shut down");
    let _ = std::io::stdin().lock().lines().next();

    link.shutdown();
}
