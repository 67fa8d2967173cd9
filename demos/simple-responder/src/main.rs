//! Demonstrates the responder-side API: node/value/action creation and
//! stream handling, translated from the SDK's own `simple_responder`
//! example (`examples/simple_responder/main.cpp`).
//!
//! The wire codec is out of scope for this SDK, so this demo's
//! [`dsa_action::ActionTransport`] just logs the frames it would otherwise
//! hand to a broker connection.

use std::io::BufRead;
use std::sync::Arc;

use dsa_action::{ActionTransport, OutboundFrame, StreamId};
use dsa_link::{CreateOrSetValueDescription, Link, LinkOptions, LinkRole};
use dsa_node::{Action, ActionColumn, ActionParameter, Permission, ResultShape, Writable};
use dsa_path::NodePath;
use dsa_value::{Value, ValueType};

struct LoggingActionTransport;

impl ActionTransport for LoggingActionTransport {
    fn send(&self, stream: StreamId, path: &NodePath, frame: OutboundFrame) {
        tracing::info!(?stream, %path, ?frame, "action frame");
    }
}

struct LoggingRequesterTransport;

impl dsa_link::RequesterTransport for LoggingRequesterTransport {
    fn send(&self, id: dsa_requester::RequestId, request: dsa_link::OutgoingRequest) {
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
            role: LinkRole::Responder,
            home_dir: ".".into(),
        },
        Arc::new(LoggingActionTransport),
        Arc::new(LoggingRequesterTransport),
    )
    .expect("link construction failed");

    tracing::info!(version = ?link.get_version_info(), "simple-responder starting");

    let responder = link.responder().expect("responder role");

    let text_path = NodePath::parse("/text");

    responder
        .build(NodePath::root(), |builder| {
            builder
                .make_node("sdk_version")
                .display_name("SDK Version")
                .value_type(ValueType::String)
                .value(Value::String(link.get_version_info().sdk_version.to_owned()));

            builder
                .make_node("text")
                .display_name("String")
                .value_type(ValueType::String)
                .value(Value::String("Hello, World!".to_owned()))
                .writable(Writable::Write);

            builder.make_node("set_text").display_name("Set Text").action(Action {
                permission: Permission::Read,
                group: None,
                group_subtitle: None,
                parameters: vec![ActionParameter::new("String", ValueType::String)],
                columns: vec![
                    ActionColumn::new("Success", ValueType::Bool),
                    ActionColumn::new("Message", ValueType::String),
                ],
                result_shape: ResultShape::Values,
                callback: Arc::new(move |sink, _parent_path, params, _ec| {
                    let result = match params.get("String") {
                        Some(Value::String(text)) => {
                            tracing::info!(text, "set_text invoked");
                            dsa_node::ActionResult::rows(vec![vec![
                                Value::Bool(true),
                                Value::String(text.clone()),
                            ]])
                        }
                        _ => dsa_node::ActionResult::rows(vec![vec![
                            Value::Bool(false),
                            Value::String("Could not set value".to_owned()),
                        ]]),
                    };
                    let _ = sink.set_result(result);
                }),
            });
        })
        .expect("initial node hierarchy failed");

    responder
        .create_node_or_set_value(CreateOrSetValueDescription::minimal(
            text_path.clone(),
            ValueType::String,
            Value::String("Hello, World!".to_owned()),
        ))
        .expect("set text on connect failed");

    println!("simple-responder is up; press Enter to shut down");
    let _ = std::io::stdin().lock().lines().next();

    link.shutdown();
}
