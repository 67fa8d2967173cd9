//! Link facade: configuration loading, CLI overlay, logging wiring, and the
//! responder/requester roles of a DSA link.

pub mod cli;
pub mod config;
pub mod key;
pub mod link;
pub mod logging;
pub mod requester;
pub mod responder;

pub use config::{ConfigFile, ConfigSource, FileConfigSource};
pub use link::{Link, LinkOptions, LinkRole, VersionInfo};
pub use requester::{OutgoingRequest, Requester, RequesterTransport};
pub use responder::{CreateOrSetValueDescription, Responder};
