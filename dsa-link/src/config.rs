//! The link's configuration file and the
//! `ConfigSource` extension point it is loaded through.
//!
//! Grounded on `rt-protocol`'s pervasive `#[serde(default)]` usage and
//! `forwarder`'s config-loader split, translated from TOML to the JSON
//! document this SDK's config file uses.

use std::fs;
use std::path::{Path, PathBuf};

use dsa_error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};

fn default_broker() -> String {
    "http://127.0.0.1:8080/conn".to_owned()
}
fn default_log_level() -> String {
    "info".to_owned()
}
fn default_key_file() -> String {
    ".key".to_owned()
}
fn default_workers() -> usize {
    0
}
fn default_redo_log_path() -> String {
    ".redo".to_owned()
}
fn default_max_entries_per_file() -> u64 {
    1024
}
fn default_flush_after_write() -> bool {
    true
}
fn default_automatic_recovery() -> bool {
    true
}
fn default_write_encrypted_values() -> bool {
    true
}
fn default_min_available_disk_space_mb() -> u64 {
    50
}
fn default_qos_queue_length() -> usize {
    1024
}
fn default_max_send_queue_length() -> u64 {
    8
}
fn default_serializer_frequency_ms() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}

/// `ssl` sub-object. Certificate verification itself is out of
/// scope; these fields are carried so a host's transport layer
/// can read them, not acted on by this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SslConfig {
    pub self_signed_allowed: bool,
    pub certs_path: Option<String>,
    pub ca_file: Option<String>,
    pub cipher_list: Option<String>,
    #[serde(default = "default_true")]
    pub verify_peer: bool,
}

impl Default for SslConfig {
    fn default() -> Self {
        Self {
            self_signed_allowed: false,
            certs_path: None,
            ca_file: None,
            cipher_list: None,
            verify_peer: true,
        }
    }
}

/// `redo_log` sub-object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedoLogFileConfig {
    #[serde(default = "default_redo_log_path")]
    pub path: String,
    #[serde(default = "default_max_entries_per_file")]
    pub max_entries_per_file: u64,
    pub max_size_per_file_bytes: u64,
    pub max_files_per_log: u64,
    #[serde(default = "default_flush_after_write")]
    pub flush_after_write: bool,
    #[serde(default = "default_automatic_recovery")]
    pub automatic_recovery: bool,
    #[serde(default = "default_write_encrypted_values")]
    pub write_encrypted_values: bool,
    #[serde(default = "default_min_available_disk_space_mb")]
    pub min_available_disk_space_threshold_mb: u64,
}

impl Default for RedoLogFileConfig {
    fn default() -> Self {
        Self {
            path: default_redo_log_path(),
            max_entries_per_file: default_max_entries_per_file(),
            max_size_per_file_bytes: 0,
            max_files_per_log: 0,
            flush_after_write: true,
            automatic_recovery: true,
            write_encrypted_values: true,
            min_available_disk_space_threshold_mb: default_min_available_disk_space_mb(),
        }
    }
}

/// `qos` sub-object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QosFileConfig {
    #[serde(default = "default_qos_queue_length")]
    pub default_queue_length: usize,
}

impl Default for QosFileConfig {
    fn default() -> Self {
        Self {
            default_queue_length: default_qos_queue_length(),
        }
    }
}

/// `serializer` sub-object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializerFileConfig {
    #[serde(default = "default_serializer_frequency_ms")]
    pub frequency_ms: u64,
    #[serde(default = "default_true")]
    pub serialize_values: bool,
}

impl Default for SerializerFileConfig {
    fn default() -> Self {
        Self {
            frequency_ms: default_serializer_frequency_ms(),
            serialize_values: true,
        }
    }
}

/// The full configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    #[serde(default = "default_broker")]
    pub broker: String,
    pub name: String,
    pub token: Option<String>,
    #[serde(rename = "log-level", default = "default_log_level")]
    pub log_level: String,
    #[serde(rename = "key-file", default = "default_key_file")]
    pub key_file: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    pub ssl: SslConfig,
    pub redo_log: RedoLogFileConfig,
    pub qos: QosFileConfig,
    #[serde(default = "default_max_send_queue_length")]
    pub max_send_queue_length: u64,
    pub serializer: SerializerFileConfig,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            broker: default_broker(),
            name: "dsa-link".to_owned(),
            token: None,
            log_level: default_log_level(),
            key_file: default_key_file(),
            workers: default_workers(),
            ssl: SslConfig::default(),
            redo_log: RedoLogFileConfig::default(),
            qos: QosFileConfig::default(),
            max_send_queue_length: default_max_send_queue_length(),
            serializer: SerializerFileConfig::default(),
        }
    }
}

/// Extension point for loading a [`ConfigFile`] from somewhere other than
/// the working directory's default file.
pub trait ConfigSource {
    fn load(&self) -> Result<ConfigFile, Error>;
}

/// Reads `dslink.json` relative to a base directory, falling back to
/// [`ConfigFile::default`] if the file is absent.
pub struct FileConfigSource {
    pub path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join("dslink.json"),
        }
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<ConfigFile, Error> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| Error::with_detail(ErrorKind::InvalidDslinkJson, e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
            Err(e) => Err(Error::with_detail(ErrorKind::InternalError, e.to_string())),
        }
    }
}
