//! [`Link`]: the top-level facade a host application constructs, combining
//! configuration loading, logging, the scheduler, and the responder and/or
//! requester roles behind one handle.

use std::path::PathBuf;
use std::sync::Arc;

use dsa_action::ActionTransport;
use dsa_error::{Error, ErrorKind};
use dsa_log::UiLogger;
use dsa_redo_log::{RedoLogConfig, RedoLogStore};
use dsa_scheduler::{Scheduler, SchedulerGuard};
use dsa_subscription::SubscriptionEngineConfig;
use uuid::Uuid;

use crate::config::ConfigFile;
use crate::requester::{Requester, RequesterTransport};
use crate::responder::Responder;

/// Ring-buffer capacity for the [`Link`]'s [`UiLogger`].
const UI_LOG_BUFFER_CAPACITY: usize = 256;

/// Which role(s) a [`Link`] plays on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Responder,
    Requester,
    Both,
}

/// Construction-time options for a [`Link`], independent of the loaded
/// config file (home directory, scheduler worker count override, and the
/// role this process plays).
pub struct LinkOptions {
    pub role: LinkRole,
    pub home_dir: PathBuf,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            role: LinkRole::Both,
            home_dir: PathBuf::from("."),
        }
    }
}

/// Version information a host can surface in its own UI or logs.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    pub sdk_version: &'static str,
    pub link_name: String,
    pub protocol_version: &'static str,
}

/// The assembled link: scheduler, optional responder, optional requester,
/// and the identity/config it was built from.
pub struct Link {
    config: ConfigFile,
    key: Uuid,
    ui_logger: UiLogger<String>,
    scheduler_guard: Option<SchedulerGuard>,
    scheduler: Scheduler,
    responder: Option<Arc<Responder>>,
    requester: Option<Requester>,
}

impl Link {
    /// Assembles a link from an already-loaded and CLI-overlaid
    /// [`ConfigFile`] (see [`crate::config::ConfigSource`] and
    /// [`crate::cli::apply_overlay`] for how a host typically produces one):
    /// installs logging, starts the scheduler, runs startup deserialization
    /// for a responder role, and constructs the role(s) requested by
    /// `options`.
    pub fn new(
        config: ConfigFile,
        options: LinkOptions,
        action_transport: Arc<dyn ActionTransport>,
        requester_transport: Arc<dyn RequesterTransport>,
    ) -> Result<Self, Error> {
        crate::logging::init_tracing(&config.log_level);
        let ui_logger = crate::logging::ui_logger(UI_LOG_BUFFER_CAPACITY);

        let key = crate::key::load_or_create(&options.home_dir.join(&config.key_file))?;

        let guard = Scheduler::start(config.workers);
        let scheduler = guard.handle();

        let redo = Arc::new(RedoLogStore::new(RedoLogConfig {
            base_dir: options.home_dir.join(&config.redo_log.path),
            max_entries_per_file: config.redo_log.max_entries_per_file,
            max_size_per_file_bytes: config.redo_log.max_size_per_file_bytes,
            max_files_per_log: config.redo_log.max_files_per_log,
            flush_after_write: config.redo_log.flush_after_write,
            automatic_recovery: config.redo_log.automatic_recovery,
            write_encrypted_values: config.redo_log.write_encrypted_values,
            min_available_disk_space_threshold_mb: config
                .redo_log
                .min_available_disk_space_threshold_mb,
        }));

        let responder = match options.role {
            LinkRole::Responder | LinkRole::Both => {
                let responder = Arc::new(Responder::new(
                    scheduler.clone(),
                    SubscriptionEngineConfig {
                        default_queue_length: config.qos.default_queue_length,
                        max_send_queue_length: config.max_send_queue_length,
                    },
                    redo,
                    action_transport,
                ));

                let snapshot_path = options.home_dir.join("nodes.json");
                let nodes = dsa_serializer::read_snapshot(&snapshot_path)?;
                responder.apply_snapshot(nodes);

                Some(responder)
            }
            LinkRole::Requester => None,
        };

        if let Some(responder) = &responder {
            let serializer_config = dsa_serializer::SerializerConfig {
                interval_ms: config.serializer.frequency_ms,
                serialize_values: config.serializer.serialize_values,
                path: options.home_dir.join("nodes.json"),
            };
            let responder_for_snapshot = responder.clone();
            dsa_serializer::schedule_periodic(&scheduler, serializer_config, move || {
                responder_for_snapshot.snapshot_tree()
            });
        }

        let requester = match options.role {
            LinkRole::Requester | LinkRole::Both => Some(Requester::new(requester_transport)),
            LinkRole::Responder => None,
        };

        Ok(Self {
            config,
            key,
            ui_logger,
            scheduler_guard: Some(guard),
            scheduler,
            responder,
            requester,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// This link's persisted `.key` identity, loaded or created by
    /// [`crate::key::load_or_create`] at construction time.
    pub fn key(&self) -> Uuid {
        self.key
    }

    /// The ring-buffered logger a host UI can read recent log lines from,
    /// independent of the process-wide `tracing` subscriber.
    pub fn ui_logger(&self) -> &UiLogger<String> {
        &self.ui_logger
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Returns the responder handle, or a role-mismatch error if this link
    /// was not constructed with a responder role.
    pub fn responder(&self) -> Result<&Responder, Error> {
        self.responder
            .as_deref()
            .ok_or_else(|| Error::new(ErrorKind::InvalidLinkTypeSpecified))
    }

    pub fn requester(&self) -> Result<&Requester, Error> {
        self.requester
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::InvalidLinkTypeSpecified))
    }

    pub fn get_version_info(&self) -> VersionInfo {
        VersionInfo {
            sdk_version: env!("CARGO_PKG_VERSION"),
            link_name: self.config.name.clone(),
            protocol_version: "1.1.2",
        }
    }

    /// Shuts down the scheduler, draining any in-flight tasks. Consumes
    /// `self` since a link cannot be used afterward.
    pub fn shutdown(mut self) {
        if let Some(guard) = self.scheduler_guard.take() {
            guard.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileConfigSource;
    use crate::requester::OutgoingRequest;
    use dsa_action::{OutboundFrame, StreamId};
    use dsa_path::NodePath;
    use dsa_requester::RequestId;

    struct NullActionTransport;
    impl ActionTransport for NullActionTransport {
        fn send(&self, _stream: StreamId, _path: &NodePath, _frame: OutboundFrame) {}
    }

    struct NullRequesterTransport;
    impl RequesterTransport for NullRequesterTransport {
        fn send(&self, _id: RequestId, _request: OutgoingRequest) {}
    }

    #[test]
    fn both_role_exposes_responder_and_requester() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = FileConfigSource::in_dir(dir.path());
        let config = source.load().unwrap();
        let link = Link::new(
            config,
            LinkOptions {
                role: LinkRole::Both,
                home_dir: dir.path().to_path_buf(),
            },
            Arc::new(NullActionTransport),
            Arc::new(NullRequesterTransport),
        )
        .unwrap();
        assert!(link.responder().is_ok());
        assert!(link.requester().is_ok());
        link.shutdown();
    }

    #[test]
    fn responder_only_role_rejects_requester_access() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = FileConfigSource::in_dir(dir.path());
        let config = source.load().unwrap();
        let link = Link::new(
            config,
            LinkOptions {
                role: LinkRole::Responder,
                home_dir: dir.path().to_path_buf(),
            },
            Arc::new(NullActionTransport),
            Arc::new(NullRequesterTransport),
        )
        .unwrap();
        assert!(link.responder().is_ok());
        let err = link.requester().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidLinkTypeSpecified);
        link.shutdown();
    }

    #[test]
    fn version_info_reports_configured_name() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = FileConfigSource::in_dir(dir.path());
        let mut config = source.load().unwrap();
        config.name = "probe-link".to_owned();
        let link = Link::new(
            config,
            LinkOptions {
                role: LinkRole::Both,
                home_dir: dir.path().to_path_buf(),
            },
            Arc::new(NullActionTransport),
            Arc::new(NullRequesterTransport),
        )
        .unwrap();
        assert_eq!(link.get_version_info().link_name, "probe-link");
        link.shutdown();
    }

    #[test]
    fn key_file_is_loaded_and_persisted_across_restarts() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = FileConfigSource::in_dir(dir.path());
        let config = source.load().unwrap();
        let link = Link::new(
            config.clone(),
            LinkOptions {
                role: LinkRole::Both,
                home_dir: dir.path().to_path_buf(),
            },
            Arc::new(NullActionTransport),
            Arc::new(NullRequesterTransport),
        )
        .unwrap();
        let first_key = link.key();
        link.ui_logger().log("first run");
        link.shutdown();

        let link = Link::new(
            config,
            LinkOptions {
                role: LinkRole::Both,
                home_dir: dir.path().to_path_buf(),
            },
            Arc::new(NullActionTransport),
            Arc::new(NullRequesterTransport),
        )
        .unwrap();
        assert_eq!(link.key(), first_key, "the .key identity must survive a restart");
        link.shutdown();
    }
}
