//! Command-line overlay on top of a loaded [`crate::config::ConfigFile`],
//! using `clap`'s builder API (`Command`/`Arg`) rather than
//! `#[derive(Parser)]`.

use clap::{Arg, ArgAction, Command};

use crate::config::ConfigFile;

fn command() -> Command {
    Command::new("dsa-link")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Distributed services architecture link runtime")
        .arg(Arg::new("broker").long("broker").help("Broker connection URL"))
        .arg(Arg::new("name").long("name").help("This link's registered name"))
        .arg(Arg::new("token").long("token").help("Broker auth token"))
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .help("trace, debug, info, warn, or error"),
        )
        .arg(Arg::new("key-file").long("key-file").help("Path to the link's .key identity file"))
        .arg(
            Arg::new("workers")
                .long("workers")
                .value_parser(clap::value_parser!(usize))
                .help("Scheduler worker thread count (0 = number of CPUs)"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("Path to dslink.json (defaults to ./dslink.json)"),
        )
        .arg(
            Arg::new("serializer-frequency-ms")
                .long("serializer-frequency-ms")
                .value_parser(clap::value_parser!(u64))
                .help("Milliseconds between nodes.json snapshots (0 = continuous)"),
        )
        .arg(
            Arg::new("serialize-values")
                .long("serialize-values")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(bool))
                .help("Whether snapshots include node values, not just metadata"),
        )
}

/// Overlays `--key=value` CLI flags onto an already-loaded [`ConfigFile`].
/// `args` excludes argv\[0\], matching `Command::get_matches_from`'s
/// convention. On `--help`/`--version` or a parse error, prints to
/// stdout/stderr and exits the process, mirroring `clap`'s own behavior for
/// a top-level `get_matches()` call.
pub fn apply_overlay(mut config: ConfigFile, args: impl IntoIterator<Item = String>) -> ConfigFile {
    let matches = match command().try_get_matches_from(
        std::iter::once("dsa-link".to_owned()).chain(args),
    ) {
        Ok(matches) => matches,
        Err(err) => err.exit(),
    };

    if let Some(value) = matches.get_one::<String>("broker") {
        config.broker = value.clone();
    }
    if let Some(value) = matches.get_one::<String>("name") {
        config.name = value.clone();
    }
    if let Some(value) = matches.get_one::<String>("token") {
        config.token = Some(value.clone());
    }
    if let Some(value) = matches.get_one::<String>("log-level") {
        config.log_level = value.clone();
    }
    if let Some(value) = matches.get_one::<String>("key-file") {
        config.key_file = value.clone();
    }
    if let Some(value) = matches.get_one::<usize>("workers") {
        config.workers = *value;
    }
    if let Some(value) = matches.get_one::<u64>("serializer-frequency-ms") {
        config.serializer.frequency_ms = *value;
    }
    if let Some(value) = matches.get_one::<bool>("serialize-values") {
        config.serializer.serialize_values = *value;
    }
    config
}

/// The `--config` override, read ahead of config-file loading so it can
/// select which file [`crate::config::FileConfigSource`] loads.
pub fn config_path_override(args: impl IntoIterator<Item = String>) -> Option<String> {
    let matches = command()
        .try_get_matches_from(std::iter::once("dsa-link".to_owned()).chain(args))
        .ok()?;
    matches.get_one::<String>("config").cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_replaces_only_the_flags_given() {
        let base = ConfigFile::default();
        let overlaid = apply_overlay(
            base.clone(),
            vec!["--broker=ws://example/conn".to_owned(), "--name=my-link".to_owned()],
        );
        assert_eq!(overlaid.broker, "ws://example/conn");
        assert_eq!(overlaid.name, "my-link");
        assert_eq!(overlaid.log_level, base.log_level);
    }

    #[test]
    fn workers_and_serializer_flags_parse_as_numbers() {
        let overlaid = apply_overlay(
            ConfigFile::default(),
            vec![
                "--workers=4".to_owned(),
                "--serializer-frequency-ms=500".to_owned(),
                "--serialize-values=false".to_owned(),
            ],
        );
        assert_eq!(overlaid.workers, 4);
        assert_eq!(overlaid.serializer.frequency_ms, 500);
        assert!(!overlaid.serializer.serialize_values);
    }

    #[test]
    fn config_path_override_reads_the_config_flag() {
        let path = config_path_override(vec!["--config=/tmp/custom.json".to_owned()]);
        assert_eq!(path.as_deref(), Some("/tmp/custom.json"));
    }
}
