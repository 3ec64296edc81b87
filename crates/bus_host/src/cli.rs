//! Command-line interface handling for the bus host.
//!
//! Every option overrides the matching setting from the configuration file.

use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the host platform
    pub platform: Option<String>,
    /// Optional override for the plugins to enable
    pub plugins: Option<Vec<String>>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Keep running after the demo until a shutdown signal arrives
    pub wait: bool,
}

impl CliArgs {
    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    fn command() -> Command {
        Command::new("Plugin Event Bus Host")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Runs plugins against the plugin event bus")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("bus_host.toml"),
            )
            .arg(
                Arg::new("platform")
                    .short('p')
                    .long("platform")
                    .value_name("PLATFORM")
                    .help("Host platform (sponge, velocity, bukkit, forge, fabric, bungeecord)"),
            )
            .arg(
                Arg::new("plugins")
                    .long("plugins")
                    .value_name("NAMES")
                    .value_delimiter(',')
                    .help("Comma-separated plugins to enable"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("wait")
                    .short('w')
                    .long("wait")
                    .help("Wait for Ctrl+C before shutting down")
                    .action(ArgAction::SetTrue),
            )
    }

    fn from_matches(matches: &clap::ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("bus_host.toml")),
            platform: matches.get_one::<String>("platform").cloned(),
            plugins: matches
                .get_many::<String>("plugins")
                .map(|names| names.cloned().collect()),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            wait: matches.get_flag("wait"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_from(args: &[&str]) -> CliArgs {
        CliArgs::from_matches(&CliArgs::command().get_matches_from(args.iter().copied()))
    }

    #[test]
    fn defaults_leave_overrides_empty() {
        let args = parse_from(&["bus_host"]);

        assert_eq!(args.config_path, PathBuf::from("bus_host.toml"));
        assert!(args.platform.is_none());
        assert!(args.plugins.is_none());
        assert!(!args.json_logs);
        assert!(!args.wait);
    }

    #[test]
    fn plugin_list_is_split_on_commas() {
        let args = parse_from(&[
            "bus_host",
            "--platform",
            "bungeecord",
            "--plugins",
            "economy-audit,chat-filter",
            "--json-logs",
        ]);

        assert_eq!(args.platform.as_deref(), Some("bungeecord"));
        assert_eq!(
            args.plugins,
            Some(vec!["economy-audit".to_string(), "chat-filter".to_string()])
        );
        assert!(args.json_logs);
    }
}
