//! Command-line interface handling for the multiverse server.
//!
//! Arguments override the matching configuration file settings.

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the seed generator executable
    pub seedgen_path: Option<PathBuf>,
    /// Optional override for the handler tick interval in milliseconds
    pub tick_interval_ms: Option<u64>,
}

impl CliArgs {
    /// Parses the process arguments. Exits with usage on invalid input.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            seedgen_path: matches.get_one::<String>("seedgen-path").map(PathBuf::from),
            tick_interval_ms: matches.get_one::<u64>("tick-interval").copied(),
        }
    }
}

fn command() -> Command {
    Command::new("Multiverse Server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Real-time multiverse session backend")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
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
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("seedgen-path")
                .short('s')
                .long("seedgen-path")
                .value_name("FILE")
                .help("Seed generator executable (overrides SEEDGEN_PATH)"),
        )
        .arg(
            Arg::new("tick-interval")
                .long("tick-interval")
                .value_name("MS")
                .help("Game handler tick interval in milliseconds")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["multiverse"]).unwrap();
        assert_eq!(args.config_path, PathBuf::from("config.toml"));
        assert_eq!(args.log_level, None);
        assert!(!args.json_logs);
        assert_eq!(args.seedgen_path, None);
    }

    #[test]
    fn test_overrides() {
        let args = CliArgs::try_parse_from([
            "multiverse",
            "--config",
            "prod.toml",
            "-l",
            "debug",
            "--json-logs",
            "--seedgen-path",
            "/opt/seedgen",
            "--tick-interval",
            "250",
        ])
        .unwrap();

        assert_eq!(args.config_path, PathBuf::from("prod.toml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert_eq!(args.seedgen_path, Some(PathBuf::from("/opt/seedgen")));
        assert_eq!(args.tick_interval_ms, Some(250));
    }

    #[test]
    fn test_rejects_non_numeric_tick_interval() {
        assert!(CliArgs::try_parse_from(["multiverse", "--tick-interval", "fast"]).is_err());
    }
}
