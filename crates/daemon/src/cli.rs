//! Command-line surface of the daemon binary.

use std::path::PathBuf;

use clap::{Arg, ArgAction, Command};

use crate::config::{expand_tilde, normalize_session_code, Config};
use crate::{DaemonError, DaemonResult};

/// Parsed command-line options; every field overrides the config file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CliOptions {
    /// Configuration file to load before applying overrides.
    pub config: Option<PathBuf>,
    /// Transfer port override.
    pub port: Option<u16>,
    /// Discovery port override.
    pub discovery: Option<u16>,
    /// Watch directory override.
    pub dir: Option<PathBuf>,
    /// Session code override.
    pub session_code: Option<String>,
    /// Print a fresh session code and exit.
    pub generate_code: bool,
    /// Force transport encryption on.
    pub encrypt: bool,
    /// Upload cap override.
    pub upload_limit: Option<u64>,
    /// Download cap override.
    pub download_limit: Option<u64>,
    /// Metrics port override.
    pub metrics_port: Option<u16>,
    /// Runtime socket override.
    pub socket: Option<PathBuf>,
    /// Database path override.
    pub db: Option<PathBuf>,
}

/// Builds the clap command definition.
#[must_use]
pub fn command() -> Command {
    Command::new("sentinel-fsd")
        .about("Peer-to-peer delta-sync daemon")
        .arg(Arg::new("config").long("config").value_name("PATH"))
        .arg(Arg::new("port").long("port").value_name("PORT"))
        .arg(Arg::new("discovery").long("discovery").value_name("PORT"))
        .arg(Arg::new("dir").long("dir").value_name("DIR"))
        .arg(
            Arg::new("session-code")
                .long("session-code")
                .value_name("CODE"),
        )
        .arg(
            Arg::new("generate-code")
                .long("generate-code")
                .action(ArgAction::SetTrue),
        )
        .arg(Arg::new("encrypt").long("encrypt").action(ArgAction::SetTrue))
        .arg(
            Arg::new("upload-limit")
                .long("upload-limit")
                .value_name("KBPS"),
        )
        .arg(
            Arg::new("download-limit")
                .long("download-limit")
                .value_name("KBPS"),
        )
        .arg(
            Arg::new("metrics-port")
                .long("metrics-port")
                .value_name("PORT"),
        )
        .arg(Arg::new("socket").long("socket").value_name("PATH"))
        .arg(Arg::new("db").long("db").value_name("PATH"))
}

/// Result of argument parsing: either options to run with, or text
/// (help/version) to print before exiting successfully.
#[derive(Clone, Debug)]
pub enum Parsed {
    /// Normal invocation.
    Options(CliOptions),
    /// `--help`-style output; print and exit 0.
    Exit(String),
}

/// Parses an argument list, routing help output to [`Parsed::Exit`].
pub fn parse_args<I, S>(args: I) -> DaemonResult<Parsed>
where
    I: IntoIterator<Item = S>,
    S: Into<std::ffi::OsString> + Clone,
{
    let matches = match command().try_get_matches_from(args) {
        Ok(matches) => matches,
        Err(err)
            if matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            return Ok(Parsed::Exit(err.to_string()));
        }
        Err(err) => return Err(DaemonError::Config(err.to_string())),
    };
    Ok(Parsed::Options(options_from_matches(&matches)?))
}

/// Parses options from an argument list (first element is argv[0]).
pub fn parse_from<I, S>(args: I) -> DaemonResult<CliOptions>
where
    I: IntoIterator<Item = S>,
    S: Into<std::ffi::OsString> + Clone,
{
    let matches = command()
        .try_get_matches_from(args)
        .map_err(|err| DaemonError::Config(err.to_string()))?;
    options_from_matches(&matches)
}

fn options_from_matches(matches: &clap::ArgMatches) -> DaemonResult<CliOptions> {
    Ok(CliOptions {
        config: matches.get_one::<String>("config").map(|v| expand_tilde(v)),
        port: parse_opt(&matches, "port")?,
        discovery: parse_opt(&matches, "discovery")?,
        dir: matches.get_one::<String>("dir").map(|v| expand_tilde(v)),
        session_code: matches
            .get_one::<String>("session-code")
            .map(|code| normalize_session_code(code))
            .transpose()?,
        generate_code: matches.get_flag("generate-code"),
        encrypt: matches.get_flag("encrypt"),
        upload_limit: parse_opt(&matches, "upload-limit")?,
        download_limit: parse_opt(&matches, "download-limit")?,
        metrics_port: parse_opt(&matches, "metrics-port")?,
        socket: matches.get_one::<String>("socket").map(PathBuf::from),
        db: matches.get_one::<String>("db").map(PathBuf::from),
    })
}

/// Applies CLI overrides on top of a loaded config and revalidates.
pub fn apply_overrides(mut config: Config, options: &CliOptions) -> DaemonResult<Config> {
    if let Some(port) = options.port {
        config.tcp_port = port;
    }
    if let Some(port) = options.discovery {
        config.discovery_port = port;
    }
    if let Some(dir) = &options.dir {
        config.watch_directory = dir.clone();
    }
    if let Some(code) = &options.session_code {
        config.session_code = Some(code.clone());
    }
    if options.encrypt {
        config.encryption_enabled = true;
    }
    if let Some(limit) = options.upload_limit {
        config.upload_limit_kbps = limit;
    }
    if let Some(limit) = options.download_limit {
        config.download_limit_kbps = limit;
    }
    if let Some(port) = options.metrics_port {
        config.metrics_port = port;
    }
    config.validate()?;
    Ok(config)
}

fn parse_opt<T: std::str::FromStr>(
    matches: &clap::ArgMatches,
    name: &str,
) -> DaemonResult<Option<T>> {
    matches
        .get_one::<String>(name)
        .map(|raw| {
            raw.parse()
                .map_err(|_| DaemonError::Config(format!("--{name}: invalid value {raw:?}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse_into_options() {
        let options = parse_from([
            "sentinel-fsd",
            "--port",
            "9000",
            "--discovery",
            "9001",
            "--dir",
            "/srv/sync",
            "--session-code",
            "abc123",
            "--encrypt",
            "--upload-limit",
            "256",
        ])
        .expect("parse");

        assert_eq!(options.port, Some(9000));
        assert_eq!(options.discovery, Some(9001));
        assert_eq!(options.dir.as_deref(), Some(std::path::Path::new("/srv/sync")));
        assert_eq!(options.session_code.as_deref(), Some("ABC123"));
        assert!(options.encrypt);
        assert_eq!(options.upload_limit, Some(256));
        assert!(!options.generate_code);
    }

    #[test]
    fn generate_code_flag_is_detected() {
        let options = parse_from(["sentinel-fsd", "--generate-code"]).expect("parse");
        assert!(options.generate_code);
    }

    #[test]
    fn invalid_numbers_error_out() {
        assert!(parse_from(["sentinel-fsd", "--port", "not-a-port"]).is_err());
    }

    #[test]
    fn overrides_replace_config_values() {
        let config = Config::default();
        let options = parse_from([
            "sentinel-fsd",
            "--port",
            "7000",
            "--session-code",
            "zz99zz",
            "--encrypt",
        ])
        .expect("parse");

        let merged = apply_overrides(config, &options).expect("merge");
        assert_eq!(merged.tcp_port, 7000);
        assert_eq!(merged.session_code.as_deref(), Some("ZZ99ZZ"));
        assert!(merged.encryption_enabled);
    }

    #[test]
    fn encrypt_without_code_fails_merge_validation() {
        let options = parse_from(["sentinel-fsd", "--encrypt"]).expect("parse");
        assert!(apply_overrides(Config::default(), &options).is_err());
    }
}
