#![deny(unsafe_code)]

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::{env, io};

use daemon::cli::{self, CliOptions};
use daemon::config::Config;
use daemon::{paths, DaemonResult};
use storage::Database;
use versioning::{VersionStore, VersioningConfig};

fn main() -> ExitCode {
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    ExitCode::from(run_with(env::args_os(), &mut stdout, &mut stderr))
}

fn run_with<I, Out, Err>(args: I, stdout: &mut Out, stderr: &mut Err) -> u8
where
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
    Out: Write,
    Err: Write,
{
    let options = match cli::parse_args(args) {
        Ok(cli::Parsed::Options(options)) => options,
        Ok(cli::Parsed::Exit(text)) => {
            let _ = writeln!(stdout, "{text}");
            return 0;
        }
        Err(err) => {
            let _ = writeln!(stderr, "{err}");
            return 1;
        }
    };

    if options.generate_code {
        let _ = writeln!(stdout, "{}", daemon::generate_session_code());
        return 0;
    }

    daemon::init_logging();
    match bootstrap(&options) {
        Ok(summary) => {
            let _ = writeln!(stdout, "{summary}");
            0
        }
        Err(err) => {
            let _ = writeln!(stderr, "initialization failed: {err}");
            1
        }
    }
}

/// Stands the core up: config, persistence, version store. The
/// transport, watcher, and IPC collaborators are supplied by the
/// deployment behind the seams in [`daemon::plugins`].
fn bootstrap(options: &CliOptions) -> DaemonResult<String> {
    let base = match &options.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let config = cli::apply_overrides(base, options)?;

    let db_path = options.db.clone().unwrap_or_else(paths::database_path);
    let db = Arc::new(Database::open(&db_path)?);
    db.add_watched_folder(&config.watch_directory.display().to_string())?;

    let _versions = Arc::new(VersionStore::new(
        &config.watch_directory,
        VersioningConfig::default(),
    )?);

    tracing::info!(
        watch_dir = %config.watch_directory.display(),
        tcp_port = config.tcp_port,
        discovery_port = config.discovery_port,
        db = %db_path.display(),
        "core initialized"
    );
    Ok(format!(
        "sentinel core initialized (watch={}, db={}, schema v{})",
        config.watch_directory.display(),
        db_path.display(),
        db.schema_version()?
    ))
}

#[cfg(test)]
mod tests {
    use super::run_with;

    #[test]
    fn generate_code_prints_and_succeeds() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let exit = run_with(
            ["sentinel-fsd", "--generate-code"],
            &mut stdout,
            &mut stderr,
        );
        assert_eq!(exit, 0);
        assert_eq!(String::from_utf8_lossy(&stdout).trim().len(), 6);
        assert!(stderr.is_empty());
    }

    #[test]
    fn help_exits_zero_with_usage() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let exit = run_with(["sentinel-fsd", "--help"], &mut stdout, &mut stderr);
        assert_eq!(exit, 0);
        assert!(String::from_utf8_lossy(&stdout).contains("sentinel-fsd"));
    }

    #[test]
    fn bad_flags_fail_with_diagnostics() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let exit = run_with(
            ["sentinel-fsd", "--port", "bogus"],
            &mut stdout,
            &mut stderr,
        );
        assert_eq!(exit, 1);
        assert!(!stderr.is_empty());
    }

    #[test]
    fn bootstrap_initializes_state_in_a_temp_dir() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let db_path = tmp.path().join("state/sentinel.db");
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let exit = run_with(
            [
                "sentinel-fsd".to_owned(),
                "--dir".to_owned(),
                tmp.path().display().to_string(),
                "--db".to_owned(),
                db_path.display().to_string(),
            ],
            &mut stdout,
            &mut stderr,
        );
        assert_eq!(exit, 0, "stderr: {}", String::from_utf8_lossy(&stderr));
        assert!(db_path.exists());
        assert!(tmp.path().join(".sentinel_versions").exists());
    }
}
