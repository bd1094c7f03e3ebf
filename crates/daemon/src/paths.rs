//! XDG-aware resolution of state paths.

use std::path::PathBuf;

/// Resolves the database path.
///
/// Precedence: `SENTINEL_DB_PATH`, then `$XDG_DATA_HOME/sentinelfs/
/// sentinel.db`, then `~/.local/share/sentinelfs/sentinel.db`.
#[must_use]
pub fn database_path() -> PathBuf {
    if let Ok(explicit) = std::env::var("SENTINEL_DB_PATH") {
        if !explicit.is_empty() {
            return PathBuf::from(explicit);
        }
    }
    data_dir().join("sentinel.db")
}

/// Resolves the runtime control socket path.
///
/// `$XDG_RUNTIME_DIR/sentinelfs/sentinel_daemon.sock`, falling back to
/// the data directory when no runtime dir is set.
#[must_use]
pub fn runtime_socket_path() -> PathBuf {
    if let Ok(runtime) = std::env::var("XDG_RUNTIME_DIR") {
        if !runtime.is_empty() {
            return PathBuf::from(runtime)
                .join("sentinelfs")
                .join("sentinel_daemon.sock");
        }
    }
    data_dir().join("sentinel_daemon.sock")
}

fn data_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("sentinelfs");
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_owned());
    PathBuf::from(home)
        .join(".local")
        .join("share")
        .join("sentinelfs")
}
