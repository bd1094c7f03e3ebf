//! Daemon configuration.
//!
//! Plain `key=value` files with `#` comments. Unknown keys warn instead
//! of failing so configs can travel between versions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{DaemonError, DaemonResult};

/// Manifest entry for one deployment-supplied plugin.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PluginManifest {
    /// Shared-object or executable path.
    pub path: Option<PathBuf>,
    /// Plugin names this one must come up after.
    pub deps: Vec<String>,
    /// Minimum plugin interface version.
    pub min_version: Option<String>,
}

/// Daemon settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Port for peer data transport.
    pub tcp_port: u16,
    /// UDP presence broadcast port.
    pub discovery_port: u16,
    /// Root of the monitored tree.
    pub watch_directory: PathBuf,
    /// HTTP port for metrics and health probes.
    pub metrics_port: u16,
    /// Require transport encryption (needs a session code).
    pub encryption_enabled: bool,
    /// Shared session code, normalized uppercase.
    pub session_code: Option<String>,
    /// Upload cap in KiB/s; 0 means unlimited.
    pub upload_limit_kbps: u64,
    /// Download cap in KiB/s; 0 means unlimited.
    pub download_limit_kbps: u64,
    /// Override for the plugin search directory.
    pub plugins_dir: Option<PathBuf>,
    /// Per-plugin manifest entries.
    pub plugins: BTreeMap<String, PluginManifest>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tcp_port: 8080,
            discovery_port: 9999,
            watch_directory: PathBuf::from("."),
            metrics_port: 9100,
            encryption_enabled: false,
            session_code: None,
            upload_limit_kbps: 0,
            download_limit_kbps: 0,
            plugins_dir: None,
            plugins: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> DaemonResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration text without validating.
    pub fn parse(raw: &str) -> DaemonResult<Self> {
        let mut config = Self::default();
        for (number, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(DaemonError::Config(format!(
                    "line {}: expected key=value, got {line:?}",
                    number + 1
                )));
            };
            config.apply(key.trim(), value.trim())?;
        }
        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) -> DaemonResult<()> {
        match key {
            "tcp_port" => self.tcp_port = parse_port(key, value)?,
            "discovery_port" => self.discovery_port = parse_port(key, value)?,
            "metrics_port" => self.metrics_port = parse_port(key, value)?,
            "watch_directory" => self.watch_directory = expand_tilde(value),
            "encryption_enabled" => self.encryption_enabled = parse_bool(key, value)?,
            "session_code" => self.session_code = Some(normalize_session_code(value)?),
            "upload_limit_kbps" => self.upload_limit_kbps = parse_number(key, value)?,
            "download_limit_kbps" => self.download_limit_kbps = parse_number(key, value)?,
            "plugins.dir" => self.plugins_dir = Some(expand_tilde(value)),
            _ => {
                if let Some(rest) = key.strip_prefix("plugin.") {
                    self.apply_plugin(rest, value)?;
                } else {
                    tracing::warn!(key, "unknown configuration key ignored");
                }
            }
        }
        Ok(())
    }

    fn apply_plugin(&mut self, rest: &str, value: &str) -> DaemonResult<()> {
        let Some((name, field)) = rest.rsplit_once('.') else {
            return Err(DaemonError::Config(format!(
                "plugin key must be plugin.<name>.<field>, got plugin.{rest}"
            )));
        };
        let entry = self.plugins.entry(name.to_owned()).or_default();
        match field {
            "path" => entry.path = Some(expand_tilde(value)),
            "deps" => {
                entry.deps = value
                    .split(',')
                    .map(str::trim)
                    .filter(|dep| !dep.is_empty())
                    .map(str::to_owned)
                    .collect();
            }
            "min_version" => entry.min_version = Some(value.to_owned()),
            other => {
                return Err(DaemonError::Config(format!(
                    "unknown plugin field {other:?} for plugin {name:?}"
                )));
            }
        }
        Ok(())
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> DaemonResult<()> {
        if self.tcp_port == self.discovery_port {
            return Err(DaemonError::Config(
                "tcp_port and discovery_port must differ".to_owned(),
            ));
        }
        if self.encryption_enabled && self.session_code.is_none() {
            return Err(DaemonError::Config(
                "encryption_enabled requires a session_code".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Normalizes a session code: exactly six alphanumerics, uppercased.
pub fn normalize_session_code(raw: &str) -> DaemonResult<String> {
    let trimmed = raw.trim();
    if trimmed.len() != 6 || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(DaemonError::Config(format!(
            "session code must be 6 alphanumerics, got {trimmed:?}"
        )));
    }
    Ok(trimmed.to_ascii_uppercase())
}

/// Expands a leading `~` to the user's home directory.
#[must_use]
pub fn expand_tilde(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    } else if value == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home);
        }
    }
    PathBuf::from(value)
}

fn parse_port(key: &str, value: &str) -> DaemonResult<u16> {
    let port: u16 = value
        .parse()
        .map_err(|_| DaemonError::Config(format!("{key}: invalid port {value:?}")))?;
    if port == 0 {
        return Err(DaemonError::Config(format!("{key}: port must be nonzero")));
    }
    Ok(port)
}

fn parse_number(key: &str, value: &str) -> DaemonResult<u64> {
    value
        .parse()
        .map_err(|_| DaemonError::Config(format!("{key}: invalid number {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> DaemonResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(DaemonError::Config(format!(
            "{key}: expected boolean, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_ports() {
        let config = Config::default();
        assert_eq!(config.tcp_port, 8080);
        assert_eq!(config.discovery_port, 9999);
        assert_eq!(config.metrics_port, 9100);
        assert_eq!(config.upload_limit_kbps, 0);
    }

    #[test]
    fn parses_keys_comments_and_blank_lines() {
        let config = Config::parse(
            "# sentinel config\n\
             tcp_port = 9000\n\
             \n\
             discovery_port=9001\n\
             session_code = abc123\n\
             upload_limit_kbps = 512\n",
        )
        .expect("parse");
        assert_eq!(config.tcp_port, 9000);
        assert_eq!(config.discovery_port, 9001);
        assert_eq!(config.session_code.as_deref(), Some("ABC123"));
        assert_eq!(config.upload_limit_kbps, 512);
    }

    #[test]
    fn plugin_manifest_entries_accumulate() {
        let config = Config::parse(
            "plugin.storage.path = /opt/sentinel/storage.so\n\
             plugin.storage.deps = core, net\n\
             plugin.storage.min_version = 1.2\n",
        )
        .expect("parse");
        let plugin = config.plugins.get("storage").expect("plugin entry");
        assert_eq!(plugin.path.as_deref(), Some(Path::new("/opt/sentinel/storage.so")));
        assert_eq!(plugin.deps, vec!["core", "net"]);
        assert_eq!(plugin.min_version.as_deref(), Some("1.2"));
    }

    #[test]
    fn malformed_lines_are_rejected_with_line_numbers() {
        let err = Config::parse("tcp_port = 9000\nnot a pair\n").expect_err("reject");
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn session_codes_are_validated_and_uppercased() {
        assert_eq!(normalize_session_code("abc123").expect("ok"), "ABC123");
        assert!(normalize_session_code("short").is_err());
        assert!(normalize_session_code("toolong1").is_err());
        assert!(normalize_session_code("ab-123").is_err());
    }

    #[test]
    fn encryption_without_code_fails_validation() {
        let mut config = Config::parse("encryption_enabled = true\n").expect("parse");
        assert!(config.validate().is_err());
        config.session_code = Some("ABC123".to_owned());
        config.validate().expect("valid with code");
    }

    #[test]
    fn clashing_ports_fail_validation() {
        let config = Config::parse("tcp_port = 9000\ndiscovery_port = 9000\n").expect("parse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_keys_are_tolerated() {
        let config = Config::parse("future_knob = 7\n").expect("parse");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn zero_ports_are_rejected() {
        assert!(Config::parse("tcp_port = 0\n").is_err());
    }
}
