//! Process configuration.
//!
//! Settings are assembled once at startup from, in increasing precedence:
//!
//! 1. built-in defaults,
//! 2. an optional TOML file,
//! 3. `LEKTRIX_*` environment variables (`__` separates nested keys, e.g.
//!    `LEKTRIX_STORE__PATH`),
//! 4. the legacy variable names of the container deployment
//!    (`DB_PATH`, `BACKUP_DIR`, `BACKUP_INTERVAL`, `PLOT_PATH`,
//!    `RCLONE_REMOTE`, ...).
//!
//! The CLI applies its flags on top. Components receive the parts they need
//! by value and never read the environment themselves.
//!
//! ```toml
//! [store]
//! path = "/data/lektrix.db"
//!
//! [archive]
//! dir = "/data/backups"
//! interval = "8h"
//! remote = "dropbox:lektrix"
//!
//! [server]
//! port = 8000
//! expose = true
//! ```

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::serde_duration;

/// Prefix for environment variables.
pub const ENV_PREFIX: &str = "LEKTRIX";

/// Errors raised while loading or validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// All settings for the four lektrix processes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub store: StoreSettings,
    pub ingest: IngestSettings,
    pub archive: ArchiveSettings,
    pub render: RenderSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Location of the shared SQLite file.
    pub path: PathBuf,
    /// How long an operation waits on a locked database.
    #[serde(with = "serde_duration")]
    pub busy_timeout: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/data/lektrix.db"),
            busy_timeout: lektrix_store::DEFAULT_BUSY_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    #[serde(with = "serde_duration")]
    pub interval: Duration,
    /// Lower bound of the sampled signal.
    pub min: f64,
    /// Upper bound of the sampled signal.
    pub max: f64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            min: 0.0,
            max: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    /// Directory receiving `<label>_<YYYYMMDD_HHMMSS>.db` snapshots.
    pub dir: PathBuf,
    pub label: String,
    /// Period between snapshots in daemon mode.
    #[serde(with = "serde_duration")]
    pub interval: Duration,
    /// rclone remote (e.g. `dropbox:lektrix`). Unset disables remote push.
    pub remote: Option<String>,
    /// rclone executable.
    pub rclone: PathBuf,
    /// Push after the snapshot in one-shot mode.
    pub push: bool,
    /// Push once when the daemon starts.
    pub push_on_start: bool,
    /// Push once when the daemon stops.
    pub push_on_shutdown: bool,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/data/backups"),
            label: "lektrix".to_string(),
            interval: Duration::from_secs(8 * 3600),
            remote: None,
            rclone: PathBuf::from("rclone"),
            push: false,
            push_on_start: false,
            push_on_shutdown: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub chart_path: PathBuf,
    #[serde(with = "serde_duration")]
    pub interval: Duration,
    /// Trailing window shown on the chart.
    #[serde(with = "serde_duration")]
    pub window: Duration,
    pub width: u32,
    pub height: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            chart_path: PathBuf::from("/data/plot.png"),
            interval: Duration::from_secs(60),
            window: Duration::from_secs(3600),
            width: 1000,
            height: 400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Listen on all interfaces. Required for any non-loopback bind.
    pub expose: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            expose: false,
        }
    }
}

impl ServerSettings {
    /// Resolve the socket address to bind.
    ///
    /// Loopback unless `expose` is set. With `expose` and the default host
    /// the server binds `0.0.0.0`; an explicit non-loopback host is only
    /// accepted together with `expose`.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = parse_host(&self.host)?;
        if self.expose {
            let ip = if ip.is_loopback() {
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            } else {
                ip
            };
            return Ok(SocketAddr::new(ip, self.port));
        }
        if !ip.is_loopback() {
            return Err(ConfigError::Invalid(format!(
                "server.host {} is not a loopback address; set server.expose to listen externally",
                self.host
            )));
        }
        Ok(SocketAddr::new(ip, self.port))
    }
}

fn parse_host(host: &str) -> Result<IpAddr, ConfigError> {
    if host.eq_ignore_ascii_case("localhost") {
        return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    host.parse()
        .map_err(|_| ConfigError::Invalid(format!("server.host {host:?} is not an IP address")))
}

impl Settings {
    /// Load settings from the optional file and the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(file, std::env::vars())
    }

    /// Load settings from the optional file and the given environment.
    pub fn load_from<I>(file: Option<&Path>, env: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let env: HashMap<String, String> = env.into_iter().collect();

        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let prefixed: config::Map<String, String> = env
            .iter()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(Some(prefixed)),
        );

        for (key, value) in legacy_overrides(&env) {
            builder = builder.set_override(key, value)?;
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validated()
    }

    /// Normalise and check the settings.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        self.archive.remote = self
            .archive
            .remote
            .take()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        let invalid = |msg: String| -> Result<Self, ConfigError> { Err(ConfigError::Invalid(msg)) };

        if !self.ingest.min.is_finite() || !self.ingest.max.is_finite() {
            return invalid("ingest.min and ingest.max must be finite".into());
        }
        if self.ingest.min > self.ingest.max {
            return invalid(format!(
                "ingest.min ({}) is greater than ingest.max ({})",
                self.ingest.min, self.ingest.max
            ));
        }
        for (name, interval) in [
            ("ingest.interval", self.ingest.interval),
            ("archive.interval", self.archive.interval),
            ("render.interval", self.render.interval),
            ("render.window", self.render.window),
        ] {
            if interval.is_zero() {
                return invalid(format!("{name} must be greater than zero"));
            }
        }
        if self.render.width < 200 || self.render.height < 100 {
            return invalid(format!(
                "render size {}x{} is too small (minimum 200x100)",
                self.render.width, self.render.height
            ));
        }
        if self.archive.label.is_empty() || self.archive.label.contains(['/', '\\']) {
            return invalid(format!(
                "archive.label {:?} must be a non-empty file name fragment",
                self.archive.label
            ));
        }

        Ok(self)
    }
}

/// Map the legacy deployment variables onto settings keys.
fn legacy_overrides(env: &HashMap<String, String>) -> Vec<(&'static str, String)> {
    let mut overrides = Vec::new();
    let mut take = |var: &str, key: &'static str| {
        if let Some(value) = env.get(var) {
            overrides.push((key, value.clone()));
        }
    };

    take("DB_PATH", "store.path");
    take("BACKUP_DIR", "archive.dir");
    take("BACKUP_INTERVAL", "archive.interval");
    take("PLOT_PATH", "render.chart_path");

    if let Some(remote) = env.get("RCLONE_REMOTE").or_else(|| env.get("DROPBOX_REMOTE")) {
        overrides.push(("archive.remote", remote.clone()));
    }
    for (var, key) in [
        ("RCLONE_PUSH_ONCE", "archive.push"),
        ("ON_START_SYNC", "archive.push_on_start"),
        ("ON_SHUTDOWN_SYNC", "archive.push_on_shutdown"),
    ] {
        if let Some(value) = env.get(var) {
            overrides.push((key, truthy(value).to_string()));
        }
    }

    overrides
}

fn truthy(value: &str) -> bool {
    let v = value.trim();
    v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::load_from(None, env(&[])).unwrap();

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.store.path, PathBuf::from("/data/lektrix.db"));
        assert_eq!(settings.ingest.interval, Duration::from_secs(10));
        assert_eq!(settings.archive.interval, Duration::from_secs(28_800));
        assert_eq!(settings.render.interval, Duration::from_secs(60));
        assert_eq!(settings.render.window, Duration::from_secs(3600));
        assert_eq!(settings.archive.remote, None);
        assert_eq!(
            settings.server.bind_addr().unwrap(),
            "127.0.0.1:8000".parse().unwrap()
        );
    }

    #[test]
    fn test_file_source() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[store]
path = "/srv/telemetry.db"

[ingest]
interval = "2s"
min = -10.0
max = 10.0

[archive]
interval = "30m"
remote = "dropbox:backups"
"#
        )
        .unwrap();

        let settings = Settings::load_from(Some(file.path()), env(&[])).unwrap();

        assert_eq!(settings.store.path, PathBuf::from("/srv/telemetry.db"));
        assert_eq!(settings.ingest.interval, Duration::from_secs(2));
        assert_eq!(settings.ingest.min, -10.0);
        assert_eq!(settings.archive.interval, Duration::from_secs(1800));
        assert_eq!(settings.archive.remote.as_deref(), Some("dropbox:backups"));
        // Untouched sections keep their defaults.
        assert_eq!(settings.render, RenderSettings::default());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = Settings::load_from(Some(Path::new("/nonexistent/lektrix.toml")), env(&[]));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_prefixed_environment() {
        let settings = Settings::load_from(
            None,
            env(&[
                ("LEKTRIX_STORE__PATH", "/tmp/a.db"),
                ("LEKTRIX_RENDER__INTERVAL", "15s"),
                ("LEKTRIX_SERVER__PORT", "9000"),
                ("LEKTRIX_SERVER__EXPOSE", "true"),
                ("UNRELATED", "ignored"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.store.path, PathBuf::from("/tmp/a.db"));
        assert_eq!(settings.render.interval, Duration::from_secs(15));
        assert_eq!(
            settings.server.bind_addr().unwrap(),
            "0.0.0.0:9000".parse().unwrap()
        );
    }

    #[test]
    fn test_legacy_environment() {
        let settings = Settings::load_from(
            None,
            env(&[
                ("DB_PATH", "/data/pods-poc.db"),
                ("BACKUP_DIR", "/data/bk"),
                ("BACKUP_INTERVAL", "3600"),
                ("PLOT_PATH", "/data/p.png"),
                ("DROPBOX_REMOTE", "dropbox:pods"),
                ("ON_START_SYNC", "yes"),
                ("RCLONE_PUSH_ONCE", "0"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.store.path, PathBuf::from("/data/pods-poc.db"));
        assert_eq!(settings.archive.dir, PathBuf::from("/data/bk"));
        assert_eq!(settings.archive.interval, Duration::from_secs(3600));
        assert_eq!(settings.render.chart_path, PathBuf::from("/data/p.png"));
        assert_eq!(settings.archive.remote.as_deref(), Some("dropbox:pods"));
        assert!(settings.archive.push_on_start);
        assert!(!settings.archive.push);
    }

    #[test]
    fn test_empty_remote_disables_push() {
        let settings = Settings::load_from(None, env(&[("RCLONE_REMOTE", "  ")])).unwrap();
        assert_eq!(settings.archive.remote, None);
    }

    #[test]
    fn test_rclone_remote_wins_over_dropbox_remote() {
        let settings = Settings::load_from(
            None,
            env(&[("RCLONE_REMOTE", "s3:bucket"), ("DROPBOX_REMOTE", "dropbox:x")]),
        )
        .unwrap();
        assert_eq!(settings.archive.remote.as_deref(), Some("s3:bucket"));
    }

    #[test]
    fn test_invalid_signal_range() {
        let mut settings = Settings::default();
        settings.ingest.min = 5.0;
        settings.ingest.max = 1.0;
        assert!(matches!(settings.validated(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut settings = Settings::default();
        settings.render.interval = Duration::ZERO;
        let err = settings.validated().unwrap_err();
        assert!(err.to_string().contains("render.interval"));
    }

    #[test]
    fn test_label_with_separator_rejected() {
        let mut settings = Settings::default();
        settings.archive.label = "../escape".into();
        assert!(settings.validated().is_err());
    }

    #[test]
    fn test_non_loopback_host_requires_expose() {
        let mut server = ServerSettings {
            host: "192.168.1.10".into(),
            ..ServerSettings::default()
        };
        assert!(server.bind_addr().is_err());

        server.expose = true;
        assert_eq!(
            server.bind_addr().unwrap(),
            "192.168.1.10:8000".parse().unwrap()
        );
    }

    #[test]
    fn test_server_host_only_checked_when_binding() {
        let settings = Settings::load_from(None, env(&[("LEKTRIX_SERVER__HOST", "10.0.0.5")])).unwrap();

        assert_eq!(settings.server.host, "10.0.0.5");
        assert!(matches!(settings.server.bind_addr(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_localhost_and_ipv6_loopback() {
        let server = ServerSettings {
            host: "localhost".into(),
            port: 1234,
            expose: false,
        };
        assert_eq!(server.bind_addr().unwrap(), "127.0.0.1:1234".parse().unwrap());

        let server = ServerSettings {
            host: "::1".into(),
            port: 1234,
            expose: false,
        };
        assert!(server.bind_addr().unwrap().ip().is_loopback());
    }

    #[test]
    fn test_settings_serialize_durations_as_strings() {
        let json = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(json["archive"]["interval"], "8h");
        assert_eq!(json["ingest"]["interval"], "10s");
        assert_eq!(json["render"]["window"], "1h");
    }
}
