//! Configuration for the viera daemon.
//!
//! A TOML file with a `[defaults]` table and any number of `[[devices]]`,
//! merged with `VIERA_`-prefixed environment variables and translated to
//! `viera_core::ConnectorConfig`. Pairing credentials live in the same
//! file; `set_credentials` + `save_config` persist them after pairing.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use viera_core::{ConnectorConfig, Credentials, DeviceConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no device '{id}' in config")]
    UnknownDevice { id: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Identifier stamped on every message this connector produces.
    #[serde(default = "default_connector_id")]
    pub connector_id: String,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub devices: Vec<Device>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connector_id: default_connector_id(),
            defaults: Defaults::default(),
            devices: Vec::new(),
        }
    }
}

/// Global timing and network settings.
#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Name shown on the television while pairing.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// HTTP request timeout, seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Queue drain tick, milliseconds.
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,

    /// Reachability polling, seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// SSDP re-discovery, seconds. 0 disables it.
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval: u64,

    /// How long one SSDP scan listens, seconds.
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout: u64,

    /// NOTIFY listener bind address (e.g. "0.0.0.0:55010").
    pub event_bind: Option<String>,

    /// Event subscription timeout, seconds.
    #[serde(default = "default_event_timeout")]
    pub event_timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            timeout: default_timeout(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
            poll_interval: default_poll_interval(),
            discovery_interval: default_discovery_interval(),
            discovery_timeout: default_discovery_timeout(),
            event_bind: None,
            event_timeout: default_event_timeout(),
        }
    }
}

fn default_connector_id() -> String {
    "viera".into()
}
fn default_app_name() -> String {
    "viera".into()
}
fn default_timeout() -> u64 {
    5
}
fn default_dispatch_interval_ms() -> u64 {
    100
}
fn default_poll_interval() -> u64 {
    10
}
fn default_discovery_interval() -> u64 {
    300
}
fn default_discovery_timeout() -> u64 {
    3
}
fn default_event_timeout() -> u64 {
    300
}
fn default_port() -> u16 {
    55000
}

/// A statically configured television.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Device {
    pub id: String,

    /// IP address of the television.
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub name: Option<String>,

    /// Whether the television requires encrypted commands.
    #[serde(default)]
    pub encrypted: bool,

    /// Application id granted at pairing.
    pub app_id: Option<String>,

    /// Encryption key granted at pairing (plaintext; prefer the env var).
    pub encryption_key: Option<String>,

    /// Environment variable holding the encryption key.
    pub encryption_key_env: Option<String>,
}

impl Device {
    pub fn new(id: impl Into<String>, host: IpAddr) -> Self {
        Self {
            id: id.into(),
            host: host.to_string(),
            port: default_port(),
            name: None,
            encrypted: false,
            app_id: None,
            encryption_key: None,
            encryption_key_env: None,
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "viera", "viera").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("viera");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load config from `path` + environment. A missing file yields defaults.
///
/// Environment keys nest with a double underscore:
/// `VIERA_DEFAULTS__POLL_INTERVAL=30`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("VIERA_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to the canonical path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Record pairing credentials for device `id`.
pub fn set_credentials(
    cfg: &mut Config,
    id: &str,
    app_id: &str,
    encryption_key: &SecretString,
) -> Result<(), ConfigError> {
    let device = cfg
        .devices
        .iter_mut()
        .find(|d| d.id == id)
        .ok_or_else(|| ConfigError::UnknownDevice { id: id.into() })?;
    device.encrypted = true;
    device.app_id = Some(app_id.into());
    device.encryption_key = Some(encryption_key.expose_secret().to_owned());
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Resolve a device's stored credentials. Both halves or neither.
fn resolve_credentials(device: &Device) -> Result<Option<Credentials>, ConfigError> {
    let key = device
        .encryption_key_env
        .as_ref()
        .and_then(|name| std::env::var(name).ok())
        .or_else(|| device.encryption_key.clone());

    match (&device.app_id, key) {
        (Some(app_id), Some(key)) => Ok(Some(Credentials {
            app_id: app_id.clone(),
            encryption_key: SecretString::from(key),
        })),
        (None, None) => Ok(None),
        _ => Err(invalid(
            format!("devices.{}", device.id),
            "app_id and encryption_key must be set together",
        )),
    }
}

fn device_config(device: &Device) -> Result<DeviceConfig, ConfigError> {
    if device.id.trim().is_empty() {
        return Err(invalid("devices.id", "must not be empty"));
    }
    let host: IpAddr = device.host.parse().map_err(|_| {
        invalid(
            format!("devices.{}.host", device.id),
            format!("not an IP address: {}", device.host),
        )
    })?;
    if device.port == 0 {
        return Err(invalid(format!("devices.{}.port", device.id), "must not be 0"));
    }

    let mut config = DeviceConfig::new(device.id.as_str(), host);
    config.port = device.port;
    config.name.clone_from(&device.name);
    config.encrypted = device.encrypted;
    config.credentials = resolve_credentials(device)?;
    Ok(config)
}

/// Build a validated `ConnectorConfig`.
pub fn to_connector_config(cfg: &Config) -> Result<ConnectorConfig, ConfigError> {
    let defaults = &cfg.defaults;
    if cfg.connector_id.trim().is_empty() {
        return Err(invalid("connector_id", "must not be empty"));
    }
    if defaults.dispatch_interval_ms == 0 {
        return Err(invalid("defaults.dispatch_interval_ms", "must be positive"));
    }
    if defaults.poll_interval == 0 {
        return Err(invalid("defaults.poll_interval", "must be positive"));
    }

    let event_bind = defaults
        .event_bind
        .as_deref()
        .map(|bind| {
            bind.parse::<SocketAddr>()
                .map_err(|_| invalid("defaults.event_bind", format!("not a socket address: {bind}")))
        })
        .transpose()?;

    let mut seen = HashSet::new();
    let mut devices = Vec::with_capacity(cfg.devices.len());
    for device in &cfg.devices {
        if !seen.insert(device.id.as_str()) {
            return Err(invalid("devices.id", format!("duplicate id '{}'", device.id)));
        }
        devices.push(device_config(device)?);
    }

    Ok(ConnectorConfig {
        connector_id: cfg.connector_id.clone(),
        app_name: defaults.app_name.clone(),
        timeout: Duration::from_secs(defaults.timeout),
        dispatch_interval: Duration::from_millis(defaults.dispatch_interval_ms),
        poll_interval: Duration::from_secs(defaults.poll_interval),
        discovery_interval: (defaults.discovery_interval > 0)
            .then(|| Duration::from_secs(defaults.discovery_interval)),
        discovery_timeout: Duration::from_secs(defaults.discovery_timeout),
        event_bind,
        event_timeout: Duration::from_secs(defaults.event_timeout),
        devices,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn write(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.connector_id, "viera");
        assert!(cfg.devices.is_empty());

        let connector = to_connector_config(&cfg).unwrap();
        assert_eq!(connector.timeout, Duration::from_secs(5));
        assert_eq!(connector.dispatch_interval, Duration::from_millis(100));
        assert_eq!(connector.discovery_interval, Some(Duration::from_secs(300)));
        assert_eq!(connector.event_bind, None);
    }

    #[test]
    fn devices_translate_with_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"
connector_id = "living-room"

[defaults]
poll_interval = 30
discovery_interval = 0
event_bind = "0.0.0.0:55010"

[[devices]]
id = "tv-1"
host = "10.10.0.10"
name = "Lounge"
encrypted = true
app_id = "app-77"
encryption_key = "AAECAwQFBgcICQoLDA0ODw=="

[[devices]]
id = "tv-2"
host = "fe80::2"
port = 55001
"#,
        );

        let cfg = load_config_from(&path).unwrap();
        let connector = to_connector_config(&cfg).unwrap();
        assert_eq!(connector.connector_id, "living-room");
        assert_eq!(connector.poll_interval, Duration::from_secs(30));
        assert_eq!(connector.discovery_interval, None);
        assert_eq!(connector.event_bind, Some("0.0.0.0:55010".parse().unwrap()));
        assert_eq!(connector.devices.len(), 2);

        let tv1 = &connector.devices[0];
        assert_eq!(tv1.id.as_str(), "tv-1");
        assert_eq!(tv1.port, 55000);
        assert_eq!(tv1.name.as_deref(), Some("Lounge"));
        let creds = tv1.credentials.as_ref().unwrap();
        assert_eq!(creds.app_id, "app-77");
        assert_eq!(creds.encryption_key.expose_secret(), "AAECAwQFBgcICQoLDA0ODw==");

        let tv2 = &connector.devices[1];
        assert_eq!(tv2.port, 55001);
        assert!(!tv2.encrypted);
        assert!(tv2.credentials.is_none());
    }

    #[test]
    fn bad_host_is_rejected() {
        let mut cfg = Config::default();
        let mut device = Device::new("tv-1", IpAddr::from([10, 0, 0, 1]));
        device.host = "television.local".into();
        cfg.devices.push(device);

        let err = to_connector_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "devices.tv-1.host"));
    }

    #[test]
    fn zero_port_and_duplicates_are_rejected() {
        let mut cfg = Config::default();
        let mut device = Device::new("tv-1", IpAddr::from([10, 0, 0, 1]));
        device.port = 0;
        cfg.devices.push(device);
        assert!(to_connector_config(&cfg).is_err());

        cfg.devices[0].port = 55000;
        cfg.devices.push(Device::new("tv-1", IpAddr::from([10, 0, 0, 2])));
        let err = to_connector_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("duplicate id 'tv-1'"));
    }

    #[test]
    fn half_credentials_are_rejected() {
        let mut cfg = Config::default();
        let mut device = Device::new("tv-1", IpAddr::from([10, 0, 0, 1]));
        device.app_id = Some("app-1".into());
        cfg.devices.push(device);

        assert!(matches!(
            to_connector_config(&cfg),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn credentials_survive_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.devices
            .push(Device::new("tv-1", IpAddr::from([10, 0, 0, 1])));
        set_credentials(
            &mut cfg,
            "tv-1",
            "app-9",
            &SecretString::from("EBESExQVFhcYGRobHB0eHw=="),
        )
        .unwrap();
        save_config_to(&cfg, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        let device = &loaded.devices[0];
        assert!(device.encrypted);
        assert_eq!(device.app_id.as_deref(), Some("app-9"));
        assert_eq!(device.encryption_key.as_deref(), Some("EBESExQVFhcYGRobHB0eHw=="));
    }

    #[test]
    fn set_credentials_for_unknown_device() {
        let mut cfg = Config::default();
        let err = set_credentials(&mut cfg, "ghost", "a", &SecretString::from("k")).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDevice { .. }));
    }
}
