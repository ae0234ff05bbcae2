// ── Runtime connector configuration ──
//
// Describes *what* the connector talks to and how often. Carries stored
// pairing credentials but never touches disk: viera-config (or any other
// host) builds a `ConnectorConfig` and hands it in.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use secrecy::SecretString;
use viera_api::television::DEFAULT_PORT;

use crate::model::DeviceId;

/// Pairing credentials granted by a television, stored by the host.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub app_id: String,
    pub encryption_key: SecretString,
}

/// A television the connector controls without waiting for discovery.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub id: DeviceId,
    pub host: IpAddr,
    pub port: u16,
    /// Display name; defaults to the id.
    pub name: Option<String>,
    /// Whether the network-control service requires the encrypted session.
    pub encrypted: bool,
    pub credentials: Option<Credentials>,
}

impl DeviceConfig {
    pub fn new(id: impl Into<DeviceId>, host: IpAddr) -> Self {
        Self {
            id: id.into(),
            host,
            port: DEFAULT_PORT,
            name: None,
            encrypted: false,
            credentials: None,
        }
    }
}

/// Configuration for one connector instance.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Identifier stamped on every produced message.
    pub connector_id: String,
    /// Name shown on the television while pairing.
    pub app_name: String,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Queue drain tick. One message is processed per tick.
    pub dispatch_interval: Duration,
    /// Reachability polling interval.
    pub poll_interval: Duration,
    /// How often to re-run SSDP discovery. `None` disables it.
    pub discovery_interval: Option<Duration>,
    /// How long one SSDP scan listens for responses.
    pub discovery_timeout: Duration,
    /// Bind address for the NOTIFY callback listener. `None` disables
    /// event subscriptions.
    pub event_bind: Option<SocketAddr>,
    /// Subscription timeout requested from televisions.
    pub event_timeout: Duration,
    pub devices: Vec<DeviceConfig>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connector_id: "viera".into(),
            app_name: "viera".into(),
            timeout: Duration::from_secs(5),
            dispatch_interval: Duration::from_millis(100),
            poll_interval: Duration::from_secs(10),
            discovery_interval: Some(Duration::from_secs(300)),
            discovery_timeout: Duration::from_secs(3),
            event_bind: None,
            event_timeout: Duration::from_secs(300),
            devices: Vec::new(),
        }
    }
}
