// ── Domain model ──
//
// Identifiers, connection states, and the closed set of normalized
// channel properties the connector reports.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use viera_api::PropertyChange;

/// Stable device identifier (the UUID advertised over SSDP, or the id a
/// configured device was given).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── ConnectionState ──────────────────────────────────────────────────

/// Reachability of one television as seen by the connector.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never polled.
    #[default]
    Unknown,
    Connected,
    /// Not answering, and never answered since start.
    Disconnected,
    /// Stopped answering after having been connected.
    Lost,
    /// Answering, but the encrypted session is missing or was rejected.
    Unauthorized,
}

impl ConnectionState {
    /// State to report when a poll gets no answer, given the last known one.
    pub fn unreachable_after(previous: Self) -> Self {
        match previous {
            Self::Connected | Self::Unauthorized | Self::Lost => Self::Lost,
            Self::Unknown | Self::Disconnected => Self::Disconnected,
        }
    }
}

// ── Properties ───────────────────────────────────────────────────────

/// Normalized channel property.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Property {
    /// Panel power.
    State,
    Volume,
    Mute,
    /// Active source: `hdmi{n}`, an application id, or `tv`.
    InputSource,
    /// Last application launched through the connector.
    Application,
    /// Last remote key sent through the connector.
    RemoteKey,
}

impl Property {
    /// Channel grouping the property belongs to.
    pub fn channel(self) -> &'static str {
        match self {
            Self::State => "power",
            Self::Volume | Self::Mute => "audio",
            Self::InputSource | Self::Application => "source",
            Self::RemoteKey => "remote",
        }
    }
}

/// Value carried by a property update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Level(u8),
    Text(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Level(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Map an event notification onto a normalized property.
pub fn property_update(change: PropertyChange) -> (Property, PropertyValue) {
    match change {
        PropertyChange::ScreenState(on) => (Property::State, PropertyValue::Bool(on)),
        PropertyChange::InputMode(mode) => (Property::InputSource, PropertyValue::Text(mode)),
        PropertyChange::Volume(level) => (Property::Volume, PropertyValue::Level(level)),
        PropertyChange::Mute(muted) => (Property::Mute, PropertyValue::Bool(muted)),
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn unreachable_distinguishes_lost_from_disconnected() {
        assert_eq!(
            ConnectionState::unreachable_after(ConnectionState::Connected),
            ConnectionState::Lost
        );
        assert_eq!(
            ConnectionState::unreachable_after(ConnectionState::Lost),
            ConnectionState::Lost
        );
        assert_eq!(
            ConnectionState::unreachable_after(ConnectionState::Unknown),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn every_property_has_a_channel() {
        for property in Property::iter() {
            assert!(!property.channel().is_empty());
            assert_eq!(Property::from_str(&property.to_string()).ok(), Some(property));
        }
    }

    #[test]
    fn events_map_to_properties() {
        assert_eq!(
            property_update(PropertyChange::Volume(12)),
            (Property::Volume, PropertyValue::Level(12))
        );
        assert_eq!(
            property_update(PropertyChange::ScreenState(false)),
            (Property::State, PropertyValue::Bool(false))
        );
    }
}
