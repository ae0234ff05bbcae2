// ── Core error types ──
//
// Errors surfaced by the connector to its host. Wire details (HTTP status
// codes, SOAP faults, XML parse failures) are folded into the small
// taxonomy the host reacts to; the `From<viera_api::Error>` impl does
// the translation.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Input ────────────────────────────────────────────────────────
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    // ── Session ──────────────────────────────────────────────────────
    #[error("Encryption failed: {message}")]
    Encrypt { message: String },

    #[error("Decryption failed: {message} -- pin-code pairing required")]
    Decrypt { message: String },

    // ── Device ───────────────────────────────────────────────────────
    #[error("Television API call failed: {message}")]
    TelevisionApiCall {
        message: String,
        /// HTTP status code (if the television answered at all).
        status: Option<u16>,
    },

    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    #[error("Device {identifier} is not connected: {reason}")]
    NotConnected { identifier: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl CoreError {
    /// Returns `true` if the device must be paired again before it will
    /// accept commands.
    pub fn requires_pairing(&self) -> bool {
        matches!(self, Self::Decrypt { .. } | Self::NotConnected { .. })
    }
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<viera_api::Error> for CoreError {
    fn from(err: viera_api::Error) -> Self {
        match err {
            viera_api::Error::InvalidArgument(message) => Self::InvalidArgument { message },
            viera_api::Error::InvalidUrl(e) => Self::InvalidArgument {
                message: e.to_string(),
            },
            viera_api::Error::Encrypt { message } => Self::Encrypt { message },
            viera_api::Error::Decrypt { message } => Self::Decrypt { message },
            viera_api::Error::SessionRequired => Self::NotConnected {
                identifier: String::new(),
                reason: "no encrypted session".into(),
            },
            viera_api::Error::TelevisionApiCall { message, status } => {
                Self::TelevisionApiCall { message, status }
            }
            viera_api::Error::Transport(e) => Self::TelevisionApiCall {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            },
            viera_api::Error::Soap { code, message } => Self::TelevisionApiCall {
                message: format!("SOAP fault {code}: {message}"),
                status: None,
            },
            viera_api::Error::Io(e) => Self::TelevisionApiCall {
                message: e.to_string(),
                status: None,
            },
            viera_api::Error::Xml { message } => Self::TelevisionApiCall {
                message: format!("malformed response: {message}"),
                status: None,
            },
            viera_api::Error::Runtime(message) => Self::Runtime(message),
        }
    }
}

impl CoreError {
    /// Attach the device identifier to a [`NotConnected`](Self::NotConnected)
    /// produced by the wire-layer conversion.
    pub(crate) fn for_device(self, device: &str) -> Self {
        match self {
            Self::NotConnected { reason, .. } => Self::NotConnected {
                identifier: device.to_owned(),
                reason,
            },
            other => other,
        }
    }
}
