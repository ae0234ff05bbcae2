use thiserror::Error;

/// Top-level error type for the `viera-api` crate.
///
/// Covers every failure mode of the wire layer: argument validation,
/// the encrypted-session envelope, SOAP transport, discovery, and the
/// event callback channel. `viera-core` maps these into connection-state
/// transitions and user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Input ───────────────────────────────────────────────────────
    /// Malformed local input (pin format, out-of-range volume, bad host).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ── Crypto / session ────────────────────────────────────────────
    /// Building or encrypting an outbound envelope failed.
    #[error("Encryption failed: {message}")]
    Encrypt { message: String },

    /// Signature, sequence, or decryption check failed on an inbound payload.
    #[error("Decryption failed: {message}")]
    Decrypt { message: String },

    /// An encrypted call was attempted without an established session.
    #[error("No encrypted session -- pin-code pairing required")]
    SessionRequired,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The television answered with a non-success status and no SOAP fault.
    #[error("Television API call failed (HTTP {status:?}): {message}")]
    TelevisionApiCall { message: String, status: Option<u16> },

    /// UPnP fault returned by the television.
    #[error("SOAP fault {code}: {message}")]
    Soap { code: String, message: String },

    /// Socket-level failure (SSDP probe, event callback listener).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Data ────────────────────────────────────────────────────────
    /// XML was malformed or lacked a required element.
    #[error("XML error: {message}")]
    Xml { message: String },

    /// Unexpected internal condition.
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    pub(crate) fn xml(message: impl Into<String>) -> Self {
        Self::Xml {
            message: message.into(),
        }
    }

    pub(crate) fn decrypt(message: impl Into<String>) -> Self {
        Self::Decrypt {
            message: message.into(),
        }
    }

    pub(crate) fn encrypt(message: impl Into<String>) -> Self {
        Self::Encrypt {
            message: message.into(),
        }
    }

    /// Returns `true` if the current session can no longer be used and
    /// the pin-code handshake must run again.
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, Self::Decrypt { .. } | Self::SessionRequired)
    }

    /// Returns `true` for transport-level failures that the next poll may
    /// recover from on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::TelevisionApiCall { .. } | Self::Io(_) => true,
            _ => false,
        }
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Self::xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::xml(err.to_string())
    }
}
