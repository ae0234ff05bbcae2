// Encrypted control session
//
// One record per television, created by the pin-code handshake (or by
// restoring stored credentials) and replaced wholesale on re-pairing.
// The sequence counter only ever moves forward.

use crate::crypto::SessionKeys;
use crate::error::Error;

/// Largest sequence number that still fits the 8-digit wire field.
const MAX_SEQUENCE: u32 = 99_999_999;

/// Negotiated key material plus the anti-replay counter for one device.
#[derive(Debug, Clone)]
pub struct Session {
    keys: SessionKeys,
    application_id: String,
    session_id: Option<String>,
    sequence: Option<u32>,
    generation: u64,
}

impl Session {
    pub fn new(keys: SessionKeys, application_id: impl Into<String>) -> Self {
        Self {
            keys,
            application_id: application_id.into(),
            session_id: None,
            sequence: None,
            generation: 0,
        }
    }

    /// Attach the session id assigned by `X_GetEncryptSessionId`.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Last sequence number handed out, `None` before the first call.
    pub fn sequence(&self) -> Option<u32> {
        self.sequence
    }

    /// Install generation; bumped every time a session replaces another.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reserve the next sequence number.
    ///
    /// The counter is advanced before the caller signs or sends anything,
    /// so a failed send still burns its number.
    pub fn next_sequence(&mut self) -> Result<u32, Error> {
        let next = match self.sequence {
            None => 1,
            Some(current) if current >= MAX_SEQUENCE => {
                return Err(Error::encrypt("sequence number space exhausted"));
            }
            Some(current) => current + 1,
        };
        self.sequence = Some(next);
        Ok(next)
    }
}

/// Wire rendering of a sequence number: eight zero-padded digits.
pub(crate) fn format_sequence(sequence: u32) -> String {
    format!("{sequence:08}")
}
