//! CLI error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use viera_config::ConfigError;
use viera_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("Device '{identifier}' not found")]
    #[diagnostic(
        code(viera::not_found),
        help("Add it under [[devices]] in the config file, or run: viera discover")
    )]
    NotFound { identifier: String },

    #[error("Device '{identifier}' needs pairing")]
    #[diagnostic(code(viera::pairing_required), help("Run: viera pair {identifier}"))]
    PairingRequired { identifier: String },

    #[error("Television call failed: {message}")]
    #[diagnostic(
        code(viera::television),
        help("Check that the television is on and reachable on the local network.")
    )]
    Television { message: String },

    #[error(transparent)]
    #[diagnostic(code(viera::config))]
    Config(#[from] ConfigError),

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(viera::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(viera::core))]
    Core(CoreError),

    #[error("Prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::PairingRequired { .. } => exit_code::AUTH,
            Self::Television { .. } => exit_code::CONNECTION,
            Self::Config(_) | Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotConnected { identifier, .. } => Self::PairingRequired { identifier },
            CoreError::DeviceNotFound { identifier } => Self::NotFound { identifier },
            CoreError::TelevisionApiCall { message, .. } => Self::Television { message },
            CoreError::InvalidArgument { message } => Self::Validation {
                field: "argument".into(),
                reason: message,
            },
            other => Self::Core(other),
        }
    }
}

impl From<viera_api::Error> for CliError {
    fn from(err: viera_api::Error) -> Self {
        CoreError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_exit_codes() {
        let missing: CliError = CoreError::DeviceNotFound {
            identifier: "tv-9".into(),
        }
        .into();
        assert_eq!(missing.exit_code(), exit_code::NOT_FOUND);

        let unpaired: CliError = CoreError::NotConnected {
            identifier: "tv-1".into(),
            reason: "no session".into(),
        }
        .into();
        assert!(matches!(unpaired, CliError::PairingRequired { ref identifier } if identifier == "tv-1"));
        assert_eq!(unpaired.exit_code(), exit_code::AUTH);
    }
}
