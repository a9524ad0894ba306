//! Error types for padloop-cli

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for padloop-cli operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which side of a MIDI connection failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl std::fmt::Display for PortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortDirection::Input => write!(f, "input"),
            PortDirection::Output => write!(f, "output"),
        }
    }
}

/// Errors that can occur in padloop-cli
#[derive(Debug, Error)]
pub enum Error {
    /// No config file at the expected location
    #[error("no config file at {path:?} (run `padloop init`)")]
    ConfigNotFound { path: PathBuf },

    /// The platform has no config directory
    #[error("could not determine the padloop config directory")]
    NoConfigDir,

    /// The MIDI client could not be created
    #[error("could not create MIDI {direction} client: {reason}")]
    MidiClient { direction: PortDirection, reason: String },

    /// No port name contains the configured pattern
    #[error("no MIDI {direction} port matches '{pattern}'")]
    PortNotFound { direction: PortDirection, pattern: String },

    /// A matching port was found but refused the connection
    #[error("could not connect to MIDI {direction} '{port}': {reason}")]
    Connect {
        direction: PortDirection,
        port: String,
        reason: String,
    },

    /// The JACK note backend was chosen but no server is running
    #[error("JACK is not running")]
    JackNotRunning,

    /// JACK connection error
    #[error("JACK error: {0}")]
    Jack(#[from] jack::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("invalid config file: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("could not serialize config: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_port() {
        let err = Error::PortNotFound {
            direction: PortDirection::Input,
            pattern: "Launchkey".to_string(),
        };
        assert_eq!(err.to_string(), "no MIDI input port matches 'Launchkey'");

        let err = Error::Connect {
            direction: PortDirection::Output,
            port: "Launchkey Mini MK3 DAW".to_string(),
            reason: "busy".to_string(),
        };
        assert!(err.to_string().contains("output 'Launchkey Mini MK3 DAW'"));
    }
}
