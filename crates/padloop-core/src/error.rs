//! Error types for padloop-core

use thiserror::Error;

use crate::message::PatternKey;

/// Result type alias for padloop-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Invalid recorder transitions.
///
/// These are expected during normal play (pressing record twice, hitting a
/// pad that was never recorded) and callers usually turn them into a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecorderError {
    /// A recording is already running (only one may run at a time)
    #[error("already recording {key}")]
    AlreadyRecording { key: PatternKey },

    /// No sealed recording exists for the key
    #[error("no recording for {key}")]
    NoRecording { key: PatternKey },

    /// The sealed recording captured no events
    #[error("recording for {key} is empty")]
    EmptyRecording { key: PatternKey },

    /// The key is being recorded right now and cannot be played
    #[error("{key} is currently recording")]
    KeyIsRecording { key: PatternKey },
}

/// Errors that can occur in padloop-core
#[derive(Debug, Error)]
pub enum Error {
    /// Recorder state machine refused a transition
    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),
}
