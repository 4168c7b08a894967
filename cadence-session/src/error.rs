//! Error types for cadence-session
//!
//! Every failure is reported to the issuer of the command that caused it.
//! Nothing in here is fatal to the hosting process.

use thiserror::Error;

use crate::playback::transport::TransportErrorKind;

/// Main error type for the playback session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Negative or otherwise unrepresentable index in a request
    #[error("Invalid index: {0}")]
    InvalidIndex(i64),

    /// Queue index outside `[0, len)`
    #[error("Index {index} out of range for queue of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// Controller has no live connection to a session
    #[error("Not connected to a playback session")]
    NotConnected,

    /// The media transport failed to load or play an item
    #[error("Transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    /// The catalog refused or timed out on a favorite update
    #[error("Favorite update failed: {0}")]
    FavoriteUpdateFailed(String),

    /// Operation needs a current track and the queue is empty
    #[error("No current track")]
    NoCurrentTrack,

    /// Command bus received an action name it does not know
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// Command bus payload could not be decoded
    #[error("Invalid payload for {action}: {reason}")]
    InvalidPayload { action: String, reason: String },

    /// HTTP server could not bind or failed while serving
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Configuration error from the common crate
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<cadence_common::Error> for Error {
    fn from(err: cadence_common::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Convenience Result type using the session Error
pub type Result<T> = std::result::Result<T, Error>;
