//! Error taxonomy for the bridge
//!
//! Component-internal failures (a bad frame, a failed MIDI write) are logged and
//! dropped where they happen. Only the errors below cross a component boundary.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to callers of the bridge components
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Hardware missing or removed. Retried on the next hot-plug event.
    #[error("MIDI device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Could not reach the remote application
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// An established link to the remote application dropped
    #[error("connection lost: {0}")]
    ConnectionLost(#[source] io::Error),

    /// A profile document that cannot be understood at all
    #[error("malformed profile: {0}")]
    MalformedProfile(String),

    /// One wire frame that could not be parsed
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),

    /// A save to disk failed. In-memory state is unchanged.
    #[error("failed to write {path}: {source}")]
    PersistenceWriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A persisted document exists but could not be read
    #[error("failed to read {path}: {reason}")]
    PersistenceReadFailed { path: PathBuf, reason: String },

    /// A named profile does not exist in the profile directory
    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    /// The outgoing profile kept being edited while a switch tried to save it
    #[error("profile '{0}' kept changing during the switch")]
    ProfileBusy(String),
}

/// Reasons a single line on the wire is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("line exceeds {max} bytes")]
    TooLong { max: usize },

    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("empty line")]
    Empty,

    #[error("invalid command identifier: {0:?}")]
    InvalidCommand(String),
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
