//! Network error types

use std::io;

use crate::protocol::{ErrorKind, WireError};

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection rejected: {0}")]
    Rejected(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Core(#[from] taskdeck_core::Error),

    #[error("Server error: {0}")]
    Remote(WireError),
}

impl Error {
    /// Wire classification of this error
    pub fn kind(&self) -> ErrorKind {
        use taskdeck_core::Error as Core;

        match self {
            Error::Core(Core::NotFound(_)) => ErrorKind::NotFound,
            Error::Core(Core::Forbidden(_)) => ErrorKind::Forbidden,
            Error::Core(Core::InvalidArgument(_)) => ErrorKind::InvalidArgument,
            Error::Core(Core::Conflict(_)) => ErrorKind::Conflict,
            Error::Core(Core::Database(_)) | Error::Core(Core::Io(_)) => ErrorKind::Unavailable,
            Error::Timeout(_) | Error::Unavailable(_) => ErrorKind::Unavailable,
            Error::Remote(wire) => wire.kind,
            _ => ErrorKind::Internal,
        }
    }

    pub fn to_wire(&self) -> WireError {
        match self {
            Error::Remote(wire) => wire.clone(),
            // Storage internals stay on the server
            Error::Core(taskdeck_core::Error::Database(_)) => WireError {
                kind: ErrorKind::Unavailable,
                message: "storage failure".into(),
            },
            other => WireError {
                kind: other.kind(),
                message: other.to_string(),
            },
        }
    }
}

impl From<WireError> for Error {
    fn from(wire: WireError) -> Self {
        Error::Remote(wire)
    }
}
