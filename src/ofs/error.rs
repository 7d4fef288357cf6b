//! Error taxonomy shared by every engine operation.
//!
//! Each variant maps to a stable signed 32-bit code that crosses the wire
//! unchanged. There is no other error channel: host I/O failures are logged
//! with their source and folded to [`OfsError::Io`] at the operation
//! boundary.

use log::warn;
use std::io;
use thiserror::Error;

/// Result of an engine operation.
pub type OfsResult<T> = Result<T, OfsError>;

/// The wire code of a successful operation.
pub const SUCCESS: i32 = 0;

/// An engine operation failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum OfsError {
    /// The path or name does not resolve to a live entry.
    #[error("Not found")]
    NotFound,
    /// The session's user is not allowed to perform the operation.
    #[error("Permission denied")]
    PermissionDenied,
    /// A host I/O failure, or a corrupt chain.
    #[error("I/O error")]
    Io,
    /// The path is not absolute or has no components.
    #[error("Invalid path")]
    InvalidPath,
    /// The destination path or user name is already taken.
    #[error("File already exists")]
    FileExists,
    /// No free block, meta slot, user slot or directory entry.
    #[error("No space left")]
    NoSpace,
    /// The configuration or the container geometry is unusable.
    #[error("Invalid configuration")]
    InvalidConfig,
    /// The requested operation is not implemented.
    #[error("Not implemented")]
    NotImplemented,
    /// The session token does not name a live session.
    #[error("Invalid session")]
    InvalidSession,
    /// The directory still has live children.
    #[error("Directory not empty")]
    DirectoryNotEmpty,
    /// The operation's arguments do not fit the target entry.
    #[error("Invalid operation")]
    InvalidOperation,
}

impl OfsError {
    /// Returns the stable wire code of the error.
    pub fn code(self) -> i32 {
        match self {
            Self::NotFound => -1,
            Self::PermissionDenied => -2,
            Self::Io => -3,
            Self::InvalidPath => -4,
            Self::FileExists => -5,
            Self::NoSpace => -6,
            Self::InvalidConfig => -7,
            Self::NotImplemented => -8,
            Self::InvalidSession => -9,
            Self::DirectoryNotEmpty => -10,
            Self::InvalidOperation => -11,
        }
    }
}

impl From<io::Error> for OfsError {
    fn from(err: io::Error) -> Self {
        warn!("host i/o error: {err}");
        Self::Io
    }
}

/// Renders the stable human-readable message for a wire code.
pub fn error_message(code: i32) -> &'static str {
    match code {
        SUCCESS => "Success",
        -1 => "Not found",
        -2 => "Permission denied",
        -3 => "I/O error",
        -4 => "Invalid path",
        -5 => "File already exists",
        -6 => "No space left",
        -7 => "Invalid configuration",
        -8 => "Not implemented",
        -9 => "Invalid session",
        -10 => "Directory not empty",
        -11 => "Invalid operation",
        _ => "Unknown error",
    }
}
