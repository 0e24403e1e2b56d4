//! Error types for sf-media.

use std::io;
use thiserror::Error;

/// Result type for sf-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sf-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error while reading box data.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid MP4 box structure.
    #[error("Invalid MP4: {0}")]
    InvalidMp4(String),

    /// Missing required box.
    #[error("Missing required box: {0}")]
    MissingAtom(&'static str),

    /// Buffer too small for operation.
    #[error("Buffer underflow: need {need} bytes, have {have}")]
    BufferUnderflow { need: usize, have: usize },
}

impl Error {
    /// Create an invalid MP4 error.
    pub fn invalid_mp4(msg: impl Into<String>) -> Self {
        Self::InvalidMp4(msg.into())
    }
}
