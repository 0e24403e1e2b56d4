//! Non-fatal remux diagnostics.
//!
//! None of these abort a call. They are collected into
//! [`RemuxResult::errors`](crate::RemuxResult::errors) next to whatever
//! the other tracks produced.

use sf_core::TrackKind;

#[derive(Debug, thiserror::Error)]
pub enum RemuxError {
    /// The payload buffer for a track could not be allocated.
    #[error("failed to allocate {bytes} byte {track} payload")]
    Alloc { track: TrackKind, bytes: u64 },

    /// The passthrough remuxer has no usable init segment.
    #[error("init segment unavailable: {0}")]
    InitSegment(String),

    #[error("failed to parse fragmented input: {0}")]
    Parse(#[from] sf_media::Error),
}

impl RemuxError {
    /// Track the error concerns, if it is tied to one.
    pub fn track(&self) -> Option<TrackKind> {
        match self {
            Self::Alloc { track, .. } => Some(*track),
            Self::InitSegment(_) | Self::Parse(_) => None,
        }
    }
}
