//! Media-domain enums for track kinds and codecs.
//!
//! All enums serialize in lowercase (via `serde(rename_all = "lowercase")`) and
//! implement `Display` manually for consistent string representation.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// TrackKind
// ---------------------------------------------------------------------------

/// Kind of elementary stream a fragment or init segment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
    /// Muxed audio and video in one container (passthrough only).
    AudioVideo,
    Text,
    Metadata,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
            Self::AudioVideo => write!(f, "audiovideo"),
            Self::Text => write!(f, "text"),
            Self::Metadata => write!(f, "metadata"),
        }
    }
}

// ---------------------------------------------------------------------------
// VideoCodec
// ---------------------------------------------------------------------------

/// Video codecs the remuxer can package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H264 => write!(f, "h264"),
            Self::H265 => write!(f, "h265"),
        }
    }
}

// ---------------------------------------------------------------------------
// AudioCodec
// ---------------------------------------------------------------------------

/// Audio codecs the remuxer can package.
///
/// Every supported codec is frame based: each access unit decodes to a
/// fixed number of PCM samples, which fixes its duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    /// MPEG-1/2 Layer III.
    Mp3,
    Ac3,
}

impl AudioCodec {
    /// PCM samples decoded from one access unit.
    pub fn samples_per_frame(self) -> u32 {
        match self {
            Self::Aac => 1024,
            Self::Mp3 => 1152,
            Self::Ac3 => 1536,
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aac => write!(f, "aac"),
            Self::Mp3 => write!(f, "mp3"),
            Self::Ac3 => write!(f, "ac3"),
        }
    }
}
