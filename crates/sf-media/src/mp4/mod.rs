//! Parsing of already-fragmented MP4 bytes.
//!
//! Works on in-memory buffers: the passthrough remuxer receives whole
//! fragments and needs box offsets so it can patch them in place.

pub mod atoms;
mod fragment;
mod init;

pub use fragment::{parse_fragments, TrackFragment};
pub use init::{
    extract_init_segment, parse_init_segment, patch_encryption, HandlerKind, InitData, InitTrack,
};
