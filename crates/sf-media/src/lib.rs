//! sf-media: ISO BMFF (fragmented MP4) serialization and fragment parsing.
//!
//! This crate is the box-level collaborator of the remuxer. It knows how
//! boxes are laid out; it knows nothing about timelines.
//!
//! # Modules
//!
//! - [`fmp4`] - Fragmented MP4 serialization: init segments and fragment headers
//! - [`mp4`] - Parsing of already-fragmented bytes: init tracks, `moof`
//!   fragments, in-place decode-time rewrite, encryption key patching

pub mod error;
pub mod fmp4;
pub mod mp4;

// Re-export commonly used items at the crate root.
pub use error::{Error, Result};
pub use fmp4::{
    write_init_segment, write_moof, FragmentSample, SampleEntry, TrackConfig, MDAT_HEADER_SIZE,
};
pub use mp4::{
    extract_init_segment, parse_fragments, parse_init_segment, patch_encryption, HandlerKind,
    InitData, InitTrack, TrackFragment,
};
