//! Fragmented MP4 (fMP4) serialization.
//!
//! This module generates ISO BMFF structures for appendable playback:
//! - Init segment (ftyp + moov with one track's configuration)
//! - Fragment headers (moof with one traf); the caller owns the mdat

pub(crate) mod boxes;
mod writer;

pub use writer::{
    write_init_segment, write_moof, FragmentSample, SampleEntry, TrackConfig, MDAT_HEADER_SIZE,
};
