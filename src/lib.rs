//! sf-remux: elementary-stream samples in, appendable fMP4 fragments out.
//!
//! Two remuxers share one capability trait ([`Remux`]):
//!
//! - [`MediaRemuxer`] rebuilds `moof`/`mdat` pairs from demuxed video access
//!   units, audio frames, timed metadata and captions.
//! - [`PassthroughRemuxer`] takes bytes that are already fragmented and only
//!   re-derives their timeline.
//!
//! [`Remuxer::for_stream`] picks between them from the first bytes of a
//! stream. Every call is synchronous and returns one [`RemuxResult`];
//! anomalies degrade to warnings and per-track omissions, never to a failed
//! call.

pub mod audio;
pub mod cues;
pub mod error;
pub mod init;
pub mod passthrough;
pub mod reference;
pub mod remuxer;
pub mod timestamp;
pub mod track;
pub mod video;

pub use error::RemuxError;
pub use passthrough::PassthroughRemuxer;
pub use remuxer::{
    Cue, CueBatch, Fragment, InitSegment, InitTrackSegment, MediaRemuxer, Remux, RemuxResult,
    Remuxer,
};
pub use sf_core::{AudioCodec, RemuxConfig, TrackKind, VideoCodec};
pub use timestamp::{normalize_pts, TimestampRef};
pub use track::{
    AudioSample, AudioTrack, CaptionSample, CaptionTrack, DemuxedTracks, MetadataSample,
    MetadataTrack, TrackState, VideoDimensions, VideoSample, VideoTrack,
};
