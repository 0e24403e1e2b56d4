//! Demuxed input tracks and per-track continuity state.

use bytes::{Bytes, BytesMut};
use sf_core::{AudioCodec, VideoCodec};

/// Default input timescale for transport-stream sourced tracks.
pub const MPEG_TS_TIMESCALE: u32 = 90_000;

/// One coded video access unit.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSample {
    pub pts: i64,
    pub dts: i64,
    pub key: bool,
    /// NAL units in decode order, without start codes or length prefixes.
    pub units: Vec<Bytes>,
}

impl VideoSample {
    pub fn new(pts: i64, dts: i64, key: bool, units: Vec<Bytes>) -> Self {
        Self {
            pts,
            dts,
            key,
            units,
        }
    }

    /// Size of the sample once every unit carries a 4-byte length prefix.
    pub fn payload_len(&self) -> u64 {
        self.units.iter().map(|u| 4 + u.len() as u64).sum()
    }
}

/// One audio frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSample {
    pub pts: i64,
    pub unit: Bytes,
}

impl AudioSample {
    pub fn new(pts: i64, unit: Bytes) -> Self {
        Self { pts, unit }
    }
}

/// One timed metadata payload (e.g. ID3).
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataSample {
    pub pts: i64,
    pub dts: i64,
    pub data: Bytes,
}

/// One caption payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionSample {
    pub pts: i64,
    pub data: Bytes,
}

/// Display geometry that an emitted video init segment depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoDimensions {
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: (u32, u32),
}

/// A video elementary stream and the samples demuxed for this call.
#[derive(Debug, Clone)]
pub struct VideoTrack {
    pub id: u32,
    pub codec: VideoCodec,
    /// Input timescale of pts/dts.
    pub timescale: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: (u32, u32),
    /// avcC / hvcC record.
    pub codec_private: Vec<u8>,
    pub samples: Vec<VideoSample>,
}

impl VideoTrack {
    pub fn new(codec: VideoCodec, width: u32, height: u32, codec_private: Vec<u8>) -> Self {
        Self {
            id: 1,
            codec,
            timescale: MPEG_TS_TIMESCALE,
            width,
            height,
            pixel_ratio: (1, 1),
            codec_private,
            samples: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> VideoDimensions {
        VideoDimensions {
            width: self.width,
            height: self.height,
            pixel_ratio: self.pixel_ratio,
        }
    }
}

/// An audio elementary stream and the frames demuxed for this call.
#[derive(Debug, Clone)]
pub struct AudioTrack {
    pub id: u32,
    pub codec: AudioCodec,
    /// Input timescale of pts.
    pub timescale: u32,
    /// Output timescale; one tick per PCM sample.
    pub sample_rate: u32,
    pub channels: u16,
    /// AudioSpecificConfig for AAC, dac3 payload for AC-3.
    pub codec_private: Vec<u8>,
    pub samples: Vec<AudioSample>,
}

impl AudioTrack {
    pub fn new(codec: AudioCodec, sample_rate: u32, channels: u16, codec_private: Vec<u8>) -> Self {
        Self {
            id: 2,
            codec,
            timescale: MPEG_TS_TIMESCALE,
            sample_rate,
            channels,
            codec_private,
            samples: Vec::new(),
        }
    }

    /// Input ticks per output tick.
    pub(crate) fn scale_factor(&self) -> f64 {
        if self.sample_rate == 0 {
            return 1.0;
        }
        self.timescale as f64 / self.sample_rate as f64
    }

    /// Duration of one frame in input ticks.
    pub(crate) fn frame_duration(&self) -> f64 {
        self.codec.samples_per_frame() as f64 * self.scale_factor()
    }
}

#[derive(Debug, Clone)]
pub struct MetadataTrack {
    pub timescale: u32,
    pub samples: Vec<MetadataSample>,
}

impl Default for MetadataTrack {
    fn default() -> Self {
        Self {
            timescale: MPEG_TS_TIMESCALE,
            samples: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptionTrack {
    pub timescale: u32,
    pub samples: Vec<CaptionSample>,
}

impl Default for CaptionTrack {
    fn default() -> Self {
        Self {
            timescale: MPEG_TS_TIMESCALE,
            samples: Vec::new(),
        }
    }
}

/// Everything the demuxer produced for one call.
///
/// A `None` audio or video track means the stream does not declare one.
/// Samples left in a track after a call were not consumed and are retried
/// on the next call.
#[derive(Debug, Clone, Default)]
pub struct DemuxedTracks {
    pub audio: Option<AudioTrack>,
    pub video: Option<VideoTrack>,
    pub metadata: MetadataTrack,
    pub text: CaptionTrack,
    /// Already fragmented container bytes, consumed by the passthrough path.
    pub fragmented: Option<BytesMut>,
}

/// Continuity memory of one output track across calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackState {
    /// Where the next fragment should start, in input ticks relative to the
    /// shared reference.
    pub next_timestamp: Option<i64>,
    /// The next fragment immediately follows the previous one.
    pub contiguous: bool,
    /// Duration of the last emitted sample, in input ticks.
    pub last_sample_duration: Option<i64>,
    /// `mfhd` sequence number of the last emitted fragment.
    pub sequence_number: u32,
    /// Video only: geometry the current init segment was built with.
    pub dimensions: Option<VideoDimensions>,
}

impl TrackState {
    /// Stop trusting that the next fragment follows the last one.
    ///
    /// The expected next timestamp is kept so a fragment landing close to
    /// it can still be judged contiguous.
    pub fn reset_next(&mut self) {
        self.contiguous = false;
    }

    /// Forget the expected next timestamp as well; it is meaningless once
    /// the shared reference moves.
    pub fn restart(&mut self) {
        self.next_timestamp = None;
        self.contiguous = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_len_counts_length_prefixes() {
        let sample = VideoSample::new(
            0,
            0,
            true,
            vec![Bytes::from_static(&[1, 2, 3]), Bytes::from_static(&[4])],
        );
        assert_eq!(sample.payload_len(), 4 + 3 + 4 + 1);
    }

    #[test]
    fn audio_frame_duration_in_input_ticks() {
        let mut track = AudioTrack::new(AudioCodec::Aac, 48_000, 2, vec![0x11, 0x90]);
        assert_eq!(track.frame_duration(), 1024.0 * 90_000.0 / 48_000.0);
        track.timescale = 48_000;
        assert_eq!(track.frame_duration(), 1024.0);
    }

    #[test]
    fn reset_next_keeps_sequence_number() {
        let mut state = TrackState {
            next_timestamp: Some(9000),
            contiguous: true,
            sequence_number: 4,
            ..Default::default()
        };
        state.reset_next();
        assert_eq!(state.next_timestamp, Some(9000));
        assert!(!state.contiguous);
        assert_eq!(state.sequence_number, 4);

        state.restart();
        assert_eq!(state.next_timestamp, None);
        assert_eq!(state.sequence_number, 4);
    }
}
