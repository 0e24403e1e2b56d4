//! High-level fMP4 writer functions.
//!
//! Provides `write_init_segment` and `write_moof`, the two pure functions the
//! remuxer needs: track configuration in, init bytes out; sample table in,
//! fragment header out.

use super::boxes::{self, TrunSample};
use serde::{Deserialize, Serialize};
use sf_core::{AudioCodec, VideoCodec};

/// Size of the plain (32-bit size) `mdat` header the remuxer prefixes to
/// every payload. The `trun` data offset assumes it.
pub const MDAT_HEADER_SIZE: usize = 8;

/// Trun sample flags for a sync sample (depends_on = 2).
const SYNC_SAMPLE_FLAGS: u32 = 0x02000000;
/// Trun sample flags for a non-sync sample (depends_on = 1, is_non_sync).
const NON_SYNC_SAMPLE_FLAGS: u32 = 0x01010000;

/// Per-kind sample description of a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SampleEntry {
    Video {
        codec: VideoCodec,
        width: u32,
        height: u32,
        /// Pixel aspect ratio as (h_spacing, v_spacing).
        pixel_ratio: (u32, u32),
    },
    Audio {
        codec: AudioCodec,
        sample_rate: u32,
        channels: u16,
    },
}

/// Configuration for the single track of an fMP4 init segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackConfig {
    /// Track ID (1-based).
    pub track_id: u32,
    /// Media timescale (ticks per second).
    pub timescale: u32,
    /// Sample description.
    pub entry: SampleEntry,
    /// Codec-specific configuration: avcC/hvcC record for video,
    /// AudioSpecificConfig for AAC, dac3 payload for AC-3.
    pub codec_private: Vec<u8>,
}

/// One row of a fragment's sample table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentSample {
    /// Duration in the track timescale.
    pub duration: u32,
    /// Payload size in bytes, including any length prefixes.
    pub size: u32,
    /// Whether this sample is a sync sample.
    pub is_keyframe: bool,
    /// Composition time offset (pts - dts), signed.
    pub composition_offset: i32,
}

/// Generate an fMP4 initialization segment (ftyp + moov).
///
/// The init segment describes the track structure and codec configuration.
/// It must be appended before any fragment of the track.
pub fn write_init_segment(config: &TrackConfig) -> Vec<u8> {
    let ftyp = boxes::write_ftyp();

    let trak = match &config.entry {
        SampleEntry::Video {
            codec,
            width,
            height,
            pixel_ratio,
        } => {
            let entry = boxes::write_visual_entry(
                *codec,
                *width,
                *height,
                *pixel_ratio,
                &config.codec_private,
            );
            boxes::write_trak(config.track_id, config.timescale, *width, *height, &entry, true)
        }
        SampleEntry::Audio {
            codec,
            sample_rate,
            channels,
        } => {
            let entry =
                boxes::write_audio_entry(*codec, *sample_rate, *channels, &config.codec_private);
            boxes::write_trak(config.track_id, config.timescale, 0, 0, &entry, false)
        }
    };

    let moov = boxes::write_moov(config.timescale, config.track_id, &trak);

    let mut result = Vec::with_capacity(ftyp.len() + moov.len());
    result.extend_from_slice(&ftyp);
    result.extend_from_slice(&moov);
    result
}

/// Generate a fragment header (`moof`) describing `samples`.
///
/// The `trun` data offset points just past an [`MDAT_HEADER_SIZE`]-byte mdat
/// header that the caller appends directly after the returned bytes.
///
/// # Arguments
/// * `seq` - Fragment sequence number (1-based, incrementing).
/// * `track_id` - Track the fragment belongs to.
/// * `decode_time` - Base media decode time in the track timescale.
/// * `samples` - Per-sample table rows.
pub fn write_moof(seq: u32, track_id: u32, decode_time: u64, samples: &[FragmentSample]) -> Vec<u8> {
    let mfhd = boxes::write_mfhd(seq);
    let tfhd = boxes::write_tfhd(track_id);
    let tfdt = boxes::write_tfdt(decode_time);

    let trun_samples: Vec<TrunSample> = samples
        .iter()
        .map(|s| TrunSample {
            duration: s.duration,
            size: s.size,
            flags: if s.is_keyframe {
                SYNC_SAMPLE_FLAGS
            } else {
                NON_SYNC_SAMPLE_FLAGS
            },
            composition_time_offset: s.composition_offset,
        })
        .collect();

    // moof: 8 + mfhd + traf(8 + tfhd + tfdt + trun(8 + 12 + rows))
    let trun_size = 8 + 12 + trun_samples.len() * boxes::TRUN_SAMPLE_SIZE;
    let moof_size = 8 + mfhd.len() + 8 + tfhd.len() + tfdt.len() + trun_size;
    let data_offset = (moof_size + MDAT_HEADER_SIZE) as i32;

    let trun = boxes::write_trun(&trun_samples, data_offset);
    let traf = boxes::write_container_box(b"traf", &[&tfhd, &tfdt, &trun]);
    boxes::write_container_box(b"moof", &[&mfhd, &traf])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u32(data: &[u8], offset: usize) -> u32 {
        u32::from_be_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
    }

    fn video_config() -> TrackConfig {
        TrackConfig {
            track_id: 1,
            timescale: 90000,
            entry: SampleEntry::Video {
                codec: VideoCodec::H264,
                width: 1920,
                height: 1080,
                pixel_ratio: (1, 1),
            },
            codec_private: vec![0x01, 0x64, 0x00, 0x1F],
        }
    }

    #[test]
    fn test_init_segment_contains_ftyp_and_moov() {
        let init = write_init_segment(&video_config());

        assert_eq!(&init[4..8], b"ftyp");
        let ftyp_size = read_u32(&init, 0) as usize;
        assert_eq!(&init[ftyp_size + 4..ftyp_size + 8], b"moov");
        let moov_size = read_u32(&init, ftyp_size) as usize;
        assert_eq!(ftyp_size + moov_size, init.len());
    }

    #[test]
    fn test_init_segment_audio() {
        let config = TrackConfig {
            track_id: 2,
            timescale: 48000,
            entry: SampleEntry::Audio {
                codec: AudioCodec::Aac,
                sample_rate: 48000,
                channels: 2,
            },
            codec_private: vec![0x11, 0x90],
        };

        let init = write_init_segment(&config);
        assert_eq!(&init[4..8], b"ftyp");
        let ftyp_size = read_u32(&init, 0) as usize;
        assert_eq!(&init[ftyp_size + 4..ftyp_size + 8], b"moov");
        assert!(init.windows(4).any(|w| w == b"soun"));
        assert!(init.windows(4).any(|w| w == b"esds"));
    }

    #[test]
    fn test_moof_data_offset_points_past_mdat_header() {
        let samples = [
            FragmentSample {
                duration: 3000,
                size: 100,
                is_keyframe: true,
                composition_offset: 0,
            },
            FragmentSample {
                duration: 3000,
                size: 50,
                is_keyframe: false,
                composition_offset: 1500,
            },
        ];

        let moof = write_moof(7, 1, 90000, &samples);
        assert_eq!(&moof[4..8], b"moof");
        assert_eq!(read_u32(&moof, 0) as usize, moof.len());
        // mfhd sequence number
        assert_eq!(read_u32(&moof, 20), 7);

        let trun_pos = moof.windows(4).position(|w| w == b"trun").unwrap() - 4;
        let data_offset = read_u32(&moof, trun_pos + 16) as usize;
        assert_eq!(data_offset, moof.len() + MDAT_HEADER_SIZE);
        // second row's flags are non-sync
        assert_eq!(read_u32(&moof, trun_pos + 20 + 16 + 8), NON_SYNC_SAMPLE_FLAGS);
    }

    #[test]
    fn test_moof_empty_samples() {
        let moof = write_moof(1, 1, 0, &[]);
        assert_eq!(&moof[4..8], b"moof");
        assert_eq!(read_u32(&moof, 0) as usize, moof.len());
    }

    #[test]
    fn test_box_sizes_are_consistent() {
        let init = write_init_segment(&video_config());

        let mut pos = 0;
        let mut count = 0;
        while pos + 8 <= init.len() {
            let size = read_u32(&init, pos) as usize;
            assert!(size >= 8, "Box size too small at offset {}", pos);
            assert!(pos + size <= init.len(), "Box at offset {} extends beyond data", pos);
            pos += size;
            count += 1;
        }
        assert_eq!(pos, init.len(), "Boxes do not span entire init segment");
        assert_eq!(count, 2, "Expected exactly 2 top-level boxes (ftyp + moov)");
    }
}
