//! Init-segment builder.
//!
//! Decides when the emitted init segment no longer describes the tracks and
//! builds one `ftyp`+`moov` per track through `sf_media`.

use bytes::Bytes;
use sf_core::{AudioCodec, RemuxConfig, TrackKind, VideoCodec};
use sf_media::{write_init_segment, SampleEntry, TrackConfig};

use crate::audio::is_raw_mpeg;
use crate::remuxer::InitTrackSegment;
use crate::track::{AudioTrack, TrackState, VideoTrack};

/// What the last emitted init segment covered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitState {
    pub generated: bool,
    pub has_audio: bool,
    pub has_video: bool,
}

impl InitState {
    /// Whether the emitted init segment must be rebuilt for these tracks.
    pub fn is_stale(
        &self,
        audio: Option<&AudioTrack>,
        video: Option<&VideoTrack>,
        video_state: &TrackState,
    ) -> bool {
        if !self.generated {
            return true;
        }
        let video_with_samples = video.filter(|v| !v.samples.is_empty());
        if let Some(video) = video_with_samples {
            match video_state.dimensions {
                Some(dims) if dims != video.dimensions() => {
                    tracing::debug!(
                        old = ?dims,
                        new = ?video.dimensions(),
                        "Video geometry changed, rebuilding init segment"
                    );
                    return true;
                }
                _ => {}
            }
            if !self.has_video {
                tracing::debug!("Video track appeared, rebuilding init segment");
                return true;
            }
        }
        if audio.is_some_and(|a| !a.samples.is_empty()) && !self.has_audio {
            tracing::debug!("Audio track appeared, rebuilding init segment");
            return true;
        }
        false
    }
}

/// Codec string advertised for a video track.
pub fn video_codec_string(codec: VideoCodec) -> &'static str {
    match codec {
        VideoCodec::H264 => "avc1",
        VideoCodec::H265 => "hvc1",
    }
}

/// Codec string advertised for an audio track.
pub fn audio_codec_string(codec: AudioCodec, raw: bool) -> &'static str {
    match codec {
        AudioCodec::Aac => "mp4a.40.2",
        AudioCodec::Mp3 if raw => "",
        AudioCodec::Mp3 => "mp3",
        AudioCodec::Ac3 => "ac-3",
    }
}

/// Init segment of a video track; the output timescale is the input one.
pub fn video_init_segment(track: &VideoTrack) -> InitTrackSegment {
    let config = TrackConfig {
        track_id: track.id,
        timescale: track.timescale,
        entry: SampleEntry::Video {
            codec: track.codec,
            width: track.width,
            height: track.height,
            pixel_ratio: track.pixel_ratio,
        },
        codec_private: track.codec_private.clone(),
    };
    InitTrackSegment {
        kind: TrackKind::Video,
        container: "video/mp4",
        codec: video_codec_string(track.codec).to_string(),
        data: Bytes::from(write_init_segment(&config)),
        timescale: track.timescale,
        track_id: track.id,
    }
}

/// Init segment of an audio track; the output timescale is the sample rate.
///
/// Raw MPEG audio needs no init boxes and gets an empty payload.
pub fn audio_init_segment(track: &AudioTrack, config: &RemuxConfig) -> InitTrackSegment {
    let raw = is_raw_mpeg(track, config);
    let (container, data) = if raw {
        ("audio/mpeg", Bytes::new())
    } else {
        let track_config = TrackConfig {
            track_id: track.id,
            timescale: track.sample_rate,
            entry: SampleEntry::Audio {
                codec: track.codec,
                sample_rate: track.sample_rate,
                channels: track.channels,
            },
            codec_private: track.codec_private.clone(),
        };
        ("audio/mp4", Bytes::from(write_init_segment(&track_config)))
    };
    InitTrackSegment {
        kind: TrackKind::Audio,
        container,
        codec: audio_codec_string(track.codec, raw).to_string(),
        data,
        timescale: track.sample_rate,
        track_id: track.id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{AudioSample, VideoSample};

    fn video_track() -> VideoTrack {
        let mut track = VideoTrack::new(VideoCodec::H264, 1280, 720, vec![1, 0x64, 0, 0x1f]);
        track.samples.push(VideoSample::new(0, 0, true, vec![Bytes::from_static(&[0x65])]));
        track
    }

    fn audio_track(codec: AudioCodec) -> AudioTrack {
        let mut track = AudioTrack::new(codec, 44_100, 2, vec![0x12, 0x10]);
        track.samples.push(AudioSample::new(0, Bytes::from_static(&[0xFF])));
        track
    }

    #[test]
    fn not_generated_is_stale() {
        assert!(InitState::default().is_stale(None, None, &TrackState::default()));
    }

    #[test]
    fn geometry_change_is_stale() {
        let state = InitState {
            generated: true,
            has_audio: false,
            has_video: true,
        };
        let video = video_track();
        let mut video_state = TrackState {
            dimensions: Some(video.dimensions()),
            ..Default::default()
        };
        assert!(!state.is_stale(None, Some(&video), &video_state));

        video_state.dimensions = Some(crate::track::VideoDimensions {
            width: 640,
            ..video.dimensions()
        });
        assert!(state.is_stale(None, Some(&video), &video_state));
    }

    #[test]
    fn late_audio_is_stale() {
        let state = InitState {
            generated: true,
            has_audio: false,
            has_video: true,
        };
        let audio = audio_track(AudioCodec::Aac);
        assert!(state.is_stale(Some(&audio), None, &TrackState::default()));

        let empty = AudioTrack::new(AudioCodec::Aac, 44_100, 2, vec![]);
        assert!(!state.is_stale(Some(&empty), None, &TrackState::default()));
    }

    #[test]
    fn audio_init_uses_sample_rate_timescale() {
        let seg = audio_init_segment(&audio_track(AudioCodec::Aac), &RemuxConfig::default());
        assert_eq!(seg.timescale, 44_100);
        assert_eq!(seg.container, "audio/mp4");
        assert_eq!(seg.codec, "mp4a.40.2");
        assert_eq!(&seg.data[4..8], b"ftyp");
    }

    #[test]
    fn raw_mpeg_init_is_empty() {
        let config = RemuxConfig {
            mpeg_audio_raw: true,
            ..Default::default()
        };
        let seg = audio_init_segment(&audio_track(AudioCodec::Mp3), &config);
        assert_eq!(seg.container, "audio/mpeg");
        assert!(seg.data.is_empty());
        assert_eq!(seg.codec, "");
    }

    #[test]
    fn video_init_keeps_input_timescale() {
        let seg = video_init_segment(&video_track());
        assert_eq!(seg.timescale, 90_000);
        assert_eq!(seg.container, "video/mp4");
        assert!(seg.data.windows(4).any(|w| w == b"avcC"));
    }
}
