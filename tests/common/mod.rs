//! Shared test harness for integration tests.
//!
//! Provides [`RemuxHarness`], which owns a [`MediaRemuxer`] and the
//! demuxed tracks fed to it, plus sample builders and helpers that parse
//! emitted fragments back through `sf_media`.

#![allow(dead_code)]

use bytes::Bytes;
use sf_media::{parse_fragments, parse_init_segment, InitData, TrackFragment};
use sf_remux::{
    AudioCodec, AudioSample, AudioTrack, DemuxedTracks, Fragment, MediaRemuxer, Remux,
    RemuxConfig, RemuxResult, VideoCodec, VideoSample, VideoTrack,
};

pub const VIDEO_TIMESCALE: u32 = 90_000;
pub const FRAME: i64 = 3000;

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn video_track() -> VideoTrack {
    VideoTrack::new(VideoCodec::H264, 1280, 720, vec![0x01, 0x64, 0x00, 0x1f, 0xff])
}

/// 48 kHz AAC with input timestamps in the sample rate.
pub fn audio_track() -> AudioTrack {
    let mut track = AudioTrack::new(AudioCodec::Aac, 48_000, 2, vec![0x11, 0x90]);
    track.timescale = 48_000;
    track
}

pub fn video_sample(pts: i64, dts: i64, key: bool) -> VideoSample {
    VideoSample::new(pts, dts, key, vec![Bytes::from_static(&[0x65, 0x88, 0x84, 0x00])])
}

/// Samples with pts == dts at the given decode times; the first is a keyframe.
pub fn video_run(dts: &[i64]) -> Vec<VideoSample> {
    dts.iter()
        .enumerate()
        .map(|(i, &t)| video_sample(t, t, i == 0))
        .collect()
}

pub fn audio_run(pts: &[i64]) -> Vec<AudioSample> {
    pts.iter()
        .map(|&p| AudioSample::new(p, Bytes::from_static(&[0x21, 0x10, 0x04])))
        .collect()
}

/// A transcoding remuxer together with the tracks it is fed.
pub struct RemuxHarness {
    pub remuxer: MediaRemuxer,
    pub tracks: DemuxedTracks,
    /// Parsed from the most recent init segment.
    pub init: Option<InitData>,
}

impl RemuxHarness {
    /// Video-only stream with default configuration.
    pub fn video() -> Self {
        Self::with_config(RemuxConfig::default(), true, false)
    }

    /// Audio and video stream with default configuration.
    pub fn audio_video() -> Self {
        Self::with_config(RemuxConfig::default(), true, true)
    }

    pub fn with_config(config: RemuxConfig, video: bool, audio: bool) -> Self {
        init_tracing();
        Self {
            remuxer: MediaRemuxer::new(config),
            tracks: DemuxedTracks {
                video: video.then(video_track),
                audio: audio.then(audio_track),
                ..Default::default()
            },
            init: None,
        }
    }

    pub fn push_video(&mut self, samples: Vec<VideoSample>) {
        if let Some(video) = self.tracks.video.as_mut() {
            video.samples.extend(samples);
        }
    }

    pub fn push_audio(&mut self, samples: Vec<AudioSample>) {
        if let Some(audio) = self.tracks.audio.as_mut() {
            audio.samples.extend(samples);
        }
    }

    /// Run one call, remembering any init segment it emitted.
    pub fn remux(&mut self, time_offset: f64, accurate: bool, flush: bool) -> RemuxResult {
        let result = self
            .remuxer
            .remux(&mut self.tracks, time_offset, accurate, flush);
        if let Some(init) = &result.init_segment {
            let mut combined = InitData::default();
            for track in &init.tracks {
                if let Ok(parsed) = parse_init_segment(&track.data) {
                    combined.tracks.extend(parsed.tracks);
                }
            }
            self.init = Some(combined);
        }
        result
    }

    /// Parse a fragment's `moof` against the last init segment.
    pub fn parse(&self, fragment: &Fragment) -> TrackFragment {
        let init = self.init.clone().unwrap_or_default();
        parse_fragments(&fragment.header, &init)
            .expect("fragment header parses")
            .remove(0)
    }
}
