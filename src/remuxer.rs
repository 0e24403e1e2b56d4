//! The transcoding remuxer, the shared capability trait and its output.

use bytes::Bytes;
use sf_core::{RemuxConfig, TrackKind};

use crate::audio::{fill_silence, remux_audio, AudioParams};
use crate::cues::{flush_captions, flush_metadata};
use crate::error::RemuxError;
use crate::init::{audio_init_segment, video_init_segment, InitState};
use crate::passthrough::PassthroughRemuxer;
use crate::reference::resolve_reference;
use crate::timestamp::{normalize_pts, start_pts, TimestampRef};
use crate::track::{AudioTrack, DemuxedTracks, TrackState, VideoTrack};
use crate::video::{first_keyframe, remux_video, VideoParams};

/// One appendable fragment of one track.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub kind: TrackKind,
    /// `moof` box; empty for raw MPEG audio and passthrough output.
    pub header: Bytes,
    /// `mdat` box (or the raw frames / the whole passthrough fragment).
    pub payload: Bytes,
    /// Seconds on the output timeline.
    pub start_pts: f64,
    pub end_pts: f64,
    pub start_dts: f64,
    pub end_dts: f64,
    pub sample_count: usize,
    /// Samples discarded before the first keyframe.
    pub dropped: usize,
    /// The fragment decodes without any earlier fragment.
    pub independent: bool,
}

impl Fragment {
    /// Header followed by payload, ready to append.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header.len() + self.payload.len());
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Init boxes for one track.
#[derive(Debug, Clone, PartialEq)]
pub struct InitTrackSegment {
    pub kind: TrackKind,
    /// MIME container, e.g. `video/mp4`.
    pub container: &'static str,
    pub codec: String,
    pub data: Bytes,
    /// Output timescale of the track.
    pub timescale: u32,
    pub track_id: u32,
}

/// Init segment emitted by a call.
#[derive(Debug, Clone, PartialEq)]
pub struct InitSegment {
    pub tracks: Vec<InitTrackSegment>,
    /// Shared reference in force when the segment was emitted.
    pub reference: Option<TimestampRef>,
}

/// One timed metadata or caption payload on the output timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    pub pts: f64,
    /// Metadata only.
    pub dts: Option<f64>,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CueBatch {
    pub kind: TrackKind,
    pub cues: Vec<Cue>,
}

/// Everything one call produced.
#[derive(Debug, Default)]
pub struct RemuxResult {
    pub audio: Option<Fragment>,
    pub video: Option<Fragment>,
    pub text: Option<CueBatch>,
    pub metadata: Option<CueBatch>,
    pub init_segment: Option<InitSegment>,
    /// The output starts with a keyframe (or carries audio only).
    pub independent: bool,
    /// The shared reference was replaced during this call.
    pub timeline_reset: bool,
    /// Non-fatal problems; affected tracks are missing from the result.
    pub errors: Vec<RemuxError>,
}

/// Capability shared by the transcoding and passthrough remuxers.
///
/// Calls on one instance must not overlap and must carry increasing,
/// non-overlapping sample runs.
pub trait Remux {
    /// Package one call's worth of samples.
    ///
    /// `time_offset` is the playlist time in seconds the samples should start
    /// at; `accurate` says that time can be trusted; `flush` marks the end of
    /// the stream so retained samples must be emitted.
    fn remux(
        &mut self,
        tracks: &mut DemuxedTracks,
        time_offset: f64,
        accurate: bool,
        flush: bool,
    ) -> RemuxResult;

    /// Replace (or clear) the shared reference.
    fn reset_timestamp(&mut self, reference: Option<TimestampRef>);

    /// Forget contiguity without touching the shared reference.
    fn reset_next_timestamp(&mut self);

    /// Force the next call to emit a fresh init segment.
    fn reset_init_segment(&mut self);

    /// Release all state.
    fn destroy(&mut self);
}

/// Rebuilds fragments from demuxed elementary-stream samples.
#[derive(Debug, Clone, Default)]
pub struct MediaRemuxer {
    config: RemuxConfig,
    reference: Option<TimestampRef>,
    init: InitState,
    video: TrackState,
    audio: TrackState,
}

impl MediaRemuxer {
    pub fn new(config: RemuxConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &RemuxConfig {
        &self.config
    }

    /// Current shared reference.
    pub fn reference(&self) -> Option<TimestampRef> {
        self.reference
    }

    pub fn video_state(&self) -> &TrackState {
        &self.video
    }

    pub fn audio_state(&self) -> &TrackState {
        &self.audio
    }

    /// Emit init boxes for the tracks with samples and, when allowed, settle
    /// the shared reference. Returns `None` if no track has samples.
    fn generate_init_segment(
        &mut self,
        tracks: &DemuxedTracks,
        time_offset: f64,
        accurate: bool,
        result: &mut RemuxResult,
    ) -> Option<InitSegment> {
        let audio = tracks.audio.as_ref().filter(|a| !a.samples.is_empty());
        let video = tracks.video.as_ref().filter(|v| !v.samples.is_empty());

        let mut segments = Vec::with_capacity(2);
        if let Some(audio) = audio {
            segments.push(audio_init_segment(audio, &self.config));
        }
        if let Some(video) = video {
            segments.push(video_init_segment(video));
            self.video.dimensions = Some(video.dimensions());
        }
        if segments.is_empty() {
            return None;
        }

        if self.reference.is_none() || accurate {
            let duration = fragment_duration(audio, video);
            if let Some(resolution) =
                resolve_reference(self.reference, video, audio, time_offset, duration)
            {
                if resolution.replaced {
                    result.timeline_reset = true;
                    self.video.restart();
                    self.audio.restart();
                }
                self.reference = Some(resolution.reference);
            }
        }

        self.init = InitState {
            generated: true,
            has_audio: audio.is_some(),
            has_video: video.is_some(),
        };
        tracing::debug!(
            tracks = segments.len(),
            reference = ?self.reference,
            "Emitting init segment"
        );
        Some(InitSegment {
            tracks: segments,
            reference: self.reference,
        })
    }
}

/// Rough span of the samples at hand, in seconds.
fn fragment_duration(audio: Option<&AudioTrack>, video: Option<&VideoTrack>) -> f64 {
    let video_span = video.map_or(0.0, |v| {
        let first = v.samples.first().map_or(0, |s| s.pts);
        let (min, max) = v.samples.iter().fold((i64::MAX, i64::MIN), |(lo, hi), s| {
            let pts = normalize_pts(s.pts, Some(first));
            (lo.min(pts), hi.max(pts))
        });
        (max - min).max(0) as f64 / v.timescale.max(1) as f64
    });
    let audio_span = audio.map_or(0.0, |a| match (a.samples.first(), a.samples.last()) {
        (Some(first), Some(last)) => {
            let last = normalize_pts(last.pts, Some(first.pts));
            ((last - first.pts) as f64 + a.frame_duration()) / a.timescale.max(1) as f64
        }
        _ => 0.0,
    });
    video_span.max(audio_span)
}

impl Remux for MediaRemuxer {
    fn remux(
        &mut self,
        tracks: &mut DemuxedTracks,
        time_offset: f64,
        accurate: bool,
        flush: bool,
    ) -> RemuxResult {
        let mut result = RemuxResult::default();
        let mut audio_time_offset = time_offset;
        let mut video_time_offset = time_offset;

        let has_audio = tracks.audio.is_some();
        let has_video = tracks.video.is_some();
        let video_len = tracks.video.as_ref().map_or(0, |v| v.samples.len());
        let enough_audio = tracks.audio.as_ref().is_some_and(|a| !a.samples.is_empty());
        let enough_video = video_len > 1 || (video_len > 0 && flush);
        let can_remux = ((!has_audio || enough_audio) && (!has_video || enough_video))
            || self.init.generated
            || flush;
        if !can_remux {
            return result;
        }

        if self.init.generated
            && self
                .init
                .is_stale(tracks.audio.as_ref(), tracks.video.as_ref(), &self.video)
        {
            self.reset_init_segment();
        }
        if !self.init.generated {
            let init_segment =
                self.generate_init_segment(tracks, time_offset, accurate, &mut result);
            result.init_segment = init_segment;
        }

        // A single retained sample is enough once the init segment exists.
        let enough_video = enough_video || (video_len > 0 && self.init.generated);

        let mut dropped = 0;
        let mut independent = true;
        if enough_video && !self.video.contiguous && self.config.force_key_frame_on_discontinuity {
            if let Some(video) = tracks.video.as_mut() {
                match first_keyframe(&video.samples) {
                    Some(0) => {}
                    Some(index) => {
                        tracing::warn!(
                            dropped = index,
                            total = video.samples.len(),
                            "Dropping video samples before the first keyframe"
                        );
                        let start = start_pts(video.samples.iter().map(|s| s.pts));
                        video.samples.drain(..index);
                        if let (Some(start), Some(first)) = (start, video.samples.first()) {
                            let key_pts = normalize_pts(first.pts, Some(start));
                            video_time_offset +=
                                (key_pts - start) as f64 / video.timescale.max(1) as f64;
                        }
                        dropped = index;
                    }
                    None => {
                        tracing::warn!(
                            total = video.samples.len(),
                            "No keyframe found in discontinuous video fragment"
                        );
                        independent = false;
                    }
                }
            }
        }

        let Some(reference) = self.reference.filter(|_| self.init.generated) else {
            return result;
        };

        if let (Some(audio), Some(video)) = (tracks.audio.as_ref(), tracks.video.as_ref()) {
            if enough_audio && enough_video {
                if let (Some(audio_first), Some(video_start)) = (
                    audio.samples.first(),
                    start_pts(video.samples.iter().map(|s| s.pts)),
                ) {
                    let video_ts = video.timescale.max(1) as f64;
                    let audio_in_video = (audio_first.pts as f64 * video_ts
                        / audio.timescale.max(1) as f64)
                        .round() as i64;
                    let delta_secs = (normalize_pts(audio_in_video, Some(video_start))
                        - video_start) as f64
                        / video_ts;
                    audio_time_offset += delta_secs.max(0.0);
                    video_time_offset += (-delta_secs).max(0.0);
                }
            }
        }

        if enough_audio {
            if let Some(audio) = tracks.audio.as_mut() {
                let params = AudioParams {
                    reference: &reference,
                    time_offset: audio_time_offset,
                    accurate,
                    video_time_offset: has_video.then_some(video_time_offset),
                    config: &self.config,
                };
                match remux_audio(audio, &mut self.audio, params) {
                    Ok(fragment) => result.audio = fragment,
                    Err(err) => result.errors.push(err),
                }
            }
        }

        if enough_video {
            if let Some(video) = tracks.video.as_mut() {
                let audio_duration = result
                    .audio
                    .as_ref()
                    .map_or(0.0, |a| a.end_pts - a.start_pts);
                let params = VideoParams {
                    reference: &reference,
                    time_offset: video_time_offset,
                    audio_duration,
                    dropped,
                    config: &self.config,
                };
                match remux_video(video, &mut self.video, params) {
                    Ok(fragment) => result.video = fragment,
                    Err(err) => result.errors.push(err),
                }
            }
        }

        if self.config.fill_empty_audio && !enough_audio {
            if let (Some(audio), Some(video_fragment)) = (tracks.audio.as_mut(), &result.video) {
                if fill_silence(audio, &self.audio, &reference, video_fragment) {
                    let params = AudioParams {
                        reference: &reference,
                        time_offset: audio_time_offset,
                        accurate: false,
                        video_time_offset: None,
                        config: &self.config,
                    };
                    match remux_audio(audio, &mut self.audio, params) {
                        Ok(fragment) => result.audio = fragment,
                        Err(err) => result.errors.push(err),
                    }
                }
            }
        }

        result.metadata = flush_metadata(&mut tracks.metadata, &reference, time_offset);
        result.text = flush_captions(&mut tracks.text, &reference, time_offset);

        result.independent = match &result.video {
            Some(video) => independent && video.independent,
            None => result.audio.is_some(),
        };
        result
    }

    fn reset_timestamp(&mut self, reference: Option<TimestampRef>) {
        tracing::debug!(?reference, "Resetting timestamp reference");
        self.reference = reference;
    }

    fn reset_next_timestamp(&mut self) {
        tracing::debug!("Resetting next timestamps");
        self.video.reset_next();
        self.audio.reset_next();
    }

    fn reset_init_segment(&mut self) {
        tracing::debug!("Resetting init segment");
        self.init = InitState::default();
        self.video.dimensions = None;
    }

    fn destroy(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

/// The remuxer for one stream, chosen once from its first bytes.
#[derive(Debug)]
pub enum Remuxer {
    Transmux(MediaRemuxer),
    Passthrough(PassthroughRemuxer),
}

impl Remuxer {
    /// Pick the passthrough remuxer when `data` already starts with an
    /// ISO BMFF box, the transcoding one otherwise.
    pub fn for_stream(data: &[u8], config: RemuxConfig) -> Self {
        if is_fragmented(data) {
            tracing::debug!("Input is already fragmented, using passthrough remuxer");
            Self::Passthrough(PassthroughRemuxer::new(config))
        } else {
            Self::Transmux(MediaRemuxer::new(config))
        }
    }
}

/// The first box of `data` is one a fragmented stream starts with.
fn is_fragmented(data: &[u8]) -> bool {
    data.len() >= 8 && matches!(&data[4..8], b"ftyp" | b"moov" | b"moof" | b"styp" | b"sidx")
}

impl Remux for Remuxer {
    fn remux(
        &mut self,
        tracks: &mut DemuxedTracks,
        time_offset: f64,
        accurate: bool,
        flush: bool,
    ) -> RemuxResult {
        match self {
            Self::Transmux(r) => r.remux(tracks, time_offset, accurate, flush),
            Self::Passthrough(r) => r.remux(tracks, time_offset, accurate, flush),
        }
    }

    fn reset_timestamp(&mut self, reference: Option<TimestampRef>) {
        match self {
            Self::Transmux(r) => r.reset_timestamp(reference),
            Self::Passthrough(r) => r.reset_timestamp(reference),
        }
    }

    fn reset_next_timestamp(&mut self) {
        match self {
            Self::Transmux(r) => r.reset_next_timestamp(),
            Self::Passthrough(r) => r.reset_next_timestamp(),
        }
    }

    fn reset_init_segment(&mut self) {
        match self {
            Self::Transmux(r) => r.reset_init_segment(),
            Self::Passthrough(r) => r.reset_init_segment(),
        }
    }

    fn destroy(&mut self) {
        match self {
            Self::Transmux(r) => r.destroy(),
            Self::Passthrough(r) => r.destroy(),
        }
    }
}
