//! Passthrough remuxer for input that is already fragmented MP4.
//!
//! The boxes are handed on as they are. Only the timeline is re-derived:
//! fragment start and duration come from `tfdt`/`trun`, the shared
//! reference is checked against the playlist time, and every `tfdt` is
//! rewritten in place relative to that reference.

use bytes::Bytes;
use sf_core::{RemuxConfig, TrackKind};
use sf_media::{
    extract_init_segment, parse_fragments, parse_init_segment, patch_encryption, InitData,
    TrackFragment,
};

use crate::cues::{flush_captions, flush_metadata};
use crate::error::RemuxError;
use crate::remuxer::{Fragment, InitSegment, InitTrackSegment, Remux, RemuxResult};
use crate::timestamp::{secs_to_ticks, TimestampRef};
use crate::track::DemuxedTracks;

#[derive(Debug, Clone, Default)]
pub struct PassthroughRemuxer {
    config: RemuxConfig,
    /// Init segment bytes, with key ids patched in.
    init_data: Option<Bytes>,
    init_tracks: Option<InitData>,
    key_id: Option<[u8; 16]>,
    emit_init: bool,
    reference: Option<TimestampRef>,
    /// End of the last fragment, in output seconds.
    last_end_time: Option<f64>,
}

impl PassthroughRemuxer {
    pub fn new(config: RemuxConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &RemuxConfig {
        &self.config
    }

    pub fn reference(&self) -> Option<TimestampRef> {
        self.reference
    }

    /// Cache the init segment delivered out of band (e.g. from a playlist),
    /// patching `key_id` into any protected track.
    pub fn set_init_data(
        &mut self,
        init: &[u8],
        key_id: Option<[u8; 16]>,
    ) -> Result<(), RemuxError> {
        let mut init = init.to_vec();
        let tracks = parse_init_segment(&init)?;
        if tracks.is_empty() {
            return Err(RemuxError::InitSegment(
                "init segment has no audio or video track".into(),
            ));
        }

        match key_id {
            Some(key) => {
                let patched = patch_encryption(&mut init, &key)?;
                tracing::debug!(patched, "Applied key id to protected tracks");
            }
            None => {
                for track in tracks.tracks.iter().filter(|t| t.encrypted) {
                    tracing::warn!(
                        track_id = track.id,
                        "Track is encrypted but no key id was supplied"
                    );
                }
            }
        }

        self.init_data = Some(Bytes::from(init));
        self.init_tracks = Some(tracks);
        self.key_id = key_id;
        self.emit_init = true;
        Ok(())
    }

    /// Derive the init segment from fragmented bytes that carry a `moov`.
    fn generate_init_segment(&mut self, data: &[u8]) -> Result<(), RemuxError> {
        let Some(init) = extract_init_segment(data)? else {
            return Err(RemuxError::InitSegment(
                "fragmented input carries no moov".into(),
            ));
        };
        self.set_init_data(&init, self.key_id)
    }

    fn init_track_segment(&self, init: &InitData) -> InitTrackSegment {
        let (kind, container) = match (init.audio().is_some(), init.video().is_some()) {
            (true, true) => (TrackKind::AudioVideo, "video/mp4"),
            (true, false) => (TrackKind::Audio, "audio/mp4"),
            _ => (TrackKind::Video, "video/mp4"),
        };
        let primary = init.video().or_else(|| init.audio());
        let codec = init
            .tracks
            .iter()
            .map(|t| String::from_utf8_lossy(&t.codec).into_owned())
            .collect::<Vec<_>>()
            .join(",");
        InitTrackSegment {
            kind,
            container,
            codec,
            data: self.init_data.clone().unwrap_or_default(),
            timescale: primary.map_or(1, |t| t.timescale),
            track_id: primary.map_or(0, |t| t.id),
        }
    }
}

fn timescale_of(init: &InitData, track_id: u32) -> u32 {
    init.track(track_id).map_or(1, |t| t.timescale.max(1))
}

/// The fragment timing is read from: video if present, then audio.
fn primary_fragment<'a>(
    init: &InitData,
    fragments: &'a [TrackFragment],
) -> Option<&'a TrackFragment> {
    let primary_id = init.video().or_else(|| init.audio()).map(|t| t.id);
    fragments
        .iter()
        .find(|f| Some(f.track_id) == primary_id)
        .or_else(|| fragments.first())
}

impl Remux for PassthroughRemuxer {
    fn remux(
        &mut self,
        tracks: &mut DemuxedTracks,
        time_offset: f64,
        accurate: bool,
        _flush: bool,
    ) -> RemuxResult {
        let mut result = RemuxResult::default();
        let last_end_time = *self.last_end_time.get_or_insert(time_offset);

        let Some(mut data) = tracks.fragmented.take().filter(|d| !d.is_empty()) else {
            return result;
        };

        if self.init_tracks.is_none() {
            if let Err(err) = self.generate_init_segment(&data) {
                tracing::warn!(%err, "Failed to generate init segment from fragmented input");
                result.errors.push(err);
                return result;
            }
        }
        let Some(init) = self.init_tracks.clone() else {
            return result;
        };

        let fragments = match parse_fragments(&data, &init) {
            Ok(fragments) => fragments,
            Err(err) => {
                tracing::warn!(%err, "Failed to parse fragmented input");
                result.errors.push(err.into());
                return result;
            }
        };

        let primary = primary_fragment(&init, &fragments);
        let duration = primary.map_or(0.0, |f| {
            f.duration as f64 / timescale_of(&init, f.track_id) as f64
        });
        let start_dts = fragments
            .iter()
            .filter(|f| f.has_decode_time())
            .map(|f| f.base_decode_time as f64 / timescale_of(&init, f.track_id) as f64)
            .min_by(f64::total_cmp);
        let decode_time = start_dts.unwrap_or(time_offset);

        let (timescale, track_id) =
            primary.map_or((1, 0), |f| (timescale_of(&init, f.track_id), f.track_id));
        let invalid = match self.reference {
            None => true,
            Some(reference) => {
                let start = decode_time - reference.secs();
                (start - time_offset).abs() > duration.max(1.0)
                    || (accurate && reference.timescale != timescale)
            }
        };
        if invalid {
            let base_time = secs_to_ticks(decode_time - time_offset, timescale);
            let reference = TimestampRef::new(base_time, timescale, track_id);
            if let Some(old) = self.reference {
                tracing::warn!(
                    old_base_time = old.base_time,
                    old_timescale = old.timescale,
                    new_base_time = reference.base_time,
                    new_timescale = reference.timescale,
                    adjust_secs = reference.secs() - old.secs(),
                    "Adjusting passthrough timestamp reference"
                );
                result.timeline_reset = true;
            }
            self.reference = Some(reference);
        }
        let Some(reference) = self.reference else {
            return result;
        };

        if self.emit_init {
            result.init_segment = Some(InitSegment {
                tracks: vec![self.init_track_segment(&init)],
                reference: Some(reference),
            });
            self.emit_init = false;
        }

        let has_audio = init.audio().is_some();
        let has_video = init.video().is_some();
        let start = if has_audio {
            decode_time - reference.secs()
        } else {
            last_end_time
        };
        let end = start + duration;

        for fragment in fragments.iter().filter(|f| f.has_decode_time()) {
            let offset = reference.base_in(timescale_of(&init, fragment.track_id));
            let rebased = (fragment.base_decode_time as i64 - offset).max(0) as u64;
            if let Err(err) = fragment.rewrite_decode_time(&mut data, rebased) {
                tracing::warn!(%err, track_id = fragment.track_id, "Failed to rewrite decode time");
                result.errors.push(err.into());
            }
        }

        if duration > 0.0 {
            self.last_end_time = Some(end);
        } else {
            tracing::warn!(duration, "Fragment duration is not positive, resetting contiguity");
            self.reset_next_timestamp();
        }

        let timing = fragments
            .iter()
            .find(|f| init.video().is_some_and(|v| v.id == f.track_id))
            .or(primary);
        let sample_count = timing.map_or(0, |f| f.sample_count as usize);
        let first_keyframe = timing.and_then(|f| f.first_keyframe);
        let independent = first_keyframe == Some(0);
        let dropped = first_keyframe.unwrap_or(sample_count);

        let kind = match (has_audio, has_video) {
            (true, true) => TrackKind::AudioVideo,
            (true, false) => TrackKind::Audio,
            _ => TrackKind::Video,
        };
        let fragment = Fragment {
            kind,
            header: Bytes::new(),
            payload: data.freeze(),
            start_pts: start,
            end_pts: end,
            start_dts: start,
            end_dts: end,
            sample_count,
            dropped,
            independent,
        };
        if kind == TrackKind::Audio {
            result.audio = Some(fragment);
        } else {
            result.video = Some(fragment);
        }
        result.independent = independent;

        result.metadata = flush_metadata(&mut tracks.metadata, &reference, time_offset);
        result.text = flush_captions(&mut tracks.text, &reference, time_offset);
        result
    }

    fn reset_timestamp(&mut self, reference: Option<TimestampRef>) {
        self.reference = reference;
        self.last_end_time = None;
    }

    fn reset_next_timestamp(&mut self) {
        self.last_end_time = None;
    }

    fn reset_init_segment(&mut self) {
        self.emit_init = self.init_data.is_some();
    }

    fn destroy(&mut self) {
        *self = Self::new(self.config.clone());
    }
}
