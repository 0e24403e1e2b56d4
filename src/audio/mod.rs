//! Audio sample-table builder.
//!
//! Every supported codec is frame based, so each frame's expected duration
//! is fixed by the codec. When a video track is present the builder uses
//! that to resynchronize: frames that overlap what was already emitted are
//! dropped and gaps are filled with silence. Per-sample durations are then
//! taken from pts deltas so injected and real frames agree.

mod silent;

pub use silent::silent_frame;

use bytes::{BufMut, Bytes};
use sf_core::{AudioCodec, RemuxConfig, TrackKind};
use sf_media::{write_moof, FragmentSample, MDAT_HEADER_SIZE};

use crate::error::RemuxError;
use crate::remuxer::Fragment;
use crate::timestamp::{normalize_pts, secs_to_ticks, TimestampRef};
use crate::track::{AudioSample, AudioTrack, TrackState};
use crate::video::allocate_payload;

/// Per-call inputs of [`remux_audio`] besides the track itself.
#[derive(Debug, Clone, Copy)]
pub struct AudioParams<'a> {
    pub reference: &'a TimestampRef,
    /// Playlist time this fragment should start at, in seconds.
    pub time_offset: f64,
    pub accurate: bool,
    /// Time offset of the companion video track; `None` without video.
    pub video_time_offset: Option<f64>,
    pub config: &'a RemuxConfig,
}

/// Whether frames of this track go out without `moof`/`mdat` boxes.
pub fn is_raw_mpeg(track: &AudioTrack, config: &RemuxConfig) -> bool {
    config.mpeg_audio_raw && track.codec == AudioCodec::Mp3
}

/// Build a fragment from every sample in `track`.
///
/// Returns `Ok(None)` when nothing is left to emit after filtering. On
/// error `state` is left untouched.
pub fn remux_audio(
    track: &mut AudioTrack,
    state: &mut TrackState,
    params: AudioParams<'_>,
) -> Result<Option<Fragment>, RemuxError> {
    let mut samples = std::mem::take(&mut track.samples);
    let Some(first) = samples.first() else {
        return Ok(None);
    };

    let config = params.config;
    let input_ts = track.timescale;
    let scale = track.scale_factor();
    let frame_duration = track.frame_duration();
    let raw = is_raw_mpeg(track, config);
    let aligned = params.video_time_offset.is_some();
    let init_time = params.reference.base_in(input_ts);
    let offset_ticks = secs_to_ticks(params.time_offset, input_ts);

    let first_pts = normalize_pts(first.pts - init_time, Some(offset_ticks));
    let contiguous = match state.next_timestamp {
        Some(_) if state.contiguous => true,
        Some(next) => {
            let distance = (first_pts - next).abs() as f64;
            let tolerance = if params.accurate {
                config.accurate_audio_tolerance_ms * input_ts as f64 / 1000.0
            } else {
                config.audio_contiguity_frames as f64 * frame_duration
            };
            distance < tolerance
        }
        None => false,
    };
    tracing::debug!(
        contiguous,
        first_pts,
        next = ?state.next_timestamp,
        "Audio contiguity decision"
    );

    for sample in samples.iter_mut() {
        sample.pts = normalize_pts(sample.pts - init_time, Some(offset_ticks));
    }

    let next = match state.next_timestamp {
        Some(next) if contiguous => next,
        _ => {
            let before = samples.len();
            samples.retain(|s| s.pts >= 0);
            if samples.len() < before {
                tracing::debug!(
                    dropped = before - samples.len(),
                    "Dropped audio frames before the timeline start"
                );
            }
            let Some(first) = samples.first() else {
                return Ok(None);
            };
            match params.video_time_offset {
                Some(v) if v == 0.0 => 0,
                _ if params.accurate && !aligned => offset_ticks.max(0),
                _ => first.pts,
            }
        }
    };

    let mut dropped = 0;
    let mut next_pts = next as f64;
    if aligned {
        let (resynced, start, overlapped) =
            correct_drift(samples, next_pts, track, frame_duration, input_ts, config);
        samples = resynced;
        next_pts = start;
        dropped = overlapped;
    }
    if samples.is_empty() {
        return Ok(None);
    }
    let next = next_pts.round() as i64;

    let header_len = if raw { 0 } else { MDAT_HEADER_SIZE as u64 };
    let mdat_size = samples.iter().map(|s| s.unit.len() as u64).sum::<u64>() + header_len;
    let mut mdat = allocate_payload(mdat_size, TrackKind::Audio)?;
    if !raw {
        mdat.put_u32(mdat_size as u32);
        mdat.put_slice(b"mdat");
    }

    let samples_per_frame = track.codec.samples_per_frame();
    let mut rows: Vec<FragmentSample> = Vec::with_capacity(samples.len());
    let mut first_pts = next;
    let mut last_pts: Option<i64> = None;
    for (i, sample) in samples.iter().enumerate() {
        let pts = if i == 0 && contiguous { next } else { sample.pts };
        match (last_pts, rows.last_mut()) {
            (Some(prev), Some(row)) => {
                let duration = ((pts - prev) as f64 / scale).round() as i64;
                row.duration = u32::try_from(duration).unwrap_or(0);
            }
            _ => first_pts = pts,
        }
        mdat.put_slice(&sample.unit);
        rows.push(FragmentSample {
            duration: samples_per_frame,
            size: sample.unit.len() as u32,
            is_keyframe: true,
            composition_offset: 0,
        });
        last_pts = Some(pts);
    }
    let last_pts = last_pts.unwrap_or(first_pts);
    let end = (last_pts as f64 + scale * samples_per_frame as f64).round() as i64;

    let sequence_number = state.sequence_number.wrapping_add(1);
    let header = if raw {
        Bytes::new()
    } else {
        let decode_time = (first_pts as f64 / scale).round().max(0.0) as u64;
        Bytes::from(write_moof(sequence_number, track.id, decode_time, &rows))
    };

    state.sequence_number = sequence_number;
    state.next_timestamp = Some(end);
    state.contiguous = true;
    state.last_sample_duration = Some((scale * samples_per_frame as f64).round() as i64);

    let secs = |ticks: i64| ticks as f64 / input_ts as f64;
    Ok(Some(Fragment {
        kind: TrackKind::Audio,
        header,
        payload: Bytes::from(mdat),
        start_pts: secs(first_pts),
        end_pts: secs(end),
        start_dts: secs(first_pts),
        end_dts: secs(end),
        sample_count: rows.len(),
        dropped,
        independent: true,
    }))
}

/// Re-time `samples` onto a fixed frame grid starting at `next_pts`.
///
/// Returns the re-timed samples, the (possibly moved) grid start and the
/// number of frames dropped for overlapping.
fn correct_drift(
    samples: Vec<AudioSample>,
    mut next_pts: f64,
    track: &AudioTrack,
    frame_duration: f64,
    input_ts: u32,
    config: &RemuxConfig,
) -> (Vec<AudioSample>, f64, usize) {
    let max_drift = config.max_audio_frames_drift as f64 * frame_duration;
    let max_gap = config.max_silent_gap_secs * input_ts as f64;
    let to_ms = |ticks: f64| (ticks * 1000.0 / input_ts as f64).round() as i64;

    let mut out: Vec<AudioSample> = Vec::with_capacity(samples.len());
    let mut expected = next_pts;
    let mut dropped = 0;

    for sample in samples {
        let delta = sample.pts as f64 - expected;

        if delta <= -max_drift {
            tracing::warn!(
                pts_secs = sample.pts as f64 / input_ts as f64,
                overlap_ms = to_ms(-delta),
                "Dropping audio frame overlapping the previous fragment"
            );
            dropped += 1;
            continue;
        }

        if delta >= max_drift && delta < max_gap {
            let mut missing = (delta / frame_duration).round() as i64;
            let mut fill_pts = sample.pts as f64 - missing as f64 * frame_duration;
            if fill_pts < 0.0 {
                missing -= 1;
                fill_pts += frame_duration;
            }
            if out.is_empty() {
                next_pts = fill_pts;
            }
            tracing::warn!(
                missing,
                pts_secs = fill_pts / input_ts as f64,
                gap_ms = to_ms(delta),
                "Injecting silent audio frames"
            );
            let filler = silent_frame(track.codec, track.channels)
                .map(Bytes::from_static)
                .or_else(|| out.last().map(|s| s.unit.clone()))
                .unwrap_or_else(|| sample.unit.clone());
            for _ in 0..missing.max(0) {
                out.push(AudioSample::new(fill_pts.max(0.0).round() as i64, filler.clone()));
                fill_pts += frame_duration;
            }
            expected = fill_pts;
        }

        out.push(AudioSample::new(expected.round() as i64, sample.unit));
        expected += frame_duration;
    }

    (out, next_pts, dropped)
}

/// Fill `track` with silent frames covering the span of `video`.
///
/// Used when a declared audio track delivered nothing while video did.
/// Returns false when the codec has no silent frame.
pub fn fill_silence(
    track: &mut AudioTrack,
    state: &TrackState,
    reference: &TimestampRef,
    video: &Fragment,
) -> bool {
    let Some(frame) = silent_frame(track.codec, track.channels) else {
        tracing::debug!(codec = %track.codec, "No silent frame for codec, leaving audio empty");
        return false;
    };
    let ts = track.timescale as f64;
    let init_time = reference.base_in(track.timescale) as f64;
    let start = state
        .next_timestamp
        .map_or(video.start_dts * ts, |next| next as f64)
        + init_time;
    let end = video.end_dts * ts + init_time;
    let frame_duration = track.frame_duration();
    let count = ((end - start) / frame_duration).ceil().max(0.0) as usize;

    track.samples = (0..count)
        .map(|i| {
            let pts = (start + i as f64 * frame_duration).round() as i64;
            AudioSample::new(pts, Bytes::from_static(frame))
        })
        .collect();
    count > 0
}
