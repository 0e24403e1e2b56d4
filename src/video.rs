//! Video sample-table builder.
//!
//! Turns one call's worth of access units into a `moof` + `mdat` pair:
//! normalize timestamps onto the output timeline, repair holes and
//! overlaps against the previous fragment, derive per-sample durations from
//! decode-time deltas, and length-prefix every NAL unit into the payload.

use bytes::{BufMut, Bytes};
use sf_core::{RemuxConfig, TrackKind};
use sf_media::{write_moof, FragmentSample, MDAT_HEADER_SIZE};

use crate::error::RemuxError;
use crate::remuxer::Fragment;
use crate::timestamp::{normalize_pts, secs_to_ticks, TimestampRef};
use crate::track::{TrackState, VideoSample, VideoTrack};

/// Index of the first keyframe, if any.
pub fn first_keyframe(samples: &[VideoSample]) -> Option<usize> {
    samples.iter().position(|s| s.key)
}

/// Per-call inputs of [`remux_video`] besides the track itself.
#[derive(Debug, Clone, Copy)]
pub struct VideoParams<'a> {
    pub reference: &'a TimestampRef,
    /// Playlist time this fragment should start at, in seconds.
    pub time_offset: f64,
    /// Length of the audio fragment built in the same call, in seconds
    /// (0 without audio).
    pub audio_duration: f64,
    /// Samples dropped before the first keyframe in this call.
    pub dropped: usize,
    pub config: &'a RemuxConfig,
}

/// Build a fragment from every sample in `track`.
///
/// The samples are consumed. On success `state` points at the end of the
/// new fragment; on error it is left untouched.
pub fn remux_video(
    track: &mut VideoTrack,
    state: &mut TrackState,
    params: VideoParams<'_>,
) -> Result<Option<Fragment>, RemuxError> {
    let mut samples = std::mem::take(&mut track.samples);
    let Some(first) = samples.first() else {
        return Ok(None);
    };

    let timescale = track.timescale;
    let ts = timescale as i64;
    let init_time = params.reference.base_in(timescale);

    let mut contiguous = state.contiguous;
    let next_dts = match state.next_timestamp {
        Some(next) if contiguous => next,
        _ => {
            contiguous = false;
            let cts = first.pts - normalize_pts(first.dts, Some(first.pts));
            secs_to_ticks(params.time_offset, timescale) - cts
        }
    };

    for sample in samples.iter_mut() {
        sample.pts = normalize_pts(sample.pts - init_time, Some(next_dts));
        sample.dts = normalize_pts(sample.dts - init_time, Some(next_dts));
    }

    if samples.windows(2).any(|w| w[1].dts < w[0].dts) {
        tracing::debug!(count = samples.len(), "Video samples out of decode order, sorting");
        samples.sort_by(|a, b| a.dts.cmp(&b.dts).then(a.pts.cmp(&b.pts)));
    }

    let count = samples.len();
    let fallback = state.last_sample_duration.unwrap_or(ts / 30).max(1);
    let average_duration = if count > 1 {
        let span = samples[count - 1].dts - samples[0].dts;
        let avg = (span as f64 / (count - 1) as f64).round() as i64;
        if avg > 0 {
            avg
        } else {
            fallback
        }
    } else {
        fallback
    };

    if contiguous {
        let delta = samples[0].dts - next_dts;
        if delta > average_duration {
            tracing::warn!(
                delta_ms = delta * 1000 / ts.max(1),
                next_dts,
                first_dts = samples[0].dts,
                "Video hole between fragments, moving first sample back"
            );
            samples[0].dts = next_dts;
            samples[0].pts -= delta;
        } else if delta < -1 {
            tracing::warn!(
                delta_ms = delta * 1000 / ts.max(1),
                next_dts,
                first_dts = samples[0].dts,
                "Video overlap between fragments, shifting samples forward"
            );
            shift_overlapping(&mut samples, -delta);
        }
    }

    if samples[0].dts < 0 {
        samples[0].dts = 0;
    }

    // Decode order must stay monotonic after repair.
    let nudge = (average_duration / 4).max(1);
    for i in 1..count {
        if samples[i].dts < samples[i - 1].dts {
            samples[i].dts = samples[i - 1].dts + nudge;
        }
    }

    let mut durations: Vec<i64> = samples.windows(2).map(|w| w[1].dts - w[0].dts).collect();
    let natural_last = durations.last().copied().unwrap_or(average_duration);
    let mut last_duration = natural_last;
    let first_pts = samples.iter().map(|s| s.pts).min().unwrap_or(samples[0].pts);
    if params.config.stretch_short_video_track && params.audio_duration > 0.0 {
        let gap_tolerance = (params.config.max_buffer_hole * ts as f64).floor() as i64;
        let audio_end = first_pts + secs_to_ticks(params.audio_duration, timescale);
        let delta_to_end = audio_end - samples[count - 1].pts;
        if delta_to_end > gap_tolerance {
            last_duration = delta_to_end.max(natural_last);
            tracing::debug!(
                natural = natural_last,
                stretched = last_duration,
                "Stretching last video frame to audio end"
            );
        }
    }
    durations.push(last_duration);

    let payload_bytes: u64 = samples.iter().map(VideoSample::payload_len).sum();
    let mdat_size = payload_bytes + MDAT_HEADER_SIZE as u64;
    let mdat = allocate_payload(mdat_size, TrackKind::Video)?;
    let mdat = fill_mdat(mdat, mdat_size, &samples);

    let rows: Vec<FragmentSample> = samples
        .iter()
        .zip(&durations)
        .map(|(sample, &duration)| FragmentSample {
            duration: u32::try_from(duration).unwrap_or(0),
            size: u32::try_from(sample.payload_len()).unwrap_or(u32::MAX),
            is_keyframe: sample.key,
            composition_offset: clamp_i32(sample.pts - sample.dts),
        })
        .collect();

    let first_dts = samples[0].dts;
    let last_dts = samples[count - 1].dts;
    let last_pts = samples.iter().map(|s| s.pts).max().unwrap_or(samples[count - 1].pts);
    let end_dts = last_dts + last_duration;

    let sequence_number = state.sequence_number.wrapping_add(1);
    let moof = write_moof(sequence_number, track.id, first_dts.max(0) as u64, &rows);

    state.sequence_number = sequence_number;
    state.next_timestamp = Some(end_dts);
    state.contiguous = true;
    state.last_sample_duration = Some(last_duration);

    let secs = |ticks: i64| ticks as f64 / ts as f64;
    Ok(Some(Fragment {
        kind: TrackKind::Video,
        header: Bytes::from(moof),
        payload: mdat,
        start_pts: secs(first_pts),
        end_pts: secs(last_pts + last_duration),
        start_dts: secs(first_dts),
        end_dts: secs(end_dts),
        sample_count: count,
        dropped: params.dropped,
        independent: samples[0].key,
    }))
}

/// Shift samples forward by `shift`, stopping where doing so would change
/// the presentation order against the next, unshifted sample.
fn shift_overlapping(samples: &mut [VideoSample], shift: i64) {
    for i in 0..samples.len() {
        let prev_pts = samples[i].pts;
        samples[i].dts += shift;
        samples[i].pts += shift;
        if let Some(next) = samples.get(i + 1) {
            let order_before = next.pts <= prev_pts;
            let order_after = next.pts <= samples[i].pts;
            if order_before != order_after {
                break;
            }
        }
    }
}

/// Reserve exactly `size` bytes for a track payload.
pub(crate) fn allocate_payload(size: u64, track: TrackKind) -> Result<Vec<u8>, RemuxError> {
    let alloc_error = || {
        tracing::warn!(%track, bytes = size, "Failed to allocate fragment payload");
        RemuxError::Alloc { track, bytes: size }
    };
    if u32::try_from(size).is_err() {
        return Err(alloc_error());
    }
    let len = usize::try_from(size).map_err(|_| alloc_error())?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| alloc_error())?;
    Ok(buf)
}

fn fill_mdat(mut buf: Vec<u8>, size: u64, samples: &[VideoSample]) -> Bytes {
    buf.put_u32(size as u32);
    buf.put_slice(b"mdat");
    for unit in samples.iter().flat_map(|s| &s.units) {
        buf.put_u32(unit.len() as u32);
        buf.put_slice(unit);
    }
    Bytes::from(buf)
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use sf_core::VideoCodec;

    fn track(samples: &[(i64, i64, bool)]) -> VideoTrack {
        let mut track = VideoTrack::new(VideoCodec::H264, 640, 360, vec![1, 0x42, 0, 0x1e]);
        track.samples = samples
            .iter()
            .map(|&(pts, dts, key)| {
                VideoSample::new(pts, dts, key, vec![Bytes::from_static(&[0x65, 0xAA, 0xBB])])
            })
            .collect();
        track
    }

    fn params<'a>(reference: &'a TimestampRef, config: &'a RemuxConfig) -> VideoParams<'a> {
        VideoParams {
            reference,
            time_offset: 0.0,
            audio_duration: 0.0,
            dropped: 0,
            config,
        }
    }

    fn read_u32(data: &[u8], offset: usize) -> u32 {
        u32::from_be_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
    }

    #[test]
    fn mdat_is_length_prefixed() {
        let reference = TimestampRef::new(0, 90_000, 1);
        let config = RemuxConfig::default();
        let mut t = track(&[(0, 0, true), (3000, 3000, false)]);
        let mut state = TrackState::default();

        let frag = remux_video(&mut t, &mut state, params(&reference, &config))
            .unwrap()
            .unwrap();
        assert_eq!(read_u32(&frag.payload, 0) as usize, frag.payload.len());
        assert_eq!(&frag.payload[4..8], b"mdat");
        assert_eq!(read_u32(&frag.payload, 8), 3);
        assert_eq!(&frag.payload[12..15], &[0x65, 0xAA, 0xBB]);
        assert_eq!(frag.payload.len(), 8 + 2 * 7);
        assert!(t.samples.is_empty());
        assert_eq!(state.sequence_number, 1);
    }

    #[test]
    fn out_of_order_input_is_sorted() {
        let reference = TimestampRef::new(0, 90_000, 1);
        let config = RemuxConfig::default();
        let mut t = track(&[(0, 0, true), (6000, 6000, false), (3000, 3000, false)]);
        let mut state = TrackState::default();

        let frag = remux_video(&mut t, &mut state, params(&reference, &config))
            .unwrap()
            .unwrap();
        assert_eq!(frag.end_dts, 9000.0 / 90_000.0);
        assert_eq!(state.next_timestamp, Some(9000));
    }

    #[test]
    fn hole_moves_only_first_sample() {
        let reference = TimestampRef::new(0, 90_000, 1);
        let config = RemuxConfig::default();
        let mut state = TrackState {
            next_timestamp: Some(9000),
            contiguous: true,
            ..Default::default()
        };
        let mut t = track(&[
            (18_000, 18_000, true),
            (21_000, 21_000, false),
            (24_000, 24_000, false),
        ]);

        let frag = remux_video(&mut t, &mut state, params(&reference, &config))
            .unwrap()
            .unwrap();
        assert_eq!(frag.start_dts, 9000.0 / 90_000.0);
        // first sample now spans the hole, the rest keep their timing
        assert_eq!(state.next_timestamp, Some(27_000));
    }

    #[test]
    fn zero_sized_track_returns_none() {
        let reference = TimestampRef::new(0, 90_000, 1);
        let config = RemuxConfig::default();
        let mut t = track(&[]);
        let mut state = TrackState::default();
        assert_matches!(remux_video(&mut t, &mut state, params(&reference, &config)), Ok(None));
    }

    #[test]
    fn zero_timescale_hole_does_not_panic() {
        let reference = TimestampRef::new(0, 0, 1);
        let config = RemuxConfig::default();
        let mut state = TrackState {
            next_timestamp: Some(0),
            contiguous: true,
            ..Default::default()
        };
        let mut t = track(&[(100, 100, true), (110, 110, false), (120, 120, false)]);
        t.timescale = 0;

        let frag = remux_video(&mut t, &mut state, params(&reference, &config)).unwrap();
        assert!(frag.is_some());
        assert_eq!(state.next_timestamp, Some(130));
    }

    #[test]
    fn single_sample_uses_previous_duration() {
        let reference = TimestampRef::new(0, 90_000, 1);
        let config = RemuxConfig::default();
        let mut state = TrackState {
            last_sample_duration: Some(3750),
            ..Default::default()
        };
        let mut t = track(&[(0, 0, true)]);

        remux_video(&mut t, &mut state, params(&reference, &config)).unwrap();
        assert_eq!(state.next_timestamp, Some(3750));
    }

    #[test]
    fn stretch_closes_gap_to_audio_end() {
        let reference = TimestampRef::new(0, 90_000, 1);
        let config = RemuxConfig {
            stretch_short_video_track: true,
            ..Default::default()
        };
        let mut state = TrackState::default();
        let mut t = track(&[(0, 0, true), (3000, 3000, false)]);
        let mut p = params(&reference, &config);
        p.audio_duration = 1.0;

        let frag = remux_video(&mut t, &mut state, p).unwrap().unwrap();
        assert_eq!(frag.end_dts, 1.0);
        assert_eq!(state.last_sample_duration, Some(87_000));
    }

    #[test]
    fn oversized_payload_is_alloc_error() {
        assert_matches!(
            allocate_payload(u32::MAX as u64 + 1, TrackKind::Video),
            Err(RemuxError::Alloc {
                track: TrackKind::Video,
                bytes
            }) if bytes == u32::MAX as u64 + 1
        );
        assert!(allocate_payload(16, TrackKind::Video).unwrap().capacity() >= 16);
    }

    #[test]
    fn shift_stops_where_presentation_order_would_flip() {
        // I-frame then a B-frame presented 100 ticks after it
        let mut samples = vec![
            VideoSample::new(1000, 0, true, vec![]),
            VideoSample::new(1100, 100, false, vec![]),
        ];
        shift_overlapping(&mut samples, 500);
        assert_eq!(samples[0].pts, 1500);
        assert_eq!(samples[1].pts, 1100);
        assert_eq!(samples[1].dts, 100);

        let mut samples = vec![
            VideoSample::new(0, 0, true, vec![]),
            VideoSample::new(3000, 3000, false, vec![]),
        ];
        shift_overlapping(&mut samples, 500);
        assert_eq!(samples[1].pts, 3500);
    }
}
