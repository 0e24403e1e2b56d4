//! Establishing and validating the shared time reference.
//!
//! Each track with samples proposes a candidate: the stream time that
//! should map to `time_offset`. The earlier candidate wins. An existing
//! reference is only replaced when the candidate disagrees with it by at
//! least the fragment duration (and never by less than one second).

use crate::timestamp::{normalize_pts, secs_to_ticks, start_pts, TimestampRef};
use crate::track::{AudioTrack, VideoTrack};

/// Outcome of [`resolve_reference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub reference: TimestampRef,
    /// An established reference was replaced; downstream timelines restart.
    pub replaced: bool,
}

/// Candidate reference proposed by the video samples.
pub fn video_candidate(track: &VideoTrack, time_offset: f64) -> Option<TimestampRef> {
    let start = start_pts(track.samples.iter().map(|s| s.pts))?;
    Some(TimestampRef::new(
        start - secs_to_ticks(time_offset, track.timescale),
        track.timescale,
        track.id,
    ))
}

/// Candidate reference proposed by the audio samples.
pub fn audio_candidate(track: &AudioTrack, time_offset: f64) -> Option<TimestampRef> {
    let first = track.samples.first()?;
    Some(TimestampRef::new(
        first.pts - secs_to_ticks(time_offset, track.timescale),
        track.timescale,
        track.id,
    ))
}

/// Pick the reference for the tracks at hand.
///
/// Returns `None` when neither track has samples. `fragment_duration` is in
/// seconds.
pub fn resolve_reference(
    existing: Option<TimestampRef>,
    video: Option<&VideoTrack>,
    audio: Option<&AudioTrack>,
    time_offset: f64,
    fragment_duration: f64,
) -> Option<Resolution> {
    let video = video.and_then(|v| video_candidate(v, time_offset));
    let audio = audio.and_then(|a| audio_candidate(a, time_offset));

    let candidate = match (video, audio) {
        (Some(v), Some(a)) if a.secs() < v.secs() => a,
        (Some(v), _) => v,
        (None, Some(a)) => a,
        (None, None) => return None,
    };

    let Some(existing) = existing else {
        tracing::debug!(
            base_time = candidate.base_time,
            timescale = candidate.timescale,
            track_id = candidate.track_id,
            "Established timestamp reference"
        );
        return Some(Resolution {
            reference: candidate,
            replaced: false,
        });
    };

    // Compare in the candidate's timescale so a rollover since the
    // reference was set does not read as drift.
    let existing_base = existing.base_in(candidate.timescale);
    let candidate = TimestampRef {
        base_time: normalize_pts(candidate.base_time, Some(existing_base)),
        ..candidate
    };
    let drift = (candidate.secs() - existing.secs()).abs();
    if drift < fragment_duration.max(1.0) {
        return Some(Resolution {
            reference: existing,
            replaced: false,
        });
    }

    tracing::warn!(
        old_base_time = existing.base_time,
        old_timescale = existing.timescale,
        old_track_id = existing.track_id,
        new_base_time = candidate.base_time,
        new_timescale = candidate.timescale,
        new_track_id = candidate.track_id,
        drift_secs = drift,
        "Timestamp reference replaced"
    );
    Some(Resolution {
        reference: candidate,
        replaced: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::ROLLOVER;
    use crate::track::{AudioSample, VideoSample};
    use bytes::Bytes;
    use sf_core::{AudioCodec, VideoCodec};

    fn video(pts: &[i64]) -> VideoTrack {
        let mut track = VideoTrack::new(VideoCodec::H264, 640, 360, vec![1]);
        track.samples = pts
            .iter()
            .map(|&p| VideoSample::new(p, p, false, vec![Bytes::from_static(&[0])]))
            .collect();
        track
    }

    fn audio(pts: &[i64]) -> AudioTrack {
        let mut track = AudioTrack::new(AudioCodec::Aac, 48_000, 2, vec![0x11, 0x90]);
        track.samples = pts
            .iter()
            .map(|&p| AudioSample::new(p, Bytes::from_static(&[0])))
            .collect();
        track
    }

    #[test]
    fn earlier_track_wins() {
        let v = video(&[93_000, 90_000, 96_000]);
        let a = audio(&[88_000]);
        let res = resolve_reference(None, Some(&v), Some(&a), 0.0, 0.1).unwrap();
        assert_eq!(res.reference, TimestampRef::new(88_000, 90_000, 2));
        assert!(!res.replaced);
    }

    #[test]
    fn tie_prefers_video() {
        let v = video(&[90_000]);
        let a = audio(&[90_000]);
        let res = resolve_reference(None, Some(&v), Some(&a), 0.0, 0.1).unwrap();
        assert_eq!(res.reference.track_id, 1);
    }

    #[test]
    fn time_offset_is_subtracted() {
        let v = video(&[900_000]);
        let res = resolve_reference(None, Some(&v), None, 10.0, 0.1).unwrap();
        assert_eq!(res.reference.base_time, 0);
    }

    #[test]
    fn small_drift_keeps_existing_reference() {
        let existing = TimestampRef::new(0, 90_000, 1);
        let v = video(&[45_000]);
        let res = resolve_reference(Some(existing), Some(&v), None, 0.0, 0.2).unwrap();
        assert_eq!(res.reference, existing);
        assert!(!res.replaced);
    }

    #[test]
    fn large_drift_replaces_reference() {
        let existing = TimestampRef::new(0, 90_000, 1);
        let v = video(&[900_000]);
        let res = resolve_reference(Some(existing), Some(&v), None, 0.0, 2.0).unwrap();
        assert_eq!(res.reference.base_time, 900_000);
        assert!(res.replaced);
    }

    #[test]
    fn fragment_duration_widens_tolerance() {
        let existing = TimestampRef::new(0, 90_000, 1);
        let v = video(&[270_000]);
        let res = resolve_reference(Some(existing), Some(&v), None, 0.0, 4.0).unwrap();
        assert!(!res.replaced);
    }

    #[test]
    fn rollover_is_not_drift() {
        let existing = TimestampRef::new(ROLLOVER - 900, 90_000, 1);
        let v = video(&[100]);
        let res = resolve_reference(Some(existing), Some(&v), None, 0.0, 0.1).unwrap();
        assert!(!res.replaced);
    }

    #[test]
    fn no_samples_no_resolution() {
        assert!(resolve_reference(None, Some(&video(&[])), Some(&audio(&[])), 0.0, 0.0).is_none());
    }
}
