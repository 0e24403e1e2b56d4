//! Re-timing of timed metadata and caption samples.
//!
//! Cues are not packaged into fragments; they are handed back with their
//! timestamps converted to seconds on the output timeline.

use sf_core::TrackKind;

use crate::remuxer::{Cue, CueBatch};
use crate::timestamp::{normalize_pts, secs_to_ticks, TimestampRef};
use crate::track::{CaptionTrack, MetadataTrack};

fn to_output_secs(ticks: i64, timescale: u32, reference: &TimestampRef, time_offset: f64) -> f64 {
    let init_time = reference.base_in(timescale);
    let anchor = secs_to_ticks(time_offset, timescale);
    normalize_pts(ticks - init_time, Some(anchor)) as f64 / timescale as f64
}

/// Drain `track` into a batch of metadata cues.
pub fn flush_metadata(
    track: &mut MetadataTrack,
    reference: &TimestampRef,
    time_offset: f64,
) -> Option<CueBatch> {
    if track.samples.is_empty() {
        return None;
    }
    let timescale = track.timescale;
    let cues = track
        .samples
        .drain(..)
        .map(|sample| Cue {
            pts: to_output_secs(sample.pts, timescale, reference, time_offset),
            dts: Some(to_output_secs(sample.dts, timescale, reference, time_offset)),
            data: sample.data,
        })
        .collect();
    Some(CueBatch {
        kind: TrackKind::Metadata,
        cues,
    })
}

/// Drain `track` into a batch of caption cues.
pub fn flush_captions(
    track: &mut CaptionTrack,
    reference: &TimestampRef,
    time_offset: f64,
) -> Option<CueBatch> {
    if track.samples.is_empty() {
        return None;
    }
    let timescale = track.timescale;
    let cues = track
        .samples
        .drain(..)
        .map(|sample| Cue {
            pts: to_output_secs(sample.pts, timescale, reference, time_offset),
            dts: None,
            data: sample.data,
        })
        .collect();
    Some(CueBatch {
        kind: TrackKind::Text,
        cues,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::ROLLOVER;
    use crate::track::{CaptionSample, MetadataSample};
    use bytes::Bytes;

    #[test]
    fn metadata_is_relative_to_reference() {
        let reference = TimestampRef::new(90_000, 90_000, 1);
        let mut track = MetadataTrack::default();
        track.samples.push(MetadataSample {
            pts: 180_000,
            dts: 171_000,
            data: Bytes::from_static(b"ID3"),
        });

        let batch = flush_metadata(&mut track, &reference, 1.0).unwrap();
        assert_eq!(batch.kind, TrackKind::Metadata);
        assert_eq!(batch.cues[0].pts, 1.0);
        assert_eq!(batch.cues[0].dts, Some(0.9));
        assert!(track.samples.is_empty());
    }

    #[test]
    fn captions_across_rollover() {
        let reference = TimestampRef::new(ROLLOVER - 90_000, 90_000, 1);
        let mut track = CaptionTrack::default();
        track.samples.push(CaptionSample {
            pts: 90_000,
            data: Bytes::from_static(b"cc"),
        });

        let batch = flush_captions(&mut track, &reference, 2.0).unwrap();
        assert_eq!(batch.kind, TrackKind::Text);
        assert_eq!(batch.cues[0].pts, 2.0);
        assert_eq!(batch.cues[0].dts, None);
    }

    #[test]
    fn empty_tracks_flush_nothing() {
        let reference = TimestampRef::new(0, 90_000, 1);
        assert!(flush_metadata(&mut MetadataTrack::default(), &reference, 0.0).is_none());
        assert!(flush_captions(&mut CaptionTrack::default(), &reference, 0.0).is_none());
    }
}
