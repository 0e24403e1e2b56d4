//! 33-bit timestamp rollover handling and the shared time reference.

use serde::{Deserialize, Serialize};

/// Timestamps wrap at 2^33 ticks.
pub const ROLLOVER: i64 = 1 << 33;

/// Largest distance from the reference a normalized value may have.
const HALF_ROLLOVER: i64 = 1 << 32;

/// Move `value` by whole rollover periods until it lies within 2^32 ticks
/// of `reference`.
///
/// Without a reference the value is returned unchanged. Normalizing twice
/// against the same reference is a no-op.
pub fn normalize_pts(value: i64, reference: Option<i64>) -> i64 {
    let Some(reference) = reference else {
        return value;
    };
    let step = if reference < value { -ROLLOVER } else { ROLLOVER };
    let mut value = value;
    while (value - reference).abs() > HALF_ROLLOVER {
        value += step;
    }
    value
}

/// Minimum pts of a run, normalized against the first pts rather than any
/// earlier reference so an already wrapped run cannot fool it.
pub fn start_pts(pts: impl IntoIterator<Item = i64>) -> Option<i64> {
    let mut iter = pts.into_iter();
    let first = iter.next()?;
    Some(iter.fold(first, |min, pts| min.min(normalize_pts(pts, Some(first)))))
}

/// The point in elementary-stream time that output time 0 corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRef {
    /// Base time in `timescale` ticks.
    pub base_time: i64,
    pub timescale: u32,
    /// Track the reference was derived from.
    pub track_id: u32,
}

impl TimestampRef {
    pub fn new(base_time: i64, timescale: u32, track_id: u32) -> Self {
        Self {
            base_time,
            timescale,
            track_id,
        }
    }

    /// Base time in seconds.
    pub fn secs(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.base_time as f64 / self.timescale as f64
    }

    /// Base time expressed in another timescale.
    pub fn base_in(&self, timescale: u32) -> i64 {
        if timescale == self.timescale || self.timescale == 0 {
            return self.base_time;
        }
        (self.base_time as f64 * timescale as f64 / self.timescale as f64).round() as i64
    }
}

/// Seconds to ticks, rounded to the nearest tick.
pub(crate) fn secs_to_ticks(secs: f64, timescale: u32) -> i64 {
    (secs * timescale as f64).round() as i64
}
