//! Movie fragment (`moof`) parsing and in-place decode-time rewrite.

use super::atoms::{
    content_cursor, find_boxes, read_fullbox_header, read_u32, read_u64, require_box,
};
use super::init::InitData;
use crate::{Error, Result};

/// tfhd flags.
const TFHD_BASE_DATA_OFFSET: u32 = 0x000001;
const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x000002;
const TFHD_DEFAULT_DURATION: u32 = 0x000008;
const TFHD_DEFAULT_SIZE: u32 = 0x000010;
const TFHD_DEFAULT_FLAGS: u32 = 0x000020;

/// trun flags.
const TRUN_DATA_OFFSET: u32 = 0x000001;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x000004;
const TRUN_DURATION: u32 = 0x000100;
const TRUN_SIZE: u32 = 0x000200;
const TRUN_FLAGS: u32 = 0x000400;
const TRUN_CTS: u32 = 0x000800;

/// sample_is_non_sync_sample bit of the sample flags word.
const NON_SYNC_FLAG: u32 = 0x00010000;

/// Timing summary of one `traf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFragment {
    pub track_id: u32,
    /// tfdt baseMediaDecodeTime, in the track timescale.
    pub base_decode_time: u64,
    /// Offset of the tfdt time field and the tfdt version.
    tfdt: Option<(usize, u8)>,
    pub sample_count: u32,
    /// Sum of sample durations, in the track timescale.
    pub duration: u64,
    /// Index of the first sync sample, if any.
    pub first_keyframe: Option<usize>,
}

impl TrackFragment {
    /// Whether the fragment carries a tfdt that can be rewritten.
    pub fn has_decode_time(&self) -> bool {
        self.tfdt.is_some()
    }

    /// Overwrite this fragment's tfdt in `data` with `value`.
    pub fn rewrite_decode_time(&self, data: &mut [u8], value: u64) -> Result<()> {
        let Some((offset, version)) = self.tfdt else {
            return Err(Error::MissingAtom("tfdt"));
        };
        if version == 1 {
            data[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
        } else {
            let value = u32::try_from(value).map_err(|_| {
                Error::invalid_mp4(format!("decode time {value} does not fit a version 0 tfdt"))
            })?;
            data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
        }
        Ok(())
    }
}

/// Parse every `moof>traf` in `data`, resolving defaults from `init`.
///
/// Fragments for tracks unknown to `init` are still returned; their
/// durations fall back to tfhd defaults only.
pub fn parse_fragments(data: &[u8], init: &InitData) -> Result<Vec<TrackFragment>> {
    let mut fragments = Vec::new();

    for traf in find_boxes(data, 0..data.len(), &[b"moof", b"traf"])? {
        let tfhd = require_box(data, traf.content(), &[b"tfhd"], "tfhd")?;
        let mut cursor = content_cursor(data, &tfhd);
        let (_, tfhd_flags) = read_fullbox_header(&mut cursor)?;
        let track_id = read_u32(&mut cursor)?;
        if tfhd_flags & TFHD_BASE_DATA_OFFSET != 0 {
            let _ = read_u64(&mut cursor)?;
        }
        if tfhd_flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
            let _ = read_u32(&mut cursor)?;
        }

        let trex = init.track(track_id);
        let mut default_duration = trex.map_or(0, |t| t.default_sample_duration);
        let mut default_flags = trex.map_or(0, |t| t.default_sample_flags);
        if tfhd_flags & TFHD_DEFAULT_DURATION != 0 {
            default_duration = read_u32(&mut cursor)?;
        }
        if tfhd_flags & TFHD_DEFAULT_SIZE != 0 {
            let _ = read_u32(&mut cursor)?;
        }
        if tfhd_flags & TFHD_DEFAULT_FLAGS != 0 {
            default_flags = read_u32(&mut cursor)?;
        }

        let (base_decode_time, tfdt) =
            match find_boxes(data, traf.content(), &[b"tfdt"])?.into_iter().next() {
                Some(tfdt) => {
                    let mut cursor = content_cursor(data, &tfdt);
                    let (version, _) = read_fullbox_header(&mut cursor)?;
                    let time = if version == 1 {
                        read_u64(&mut cursor)?
                    } else {
                        read_u32(&mut cursor)? as u64
                    };
                    (time, Some((tfdt.content_start + 4, version)))
                }
                None => (0, None),
            };

        let mut fragment = TrackFragment {
            track_id,
            base_decode_time,
            tfdt,
            sample_count: 0,
            duration: 0,
            first_keyframe: None,
        };

        for trun in find_boxes(data, traf.content(), &[b"trun"])? {
            let mut cursor = content_cursor(data, &trun);
            let (_, flags) = read_fullbox_header(&mut cursor)?;
            let count = read_u32(&mut cursor)?;
            if flags & TRUN_DATA_OFFSET != 0 {
                let _ = read_u32(&mut cursor)?;
            }
            let first_sample_flags = if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
                Some(read_u32(&mut cursor)?)
            } else {
                None
            };

            for i in 0..count {
                let duration = if flags & TRUN_DURATION != 0 {
                    read_u32(&mut cursor)?
                } else {
                    default_duration
                };
                if flags & TRUN_SIZE != 0 {
                    let _ = read_u32(&mut cursor)?;
                }
                let sample_flags = if flags & TRUN_FLAGS != 0 {
                    read_u32(&mut cursor)?
                } else if i == 0 {
                    first_sample_flags.unwrap_or(default_flags)
                } else {
                    default_flags
                };
                if flags & TRUN_CTS != 0 {
                    let _ = read_u32(&mut cursor)?;
                }

                if fragment.first_keyframe.is_none() && sample_flags & NON_SYNC_FLAG == 0 {
                    fragment.first_keyframe = Some(fragment.sample_count as usize);
                }
                fragment.duration += duration as u64;
                fragment.sample_count += 1;
            }
        }

        fragments.push(fragment);
    }

    Ok(fragments)
}
