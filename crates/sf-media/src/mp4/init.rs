//! Init segment (`moov`) parsing and encryption-key patching.

use std::ops::Range;

use super::atoms::{child_boxes, content_cursor, find_boxes, read_fullbox_header, read_u32, BoxRange};
use crate::{Error, Result};

/// Handler type of a parsed track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Video,
    Audio,
    Other([u8; 4]),
}

impl HandlerKind {
    fn from_bytes(bytes: [u8; 4]) -> Self {
        match &bytes {
            b"vide" => Self::Video,
            b"soun" => Self::Audio,
            _ => Self::Other(bytes),
        }
    }
}

/// One track described by an init segment.
#[derive(Debug, Clone, PartialEq)]
pub struct InitTrack {
    pub id: u32,
    pub kind: HandlerKind,
    /// Media timescale from mdhd.
    pub timescale: u32,
    /// Sample entry fourcc; the original format for protected entries.
    pub codec: [u8; 4],
    /// The sample entry is `encv`/`enca`.
    pub encrypted: bool,
    /// trex default sample duration (0 if absent).
    pub default_sample_duration: u32,
    /// trex default sample flags (0 if absent).
    pub default_sample_flags: u32,
}

/// Tracks of a parsed init segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitData {
    pub tracks: Vec<InitTrack>,
}

impl InitData {
    /// Track with the given id.
    pub fn track(&self, id: u32) -> Option<&InitTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }

    /// First video track.
    pub fn video(&self) -> Option<&InitTrack> {
        self.tracks.iter().find(|t| t.kind == HandlerKind::Video)
    }

    /// First audio track.
    pub fn audio(&self) -> Option<&InitTrack> {
        self.tracks.iter().find(|t| t.kind == HandlerKind::Audio)
    }

    /// True when no audio or video track was found.
    pub fn is_empty(&self) -> bool {
        self.video().is_none() && self.audio().is_none()
    }
}

/// Parse the tracks of an init segment (any bytes containing a top-level moov).
pub fn parse_init_segment(data: &[u8]) -> Result<InitData> {
    let mut init = InitData::default();

    for trak in find_boxes(data, 0..data.len(), &[b"moov", b"trak"])? {
        if let Some(track) = parse_trak(data, &trak)? {
            init.tracks.push(track);
        }
    }

    for trex in find_boxes(data, 0..data.len(), &[b"moov", b"mvex", b"trex"])? {
        let mut cursor = content_cursor(data, &trex);
        let _ = read_fullbox_header(&mut cursor)?;
        let track_id = read_u32(&mut cursor)?;
        let _description_index = read_u32(&mut cursor)?;
        let duration = read_u32(&mut cursor)?;
        let _size = read_u32(&mut cursor)?;
        let flags = read_u32(&mut cursor)?;
        if let Some(track) = init.tracks.iter_mut().find(|t| t.id == track_id) {
            track.default_sample_duration = duration;
            track.default_sample_flags = flags;
        }
    }

    Ok(init)
}

fn parse_trak(data: &[u8], trak: &BoxRange) -> Result<Option<InitTrack>> {
    let Some(tkhd) = find_boxes(data, trak.content(), &[b"tkhd"])?.into_iter().next() else {
        return Ok(None);
    };
    let mut cursor = content_cursor(data, &tkhd);
    let (version, _) = read_fullbox_header(&mut cursor)?;
    cursor.set_position(if version == 1 { 4 + 16 } else { 4 + 8 });
    let id = read_u32(&mut cursor)?;

    let Some(mdhd) = find_boxes(data, trak.content(), &[b"mdia", b"mdhd"])?.into_iter().next() else {
        return Ok(None);
    };
    let mut cursor = content_cursor(data, &mdhd);
    let (version, _) = read_fullbox_header(&mut cursor)?;
    cursor.set_position(if version == 1 { 4 + 16 } else { 4 + 8 });
    let timescale = read_u32(&mut cursor)?;

    let kind = match find_boxes(data, trak.content(), &[b"mdia", b"hdlr"])?.into_iter().next() {
        Some(hdlr) => {
            let content = &data[hdlr.content()];
            if content.len() < 12 {
                return Err(Error::invalid_mp4("hdlr box too short"));
            }
            HandlerKind::from_bytes([content[8], content[9], content[10], content[11]])
        }
        None => return Ok(None),
    };

    let mut codec = [0u8; 4];
    let mut encrypted = false;
    if let Some(entry) = sample_entries(data, trak)?.into_iter().next() {
        codec = entry.box_type;
        if &codec == b"encv" || &codec == b"enca" {
            encrypted = true;
            let children = entry_children(&entry);
            if let Some(frma) = find_boxes(data, children, &[b"sinf", b"frma"])?.into_iter().next() {
                let content = &data[frma.content()];
                if content.len() >= 4 {
                    codec = [content[0], content[1], content[2], content[3]];
                }
            }
        }
    }

    Ok(Some(InitTrack {
        id,
        kind,
        timescale,
        codec,
        encrypted,
        default_sample_duration: 0,
        default_sample_flags: 0,
    }))
}

/// Sample entries listed in the trak's stsd.
fn sample_entries(data: &[u8], trak: &BoxRange) -> Result<Vec<BoxRange>> {
    let path: [&[u8; 4]; 4] = [b"mdia", b"minf", b"stbl", b"stsd"];
    let Some(stsd) = find_boxes(data, trak.content(), &path)?.into_iter().next() else {
        return Ok(Vec::new());
    };
    // fullbox header + entry count
    child_boxes(data, (stsd.content_start + 8)..stsd.end)
}

/// Child boxes of a sample entry start after the fixed visual/audio fields.
fn entry_children(entry: &BoxRange) -> Range<usize> {
    let fixed = if &entry.box_type == b"encv" { 78 } else { 28 };
    (entry.content_start + fixed).min(entry.end)..entry.end
}

/// Copy the top-level `ftyp` and `moov` boxes out of `data`.
///
/// Returns `None` when `data` carries no moov.
pub fn extract_init_segment(data: &[u8]) -> Result<Option<Vec<u8>>> {
    let boxes = child_boxes(data, 0..data.len())?;
    if !boxes.iter().any(|b| &b.box_type == b"moov") {
        return Ok(None);
    }
    let mut init = Vec::new();
    for b in boxes.iter().filter(|b| &b.box_type == b"ftyp" || &b.box_type == b"moov") {
        init.extend_from_slice(&data[b.start..b.end]);
    }
    Ok(Some(init))
}

/// Write `key_id` into every `enc*>sinf>schi>tenc` default KID that is still
/// all zeros. Returns the number of boxes patched.
pub fn patch_encryption(init: &mut [u8], key_id: &[u8; 16]) -> Result<usize> {
    let mut targets = Vec::new();

    for trak in find_boxes(init, 0..init.len(), &[b"moov", b"trak"])? {
        for entry in sample_entries(init, &trak)? {
            if &entry.box_type != b"encv" && &entry.box_type != b"enca" {
                continue;
            }
            for sinf in find_boxes(init, entry_children(&entry), &[b"sinf"])? {
                let Some(schm) = find_boxes(init, sinf.content(), &[b"schm"])?.into_iter().next()
                else {
                    continue;
                };
                let scheme = &init[schm.content()];
                if scheme.len() < 8 || !matches!(&scheme[4..8], b"cenc" | b"cbcs") {
                    continue;
                }
                for tenc in find_boxes(init, sinf.content(), &[b"schi", b"tenc"])? {
                    let kid = (tenc.content_start + 8)..(tenc.content_start + 24);
                    if kid.end <= tenc.end && init[kid.clone()].iter().all(|b| *b == 0) {
                        targets.push(kid);
                    }
                }
            }
        }
    }

    for kid in &targets {
        tracing::debug!(offset = kid.start, "Patching default KID in tenc box");
        init[kid.clone()].copy_from_slice(key_id);
    }
    Ok(targets.len())
}
