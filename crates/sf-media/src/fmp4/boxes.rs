//! ISO BMFF box types and serialization primitives.
//!
//! Each box follows the standard layout: 4-byte size (big-endian u32),
//! 4-byte type (ASCII), then box-specific content.

use sf_core::{AudioCodec, VideoCodec};

// ---------------------------------------------------------------------------
// Low-level box writing helpers
// ---------------------------------------------------------------------------

/// Write a complete box: size (u32 BE) + type (4 ASCII bytes) + content.
pub(crate) fn write_box(box_type: &[u8; 4], content: &[u8]) -> Vec<u8> {
    let size = (8 + content.len()) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(box_type);
    out.extend_from_slice(content);
    out
}

/// Write a container box (size + type + children concatenated).
pub(crate) fn write_container_box(box_type: &[u8; 4], children: &[&[u8]]) -> Vec<u8> {
    let children_len: usize = children.iter().map(|c| c.len()).sum();
    let size = (8 + children_len) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(box_type);
    for child in children {
        out.extend_from_slice(child);
    }
    out
}

/// Full box header (version + 24-bit flags).
pub(crate) fn fullbox_header(version: u8, flags: u32) -> [u8; 4] {
    let val = ((version as u32) << 24) | (flags & 0x00FFFFFF);
    val.to_be_bytes()
}

/// The 3x3 identity transform used by mvhd and tkhd.
fn unity_matrix() -> [u8; 36] {
    let mut m = [0u8; 36];
    m[0..4].copy_from_slice(&0x00010000u32.to_be_bytes());
    m[16..20].copy_from_slice(&0x00010000u32.to_be_bytes());
    m[32..36].copy_from_slice(&0x40000000u32.to_be_bytes());
    m
}

// ---------------------------------------------------------------------------
// ftyp
// ---------------------------------------------------------------------------

/// Major brand "isom", minor version 1, compatible ["isom", "avc1"].
pub(crate) fn write_ftyp() -> Vec<u8> {
    let mut content = Vec::with_capacity(16);
    content.extend_from_slice(b"isom");
    content.extend_from_slice(&1u32.to_be_bytes());
    content.extend_from_slice(b"isom");
    content.extend_from_slice(b"avc1");
    write_box(b"ftyp", &content)
}

// ---------------------------------------------------------------------------
// moov children
// ---------------------------------------------------------------------------

/// Movie header, version 1 (64-bit times).
pub(crate) fn write_mvhd(timescale: u32, duration: u64, next_track_id: u32) -> Vec<u8> {
    let mut content = Vec::with_capacity(112);
    content.extend_from_slice(&fullbox_header(1, 0));
    content.extend_from_slice(&[0u8; 16]); // creation + modification time
    content.extend_from_slice(&timescale.to_be_bytes());
    content.extend_from_slice(&duration.to_be_bytes());
    content.extend_from_slice(&0x00010000u32.to_be_bytes()); // rate 1.0
    content.extend_from_slice(&0x0100u16.to_be_bytes()); // volume 1.0
    content.extend_from_slice(&[0u8; 10]);
    content.extend_from_slice(&unity_matrix());
    content.extend_from_slice(&[0u8; 24]); // pre_defined
    content.extend_from_slice(&next_track_id.to_be_bytes());
    write_box(b"mvhd", &content)
}

/// Track header, version 1. Flags 7 = enabled | in_movie | in_preview.
pub(crate) fn write_tkhd(track_id: u32, duration: u64, width: u32, height: u32, is_video: bool) -> Vec<u8> {
    let mut content = Vec::with_capacity(96);
    content.extend_from_slice(&fullbox_header(1, 7));
    content.extend_from_slice(&[0u8; 16]);
    content.extend_from_slice(&track_id.to_be_bytes());
    content.extend_from_slice(&0u32.to_be_bytes());
    content.extend_from_slice(&duration.to_be_bytes());
    content.extend_from_slice(&[0u8; 8]);
    content.extend_from_slice(&0u16.to_be_bytes()); // layer
    content.extend_from_slice(&0u16.to_be_bytes()); // alternate_group
    let volume: u16 = if is_video { 0 } else { 0x0100 };
    content.extend_from_slice(&volume.to_be_bytes());
    content.extend_from_slice(&0u16.to_be_bytes());
    content.extend_from_slice(&unity_matrix());
    // 16.16 fixed point
    content.extend_from_slice(&(width << 16).to_be_bytes());
    content.extend_from_slice(&(height << 16).to_be_bytes());
    write_box(b"tkhd", &content)
}

/// Media header, version 1, language "und".
pub(crate) fn write_mdhd(timescale: u32, duration: u64) -> Vec<u8> {
    let mut content = Vec::with_capacity(36);
    content.extend_from_slice(&fullbox_header(1, 0));
    content.extend_from_slice(&[0u8; 16]);
    content.extend_from_slice(&timescale.to_be_bytes());
    content.extend_from_slice(&duration.to_be_bytes());
    content.extend_from_slice(&0x55C4u16.to_be_bytes());
    content.extend_from_slice(&0u16.to_be_bytes());
    write_box(b"mdhd", &content)
}

pub(crate) fn write_hdlr(handler_type: &[u8; 4], name: &[u8]) -> Vec<u8> {
    let mut content = Vec::with_capacity(24 + name.len() + 1);
    content.extend_from_slice(&fullbox_header(0, 0));
    content.extend_from_slice(&0u32.to_be_bytes()); // pre_defined
    content.extend_from_slice(handler_type);
    content.extend_from_slice(&[0u8; 12]);
    content.extend_from_slice(name);
    content.push(0);
    write_box(b"hdlr", &content)
}

/// dinf > dref > self-contained url.
pub(crate) fn write_dinf() -> Vec<u8> {
    let url = write_box(b"url ", &fullbox_header(0, 1));
    let mut dref = Vec::with_capacity(8 + url.len());
    dref.extend_from_slice(&fullbox_header(0, 0));
    dref.extend_from_slice(&1u32.to_be_bytes());
    dref.extend_from_slice(&url);
    write_container_box(b"dinf", &[&write_box(b"dref", &dref)])
}

/// vmhd for video, smhd for audio.
pub(crate) fn write_media_header(is_video: bool) -> Vec<u8> {
    if is_video {
        let mut content = [0u8; 12];
        content[0..4].copy_from_slice(&fullbox_header(0, 1));
        write_box(b"vmhd", &content)
    } else {
        write_box(b"smhd", &[0u8; 8])
    }
}

/// The empty stts/stsc/stsz/stco tables every fMP4 stbl must carry.
fn write_empty_sample_tables() -> Vec<u8> {
    let mut out = Vec::with_capacity(68);
    out.extend_from_slice(&write_box(b"stts", &[0u8; 8]));
    out.extend_from_slice(&write_box(b"stsc", &[0u8; 8]));
    out.extend_from_slice(&write_box(b"stsz", &[0u8; 12]));
    out.extend_from_slice(&write_box(b"stco", &[0u8; 8]));
    out
}

// ---------------------------------------------------------------------------
// Sample descriptions
// ---------------------------------------------------------------------------

/// Visual sample entry (avc1/hvc1) with its codec configuration and pasp.
pub(crate) fn write_visual_entry(
    codec: VideoCodec,
    width: u32,
    height: u32,
    pixel_ratio: (u32, u32),
    codec_private: &[u8],
) -> Vec<u8> {
    let (entry_type, config_type) = match codec {
        VideoCodec::H264 => (b"avc1", b"avcC"),
        VideoCodec::H265 => (b"hvc1", b"hvcC"),
    };

    let mut entry = Vec::with_capacity(78 + codec_private.len() + 24);
    entry.extend_from_slice(&[0u8; 6]);
    entry.extend_from_slice(&1u16.to_be_bytes()); // data reference index
    entry.extend_from_slice(&[0u8; 16]);
    entry.extend_from_slice(&(width as u16).to_be_bytes());
    entry.extend_from_slice(&(height as u16).to_be_bytes());
    entry.extend_from_slice(&0x00480000u32.to_be_bytes()); // 72 dpi
    entry.extend_from_slice(&0x00480000u32.to_be_bytes());
    entry.extend_from_slice(&0u32.to_be_bytes());
    entry.extend_from_slice(&1u16.to_be_bytes()); // frame count
    entry.extend_from_slice(&[0u8; 32]); // compressor name
    entry.extend_from_slice(&0x0018u16.to_be_bytes());
    entry.extend_from_slice(&(-1i16).to_be_bytes());

    if !codec_private.is_empty() {
        entry.extend_from_slice(&write_box(config_type, codec_private));
    }

    let mut pasp = [0u8; 8];
    pasp[0..4].copy_from_slice(&pixel_ratio.0.to_be_bytes());
    pasp[4..8].copy_from_slice(&pixel_ratio.1.to_be_bytes());
    entry.extend_from_slice(&write_box(b"pasp", &pasp));

    write_box(entry_type, &entry)
}

/// Audio sample entry: mp4a+esds, .mp3, or ac-3+dac3.
pub(crate) fn write_audio_entry(
    codec: AudioCodec,
    sample_rate: u32,
    channels: u16,
    codec_private: &[u8],
) -> Vec<u8> {
    let mut entry = Vec::with_capacity(28 + codec_private.len() + 40);
    entry.extend_from_slice(&[0u8; 6]);
    entry.extend_from_slice(&1u16.to_be_bytes());
    entry.extend_from_slice(&[0u8; 8]);
    entry.extend_from_slice(&channels.to_be_bytes());
    entry.extend_from_slice(&16u16.to_be_bytes()); // sample size
    entry.extend_from_slice(&[0u8; 4]);
    entry.extend_from_slice(&(sample_rate << 16).to_be_bytes());

    let entry_type = match codec {
        AudioCodec::Aac => {
            entry.extend_from_slice(&write_esds(codec_private));
            b"mp4a"
        }
        AudioCodec::Mp3 => b".mp3",
        AudioCodec::Ac3 => {
            if !codec_private.is_empty() {
                entry.extend_from_slice(&write_box(b"dac3", codec_private));
            }
            b"ac-3"
        }
    };

    write_box(entry_type, &entry)
}

/// Elementary stream descriptor wrapping an AudioSpecificConfig.
pub(crate) fn write_esds(audio_specific_config: &[u8]) -> Vec<u8> {
    let len = audio_specific_config.len() as u8;
    let mut content = Vec::with_capacity(4 + 30 + audio_specific_config.len());
    content.extend_from_slice(&fullbox_header(0, 0));
    // ES_Descriptor
    content.extend_from_slice(&[0x03, 0x17 + len, 0x00, 0x01, 0x00]);
    // DecoderConfigDescriptor: mpeg4 audio, audio stream
    content.extend_from_slice(&[0x04, 0x0F + len, 0x40, 0x15]);
    content.extend_from_slice(&[0u8; 3]); // buffer size
    content.extend_from_slice(&[0u8; 8]); // max + avg bitrate
    // DecoderSpecificInfo
    content.extend_from_slice(&[0x05, len]);
    content.extend_from_slice(audio_specific_config);
    // SLConfigDescriptor
    content.extend_from_slice(&[0x06, 0x01, 0x02]);
    write_box(b"esds", &content)
}

pub(crate) fn write_stbl(sample_entry: &[u8]) -> Vec<u8> {
    let mut stsd = Vec::with_capacity(8 + sample_entry.len());
    stsd.extend_from_slice(&fullbox_header(0, 0));
    stsd.extend_from_slice(&1u32.to_be_bytes());
    stsd.extend_from_slice(sample_entry);
    let stsd = write_box(b"stsd", &stsd);
    write_container_box(b"stbl", &[&stsd, &write_empty_sample_tables()])
}

// ---------------------------------------------------------------------------
// trak / mvex / moov
// ---------------------------------------------------------------------------

pub(crate) fn write_trak(
    track_id: u32,
    timescale: u32,
    width: u32,
    height: u32,
    sample_entry: &[u8],
    is_video: bool,
) -> Vec<u8> {
    let tkhd = write_tkhd(track_id, 0, width, height, is_video);
    let (handler, name): (&[u8; 4], &[u8]) = if is_video {
        (b"vide", b"VideoHandler")
    } else {
        (b"soun", b"SoundHandler")
    };
    let minf = write_container_box(
        b"minf",
        &[&write_media_header(is_video), &write_dinf(), &write_stbl(sample_entry)],
    );
    let mdia = write_container_box(
        b"mdia",
        &[&write_mdhd(timescale, 0), &write_hdlr(handler, name), &minf],
    );
    write_container_box(b"trak", &[&tkhd, &mdia])
}

/// Track extends with all defaults zeroed; every trun carries its own values.
pub(crate) fn write_trex(track_id: u32) -> Vec<u8> {
    let mut content = Vec::with_capacity(24);
    content.extend_from_slice(&fullbox_header(0, 0));
    content.extend_from_slice(&track_id.to_be_bytes());
    content.extend_from_slice(&1u32.to_be_bytes()); // sample description index
    content.extend_from_slice(&[0u8; 12]);
    write_box(b"trex", &content)
}

pub(crate) fn write_moov(timescale: u32, track_id: u32, trak: &[u8]) -> Vec<u8> {
    let mvhd = write_mvhd(timescale, 0, track_id + 1);
    let mvex = write_container_box(b"mvex", &[&write_trex(track_id)]);
    write_container_box(b"moov", &[&mvhd, trak, &mvex])
}

// ---------------------------------------------------------------------------
// moof children
// ---------------------------------------------------------------------------

pub(crate) fn write_mfhd(sequence_number: u32) -> Vec<u8> {
    let mut content = [0u8; 8];
    content[4..8].copy_from_slice(&sequence_number.to_be_bytes());
    write_box(b"mfhd", &content)
}

/// Track fragment header with default-base-is-moof (0x020000).
pub(crate) fn write_tfhd(track_id: u32) -> Vec<u8> {
    let mut content = Vec::with_capacity(8);
    content.extend_from_slice(&fullbox_header(0, 0x020000));
    content.extend_from_slice(&track_id.to_be_bytes());
    write_box(b"tfhd", &content)
}

/// Track fragment decode time, version 1 for 64-bit.
pub(crate) fn write_tfdt(base_media_decode_time: u64) -> Vec<u8> {
    let mut content = Vec::with_capacity(12);
    content.extend_from_slice(&fullbox_header(1, 0));
    content.extend_from_slice(&base_media_decode_time.to_be_bytes());
    write_box(b"tfdt", &content)
}

/// A single sample's row in `trun`.
pub(crate) struct TrunSample {
    pub duration: u32,
    pub size: u32,
    pub flags: u32,
    pub composition_time_offset: i32,
}

/// Bytes per trun row: duration, size, flags, composition offset.
pub(crate) const TRUN_SAMPLE_SIZE: usize = 16;

/// Write the `trun` box (track run), version 1 for signed composition offsets.
///
/// Flags used:
/// - 0x000001: data-offset-present
/// - 0x000100: sample-duration-present
/// - 0x000200: sample-size-present
/// - 0x000400: sample-flags-present
/// - 0x000800: sample-composition-time-offset-present
///
/// `data_offset` is measured from the start of the containing moof.
pub(crate) fn write_trun(samples: &[TrunSample], data_offset: i32) -> Vec<u8> {
    let flags: u32 = 0x000001 | 0x000100 | 0x000200 | 0x000400 | 0x000800;
    let mut content = Vec::with_capacity(12 + samples.len() * TRUN_SAMPLE_SIZE);
    content.extend_from_slice(&fullbox_header(1, flags));
    content.extend_from_slice(&(samples.len() as u32).to_be_bytes());
    content.extend_from_slice(&data_offset.to_be_bytes());
    for s in samples {
        content.extend_from_slice(&s.duration.to_be_bytes());
        content.extend_from_slice(&s.size.to_be_bytes());
        content.extend_from_slice(&s.flags.to_be_bytes());
        content.extend_from_slice(&s.composition_time_offset.to_be_bytes());
    }
    write_box(b"trun", &content)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
