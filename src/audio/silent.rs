//! Pre-encoded silent AAC-LC frames.

use sf_core::AudioCodec;

const MONO: &[u8] = &[0x00, 0xc8, 0x00, 0x80, 0x23, 0x80];
const STEREO: &[u8] = &[0x21, 0x00, 0x49, 0x90, 0x02, 0x19, 0x00, 0x23, 0x80];
const THREE: &[u8] = &[
    0x00, 0xc8, 0x00, 0x80, 0x20, 0x84, 0x01, 0x26, 0x40, 0x08, 0x64, 0x00, 0x8e,
];
const FOUR: &[u8] = &[
    0x00, 0xc8, 0x00, 0x80, 0x20, 0x84, 0x01, 0x26, 0x40, 0x08, 0x64, 0x00, 0x80, 0x2c, 0x80,
    0x08, 0x02, 0x38,
];
const FIVE: &[u8] = &[
    0x00, 0xc8, 0x00, 0x80, 0x20, 0x84, 0x01, 0x26, 0x40, 0x08, 0x64, 0x00, 0x82, 0x30, 0x04,
    0x99, 0x00, 0x21, 0x90, 0x02, 0x38,
];
const SIX: &[u8] = &[
    0x00, 0xc8, 0x00, 0x80, 0x20, 0x84, 0x01, 0x26, 0x40, 0x08, 0x64, 0x00, 0x82, 0x30, 0x04,
    0x99, 0x00, 0x21, 0x90, 0x02, 0x00, 0xb2, 0x00, 0x20, 0x08, 0xe0,
];

/// A frame that decodes to silence, if one exists for this codec layout.
pub fn silent_frame(codec: AudioCodec, channels: u16) -> Option<&'static [u8]> {
    if codec != AudioCodec::Aac {
        return None;
    }
    match channels {
        1 => Some(MONO),
        2 => Some(STEREO),
        3 => Some(THREE),
        4 => Some(FOUR),
        5 => Some(FIVE),
        6 => Some(SIX),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aac_layouts_up_to_six_channels() {
        for channels in 1..=6 {
            assert!(silent_frame(AudioCodec::Aac, channels).is_some(), "{channels} channels");
        }
        assert!(silent_frame(AudioCodec::Aac, 0).is_none());
        assert!(silent_frame(AudioCodec::Aac, 8).is_none());
    }

    #[test]
    fn other_codecs_have_none() {
        assert!(silent_frame(AudioCodec::Mp3, 2).is_none());
        assert!(silent_frame(AudioCodec::Ac3, 2).is_none());
    }
}
