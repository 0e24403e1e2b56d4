//! ISO BMFF box header parsing and navigation over in-memory bytes.

use std::io::{self, Cursor, Read};
use std::ops::Range;

use crate::{Error, Result};

/// A parsed box header.
#[derive(Debug, Clone)]
pub struct BoxHeader {
    /// 4-byte box type (e.g. b"moov").
    pub box_type: [u8; 4],
    /// Total size of the box including the header; 0 means "to end of parent".
    pub size: u64,
    /// Size of the header itself (8 or 16 for extended-size boxes).
    pub header_size: u64,
}

/// Location of a box inside a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxRange {
    pub box_type: [u8; 4],
    /// Offset of the size field.
    pub start: usize,
    /// Offset of the first content byte (after the header).
    pub content_start: usize,
    /// One past the last byte of the box.
    pub end: usize,
}

impl BoxRange {
    /// Range of the content bytes.
    pub fn content(&self) -> Range<usize> {
        self.content_start..self.end
    }
}

/// Read a box header from the current position.
///
/// Returns `Ok(None)` at EOF, `Ok(Some(header))` otherwise.
pub fn read_box_header<R: Read>(reader: &mut R) -> io::Result<Option<BoxHeader>> {
    let mut buf = [0u8; 8];
    match reader.read_exact(&mut buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let size32 = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let box_type = [buf[4], buf[5], buf[6], buf[7]];

    let (size, header_size) = if size32 == 1 {
        (read_u64(reader)?, 16u64)
    } else {
        (size32 as u64, 8u64)
    };

    Ok(Some(BoxHeader {
        box_type,
        size,
        header_size,
    }))
}

/// List the boxes laid out back to back in `data[range]`.
///
/// Header reads never look past the end of `range`, and a declared size
/// that overflows or undercuts its own header is rejected.
pub fn child_boxes(data: &[u8], range: Range<usize>) -> Result<Vec<BoxRange>> {
    let end = range.end.min(data.len());
    let mut cursor = Cursor::new(&data[..end]);
    let mut pos = range.start;
    let mut boxes = Vec::new();

    while pos.checked_add(8).is_some_and(|header_end| header_end <= end) {
        cursor.set_position(pos as u64);
        let Some(header) = read_box_header(&mut cursor)? else {
            break;
        };
        let name = String::from_utf8_lossy(&header.box_type).into_owned();
        if header.size != 0 && header.size < header.header_size {
            return Err(Error::invalid_mp4(format!(
                "box {name} at {pos} declares size {} smaller than its header",
                header.size
            )));
        }
        let content_start = pos + header.header_size as usize;
        let box_end = if header.size == 0 {
            end as u64
        } else {
            (pos as u64).checked_add(header.size).ok_or_else(|| {
                Error::invalid_mp4(format!("box {name} at {pos} declares size {}", header.size))
            })?
        };
        if box_end < content_start as u64 {
            return Err(Error::invalid_mp4(format!(
                "box {name} at {pos} ends before its content"
            )));
        }
        if box_end > end as u64 {
            return Err(Error::BufferUnderflow {
                need: usize::try_from(box_end - pos as u64).unwrap_or(usize::MAX),
                have: end - pos,
            });
        }
        boxes.push(BoxRange {
            box_type: header.box_type,
            start: pos,
            content_start,
            end: box_end as usize,
        });
        pos = box_end as usize;
    }

    Ok(boxes)
}

/// Find every box reached by following `path` from `data[range]`.
///
/// `find_boxes(data, 0..len, &[b"moov", b"trak"])` returns all traks.
pub fn find_boxes(data: &[u8], range: Range<usize>, path: &[&[u8; 4]]) -> Result<Vec<BoxRange>> {
    let Some((first, rest)) = path.split_first() else {
        return Ok(Vec::new());
    };

    let mut found = Vec::new();
    for child in child_boxes(data, range)? {
        if &child.box_type != *first {
            continue;
        }
        if rest.is_empty() {
            found.push(child);
        } else {
            found.extend(find_boxes(data, child.content(), rest)?);
        }
    }
    Ok(found)
}

/// First box along `path`, or [`Error::MissingAtom`].
pub fn require_box(
    data: &[u8],
    range: Range<usize>,
    path: &[&[u8; 4]],
    name: &'static str,
) -> Result<BoxRange> {
    find_boxes(data, range, path)?
        .into_iter()
        .next()
        .ok_or(Error::MissingAtom(name))
}

/// Read a big-endian u32.
pub fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// Read a big-endian u64.
pub fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

/// Read a fullbox header (1 byte version + 3 bytes flags) and return (version, flags).
pub fn read_fullbox_header<R: Read>(reader: &mut R) -> io::Result<(u8, u32)> {
    let val = read_u32(reader)?;
    let version = (val >> 24) as u8;
    let flags = val & 0x00FFFFFF;
    Ok((version, flags))
}

/// Cursor positioned at the content of `b`.
pub fn content_cursor<'a>(data: &'a [u8], b: &BoxRange) -> Cursor<&'a [u8]> {
    Cursor::new(&data[b.content()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn mk_box(box_type: &[u8; 4], content: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((8 + content.len()) as u32).to_be_bytes());
        out.extend_from_slice(box_type);
        out.extend_from_slice(content);
        out
    }

    #[test]
    fn test_read_box_header_extended() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&(5_000_000_000u64).to_be_bytes());
        let mut cursor = Cursor::new(&data);
        let header = read_box_header(&mut cursor).unwrap().unwrap();
        assert_eq!(header.size, 5_000_000_000);
        assert_eq!(header.header_size, 16);
    }

    #[test]
    fn test_read_box_header_eof() {
        let data = [0u8; 4];
        let mut cursor = Cursor::new(&data);
        assert!(read_box_header(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_find_nested_boxes() {
        let tfdt = mk_box(b"tfdt", &[0u8; 8]);
        let traf_a = mk_box(b"traf", &tfdt);
        let traf_b = mk_box(b"traf", &tfdt);
        let mut moof_content = mk_box(b"mfhd", &[0u8; 8]);
        moof_content.extend_from_slice(&traf_a);
        moof_content.extend_from_slice(&traf_b);
        let mut data = mk_box(b"styp", &[0u8; 4]);
        data.extend_from_slice(&mk_box(b"moof", &moof_content));

        let found = find_boxes(&data, 0..data.len(), &[b"moof", b"traf", b"tfdt"]).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].end - found[0].content_start, 8);
        assert_eq!(&data[found[1].start + 4..found[1].start + 8], b"tfdt");
    }

    #[test]
    fn test_zero_size_box_extends_to_end() {
        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[0xAA; 12]);
        let boxes = child_boxes(&data, 0..data.len()).unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].end, data.len());
    }

    #[test]
    fn test_truncated_box_is_underflow() {
        let mut data = mk_box(b"moov", &[0u8; 16]);
        data.truncate(12);
        assert_matches!(
            child_boxes(&data, 0..data.len()),
            Err(Error::BufferUnderflow { need: 24, have: 12 })
        );
    }

    #[test]
    fn test_require_box_missing() {
        let data = mk_box(b"ftyp", &[0u8; 8]);
        assert_matches!(
            require_box(&data, 0..data.len(), &[b"moov"], "moov"),
            Err(Error::MissingAtom("moov"))
        );
    }

    fn largesize_box(box_type: &[u8; 4], size: u64) -> Vec<u8> {
        let mut out = 1u32.to_be_bytes().to_vec();
        out.extend_from_slice(box_type);
        out.extend_from_slice(&size.to_be_bytes());
        out
    }

    #[test]
    fn test_overflowing_largesize_is_invalid() {
        let mut data = mk_box(b"ftyp", &[0u8; 8]);
        data.extend_from_slice(&largesize_box(b"moof", u64::MAX));
        assert_matches!(child_boxes(&data, 0..data.len()), Err(Error::InvalidMp4(_)));
    }

    #[test]
    fn test_largesize_at_start_is_underflow() {
        let data = largesize_box(b"moof", u64::MAX);
        assert_matches!(
            child_boxes(&data, 0..data.len()),
            Err(Error::BufferUnderflow { have: 16, .. })
        );
    }

    #[test]
    fn test_largesize_header_past_range_end() {
        // extended header announced in the last 8 bytes of the range
        let mut data = mk_box(b"ftyp", &[0u8; 8]);
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        let range_end = data.len();
        data.extend_from_slice(&0u64.to_be_bytes());
        assert_matches!(child_boxes(&data, 0..range_end), Err(Error::Io(_)));

        // with the full header a zero largesize runs to the end, content empty
        let boxes = child_boxes(&data, 0..data.len()).unwrap();
        assert_eq!(boxes[1].content(), data.len()..data.len());
    }
}
