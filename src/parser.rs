use std::ops::Range;

use byteorder::{BigEndian, ByteOrder};

use crate::boxes::{BoxHeader, FourCC};
use crate::error::HeaderError;
use crate::reader::RandomAccessReader;

pub type Result<T> = std::result::Result<T, HeaderError>;

/// Decode the header at `offset` and check that the box fits inside
/// `parent` (or inside the reader when there is no parent).
///
/// A declared size of 0 expands to the end of `parent`; at top level it is
/// rejected with [`HeaderError::ZeroSizeWithoutParent`].
pub fn read_box_header(
    reader: &dyn RandomAccessReader,
    offset: u64,
    parent: Option<Range<u64>>,
) -> Result<BoxHeader> {
    let limit = parent_end(reader, parent.as_ref());
    let h = decode_box_header(reader, offset, parent)?;
    if h.end() > limit {
        return Err(HeaderError::ExceedsParent { expected_end: h.end(), parent_end: limit });
    }
    Ok(h)
}

/// Decode a header without checking the declared end against the parent.
///
/// Used by tolerant traversal, which clamps oversized boxes itself.
pub fn decode_box_header(
    reader: &dyn RandomAccessReader,
    offset: u64,
    parent: Option<Range<u64>>,
) -> Result<BoxHeader> {
    // Past the end of the data but inside the parent is a truncated header,
    // not a misplaced one.
    let bounds = parent.clone().unwrap_or(0..reader.len());
    if !bounds.contains(&offset) {
        return Err(HeaderError::OffsetOutsideParent {
            offset,
            parent_start: bounds.start,
            parent_end: bounds.end,
        });
    }

    let base = read_field(reader, offset, 8)?;
    let size32 = BigEndian::read_u32(&base[0..4]);
    let typ = FourCC([base[4], base[5], base[6], base[7]]);

    let mut header_size = 8u64;
    let mut total_size = size32 as u64;

    if size32 == 1 {
        let large = read_field(reader, offset + header_size, 8)?;
        total_size = BigEndian::read_u64(&large);
        header_size += 8;
    }

    let mut uuid = None;
    if typ == FourCC::UUID {
        let ext = read_field(reader, offset + header_size, 16)?;
        let mut u = [0u8; 16];
        u.copy_from_slice(&ext);
        uuid = Some(u);
        header_size += 16;
    }

    if size32 == 0 {
        let Some(p) = parent else {
            return Err(HeaderError::ZeroSizeWithoutParent);
        };
        total_size = p.end - offset;
    }

    if total_size < header_size {
        return Err(HeaderError::InvalidSize { total_size, header_size });
    }
    if offset.checked_add(total_size).is_none() {
        return Err(HeaderError::InvalidSize { total_size, header_size });
    }

    Ok(BoxHeader { typ, uuid, total_size, header_size, start: offset })
}

fn parent_end(reader: &dyn RandomAccessReader, parent: Option<&Range<u64>>) -> u64 {
    match parent {
        Some(p) => p.end.min(reader.len()),
        None => reader.len(),
    }
}

fn read_field(reader: &dyn RandomAccessReader, offset: u64, len: usize) -> Result<Vec<u8>> {
    let bytes = reader.read_up_to(offset, len)?;
    if bytes.len() < len {
        return Err(HeaderError::TruncatedField { expected: len, actual: bytes.len() });
    }
    Ok(bytes)
}

/// Version and flags of a full box, read from the first four payload bytes.
pub fn read_full_box_header(reader: &dyn RandomAccessReader, h: &BoxHeader) -> Option<(u8, u32)> {
    if h.payload_len() < 4 {
        return None;
    }
    let b = reader.read(h.payload_range().start, 4).ok()?;
    Some((b[0], BigEndian::read_u24(&b[1..4])))
}
