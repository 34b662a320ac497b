use isoinspect::{FourCC, HeaderError, MemoryReader, read_box_header, read_full_box_header};

fn make_minimal_file() -> Vec<u8> {
    // [ftyp box]
    // size: 24 (0x18), type: "ftyp", payload: 16 bytes
    let mut v = Vec::new();
    v.extend_from_slice(&24u32.to_be_bytes());
    v.extend_from_slice(b"ftyp");
    // major brand "isom"
    v.extend_from_slice(b"isom");
    // minor version
    v.extend_from_slice(&512u32.to_be_bytes());
    // one compatible brand "isom"
    v.extend_from_slice(b"isom");
    v
}

#[test]
fn read_single_ftyp_header() {
    let r = MemoryReader::new(make_minimal_file());
    let hdr = read_box_header(&r, 0, None).expect("read_box_header failed");

    assert_eq!(hdr.start, 0);
    assert_eq!(hdr.total_size, 24);
    assert_eq!(hdr.typ, FourCC(*b"ftyp"));
    assert_eq!(hdr.header_size, 8);
    assert_eq!(hdr.payload_range(), 8..24);
    assert!(hdr.uuid.is_none());
}

#[test]
fn read_large_size_header() {
    let mut v = Vec::new();
    v.extend_from_slice(&1u32.to_be_bytes());
    v.extend_from_slice(b"mdat");
    v.extend_from_slice(&32u64.to_be_bytes());
    v.extend_from_slice(&[0xaa; 16]);
    let r = MemoryReader::new(v);

    let hdr = read_box_header(&r, 0, None).unwrap();
    assert_eq!(hdr.header_size, 16);
    assert_eq!(hdr.total_size, 32);
    assert_eq!(hdr.payload_len(), 16);
}

#[test]
fn read_uuid_header() {
    let ext = [0x11u8; 16];
    let mut v = Vec::new();
    v.extend_from_slice(&28u32.to_be_bytes());
    v.extend_from_slice(b"uuid");
    v.extend_from_slice(&ext);
    v.extend_from_slice(&[0, 0, 0, 0]);
    let r = MemoryReader::new(v);

    let hdr = read_box_header(&r, 0, None).unwrap();
    assert_eq!(hdr.header_size, 24);
    assert_eq!(hdr.uuid, Some(ext));
    assert_eq!(hdr.display_type(), format!("uuid:{}", "11".repeat(16)));
}

#[test]
fn large_size_uuid_header_is_32_bytes() {
    let mut v = Vec::new();
    v.extend_from_slice(&1u32.to_be_bytes());
    v.extend_from_slice(b"uuid");
    v.extend_from_slice(&40u64.to_be_bytes());
    v.extend_from_slice(&[0x22; 16]);
    v.extend_from_slice(&[0; 8]);
    let r = MemoryReader::new(v);

    let hdr = read_box_header(&r, 0, None).unwrap();
    assert_eq!(hdr.header_size, 32);
    assert_eq!(hdr.total_size, 40);
}

#[test]
fn zero_size_extends_to_parent_end() {
    let mut v = vec![0u8; 8];
    v.extend_from_slice(&0u32.to_be_bytes());
    v.extend_from_slice(b"mdat");
    v.extend_from_slice(&[0; 20]);
    let r = MemoryReader::new(v);

    let hdr = read_box_header(&r, 8, Some(8..36)).unwrap();
    assert_eq!(hdr.total_size, 28);
    assert_eq!(hdr.end(), 36);
}

#[test]
fn zero_size_without_parent_is_rejected() {
    let mut v = 0u32.to_be_bytes().to_vec();
    v.extend_from_slice(b"mdat");
    let r = MemoryReader::new(v);
    match read_box_header(&r, 0, None) {
        Err(HeaderError::ZeroSizeWithoutParent) => {}
        other => panic!("Expected ZeroSizeWithoutParent, got {other:?}"),
    }
}

#[test]
fn header_errors() {
    // Truncated compact header.
    let r = MemoryReader::new(vec![0, 0, 0, 16, b'f']);
    match read_box_header(&r, 0, None) {
        Err(HeaderError::TruncatedField { expected: 8, actual: 5 }) => {}
        other => panic!("Expected TruncatedField, got {other:?}"),
    }

    // Declared size smaller than the header.
    let mut v = 4u32.to_be_bytes().to_vec();
    v.extend_from_slice(b"free");
    let r = MemoryReader::new(v);
    match read_box_header(&r, 0, None) {
        Err(HeaderError::InvalidSize { total_size: 4, header_size: 8 }) => {}
        other => panic!("Expected InvalidSize, got {other:?}"),
    }

    // Box larger than the data.
    let mut v = 100u32.to_be_bytes().to_vec();
    v.extend_from_slice(b"free");
    let r = MemoryReader::new(v);
    match read_box_header(&r, 0, None) {
        Err(HeaderError::ExceedsParent { expected_end: 100, parent_end: 8 }) => {}
        other => panic!("Expected ExceedsParent, got {other:?}"),
    }

    // Offset outside the parent range.
    let r = MemoryReader::new(make_minimal_file());
    match read_box_header(&r, 30, Some(0..24)) {
        Err(HeaderError::OffsetOutsideParent { offset: 30, .. }) => {}
        other => panic!("Expected OffsetOutsideParent, got {other:?}"),
    }
}

#[test]
fn header_past_end_of_data_inside_parent_is_truncated() {
    let data = make_minimal_file();
    let len = data.len() as u64;
    let r = MemoryReader::new(data);
    match read_box_header(&r, len, Some(0..len + 40)) {
        Err(HeaderError::TruncatedField { expected: 8, actual: 0 }) => {}
        other => panic!("Expected TruncatedField, got {other:?}"),
    }

    // Without a parent the data itself is the bound.
    match read_box_header(&r, len, None) {
        Err(HeaderError::OffsetOutsideParent { .. }) => {}
        other => panic!("Expected OffsetOutsideParent, got {other:?}"),
    }
}

#[test]
fn full_box_header_fields() {
    let mut v = 12u32.to_be_bytes().to_vec();
    v.extend_from_slice(b"mfhd");
    v.extend_from_slice(&[1, 0x00, 0x02, 0x01]);
    let r = MemoryReader::new(v);
    let hdr = read_box_header(&r, 0, None).unwrap();
    assert_eq!(read_full_box_header(&r, &hdr), Some((1, 0x000201)));

    let mut tiny = 8u32.to_be_bytes().to_vec();
    tiny.extend_from_slice(b"mfhd");
    let tiny = MemoryReader::new(tiny);
    let hdr = read_box_header(&tiny, 0, None).unwrap();
    assert_eq!(read_full_box_header(&tiny, &hdr), None);
}
