use std::io::Write;

use isoinspect::{ChunkedFileReader, MappedReader, MemoryReader, RandomAccessReader, ReaderError};

fn sample_bytes() -> Vec<u8> {
    (0..=255u8).cycle().take(1000).collect()
}

fn temp_file(data: &[u8]) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("create temp file");
    f.write_all(data).expect("write temp file");
    f.flush().expect("flush temp file");
    f
}

#[test]
fn memory_reader_reads_exact_windows() {
    let r = MemoryReader::new(sample_bytes());
    assert_eq!(r.len(), 1000);
    assert_eq!(r.read(10, 4).unwrap(), vec![10, 11, 12, 13]);
    assert_eq!(r.read_u32(0).unwrap(), 0x0001_0203);
    assert_eq!(r.read_u16(254).unwrap(), 0xfeff);
    assert_eq!(r.read(1000, 0).unwrap(), Vec::<u8>::new());
}

#[test]
fn memory_reader_rejects_out_of_bounds() {
    let r = MemoryReader::new(vec![1, 2, 3]);
    match r.read(2, 2) {
        Err(ReaderError::OutOfBounds { offset, count, length }) => {
            assert_eq!((offset, count, length), (2, 2, 3));
        }
        other => panic!("Expected OutOfBounds, got {other:?}"),
    }
    assert!(r.read(u64::MAX, 1).is_err());
    assert!(r.read_u64(0).is_err());
}

#[test]
fn read_up_to_stops_at_end() {
    let r = MemoryReader::new(vec![1, 2, 3]);
    assert_eq!(r.read_up_to(1, 10).unwrap(), vec![2, 3]);
    assert!(r.read_up_to(3, 10).unwrap().is_empty());
    assert!(r.read_up_to(50, 10).unwrap().is_empty());
}

#[test]
fn mapped_reader_matches_file_contents() {
    let data = sample_bytes();
    let f = temp_file(&data);
    let r = MappedReader::open(f.path()).unwrap();
    assert_eq!(r.len(), data.len() as u64);
    assert_eq!(r.read(500, 16).unwrap(), data[500..516].to_vec());
    assert!(r.read(999, 2).is_err());
}

#[test]
fn mapped_reader_handles_empty_file() {
    let f = temp_file(&[]);
    let r = MappedReader::open(f.path()).unwrap();
    assert_eq!(r.len(), 0);
    assert!(r.is_empty());
    assert!(r.read(0, 1).is_err());
}

#[test]
fn chunked_reader_reads_across_chunk_boundaries() {
    let data = sample_bytes();
    let f = temp_file(&data);
    let r = ChunkedFileReader::with_chunk_size(f.reopen().unwrap(), 64).unwrap();
    assert_eq!(r.chunk_size(), 64);
    assert_eq!(r.len(), 1000);

    // Spans three chunks.
    assert_eq!(r.read(60, 140).unwrap(), data[60..200].to_vec());
    // Final partial chunk.
    assert_eq!(r.read(990, 10).unwrap(), data[990..].to_vec());
    // Back to an earlier chunk after the cache moved on.
    assert_eq!(r.read(0, 8).unwrap(), data[..8].to_vec());
    assert!(r.read(995, 10).is_err());
}

#[test]
fn chunked_reader_rejects_zero_chunk_size() {
    let f = temp_file(&sample_bytes());
    let err = ChunkedFileReader::with_chunk_size(f.reopen().unwrap(), 0)
        .err()
        .expect("zero chunk size must be rejected");
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

#[test]
fn readers_agree_on_every_window() {
    let data = sample_bytes();
    let f = temp_file(&data);
    let memory = MemoryReader::new(data.clone());
    let mapped = MappedReader::open(f.path()).unwrap();
    let chunked = ChunkedFileReader::with_chunk_size(f.reopen().unwrap(), 37).unwrap();

    for offset in (0..1000u64).step_by(53) {
        let count = 41usize.min((1000 - offset) as usize);
        let expected = memory.read(offset, count).unwrap();
        assert_eq!(mapped.read(offset, count).unwrap(), expected);
        assert_eq!(chunked.read(offset, count).unwrap(), expected);
    }
}
