//! Byte-addressable storage the parser reads through.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use byteorder::{BigEndian, ByteOrder};
use memmap2::Mmap;

use crate::boxes::FourCC;
use crate::error::ReaderError;

pub const DEFAULT_CHUNK_SIZE: usize = 1_048_576;

/// Random access over a fixed-length byte source.
///
/// Reads never return fewer bytes than requested: a window that runs past
/// `len()` fails with [`ReaderError::OutOfBounds`].
pub trait RandomAccessReader: Send + Sync {
    fn len(&self) -> u64;

    fn read(&self, offset: u64, count: usize) -> Result<Vec<u8>, ReaderError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `count` bytes, stopping early at the end of the data.
    fn read_up_to(&self, offset: u64, count: usize) -> Result<Vec<u8>, ReaderError> {
        let available = self.len().saturating_sub(offset);
        let count = count.min(usize::try_from(available).unwrap_or(usize::MAX));
        if count == 0 {
            return Ok(Vec::new());
        }
        self.read(offset, count)
    }

    fn read_u8(&self, offset: u64) -> Result<u8, ReaderError> {
        Ok(self.read(offset, 1)?[0])
    }

    fn read_u16(&self, offset: u64) -> Result<u16, ReaderError> {
        Ok(BigEndian::read_u16(&self.read(offset, 2)?))
    }

    fn read_u32(&self, offset: u64) -> Result<u32, ReaderError> {
        Ok(BigEndian::read_u32(&self.read(offset, 4)?))
    }

    fn read_u64(&self, offset: u64) -> Result<u64, ReaderError> {
        Ok(BigEndian::read_u64(&self.read(offset, 8)?))
    }

    fn read_fourcc(&self, offset: u64) -> Result<FourCC, ReaderError> {
        let b = self.read(offset, 4)?;
        Ok(FourCC([b[0], b[1], b[2], b[3]]))
    }
}

impl<T: RandomAccessReader + ?Sized> RandomAccessReader for Arc<T> {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read(&self, offset: u64, count: usize) -> Result<Vec<u8>, ReaderError> {
        (**self).read(offset, count)
    }
}

impl<T: RandomAccessReader + ?Sized> RandomAccessReader for &T {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read(&self, offset: u64, count: usize) -> Result<Vec<u8>, ReaderError> {
        (**self).read(offset, count)
    }
}

fn window(offset: u64, count: usize, length: u64) -> Result<(usize, usize), ReaderError> {
    let oob = || ReaderError::OutOfBounds { offset, count, length };
    let end = offset.checked_add(count as u64).ok_or_else(oob)?;
    if end > length {
        return Err(oob());
    }
    Ok((offset as usize, end as usize))
}

/// Reader over an owned in-memory buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryReader {
    data: Vec<u8>,
}

impl MemoryReader {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for MemoryReader {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl RandomAccessReader for MemoryReader {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read(&self, offset: u64, count: usize) -> Result<Vec<u8>, ReaderError> {
        let (lo, hi) = window(offset, count, self.len())?;
        Ok(self.data[lo..hi].to_vec())
    }
}

/// Reader over a memory-mapped file.
pub struct MappedReader {
    // Zero-length files cannot be mapped on every platform.
    map: Option<Mmap>,
}

impl MappedReader {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_file(&file)
    }

    pub fn from_file(file: &File) -> io::Result<Self> {
        if file.metadata()?.len() == 0 {
            return Ok(Self { map: None });
        }
        // SAFETY: the mapping is read-only; concurrent truncation of the file by
        // another process is outside what this reader can guard against.
        let map = unsafe { Mmap::map(file)? };
        Ok(Self { map: Some(map) })
    }

    fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

impl RandomAccessReader for MappedReader {
    fn len(&self) -> u64 {
        self.bytes().len() as u64
    }

    fn read(&self, offset: u64, count: usize) -> Result<Vec<u8>, ReaderError> {
        let (lo, hi) = window(offset, count, self.len())?;
        Ok(self.bytes()[lo..hi].to_vec())
    }
}

/// Sequential file reader that pulls fixed-size, chunk-aligned blocks and
/// keeps the most recent one cached.
pub struct ChunkedFileReader {
    state: Mutex<ChunkState>,
    length: u64,
    chunk_size: usize,
}

struct ChunkState {
    file: File,
    cached_start: u64,
    cached: Vec<u8>,
}

impl ChunkedFileReader {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::with_chunk_size(File::open(path)?, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(file: File, chunk_size: usize) -> io::Result<Self> {
        if chunk_size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "chunk size must be non-zero"));
        }
        let length = file.metadata()?.len();
        Ok(Self {
            state: Mutex::new(ChunkState { file, cached_start: 0, cached: Vec::new() }),
            length,
            chunk_size,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl ChunkState {
    fn load(&mut self, start: u64, len: usize) -> io::Result<()> {
        if self.cached_start == start && self.cached.len() == len {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(start))?;
        self.cached.resize(len, 0);
        if let Err(e) = self.file.read_exact(&mut self.cached) {
            self.cached.clear();
            return Err(e);
        }
        self.cached_start = start;
        Ok(())
    }
}

impl RandomAccessReader for ChunkedFileReader {
    fn len(&self) -> u64 {
        self.length
    }

    fn read(&self, offset: u64, count: usize) -> Result<Vec<u8>, ReaderError> {
        window(offset, count, self.length)?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let chunk = self.chunk_size as u64;
        let mut out = Vec::with_capacity(count);
        let mut pos = offset;
        let end = offset + count as u64;
        while pos < end {
            let chunk_start = pos - pos % chunk;
            let chunk_len = chunk.min(self.length - chunk_start) as usize;
            state.load(chunk_start, chunk_len)?;
            let lo = (pos - chunk_start) as usize;
            let hi = ((end - chunk_start) as usize).min(chunk_len);
            out.extend_from_slice(&state.cached[lo..hi]);
            pos = chunk_start + hi as u64;
        }
        Ok(out)
    }
}
