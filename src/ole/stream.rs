//! Byte-stream handles over container streams.
//!
//! [`StreamReader`] reads a stream lazily, one sector at a time, through the
//! container's sector store. [`StreamWriter`] buffers the stream body and
//! commits it to the container when it is closed, flushed or dropped; the
//! commit is where the final size lands in the directory entry and where a
//! mini stream that crossed the cutoff migrates to ordinary sectors.

use super::consts::MINI_SECTOR_SIZE;
use super::directory::Placement;
use super::error::{OleError, Result};
use super::file::OleFile;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::warn;

impl From<OleError> for io::Error {
    fn from(err: OleError) -> Self {
        match err {
            OleError::Io(inner) => inner,
            other => io::Error::other(other),
        }
    }
}

/// Resolve a `SeekFrom` against the current position and length.
fn seek_target(pos: u64, len: u64, from: SeekFrom) -> io::Result<u64> {
    let target = match from {
        SeekFrom::Start(offset) => Some(offset),
        SeekFrom::End(delta) => len.checked_add_signed(delta),
        SeekFrom::Current(delta) => pos.checked_add_signed(delta),
    };
    target.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid seek to a negative or overflowing position",
        )
    })
}

/// Read handle for one stream.
///
/// Obtained from [`OleFile::get_stream`]. The handle borrows the container,
/// so it cannot outlive it or overlap with a structural change.
#[derive(Debug)]
pub struct StreamReader<'a, R: Read + Seek> {
    file: &'a OleFile<R>,
    placement: Placement,
    chain: Vec<u32>,
    size: u64,
    pos: u64,
    unit: usize,
    /// Contents of `chain[loaded]`
    block: Vec<u8>,
    loaded: Option<usize>,
}

impl<'a, R: Read + Seek> StreamReader<'a, R> {
    pub(crate) fn new(file: &'a OleFile<R>, placement: Placement, chain: Vec<u32>, size: u64) -> Self {
        let unit = match placement {
            Placement::Mini => MINI_SECTOR_SIZE,
            Placement::Big => file.sector_size(),
        };
        Self {
            file,
            placement,
            chain,
            size,
            pos: 0,
            unit,
            block: vec![0u8; unit],
            loaded: None,
        }
    }

    /// Stream length in bytes
    #[inline]
    pub fn len(&self) -> u64 {
        self.size
    }

    /// Whether the stream is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Current read position
    #[inline]
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Table the stream's sectors are allocated from
    #[inline]
    pub fn placement(&self) -> Placement {
        self.placement
    }

    /// Advance the position by up to `count` bytes; returns how far it moved.
    pub fn skip(&mut self, count: u64) -> u64 {
        let moved = count.min(self.size.saturating_sub(self.pos));
        self.pos += moved;
        moved
    }

    /// Fill `buf` completely or fail with `UnexpectedEof`.
    pub fn read_fully(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.read_exact(buf)
    }

    /// Read the remainder of the stream.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(self.size.saturating_sub(self.pos) as usize);
        self.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl<R: Read + Seek> Read for StreamReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let index = (self.pos / self.unit as u64) as usize;
        let offset = (self.pos % self.unit as u64) as usize;

        if self.loaded != Some(index) {
            let sector = self.chain.get(index).copied().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream chain ends at sector {index}"),
                )
            })?;
            self.file.read_unit(self.placement, sector, &mut self.block)?;
            self.loaded = Some(index);
        }

        let remaining = (self.size - self.pos) as usize;
        let count = buf.len().min(self.unit - offset).min(remaining);
        buf[..count].copy_from_slice(&self.block[offset..offset + count]);
        self.pos += count as u64;
        Ok(count)
    }
}

impl<R: Read + Seek> Seek for StreamReader<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = seek_target(self.pos, self.size, pos)?;
        Ok(self.pos)
    }
}

/// Write handle for one stream.
///
/// The body is kept in memory and committed to the container on
/// [`close`](Self::close), on [`flush`](Write::flush) and, as a last resort,
/// on drop (where a failure can only be logged).
#[derive(Debug)]
pub struct StreamWriter<'a, R: Read + Seek> {
    file: &'a mut OleFile<R>,
    sid: u32,
    data: Vec<u8>,
    pos: usize,
    /// Buffer differs from what the container holds
    pending: bool,
}

impl<'a, R: Read + Seek> StreamWriter<'a, R> {
    pub(crate) fn new(file: &'a mut OleFile<R>, sid: u32, data: Vec<u8>) -> Self {
        Self {
            file,
            sid,
            data,
            pos: 0,
            pending: false,
        }
    }

    /// Current length of the buffered stream
    #[inline]
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Whether the buffered stream is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current write position
    #[inline]
    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    /// Truncate or zero-extend the stream.
    pub fn set_len(&mut self, len: u64) {
        self.data.resize(len as usize, 0);
        self.pending = true;
    }

    /// Commit the body and give the container back.
    pub fn close(mut self) -> Result<()> {
        self.commit()
    }

    fn commit(&mut self) -> Result<()> {
        if self.pending {
            self.file.set_stream_data(self.sid, &self.data)?;
            self.pending = false;
        }
        Ok(())
    }
}

impl<R: Read + Seek> Write for StreamWriter<'_, R> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let end = self.pos + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        self.pending = true;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.commit()?;
        Ok(())
    }
}

impl<R: Read + Seek> Seek for StreamWriter<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = seek_target(self.pos as u64, self.data.len() as u64, pos)?;
        self.pos = usize::try_from(target)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "position too large"))?;
        Ok(target)
    }
}

impl<R: Read + Seek> Drop for StreamWriter<'_, R> {
    fn drop(&mut self) {
        if let Err(err) = self.commit() {
            warn!(sid = self.sid, error = %err, "stream writer dropped without a successful commit");
        }
    }
}
