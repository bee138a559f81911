//! Sector-addressed storage over a read-only source plus an in-memory overlay.
//!
//! Sector `n` lives at byte offset `(n + 1) * sector_size` of the image: the
//! header occupies the first sector-sized block. Reads consult the overlay
//! first and fall back to the source; writes only ever touch the overlay and
//! set the sector's dirty bit, so the source medium is never modified and an
//! in-place patch can be planned from the dirty bitmap alone.

use super::error::{OleError, Result};
use fixedbitset::FixedBitSet;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};

/// Block store addressed by sector index.
#[derive(Debug)]
pub struct SectorStore<R> {
    /// Original medium, read lazily
    source: RefCell<R>,
    /// Number of sectors backed by the source
    source_sectors: u32,
    /// Sector size in bytes
    sector_size: usize,
    /// Sectors written during this session
    overlay: HashMap<u32, Box<[u8]>>,
    /// Current number of addressable sectors
    count: u32,
    /// Sectors whose content changed since the last flush
    dirty: FixedBitSet,
}

impl<R: Read + Seek> SectorStore<R> {
    /// Wrap a source medium. `source_len` is the total byte length of the
    /// medium including the header block; a trailing partial sector is
    /// addressable and reads back zero-padded.
    pub fn new(source: R, source_len: u64, sector_size: usize) -> Self {
        let body = source_len.saturating_sub(sector_size as u64);
        let sectors = body.div_ceil(sector_size as u64).min(u64::from(u32::MAX)) as u32;
        Self {
            source: RefCell::new(source),
            source_sectors: sectors,
            sector_size,
            overlay: HashMap::new(),
            count: sectors,
            dirty: FixedBitSet::with_capacity(sectors as usize),
        }
    }

    /// Sector size in bytes
    #[inline]
    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    /// Number of addressable sectors
    #[inline]
    pub fn sector_count(&self) -> u32 {
        self.count
    }

    /// Byte offset of a sector within the image
    #[inline]
    pub fn sector_offset(&self, index: u32) -> u64 {
        (u64::from(index) + 1) * self.sector_size as u64
    }

    /// Read one sector into `buf` (which must be exactly one sector long).
    pub fn read_sector_into(&self, index: u32, buf: &mut [u8]) -> Result<()> {
        if index >= self.count {
            return Err(OleError::OutOfBounds {
                sector: index,
                count: self.count,
            });
        }
        debug_assert_eq!(buf.len(), self.sector_size);

        if let Some(data) = self.overlay.get(&index) {
            buf.copy_from_slice(data);
            return Ok(());
        }

        buf.fill(0);
        if index < self.source_sectors {
            let mut source = self.source.borrow_mut();
            source.seek(SeekFrom::Start(self.sector_offset(index)))?;
            read_up_to(&mut *source, buf)?;
        }
        Ok(())
    }

    /// Read one sector into a fresh buffer.
    pub fn read_sector(&self, index: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.sector_size];
        self.read_sector_into(index, &mut buf)?;
        Ok(buf)
    }

    /// Write one sector. Writing at `sector_count()` appends; anything beyond
    /// that is rejected (no sparse growth). Data shorter than a sector is
    /// zero-padded. Returns whether the stored content changed.
    pub fn write_sector(&mut self, index: u32, data: &[u8]) -> Result<bool> {
        if index > self.count || data.len() > self.sector_size {
            return Err(OleError::OutOfBounds {
                sector: index,
                count: self.count,
            });
        }

        let mut block = vec![0u8; self.sector_size].into_boxed_slice();
        block[..data.len()].copy_from_slice(data);

        if index == self.count {
            self.count += 1;
            self.dirty.grow(self.count as usize);
        } else {
            let current = self.read_sector(index)?;
            if *current == *block {
                return Ok(false);
            }
        }

        self.overlay.insert(index, block);
        self.dirty.insert(index as usize);
        Ok(true)
    }

    /// Read `buf.len()` bytes starting `offset` bytes into a sector, touching
    /// only that range of the source.
    pub fn read_at(&self, index: u32, offset: usize, buf: &mut [u8]) -> Result<()> {
        if index >= self.count || offset + buf.len() > self.sector_size {
            return Err(OleError::OutOfBounds {
                sector: index,
                count: self.count,
            });
        }

        if let Some(data) = self.overlay.get(&index) {
            buf.copy_from_slice(&data[offset..offset + buf.len()]);
            return Ok(());
        }

        buf.fill(0);
        if index < self.source_sectors {
            let mut source = self.source.borrow_mut();
            source.seek(SeekFrom::Start(self.sector_offset(index) + offset as u64))?;
            read_up_to(&mut *source, buf)?;
        }
        Ok(())
    }

    /// Patch part of a sector. A sector already in the overlay is patched
    /// where it lies; otherwise it is read once and added to the overlay.
    pub fn write_at(&mut self, index: u32, offset: usize, data: &[u8]) -> Result<bool> {
        if index > self.count || offset + data.len() > self.sector_size {
            return Err(OleError::OutOfBounds {
                sector: index,
                count: self.count,
            });
        }
        let range = offset..offset + data.len();

        if let Some(block) = self.overlay.get_mut(&index) {
            if block[range.clone()] == *data {
                return Ok(false);
            }
            block[range].copy_from_slice(data);
            self.dirty.insert(index as usize);
            return Ok(true);
        }

        if index == self.count {
            let mut block = vec![0u8; self.sector_size];
            block[range].copy_from_slice(data);
            return self.write_sector(index, &block);
        }

        let mut block = self.read_sector(index)?;
        if block[range.clone()] == *data {
            return Ok(false);
        }
        block[range].copy_from_slice(data);
        self.overlay.insert(index, block.into_boxed_slice());
        self.dirty.insert(index as usize);
        Ok(true)
    }

    /// Append a zero-filled sector and return its index.
    pub fn append_zeroed(&mut self) -> Result<u32> {
        let index = self.count;
        self.write_sector(index, &[])?;
        Ok(index)
    }

    /// Stop addressing sectors at and beyond `count`. Used at open time when
    /// the medium carries trailing sectors no allocation table covers.
    pub fn truncate(&mut self, count: u32) {
        if count >= self.count {
            return;
        }
        self.overlay.retain(|&index, _| index < count);
        for index in count..self.count {
            self.dirty.set(index as usize, false);
        }
        self.count = count;
        self.source_sectors = self.source_sectors.min(count);
    }

    /// Iterate the sectors changed since the last [`clear_dirty`](Self::clear_dirty).
    pub fn dirty_sectors(&self) -> impl Iterator<Item = u32> + '_ {
        self.dirty.ones().map(|i| i as u32)
    }

    /// Whether a sector changed since the last flush
    #[inline]
    pub fn is_dirty(&self, index: u32) -> bool {
        self.dirty.contains(index as usize)
    }

    /// Forget the dirty set after a successful flush.
    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    /// Give back the source medium.
    pub fn into_inner(self) -> R {
        self.source.into_inner()
    }
}

/// Fill `buf` from `reader` until it is full or the reader hits EOF.
fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn image(sectors: usize, sector_size: usize) -> Vec<u8> {
        let mut data = vec![0xEEu8; sector_size];
        for i in 0..sectors {
            data.extend(std::iter::repeat_n(i as u8, sector_size));
        }
        data
    }

    #[test]
    fn test_read_source_sectors() {
        let data = image(3, 512);
        let len = data.len() as u64;
        let store = SectorStore::new(Cursor::new(data), len, 512);
        assert_eq!(store.sector_count(), 3);
        assert_eq!(store.read_sector(2).unwrap(), vec![2u8; 512]);
        assert!(matches!(
            store.read_sector(3),
            Err(OleError::OutOfBounds { sector: 3, count: 3 })
        ));
    }

    #[test]
    fn test_partial_trailing_sector_is_zero_padded() {
        let mut data = image(1, 512);
        data.extend_from_slice(&[7u8; 100]);
        let len = data.len() as u64;
        let store = SectorStore::new(Cursor::new(data), len, 512);
        assert_eq!(store.sector_count(), 2);
        let sector = store.read_sector(1).unwrap();
        assert!(sector[..100].iter().all(|&b| b == 7));
        assert!(sector[100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_append_and_no_sparse_growth() {
        let mut store = SectorStore::new(Cursor::new(Vec::new()), 0, 512);
        assert_eq!(store.sector_count(), 0);
        assert!(store.write_sector(0, b"abc").unwrap());
        assert_eq!(store.sector_count(), 1);
        assert!(matches!(
            store.write_sector(5, b"x"),
            Err(OleError::OutOfBounds { sector: 5, count: 1 })
        ));
        assert_eq!(&store.read_sector(0).unwrap()[..3], b"abc");
    }

    #[test]
    fn test_dirty_tracking_ignores_identical_writes() {
        let data = image(2, 512);
        let len = data.len() as u64;
        let mut store = SectorStore::new(Cursor::new(data), len, 512);

        assert!(!store.write_sector(1, &[1u8; 512]).unwrap());
        assert_eq!(store.dirty_sectors().count(), 0);

        assert!(store.write_at(1, 10, &[9, 9]).unwrap());
        assert_eq!(store.dirty_sectors().collect::<Vec<_>>(), vec![1]);

        store.clear_dirty();
        assert!(!store.is_dirty(1));
        // overlay still serves the patched content
        assert_eq!(store.read_sector(1).unwrap()[10], 9);

        // patching the overlay in place keeps the same dirty rules
        assert!(!store.write_at(1, 10, &[9, 9]).unwrap());
        assert!(!store.is_dirty(1));
        assert!(store.write_at(1, 0, &[4]).unwrap());
        assert!(store.is_dirty(1));
    }

    #[test]
    fn test_read_at_ranges() {
        let data = image(2, 512);
        let len = data.len() as u64;
        let mut store = SectorStore::new(Cursor::new(data), len, 512);

        let mut buf = [0u8; 64];
        store.read_at(1, 448, &mut buf).unwrap();
        assert_eq!(buf, [1u8; 64]);
        assert!(store.read_at(1, 480, &mut buf).is_err());
        assert!(store.read_at(2, 0, &mut buf).is_err());

        store.write_at(0, 64, &[5u8; 64]).unwrap();
        store.read_at(0, 64, &mut buf).unwrap();
        assert_eq!(buf, [5u8; 64]);
        store.read_at(0, 0, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 64]);

        // appending through a partial write
        let appended = store.sector_count();
        assert!(store.write_at(appended, 128, &[3u8; 64]).unwrap());
        store.read_at(appended, 128, &mut buf).unwrap();
        assert_eq!(buf, [3u8; 64]);
    }
}
