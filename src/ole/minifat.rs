//! MiniFAT manager
//!
//! Small streams (< 4096 bytes) are packed as 64-byte mini sectors into the
//! mini stream, which is the root entry's data chain in the FAT. The MiniFAT
//! itself is stored in an ordinary FAT chain. Both chains grow on demand;
//! mini sectors freed by deletes or shrinks are reused first-fit, the mini
//! stream is never compacted while the container is open.

use super::consts::*;
use super::error::{OleError, Result, TableKind};
use super::fat::Fat;
use super::header::Header;
use super::store::SectorStore;
use super::table::SectorTable;
use std::io::{Read, Seek};
use tracing::debug;

/// Mini-sector allocation table plus the chains that back it.
#[derive(Debug, Clone)]
pub struct MiniFat {
    table: SectorTable,
    /// Big sectors storing the MiniFAT
    table_chain: Vec<u32>,
    /// Big sectors of the mini stream
    stream_chain: Vec<u32>,
    /// Mini stream length recorded in the root entry
    stream_len: u64,
    sector_size: usize,
}

impl MiniFat {
    /// Create an empty MiniFAT with no mini stream.
    pub fn new(sector_size: usize) -> Self {
        Self {
            table: SectorTable::new(TableKind::MiniFat),
            table_chain: Vec::new(),
            stream_chain: Vec::new(),
            stream_len: 0,
            sector_size,
        }
    }

    /// Load the MiniFAT and locate the mini stream.
    ///
    /// `root_start`/`root_size` come from the root directory entry.
    pub fn load<R: Read + Seek>(
        header: &Header,
        fat: &Fat,
        store: &SectorStore<R>,
        root_start: u32,
        root_size: u64,
    ) -> Result<Self> {
        let count = store.sector_count();
        let sector_size = store.sector_size();

        let table_chain = if header.num_minifat_sectors == 0 {
            Vec::new()
        } else {
            fat.chain_for(header.first_minifat_sector, count)
                .map_err(|e| e.with_entry("<MiniFAT>"))?
        };

        let mut data = Vec::with_capacity(table_chain.len() * sector_size);
        let mut buf = vec![0u8; sector_size];
        for &sector in &table_chain {
            store.read_sector_into(sector, &mut buf)?;
            data.extend_from_slice(&buf);
        }
        let table = SectorTable::from_bytes(TableKind::MiniFat, &data)?;

        let stream_chain = if root_size == 0 && root_start > MAXREGSECT {
            Vec::new()
        } else {
            fat.chain_for(root_start, count)
                .map_err(|e| e.with_entry(ROOT_ENTRY_NAME))?
        };
        let capacity = (stream_chain.len() * sector_size) as u64;
        if root_size > capacity {
            return Err(OleError::CorruptContainer(format!(
                "mini stream declares {root_size} bytes but its chain holds only {capacity}"
            )));
        }

        Ok(Self {
            table,
            table_chain,
            stream_chain,
            stream_len: root_size,
            sector_size,
        })
    }

    /// The raw table
    #[inline]
    pub fn table(&self) -> &SectorTable {
        &self.table
    }

    /// Big sectors storing the MiniFAT
    #[inline]
    pub fn table_chain(&self) -> &[u32] {
        &self.table_chain
    }

    /// Big sectors of the mini stream
    #[inline]
    pub fn stream_chain(&self) -> &[u32] {
        &self.stream_chain
    }

    /// Mini stream size in bytes
    #[inline]
    pub fn stream_len(&self) -> u64 {
        self.stream_len
    }

    /// Start sector of the mini stream, `ENDOFCHAIN` when there is none
    #[inline]
    pub fn stream_start(&self) -> u32 {
        self.stream_chain.first().copied().unwrap_or(ENDOFCHAIN)
    }

    /// Number of mini sectors that are both in the table and backed by the mini stream
    pub fn addressable(&self) -> u32 {
        let backed = self.stream_len / MINI_SECTOR_SIZE as u64;
        (self.table.len() as u64).min(backed) as u32
    }

    /// Walk a mini chain.
    pub fn chain_for(&self, start: u32) -> Result<Vec<u32>> {
        self.table.chain(start, self.addressable())
    }

    /// Free a mini chain.
    pub fn free_chain(&mut self, start: u32) -> Result<()> {
        let limit = self.addressable();
        self.table.free_chain(start, limit)
    }

    /// Mark the given mini sectors free.
    pub fn release(&mut self, sectors: &[u32]) {
        self.table.release(sectors);
    }

    /// Allocate a fresh mini chain of `count` sectors and return its start.
    pub fn allocate_chain<R: Read + Seek>(
        &mut self,
        fat: &mut Fat,
        store: &mut SectorStore<R>,
        count: usize,
    ) -> Result<u32> {
        let mut chain = Vec::with_capacity(count);
        self.resize_chain(fat, store, &mut chain, count)?;
        Ok(chain.first().copied().unwrap_or(ENDOFCHAIN))
    }

    /// Append `additional` mini sectors to the chain at `start`.
    pub fn extend_chain<R: Read + Seek>(
        &mut self,
        fat: &mut Fat,
        store: &mut SectorStore<R>,
        start: u32,
        additional: usize,
    ) -> Result<u32> {
        let mut chain = self.chain_for(start)?;
        let wanted = chain.len() + additional;
        self.resize_chain(fat, store, &mut chain, wanted)?;
        Ok(chain.first().copied().unwrap_or(ENDOFCHAIN))
    }

    /// Keep the first `keep` mini sectors of the chain and free the rest.
    pub fn truncate_chain(&mut self, start: u32, keep: usize) -> Result<u32> {
        let limit = self.addressable();
        self.table.truncate(start, keep, limit)
    }

    /// Grow or shrink `chain` in place to exactly `wanted` mini sectors.
    pub fn resize_chain<R: Read + Seek>(
        &mut self,
        fat: &mut Fat,
        store: &mut SectorStore<R>,
        chain: &mut Vec<u32>,
        wanted: usize,
    ) -> Result<()> {
        while chain.len() < wanted {
            let sector = self.allocate_sector(fat, store)?;
            if let Some(&tail) = chain.last() {
                self.table.set(tail, sector);
            }
            chain.push(sector);
        }
        if wanted < chain.len() {
            self.table.release(&chain[wanted..]);
            chain.truncate(wanted);
            if let Some(&last) = chain.last() {
                self.table.set(last, ENDOFCHAIN);
            }
        }
        Ok(())
    }

    /// Claim one mini sector, growing the table and the mini stream as needed.
    pub fn allocate_sector<R: Read + Seek>(
        &mut self,
        fat: &mut Fat,
        store: &mut SectorStore<R>,
    ) -> Result<u32> {
        let limit = self.table.len() as u32;
        let sector = match self.table.find_free(limit) {
            Some(sector) => sector,
            None => {
                let first_new = self.table.len() as u32;
                let location = self.push_big_sector(fat, store, ChainKind::Table)?;
                self.table.extend_free(self.sector_size / 4);
                debug!(sector = location, "MiniFAT grown");
                first_new
            },
        };
        self.table.set(sector, ENDOFCHAIN);

        let needed = (u64::from(sector) + 1) * MINI_SECTOR_SIZE as u64;
        while ((self.stream_chain.len() * self.sector_size) as u64) < needed {
            let location = self.push_big_sector(fat, store, ChainKind::Stream)?;
            debug!(sector = location, "mini stream grown");
        }
        if needed > self.stream_len {
            self.stream_len = needed;
        }
        Ok(sector)
    }

    /// Read one mini sector into `buf` (64 bytes).
    pub fn read_sector_into<R: Read + Seek>(
        &self,
        store: &SectorStore<R>,
        sector: u32,
        buf: &mut [u8],
    ) -> Result<()> {
        let (big, offset) = self.locate(store, sector)?;
        store.read_at(big, offset, buf)
    }

    /// Overwrite one mini sector; `data` shorter than 64 bytes is zero-padded.
    pub fn write_sector<R: Read + Seek>(
        &self,
        store: &mut SectorStore<R>,
        sector: u32,
        data: &[u8],
    ) -> Result<()> {
        let (big, offset) = self.locate(store, sector)?;
        let mut block = [0u8; MINI_SECTOR_SIZE];
        block[..data.len()].copy_from_slice(data);
        store.write_at(big, offset, &block)?;
        Ok(())
    }

    /// Write the MiniFAT sectors into the store and update header fields.
    pub fn sync<R: Read + Seek>(
        &self,
        store: &mut SectorStore<R>,
        header: &mut Header,
    ) -> Result<()> {
        for (&location, data) in self
            .table_chain
            .iter()
            .zip(self.table.to_sectors(store.sector_size()))
        {
            store.write_sector(location, &data)?;
        }
        header.first_minifat_sector = self.table_chain.first().copied().unwrap_or(ENDOFCHAIN);
        header.num_minifat_sectors = self.table_chain.len() as u32;
        Ok(())
    }

    fn locate<R: Read + Seek>(&self, store: &SectorStore<R>, sector: u32) -> Result<(u32, usize)> {
        let position = u64::from(sector) * MINI_SECTOR_SIZE as u64;
        let index = (position / self.sector_size as u64) as usize;
        let big = self
            .stream_chain
            .get(index)
            .copied()
            .ok_or(OleError::OutOfBounds {
                sector,
                count: self.addressable(),
            })?;
        debug_assert!(big < store.sector_count());
        Ok((big, (position % self.sector_size as u64) as usize))
    }

    fn push_big_sector<R: Read + Seek>(
        &mut self,
        fat: &mut Fat,
        store: &mut SectorStore<R>,
        kind: ChainKind,
    ) -> Result<u32> {
        let chain = match kind {
            ChainKind::Table => &mut self.table_chain,
            ChainKind::Stream => &mut self.stream_chain,
        };
        fat.grow_chain(store, chain, 1)?;
        let location = chain.last().copied().unwrap_or(ENDOFCHAIN);
        if kind == ChainKind::Table {
            // a new table sector starts out all free
            let free = vec![0xFFu8; store.sector_size()];
            store.write_sector(location, &free)?;
        }
        Ok(location)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainKind {
    Table,
    Stream,
}
