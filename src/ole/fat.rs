//! FAT (File Allocation Table) manager
//!
//! Owns the big-block chain table together with the locations of the FAT
//! and DIFAT sectors that store it. Allocation is first-fit over free slots
//! of the existing table; when none remain inside the addressable area the
//! file grows by one sector at the end, and when the table itself is full a
//! new FAT sector is appended (plus a DIFAT sector once more than 109 FAT
//! sectors exist).
//!
//! Invariant: the table always covers every addressable sector of the store.

use super::consts::*;
use super::difat::{self, DifatLocations};
use super::error::{Result, TableKind};
use super::header::Header;
use super::store::SectorStore;
use super::table::SectorTable;
use std::io::{Read, Seek};
use tracing::debug;

/// Big-block allocation table.
#[derive(Debug, Clone)]
pub struct Fat {
    table: SectorTable,
    /// Sectors storing the table, in table order
    fat_sectors: Vec<u32>,
    /// Sectors storing FAT locations beyond the header's 109
    difat_sectors: Vec<u32>,
    entries_per_sector: usize,
}

impl Fat {
    /// Create an empty table (no FAT sectors yet).
    pub fn new(sector_size: usize) -> Self {
        Self {
            table: SectorTable::new(TableKind::Fat),
            fat_sectors: Vec::new(),
            difat_sectors: Vec::new(),
            entries_per_sector: sector_size / 4,
        }
    }

    /// Load the FAT described by `header`.
    ///
    /// Sectors of the medium beyond what the table covers are dropped from
    /// the store so that the coverage invariant holds.
    pub fn load<R: Read + Seek>(header: &Header, store: &mut SectorStore<R>) -> Result<Self> {
        let DifatLocations {
            fat_sectors,
            difat_sectors,
        } = difat::read_locations(header, store)?;

        let sector_size = store.sector_size();
        let mut data = Vec::with_capacity(fat_sectors.len() * sector_size);
        let mut buf = vec![0u8; sector_size];
        for &sector in &fat_sectors {
            store.read_sector_into(sector, &mut buf)?;
            data.extend_from_slice(&buf);
        }
        let table = SectorTable::from_bytes(TableKind::Fat, &data)?;

        if (store.sector_count() as usize) > table.len() {
            debug!(
                sectors = store.sector_count(),
                covered = table.len(),
                "ignoring trailing sectors not covered by the FAT"
            );
            store.truncate(table.len() as u32);
        }

        Ok(Self {
            table,
            fat_sectors,
            difat_sectors,
            entries_per_sector: sector_size / 4,
        })
    }

    /// The raw table
    #[inline]
    pub fn table(&self) -> &SectorTable {
        &self.table
    }

    /// Successor of `sector`, if covered
    #[inline]
    pub fn next(&self, sector: u32) -> Option<u32> {
        self.table.get(sector)
    }

    /// Sector size the table was built for
    #[inline]
    pub fn sector_size(&self) -> usize {
        self.entries_per_sector * 4
    }

    /// Sectors that hold the FAT
    #[inline]
    pub fn fat_sectors(&self) -> &[u32] {
        &self.fat_sectors
    }

    /// Sectors that hold the DIFAT chain
    #[inline]
    pub fn difat_sectors(&self) -> &[u32] {
        &self.difat_sectors
    }

    /// Walk the chain starting at `start`. `limit` is the store's sector count.
    pub fn chain_for(&self, start: u32, limit: u32) -> Result<Vec<u32>> {
        self.table.chain(start, limit)
    }

    /// Claim one sector and terminate it with `ENDOFCHAIN`.
    pub fn allocate_sector<R: Read + Seek>(&mut self, store: &mut SectorStore<R>) -> Result<u32> {
        self.claim(store, ENDOFCHAIN)
    }

    /// Allocate a fresh chain of `count` sectors and return its start.
    ///
    /// A count of zero yields `ENDOFCHAIN`.
    pub fn allocate_chain<R: Read + Seek>(
        &mut self,
        store: &mut SectorStore<R>,
        count: usize,
    ) -> Result<u32> {
        let mut chain = Vec::with_capacity(count);
        self.grow_chain(store, &mut chain, count)?;
        Ok(chain.first().copied().unwrap_or(ENDOFCHAIN))
    }

    /// Append `additional` sectors to the chain starting at `start`.
    ///
    /// Returns the chain start, which is new when `start` was `ENDOFCHAIN`.
    pub fn extend_chain<R: Read + Seek>(
        &mut self,
        store: &mut SectorStore<R>,
        start: u32,
        additional: usize,
    ) -> Result<u32> {
        let mut chain = self.table.chain(start, store.sector_count())?;
        self.grow_chain(store, &mut chain, additional)?;
        Ok(chain.first().copied().unwrap_or(ENDOFCHAIN))
    }

    /// Keep the first `keep` sectors of the chain and free the rest.
    pub fn truncate_chain(&mut self, start: u32, keep: usize, limit: u32) -> Result<u32> {
        self.table.truncate(start, keep, limit)
    }

    /// Mark every sector in the chain free.
    pub fn free_chain(&mut self, start: u32, limit: u32) -> Result<()> {
        self.table.free_chain(start, limit)
    }

    /// Mark the given sectors free.
    pub fn release(&mut self, sectors: &[u32]) {
        self.table.release(sectors);
    }

    /// Grow or shrink `chain` in place to exactly `wanted` sectors.
    pub fn resize_chain<R: Read + Seek>(
        &mut self,
        store: &mut SectorStore<R>,
        chain: &mut Vec<u32>,
        wanted: usize,
    ) -> Result<()> {
        if wanted > chain.len() {
            let extra = wanted - chain.len();
            self.grow_chain(store, chain, extra)?;
        } else if wanted < chain.len() {
            self.table.release(&chain[wanted..]);
            chain.truncate(wanted);
            if let Some(&last) = chain.last() {
                self.table.set(last, ENDOFCHAIN);
            }
        }
        Ok(())
    }

    /// Allocate `additional` sectors and link them after the tail of `chain`.
    pub fn grow_chain<R: Read + Seek>(
        &mut self,
        store: &mut SectorStore<R>,
        chain: &mut Vec<u32>,
        additional: usize,
    ) -> Result<()> {
        for _ in 0..additional {
            let sector = self.allocate_sector(store)?;
            if let Some(&tail) = chain.last() {
                self.table.set(tail, sector);
            }
            chain.push(sector);
        }
        Ok(())
    }

    /// Number of free slots inside the addressable area
    pub fn free_sectors(&self, limit: u32) -> usize {
        self.table.count_free(limit)
    }

    /// Write the FAT and DIFAT sectors into the store and update the header.
    pub fn sync<R: Read + Seek>(
        &self,
        store: &mut SectorStore<R>,
        header: &mut Header,
    ) -> Result<()> {
        let sector_size = store.sector_size();
        for (&location, data) in self
            .fat_sectors
            .iter()
            .zip(self.table.to_sectors(sector_size))
        {
            store.write_sector(location, &data)?;
        }

        let encoded = difat::encode_sectors(&self.fat_sectors, &self.difat_sectors, sector_size);
        for (&location, data) in self.difat_sectors.iter().zip(encoded) {
            store.write_sector(location, &data)?;
        }

        difat::apply_to_header(header, &self.fat_sectors, &self.difat_sectors);
        Ok(())
    }

    /// Claim one slot and mark it with `marker`, growing the file if needed.
    fn claim<R: Read + Seek>(&mut self, store: &mut SectorStore<R>, marker: u32) -> Result<u32> {
        loop {
            if let Some(sector) = self.table.find_free(store.sector_count()) {
                self.table.set(sector, marker);
                return Ok(sector);
            }
            if (store.sector_count() as usize) < self.table.len() {
                let sector = store.append_zeroed()?;
                self.table.set(sector, marker);
                return Ok(sector);
            }
            self.add_fat_sector(store)?;
        }
    }

    /// Append one FAT sector at the end of the file, extending the table by
    /// one sector's worth of free slots.
    fn add_fat_sector<R: Read + Seek>(&mut self, store: &mut SectorStore<R>) -> Result<()> {
        let sector = store.append_zeroed()?;
        self.table.extend_free(self.entries_per_sector);
        self.table.set(sector, FATSECT);
        self.fat_sectors.push(sector);
        debug!(sector, fat_sectors = self.fat_sectors.len(), "FAT grown");

        let needed = difat::difat_sectors_needed(self.fat_sectors.len(), store.sector_size());
        while self.difat_sectors.len() < needed {
            let location = self.claim(store, DIFSECT)?;
            self.difat_sectors.push(location);
            debug!(sector = location, "DIFAT grown");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn empty_store(sector_size: usize) -> SectorStore<Cursor<Vec<u8>>> {
        SectorStore::new(Cursor::new(Vec::new()), 0, sector_size)
    }

    #[test]
    fn test_first_allocation_creates_fat_sector() {
        let mut store = empty_store(512);
        let mut fat = Fat::new(512);

        let start = fat.allocate_chain(&mut store, 3).unwrap();
        assert_eq!(fat.fat_sectors(), &[0]);
        assert_eq!(fat.next(0), Some(FATSECT));
        assert_eq!(start, 1);
        assert_eq!(fat.chain_for(start, store.sector_count()).unwrap(), vec![1, 2, 3]);
        assert_eq!(store.sector_count(), 4);
    }

    #[test]
    fn test_allocation_reuses_free_sectors() {
        let mut store = empty_store(512);
        let mut fat = Fat::new(512);

        let a = fat.allocate_chain(&mut store, 4).unwrap();
        let b = fat.allocate_chain(&mut store, 2).unwrap();
        let count = store.sector_count();

        fat.free_chain(a, count).unwrap();
        let c = fat.allocate_chain(&mut store, 3).unwrap();

        assert_eq!(c, a);
        assert_eq!(store.sector_count(), count);
        assert_eq!(fat.chain_for(b, count).unwrap(), vec![5, 6]);
    }

    #[test]
    fn test_extend_and_truncate() {
        let mut store = empty_store(512);
        let mut fat = Fat::new(512);

        let start = fat.allocate_chain(&mut store, 1).unwrap();
        let other = fat.allocate_chain(&mut store, 1).unwrap();
        let start = fat.extend_chain(&mut store, start, 2).unwrap();
        let count = store.sector_count();
        assert_eq!(fat.chain_for(start, count).unwrap(), vec![start, 3, 4]);

        let start = fat.truncate_chain(start, 1, count).unwrap();
        assert_eq!(fat.chain_for(start, count).unwrap(), vec![start]);
        assert_eq!(fat.free_sectors(count), 2);
        assert_eq!(fat.chain_for(other, count).unwrap(), vec![other]);

        assert_eq!(fat.extend_chain(&mut store, ENDOFCHAIN, 0).unwrap(), ENDOFCHAIN);
    }

    #[test]
    fn test_difat_sector_added_past_109_fat_sectors() {
        let mut store = empty_store(512);
        let mut fat = Fat::new(512);

        // 127 data slots per FAT sector; 110 FAT sectors need a DIFAT sector
        let data_sectors = 127 * 110;
        fat.allocate_chain(&mut store, data_sectors).unwrap();

        assert!(fat.fat_sectors().len() >= 110);
        assert_eq!(fat.difat_sectors().len(), 1);
        let difat = fat.difat_sectors()[0];
        assert_eq!(fat.next(difat), Some(DIFSECT));
        assert!(fat.table().len() >= store.sector_count() as usize);

        let mut header = Header::new(crate::ole::config::Version::V3);
        fat.sync(&mut store, &mut header).unwrap();
        assert_eq!(header.num_difat_sectors, 1);
        assert_eq!(header.first_difat_sector, difat);
        assert_eq!(header.num_fat_sectors as usize, fat.fat_sectors().len());

        let reloaded = Fat::load(&header, &mut store).unwrap();
        assert_eq!(reloaded.fat_sectors(), fat.fat_sectors());
        assert_eq!(reloaded.table().entries(), fat.table().entries());
    }
}
