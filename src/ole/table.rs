//! Chain table shared by the FAT and the MiniFAT.
//!
//! Both tables are arrays of little-endian `u32` slots where each slot holds
//! the successor of that sector in its chain, or a sentinel. The managers in
//! [`fat`](super::fat) and [`minifat`](super::minifat) decide where sectors
//! come from; this type only knows how to walk, link and release chains.

use super::consts::*;
use super::error::{OleError, Result, TableKind};
use crate::common::binary::read_u32_le;
use fixedbitset::FixedBitSet;

/// In-memory allocation table.
#[derive(Debug, Clone)]
pub struct SectorTable {
    kind: TableKind,
    entries: Vec<u32>,
    /// No free slot exists below this index
    free_hint: usize,
}

impl SectorTable {
    /// Create an empty table.
    pub fn new(kind: TableKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
            free_hint: 0,
        }
    }

    /// Parse table sectors (concatenated) into a table.
    pub fn from_bytes(kind: TableKind, data: &[u8]) -> Result<Self> {
        let mut entries = Vec::with_capacity(data.len() / 4);
        for offset in (0..data.len() / 4 * 4).step_by(4) {
            entries.push(read_u32_le(data, offset)?);
        }
        Ok(Self {
            kind,
            entries,
            free_hint: 0,
        })
    }

    /// Which table this is
    #[inline]
    pub fn kind(&self) -> TableKind {
        self.kind
    }

    /// Number of slots
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no slots
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All slots
    #[inline]
    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    /// Value stored for `sector`, if the table covers it
    #[inline]
    pub fn get(&self, sector: u32) -> Option<u32> {
        self.entries.get(sector as usize).copied()
    }

    /// Store `value` for `sector`. The table must already cover the slot.
    pub fn set(&mut self, sector: u32, value: u32) {
        let index = sector as usize;
        debug_assert!(index < self.entries.len());
        if let Some(slot) = self.entries.get_mut(index) {
            *slot = value;
            if value == FREESECT && index < self.free_hint {
                self.free_hint = index;
            }
        }
    }

    /// Append `count` free slots.
    pub fn extend_free(&mut self, count: usize) {
        self.entries.resize(self.entries.len() + count, FREESECT);
    }

    /// First free slot below `limit`, lowest index first.
    pub fn find_free(&mut self, limit: u32) -> Option<u32> {
        let end = self.entries.len().min(limit as usize);
        let start = self.free_hint.min(end);
        match self.entries[start..end].iter().position(|&v| v == FREESECT) {
            Some(pos) => {
                self.free_hint = start + pos;
                Some((start + pos) as u32)
            },
            None => {
                self.free_hint = end;
                None
            },
        }
    }

    /// Number of free slots below `limit`
    pub fn count_free(&self, limit: u32) -> usize {
        let end = self.entries.len().min(limit as usize);
        self.entries[..end].iter().filter(|&&v| v == FREESECT).count()
    }

    /// Walk a chain from `start` until `ENDOFCHAIN`.
    ///
    /// `limit` is the number of addressable sectors; any successor at or
    /// beyond it, a slot revisited, or a sentinel other than `ENDOFCHAIN`
    /// inside the chain is reported as [`OleError::CorruptChain`].
    /// A start of `ENDOFCHAIN` is the empty chain.
    pub fn chain(&self, start: u32, limit: u32) -> Result<Vec<u32>> {
        let mut chain = Vec::new();
        if start == ENDOFCHAIN {
            return Ok(chain);
        }

        let bound = limit.min(self.entries.len() as u32);
        let mut visited = FixedBitSet::with_capacity(bound as usize);
        let mut current = start;
        loop {
            if current >= bound {
                let detail = if current > MAXREGSECT {
                    format!("expected a sector index, found {}", describe_sector(current))
                } else {
                    format!("successor out of range (limit {bound})")
                };
                return Err(self.corrupt(start, current, detail));
            }
            if visited.put(current as usize) {
                return Err(self.corrupt(start, current, "cycle detected".to_string()));
            }
            chain.push(current);

            let next = self.entries[current as usize];
            if next == ENDOFCHAIN {
                return Ok(chain);
            }
            if next > MAXREGSECT {
                return Err(self.corrupt(
                    start,
                    current,
                    format!(
                        "expected a successor or ENDOFCHAIN, found {}",
                        describe_sector(next)
                    ),
                ));
            }
            current = next;
        }
    }

    /// Link `sectors` into one chain terminated by `ENDOFCHAIN`.
    pub fn link(&mut self, sectors: &[u32]) {
        for pair in sectors.windows(2) {
            self.set(pair[0], pair[1]);
        }
        if let Some(&last) = sectors.last() {
            self.set(last, ENDOFCHAIN);
        }
    }

    /// Mark every sector of `sectors` free.
    pub fn release(&mut self, sectors: &[u32]) {
        for &sector in sectors {
            self.set(sector, FREESECT);
        }
    }

    /// Free the whole chain starting at `start`.
    pub fn free_chain(&mut self, start: u32, limit: u32) -> Result<()> {
        let chain = self.chain(start, limit)?;
        self.release(&chain);
        Ok(())
    }

    /// Keep the first `keep` sectors of the chain and free the rest.
    ///
    /// Returns the (possibly new) start: `ENDOFCHAIN` when nothing is kept.
    pub fn truncate(&mut self, start: u32, keep: usize, limit: u32) -> Result<u32> {
        let chain = self.chain(start, limit)?;
        if keep >= chain.len() {
            return Ok(start);
        }
        self.release(&chain[keep..]);
        if keep == 0 {
            return Ok(ENDOFCHAIN);
        }
        self.set(chain[keep - 1], ENDOFCHAIN);
        Ok(start)
    }

    /// Serialize into table sectors, padding the last one with `FREESECT`.
    pub fn to_sectors(&self, sector_size: usize) -> Vec<Vec<u8>> {
        let per_sector = sector_size / 4;
        self.entries
            .chunks(per_sector)
            .map(|chunk| {
                let mut sector = vec![0xFFu8; sector_size];
                for (i, value) in chunk.iter().enumerate() {
                    sector[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
                }
                sector
            })
            .collect()
    }

    fn corrupt(&self, start: u32, sector: u32, detail: String) -> OleError {
        OleError::CorruptChain {
            table: self.kind,
            start,
            sector,
            detail,
            entry: None,
        }
    }
}
