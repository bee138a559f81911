//! DIFAT (Double Indirect FAT) handling
//!
//! The header holds the first 109 FAT sector locations. Any further FAT
//! sectors are listed in a chain of DIFAT sectors: each one carries
//! `sector_size / 4 - 1` locations followed by the index of the next DIFAT
//! sector (`ENDOFCHAIN` for the last one). Unused slots hold `FREESECT`.

use super::consts::*;
use super::error::{OleError, Result};
use super::header::Header;
use super::store::SectorStore;
use crate::common::binary::read_u32_le;
use fixedbitset::FixedBitSet;
use std::io::{Read, Seek};

/// FAT sector locations a single DIFAT sector can carry
#[inline]
pub fn entries_per_difat_sector(sector_size: usize) -> usize {
    sector_size / 4 - 1
}

/// Number of DIFAT sectors needed to list `fat_sectors` FAT sectors
pub fn difat_sectors_needed(fat_sectors: usize, sector_size: usize) -> usize {
    fat_sectors
        .saturating_sub(HEADER_DIFAT_ENTRIES)
        .div_ceil(entries_per_difat_sector(sector_size))
}

/// FAT and DIFAT sector locations recovered from the header and the DIFAT chain.
#[derive(Debug, Clone, Default)]
pub struct DifatLocations {
    /// FAT sector locations, in table order
    pub fat_sectors: Vec<u32>,
    /// DIFAT sector locations, in chain order
    pub difat_sectors: Vec<u32>,
}

/// Collect FAT sector locations from the header and the DIFAT chain.
pub fn read_locations<R: Read + Seek>(
    header: &Header,
    store: &SectorStore<R>,
) -> Result<DifatLocations> {
    let total = header.num_fat_sectors as usize;
    let count = store.sector_count();
    // Every FAT and DIFAT sector has to lie inside the file
    if header.num_fat_sectors > count || header.num_difat_sectors > count {
        return Err(OleError::CorruptContainer(format!(
            "header declares {} FAT and {} DIFAT sectors but the file has {count} sectors",
            header.num_fat_sectors, header.num_difat_sectors
        )));
    }
    let mut locations = DifatLocations {
        fat_sectors: Vec::with_capacity(total),
        difat_sectors: Vec::with_capacity(header.num_difat_sectors as usize),
    };

    for &sector in header.difat.iter().take(total.min(HEADER_DIFAT_ENTRIES)) {
        locations.fat_sectors.push(sector);
    }

    let per_sector = entries_per_difat_sector(store.sector_size());
    let mut visited = FixedBitSet::with_capacity(count as usize);
    let mut next = header.first_difat_sector;
    let mut buf = vec![0u8; store.sector_size()];

    for _ in 0..header.num_difat_sectors {
        if locations.fat_sectors.len() >= total {
            break;
        }
        if next >= count {
            return Err(OleError::CorruptContainer(format!(
                "DIFAT chain points to {} but the file has {count} sectors",
                describe_sector(next)
            )));
        }
        if visited.put(next as usize) {
            return Err(OleError::CorruptContainer(format!(
                "DIFAT chain loops back to sector {next}"
            )));
        }
        locations.difat_sectors.push(next);
        store.read_sector_into(next, &mut buf)?;

        for i in 0..per_sector {
            if locations.fat_sectors.len() >= total {
                break;
            }
            locations.fat_sectors.push(read_u32_le(&buf, i * 4)?);
        }
        next = read_u32_le(&buf, per_sector * 4)?;
    }

    if locations.fat_sectors.len() < total {
        return Err(OleError::CorruptContainer(format!(
            "header declares {total} FAT sectors but the DIFAT lists only {}",
            locations.fat_sectors.len()
        )));
    }

    if let Some(&bad) = locations.fat_sectors.iter().find(|&&s| s >= count) {
        return Err(OleError::CorruptContainer(format!(
            "FAT sector location {} is outside the file ({count} sectors)",
            describe_sector(bad)
        )));
    }

    Ok(locations)
}

/// Encode the DIFAT sectors for `fat_sectors` stored at `difat_sectors`.
///
/// `difat_sectors` must hold exactly
/// [`difat_sectors_needed`] locations; they are chained in order.
pub fn encode_sectors(fat_sectors: &[u32], difat_sectors: &[u32], sector_size: usize) -> Vec<Vec<u8>> {
    let per_sector = entries_per_difat_sector(sector_size);
    let overflow = fat_sectors.get(HEADER_DIFAT_ENTRIES..).unwrap_or(&[]);

    difat_sectors
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let mut sector = vec![0xFFu8; sector_size];
            let ids = overflow.chunks(per_sector).nth(i).unwrap_or(&[]);
            for (slot, id) in ids.iter().enumerate() {
                sector[slot * 4..slot * 4 + 4].copy_from_slice(&id.to_le_bytes());
            }
            let next = difat_sectors.get(i + 1).copied().unwrap_or(ENDOFCHAIN);
            sector[sector_size - 4..].copy_from_slice(&next.to_le_bytes());
            sector
        })
        .collect()
}

/// Update the header's DIFAT fields for the given locations.
pub fn apply_to_header(header: &mut Header, fat_sectors: &[u32], difat_sectors: &[u32]) {
    header.set_fat_sectors(fat_sectors);
    header.num_difat_sectors = difat_sectors.len() as u32;
    header.first_difat_sector = difat_sectors.first().copied().unwrap_or(ENDOFCHAIN);
}
