//! Full-rewrite serialization
//!
//! Produces a complete, compact image from the in-memory container. Live
//! directory entries are renumbered in ascending SID order (the root stays
//! at 0) and every sibling tree keeps its shape. Streams below the cutoff go
//! into the mini stream, the others get contiguous chains.
//!
//! Sector order: FAT, DIFAT, directory, MiniFAT, mini stream, big streams.

use super::super::consts::*;
use super::super::difat;
use super::super::directory::{DirectoryEntry, EntryKind, Placement};
use super::super::error::{OleError, Result};
use super::super::file::OleFile;
use super::super::header::Header;
use super::super::validate::units_for;
use std::io::{Read, Seek};
use tracing::debug;

/// Contiguous sector allocator over a FAT being built.
struct Allocator {
    fat: Vec<u32>,
    next: u32,
}

impl Allocator {
    /// Reserve `count` consecutive sectors marked `marker`.
    fn reserve(&mut self, count: usize, marker: u32) -> Vec<u32> {
        let sectors: Vec<u32> = (self.next..self.next + count as u32).collect();
        for &sector in &sectors {
            self.fat[sector as usize] = marker;
        }
        self.next += count as u32;
        sectors
    }

    /// Reserve and link a chain of `count` sectors; returns its start.
    fn chain(&mut self, count: usize) -> u32 {
        if count == 0 {
            return ENDOFCHAIN;
        }
        let start = self.next;
        for i in 0..count as u32 {
            self.fat[(start + i) as usize] = if i + 1 == count as u32 {
                ENDOFCHAIN
            } else {
                start + i + 1
            };
        }
        self.next += count as u32;
        start
    }
}

/// Number of FAT and DIFAT sectors needed to cover `data_sectors` more.
///
/// Iterates to a fixpoint because FAT and DIFAT sectors are themselves
/// covered by the FAT.
pub(crate) fn fat_geometry(data_sectors: usize, sector_size: usize) -> (usize, usize) {
    let per_fat = sector_size / 4;
    let mut fat = 0usize;
    loop {
        let difat = difat::difat_sectors_needed(fat, sector_size);
        if fat * per_fat >= data_sectors + fat + difat {
            return (fat, difat);
        }
        fat += 1;
    }
}

/// Serialize the container into a complete image.
pub(crate) fn build_image<R: Read + Seek>(file: &OleFile<R>) -> Result<Vec<u8>> {
    let sector_size = file.sector_size();
    let entries = file.directory.entries();

    // Renumber live entries
    let live: Vec<u32> = entries
        .iter()
        .filter(|e| !e.is_empty())
        .map(|e| e.sid)
        .collect();
    if live.first() != Some(&0) {
        return Err(OleError::CorruptContainer(
            "directory has no root entry".to_string(),
        ));
    }
    let mut new_sid = vec![NOSTREAM; entries.len()];
    for (index, &sid) in live.iter().enumerate() {
        new_sid[sid as usize] = index as u32;
    }
    let remap = |sid: u32| new_sid.get(sid as usize).copied().unwrap_or(NOSTREAM);

    let mut records: Vec<DirectoryEntry> = live
        .iter()
        .map(|&sid| {
            let mut record = entries[sid as usize].clone();
            record.sid = remap(sid);
            record.left = remap(record.left);
            record.right = remap(record.right);
            record.child = remap(record.child);
            record.parent = remap(record.parent);
            record.tree_parent = remap(record.tree_parent);
            record
        })
        .collect();

    // Pack small streams into the mini stream, queue the rest
    let cutoff = u64::from(MINI_STREAM_CUTOFF);
    let mut mini_table: Vec<u32> = Vec::new();
    let mut mini_stream: Vec<u8> = Vec::new();
    let mut big_streams: Vec<(usize, Vec<u8>)> = Vec::new();

    for (index, &old_sid) in live.iter().enumerate() {
        let EntryKind::Stream { size, .. } = records[index].kind else {
            continue;
        };
        let data = file.read_stream_data(old_sid)?;

        if size == 0 {
            records[index].kind = EntryKind::Stream {
                start: ENDOFCHAIN,
                size: 0,
                placement: Placement::Mini,
            };
        } else if size < cutoff {
            let first = mini_table.len() as u32;
            let count = units_for(size, MINI_SECTOR_SIZE) as u32;
            for i in 0..count {
                mini_table.push(if i + 1 == count {
                    ENDOFCHAIN
                } else {
                    first + i + 1
                });
            }
            mini_stream.extend_from_slice(&data);
            mini_stream.resize(mini_table.len() * MINI_SECTOR_SIZE, 0);
            records[index].kind = EntryKind::Stream {
                start: first,
                size,
                placement: Placement::Mini,
            };
        } else {
            big_streams.push((index, data));
        }
    }

    let dir_sectors = (records.len() * DIRENTRY_SIZE).div_ceil(sector_size);
    let minifat_sectors = (mini_table.len() * 4).div_ceil(sector_size);
    let mini_stream_sectors = mini_stream.len().div_ceil(sector_size);
    let big_sectors: usize = big_streams
        .iter()
        .map(|(_, data)| data.len().div_ceil(sector_size))
        .sum();
    let data_sectors = dir_sectors + minifat_sectors + mini_stream_sectors + big_sectors;
    let (fat_count, difat_count) = fat_geometry(data_sectors, sector_size);
    let total = data_sectors + fat_count + difat_count;

    let mut alloc = Allocator {
        fat: vec![FREESECT; fat_count * (sector_size / 4)],
        next: 0,
    };
    let fat_sectors = alloc.reserve(fat_count, FATSECT);
    let difat_sectors = alloc.reserve(difat_count, DIFSECT);
    let dir_start = alloc.chain(dir_sectors);
    let minifat_start = alloc.chain(minifat_sectors);
    let mini_stream_start = alloc.chain(mini_stream_sectors);
    for (index, data) in &big_streams {
        let start = alloc.chain(data.len().div_ceil(sector_size));
        records[*index].kind = EntryKind::Stream {
            start,
            size: data.len() as u64,
            placement: Placement::Big,
        };
    }
    debug_assert_eq!(alloc.next as usize, total);

    records[0].kind = EntryKind::Root {
        start: mini_stream_start,
        size: mini_stream.len() as u64,
    };

    let mut header = Header::new(file.header.version);
    header.clsid = file.header.clsid;
    header.minor_version = file.header.minor_version;
    header.transaction_signature = file.header.transaction_signature;
    header.first_dir_sector = dir_start;
    header.num_dir_sectors = dir_sectors as u32;
    header.first_minifat_sector = minifat_start;
    header.num_minifat_sectors = minifat_sectors as u32;
    difat::apply_to_header(&mut header, &fat_sectors, &difat_sectors);

    let mut image = Vec::with_capacity((total + 1) * sector_size);
    image.extend_from_slice(&header.to_bytes());

    for value in &alloc.fat {
        image.extend_from_slice(&value.to_le_bytes());
    }
    for sector in difat::encode_sectors(&fat_sectors, &difat_sectors, sector_size) {
        image.extend_from_slice(&sector);
    }

    let directory_end = image.len() + dir_sectors * sector_size;
    for record in &records {
        image.extend_from_slice(&record.to_bytes());
    }
    let unused = DirectoryEntry::empty(0).to_bytes();
    while image.len() < directory_end {
        image.extend_from_slice(&unused);
    }

    let minifat_end = image.len() + minifat_sectors * sector_size;
    for value in &mini_table {
        image.extend_from_slice(&value.to_le_bytes());
    }
    image.resize(minifat_end, 0xFF);

    let mini_stream_end = image.len() + mini_stream_sectors * sector_size;
    image.extend_from_slice(&mini_stream);
    image.resize(mini_stream_end, 0);

    for (_, data) in &big_streams {
        let end = image.len() + data.len().div_ceil(sector_size) * sector_size;
        image.extend_from_slice(data);
        image.resize(end, 0);
    }
    debug_assert_eq!(image.len(), (total + 1) * sector_size);

    debug!(
        sectors = total,
        entries = records.len(),
        mini_sectors = mini_table.len(),
        big_streams = big_streams.len(),
        "serialized full image"
    );
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fat_geometry_small() {
        // 1 directory sector needs a single FAT sector
        assert_eq!(fat_geometry(1, 512), (1, 0));
        // 127 data sectors plus the FAT sector itself fill 128 slots
        assert_eq!(fat_geometry(127, 512), (1, 0));
        assert_eq!(fat_geometry(128, 512), (2, 0));
    }

    #[test]
    fn test_fat_geometry_needs_difat() {
        // 109 FAT sectors cover 109 * 128 slots
        let (fat, difat) = fat_geometry(109 * 128, 512);
        assert!(fat > 109);
        assert_eq!(difat, 1);
        assert!(fat * 128 >= 109 * 128 + fat + difat);
    }

    #[test]
    fn test_v4_geometry() {
        assert_eq!(fat_geometry(1, 4096), (1, 0));
        assert_eq!(fat_geometry(1023, 4096), (1, 0));
        assert_eq!(fat_geometry(1024, 4096), (2, 0));
    }
}
