//! In-place patching
//!
//! Writes the header (when it changed) and every dirty sector of the store
//! over the image the container was opened from. The sector count must
//! match that image; otherwise the caller has to fall back to a full
//! rewrite. The complete patch plan is materialized before the first byte
//! reaches the destination.

use super::super::consts::HEADER_SIZE;
use super::super::error::{OleError, Result};
use super::super::file::OleFile;
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::debug;

/// One contiguous write of the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Patch {
    /// Byte offset within the image
    pub offset: u64,
    /// Bytes to write
    pub data: Vec<u8>,
}

/// Normalize, sync and plan the writes for the current state.
///
/// Fails with [`OleError::LayoutChanged`] before anything is planned when
/// the sector count differs from the baseline image. Both normalization and
/// the table flush can allocate sectors, so the count is only known after
/// them and a failed plan keeps their effect.
pub(crate) fn plan<R: Read + Seek>(file: &mut OleFile<R>) -> Result<Vec<Patch>> {
    file.normalize_placement()?;
    file.sync_metadata()?;

    let actual = file.store.sector_count();
    if actual != file.baseline {
        return Err(OleError::LayoutChanged {
            expected: file.baseline,
            actual,
        });
    }

    let mut patches = Vec::new();
    let block = file.header.to_bytes();
    match &file.written_header {
        None => patches.push(Patch {
            offset: 0,
            data: block,
        }),
        Some(previous) if previous[..] != block[..HEADER_SIZE] => patches.push(Patch {
            offset: 0,
            data: block[..HEADER_SIZE].to_vec(),
        }),
        Some(_) => {},
    }

    let dirty: Vec<u32> = file.store.dirty_sectors().collect();
    for sector in dirty {
        patches.push(Patch {
            offset: file.store.sector_offset(sector),
            data: file.store.read_sector(sector)?,
        });
    }
    Ok(patches)
}

/// Apply the plan to `out` and mark the container clean.
pub(crate) fn write_in_place<R: Read + Seek, W: Write + Seek>(
    file: &mut OleFile<R>,
    out: &mut W,
) -> Result<()> {
    let patches = plan(file)?;

    for patch in &patches {
        out.seek(SeekFrom::Start(patch.offset))?;
        out.write_all(&patch.data)?;
    }
    out.flush()?;

    file.store.clear_dirty();
    let block = file.header.to_bytes();
    file.written_header = Some(block[..HEADER_SIZE].to_vec());

    debug!(
        writes = patches.len(),
        bytes = patches.iter().map(|p| p.data.len()).sum::<usize>(),
        "patched image in place"
    );
    Ok(())
}
