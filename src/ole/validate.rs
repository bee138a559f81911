//! Structural validation of a loaded container.
//!
//! Every big sector may belong to at most one of: the FAT, the DIFAT, the
//! directory, the MiniFAT, the mini stream or a big-block stream. Every mini
//! sector may belong to at most one mini stream. Stream chains must be long
//! enough for the size their entry declares.

use super::consts::*;
use super::directory::{DirectoryTree, EntryKind, Placement};
use super::error::{OleError, Result, TableKind};
use super::fat::Fat;
use super::minifat::MiniFat;
use fixedbitset::FixedBitSet;
use tracing::warn;

/// Structure or stream a sector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Fat,
    Difat,
    Directory,
    MiniFat,
    MiniStream,
    /// A stream, by directory SID
    Stream(u32),
}

impl Owner {
    fn describe(self, directory: &DirectoryTree) -> String {
        match self {
            Owner::Fat => "the FAT".to_string(),
            Owner::Difat => "the DIFAT".to_string(),
            Owner::Directory => "the directory".to_string(),
            Owner::MiniFat => "the MiniFAT".to_string(),
            Owner::MiniStream => "the mini stream".to_string(),
            Owner::Stream(sid) => directory.path_of(sid),
        }
    }
}

/// Records which sectors have been claimed and by whom.
#[derive(Debug)]
pub struct ChainLoopDetector<'d> {
    claimed: FixedBitSet,
    owners: Vec<(u32, Owner)>,
    directory: &'d DirectoryTree,
}

impl<'d> ChainLoopDetector<'d> {
    /// Detector for `sectors` addressable sectors; owner names are looked
    /// up in `directory` when a conflict is reported.
    pub fn new(sectors: usize, directory: &'d DirectoryTree) -> Self {
        Self {
            claimed: FixedBitSet::with_capacity(sectors),
            owners: Vec::new(),
            directory,
        }
    }

    /// Claim `sector` for `owner`, failing if someone already owns it.
    pub fn claim(&mut self, sector: u32, owner: Owner) -> Result<()> {
        if sector as usize >= self.claimed.len() {
            return Err(OleError::CorruptContainer(format!(
                "{} uses sector {sector} beyond the end of the file",
                owner.describe(self.directory)
            )));
        }
        if self.claimed.put(sector as usize) {
            let previous = self
                .owners
                .iter()
                .find(|(s, _)| *s == sector)
                .map(|&(_, o)| o.describe(self.directory))
                .unwrap_or_else(|| "another chain".to_string());
            return Err(OleError::CorruptContainer(format!(
                "sector {sector} is claimed by both {previous} and {}",
                owner.describe(self.directory)
            )));
        }
        self.owners.push((sector, owner));
        Ok(())
    }

    /// Claim every sector of a chain.
    pub fn claim_all(&mut self, sectors: &[u32], owner: Owner) -> Result<()> {
        sectors.iter().try_for_each(|&s| self.claim(s, owner))
    }
}

/// Sector units a stream of `size` bytes occupies in `unit`-sized blocks
#[inline]
pub fn units_for(size: u64, unit: usize) -> usize {
    size.div_ceil(unit as u64) as usize
}

/// Validate sector ownership and every chain of the container.
///
/// With `strict` off, problems confined to a single stream are logged and
/// left for the moment that stream is opened.
pub fn check_container(
    fat: &Fat,
    mini_fat: &MiniFat,
    directory: &DirectoryTree,
    dir_chain: &[u32],
    sector_count: u32,
    strict: bool,
) -> Result<()> {
    let mut big = ChainLoopDetector::new(sector_count as usize, directory);
    big.claim_all(fat.fat_sectors(), Owner::Fat)?;
    big.claim_all(fat.difat_sectors(), Owner::Difat)?;
    big.claim_all(dir_chain, Owner::Directory)?;
    big.claim_all(mini_fat.table_chain(), Owner::MiniFat)?;
    big.claim_all(mini_fat.stream_chain(), Owner::MiniStream)?;

    for &sector in fat.fat_sectors() {
        if fat.next(sector) != Some(FATSECT) {
            warn!(sector, "FAT sector is not marked FATSECT");
        }
    }

    let mut mini = ChainLoopDetector::new(mini_fat.addressable() as usize, directory);
    let sector_size = fat.sector_size();

    for entry in directory.entries() {
        let EntryKind::Stream {
            start,
            size,
            placement,
        } = entry.kind
        else {
            continue;
        };
        if size == 0 {
            continue;
        }
        let path = directory.path_of(entry.sid);

        let outcome = match placement {
            Placement::Mini => stream_chain(mini_fat.chain_for(start), size, MINI_SECTOR_SIZE, &path)
                .and_then(|chain| mini.claim_all(&chain, Owner::Stream(entry.sid))),
            Placement::Big => {
                stream_chain(fat.chain_for(start, sector_count), size, sector_size, &path)
                    .and_then(|chain| big.claim_all(&chain, Owner::Stream(entry.sid)))
            },
        };

        if let Err(err) = outcome {
            if strict {
                return Err(err);
            }
            warn!(stream = %path, error = %err, "damaged stream left for open time");
        }
    }
    Ok(())
}

/// Check a walked chain against the stream size it must hold.
pub(crate) fn stream_chain(
    chain: Result<Vec<u32>>,
    size: u64,
    unit: usize,
    path: &str,
) -> Result<Vec<u32>> {
    let chain = chain.map_err(|e| e.with_entry(path))?;
    let needed = units_for(size, unit);
    if chain.len() < needed {
        return Err(OleError::CorruptChain {
            table: if unit == MINI_SECTOR_SIZE {
                TableKind::MiniFat
            } else {
                TableKind::Fat
            },
            start: chain.first().copied().unwrap_or(ENDOFCHAIN),
            sector: chain.last().copied().unwrap_or(ENDOFCHAIN),
            detail: format!(
                "chain ends after {} sectors but {size} bytes need {needed}",
                chain.len()
            ),
            entry: Some(path.to_string()),
        });
    }
    if chain.len() > needed {
        warn!(
            stream = path,
            sectors = chain.len(),
            needed,
            "chain is longer than the stream size requires"
        );
    }
    Ok(chain)
}
