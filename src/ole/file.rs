//! Compound file container: open, navigate, edit and persist.
//!
//! All metadata (header, DIFAT, FAT, MiniFAT and directory) is parsed and
//! validated eagerly by [`OleFile::open`]; stream payloads are read lazily
//! through the sector store. Edits go to the store's overlay and the
//! in-memory tables, and reach a medium only through
//! [`OleFile::write_to`] (full rewrite) or [`OleFile::write_in_place`]
//! (dirty-sector patch).

use super::config::{OleOptions, Version};
use super::consts::*;
use super::directory::{
    Clsid, DirectoryEntry, DirectoryTree, EntryKind, EntryType, Placement, Walk,
    datetime_to_filetime,
};
use super::error::{OleError, Result};
use super::fat::Fat;
use super::header::Header;
use super::minifat::MiniFat;
use super::store::SectorStore;
use super::stream::{StreamReader, StreamWriter};
use super::validate::{self, units_for};
use super::writer;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// One child of a storage, as returned by [`OleFile::list_entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Entry name
    pub name: String,
    /// Storage or stream
    pub entry_type: EntryType,
    /// Stream length in bytes (0 for storages)
    pub size: u64,
}

/// OLE2 structured storage container.
///
/// `R` is the medium the container was opened from. It is only ever read;
/// modifications live in memory until they are written out.
///
/// # Examples
///
/// ```rust
/// use olecf::OleFile;
/// use std::io::Cursor;
///
/// let mut ole = OleFile::create_empty()?;
/// ole.create_storage("Objects")?;
/// ole.write_stream("Objects/Contents", b"Hello, World!")?;
///
/// let mut image = Vec::new();
/// ole.write_to(&mut image)?;
///
/// let reopened = OleFile::open(Cursor::new(image))?;
/// assert_eq!(reopened.read_stream("Objects/Contents")?, b"Hello, World!");
/// # Ok::<(), olecf::OleError>(())
/// ```
#[derive(Debug)]
pub struct OleFile<R: Read + Seek> {
    pub(crate) store: SectorStore<R>,
    pub(crate) header: Header,
    /// Header record as it stands on the medium, `None` for a new container
    pub(crate) written_header: Option<Vec<u8>>,
    pub(crate) fat: Fat,
    pub(crate) mini_fat: MiniFat,
    pub(crate) directory: DirectoryTree,
    pub(crate) dir_chain: Vec<u32>,
    pub(crate) options: OleOptions,
    /// Sector count of the image that `write_in_place` patches
    pub(crate) baseline: u32,
}

impl<R: Read + Seek> OleFile<R> {
    /// Open and parse an OLE file from a reader with strict validation.
    ///
    /// # Arguments
    /// * `reader` - A reader that implements Read + Seek
    ///
    /// # Returns
    /// * `Result<OleFile<R>>` - The parsed container or an error
    pub fn open(reader: R) -> Result<Self> {
        Self::open_with(reader, OleOptions::default())
    }

    /// Open and parse an OLE file with explicit options.
    ///
    /// Nothing is returned unless the header, FAT, DIFAT, directory and
    /// MiniFAT all parse and pass validation.
    pub fn open_with(mut reader: R, options: OleOptions) -> Result<Self> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        if file_size < HEADER_SIZE as u64 {
            return Err(OleError::InvalidFormat(format!(
                "file is {file_size} bytes, too small for a header"
            )));
        }

        let mut block = [0u8; HEADER_SIZE];
        reader.read_exact(&mut block)?;
        let header = Header::parse(&block)?;
        let sector_size = header.sector_size();
        let strict = options.is_strict();

        let mut store = SectorStore::new(reader, file_size, sector_size);
        let fat = Fat::load(&header, &mut store)?;
        let count = store.sector_count();

        let dir_chain = fat
            .chain_for(header.first_dir_sector, count)
            .map_err(|e| e.with_entry("<directory>"))?;
        if dir_chain.is_empty() {
            return Err(OleError::CorruptContainer(
                "directory chain is empty".to_string(),
            ));
        }

        let mut data = Vec::with_capacity(dir_chain.len() * sector_size);
        let mut buf = vec![0u8; sector_size];
        for &sector in &dir_chain {
            store.read_sector_into(sector, &mut buf)?;
            data.extend_from_slice(&buf);
        }
        let directory = DirectoryTree::load(&data, sector_size, strict)?;

        let root = directory.root();
        let mini_fat = MiniFat::load(&header, &fat, &store, root.start_sector(), root.size())?;

        validate::check_container(&fat, &mini_fat, &directory, &dir_chain, count, strict)?;

        debug!(
            version = ?header.version,
            sectors = count,
            entries = directory.len(),
            strict,
            "opened compound file"
        );

        Ok(Self {
            store,
            header,
            written_header: Some(block.to_vec()),
            fat,
            mini_fat,
            directory,
            dir_chain,
            options,
            baseline: count,
        })
    }

    /// Release the container and hand back the medium it was opened from.
    ///
    /// Unsaved changes are discarded.
    pub fn close(self) -> R {
        self.store.into_inner()
    }

    /// Options the container was opened or created with
    #[inline]
    pub fn options(&self) -> &OleOptions {
        &self.options
    }

    /// Format version
    #[inline]
    pub fn version(&self) -> Version {
        self.header.version
    }

    /// Sector size in bytes
    #[inline]
    pub fn sector_size(&self) -> usize {
        self.store.sector_size()
    }

    /// Number of sectors (excluding the header block)
    #[inline]
    pub fn sector_count(&self) -> u32 {
        self.store.sector_count()
    }

    /// The parsed header as it will be written
    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The big-block allocation table
    #[inline]
    pub fn fat(&self) -> &Fat {
        &self.fat
    }

    /// The mini-sector allocation table
    #[inline]
    pub fn mini_fat(&self) -> &MiniFat {
        &self.mini_fat
    }

    /// The directory
    #[inline]
    pub fn directory(&self) -> &DirectoryTree {
        &self.directory
    }

    /// The root entry
    #[inline]
    pub fn root(&self) -> &DirectoryEntry {
        self.directory.root()
    }

    /// Resolve a `/`-separated path to a SID. `""` and `"/"` name the root.
    pub fn resolve(&self, path: &str) -> Result<u32> {
        let mut sid = 0;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            sid = self
                .directory
                .find(sid, part)
                .ok_or_else(|| OleError::NotFound(path.to_string()))?;
        }
        Ok(sid)
    }

    /// Entry at `path`
    pub fn entry(&self, path: &str) -> Result<&DirectoryEntry> {
        let sid = self.resolve(path)?;
        self.entry_by_sid(sid)
    }

    /// Entry by SID
    pub fn entry_by_sid(&self, sid: u32) -> Result<&DirectoryEntry> {
        self.directory
            .get(sid)
            .ok_or_else(|| OleError::NotFound(format!("entry {sid}")))
    }

    /// Case-insensitive lookup of `name` among the children of `parent`.
    pub fn find(&self, parent: &str, name: &str) -> Result<&DirectoryEntry> {
        let storage = self.resolve(parent)?;
        let sid = self.directory.find(storage, name).ok_or_else(|| {
            OleError::NotFound(format!("{}/{name}", parent.trim_end_matches('/')))
        })?;
        self.entry_by_sid(sid)
    }

    /// Whether an entry exists at `path`
    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok()
    }

    /// Pre-order walk over every descendant of the entry at `path`.
    pub fn walk(&self, path: &str) -> Result<Walk<'_>> {
        let sid = self.resolve(path)?;
        Ok(self.directory.walk(sid))
    }

    /// Children of the storage at `path`, in sibling order.
    pub fn list_entries(&self, path: &str) -> Result<Vec<EntryInfo>> {
        let sid = self.resolve(path)?;
        if !self.entry_by_sid(sid)?.is_storage() {
            return Err(OleError::NotAStorage(path.to_string()));
        }
        Ok(self
            .directory
            .children(sid)
            .into_iter()
            .map(|child| {
                let entry = &self.directory.entries()[child as usize];
                EntryInfo {
                    name: entry.name.clone(),
                    entry_type: entry.entry_type(),
                    size: entry.size(),
                }
            })
            .collect())
    }

    /// Paths of every stream in the container, in walk order.
    pub fn list_streams(&self) -> Vec<String> {
        self.directory
            .walk(0)
            .filter(|entry| entry.is_stream())
            .map(|entry| self.directory.path_of(entry.sid))
            .collect()
    }

    /// Open a stream for reading.
    ///
    /// In lenient mode this is where a damaged chain is reported; other
    /// streams stay readable.
    pub fn get_stream(&self, path: &str) -> Result<StreamReader<'_, R>> {
        let sid = self.resolve(path)?;
        let (placement, chain, size) = self.stream_layout(sid)?;
        Ok(StreamReader::new(self, placement, chain, size))
    }

    /// Read a whole stream.
    pub fn read_stream(&self, path: &str) -> Result<Vec<u8>> {
        self.get_stream(path)?.read_all()
    }

    /// Sector chain of the stream at `path` (mini sectors for small streams).
    pub fn stream_chain(&self, path: &str) -> Result<Vec<u32>> {
        let sid = self.resolve(path)?;
        Ok(self.stream_layout(sid)?.1)
    }

    /// Create an empty stream and return a handle that fills it.
    ///
    /// Fails with [`OleError::DuplicateName`] if the parent already holds
    /// an entry with that name.
    pub fn create_stream(&mut self, path: &str) -> Result<StreamWriter<'_, R>> {
        let (parent, name) = self.split_parent(path)?;
        let sid = self.directory.insert(parent, DirectoryEntry::stream(name))?;
        debug!(path, sid, "created stream");
        Ok(StreamWriter::new(self, sid, Vec::new()))
    }

    /// Reopen an existing stream for writing, preloaded with its content.
    pub fn edit_stream(&mut self, path: &str) -> Result<StreamWriter<'_, R>> {
        let sid = self.resolve(path)?;
        let data = self.read_stream_data(sid)?;
        Ok(StreamWriter::new(self, sid, data))
    }

    /// Create or replace the stream at `path` with `data`.
    pub fn write_stream(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let sid = match self.resolve(path) {
            Ok(sid) => sid,
            Err(OleError::NotFound(_)) => {
                let (parent, name) = self.split_parent(path)?;
                self.directory.insert(parent, DirectoryEntry::stream(name))?
            },
            Err(err) => return Err(err),
        };
        self.set_stream_data(sid, data)
    }

    /// Create an empty storage.
    pub fn create_storage(&mut self, path: &str) -> Result<&DirectoryEntry> {
        let (parent, name) = self.split_parent(path)?;
        let sid = self.directory.insert(parent, DirectoryEntry::storage(name))?;
        debug!(path, sid, "created storage");
        self.entry_by_sid(sid)
    }

    /// Delete a stream or an empty storage and free its sectors.
    pub fn delete(&mut self, path: &str) -> Result<()> {
        let sid = self.resolve(path)?;
        let chain = if self.entry_by_sid(sid)?.is_stream() {
            match self.stream_layout(sid) {
                Ok((placement, chain, _)) => Some((placement, chain)),
                Err(err) => {
                    warn!(path, error = %err, "deleting damaged stream, its sectors stay allocated");
                    None
                },
            }
        } else {
            None
        };

        self.directory.remove(sid)?;
        match chain {
            Some((Placement::Big, chain)) => self.fat.release(&chain),
            Some((Placement::Mini, chain)) => self.mini_fat.release(&chain),
            None => {},
        }
        debug!(path, sid, "deleted entry");
        Ok(())
    }

    /// Rename the entry at `path` within its storage.
    pub fn rename(&mut self, path: &str, new_name: &str) -> Result<()> {
        let sid = self.resolve(path)?;
        self.directory.rename(sid, new_name)
    }

    /// Class identifier of the storage at `path`
    pub fn storage_clsid(&self, path: &str) -> Result<Clsid> {
        let entry = self.entry(path)?;
        if !entry.is_storage() {
            return Err(OleError::NotAStorage(path.to_string()));
        }
        Ok(entry.clsid)
    }

    /// Set the class identifier of the storage at `path`.
    pub fn set_storage_clsid(&mut self, path: &str, clsid: Clsid) -> Result<()> {
        let entry = self.entry_mut(path)?;
        if !entry.is_storage() {
            return Err(OleError::NotAStorage(path.to_string()));
        }
        entry.clsid = clsid;
        Ok(())
    }

    /// Set the user-defined state bits of an entry.
    pub fn set_state_bits(&mut self, path: &str, bits: u32) -> Result<()> {
        self.entry_mut(path)?.state_bits = bits;
        Ok(())
    }

    /// Set the creation time of an entry.
    pub fn set_created(&mut self, path: &str, time: DateTime<Utc>) -> Result<()> {
        self.entry_mut(path)?.created = datetime_to_filetime(time);
        Ok(())
    }

    /// Set the modification time of an entry.
    pub fn set_modified(&mut self, path: &str, time: DateTime<Utc>) -> Result<()> {
        self.entry_mut(path)?.modified = datetime_to_filetime(time);
        Ok(())
    }

    /// Re-run structural validation against the current in-memory state.
    ///
    /// Checks tree connectivity, sector ownership, FAT coverage and that
    /// every stream chain is exactly as long as its size requires.
    pub fn check_integrity(&self) -> Result<()> {
        self.directory.check_structure()?;
        let count = self.store.sector_count();
        if (count as usize) > self.fat.table().len() {
            return Err(OleError::CorruptContainer(format!(
                "FAT covers {} sectors but the container has {count}",
                self.fat.table().len()
            )));
        }
        validate::check_container(
            &self.fat,
            &self.mini_fat,
            &self.directory,
            &self.dir_chain,
            count,
            true,
        )?;

        for entry in self.directory.entries().iter().filter(|e| e.is_stream()) {
            let (placement, chain, size) = self.stream_layout(entry.sid)?;
            let needed = units_for(size, self.unit_size(placement));
            if chain.len() != needed {
                return Err(OleError::CorruptContainer(format!(
                    "stream '{}' has {} sectors for {size} bytes, expected {needed}",
                    self.directory.path_of(entry.sid),
                    chain.len()
                )));
            }
        }
        Ok(())
    }

    /// Serialize the whole container to `out` with a fresh, compact layout.
    ///
    /// The image is built in memory first, so `out` is untouched on error.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let image = writer::layout::build_image(self)?;
        out.write_all(&image)?;
        out.flush()?;
        Ok(())
    }

    /// Serialize the whole container into a byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        writer::layout::build_image(self)
    }

    /// Write the whole container to a file.
    ///
    /// The image goes to a temporary file next to `path` that is then
    /// renamed over it, so a failed save leaves any previous file intact.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let image = writer::layout::build_image(self)?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&image)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;
        debug!(path = %path.display(), bytes = image.len(), "saved compound file");
        Ok(())
    }

    /// Patch only the sectors that changed since open (or since the last
    /// in-place write) into `out`, which must hold the image this container
    /// was opened from.
    ///
    /// Fails with [`OleError::LayoutChanged`] when the sector count differs
    /// from that image; use [`write_to`](Self::write_to) instead. `out` is
    /// left untouched in that case, but the container has already moved
    /// small streams into the mini stream and flushed its tables, exactly
    /// as a full rewrite would. Stream contents are unaffected.
    pub fn write_in_place<W: Write + Seek>(&mut self, out: &mut W) -> Result<()> {
        writer::patch::write_in_place(self, out)
    }

    /// Replace the content of stream `sid`.
    ///
    /// A mini stream that reaches the cutoff moves to ordinary sectors; a
    /// stream in ordinary sectors stays there while the container is open,
    /// whatever its new size. Empty streams own no chain.
    pub(crate) fn set_stream_data(&mut self, sid: u32, data: &[u8]) -> Result<()> {
        let (placement, chain, _) = self.stream_layout(sid)?;
        let len = data.len() as u64;
        let target = match placement {
            _ if len == 0 => Placement::Mini,
            Placement::Mini if len >= u64::from(MINI_STREAM_CUTOFF) => Placement::Big,
            current => current,
        };

        let chain = if target == placement {
            let mut chain = chain;
            let wanted = units_for(len, self.unit_size(target));
            match target {
                Placement::Big => self.fat.resize_chain(&mut self.store, &mut chain, wanted)?,
                Placement::Mini => self.mini_fat.resize_chain(
                    &mut self.fat,
                    &mut self.store,
                    &mut chain,
                    wanted,
                )?,
            }
            chain
        } else {
            match placement {
                Placement::Big => self.fat.release(&chain),
                Placement::Mini => self.mini_fat.release(&chain),
            }
            let chain = self.allocate(target, len)?;
            if target == Placement::Big {
                debug!(sid, size = len, "stream moved from the mini stream to ordinary sectors");
            }
            chain
        };

        self.write_chain(target, &chain, data)?;
        if let Some(entry) = self.directory.get_mut(sid) {
            entry.kind = EntryKind::Stream {
                start: chain.first().copied().unwrap_or(ENDOFCHAIN),
                size: len,
                placement: target,
            };
        }
        Ok(())
    }

    /// Full content of stream `sid`
    pub(crate) fn read_stream_data(&self, sid: u32) -> Result<Vec<u8>> {
        let (placement, chain, size) = self.stream_layout(sid)?;
        self.read_chain(placement, &chain, size)
    }

    /// Read one sector of the given table into `buf`.
    pub(crate) fn read_unit(&self, placement: Placement, sector: u32, buf: &mut [u8]) -> Result<()> {
        match placement {
            Placement::Big => self.store.read_sector_into(sector, buf),
            Placement::Mini => self.mini_fat.read_sector_into(&self.store, sector, buf),
        }
    }

    /// Move every non-empty stream below the cutoff that sits in ordinary
    /// sectors into the mini stream. Returns how many moved.
    pub(crate) fn normalize_placement(&mut self) -> Result<usize> {
        let cutoff = u64::from(MINI_STREAM_CUTOFF);
        let misplaced: Vec<u32> = self
            .directory
            .entries()
            .iter()
            .filter_map(|entry| match entry.kind {
                EntryKind::Stream {
                    size,
                    placement: Placement::Big,
                    ..
                } if size > 0 && size < cutoff => Some(entry.sid),
                _ => None,
            })
            .collect();

        for &sid in &misplaced {
            let (_, chain, size) = self.stream_layout(sid)?;
            let data = self.read_chain(Placement::Big, &chain, size)?;
            self.fat.release(&chain);
            let mini_chain = self.allocate(Placement::Mini, size)?;
            self.write_chain(Placement::Mini, &mini_chain, &data)?;
            if let Some(entry) = self.directory.get_mut(sid) {
                entry.kind = EntryKind::Stream {
                    start: mini_chain.first().copied().unwrap_or(ENDOFCHAIN),
                    size,
                    placement: Placement::Mini,
                };
            }
        }
        if !misplaced.is_empty() {
            debug!(streams = misplaced.len(), "moved small streams into the mini stream");
        }
        Ok(misplaced.len())
    }

    /// Write the directory, MiniFAT, FAT, DIFAT and header into the store.
    pub(crate) fn sync_metadata(&mut self) -> Result<()> {
        let start = self.mini_fat.stream_start();
        let size = self.mini_fat.stream_len();
        self.directory.root_mut().kind = EntryKind::Root { start, size };

        let sector_size = self.sector_size();
        let mut bytes = self.directory.to_bytes();
        let needed = bytes.len().div_ceil(sector_size).max(1);
        if needed > self.dir_chain.len() {
            let extra = needed - self.dir_chain.len();
            self.fat.grow_chain(&mut self.store, &mut self.dir_chain, extra)?;
            debug!(sectors = self.dir_chain.len(), "directory grown");
        }
        let unused = DirectoryEntry::empty(0).to_bytes();
        while bytes.len() < self.dir_chain.len() * sector_size {
            bytes.extend_from_slice(&unused);
        }
        for (&sector, data) in self.dir_chain.iter().zip(bytes.chunks(sector_size)) {
            self.store.write_sector(sector, data)?;
        }
        self.header.first_dir_sector = self.dir_chain.first().copied().unwrap_or(ENDOFCHAIN);
        self.header.num_dir_sectors = self.dir_chain.len() as u32;

        self.mini_fat.sync(&mut self.store, &mut self.header)?;
        self.fat.sync(&mut self.store, &mut self.header)?;
        Ok(())
    }

    /// Table, chain and size of stream `sid`, with the chain checked
    /// against the size.
    fn stream_layout(&self, sid: u32) -> Result<(Placement, Vec<u32>, u64)> {
        let entry = self.entry_by_sid(sid)?;
        let EntryKind::Stream {
            start,
            size,
            placement,
        } = entry.kind
        else {
            return Err(OleError::NotAStream(self.directory.path_of(sid)));
        };
        if size == 0 {
            return Ok((placement, Vec::new(), 0));
        }

        let path = self.directory.path_of(sid);
        let chain = match placement {
            Placement::Mini => self.mini_fat.chain_for(start),
            Placement::Big => self.fat.chain_for(start, self.store.sector_count()),
        };
        let chain = validate::stream_chain(chain, size, self.unit_size(placement), &path)?;
        Ok((placement, chain, size))
    }

    fn unit_size(&self, placement: Placement) -> usize {
        match placement {
            Placement::Mini => MINI_SECTOR_SIZE,
            Placement::Big => self.sector_size(),
        }
    }

    fn allocate(&mut self, placement: Placement, len: u64) -> Result<Vec<u32>> {
        let mut chain = Vec::new();
        let wanted = units_for(len, self.unit_size(placement));
        match placement {
            Placement::Big => self.fat.grow_chain(&mut self.store, &mut chain, wanted)?,
            Placement::Mini => {
                self.mini_fat
                    .resize_chain(&mut self.fat, &mut self.store, &mut chain, wanted)?
            },
        }
        Ok(chain)
    }

    fn read_chain(&self, placement: Placement, chain: &[u32], size: u64) -> Result<Vec<u8>> {
        let unit = self.unit_size(placement);
        let mut data = Vec::with_capacity(chain.len() * unit);
        let mut buf = vec![0u8; unit];
        for &sector in chain {
            self.read_unit(placement, sector, &mut buf)?;
            data.extend_from_slice(&buf);
        }
        data.truncate(size as usize);
        Ok(data)
    }

    fn write_chain(&mut self, placement: Placement, chain: &[u32], data: &[u8]) -> Result<()> {
        let unit = self.unit_size(placement);
        for (&sector, chunk) in chain.iter().zip(data.chunks(unit)) {
            match placement {
                Placement::Big => {
                    self.store.write_sector(sector, chunk)?;
                },
                Placement::Mini => self.mini_fat.write_sector(&mut self.store, sector, chunk)?,
            }
        }
        Ok(())
    }

    fn entry_mut(&mut self, path: &str) -> Result<&mut DirectoryEntry> {
        let sid = self.resolve(path)?;
        self.directory
            .get_mut(sid)
            .ok_or_else(|| OleError::NotFound(path.to_string()))
    }

    /// Split `path` into its parent storage SID and final name.
    fn split_parent<'p>(&self, path: &'p str) -> Result<(u32, &'p str)> {
        let trimmed = path.trim_end_matches('/');
        let (parent, name) = match trimmed.rfind('/') {
            Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
            None => ("", trimmed),
        };
        if name.is_empty() {
            return Err(OleError::InvalidPath(format!("'{path}' names the root")));
        }
        let sid = self.resolve(parent)?;
        if !self.entry_by_sid(sid)?.is_storage() {
            return Err(OleError::NotAStorage(parent.to_string()));
        }
        Ok((sid, name))
    }
}

impl OleFile<BufReader<File>> {
    /// Open a compound file from disk with strict validation.
    ///
    /// The file handle is released on every error path.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_path_with(path, OleOptions::default())
    }

    /// Open a compound file from disk with explicit options.
    pub fn open_path_with<P: AsRef<Path>>(path: P, options: OleOptions) -> Result<Self> {
        let file = File::open(path)?;
        Self::open_with(BufReader::new(file), options)
    }
}

impl OleFile<Cursor<Vec<u8>>> {
    /// Create an empty version 3 container.
    pub fn create_empty() -> Result<Self> {
        Self::create(OleOptions::default())
    }

    /// Create an empty container: a header, one FAT sector and one
    /// directory sector holding only the root entry.
    pub fn create(options: OleOptions) -> Result<Self> {
        let header = Header::new(options.version);
        let sector_size = header.sector_size();
        let mut store = SectorStore::new(Cursor::new(Vec::new()), 0, sector_size);
        let mut fat = Fat::new(sector_size);
        let dir_start = fat.allocate_sector(&mut store)?;

        let mut ole = Self {
            store,
            header,
            written_header: None,
            fat,
            mini_fat: MiniFat::new(sector_size),
            directory: DirectoryTree::new(),
            dir_chain: vec![dir_start],
            options,
            baseline: 0,
        };
        ole.sync_metadata()?;
        ole.baseline = ole.store.sector_count();
        debug!(version = ?ole.header.version, sectors = ole.baseline, "created compound file");
        Ok(ole)
    }
}

/// Check if a file/data is an OLE file by checking magic bytes
pub fn is_ole_file(data: &[u8]) -> bool {
    data.len() >= MINIMAL_OLEFILE_SIZE && &data[0..8] == MAGIC
}

/// Peek at the signature of `reader` without moving its position.
pub fn has_ole_header<R: Read + Seek>(reader: &mut R) -> Result<bool> {
    let start = reader.stream_position()?;
    let mut magic = [0u8; 8];
    let mut filled = 0;
    while filled < magic.len() {
        match reader.read(&mut magic[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    reader.seek(SeekFrom::Start(start))?;
    Ok(filled == magic.len() && &magic == MAGIC)
}
