//! Directory (property) tree
//!
//! The directory is a flat array of 128-byte records. Entry 0 is the root
//! storage; every storage points at the root of a red-black tree holding its
//! children, and those children link to each other through left/right
//! sibling indices. The in-memory form keeps the same arena-of-records shape,
//! adding the owning storage and the sibling-tree parent of each entry.
//!
//! Sibling trees read from disk are used as they are. A tree that is not a
//! well-formed red-black tree (many writers store plain linked lists) is
//! searched linearly and only rebuilt, balanced, the first time it is
//! modified, so untouched storages keep their exact shape on rewrite.

pub mod entry;
pub(crate) mod rbtree;

pub use entry::{
    Clsid, Color, DirectoryEntry, EntryKind, EntryType, Placement, datetime_to_filetime,
    filetime_to_datetime, validate_name,
};
pub use rbtree::compare_names;

use super::consts::*;
use super::error::{OleError, Result};
use fixedbitset::FixedBitSet;
use entry::truncate_name;
use rbtree::SiblingTree;
use std::cmp::Ordering;
use tracing::{debug, warn};

/// In-memory directory.
#[derive(Debug, Clone)]
pub struct DirectoryTree {
    entries: Vec<DirectoryEntry>,
    /// Storages whose sibling tree is not a well-formed red-black tree
    irregular: FixedBitSet,
}

impl Default for DirectoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryTree {
    /// A directory holding only the root entry.
    pub fn new() -> Self {
        Self {
            entries: vec![DirectoryEntry::root()],
            irregular: FixedBitSet::with_capacity(1),
        }
    }

    /// Parse the directory stream and link the tree.
    ///
    /// In strict mode unsupported entry types, streams with children, extra
    /// root entries, duplicate sibling names and unreachable entries are
    /// errors; in lenient mode they are logged and neutralized.
    pub fn load(data: &[u8], sector_size: usize, strict: bool) -> Result<Self> {
        let count = data.len() / DIRENTRY_SIZE;
        if count == 0 {
            return Err(OleError::CorruptContainer("directory is empty".to_string()));
        }

        let mut entries = Vec::with_capacity(count);
        for (sid, record) in data.chunks_exact(DIRENTRY_SIZE).enumerate() {
            let sid = sid as u32;
            match DirectoryEntry::parse(record, sid, sector_size)? {
                Some(entry) => entries.push(entry),
                None => {
                    let detail = format!("entry {sid} has unsupported object type {}", record[66]);
                    if strict {
                        return Err(OleError::CorruptContainer(detail));
                    }
                    warn!("{detail}; ignoring it");
                    entries.push(DirectoryEntry::empty(sid));
                },
            }
        }

        for entry in &mut entries {
            if entry.is_empty() || entry.name.encode_utf16().count() <= MAX_NAME_UNITS {
                continue;
            }
            let detail = format!(
                "entry {} name '{}' has no room for its terminator",
                entry.sid, entry.name
            );
            if strict {
                return Err(OleError::CorruptContainer(detail));
            }
            warn!("{detail}; truncating it");
            entry.name = truncate_name(&entry.name);
        }

        if !entries[0].is_root() {
            return Err(OleError::CorruptContainer(format!(
                "entry 0 must be the root storage, found {}",
                entries[0].entry_type()
            )));
        }
        if entries[0].left != NOSTREAM || entries[0].right != NOSTREAM {
            if strict {
                return Err(OleError::CorruptContainer(
                    "root entry has sibling links".to_string(),
                ));
            }
            warn!("root entry has sibling links; ignoring them");
            entries[0].left = NOSTREAM;
            entries[0].right = NOSTREAM;
        }

        for entry in entries.iter_mut().skip(1) {
            if entry.is_root() {
                let detail = format!("entry {} is a second root storage", entry.sid);
                if strict {
                    return Err(OleError::CorruptContainer(detail));
                }
                warn!("{detail}; ignoring it");
                *entry = DirectoryEntry::empty(entry.sid);
            } else if entry.is_stream() && entry.child != NOSTREAM {
                let detail = format!("stream '{}' (entry {}) has children", entry.name, entry.sid);
                if strict {
                    return Err(OleError::CorruptContainer(detail));
                }
                warn!("{detail}; ignoring them");
                entry.child = NOSTREAM;
            }
        }

        let mut tree = Self {
            entries,
            irregular: FixedBitSet::with_capacity(count),
        };

        let mut links = Vec::with_capacity(count);
        let reached = tree.traverse(|sid, storage, tree_parent| {
            links.push((sid, storage, tree_parent));
        })?;
        for (sid, storage, tree_parent) in links {
            let entry = &mut tree.entries[sid as usize];
            entry.parent = storage;
            entry.tree_parent = tree_parent;
        }

        for sid in 1..count {
            if reached.contains(sid) || tree.entries[sid].is_empty() {
                continue;
            }
            let detail = format!(
                "entry {sid} '{}' is not reachable from the root",
                tree.entries[sid].name
            );
            if strict {
                return Err(OleError::CorruptContainer(detail));
            }
            warn!("{detail}; ignoring it");
            tree.entries[sid] = DirectoryEntry::empty(sid as u32);
        }

        for storage in 0..count as u32 {
            if !tree.entries[storage as usize].is_storage() {
                continue;
            }
            tree.check_siblings(storage, strict)?;
            let root = tree.entries[storage as usize].child;
            if !rbtree::is_well_formed(&tree.entries, root) {
                debug!(storage, "sibling tree is not a red-black tree");
                tree.irregular.insert(storage as usize);
            }
        }

        Ok(tree)
    }

    /// Walk every sibling tree from the root, reporting `(sid, owning
    /// storage, sibling-tree parent)` for each reached entry.
    ///
    /// Fails when a link leaves the directory, lands on an unused or root
    /// entry, or reaches an entry twice (a cycle or a shared subtree).
    fn traverse(&self, mut visit: impl FnMut(u32, u32, u32)) -> Result<FixedBitSet> {
        let count = self.entries.len();
        let mut reached = FixedBitSet::with_capacity(count);
        reached.insert(0);
        let mut storages = vec![0u32];

        while let Some(storage) = storages.pop() {
            let mut nodes = vec![(self.entries[storage as usize].child, NOSTREAM)];
            while let Some((sid, tree_parent)) = nodes.pop() {
                if sid == NOSTREAM {
                    continue;
                }
                let from = if tree_parent == NOSTREAM { storage } else { tree_parent };
                if sid as usize >= count {
                    return Err(OleError::CorruptContainer(format!(
                        "entry {from} links to {sid}, outside the directory ({count} entries)"
                    )));
                }
                if reached.put(sid as usize) {
                    return Err(OleError::CorruptContainer(format!(
                        "entry {sid} is linked more than once (cycle in the directory tree)"
                    )));
                }
                let entry = &self.entries[sid as usize];
                if entry.is_empty() || entry.is_root() {
                    return Err(OleError::CorruptContainer(format!(
                        "entry {from} links to entry {sid} of type {}",
                        entry.entry_type()
                    )));
                }
                visit(sid, storage, tree_parent);
                nodes.push((entry.right, sid));
                nodes.push((entry.left, sid));
                if entry.is_storage() {
                    storages.push(sid);
                }
            }
        }
        Ok(reached)
    }

    /// Reject or report case-insensitive duplicate names among a storage's children.
    fn check_siblings(&self, storage: u32, strict: bool) -> Result<()> {
        let mut names: Vec<&str> = self
            .children(storage)
            .into_iter()
            .map(|sid| self.entries[sid as usize].name.as_str())
            .collect();
        names.sort_by(|a, b| compare_names(a, b));
        for pair in names.windows(2) {
            if compare_names(pair[0], pair[1]) == Ordering::Equal {
                if strict {
                    return Err(OleError::DuplicateName {
                        parent: self.path_of(storage),
                        name: pair[1].to_string(),
                    });
                }
                warn!(
                    storage = %self.path_of(storage),
                    name = pair[1],
                    "duplicate sibling name"
                );
            }
        }
        Ok(())
    }

    /// Re-verify the links of the current tree: every live entry reachable
    /// exactly once from the root and the cached parents in agreement.
    pub fn check_structure(&self) -> Result<()> {
        let mut mismatch = None;
        let reached = self.traverse(|sid, storage, tree_parent| {
            let entry = &self.entries[sid as usize];
            if mismatch.is_none() && (entry.parent != storage || entry.tree_parent != tree_parent) {
                mismatch = Some(sid);
            }
        })?;
        if let Some(sid) = mismatch {
            return Err(OleError::CorruptContainer(format!(
                "entry {sid} has stale parent links"
            )));
        }
        for (sid, entry) in self.entries.iter().enumerate().skip(1) {
            if !entry.is_empty() && !reached.contains(sid) {
                return Err(OleError::CorruptContainer(format!(
                    "entry {sid} '{}' is not reachable from the root",
                    entry.name
                )));
            }
        }
        Ok(())
    }

    /// Number of slots, used or not
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the directory has no slots (never true for a loaded tree)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All slots
    #[inline]
    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    /// Entry by SID
    #[inline]
    pub fn get(&self, sid: u32) -> Option<&DirectoryEntry> {
        self.entries.get(sid as usize).filter(|e| !e.is_empty())
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, sid: u32) -> Option<&mut DirectoryEntry> {
        self.entries.get_mut(sid as usize).filter(|e| !e.is_empty())
    }

    /// The root entry
    #[inline]
    pub fn root(&self) -> &DirectoryEntry {
        &self.entries[0]
    }

    #[inline]
    pub(crate) fn root_mut(&mut self) -> &mut DirectoryEntry {
        &mut self.entries[0]
    }

    /// Whether a storage's sibling tree is searched linearly until its next change
    #[inline]
    pub fn is_irregular(&self, storage: u32) -> bool {
        self.irregular.contains(storage as usize)
    }

    /// Children of a storage, in sibling-tree order.
    pub fn children(&self, storage: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let Some(entry) = self.entries.get(storage as usize) else {
            return out;
        };
        let mut stack = Vec::new();
        let mut current = entry.child;
        while current != NOSTREAM || !stack.is_empty() {
            while current != NOSTREAM {
                stack.push(current);
                current = self.entries[current as usize].left;
            }
            if let Some(sid) = stack.pop() {
                out.push(sid);
                current = self.entries[sid as usize].right;
            }
        }
        out
    }

    /// Case-insensitive lookup of a child by name.
    pub fn find(&self, storage: u32, name: &str) -> Option<u32> {
        let entry = self.get(storage)?;
        if !entry.is_storage() {
            return None;
        }
        if self.is_irregular(storage) {
            return self.children(storage).into_iter().find(|&sid| {
                compare_names(name, &self.entries[sid as usize].name) == Ordering::Equal
            });
        }

        let mut current = entry.child;
        while current != NOSTREAM {
            let node = &self.entries[current as usize];
            current = match compare_names(name, &node.name) {
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
                Ordering::Equal => return Some(current),
            };
        }
        None
    }

    /// Add `entry` under `storage` and return its SID. Unused slots are reused.
    pub fn insert(&mut self, storage: u32, mut entry: DirectoryEntry) -> Result<u32> {
        match self.get(storage) {
            Some(parent) if parent.is_storage() => {},
            Some(_) => return Err(OleError::NotAStorage(self.path_of(storage))),
            None => return Err(OleError::NotFound(format!("entry {storage}"))),
        }
        validate_name(&entry.name)?;
        if self.find(storage, &entry.name).is_some() {
            return Err(OleError::DuplicateName {
                parent: self.path_of(storage),
                name: entry.name,
            });
        }
        self.regularize(storage);

        let sid = match self.entries.iter().skip(1).position(|e| e.is_empty()) {
            Some(pos) => (pos + 1) as u32,
            None => {
                self.entries.push(DirectoryEntry::empty(self.entries.len() as u32));
                self.irregular.grow(self.entries.len());
                (self.entries.len() - 1) as u32
            },
        };
        entry.sid = sid;
        entry.parent = storage;
        entry.child = NOSTREAM;
        self.entries[sid as usize] = entry;
        SiblingTree::new(&mut self.entries, storage).insert(sid);
        Ok(sid)
    }

    /// Unlink an entry and free its slot, returning the old record so the
    /// caller can release its chain.
    pub fn remove(&mut self, sid: u32) -> Result<DirectoryEntry> {
        if sid == 0 {
            return Err(OleError::InvalidPath("the root entry cannot be removed".to_string()));
        }
        let entry = self
            .get(sid)
            .ok_or_else(|| OleError::NotFound(format!("entry {sid}")))?;
        if entry.is_storage() && entry.child != NOSTREAM {
            return Err(OleError::NotEmpty(self.path_of(sid)));
        }
        let storage = entry.parent;
        self.regularize(storage);
        SiblingTree::new(&mut self.entries, storage).remove(sid);
        Ok(std::mem::replace(
            &mut self.entries[sid as usize],
            DirectoryEntry::empty(sid),
        ))
    }

    /// Change an entry's name, keeping its slot and its subtree.
    pub fn rename(&mut self, sid: u32, name: &str) -> Result<()> {
        if sid == 0 {
            return Err(OleError::InvalidPath("the root entry cannot be renamed".to_string()));
        }
        validate_name(name)?;
        let storage = self
            .get(sid)
            .ok_or_else(|| OleError::NotFound(format!("entry {sid}")))?
            .parent;
        if let Some(existing) = self.find(storage, name) {
            if existing != sid {
                return Err(OleError::DuplicateName {
                    parent: self.path_of(storage),
                    name: name.to_string(),
                });
            }
        }
        self.regularize(storage);
        SiblingTree::new(&mut self.entries, storage).remove(sid);
        self.entries[sid as usize].name = name.to_string();
        SiblingTree::new(&mut self.entries, storage).insert(sid);
        Ok(())
    }

    /// Pre-order walk over every descendant of `sid`, children in sibling order.
    ///
    /// The walk is lazy and reads the current tree state; calling `walk`
    /// again starts over.
    pub fn walk(&self, sid: u32) -> Walk<'_> {
        let mut stack = self.children(sid);
        stack.reverse();
        Walk { tree: self, stack }
    }

    /// Slash-separated path of an entry; `/` for the root.
    pub fn path_of(&self, sid: u32) -> String {
        let mut names = Vec::new();
        let mut current = sid;
        while current != 0 && current != NOSTREAM {
            let Some(entry) = self.entries.get(current as usize) else {
                break;
            };
            names.push(entry.name.as_str());
            current = entry.parent;
            if names.len() > self.entries.len() {
                break;
            }
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }

    /// Serialize all slots, in SID order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * DIRENTRY_SIZE);
        for entry in &self.entries {
            out.extend_from_slice(&entry.to_bytes());
        }
        out
    }

    /// Rebuild an irregular sibling tree before it is modified.
    fn regularize(&mut self, storage: u32) {
        if !self.is_irregular(storage) {
            return;
        }
        let mut children = self.children(storage);
        children.sort_by(|&a, &b| {
            compare_names(&self.entries[a as usize].name, &self.entries[b as usize].name)
        });
        warn!(
            storage = %self.path_of(storage),
            children = children.len(),
            "rebuilding irregular sibling tree"
        );
        SiblingTree::new(&mut self.entries, storage).rebuild(&children);
        self.irregular.set(storage as usize, false);
    }
}

/// Lazy pre-order iterator returned by [`DirectoryTree::walk`].
#[derive(Debug, Clone)]
pub struct Walk<'a> {
    tree: &'a DirectoryTree,
    stack: Vec<u32>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a DirectoryEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let sid = self.stack.pop()?;
        let entry = &self.tree.entries[sid as usize];
        if entry.is_storage() {
            let mut children = self.tree.children(sid);
            children.reverse();
            self.stack.extend(children);
        }
        Some(entry)
    }
}
