//! Directory entries and their 128-byte on-disk record.

use super::super::consts::*;
use super::super::error::{OleError, Result};
use crate::common::binary::{encode_utf16le_into, parse_utf16le_string};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use zerocopy::{FromBytes, IntoBytes, LE, U16, U32, U64};

/// Raw OLE directory entry structure (128 bytes)
#[derive(
    Debug,
    Clone,
    zerocopy_derive::FromBytes,
    zerocopy_derive::IntoBytes,
    zerocopy_derive::Immutable,
    zerocopy_derive::KnownLayout,
)]
#[repr(C)]
struct RawDirectoryEntry {
    /// Entry name in UTF-16LE (64 bytes, null-padded)
    name: [u8; 64],
    /// Length of name in bytes (including null terminator)
    name_len: U16<LE>,
    /// Entry type (1 = storage, 2 = stream, 5 = root)
    entry_type: u8,
    /// Node color (0 = red, 1 = black)
    node_color: u8,
    sid_left: U32<LE>,
    sid_right: U32<LE>,
    sid_child: U32<LE>,
    clsid: [u8; 16],
    state_bits: U32<LE>,
    /// Creation time (FILETIME)
    creation_time: U64<LE>,
    /// Modified time (FILETIME)
    modified_time: U64<LE>,
    start_sector: U32<LE>,
    stream_size: U64<LE>,
}

/// Kind of a directory entry as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    /// Unused slot
    Empty,
    /// Storage (directory)
    Storage,
    /// Stream (file)
    Stream,
    /// The root storage
    Root,
}

impl EntryType {
    /// On-disk object type byte
    pub fn as_u8(self) -> u8 {
        match self {
            EntryType::Empty => STGTY_EMPTY,
            EntryType::Storage => STGTY_STORAGE,
            EntryType::Stream => STGTY_STREAM,
            EntryType::Root => STGTY_ROOT,
        }
    }

    /// Parse the object type byte; lock-bytes and property types are not supported.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            STGTY_EMPTY => Some(EntryType::Empty),
            STGTY_STORAGE => Some(EntryType::Storage),
            STGTY_STREAM => Some(EntryType::Stream),
            STGTY_ROOT => Some(EntryType::Root),
            _ => None,
        }
    }

    /// Whether entries of this type can have children
    #[inline]
    pub fn is_storage(self) -> bool {
        matches!(self, EntryType::Storage | EntryType::Root)
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntryType::Empty => "empty",
            EntryType::Storage => "storage",
            EntryType::Stream => "stream",
            EntryType::Root => "root",
        })
    }
}

/// Which allocation table a stream's chain lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Mini sectors inside the mini stream
    Mini,
    /// Ordinary sectors
    Big,
}

/// Type-specific payload of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// Unused slot
    Empty,
    /// Root storage; `start`/`size` describe the mini stream
    Root { start: u32, size: u64 },
    /// Storage
    Storage,
    /// Stream with its chain start, byte length and table
    Stream {
        start: u32,
        size: u64,
        placement: Placement,
    },
}

/// Red-black node color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Black,
}

/// 16-byte class identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Clsid(pub [u8; 16]);

impl Clsid {
    /// The all-zero CLSID
    pub const NULL: Clsid = Clsid([0; 16]);

    /// Whether every byte is zero
    pub fn is_null(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Display for Clsid {
    /// Formats as `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}`; the first three
    /// groups are stored little-endian.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            u16::from_le_bytes([b[4], b[5]]),
            u16::from_le_bytes([b[6], b[7]]),
            b[8],
            b[9],
            b[10],
            b[11],
            b[12],
            b[13],
            b[14],
            b[15],
        )
    }
}

impl FromStr for Clsid {
    type Err = OleError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || OleError::InvalidFormat(format!("invalid CLSID '{s}'"));
        let trimmed = s.trim_start_matches('{').trim_end_matches('}');
        let groups: Vec<&str> = trimmed.split('-').collect();
        if !trimmed.is_ascii() || groups.iter().map(|g| g.len()).ne([8, 4, 4, 4, 12]) {
            return Err(invalid());
        }

        let data1 = u32::from_str_radix(groups[0], 16).map_err(|_| invalid())?;
        let data2 = u16::from_str_radix(groups[1], 16).map_err(|_| invalid())?;
        let data3 = u16::from_str_radix(groups[2], 16).map_err(|_| invalid())?;
        let tail = format!("{}{}", groups[3], groups[4]);

        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&data1.to_le_bytes());
        bytes[4..6].copy_from_slice(&data2.to_le_bytes());
        bytes[6..8].copy_from_slice(&data3.to_le_bytes());
        for (i, slot) in bytes[8..].iter_mut().enumerate() {
            *slot = u8::from_str_radix(&tail[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        Ok(Clsid(bytes))
    }
}

/// 100ns intervals between 1601-01-01 and the Unix epoch
const FILETIME_UNIX_OFFSET: i64 = 116_444_736_000_000_000;

/// Convert a Windows FILETIME to UTC; zero means "not set".
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let ticks = i64::try_from(filetime).ok()? - FILETIME_UNIX_OFFSET;
    let secs = ticks.div_euclid(10_000_000);
    let nanos = (ticks.rem_euclid(10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Convert a UTC timestamp to a Windows FILETIME.
///
/// Saturates at the FILETIME epoch below and at `i64::MAX` ticks above.
pub fn datetime_to_filetime(time: DateTime<Utc>) -> u64 {
    let ticks = time
        .timestamp()
        .saturating_mul(10_000_000)
        .saturating_add(i64::from(time.timestamp_subsec_nanos() / 100))
        .saturating_add(FILETIME_UNIX_OFFSET);
    u64::try_from(ticks).unwrap_or(0)
}

/// Check an entry name: 1 to 31 UTF-16 units, none of `/ \ : !`.
pub fn validate_name(name: &str) -> Result<()> {
    let units = name.encode_utf16().count();
    if units == 0 || units > MAX_NAME_UNITS || name.contains(['/', '\\', ':', '!']) {
        return Err(OleError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Cut `name` down to its first [`MAX_NAME_UNITS`] UTF-16 units.
pub(crate) fn truncate_name(name: &str) -> String {
    let units: Vec<u16> = name.encode_utf16().take(MAX_NAME_UNITS).collect();
    String::from_utf16_lossy(&units)
}

/// A node of the directory: a storage, a stream or the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Storage ID (index in the directory)
    pub sid: u32,
    /// Entry name (UTF-16 decoded)
    pub name: String,
    /// Type-specific data
    pub kind: EntryKind,
    /// Class identifier (meaningful for storages)
    pub clsid: Clsid,
    /// User-defined state flags
    pub state_bits: u32,
    /// Creation time as FILETIME
    pub created: u64,
    /// Modification time as FILETIME
    pub modified: u64,
    pub(crate) color: Color,
    pub(crate) left: u32,
    pub(crate) right: u32,
    pub(crate) child: u32,
    /// Storage that owns this entry (`NOSTREAM` for the root)
    pub(crate) parent: u32,
    /// Parent node inside the sibling tree
    pub(crate) tree_parent: u32,
}

impl DirectoryEntry {
    fn with_kind(sid: u32, name: String, kind: EntryKind) -> Self {
        Self {
            sid,
            name,
            kind,
            clsid: Clsid::NULL,
            state_bits: 0,
            created: 0,
            modified: 0,
            color: Color::Black,
            left: NOSTREAM,
            right: NOSTREAM,
            child: NOSTREAM,
            parent: NOSTREAM,
            tree_parent: NOSTREAM,
        }
    }

    /// An unused slot
    pub fn empty(sid: u32) -> Self {
        Self::with_kind(sid, String::new(), EntryKind::Empty)
    }

    /// A root entry without a mini stream
    pub fn root() -> Self {
        Self::with_kind(
            0,
            ROOT_ENTRY_NAME.to_string(),
            EntryKind::Root {
                start: ENDOFCHAIN,
                size: 0,
            },
        )
    }

    /// A new empty storage
    pub fn storage(name: &str) -> Self {
        Self::with_kind(0, name.to_string(), EntryKind::Storage)
    }

    /// A new zero-length stream
    pub fn stream(name: &str) -> Self {
        Self::with_kind(
            0,
            name.to_string(),
            EntryKind::Stream {
                start: ENDOFCHAIN,
                size: 0,
                placement: Placement::Mini,
            },
        )
    }

    /// On-disk entry type
    pub fn entry_type(&self) -> EntryType {
        match self.kind {
            EntryKind::Empty => EntryType::Empty,
            EntryKind::Root { .. } => EntryType::Root,
            EntryKind::Storage => EntryType::Storage,
            EntryKind::Stream { .. } => EntryType::Stream,
        }
    }

    /// Whether this is the root entry
    #[inline]
    pub fn is_root(&self) -> bool {
        matches!(self.kind, EntryKind::Root { .. })
    }

    /// Whether this is a storage or the root
    #[inline]
    pub fn is_storage(&self) -> bool {
        self.entry_type().is_storage()
    }

    /// Whether this is a stream
    #[inline]
    pub fn is_stream(&self) -> bool {
        matches!(self.kind, EntryKind::Stream { .. })
    }

    /// Whether this slot is unused
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.kind == EntryKind::Empty
    }

    /// Stream length (mini stream length for the root, 0 for storages)
    pub fn size(&self) -> u64 {
        match self.kind {
            EntryKind::Stream { size, .. } | EntryKind::Root { size, .. } => size,
            _ => 0,
        }
    }

    /// First sector of the entry's chain, `ENDOFCHAIN` when it has none
    pub fn start_sector(&self) -> u32 {
        match self.kind {
            EntryKind::Stream { start, .. } | EntryKind::Root { start, .. } => start,
            _ => ENDOFCHAIN,
        }
    }

    /// Left sibling SID
    #[inline]
    pub fn left(&self) -> u32 {
        self.left
    }

    /// Right sibling SID
    #[inline]
    pub fn right(&self) -> u32 {
        self.right
    }

    /// Root of the children's sibling tree
    #[inline]
    pub fn child(&self) -> u32 {
        self.child
    }

    /// SID of the owning storage (`NOSTREAM` for the root and free slots)
    #[inline]
    pub fn parent(&self) -> u32 {
        self.parent
    }

    /// Sibling-tree color
    #[inline]
    pub fn color(&self) -> Color {
        self.color
    }

    /// Creation time, if recorded
    pub fn created_time(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.created)
    }

    /// Modification time, if recorded
    pub fn modified_time(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.modified)
    }

    /// Parse one 128-byte record.
    ///
    /// Returns `Ok(None)` for an object type this engine does not model;
    /// the caller decides whether that is fatal.
    pub fn parse(data: &[u8], sid: u32, sector_size: usize) -> Result<Option<Self>> {
        let raw = RawDirectoryEntry::read_from_bytes(data).map_err(|_| {
            OleError::CorruptContainer(format!("directory entry {sid} is truncated"))
        })?;

        let Some(entry_type) = EntryType::from_u8(raw.entry_type) else {
            return Ok(None);
        };

        let name_len = (raw.name_len.get() as usize).min(64);
        let name = parse_utf16le_string(&raw.name[..name_len]);

        // 512-byte sector files only use the low 32 bits of the size
        let size = if sector_size == SECTOR_SIZE_V3 {
            raw.stream_size.get() & 0xFFFF_FFFF
        } else {
            raw.stream_size.get()
        };
        let start = raw.start_sector.get();

        let kind = match entry_type {
            EntryType::Empty => EntryKind::Empty,
            EntryType::Storage => EntryKind::Storage,
            EntryType::Root => EntryKind::Root { start, size },
            EntryType::Stream => EntryKind::Stream {
                start,
                size,
                placement: if size < u64::from(MINI_STREAM_CUTOFF) {
                    Placement::Mini
                } else {
                    Placement::Big
                },
            },
        };

        Ok(Some(Self {
            sid,
            name,
            kind,
            clsid: Clsid(raw.clsid),
            state_bits: raw.state_bits.get(),
            created: raw.creation_time.get(),
            modified: raw.modified_time.get(),
            color: if raw.node_color == COLOR_RED {
                Color::Red
            } else {
                Color::Black
            },
            left: raw.sid_left.get(),
            right: raw.sid_right.get(),
            child: raw.sid_child.get(),
            parent: NOSTREAM,
            tree_parent: NOSTREAM,
        }))
    }

    /// Write this entry to bytes (128 bytes per OLE2 spec)
    pub fn to_bytes(&self) -> [u8; DIRENTRY_SIZE] {
        let mut out = [0u8; DIRENTRY_SIZE];
        if self.is_empty() {
            out[68..80].fill(0xFF);
            return out;
        }

        let mut name = [0u8; 64];
        let name_len = encode_utf16le_into(&self.name, &mut name);

        let (start, size) = match self.kind {
            EntryKind::Stream { start, size, .. } | EntryKind::Root { start, size } => (start, size),
            _ => (0, 0),
        };

        let raw = RawDirectoryEntry {
            name,
            name_len: U16::new(name_len as u16),
            entry_type: self.entry_type().as_u8(),
            node_color: match self.color {
                Color::Red => COLOR_RED,
                Color::Black => COLOR_BLACK,
            },
            sid_left: U32::new(self.left),
            sid_right: U32::new(self.right),
            sid_child: U32::new(self.child),
            clsid: self.clsid.0,
            state_bits: U32::new(self.state_bits),
            creation_time: U64::new(self.created),
            modified_time: U64::new(self.modified),
            start_sector: U32::new(start),
            stream_size: U64::new(size),
        };
        out.copy_from_slice(raw.as_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_overlong_name_is_truncated_on_write() {
        let mut entry = DirectoryEntry::stream("x");
        entry.name = "y".repeat(40);
        let bytes = entry.to_bytes();
        assert_eq!(u16::from_le_bytes([bytes[64], bytes[65]]), 64);
        assert_eq!(&bytes[62..64], &[0, 0]);

        let parsed = DirectoryEntry::parse(&bytes, 1, 512).unwrap().unwrap();
        assert_eq!(parsed.name, "y".repeat(MAX_NAME_UNITS));
        assert_eq!(truncate_name(&"y".repeat(40)), parsed.name);
    }

    #[test]
    fn test_stream_record_layout() {
        let mut entry = DirectoryEntry::stream("WordDocument");
        entry.kind = EntryKind::Stream {
            start: 5,
            size: 4200,
            placement: Placement::Big,
        };
        entry.left = 3;
        let bytes = entry.to_bytes();

        assert_eq!(&bytes[0..2], &[b'W', 0]);
        assert_eq!(&bytes[64..66], &26u16.to_le_bytes());
        assert_eq!(bytes[66], STGTY_STREAM);
        assert_eq!(bytes[67], COLOR_BLACK);
        assert_eq!(&bytes[68..72], &3u32.to_le_bytes());
        assert_eq!(&bytes[72..76], &NOSTREAM.to_le_bytes());
        assert_eq!(&bytes[116..120], &5u32.to_le_bytes());
        assert_eq!(&bytes[120..128], &4200u64.to_le_bytes());

        let parsed = DirectoryEntry::parse(&bytes, 7, 512).unwrap().unwrap();
        assert_eq!(parsed.sid, 7);
        assert_eq!(parsed.name, "WordDocument");
        assert_eq!(parsed.kind, entry.kind);
        assert_eq!(parsed.left(), 3);
    }

    #[test]
    fn test_empty_record() {
        let bytes = DirectoryEntry::empty(3).to_bytes();
        assert!(bytes[..68].iter().all(|&b| b == 0));
        assert!(bytes[68..80].iter().all(|&b| b == 0xFF));
        assert!(bytes[80..].iter().all(|&b| b == 0));
        let parsed = DirectoryEntry::parse(&bytes, 3, 512).unwrap().unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_unknown_type_is_not_modelled() {
        let mut bytes = DirectoryEntry::storage("x").to_bytes();
        bytes[66] = 3; // lock bytes
        assert!(DirectoryEntry::parse(&bytes, 1, 512).unwrap().is_none());
    }

    #[test]
    fn test_v3_ignores_high_size_bits() {
        let mut bytes = DirectoryEntry::stream("s").to_bytes();
        bytes[120..128].copy_from_slice(&0x1_0000_0010u64.to_le_bytes());
        let v3 = DirectoryEntry::parse(&bytes, 1, 512).unwrap().unwrap();
        assert_eq!(v3.size(), 0x10);
        let v4 = DirectoryEntry::parse(&bytes, 1, 4096).unwrap().unwrap();
        assert_eq!(v4.size(), 0x1_0000_0010);
    }

    #[test]
    fn test_clsid_display_and_parse() {
        // Word 97-2003 Document
        let word = Clsid([
            0x06, 0x09, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC0, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x46,
        ]);
        let text = word.to_string();
        assert_eq!(text, "{00020906-0000-0000-C000-000000000046}");
        assert_eq!(text.parse::<Clsid>().unwrap(), word);
        assert!("{nonsense}".parse::<Clsid>().is_err());
        assert!(Clsid::NULL.is_null());
    }

    #[test]
    fn test_filetime_conversion() {
        let time = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        let filetime = datetime_to_filetime(time);
        assert_eq!(filetime_to_datetime(filetime), Some(time));
        assert_eq!(filetime_to_datetime(0), None);

        // Out-of-range dates clamp instead of overflowing
        assert_eq!(datetime_to_filetime(DateTime::<Utc>::MAX_UTC), i64::MAX as u64);
        assert_eq!(datetime_to_filetime(DateTime::<Utc>::MIN_UTC), 0);
        let before_epoch = Utc.with_ymd_and_hms(1500, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(datetime_to_filetime(before_epoch), 0);
    }

    #[test]
    fn test_name_rules() {
        assert!(validate_name("Foo").is_ok());
        assert!(validate_name(&"x".repeat(31)).is_ok());
        assert!(matches!(validate_name(""), Err(OleError::InvalidName(_))));
        assert!(validate_name(&"x".repeat(32)).is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a!b").is_err());
    }
}
