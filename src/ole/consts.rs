/// Magic bytes that should be at the beginning of every OLE file
pub const MAGIC: &[u8; 8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";

/// Size of the on-disk header record in bytes
pub const HEADER_SIZE: usize = 512;

/// Minimal size of an empty OLE file with 512-byte sectors (1536 bytes)
pub const MINIMAL_OLEFILE_SIZE: usize = 1536;

/// Size of a directory entry in bytes
pub const DIRENTRY_SIZE: usize = 128;

/// Default sector size for version 3 (512 bytes)
pub const SECTOR_SIZE_V3: usize = 512;

/// Default sector size for version 4 (4096 bytes)
pub const SECTOR_SIZE_V4: usize = 4096;

/// Sector shift for version 3 files
pub const SECTOR_SHIFT_V3: u16 = 9;

/// Sector shift for version 4 files
pub const SECTOR_SHIFT_V4: u16 = 12;

/// Mini sector shift (64-byte mini sectors)
pub const MINI_SECTOR_SHIFT: u16 = 6;

/// Mini sector size in bytes
pub const MINI_SECTOR_SIZE: usize = 1 << MINI_SECTOR_SHIFT;

/// Streams strictly smaller than this live in the mini stream
pub const MINI_STREAM_CUTOFF: u32 = 4096;

/// Number of FAT sector locations stored inline in the header
pub const HEADER_DIFAT_ENTRIES: usize = 109;

/// Minor version written into new headers
pub const MINOR_VERSION: u16 = 0x003E;

/// Byte order mark (little-endian)
pub const BYTE_ORDER_MARK: u16 = 0xFFFE;

/// Maximum number of UTF-16 code units in an entry name (terminator excluded)
pub const MAX_NAME_UNITS: usize = 31;

/// Name given to the root storage entry
pub const ROOT_ENTRY_NAME: &str = "Root Entry";

// Sector IDs (from AAF specifications)
/// Maximum regular sector ID
pub const MAXREGSECT: u32 = 0xFFFFFFFA; // -6
/// Denotes a DIFAT sector in a FAT
pub const DIFSECT: u32 = 0xFFFFFFFC; // -4
/// Denotes a FAT sector in a FAT
pub const FATSECT: u32 = 0xFFFFFFFD; // -3
/// End of a virtual stream chain
pub const ENDOFCHAIN: u32 = 0xFFFFFFFE; // -2
/// Unallocated sector
pub const FREESECT: u32 = 0xFFFFFFFF; // -1

// Directory Entry IDs (from AAF specifications)
/// Unallocated directory entry
pub const NOSTREAM: u32 = 0xFFFFFFFF; // -1

// Object types in storage (from AAF specifications)
/// Empty directory entry
pub const STGTY_EMPTY: u8 = 0;
/// Element is a storage object
pub const STGTY_STORAGE: u8 = 1;
/// Element is a stream object
pub const STGTY_STREAM: u8 = 2;
/// Element is a root storage
pub const STGTY_ROOT: u8 = 5;

/// Red node in a sibling tree
pub const COLOR_RED: u8 = 0;
/// Black node in a sibling tree
pub const COLOR_BLACK: u8 = 1;

/// Human readable name for a FAT/MiniFAT slot value, used in diagnostics.
pub fn describe_sector(value: u32) -> String {
    match value {
        FREESECT => "FREESECT".to_string(),
        ENDOFCHAIN => "ENDOFCHAIN".to_string(),
        FATSECT => "FATSECT".to_string(),
        DIFSECT => "DIFSECT".to_string(),
        v if v > MAXREGSECT => format!("reserved value {v:#010X}"),
        v => format!("sector {v}"),
    }
}
