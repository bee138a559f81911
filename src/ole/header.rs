//! OLE2 header parsing and generation
//!
//! The header is a fixed 512-byte record at offset 0. For version 4 files the
//! first sector is 4096 bytes long, so the serialized header block is padded
//! with zeros up to the sector size.

use super::config::Version;
use super::consts::*;
use super::error::{OleError, Result};
use zerocopy::{FromBytes, IntoBytes, LE, U16, U32};

/// Raw OLE header structure (512 bytes)
#[derive(
    Debug,
    Clone,
    zerocopy_derive::FromBytes,
    zerocopy_derive::IntoBytes,
    zerocopy_derive::Immutable,
    zerocopy_derive::KnownLayout,
)]
#[repr(C)]
struct RawHeader {
    /// Signature (D0 CF 11 E0 A1 B1 1A E1)
    signature: [u8; 8],
    /// Header CLSID, all zeros in practice
    clsid: [u8; 16],
    minor_version: U16<LE>,
    major_version: U16<LE>,
    byte_order: U16<LE>,
    sector_shift: U16<LE>,
    mini_sector_shift: U16<LE>,
    reserved: [u8; 6],
    /// Number of directory sectors, zero for version 3
    num_dir_sectors: U32<LE>,
    num_fat_sectors: U32<LE>,
    first_dir_sector: U32<LE>,
    transaction_signature: U32<LE>,
    mini_stream_cutoff: U32<LE>,
    first_minifat_sector: U32<LE>,
    num_minifat_sectors: U32<LE>,
    first_difat_sector: U32<LE>,
    num_difat_sectors: U32<LE>,
    /// First 109 FAT sector locations
    difat: [U32<LE>; HEADER_DIFAT_ENTRIES],
}

/// Parsed compound file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Header CLSID (normally zero)
    pub clsid: [u8; 16],
    /// Minor version
    pub minor_version: u16,
    /// Major version, which fixes the sector size
    pub version: Version,
    /// Number of directory sectors (only meaningful for version 4)
    pub num_dir_sectors: u32,
    /// Number of FAT sectors
    pub num_fat_sectors: u32,
    /// First sector of the directory chain
    pub first_dir_sector: u32,
    /// Transaction signature (unused by this engine, preserved)
    pub transaction_signature: u32,
    /// First sector of the MiniFAT chain
    pub first_minifat_sector: u32,
    /// Number of MiniFAT sectors
    pub num_minifat_sectors: u32,
    /// First DIFAT sector
    pub first_difat_sector: u32,
    /// Number of DIFAT sectors
    pub num_difat_sectors: u32,
    /// Inline FAT sector locations, padded with `FREESECT`
    pub difat: [u32; HEADER_DIFAT_ENTRIES],
}

impl Header {
    /// Create a header for an empty container of the given version.
    pub fn new(version: Version) -> Self {
        Self {
            clsid: [0; 16],
            minor_version: MINOR_VERSION,
            version,
            num_dir_sectors: 0,
            num_fat_sectors: 0,
            first_dir_sector: ENDOFCHAIN,
            transaction_signature: 0,
            first_minifat_sector: ENDOFCHAIN,
            num_minifat_sectors: 0,
            first_difat_sector: ENDOFCHAIN,
            num_difat_sectors: 0,
            difat: [FREESECT; HEADER_DIFAT_ENTRIES],
        }
    }

    /// Parse and validate the header record.
    ///
    /// Fails with [`OleError::InvalidFormat`] on a bad signature, byte order,
    /// version/sector-size combination, mini sector size or cutoff.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let record = bytes.get(..HEADER_SIZE).ok_or_else(|| {
            OleError::InvalidFormat(format!(
                "header needs {HEADER_SIZE} bytes, found {}",
                bytes.len()
            ))
        })?;
        let raw = RawHeader::read_from_bytes(record)
            .map_err(|_| OleError::InvalidFormat("Failed to parse header".to_string()))?;

        if &raw.signature != MAGIC {
            return Err(OleError::InvalidFormat(format!(
                "bad signature {:02X?}",
                raw.signature
            )));
        }

        let byte_order = raw.byte_order.get();
        if byte_order != BYTE_ORDER_MARK {
            return Err(OleError::InvalidFormat(format!(
                "invalid byte order {byte_order:#06X}"
            )));
        }

        let major = raw.major_version.get();
        let shift = raw.sector_shift.get();
        let version = match (major, shift) {
            (3, SECTOR_SHIFT_V3) => Version::V3,
            (4, SECTOR_SHIFT_V4) => Version::V4,
            _ => {
                return Err(OleError::InvalidFormat(format!(
                    "unsupported version {major} with sector shift {shift}"
                )));
            },
        };

        let mini_shift = raw.mini_sector_shift.get();
        if mini_shift != MINI_SECTOR_SHIFT {
            return Err(OleError::InvalidFormat(format!(
                "mini sector shift must be {MINI_SECTOR_SHIFT}, found {mini_shift}"
            )));
        }

        let cutoff = raw.mini_stream_cutoff.get();
        if cutoff != MINI_STREAM_CUTOFF {
            return Err(OleError::InvalidFormat(format!(
                "mini stream cutoff must be {MINI_STREAM_CUTOFF}, found {cutoff}"
            )));
        }

        let mut difat = [FREESECT; HEADER_DIFAT_ENTRIES];
        for (slot, value) in difat.iter_mut().zip(raw.difat.iter()) {
            *slot = value.get();
        }

        Ok(Self {
            clsid: raw.clsid,
            minor_version: raw.minor_version.get(),
            version,
            num_dir_sectors: raw.num_dir_sectors.get(),
            num_fat_sectors: raw.num_fat_sectors.get(),
            first_dir_sector: raw.first_dir_sector.get(),
            transaction_signature: raw.transaction_signature.get(),
            first_minifat_sector: raw.first_minifat_sector.get(),
            num_minifat_sectors: raw.num_minifat_sectors.get(),
            first_difat_sector: raw.first_difat_sector.get(),
            num_difat_sectors: raw.num_difat_sectors.get(),
            difat,
        })
    }

    /// Sector size in bytes
    #[inline]
    pub fn sector_size(&self) -> usize {
        self.version.sector_size()
    }

    /// Record the FAT sector locations; only the first 109 fit in the header.
    pub fn set_fat_sectors(&mut self, sectors: &[u32]) {
        self.num_fat_sectors = sectors.len() as u32;
        self.difat = [FREESECT; HEADER_DIFAT_ENTRIES];
        for (slot, &sector) in self.difat.iter_mut().zip(sectors) {
            *slot = sector;
        }
    }

    /// Generate the header block, padded to one full sector.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut difat = [U32::<LE>::new(FREESECT); HEADER_DIFAT_ENTRIES];
        for (slot, &value) in difat.iter_mut().zip(self.difat.iter()) {
            *slot = U32::new(value);
        }

        // csectDir must be zero for 512-byte sector files
        let num_dir_sectors = match self.version {
            Version::V3 => 0,
            Version::V4 => self.num_dir_sectors,
        };

        let raw = RawHeader {
            signature: *MAGIC,
            clsid: self.clsid,
            minor_version: U16::new(self.minor_version),
            major_version: U16::new(self.version.major()),
            byte_order: U16::new(BYTE_ORDER_MARK),
            sector_shift: U16::new(self.version.sector_shift()),
            mini_sector_shift: U16::new(MINI_SECTOR_SHIFT),
            reserved: [0; 6],
            num_dir_sectors: U32::new(num_dir_sectors),
            num_fat_sectors: U32::new(self.num_fat_sectors),
            first_dir_sector: U32::new(self.first_dir_sector),
            transaction_signature: U32::new(self.transaction_signature),
            mini_stream_cutoff: U32::new(MINI_STREAM_CUTOFF),
            first_minifat_sector: U32::new(self.first_minifat_sector),
            num_minifat_sectors: U32::new(self.num_minifat_sectors),
            first_difat_sector: U32::new(self.first_difat_sector),
            num_difat_sectors: U32::new(self.num_difat_sectors),
            difat,
        };

        let mut block = vec![0u8; self.sector_size()];
        block[..HEADER_SIZE].copy_from_slice(raw.as_bytes());
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_generation() {
        let mut header = Header::new(Version::V3);
        header.first_dir_sector = 10;
        header.set_fat_sectors(&[1, 2, 3]);

        let bytes = header.to_bytes();

        assert_eq!(bytes.len(), 512);
        assert_eq!(&bytes[0..8], MAGIC);
        assert_eq!(&bytes[28..30], &0xFFFEu16.to_le_bytes()); // Little-endian marker
        assert_eq!(&bytes[44..48], &3u32.to_le_bytes());
        assert_eq!(&bytes[48..52], &10u32.to_le_bytes());
        assert_eq!(&bytes[56..60], &4096u32.to_le_bytes());
        assert_eq!(&bytes[76..80], &1u32.to_le_bytes());
        assert_eq!(&bytes[88..92], &FREESECT.to_le_bytes());
    }

    #[test]
    fn test_sector_size_4096() {
        let mut header = Header::new(Version::V4);
        header.num_dir_sectors = 2;
        let bytes = header.to_bytes();

        assert_eq!(bytes.len(), 4096);
        assert_eq!(&bytes[26..28], &4u16.to_le_bytes());
        assert_eq!(&bytes[30..32], &12u16.to_le_bytes());
        assert_eq!(&bytes[40..44], &2u32.to_le_bytes());
        assert!(bytes[512..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_v3_never_writes_dir_sector_count() {
        let mut header = Header::new(Version::V3);
        header.num_dir_sectors = 5;
        let bytes = header.to_bytes();
        assert_eq!(&bytes[40..44], &0u32.to_le_bytes());
    }

    #[test]
    fn test_parse_roundtrip() {
        let mut header = Header::new(Version::V3);
        header.first_dir_sector = 1;
        header.first_minifat_sector = 2;
        header.num_minifat_sectors = 1;
        header.set_fat_sectors(&[0]);

        let parsed = Header::parse(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = Header::new(Version::V3).to_bytes();
        bytes[0] = 0x00;
        assert!(matches!(Header::parse(&bytes), Err(OleError::InvalidFormat(_))));
    }

    #[test]
    fn test_mismatched_sector_shift_rejected() {
        let mut bytes = Header::new(Version::V3).to_bytes();
        bytes[30..32].copy_from_slice(&12u16.to_le_bytes());
        assert!(matches!(Header::parse(&bytes), Err(OleError::InvalidFormat(_))));
    }

    #[test]
    fn test_short_header_rejected() {
        assert!(matches!(
            Header::parse(&MAGIC[..]),
            Err(OleError::InvalidFormat(_))
        ));
    }
}
