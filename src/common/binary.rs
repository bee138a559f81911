//! Binary data helpers shared by the header, table and directory codecs.
//!
//! Everything in a compound file is little-endian, so this module only
//! offers little-endian readers plus the UTF-16LE name codec used by
//! directory records.

use zerocopy::{FromBytes, LE, U32};

/// Binary parsing error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BinaryError {
    /// Not enough data to read the requested type
    #[error("Insufficient data: expected {expected}, got {available}")]
    InsufficientData { expected: usize, available: usize },
}

/// Result type for binary operations
pub type BinaryResult<T> = Result<T, BinaryError>;

/// Read a little-endian u32 from a byte slice at the given offset.
///
/// # Examples
///
/// ```
/// use olecf::common::binary::read_u32_le;
/// let data = [0x78, 0x56, 0x34, 0x12];
/// assert_eq!(read_u32_le(&data, 0).unwrap(), 0x12345678);
/// ```
#[inline]
pub fn read_u32_le(data: &[u8], offset: usize) -> BinaryResult<u32> {
    let bytes = slice_at(data, offset, 4)?;
    U32::<LE>::read_from_bytes(bytes)
        .map(|v| v.get())
        .map_err(|_| BinaryError::InsufficientData {
            expected: offset + 4,
            available: data.len(),
        })
}

#[inline]
fn slice_at(data: &[u8], offset: usize, len: usize) -> BinaryResult<&[u8]> {
    data.get(offset..offset + len)
        .ok_or(BinaryError::InsufficientData {
            expected: offset + len,
            available: data.len(),
        })
}

/// Decode a null-padded UTF-16LE buffer.
///
/// Decoding stops at the first null code unit; unpaired surrogates are
/// replaced rather than rejected so damaged names stay addressable.
///
/// # Examples
///
/// ```
/// use olecf::common::binary::parse_utf16le_string;
/// let data = vec![0x48, 0x00, 0x65, 0x00, 0x6C, 0x00, 0x6C, 0x00, 0x6F, 0x00, 0x00, 0x00];
/// assert_eq!(parse_utf16le_string(&data), "Hello");
/// ```
pub fn parse_utf16le_string(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Encode a string as UTF-16LE into `out`, followed by a null terminator.
///
/// Code units that do not fit ahead of the terminator are dropped. Returns
/// the number of bytes written including the terminator, or 0 when `out`
/// cannot even hold the terminator.
pub fn encode_utf16le_into(value: &str, out: &mut [u8]) -> usize {
    let Some(capacity) = (out.len() / 2).checked_sub(1) else {
        return 0;
    };
    let mut written = 0;
    for unit in value.encode_utf16().take(capacity).chain(std::iter::once(0)) {
        out[written..written + 2].copy_from_slice(&unit.to_le_bytes());
        written += 2;
    }
    written
}
