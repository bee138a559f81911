//! Options controlling how containers are created and validated.

use super::consts::{SECTOR_SHIFT_V3, SECTOR_SHIFT_V4, SECTOR_SIZE_V3, SECTOR_SIZE_V4};
use serde::{Deserialize, Serialize};

/// Major version of the compound file format.
///
/// The version fixes the sector size: version 3 files use 512-byte
/// sectors, version 4 files use 4096-byte sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Version {
    /// 512-byte sectors
    #[default]
    V3,
    /// 4096-byte sectors
    V4,
}

impl Version {
    /// Sector size in bytes
    #[inline]
    pub fn sector_size(self) -> usize {
        match self {
            Version::V3 => SECTOR_SIZE_V3,
            Version::V4 => SECTOR_SIZE_V4,
        }
    }

    /// Sector shift stored in the header
    #[inline]
    pub fn sector_shift(self) -> u16 {
        match self {
            Version::V3 => SECTOR_SHIFT_V3,
            Version::V4 => SECTOR_SHIFT_V4,
        }
    }

    /// Major version number stored in the header
    #[inline]
    pub fn major(self) -> u16 {
        match self {
            Version::V3 => 3,
            Version::V4 => 4,
        }
    }
}

/// How much of the container is checked when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validation {
    /// Validate every chain, sector ownership and the whole directory tree.
    #[default]
    Strict,
    /// Validate only the structural metadata. Individual stream chains are
    /// checked when the stream is opened, so one damaged stream does not
    /// prevent reading the others.
    Lenient,
}

/// Configuration options for opening and creating containers.
///
/// # Examples
///
/// ```rust
/// use olecf::{OleOptions, Validation, Version};
///
/// // Create with defaults
/// let options = OleOptions::default();
/// assert_eq!(options.version, Version::V3);
///
/// // Or customize
/// let options = OleOptions::new()
///     .with_version(Version::V4)
///     .with_validation(Validation::Lenient);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OleOptions {
    /// Format version used for newly created containers
    pub version: Version,
    /// Validation depth applied when opening
    pub validation: Validation,
}

impl OleOptions {
    /// Create a new `OleOptions` with default values.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the format version for new containers.
    #[inline]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Set the validation depth used by `open`.
    #[inline]
    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }

    #[inline]
    pub(crate) fn is_strict(&self) -> bool {
        self.validation == Validation::Strict
    }
}
