//! OLE2 compound file engine
//!
//! Layered bottom-up: the [`store`] addresses fixed-size sectors, [`fat`]
//! and [`minifat`] manage sector chains, [`directory`] holds the namespace
//! of storages and streams, and [`OleFile`] ties them together with
//! open/create, stream handles and the two write paths in `writer`.

/// Constants for OLE file format
pub mod consts;

/// Options for opening and creating containers
pub mod config;

/// Error type shared by every layer
pub mod error;

/// Header record
pub mod header;

/// Sector-addressed storage with a dirty bitmap
pub mod store;

/// Chain table shared by the FAT and the MiniFAT
pub mod table;

/// DIFAT location helpers
pub mod difat;

/// Big-block allocation table
pub mod fat;

/// Mini-sector allocation table and mini stream
pub mod minifat;

/// Directory entries and the sibling trees that link them
pub mod directory;

/// Open-time structural validation
pub mod validate;

/// Main container implementation
mod file;

/// Read and write handles over streams
mod stream;

/// Full rewrite and in-place patch
mod writer;

#[cfg(test)]
mod tests;

// Re-export public types for convenient access
pub use config::{OleOptions, Validation, Version};
pub use directory::{Clsid, DirectoryEntry, EntryKind, EntryType, Placement};
pub use error::{OleError, Result, TableKind};
pub use file::{EntryInfo, OleFile, has_ole_header, is_ole_file};
pub use stream::{StreamReader, StreamWriter};
