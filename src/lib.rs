//! olecf - A Rust engine for the OLE2 Compound File Binary Format
//!
//! Compound files (the container behind legacy `.doc`, `.xls`, `.ppt` and
//! `.msg` files) are a small file system inside a file: fixed-size sectors,
//! a File Allocation Table chaining them into streams, a MiniFAT for small
//! streams, and a directory of storages and streams kept as red-black trees.
//!
//! # Features
//!
//! - **Read and write**: open, edit and save version 3 (512-byte sectors)
//!   and version 4 (4096-byte sectors) containers
//! - **Eager validation**: chain loops, out-of-range successors, sector
//!   double allocation and disconnected directory entries are reported at
//!   open time with the sector, table and entry involved
//! - **Partial-failure tolerance**: in lenient mode one damaged stream does
//!   not prevent reading the others
//! - **Two write paths**: a deterministic full rewrite, and an in-place patch
//!   of just the changed sectors
//!
//! # Example - Low-level OLE access
//!
//! ```no_run
//! use olecf::OleFile;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Open an OLE file
//! let ole = OleFile::open_path("document.doc")?;
//!
//! // List all streams
//! for stream in ole.list_streams() {
//!     println!("Stream: {stream}");
//! }
//!
//! // Read a specific stream
//! let data = ole.read_stream("WordDocument")?;
//! println!("Stream size: {} bytes", data.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Example - Building a container
//!
//! ```
//! use olecf::{OleFile, OleOptions, Version};
//! use std::io::{Cursor, Write};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut ole = OleFile::create(OleOptions::new().with_version(Version::V4))?;
//! let mut stream = ole.create_stream("Contents")?;
//! stream.write_all(b"payload")?;
//! stream.close()?;
//!
//! let mut image = Vec::new();
//! ole.write_to(&mut image)?;
//! let reopened = OleFile::open(Cursor::new(image))?;
//! assert_eq!(reopened.read_stream("Contents")?, b"payload");
//! # Ok(())
//! # }
//! ```

/// Shared binary helpers
pub mod common;

/// OLE2 (Object Linking and Embedding) compound file engine
///
/// This module provides functionality to read, modify and write OLE2
/// structured storage files, which are used by legacy Microsoft Office
/// formats (.doc, .xls, .ppt).
pub mod ole;

// Re-export commonly used types for convenience
pub use ole::{
    Clsid, DirectoryEntry, EntryInfo, EntryType, OleError, OleFile, OleOptions, Result,
    StreamReader, StreamWriter, Validation, Version, has_ole_header, is_ole_file,
};
