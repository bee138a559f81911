//! OLE2 file writing module
//!
//! Two ways to persist a container:
//!
//! - [`layout`] computes a fresh, deterministic sector layout and serializes
//!   the complete image. It is valid whatever happened to the container in
//!   memory.
//! - [`patch`] writes only the header and the sectors whose content changed,
//!   over the image the container was opened from. It requires the sector
//!   count to be unchanged.
//!
//! # Implementation Notes
//!
//! The layout follows Apache POI's POIFS writer and the Microsoft Compound
//! File Binary Format specification: FAT sectors first, then DIFAT,
//! directory, MiniFAT, mini stream and finally the big streams in directory
//! entry order.

/// Full-rewrite serializer
pub(crate) mod layout;

/// Dirty-sector patcher
pub(crate) mod patch;
