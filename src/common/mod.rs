//! Utilities shared across the crate.

/// Little-endian readers/writers and the UTF-16LE name codec
pub mod binary;
