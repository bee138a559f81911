//! Error type for the compound file engine.

use std::fmt;
use thiserror::Error;

/// Which allocation table a chain belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// The big-block allocation table
    Fat,
    /// The mini-sector allocation table
    MiniFat,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Fat => f.write_str("FAT"),
            TableKind::MiniFat => f.write_str("MiniFAT"),
        }
    }
}

/// Error types for OLE container operations
#[derive(Error, Debug)]
pub enum OleError {
    /// IO error from the backing medium
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Header signature, version or geometry is not a compound file
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// A sector chain loops or leaves the table
    #[error(
        "Corrupt {table} chain starting at {start}{}: at sector {sector}, {detail}",
        entry.as_ref().map(|e| format!(" (entry '{e}')")).unwrap_or_default()
    )]
    CorruptChain {
        table: TableKind,
        start: u32,
        sector: u32,
        detail: String,
        entry: Option<String>,
    },

    /// Structural invariant of the container is violated
    #[error("Corrupted file: {0}")]
    CorruptContainer(String),

    /// A sibling with the same (case-insensitive) name already exists
    #[error("Duplicate name '{name}' in storage '{parent}'")]
    DuplicateName { parent: String, name: String },

    /// No entry at the given path
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// Storage still has children
    #[error("Storage '{0}' is not empty")]
    NotEmpty(String),

    /// In-place write attempted after the sector count changed
    #[error(
        "Layout changed: container now has {actual} sectors but the image has {expected}; use a full rewrite"
    )]
    LayoutChanged { expected: u32, actual: u32 },

    /// Sector index outside the store
    #[error("Sector {sector} out of bounds (sector count {count})")]
    OutOfBounds { sector: u32, count: u32 },

    /// Entry name is empty, too long or contains reserved characters
    #[error("Invalid entry name '{0}'")]
    InvalidName(String),

    /// Path or operation not applicable to the target (e.g. deleting the root)
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Entry exists but is not a stream
    #[error("Not a stream: {0}")]
    NotAStream(String),

    /// Entry exists but is not a storage
    #[error("Not a storage: {0}")]
    NotAStorage(String),
}

impl OleError {
    /// Attach the entry name to a chain error that does not carry one yet.
    pub(crate) fn with_entry(self, name: &str) -> Self {
        match self {
            OleError::CorruptChain {
                table,
                start,
                sector,
                detail,
                entry: None,
            } => OleError::CorruptChain {
                table,
                start,
                sector,
                detail,
                entry: Some(name.to_string()),
            },
            other => other,
        }
    }
}

impl From<crate::common::binary::BinaryError> for OleError {
    fn from(err: crate::common::binary::BinaryError) -> Self {
        OleError::CorruptContainer(err.to_string())
    }
}

/// Result type for container operations
pub type Result<T> = std::result::Result<T, OleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_error_context() {
        let err = OleError::CorruptChain {
            table: TableKind::MiniFat,
            start: 3,
            sector: 7,
            detail: "expected a successor, found FREESECT".to_string(),
            entry: None,
        }
        .with_entry("Bar");
        let text = err.to_string();
        assert!(text.contains("MiniFAT"));
        assert!(text.contains("'Bar'"));
        assert!(text.contains("sector 7"));
        assert!(text.contains("FREESECT"));
    }

    #[test]
    fn test_layout_changed_message() {
        let err = OleError::LayoutChanged {
            expected: 10,
            actual: 12,
        };
        assert!(err.to_string().contains("full rewrite"));
    }
}
