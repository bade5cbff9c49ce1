//! Error types for tidefs
//!
//! This module defines the error taxonomy shared by the namespace tree,
//! the journal and the metadata store.

use crate::types::InodeId;
use thiserror::Error;

/// Common result type for tidefs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for tidefs
#[derive(Debug, Error)]
pub enum Error {
    // Namespace errors
    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("inode not found: {0}")]
    IdNotFound(InodeId),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("path already exists: {0}")]
    PathAlreadyExists(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("not a file: {0}")]
    NotAFile(String),

    #[error("not a table: {0}")]
    NotATable(String),

    // File and table attribute errors
    #[error("invalid block: {0}")]
    BlockInfo(String),

    #[error("suspected file size for inode {id}: expected {expected}, got {actual}")]
    SuspectedFileSize {
        id: InodeId,
        expected: u64,
        actual: u64,
    },

    #[error("invalid column count: {0}")]
    TableColumn(String),

    #[error("invalid table metadata: {0}")]
    TableMetadata(String),

    // Durability errors
    #[error("durable write failed: {0}")]
    DurableWrite(String),

    #[error("journal corruption: {0}")]
    Corruption(String),

    #[error("journal in wrong state: {0}")]
    JournalState(String),

    #[error("journal failed, restart required: {0}")]
    JournalFailed(String),

    // Internal errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a path not found error
    pub fn path_not_found(path: impl ToString) -> Self {
        Self::PathNotFound(path.to_string())
    }

    /// Create an invalid path error
    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::InvalidPath(msg.into())
    }

    /// Create a durable write error
    pub fn durable_write(msg: impl Into<String>) -> Self {
        Self::DurableWrite(msg.into())
    }

    /// Create a corruption error
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::PathNotFound(_) | Self::IdNotFound(_))
    }

    /// Check if the error was raised by request validation.
    ///
    /// Validation errors are raised before the tree is touched, so the
    /// caller may retry with different arguments.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::PathNotFound(_)
                | Self::IdNotFound(_)
                | Self::InvalidPath(_)
                | Self::PathAlreadyExists(_)
                | Self::DirectoryNotEmpty(_)
                | Self::NotADirectory(_)
                | Self::NotAFile(_)
                | Self::NotATable(_)
                | Self::BlockInfo(_)
                | Self::SuspectedFileSize { .. }
                | Self::TableColumn(_)
                | Self::TableMetadata(_)
        )
    }

    /// Check if the error means the on-disk journal can no longer be
    /// trusted by this process
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DurableWrite(_) | Self::Corruption(_) | Self::JournalFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_not_found() {
        assert!(Error::PathNotFound("/a".into()).is_not_found());
        assert!(Error::IdNotFound(7).is_not_found());
        assert!(!Error::InvalidPath("a".into()).is_not_found());
    }

    #[test]
    fn test_error_classes() {
        assert!(Error::DirectoryNotEmpty("/d".into()).is_validation());
        assert!(!Error::DirectoryNotEmpty("/d".into()).is_fatal());
        assert!(Error::corruption("bad crc").is_fatal());
        assert!(Error::durable_write("disk gone").is_fatal());
        assert!(!Error::durable_write("disk gone").is_validation());
    }

    #[test]
    fn test_error_display() {
        let err = Error::SuspectedFileSize {
            id: 3,
            expected: 10,
            actual: 12,
        };
        assert_eq!(
            err.to_string(),
            "suspected file size for inode 3: expected 10, got 12"
        );
    }
}
