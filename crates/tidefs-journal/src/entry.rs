//! Journal entries
//!
//! One entry per namespace mutation, carrying everything needed to repeat
//! the mutation on replay. Entries that create inodes carry the id the
//! creation produced so replay can check it lands on the same id.

use serde::{Deserialize, Serialize};
use tidefs_common::{FsPath, InodeId, TxnId};

/// A namespace mutation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalOp {
    /// Create a file; `recursive` also creates missing ancestors
    CreateFile {
        id: InodeId,
        path: FsPath,
        recursive: bool,
        block_size: u64,
        cache: bool,
    },
    /// Create a directory; `recursive` also creates missing ancestors
    CreateDirectory {
        id: InodeId,
        path: FsPath,
        recursive: bool,
    },
    /// Create a table and its column directories
    CreateTable {
        id: InodeId,
        path: FsPath,
        columns: u32,
        metadata: Vec<u8>,
    },
    UpdateTableMetadata {
        id: InodeId,
        metadata: Vec<u8>,
    },
    AddBlock {
        file_id: InodeId,
        index: u32,
        length: u64,
    },
    AddCheckpoint {
        file_id: InodeId,
        length: u64,
        checkpoint_path: String,
    },
    CompleteFile {
        file_id: InodeId,
    },
    SetPinned {
        id: InodeId,
        pinned: bool,
    },
    Rename {
        id: InodeId,
        dst: FsPath,
    },
    Delete {
        id: InodeId,
        recursive: bool,
    },
}

impl JournalOp {
    /// Short name for logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateFile { .. } => "create_file",
            Self::CreateDirectory { .. } => "create_directory",
            Self::CreateTable { .. } => "create_table",
            Self::UpdateTableMetadata { .. } => "update_table_metadata",
            Self::AddBlock { .. } => "add_block",
            Self::AddCheckpoint { .. } => "add_checkpoint",
            Self::CompleteFile { .. } => "complete_file",
            Self::SetPinned { .. } => "set_pinned",
            Self::Rename { .. } => "rename",
            Self::Delete { .. } => "delete",
        }
    }

    /// Highest inode id this mutation names
    #[must_use]
    pub const fn max_referenced_id(&self) -> InodeId {
        match self {
            Self::CreateTable { id, columns, .. } => *id + *columns as InodeId,
            Self::CreateFile { id, .. }
            | Self::CreateDirectory { id, .. }
            | Self::UpdateTableMetadata { id, .. }
            | Self::SetPinned { id, .. }
            | Self::Rename { id, .. }
            | Self::Delete { id, .. } => *id,
            Self::AddBlock { file_id, .. }
            | Self::AddCheckpoint { file_id, .. }
            | Self::CompleteFile { file_id } => *file_id,
        }
    }
}

/// A journaled mutation with its sequence number and time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub txn_id: TxnId,
    pub op_time_ms: u64,
    pub op: JournalOp,
}

impl JournalEntry {
    #[must_use]
    pub const fn new(txn_id: TxnId, op_time_ms: u64, op: JournalOp) -> Self {
        Self {
            txn_id,
            op_time_ms,
            op,
        }
    }
}
