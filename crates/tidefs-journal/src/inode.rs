//! Inode model
//!
//! An inode is a directory, a file or a table. Kind-specific state lives in
//! the [`InodeKind`] payload; tables are directory-like and hold one child
//! directory per column.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tidefs_common::{BlockId, Error, InodeId, Result, compute_block_id};

/// Children of a directory or table, ordered by name
pub type Children = BTreeMap<String, InodeId>;

/// Metadata of one block of a file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Position of the block in the file
    pub index: u32,
    /// Globally unique block id
    pub block_id: BlockId,
    /// Byte offset of the block in the file
    pub offset: u64,
    /// Block length in bytes
    pub length: u64,
}

/// File payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttrs {
    pub block_size: u64,
    pub length: u64,
    pub complete: bool,
    /// False for files written straight through to under-storage
    pub cache: bool,
    /// Under-storage copy of the file, once checkpointed
    pub checkpoint_path: Option<String>,
    pub blocks: Vec<BlockInfo>,
}

impl FileAttrs {
    #[must_use]
    pub const fn new(block_size: u64, cache: bool) -> Self {
        Self {
            block_size,
            length: 0,
            complete: false,
            cache,
            checkpoint_path: None,
            blocks: Vec::new(),
        }
    }

    /// Validate and append the next block of file `file_id`
    pub fn add_block(&mut self, file_id: InodeId, index: u32, length: u64) -> Result<BlockId> {
        if self.complete {
            return Err(Error::BlockInfo(format!("file {file_id} is already complete")));
        }
        if let Some(last) = self.blocks.last() {
            if last.length != self.block_size {
                return Err(Error::BlockInfo(format!(
                    "file {file_id}: previous block {} is short ({} of {} bytes)",
                    last.index, last.length, self.block_size
                )));
            }
        }
        if index as usize != self.blocks.len() {
            return Err(Error::BlockInfo(format!(
                "file {file_id}: expected block index {}, got {index}",
                self.blocks.len()
            )));
        }
        if length > self.block_size {
            return Err(Error::BlockInfo(format!(
                "file {file_id}: block length {length} exceeds block size {}",
                self.block_size
            )));
        }

        let block_id = compute_block_id(file_id, index);
        self.blocks.push(BlockInfo {
            index,
            block_id,
            offset: u64::from(index) * self.block_size,
            length,
        });
        self.length += length;
        Ok(block_id)
    }

    /// Find a block by index
    #[must_use]
    pub fn block(&self, index: u32) -> Option<&BlockInfo> {
        self.blocks.get(index as usize)
    }

    #[must_use]
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks.iter().map(|b| b.block_id).collect()
    }
}

/// Table payload
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableAttrs {
    /// Column directories and any other children
    pub children: Children,
    pub columns: u32,
    /// Opaque schema descriptor supplied by the client
    pub metadata: Vec<u8>,
}

/// Kind-specific inode state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InodeKind {
    Directory { children: Children },
    File(FileAttrs),
    Table(TableAttrs),
}

/// A namespace entity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    pub id: InodeId,
    /// `None` only for the root
    pub parent: Option<InodeId>,
    pub name: String,
    pub pinned: bool,
    pub creation_time_ms: u64,
    pub last_modification_time_ms: u64,
    pub kind: InodeKind,
}

impl Inode {
    /// Create an empty directory
    pub fn directory(id: InodeId, parent: Option<InodeId>, name: impl Into<String>, time_ms: u64) -> Self {
        Self::new(
            id,
            parent,
            name.into(),
            time_ms,
            InodeKind::Directory {
                children: Children::new(),
            },
        )
    }

    /// Create an empty file
    pub fn file(id: InodeId, parent: InodeId, name: impl Into<String>, time_ms: u64, attrs: FileAttrs) -> Self {
        Self::new(id, Some(parent), name.into(), time_ms, InodeKind::File(attrs))
    }

    /// Create a table without columns
    pub fn table(
        id: InodeId,
        parent: InodeId,
        name: impl Into<String>,
        time_ms: u64,
        columns: u32,
        metadata: Vec<u8>,
    ) -> Self {
        Self::new(
            id,
            Some(parent),
            name.into(),
            time_ms,
            InodeKind::Table(TableAttrs {
                children: Children::new(),
                columns,
                metadata,
            }),
        )
    }

    const fn new(id: InodeId, parent: Option<InodeId>, name: String, time_ms: u64, kind: InodeKind) -> Self {
        Self {
            id,
            parent,
            name,
            pinned: false,
            creation_time_ms: time_ms,
            last_modification_time_ms: time_ms,
            kind,
        }
    }

    /// Directories and tables both hold children
    #[must_use]
    pub const fn is_directory(&self) -> bool {
        matches!(self.kind, InodeKind::Directory { .. } | InodeKind::Table(_))
    }

    #[must_use]
    pub const fn is_file(&self) -> bool {
        matches!(self.kind, InodeKind::File(_))
    }

    #[must_use]
    pub const fn is_table(&self) -> bool {
        matches!(self.kind, InodeKind::Table(_))
    }

    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self.kind {
            InodeKind::Directory { .. } => "directory",
            InodeKind::File(_) => "file",
            InodeKind::Table(_) => "table",
        }
    }

    #[must_use]
    pub const fn children(&self) -> Option<&Children> {
        match &self.kind {
            InodeKind::Directory { children } | InodeKind::Table(TableAttrs { children, .. }) => {
                Some(children)
            }
            InodeKind::File(_) => None,
        }
    }

    pub const fn children_mut(&mut self) -> Option<&mut Children> {
        match &mut self.kind {
            InodeKind::Directory { children } | InodeKind::Table(TableAttrs { children, .. }) => {
                Some(children)
            }
            InodeKind::File(_) => None,
        }
    }

    #[must_use]
    pub const fn as_file(&self) -> Option<&FileAttrs> {
        match &self.kind {
            InodeKind::File(attrs) => Some(attrs),
            _ => None,
        }
    }

    pub const fn as_file_mut(&mut self) -> Option<&mut FileAttrs> {
        match &mut self.kind {
            InodeKind::File(attrs) => Some(attrs),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_table(&self) -> Option<&TableAttrs> {
        match &self.kind {
            InodeKind::Table(attrs) => Some(attrs),
            _ => None,
        }
    }

    pub const fn as_table_mut(&mut self) -> Option<&mut TableAttrs> {
        match &mut self.kind {
            InodeKind::Table(attrs) => Some(attrs),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_blocks_in_order() {
        let mut attrs = FileAttrs::new(64, true);
        assert_eq!(attrs.add_block(3, 0, 64).unwrap(), compute_block_id(3, 0));
        attrs.add_block(3, 1, 40).unwrap();
        assert_eq!(attrs.length, 104);
        assert_eq!(attrs.block(1).unwrap().offset, 64);
        assert_eq!(attrs.block_ids().len(), 2);
    }

    #[test]
    fn test_add_block_rejects_bad_blocks() {
        let mut attrs = FileAttrs::new(64, true);
        assert!(matches!(attrs.add_block(3, 1, 64), Err(Error::BlockInfo(_))));
        assert!(matches!(attrs.add_block(3, 0, 65), Err(Error::BlockInfo(_))));

        attrs.add_block(3, 0, 10).unwrap();
        // a short block must be the last one
        assert!(matches!(attrs.add_block(3, 1, 10), Err(Error::BlockInfo(_))));

        let mut done = FileAttrs::new(64, true);
        done.complete = true;
        assert!(matches!(done.add_block(3, 0, 1), Err(Error::BlockInfo(_))));
    }

    #[test]
    fn test_kinds() {
        let dir = Inode::directory(1, None, "", 0);
        let file = Inode::file(2, 1, "f", 0, FileAttrs::new(64, true));
        let table = Inode::table(3, 1, "t", 0, 2, vec![1, 2]);

        assert!(dir.is_directory() && !dir.is_file());
        assert!(file.is_file() && file.children().is_none());
        assert!(table.is_directory() && table.is_table());
        assert_eq!(table.as_table().unwrap().metadata, vec![1, 2]);
        assert_eq!(file.kind_name(), "file");
    }
}
