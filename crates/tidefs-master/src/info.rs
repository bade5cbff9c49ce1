//! Client-facing views of inodes

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tidefs_common::{BlockId, Error, FsPath, InodeId, Result, WorkerAddress};
use tidefs_journal::{Inode, InodeKind, NamespaceTree};

/// Volatile block locations reported by workers
pub type BlockLocations = HashMap<BlockId, BTreeSet<WorkerAddress>>;

/// Everything a client learns about one inode
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: InodeId,
    pub name: String,
    pub path: String,
    /// Under-storage copy, empty when not checkpointed
    pub ufs_path: String,
    pub length: u64,
    pub block_size: u64,
    pub creation_time_ms: u64,
    pub last_modification_time_ms: u64,
    pub complete: bool,
    pub folder: bool,
    pub pinned: bool,
    pub cache: bool,
    pub block_ids: Vec<BlockId>,
    /// Share of the file's bytes held by at least one worker
    pub in_memory_percentage: u32,
}

impl FileInfo {
    pub(crate) fn new(inode: &Inode, path: &FsPath, locations: &BlockLocations) -> Self {
        let mut info = Self {
            id: inode.id,
            name: inode.name.clone(),
            path: path.to_string(),
            ufs_path: String::new(),
            length: 0,
            block_size: 0,
            creation_time_ms: inode.creation_time_ms,
            last_modification_time_ms: inode.last_modification_time_ms,
            complete: true,
            folder: inode.is_directory(),
            pinned: inode.pinned,
            cache: true,
            block_ids: Vec::new(),
            in_memory_percentage: 100,
        };

        if let InodeKind::File(attrs) = &inode.kind {
            let cached: u64 = attrs
                .blocks
                .iter()
                .filter(|b| locations.get(&b.block_id).is_some_and(|w| !w.is_empty()))
                .map(|b| b.length)
                .sum();

            info.ufs_path = attrs.checkpoint_path.clone().unwrap_or_default();
            info.length = attrs.length;
            info.block_size = attrs.block_size;
            info.complete = attrs.complete;
            info.cache = attrs.cache;
            info.block_ids = attrs.block_ids();
            if attrs.length > 0 {
                #[allow(clippy::cast_possible_truncation)] // at most 100
                let percentage = (u128::from(cached) * 100 / u128::from(attrs.length)) as u32;
                info.in_memory_percentage = percentage;
            }
        }
        info
    }

    /// Info for inode `id` of `tree`
    pub(crate) fn of(tree: &NamespaceTree, id: InodeId, locations: &BlockLocations) -> Result<Self> {
        let inode = tree.get(id)?;
        let path = tree.path_of(id)?;
        Ok(Self::new(inode, &path, locations))
    }

    /// Info for every entry of a listing of `path`
    pub(crate) fn list(
        tree: &NamespaceTree,
        path: &FsPath,
        recursive: bool,
        locations: &BlockLocations,
    ) -> Result<Vec<Self>> {
        tree.list(path, recursive)?
            .into_iter()
            .map(|entry| -> Result<Self> { Ok(Self::new(tree.get(entry.id)?, &entry.path, locations)) })
            .collect()
    }
}

/// A table and its schema descriptor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub id: InodeId,
    pub name: String,
    pub path: String,
    pub columns: u32,
    pub metadata: Vec<u8>,
}

impl TableInfo {
    pub(crate) fn of(tree: &NamespaceTree, id: InodeId) -> Result<Self> {
        let inode = tree.get(id)?;
        let Some(table) = inode.as_table() else {
            return Err(Error::NotATable(id.to_string()));
        };
        Ok(Self {
            id,
            name: inode.name.clone(),
            path: tree.path_of(id)?.to_string(),
            columns: table.columns,
            metadata: table.metadata.clone(),
        })
    }
}
