//! Read-only namespace view
//!
//! Recovers the namespace the same way the metadata store does but never
//! writes: no checkpoint, no new edit log, no retention. Meant for
//! inspecting a journal that no master has open.

use crate::info::{BlockLocations, FileInfo, TableInfo};
use std::time::{SystemTime, UNIX_EPOCH};
use tidefs_common::{FsPath, InodeId, JournalConfig, Result};
use tidefs_journal::{Journal, LocalUfs, NamespaceTree, RecoveryStats, UnderFileSystem};
use tracing::info;

/// A recovered namespace with no journal attached
#[derive(Debug)]
pub struct NamespaceView {
    tree: NamespaceTree,
    /// Always empty; block locations are never journaled
    locations: BlockLocations,
    recovery: RecoveryStats,
}

impl NamespaceView {
    /// Recover the namespace through `ufs` without modifying it
    pub fn load(ufs: &dyn UnderFileSystem, config: &JournalConfig) -> Result<Self> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        let (tree, recovery) = Journal::inspect(ufs, config, now_ms)?;
        info!(
            "Loaded read-only view of {}: {} inodes",
            config.folder.display(),
            tree.len()
        );
        Ok(Self {
            tree,
            locations: BlockLocations::new(),
            recovery,
        })
    }

    /// Recover from a journal on local disk
    pub fn load_local(config: &JournalConfig) -> Result<Self> {
        Self::load(&LocalUfs::new(), config)
    }

    pub fn lookup(&self, path: &FsPath) -> Result<InodeId> {
        self.tree.resolve(path)
    }

    pub fn get_info(&self, id: InodeId) -> Result<FileInfo> {
        FileInfo::of(&self.tree, id, &self.locations)
    }

    pub fn get_info_by_path(&self, path: &FsPath) -> Result<FileInfo> {
        self.get_info(self.lookup(path)?)
    }

    pub fn get_table_info(&self, id: InodeId) -> Result<TableInfo> {
        TableInfo::of(&self.tree, id)
    }

    /// Like [`MetadataStore::list_info`](crate::MetadataStore::list_info)
    pub fn list_info(&self, path: &FsPath, recursive: bool) -> Result<Vec<FileInfo>> {
        FileInfo::list(&self.tree, path, recursive, &self.locations)
    }

    #[must_use]
    pub const fn recovery_stats(&self) -> &RecoveryStats {
        &self.recovery
    }
}
