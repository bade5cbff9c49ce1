//! Metadata store
//!
//! The single entry point for namespace requests. Every mutation runs under
//! one lock: validate against the tree, apply the change, append the
//! matching journal entry. If an append fails the tree may hold a change
//! that never reached the log, so the store refuses all further requests
//! until the master restarts and recovers from the journal.

use crate::info::{BlockLocations, FileInfo, TableInfo};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tidefs_common::{
    BlockId, BlockReport, Config, Error, FsPath, InodeId, MasterConfig, Result, block_file_id,
    block_index,
};
use tidefs_journal::{
    Journal, JournalOp, JournalPaths, LocalUfs, NamespaceTree, RecoveryStats, UnderFileSystem,
};
use tracing::{debug, error, info};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

struct MasterState {
    tree: NamespaceTree,
    journal: Journal,
    locations: BlockLocations,
    /// Set once a journal append has failed
    failure: Option<String>,
}

impl MasterState {
    fn check_usable(&self) -> Result<()> {
        match &self.failure {
            Some(reason) => Err(Error::JournalFailed(reason.clone())),
            None => Ok(()),
        }
    }

    /// Journal the entries of a mutation already applied to the tree
    fn log(&mut self, time_ms: u64, ops: Vec<JournalOp>) -> Result<()> {
        for op in ops {
            let name = op.name();
            if let Err(e) = self.journal.append(time_ms, op) {
                error!("Journal append of {} failed, refusing further requests: {}", name, e);
                let reason = e.to_string();
                self.failure = Some(reason.clone());
                return Err(Error::JournalFailed(reason));
            }
        }
        Ok(())
    }

    fn info(&self, id: InodeId) -> Result<FileInfo> {
        FileInfo::of(&self.tree, id, &self.locations)
    }
}

/// Namespace service of the master
pub struct MetadataStore {
    config: MasterConfig,
    state: Mutex<MasterState>,
}

impl MetadataStore {
    /// Recover the namespace through `ufs` and start serving
    pub fn open(ufs: Arc<dyn UnderFileSystem>, config: &Config) -> Result<Self> {
        let (journal, tree) = Journal::open(ufs, config.journal.clone(), now_ms())?;
        info!(
            "Metadata store ready: {} inodes, txn {}",
            tree.len(),
            journal.last_txn()
        );
        Ok(Self {
            config: config.master.clone(),
            state: Mutex::new(MasterState {
                tree,
                journal,
                locations: BlockLocations::new(),
                failure: None,
            }),
        })
    }

    /// Recover from a journal on local disk
    pub fn open_local(config: &Config) -> Result<Self> {
        let ufs = LocalUfs::with_write_buffer_size(config.journal.write_buffer_size);
        Self::open(Arc::new(ufs), config)
    }

    /// Run `f` against the tree and journal what it returns
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut MasterState, u64) -> Result<(T, Vec<JournalOp>)>,
    ) -> Result<T> {
        let mut state = self.state.lock();
        state.check_usable()?;
        let time_ms = now_ms();
        let (value, ops) = f(&mut *state, time_ms)?;
        state.log(time_ms, ops)?;
        Ok(value)
    }

    fn read<T>(&self, f: impl FnOnce(&MasterState) -> Result<T>) -> Result<T> {
        let state = self.state.lock();
        state.check_usable()?;
        f(&*state)
    }

    /// Create an empty file of `block_size`-byte blocks
    pub fn create_file(&self, path: &FsPath, block_size: u64, recursive: bool) -> Result<InodeId> {
        let id = self.mutate(|state, time_ms| {
            let id = state
                .tree
                .create_file(path, recursive, block_size, true, time_ms)?;
            let op = JournalOp::CreateFile {
                id,
                path: path.clone(),
                recursive,
                block_size,
                cache: true,
            };
            Ok((id, vec![op]))
        })?;
        debug!("Created file {} as inode {}", path, id);
        Ok(id)
    }

    /// Create an empty file with the configured default block size
    pub fn create_file_default(&self, path: &FsPath, recursive: bool) -> Result<InodeId> {
        self.create_file(path, self.config.default_block_size, recursive)
    }

    /// Create a directory
    pub fn mkdirs(&self, path: &FsPath, recursive: bool) -> Result<InodeId> {
        let id = self.mutate(|state, time_ms| {
            let id = state.tree.create_directory(path, recursive, time_ms)?;
            let op = JournalOp::CreateDirectory {
                id,
                path: path.clone(),
                recursive,
            };
            Ok((id, vec![op]))
        })?;
        debug!("Created directory {} as inode {}", path, id);
        Ok(id)
    }

    fn check_table_metadata(&self, metadata: &[u8]) -> Result<()> {
        if metadata.len() > self.config.max_table_metadata_bytes {
            return Err(Error::TableMetadata(format!(
                "{} bytes exceeds the limit of {}",
                metadata.len(),
                self.config.max_table_metadata_bytes
            )));
        }
        Ok(())
    }

    /// Create a table with `columns` column directories
    pub fn create_table(&self, path: &FsPath, columns: u32, metadata: Vec<u8>) -> Result<InodeId> {
        if columns == 0 || columns >= self.config.max_columns {
            return Err(Error::TableColumn(format!(
                "{columns} columns, must be between 1 and {}",
                self.config.max_columns.saturating_sub(1)
            )));
        }
        self.check_table_metadata(&metadata)?;

        let id = self.mutate(|state, time_ms| {
            let id = state
                .tree
                .create_table(path, columns, metadata.clone(), time_ms)?;
            let op = JournalOp::CreateTable {
                id,
                path: path.clone(),
                columns,
                metadata,
            };
            Ok((id, vec![op]))
        })?;
        debug!("Created table {} with {} columns as inode {}", path, columns, id);
        Ok(id)
    }

    /// Replace a table's schema descriptor
    pub fn update_table_metadata(&self, id: InodeId, metadata: Vec<u8>) -> Result<()> {
        self.check_table_metadata(&metadata)?;
        self.mutate(|state, time_ms| {
            state
                .tree
                .update_table_metadata(id, metadata.clone(), time_ms)?;
            Ok(((), vec![JournalOp::UpdateTableMetadata { id, metadata }]))
        })
    }

    /// Delete an inode, and everything under it when `recursive`
    pub fn delete(&self, id: InodeId, recursive: bool) -> Result<()> {
        let removed = self.mutate(|state, time_ms| {
            let removed = state.tree.delete(id, recursive, time_ms)?;
            for inode in &removed {
                if let Some(attrs) = inode.as_file() {
                    for block in &attrs.blocks {
                        state.locations.remove(&block.block_id);
                    }
                }
            }
            Ok((removed.len(), vec![JournalOp::Delete { id, recursive }]))
        })?;
        debug!("Deleted inode {} ({} inodes removed)", id, removed);
        Ok(())
    }

    /// Delete by path
    pub fn delete_path(&self, path: &FsPath, recursive: bool) -> Result<()> {
        let id = self.lookup(path)?;
        self.delete(id, recursive)
    }

    /// Move an inode to `dst`
    pub fn rename(&self, id: InodeId, dst: &FsPath) -> Result<()> {
        self.mutate(|state, time_ms| {
            state.tree.rename(id, dst, time_ms)?;
            let op = JournalOp::Rename {
                id,
                dst: dst.clone(),
            };
            Ok(((), vec![op]))
        })?;
        debug!("Renamed inode {} to {}", id, dst);
        Ok(())
    }

    /// Rename by path
    pub fn rename_path(&self, src: &FsPath, dst: &FsPath) -> Result<()> {
        let id = self.lookup(src)?;
        self.rename(id, dst)
    }

    /// Pin or unpin exactly this inode
    pub fn set_pinned(&self, id: InodeId, pinned: bool) -> Result<()> {
        self.mutate(|state, time_ms| {
            state.tree.set_pinned(id, pinned, time_ms)?;
            Ok(((), vec![JournalOp::SetPinned { id, pinned }]))
        })
    }

    /// Append block `index` to a file
    pub fn add_block(&self, file_id: InodeId, index: u32, length: u64) -> Result<BlockId> {
        self.mutate(|state, _| {
            let block_id = state.tree.add_block(file_id, index, length)?;
            let op = JournalOp::AddBlock {
                file_id,
                index,
                length,
            };
            Ok((block_id, vec![op]))
        })
    }

    /// Record that a worker caches a block, adding the block to its file
    /// the first time it is reported
    pub fn cache_block(&self, report: &BlockReport) -> Result<()> {
        let file_id = block_file_id(report.block_id);
        let index = block_index(report.block_id);

        self.mutate(|state, _| {
            let inode = state.tree.get(file_id)?;
            let Some(attrs) = inode.as_file() else {
                return Err(Error::NotAFile(file_id.to_string()));
            };

            let ops = match attrs.block(index) {
                Some(block) if block.length != report.length => {
                    return Err(Error::BlockInfo(format!(
                        "block {} reported with length {}, known length {}",
                        report.block_id, report.length, block.length
                    )));
                }
                Some(_) => Vec::new(),
                None => {
                    state.tree.add_block(file_id, index, report.length)?;
                    vec![JournalOp::AddBlock {
                        file_id,
                        index,
                        length: report.length,
                    }]
                }
            };
            state
                .locations
                .entry(report.block_id)
                .or_default()
                .insert(report.location.clone());
            Ok(((), ops))
        })?;
        debug!("Block {} cached on {}", report.block_id, report.location);
        Ok(())
    }

    /// Mark a file complete
    pub fn complete_file(&self, file_id: InodeId) -> Result<()> {
        self.mutate(|state, time_ms| {
            let inode = state.tree.get(file_id)?;
            let Some(attrs) = inode.as_file() else {
                return Err(Error::NotAFile(file_id.to_string()));
            };
            if attrs.complete {
                return Ok(((), Vec::new()));
            }
            state.tree.complete_file(file_id, time_ms)?;
            Ok(((), vec![JournalOp::CompleteFile { file_id }]))
        })
    }

    /// Record the under-storage copy of a file; returns false when it was
    /// already recorded
    pub fn add_checkpoint(&self, file_id: InodeId, length: u64, checkpoint_path: &str) -> Result<bool> {
        self.mutate(|state, time_ms| {
            let changed = state
                .tree
                .add_checkpoint(file_id, length, checkpoint_path, time_ms)?;
            let ops = if changed {
                vec![JournalOp::AddCheckpoint {
                    file_id,
                    length,
                    checkpoint_path: checkpoint_path.to_string(),
                }]
            } else {
                Vec::new()
            };
            Ok((changed, ops))
        })
    }

    /// Create a complete file whose data already lives in under-storage
    pub fn import_from_ufs(
        &self,
        path: &FsPath,
        ufs_path: &str,
        length: u64,
        block_size: u64,
    ) -> Result<InodeId> {
        let id = self.mutate(|state, time_ms| {
            let id = state
                .tree
                .create_file(path, true, block_size, false, time_ms)?;
            state.tree.add_checkpoint(id, length, ufs_path, time_ms)?;
            let ops = vec![
                JournalOp::CreateFile {
                    id,
                    path: path.clone(),
                    recursive: true,
                    block_size,
                    cache: false,
                },
                JournalOp::AddCheckpoint {
                    file_id: id,
                    length,
                    checkpoint_path: ufs_path.to_string(),
                },
            ];
            Ok((id, ops))
        })?;
        info!("Imported {} from {} as inode {}", path, ufs_path, id);
        Ok(id)
    }

    /// Resolve a path
    pub fn lookup(&self, path: &FsPath) -> Result<InodeId> {
        self.read(|state| state.tree.resolve(path))
    }

    pub fn get_info(&self, id: InodeId) -> Result<FileInfo> {
        self.read(|state| state.info(id))
    }

    pub fn get_info_by_path(&self, path: &FsPath) -> Result<FileInfo> {
        self.read(|state| state.info(state.tree.resolve(path)?))
    }

    pub fn get_table_info(&self, id: InodeId) -> Result<TableInfo> {
        self.read(|state| TableInfo::of(&state.tree, id))
    }

    /// Paths under `path` in pre-order, starting with `path` itself
    pub fn list(&self, path: &FsPath, recursive: bool) -> Result<Vec<FsPath>> {
        self.read(|state| {
            let entries = state.tree.list(path, recursive)?;
            Ok(entries.into_iter().map(|e| e.path).collect())
        })
    }

    /// Like [`list`](Self::list) with full info for each entry
    pub fn list_info(&self, path: &FsPath, recursive: bool) -> Result<Vec<FileInfo>> {
        self.read(|state| FileInfo::list(&state.tree, path, recursive, &state.locations))
    }

    /// Image the namespace and start a fresh edit log
    pub fn checkpoint(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.check_usable()?;
        let MasterState { tree, journal, .. } = &mut *state;
        journal.checkpoint(tree)
    }

    /// Change the edit log rotation threshold
    pub fn set_max_log_size(&self, size: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.check_usable()?;
        state.journal.set_max_log_size(size)
    }

    pub fn journal_paths(&self) -> JournalPaths {
        self.state.lock().journal.paths()
    }

    pub fn recovery_stats(&self) -> RecoveryStats {
        self.state.lock().journal.recovery_stats().clone()
    }

    /// Write the final image and close the journal
    pub fn stop(self) -> Result<()> {
        let state = self.state.into_inner();
        state.check_usable()?;
        state.journal.stop(&state.tree)?;
        info!("Metadata store stopped");
        Ok(())
    }
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
