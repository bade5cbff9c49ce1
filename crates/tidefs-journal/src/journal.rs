//! Journal lifecycle
//!
//! A journal owns one image location and one edit log. Opening it recovers
//! the namespace (image, then completed segments, then the active segment),
//! checkpoints, and leaves the journal live for appends:
//!
//! ```text
//! Closed --open--> Recovering --replayed--> Live --stop--> Stopped
//! ```

use crate::edit_log::{self, EditLog};
use crate::entry::{JournalEntry, JournalOp};
use crate::image;
use crate::tree::NamespaceTree;
use crate::ufs::UnderFileSystem;
use std::path::PathBuf;
use std::sync::Arc;
use tidefs_common::{Error, JournalConfig, Result, TxnId};
use tracing::{debug, info, warn};

/// Lifecycle state of a journal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JournalState {
    Closed,
    Recovering,
    Live,
    Stopped,
}

/// Where a journal keeps its files
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalPaths {
    pub image: PathBuf,
    pub log: PathBuf,
    pub completed: PathBuf,
}

/// What recovery found
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Last transaction covered by the loaded image
    pub image_txn: TxnId,
    /// Segments read, active one included
    pub segments: usize,
    /// Entries applied to the tree
    pub replayed: u64,
    /// Entries already covered by the image
    pub skipped: u64,
}

/// Durable journal of namespace mutations
pub struct Journal {
    ufs: Arc<dyn UnderFileSystem>,
    config: JournalConfig,
    state: JournalState,
    log: Option<EditLog>,
    last_txn: TxnId,
    recovery: RecoveryStats,
}

impl Journal {
    /// Recover the namespace from `config.folder` and go live.
    ///
    /// `now_ms` stamps the root when there is no image yet.
    pub fn open(
        ufs: Arc<dyn UnderFileSystem>,
        config: JournalConfig,
        now_ms: u64,
    ) -> Result<(Self, NamespaceTree)> {
        config.validate()?;
        ufs.mkdirs(&config.folder).map_err(|e| {
            Error::durable_write(format!(
                "failed to create journal folder {}: {e}",
                config.folder.display()
            ))
        })?;

        let mut journal = Self {
            ufs,
            config,
            state: JournalState::Closed,
            log: None,
            last_txn: 0,
            recovery: RecoveryStats::default(),
        };
        let tree = journal.recover(now_ms)?;
        journal.write_checkpoint(&tree)?;
        journal.state = JournalState::Live;

        info!(
            "Journal {} live at txn {} with {} inodes",
            journal.config.folder.display(),
            journal.last_txn,
            tree.len()
        );
        Ok((journal, tree))
    }

    fn recover(&mut self, now_ms: u64) -> Result<NamespaceTree> {
        self.state = JournalState::Recovering;
        info!("Recovering journal from {}", self.config.folder.display());

        if let Some(start) = self.config.retain_from {
            edit_log::retain_from(self.ufs.as_ref(), &self.config, start)?;
        }
        let (tree, last, stats) = replay(self.ufs.as_ref(), &self.config, now_ms)?;
        self.last_txn = last;
        self.recovery = stats;
        Ok(tree)
    }

    /// Recover the namespace without writing anything.
    ///
    /// Neither the image nor any segment is touched, and `retain_from` is
    /// not applied. The folder may be missing, which reads as an empty
    /// namespace.
    pub fn inspect(
        ufs: &dyn UnderFileSystem,
        config: &JournalConfig,
        now_ms: u64,
    ) -> Result<(NamespaceTree, RecoveryStats)> {
        config.validate()?;
        let (tree, _, stats) = replay(ufs, config, now_ms)?;
        Ok((tree, stats))
    }

    /// Write an image of `tree`, drop the segments it subsumes and start a
    /// fresh active segment
    fn write_checkpoint(&mut self, tree: &NamespaceTree) -> Result<()> {
        let max_log_size = self
            .log
            .as_ref()
            .map_or(self.config.max_log_size, EditLog::max_log_size);
        if let Some(log) = self.log.as_mut() {
            log.close()?;
        }
        self.log = None;

        image::write_image(self.ufs.as_ref(), &self.config.image_path(), tree, self.last_txn)?;
        self.ufs
            .delete(&self.config.completed_path(), true)
            .map_err(|e| Error::durable_write(format!("failed to discard completed segments: {e}")))?;

        let mut log = EditLog::create(Arc::clone(&self.ufs), self.config.clone(), self.last_txn)?;
        log.set_max_log_size(max_log_size)?;
        self.log = Some(log);
        debug!("Checkpointed journal at txn {}", self.last_txn);
        Ok(())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.state == JournalState::Live {
            Ok(())
        } else {
            Err(Error::JournalState(format!(
                "journal is {:?}, expected Live",
                self.state
            )))
        }
    }

    fn log_mut(&mut self) -> Result<&mut EditLog> {
        self.log
            .as_mut()
            .ok_or_else(|| Error::JournalState("journal has no open edit log".into()))
    }

    /// Durably log one mutation; returns its transaction id
    pub fn append(&mut self, op_time_ms: u64, op: JournalOp) -> Result<TxnId> {
        self.ensure_live()?;
        let txn_id = self.last_txn + 1;
        let entry = JournalEntry::new(txn_id, op_time_ms, op);
        self.log_mut()?.append(&entry)?;
        self.last_txn = txn_id;
        debug!("Journaled txn {} ({})", txn_id, entry.op.name());
        Ok(txn_id)
    }

    /// Force buffered entries to durable storage
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.log_mut()?.flush()
    }

    /// Image `tree` and start over with an empty edit log
    pub fn checkpoint(&mut self, tree: &NamespaceTree) -> Result<()> {
        self.ensure_live()?;
        self.write_checkpoint(tree)?;
        info!("Checkpointed journal at txn {}", self.last_txn);
        Ok(())
    }

    /// Write the final image and close the edit log.
    ///
    /// Completed segments stay on disk; the next open discards them.
    pub fn stop(mut self, tree: &NamespaceTree) -> Result<()> {
        self.ensure_live()?;
        self.log_mut()?.close()?;
        image::write_image(self.ufs.as_ref(), &self.config.image_path(), tree, self.last_txn)?;
        self.state = JournalState::Stopped;
        info!("Stopped journal at txn {}", self.last_txn);
        Ok(())
    }

    /// Change the segment rotation threshold
    pub fn set_max_log_size(&mut self, size: u64) -> Result<()> {
        self.ensure_live()?;
        self.log_mut()?.set_max_log_size(size)
    }

    #[must_use]
    pub const fn state(&self) -> JournalState {
        self.state
    }

    #[must_use]
    pub const fn last_txn(&self) -> TxnId {
        self.last_txn
    }

    #[must_use]
    pub const fn recovery_stats(&self) -> &RecoveryStats {
        &self.recovery
    }

    #[must_use]
    pub const fn config(&self) -> &JournalConfig {
        &self.config
    }

    #[must_use]
    pub fn paths(&self) -> JournalPaths {
        JournalPaths {
            image: self.config.image_path(),
            log: self.config.log_path(),
            completed: self.config.completed_path(),
        }
    }
}

/// Load the image and replay every segment over it; returns the tree and
/// the last transaction applied
fn replay(
    ufs: &dyn UnderFileSystem,
    config: &JournalConfig,
    now_ms: u64,
) -> Result<(NamespaceTree, TxnId, RecoveryStats)> {
    let (mut tree, image_txn) = match image::read_image(ufs, &config.image_path())? {
        Some(image) => {
            let txn = image.last_txn();
            (image.tree, txn)
        }
        None => {
            info!("No image found, starting from an empty namespace");
            (NamespaceTree::new(now_ms), 0)
        }
    };

    let mut stats = RecoveryStats {
        image_txn,
        ..Default::default()
    };
    let mut last = image_txn;
    let segments = edit_log::for_each_entry(ufs, config, |path, entry| {
        if entry.txn_id <= image_txn {
            stats.skipped += 1;
            return Ok(());
        }
        if entry.txn_id != last + 1 {
            return Err(Error::corruption(format!(
                "{}: expected txn {}, found txn {}",
                path.display(),
                last + 1,
                entry.txn_id
            )));
        }
        tree.apply(&entry).map_err(|e| replay_error(path, &entry, e))?;
        last = entry.txn_id;
        stats.replayed += 1;
        Ok(())
    })?;
    stats.segments = segments;

    info!(
        "Replayed {} entries from {} segments ({} already in image at txn {})",
        stats.replayed, stats.segments, stats.skipped, image_txn
    );
    Ok((tree, last, stats))
}

fn replay_error(path: &std::path::Path, entry: &JournalEntry, err: Error) -> Error {
    match err {
        Error::Corruption(_) => err,
        other => Error::corruption(format!(
            "{}: txn {} ({}) does not replay: {other}",
            path.display(),
            entry.txn_id,
            entry.op.name()
        )),
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        if self.state != JournalState::Live {
            return;
        }
        if let Some(log) = self.log.as_mut() {
            if let Err(e) = log.close() {
                warn!("Failed to close edit log on drop: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("folder", &self.config.folder)
            .field("state", &self.state)
            .field("last_txn", &self.last_txn)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit_log::LogRecord;
    use crate::ufs::LocalUfs;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::path::Path;
    use tempfile::tempdir;
    use tidefs_common::{FsPath, InodeId, ROOT_INODE_ID};

    fn config(dir: &Path) -> JournalConfig {
        let mut config = JournalConfig::with_folder(dir);
        config.sync_on_write = false;
        config
    }

    fn open(dir: &Path) -> (Journal, NamespaceTree) {
        Journal::open(Arc::new(LocalUfs::new()), config(dir), 0).unwrap()
    }

    fn p(path: &str) -> FsPath {
        FsPath::parse(path).unwrap()
    }

    /// Create a file through both the tree and the journal
    fn create(journal: &mut Journal, tree: &mut NamespaceTree, path: &str, time: u64) -> InodeId {
        let path = p(path);
        let id = tree.create_file(&path, false, 64, true, time).unwrap();
        journal
            .append(
                time,
                JournalOp::CreateFile {
                    id,
                    path,
                    recursive: false,
                    block_size: 64,
                    cache: true,
                },
            )
            .unwrap();
        id
    }

    #[test]
    fn test_open_empty_folder() {
        let dir = tempdir().unwrap();
        let (journal, tree) = open(dir.path());
        assert_eq!(journal.state(), JournalState::Live);
        assert_eq!(tree.len(), 1);
        assert_eq!(journal.last_txn(), 0);
        assert!(dir.path().join("image.data").exists());
        assert!(dir.path().join("log.data").exists());
    }

    #[test]
    fn test_open_creates_missing_folder() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("fresh");
        let (journal, tree) = open(&folder);
        assert_eq!(tree.len(), 1);
        assert!(folder.join("image.data").exists());
        journal.stop(&tree).unwrap();

        let (journal, reopened) = open(&folder);
        assert_eq!(reopened, tree);
        assert_eq!(journal.last_txn(), 0);
    }

    #[test]
    fn test_inspect_writes_nothing() {
        let dir = tempdir().unwrap();
        let (mut journal, mut tree) = open(dir.path());
        journal.set_max_log_size(200).unwrap();
        for i in 0..20 {
            create(&mut journal, &mut tree, &format!("/f{i}"), i);
        }
        journal.flush().unwrap();
        drop(journal);

        let cfg = config(dir.path());
        let ufs = LocalUfs::new();
        let segments = edit_log::completed_segments(&ufs, &cfg).unwrap();
        assert!(!segments.is_empty());
        let log_len = std::fs::metadata(cfg.log_path()).unwrap().len();
        let image = std::fs::read(cfg.image_path()).unwrap();

        let (inspected, stats) = Journal::inspect(&ufs, &cfg, 0).unwrap();
        assert_eq!(inspected, tree);
        assert_eq!(stats.replayed, 20);

        assert_eq!(edit_log::completed_segments(&ufs, &cfg).unwrap(), segments);
        assert_eq!(std::fs::metadata(cfg.log_path()).unwrap().len(), log_len);
        assert_eq!(std::fs::read(cfg.image_path()).unwrap(), image);
    }

    #[test]
    fn test_inspect_missing_folder() {
        let dir = tempdir().unwrap();
        let cfg = config(&dir.path().join("absent"));
        let (tree, stats) = Journal::inspect(&LocalUfs::new(), &cfg, 0).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(stats, RecoveryStats::default());
        assert!(!dir.path().join("absent").exists());
    }

    #[test]
    fn test_stop_and_reopen() {
        let dir = tempdir().unwrap();
        let (mut journal, mut tree) = open(dir.path());
        for i in 0..10 {
            create(&mut journal, &mut tree, &format!("/f{i}"), 100 + i);
        }
        assert_eq!(journal.last_txn(), 10);
        journal.stop(&tree).unwrap();

        let (journal, reopened) = open(dir.path());
        assert_eq!(reopened, tree);
        assert_eq!(journal.last_txn(), 10);
        assert_eq!(journal.recovery_stats().skipped, 10);
        assert_eq!(journal.recovery_stats().replayed, 0);
    }

    #[test]
    fn test_replay_without_image() {
        let dir = tempdir().unwrap();
        let (mut journal, mut tree) = open(dir.path());
        for i in 0..5 {
            create(&mut journal, &mut tree, &format!("/f{i}"), 10 + i);
        }
        journal.flush().unwrap();
        // crash: nothing imaged beyond the empty namespace
        drop(journal);

        let (journal, replayed) = open(dir.path());
        assert_eq!(replayed, tree);
        assert_eq!(journal.recovery_stats().replayed, 5);
    }

    #[test]
    fn test_checkpoint_discards_segments() {
        let dir = tempdir().unwrap();
        let (mut journal, mut tree) = open(dir.path());
        journal.set_max_log_size(200).unwrap();
        for i in 0..20 {
            create(&mut journal, &mut tree, &format!("/f{i}"), i);
        }
        let cfg = journal.config().clone();
        let ufs = LocalUfs::new();
        assert!(!edit_log::completed_segments(&ufs, &cfg).unwrap().is_empty());

        journal.checkpoint(&tree).unwrap();
        assert!(edit_log::completed_segments(&ufs, &cfg).unwrap().is_empty());
        assert_eq!(std::fs::metadata(cfg.log_path()).unwrap().len(), 0);

        create(&mut journal, &mut tree, "/after", 99);
        drop(journal);
        let (_journal, reopened) = open(dir.path());
        assert_eq!(reopened, tree);
    }

    #[test]
    fn test_gap_is_corruption() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        std::fs::create_dir_all(dir.path()).unwrap();

        let mut bytes = Vec::new();
        for (txn, id) in [(1, 2), (3, 3)] {
            let entry = JournalEntry::new(
                txn,
                0,
                JournalOp::CreateDirectory {
                    id,
                    path: p(&format!("/d{id}")),
                    recursive: false,
                },
            );
            bytes.extend(LogRecord::encode(&entry).unwrap().to_bytes());
        }
        std::fs::write(cfg.log_path(), bytes).unwrap();

        let result = Journal::open(Arc::new(LocalUfs::new()), cfg, 0);
        assert!(matches!(result, Err(Error::Corruption(_))));
    }

    #[test]
    fn test_unreplayable_entry_is_corruption() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        let entry = JournalEntry::new(1, 0, JournalOp::Delete { id: 42, recursive: true });
        std::fs::write(cfg.log_path(), LogRecord::encode(&entry).unwrap().to_bytes()).unwrap();

        let result = Journal::open(Arc::new(LocalUfs::new()), cfg, 0);
        assert!(matches!(result, Err(Error::Corruption(_))));
    }

    #[test]
    fn test_randomized_history_replays_identically() {
        let dir = tempdir().unwrap();
        let (mut journal, mut tree) = open(dir.path());
        journal.set_max_log_size(2048).unwrap();
        let mut rng = StdRng::seed_from_u64(0x7105);
        let mut time = 1_000;

        for _ in 0..400 {
            time += 1;
            let known: Vec<InodeId> = tree.preorder().iter().map(|i| i.id).collect();
            let target = known[rng.gen_range(0..known.len())];
            let name = format!("n{}", rng.gen_range(0..30));
            let op = match rng.gen_range(0..6) {
                0 | 1 => tree.path_of(target).and_then(|dir| dir.join(&name)).and_then(|path| {
                    let id = tree.create_directory(&path, false, time)?;
                    Ok(JournalOp::CreateDirectory { id, path, recursive: false })
                }),
                2 => tree.path_of(target).and_then(|dir| dir.join(&name)).and_then(|path| {
                    let id = tree.create_file(&path, false, 64, true, time)?;
                    Ok(JournalOp::CreateFile {
                        id,
                        path,
                        recursive: false,
                        block_size: 64,
                        cache: true,
                    })
                }),
                3 => {
                    let pinned = rng.gen_bool(0.5);
                    tree.set_pinned(target, pinned, time)
                        .map(|()| JournalOp::SetPinned { id: target, pinned })
                }
                4 => {
                    let dst = p(&format!("/{name}"));
                    tree.rename(target, &dst, time)
                        .map(|()| JournalOp::Rename { id: target, dst })
                }
                _ if target != ROOT_INODE_ID => {
                    let recursive = rng.gen_bool(0.3);
                    tree.delete(target, recursive, time)
                        .map(|_| JournalOp::Delete { id: target, recursive })
                }
                _ => continue,
            };
            if let Ok(op) = op {
                journal.append(time, op).unwrap();
            }
        }
        journal.flush().unwrap();
        drop(journal);

        // replay everything from the edit log
        let (journal, replayed) = open(dir.path());
        assert_eq!(replayed, tree);
        journal.stop(&replayed).unwrap();

        // and again from the image alone
        let (_journal, reimaged) = open(dir.path());
        assert_eq!(reimaged, tree);
    }

    #[test]
    fn test_stopped_journal_rejects_reuse_via_state() {
        let dir = tempdir().unwrap();
        let (mut journal, tree) = open(dir.path());
        journal.state = JournalState::Stopped;
        assert!(matches!(
            journal.append(0, JournalOp::CompleteFile { file_id: 1 }),
            Err(Error::JournalState(_))
        ));
        assert!(journal.checkpoint(&tree).is_err());
    }

    #[test]
    fn test_retain_from_on_open() {
        let dir = tempdir().unwrap();
        let (mut journal, mut tree) = open(dir.path());
        for i in 0..3 {
            create(&mut journal, &mut tree, &format!("/f{i}"), i);
        }
        journal.stop(&tree).unwrap();

        let mut cfg = config(dir.path());
        cfg.retain_from = Some(0);
        let (_journal, reopened) = Journal::open(Arc::new(LocalUfs::new()), cfg, 0).unwrap();
        assert_eq!(reopened, tree);
    }
}
