//! tidefs Journal - Namespace durability and recovery
//!
//! This crate implements the durable half of the tidefs master:
//! - The in-memory namespace tree and its inode id allocator
//! - Journal entries, one per namespace mutation
//! - The segmented edit log with rotation and retention
//! - Full-tree images written at checkpoints
//! - The journal lifecycle that replays image + edit log on startup
//!
//! # Design
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                  Journal                      │
//! │   image.data        log.data   completed/     │
//! │   (tree @ txn N)    (active)   0.editLog ..   │
//! └───────────────────────────────────────────────┘
//!                       │ replay
//!                       ▼
//! ┌───────────────────────────────────────────────┐
//! │              NamespaceTree                    │
//! │   inodes by id, children by name, watermark   │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! All files go through an [`UnderFileSystem`]; [`LocalUfs`] keeps them on
//! local disk.

pub mod edit_log;
pub mod entry;
pub mod image;
pub mod inode;
pub mod journal;
pub mod tree;
pub mod ufs;

// Re-exports
pub use edit_log::{EditLog, LogRecord};
pub use entry::{JournalEntry, JournalOp};
pub use image::{Image, ImageHeader};
pub use inode::{BlockInfo, Children, FileAttrs, Inode, InodeKind, TableAttrs};
pub use journal::{Journal, JournalPaths, JournalState, RecoveryStats};
pub use tree::{IdAllocator, ListEntry, NamespaceTree};
pub use ufs::{LocalUfs, UfsWriter, UnderFileSystem};
