//! Core identifiers for tidefs
//!
//! Inode ids are allocated by the master and never reused. Block ids are
//! derived from the owning file id and the block's index in that file, so a
//! worker reporting a block id is enough to find the file it belongs to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Inode identifier, unique for the lifetime of a namespace
pub type InodeId = u64;

/// Globally unique block identifier
pub type BlockId = u64;

/// Journal transaction sequence number
pub type TxnId = u64;

/// Id of the root directory in every namespace
pub const ROOT_INODE_ID: InodeId = 1;

/// Bits reserved for the block index inside a block id
pub const BLOCK_INDEX_BITS: u32 = 30;

/// Largest block index a single file may carry
pub const MAX_BLOCK_INDEX: u32 = (1 << BLOCK_INDEX_BITS) - 1;

/// Name prefix for table column directories (`COL_0`, `COL_1`, ...)
pub const TABLE_COLUMN_PREFIX: &str = "COL_";

/// Compute the block id for block `index` of file `file_id`
#[must_use]
pub const fn compute_block_id(file_id: InodeId, index: u32) -> BlockId {
    (file_id << BLOCK_INDEX_BITS) + index as u64
}

/// Recover the owning file id from a block id
#[must_use]
pub const fn block_file_id(block_id: BlockId) -> InodeId {
    block_id >> BLOCK_INDEX_BITS
}

/// Recover the block index from a block id
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn block_index(block_id: BlockId) -> u32 {
    (block_id & MAX_BLOCK_INDEX as u64) as u32
}

/// Name of the directory holding column `index` of a table
#[must_use]
pub fn table_column_name(index: u32) -> String {
    format!("{TABLE_COLUMN_PREFIX}{index}")
}

/// Network address of a worker holding a block replica
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerAddress {
    pub host: String,
    pub port: u16,
}

impl WorkerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A block report from the worker tier
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockReport {
    /// Block id, see [`compute_block_id`]
    pub block_id: BlockId,
    /// Block length in bytes
    pub length: u64,
    /// Worker now caching the block
    pub location: WorkerAddress,
}
