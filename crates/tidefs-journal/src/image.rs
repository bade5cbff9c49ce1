//! Namespace image
//!
//! A full copy of the tree written at checkpoints. The file is a fixed
//! header followed by a bincode body:
//! ```text
//! +-------+---------+----------+-------------+--------+------------+------+
//! | Magic | Version | Last txn | Inode count | CRC32C | Created at | Body |
//! | 4B    | 4B      | 8B       | 8B          | 4B     | 4B         | var  |
//! +-------+---------+----------+-------------+--------+------------+------+
//! ```
//! The body holds the id watermark and the inodes parents-first.

use crate::inode::Inode;
use crate::tree::NamespaceTree;
use crate::ufs::{self, UnderFileSystem};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tidefs_common::{Error, InodeId, Result, TxnId};
use tracing::info;

/// Fixed-size image header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageHeader {
    pub magic: u32,
    pub version: u32,
    /// Last transaction the image subsumes
    pub last_txn: TxnId,
    pub inode_count: u64,
    /// CRC32C of the body
    pub checksum: u32,
    /// Seconds since the epoch
    pub created_at: u32,
}

impl ImageHeader {
    pub const MAGIC: u32 = 0x5444_494D; // "TDIM"
    pub const VERSION: u32 = 1;
    pub const SIZE: usize = 32;

    #[must_use]
    pub fn new(last_txn: TxnId, inode_count: u64, checksum: u32) -> Self {
        let created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
            .unwrap_or_default();
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            last_txn,
            inode_count,
            checksum,
            created_at,
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..16].copy_from_slice(&self.last_txn.to_le_bytes());
        buf[16..24].copy_from_slice(&self.inode_count.to_le_bytes());
        buf[24..28].copy_from_slice(&self.checksum.to_le_bytes());
        buf[28..32].copy_from_slice(&self.created_at.to_le_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::corruption("image header truncated"));
        }
        let u32_at = |at: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&data[at..at + 4]);
            u32::from_le_bytes(b)
        };
        let u64_at = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&data[at..at + 8]);
            u64::from_le_bytes(b)
        };

        let header = Self {
            magic: u32_at(0),
            version: u32_at(4),
            last_txn: u64_at(8),
            inode_count: u64_at(16),
            checksum: u32_at(24),
            created_at: u32_at(28),
        };
        if header.magic != Self::MAGIC {
            return Err(Error::corruption(format!("invalid image magic {:#010x}", header.magic)));
        }
        if header.version != Self::VERSION {
            return Err(Error::corruption(format!(
                "unsupported image version {} (expected {})",
                header.version,
                Self::VERSION
            )));
        }
        Ok(header)
    }
}

#[derive(Serialize)]
struct ImageBodyRef<'a> {
    watermark: InodeId,
    inodes: Vec<&'a Inode>,
}

#[derive(Deserialize)]
struct ImageBody {
    watermark: InodeId,
    inodes: Vec<Inode>,
}

/// A loaded image
#[derive(Debug)]
pub struct Image {
    pub header: ImageHeader,
    pub tree: NamespaceTree,
}

impl Image {
    #[must_use]
    pub const fn last_txn(&self) -> TxnId {
        self.header.last_txn
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `tree` as the image at `path`, subsuming transactions up to
/// `last_txn`. The image is written beside `path` and renamed into place.
pub fn write_image(
    ufs: &dyn UnderFileSystem,
    path: &Path,
    tree: &NamespaceTree,
    last_txn: TxnId,
) -> Result<ImageHeader> {
    let body = ImageBodyRef {
        watermark: tree.allocator().watermark(),
        inodes: tree.preorder(),
    };
    let data = bincode::serialize(&body)
        .map_err(|e| Error::durable_write(format!("failed to serialize image: {e}")))?;
    let header = ImageHeader::new(last_txn, body.inodes.len() as u64, crc32c::crc32c(&data));

    let temp = temp_path(path);
    {
        let mut writer = ufs
            .create(&temp)
            .map_err(|e| Error::durable_write(format!("failed to create image file: {e}")))?;
        writer
            .write_all(&header.to_bytes())
            .map_err(|e| Error::durable_write(format!("failed to write image header: {e}")))?;
        writer
            .write_all(&data)
            .map_err(|e| Error::durable_write(format!("failed to write image body: {e}")))?;
        writer
            .sync()
            .map_err(|e| Error::durable_write(format!("failed to sync image: {e}")))?;
    }

    // Atomic rename
    ufs.rename(&temp, path)
        .map_err(|e| Error::durable_write(format!("failed to rename image: {e}")))?;

    info!(
        "Wrote image {} with {} inodes through txn {}",
        path.display(),
        header.inode_count,
        last_txn
    );
    Ok(header)
}

/// Load the image at `path`, or `None` when there is none
pub fn read_image(ufs: &dyn UnderFileSystem, path: &Path) -> Result<Option<Image>> {
    if !ufs.exists(path)? {
        return Ok(None);
    }
    let bytes = ufs::read_all(ufs, path)?;
    let header = ImageHeader::from_bytes(&bytes)?;
    let data = &bytes[ImageHeader::SIZE..];

    if crc32c::crc32c(data) != header.checksum {
        return Err(Error::corruption("image checksum mismatch"));
    }
    let body: ImageBody = bincode::deserialize(data)
        .map_err(|e| Error::corruption(format!("undecodable image body: {e}")))?;
    if body.inodes.len() as u64 != header.inode_count {
        return Err(Error::corruption(format!(
            "image header lists {} inodes, body holds {}",
            header.inode_count,
            body.inodes.len()
        )));
    }

    let tree = NamespaceTree::from_parts(body.watermark, body.inodes)?;
    info!(
        "Loaded image {} with {} inodes through txn {}",
        path.display(),
        tree.len(),
        header.last_txn
    );
    Ok(Some(Image { header, tree }))
}
