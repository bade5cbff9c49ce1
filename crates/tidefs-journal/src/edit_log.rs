//! Edit log
//!
//! Append-only log of journal entries split into segments:
//! - the active segment (`log.data`) takes new records
//! - completed segments (`completed/<n>.editLog`) are numbered from 0
//!
//! Record format:
//! ```text
//! +--------+------+--------+-------------------+--------+
//! | Magic  | Txn  | Length | bincode(entry)    | CRC32C |
//! | 4B     | 8B   | 4B     | var               | 4B     |
//! +--------+------+--------+-------------------+--------+
//! ```

use crate::entry::JournalEntry;
use crate::ufs::{self, UfsWriter, UnderFileSystem};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tidefs_common::{Error, JournalConfig, Result, TxnId};
use tracing::{debug, info, warn};

/// Edit log record magic number
const RECORD_MAGIC: u32 = 0x5444_4C47; // "TDLG"

/// Record header size (magic + txn + length)
const RECORD_HEADER_SIZE: usize = 16;

/// Trailing checksum size
const RECORD_CRC_SIZE: usize = 4;

/// File name suffix of completed segments
pub const SEGMENT_SUFFIX: &str = ".editLog";

/// A single framed record
#[derive(Debug)]
pub struct LogRecord {
    pub txn_id: TxnId,
    /// Serialized entry
    pub data: Vec<u8>,
}

impl LogRecord {
    /// Frame an entry
    pub fn encode(entry: &JournalEntry) -> Result<Self> {
        let data = bincode::serialize(entry)
            .map_err(|e| Error::durable_write(format!("failed to encode txn {}: {e}", entry.txn_id)))?;
        if u32::try_from(data.len()).is_err() {
            return Err(Error::durable_write(format!(
                "txn {} is too large to journal ({} bytes)",
                entry.txn_id,
                data.len()
            )));
        }
        Ok(Self {
            txn_id: entry.txn_id,
            data,
        })
    }

    /// Serialize record to bytes
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + self.data.len() + RECORD_CRC_SIZE);

        buf.extend_from_slice(&RECORD_MAGIC.to_le_bytes());
        buf.extend_from_slice(&self.txn_id.to_le_bytes());
        #[allow(clippy::cast_possible_truncation)] // checked in encode
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);

        // CRC over everything except the CRC itself
        let crc = crc32c::crc32c(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Parse one record from the front of `data`, returning it and its size
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < RECORD_HEADER_SIZE + RECORD_CRC_SIZE {
            return Err(Error::corruption("edit log record truncated"));
        }

        let magic = le_u32(&data[0..4]);
        if magic != RECORD_MAGIC {
            return Err(Error::corruption(format!("invalid edit log magic {magic:#010x}")));
        }

        let txn_id = le_u64(&data[4..12]);
        let data_len = le_u32(&data[12..16]) as usize;

        let total_size = RECORD_HEADER_SIZE + data_len + RECORD_CRC_SIZE;
        if data.len() < total_size {
            return Err(Error::corruption(format!("edit log record for txn {txn_id} truncated")));
        }

        let body_end = RECORD_HEADER_SIZE + data_len;
        let stored_crc = le_u32(&data[body_end..total_size]);
        let computed_crc = crc32c::crc32c(&data[..body_end]);
        if computed_crc != stored_crc {
            return Err(Error::corruption(format!("edit log record for txn {txn_id} CRC mismatch")));
        }

        Ok((
            Self {
                txn_id,
                data: data[RECORD_HEADER_SIZE..body_end].to_vec(),
            },
            total_size,
        ))
    }

    /// Decode the framed entry
    pub fn entry(&self) -> Result<JournalEntry> {
        let entry: JournalEntry = bincode::deserialize(&self.data)
            .map_err(|e| Error::corruption(format!("undecodable entry for txn {}: {e}", self.txn_id)))?;
        if entry.txn_id != self.txn_id {
            return Err(Error::corruption(format!(
                "record header says txn {} but entry says {}",
                self.txn_id, entry.txn_id
            )));
        }
        Ok(entry)
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

/// Decode every entry of one segment
pub fn read_segment(ufs: &dyn UnderFileSystem, path: &Path) -> Result<Vec<JournalEntry>> {
    let bytes = ufs::read_all(ufs, path)?;
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let (record, size) = LogRecord::from_bytes(&bytes[offset..])
            .map_err(|e| Error::corruption(format!("{}: {e}", path.display())))?;
        entries.push(record.entry()?);
        offset += size;
    }
    Ok(entries)
}

/// Path of completed segment `index`
#[must_use]
pub fn segment_path(config: &JournalConfig, index: u64) -> PathBuf {
    config.completed_path().join(format!("{index}{SEGMENT_SUFFIX}"))
}

/// Completed segments in ascending order.
///
/// The series must be numbered contiguously from 0.
pub fn completed_segments(ufs: &dyn UnderFileSystem, config: &JournalConfig) -> Result<Vec<PathBuf>> {
    let dir = config.completed_path();
    if !ufs.exists(&dir)? {
        return Ok(Vec::new());
    }

    let mut indices = Vec::new();
    for name in ufs.list(&dir)? {
        match name.strip_suffix(SEGMENT_SUFFIX).map(str::parse::<u64>) {
            Some(Ok(index)) => indices.push(index),
            _ => warn!("Ignoring stray file {} in {}", name, dir.display()),
        }
    }
    indices.sort_unstable();

    for (expected, index) in (0u64..).zip(&indices) {
        if *index != expected {
            return Err(Error::corruption(format!(
                "completed segment {expected} missing from {}",
                dir.display()
            )));
        }
    }
    Ok(indices.into_iter().map(|i| segment_path(config, i)).collect())
}

/// Visit every entry, completed segments first, then the active segment.
///
/// Returns the number of segments read.
pub fn for_each_entry<F>(ufs: &dyn UnderFileSystem, config: &JournalConfig, mut callback: F) -> Result<usize>
where
    F: FnMut(&Path, JournalEntry) -> Result<()>,
{
    let mut segments = completed_segments(ufs, config)?;
    let active = config.log_path();
    if ufs.exists(&active)? {
        segments.push(active);
    }

    for path in &segments {
        let entries = read_segment(ufs, path)?;
        debug!("Read {} entries from {}", entries.len(), path.display());
        for entry in entries {
            callback(path, entry)?;
        }
    }
    Ok(segments.len())
}

/// Discard completed segments below `start`, renumber the rest from 0 and
/// move the active segment to the end of the series.
///
/// Must not run while a writer has the log open. Returns the number of
/// completed segments afterwards.
pub fn retain_from(ufs: &dyn UnderFileSystem, config: &JournalConfig, start: u64) -> Result<u64> {
    let segments = completed_segments(ufs, config)?;
    let count = segments.len() as u64;
    let start = if start > count {
        warn!("Retention start {} beyond {} completed segments", start, count);
        count
    } else {
        start
    };

    for (index, path) in (0u64..).zip(&segments) {
        if index < start {
            ufs.delete(path, false)?;
        } else {
            ufs.rename(path, &segment_path(config, index - start))?;
        }
    }

    let mut retained = count - start;
    let active = config.log_path();
    if ufs.exists(&active)? {
        ufs.mkdirs(&config.completed_path())?;
        ufs.rename(&active, &segment_path(config, retained))?;
        retained += 1;
    }

    info!(
        "Retained edit log from segment {}: {} completed segments remain",
        start, retained
    );
    Ok(retained)
}

/// Writer side of the edit log
pub struct EditLog {
    ufs: Arc<dyn UnderFileSystem>,
    config: JournalConfig,
    /// Active segment writer, `None` once closed
    writer: Option<Box<dyn UfsWriter>>,
    /// Bytes in the active segment
    size: u64,
    /// Index the next completed segment gets
    next_segment: u64,
    max_log_size: u64,
    last_txn: TxnId,
}

impl EditLog {
    /// Start a fresh, empty active segment after any completed segments.
    ///
    /// `last_txn` is the last transaction already made durable elsewhere.
    pub fn create(ufs: Arc<dyn UnderFileSystem>, config: JournalConfig, last_txn: TxnId) -> Result<Self> {
        ufs.mkdirs(&config.folder)
            .and_then(|()| ufs.mkdirs(&config.completed_path()))
            .map_err(|e| Error::durable_write(format!("failed to create journal folder: {e}")))?;
        let next_segment = completed_segments(ufs.as_ref(), &config)?.len() as u64;

        let writer = ufs
            .create(&config.log_path())
            .map_err(|e| Error::durable_write(format!("failed to create edit log: {e}")))?;

        debug!(
            "Opened edit log {} after {} completed segments",
            config.log_path().display(),
            next_segment
        );
        Ok(Self {
            max_log_size: config.max_log_size,
            ufs,
            config,
            writer: Some(writer),
            size: 0,
            next_segment,
            last_txn,
        })
    }

    /// Append one entry, rotating first if it would overflow the segment
    pub fn append(&mut self, entry: &JournalEntry) -> Result<()> {
        if entry.txn_id != self.last_txn + 1 {
            return Err(Error::JournalState(format!(
                "append of txn {} after txn {}",
                entry.txn_id, self.last_txn
            )));
        }
        let bytes = LogRecord::encode(entry)?.to_bytes();
        let len = bytes.len() as u64;

        if self.size > 0 && self.size + len > self.max_log_size {
            self.rotate()?;
        }

        let sync = self.config.sync_on_write;
        let writer = self.writer_mut()?;
        writer
            .write_all(&bytes)
            .map_err(|e| Error::durable_write(format!("edit log write failed: {e}")))?;
        let flushed = if sync { writer.sync() } else { writer.flush() };
        flushed.map_err(|e| Error::durable_write(format!("edit log flush failed: {e}")))?;

        self.size += len;
        self.last_txn = entry.txn_id;
        Ok(())
    }

    /// Force buffered records to durable storage
    pub fn flush(&mut self) -> Result<()> {
        self.writer_mut()?
            .sync()
            .map_err(|e| Error::durable_write(format!("edit log sync failed: {e}")))
    }

    /// Flush and close the active segment
    pub fn close(&mut self) -> Result<()> {
        if self.writer.is_some() {
            self.flush()?;
            self.writer = None;
            debug!("Closed edit log at txn {}", self.last_txn);
        }
        Ok(())
    }

    fn writer_mut(&mut self) -> Result<&mut Box<dyn UfsWriter>> {
        self.writer
            .as_mut()
            .ok_or_else(|| Error::JournalState("edit log is closed".into()))
    }

    /// Seal the active segment into the completed series
    fn rotate(&mut self) -> Result<()> {
        self.flush()?;
        self.writer = None;

        let sealed = segment_path(&self.config, self.next_segment);
        self.ufs
            .rename(&self.config.log_path(), &sealed)
            .map_err(|e| Error::durable_write(format!("edit log rotation failed: {e}")))?;
        self.next_segment += 1;

        let writer = self
            .ufs
            .create(&self.config.log_path())
            .map_err(|e| Error::durable_write(format!("failed to create edit log: {e}")))?;
        self.writer = Some(writer);

        info!(
            "Rotated edit log into {} ({} bytes, through txn {})",
            sealed.display(),
            self.size,
            self.last_txn
        );
        self.size = 0;
        Ok(())
    }

    /// Change the rotation threshold for later appends
    pub fn set_max_log_size(&mut self, size: u64) -> Result<()> {
        if size == 0 {
            return Err(Error::Configuration("max_log_size must be positive".into()));
        }
        self.max_log_size = size;
        Ok(())
    }

    #[must_use]
    pub const fn max_log_size(&self) -> u64 {
        self.max_log_size
    }

    #[must_use]
    pub const fn last_txn(&self) -> TxnId {
        self.last_txn
    }

    /// Number of completed segments written so far
    #[must_use]
    pub const fn completed_count(&self) -> u64 {
        self.next_segment
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.writer.is_none()
    }
}

impl std::fmt::Debug for EditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditLog")
            .field("log", &self.config.log_path())
            .field("size", &self.size)
            .field("next_segment", &self.next_segment)
            .field("max_log_size", &self.max_log_size)
            .field("last_txn", &self.last_txn)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::JournalOp;
    use crate::ufs::LocalUfs;
    use tempfile::tempdir;
    use tidefs_common::FsPath;

    fn create_entry(txn_id: TxnId) -> JournalEntry {
        JournalEntry::new(
            txn_id,
            1_000 + txn_id,
            JournalOp::CreateFile {
                id: txn_id + 1,
                path: FsPath::parse(&format!("/sth{txn_id}")).unwrap(),
                recursive: false,
                block_size: 64,
                cache: true,
            },
        )
    }

    fn open_log(dir: &Path, max_log_size: u64) -> (Arc<dyn UnderFileSystem>, JournalConfig, EditLog) {
        let ufs: Arc<dyn UnderFileSystem> = Arc::new(LocalUfs::new());
        let mut config = JournalConfig::with_folder(dir);
        config.max_log_size = max_log_size;
        config.sync_on_write = false;
        let log = EditLog::create(Arc::clone(&ufs), config.clone(), 0).unwrap();
        (ufs, config, log)
    }

    fn collect(ufs: &dyn UnderFileSystem, config: &JournalConfig) -> Vec<JournalEntry> {
        let mut out = Vec::new();
        for_each_entry(ufs, config, |_, entry| {
            out.push(entry);
            Ok(())
        })
        .unwrap();
        out
    }

    #[test]
    fn test_record_roundtrip() {
        let entry = create_entry(7);
        let bytes = LogRecord::encode(&entry).unwrap().to_bytes();
        let (record, size) = LogRecord::from_bytes(&bytes).unwrap();
        assert_eq!(size, bytes.len());
        assert_eq!(record.entry().unwrap(), entry);
    }

    #[test]
    fn test_record_detects_damage() {
        let bytes = LogRecord::encode(&create_entry(1)).unwrap().to_bytes();

        let mut flipped = bytes.clone();
        flipped[RECORD_HEADER_SIZE] ^= 0xFF;
        assert!(matches!(LogRecord::from_bytes(&flipped), Err(Error::Corruption(_))));

        assert!(matches!(
            LogRecord::from_bytes(&bytes[..bytes.len() - 1]),
            Err(Error::Corruption(_))
        ));

        let mut bad_magic = bytes;
        bad_magic[0] = 0;
        assert!(matches!(LogRecord::from_bytes(&bad_magic), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempdir().unwrap();
        let (ufs, config, mut log) = open_log(dir.path(), 1024 * 1024);
        for txn in 1..=10 {
            log.append(&create_entry(txn)).unwrap();
        }
        log.close().unwrap();

        let entries = collect(ufs.as_ref(), &config);
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[9], create_entry(10));
        assert!(log.append(&create_entry(11)).is_err());
    }

    #[test]
    fn test_append_rejects_out_of_order_txn() {
        let dir = tempdir().unwrap();
        let (_ufs, _config, mut log) = open_log(dir.path(), 1024);
        assert!(matches!(log.append(&create_entry(2)), Err(Error::JournalState(_))));
    }

    #[test]
    fn test_rotation_keeps_order() {
        let dir = tempdir().unwrap();
        let (ufs, config, mut log) = open_log(dir.path(), 1024);
        for txn in 1..=124 {
            log.append(&create_entry(txn)).unwrap();
        }
        log.close().unwrap();

        let segments = completed_segments(ufs.as_ref(), &config).unwrap();
        assert!(segments.len() > 1);
        assert_eq!(segments.len() as u64, log.completed_count());
        for path in &segments {
            assert!(ufs.file_len(path).unwrap() <= 1024);
        }

        let txns: Vec<TxnId> = collect(ufs.as_ref(), &config).iter().map(|e| e.txn_id).collect();
        assert_eq!(txns, (1..=124).collect::<Vec<_>>());
    }

    #[test]
    fn test_oversized_record_gets_own_segment() {
        let dir = tempdir().unwrap();
        let (ufs, config, mut log) = open_log(dir.path(), 16);
        for txn in 1..=3 {
            log.append(&create_entry(txn)).unwrap();
        }
        log.close().unwrap();

        // each record exceeds the limit, so each sits alone
        assert_eq!(completed_segments(ufs.as_ref(), &config).unwrap().len(), 2);
        for path in completed_segments(ufs.as_ref(), &config).unwrap() {
            assert_eq!(read_segment(ufs.as_ref(), &path).unwrap().len(), 1);
        }
        assert_eq!(collect(ufs.as_ref(), &config).len(), 3);
    }

    #[test]
    fn test_truncated_segment_is_corruption() {
        let dir = tempdir().unwrap();
        let (ufs, config, mut log) = open_log(dir.path(), 1024 * 1024);
        for txn in 1..=3 {
            log.append(&create_entry(txn)).unwrap();
        }
        log.close().unwrap();

        let bytes = std::fs::read(config.log_path()).unwrap();
        std::fs::write(config.log_path(), &bytes[..bytes.len() - 3]).unwrap();
        let result = for_each_entry(ufs.as_ref(), &config, |_, _| Ok(()));
        assert!(matches!(result, Err(Error::Corruption(_))));
    }

    #[test]
    fn test_missing_segment_is_corruption() {
        let dir = tempdir().unwrap();
        let (ufs, config, mut log) = open_log(dir.path(), 100);
        for txn in 1..=20 {
            log.append(&create_entry(txn)).unwrap();
        }
        log.close().unwrap();

        std::fs::remove_file(segment_path(&config, 1)).unwrap();
        assert!(matches!(
            completed_segments(ufs.as_ref(), &config),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_retain_from_renumbers() {
        let dir = tempdir().unwrap();
        let (ufs, config, mut log) = open_log(dir.path(), 100);
        for txn in 1..=124 {
            log.append(&create_entry(txn)).unwrap();
        }
        log.close().unwrap();

        let total = completed_segments(ufs.as_ref(), &config).unwrap().len() as u64;
        let start = total / 2;
        let first_kept = read_segment(ufs.as_ref(), &segment_path(&config, start)).unwrap();
        let active = read_segment(ufs.as_ref(), &config.log_path()).unwrap();

        let retained = retain_from(ufs.as_ref(), &config, start).unwrap();
        assert_eq!(retained, total - start + 1);

        let names = ufs.list(&config.completed_path()).unwrap();
        assert_eq!(names.len() as u64, retained);
        let segments = completed_segments(ufs.as_ref(), &config).unwrap();
        assert_eq!(segments.len() as u64, retained);
        assert!(!ufs.exists(&config.log_path()).unwrap());

        assert_eq!(read_segment(ufs.as_ref(), &segments[0]).unwrap(), first_kept);
        assert_eq!(read_segment(ufs.as_ref(), &segments[segments.len() - 1]).unwrap(), active);
    }

    #[test]
    fn test_create_continues_numbering() {
        let dir = tempdir().unwrap();
        let (ufs, config, mut log) = open_log(dir.path(), 100);
        for txn in 1..=10 {
            log.append(&create_entry(txn)).unwrap();
        }
        log.close().unwrap();
        let before = completed_segments(ufs.as_ref(), &config).unwrap().len() as u64;

        let reopened = EditLog::create(Arc::clone(&ufs), config, 10).unwrap();
        assert_eq!(reopened.completed_count(), before);
        assert_eq!(reopened.last_txn(), 10);
    }

    #[test]
    fn test_set_max_log_size() {
        let dir = tempdir().unwrap();
        let (_ufs, _config, mut log) = open_log(dir.path(), 100);
        assert!(log.set_max_log_size(0).is_err());
        log.set_max_log_size(4096).unwrap();
        assert_eq!(log.max_log_size(), 4096);
    }
}
