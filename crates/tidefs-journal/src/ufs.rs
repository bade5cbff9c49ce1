//! Under-storage capability
//!
//! The journal never touches the filesystem directly. Everything it
//! persists goes through an [`UnderFileSystem`], so the same journal code
//! can sit on a local disk or on a shared store reachable by a standby
//! master. [`LocalUfs`] is the local-disk implementation.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// A byte sink that can be forced to durable storage
pub trait UfsWriter: Write + Send {
    /// Flush buffered bytes and wait until they are durable
    fn sync(&mut self) -> io::Result<()>;
}

/// Path-addressed byte-stream storage
pub trait UnderFileSystem: Send + Sync + fmt::Debug {
    /// Create (or truncate) a file for writing
    fn create(&self, path: &Path) -> io::Result<Box<dyn UfsWriter>>;

    /// Open a file for reading
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    /// Check whether a file or directory exists
    fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Names of the entries of a directory
    fn list(&self, path: &Path) -> io::Result<Vec<String>>;

    /// Delete a file or directory; returns false if nothing was there
    fn delete(&self, path: &Path, recursive: bool) -> io::Result<bool>;

    /// Create a directory and any missing parents
    fn mkdirs(&self, path: &Path) -> io::Result<()>;

    /// Move `src` to `dst`, replacing `dst` if it is a file
    fn rename(&self, src: &Path, dst: &Path) -> io::Result<()>;

    /// Length of a file in bytes
    fn file_len(&self, path: &Path) -> io::Result<u64>;
}

/// Read a whole file into memory
pub fn read_all(ufs: &dyn UnderFileSystem, path: &Path) -> io::Result<Vec<u8>> {
    let mut reader = ufs.open(path)?;
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Local filesystem under-storage
#[derive(Clone, Debug)]
pub struct LocalUfs {
    write_buffer_size: usize,
}

impl Default for LocalUfs {
    fn default() -> Self {
        Self {
            write_buffer_size: 64 * 1024, // 64KB
        }
    }
}

impl LocalUfs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `size` bytes of buffering for writers
    #[must_use]
    pub const fn with_write_buffer_size(size: usize) -> Self {
        Self {
            write_buffer_size: size,
        }
    }
}

struct LocalWriter(BufWriter<File>);

impl Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl UfsWriter for LocalWriter {
    fn sync(&mut self) -> io::Result<()> {
        self.0.flush()?;
        self.0.get_ref().sync_data()
    }
}

impl UnderFileSystem for LocalUfs {
    fn create(&self, path: &Path) -> io::Result<Box<dyn UfsWriter>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Box::new(LocalWriter(BufWriter::with_capacity(
            self.write_buffer_size,
            file,
        ))))
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }

    fn exists(&self, path: &Path) -> io::Result<bool> {
        path.try_exists()
    }

    fn list(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn delete(&self, path: &Path, recursive: bool) -> io::Result<bool> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        if metadata.is_dir() {
            if recursive {
                fs::remove_dir_all(path)?;
            } else {
                fs::remove_dir(path)?;
            }
        } else {
            fs::remove_file(path)?;
        }
        Ok(true)
    }

    fn mkdirs(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn rename(&self, src: &Path, dst: &Path) -> io::Result<()> {
        fs::rename(src, dst)
    }

    fn file_len(&self, path: &Path) -> io::Result<u64> {
        fs::metadata(path).map(|m| m.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_sync_read() {
        let dir = tempdir().unwrap();
        let ufs = LocalUfs::new();
        let path = dir.path().join("data");

        let mut writer = ufs.create(&path).unwrap();
        writer.write_all(b"hello").unwrap();
        writer.sync().unwrap();
        drop(writer);

        assert!(ufs.exists(&path).unwrap());
        assert_eq!(ufs.file_len(&path).unwrap(), 5);
        assert_eq!(read_all(&ufs, &path).unwrap(), b"hello");
    }

    #[test]
    fn test_list_rename_delete() {
        let dir = tempdir().unwrap();
        let ufs = LocalUfs::new();
        let sub = dir.path().join("a/b");
        ufs.mkdirs(&sub).unwrap();

        ufs.create(&sub.join("1")).unwrap().sync().unwrap();
        ufs.create(&sub.join("0")).unwrap().sync().unwrap();
        assert_eq!(ufs.list(&sub).unwrap(), vec!["0", "1"]);

        ufs.rename(&sub.join("1"), &sub.join("2")).unwrap();
        assert_eq!(ufs.list(&sub).unwrap(), vec!["0", "2"]);

        assert!(ufs.delete(&sub.join("0"), false).unwrap());
        assert!(!ufs.delete(&sub.join("0"), false).unwrap());
        assert!(ufs.delete(&sub, false).is_err());
        assert!(ufs.delete(&dir.path().join("a"), true).unwrap());
        assert!(!ufs.exists(&sub).unwrap());
    }
}
