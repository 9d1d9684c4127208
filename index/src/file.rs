//! File-backed page store.
//!
//! Positional reads and writes over a single file whose length is always a
//! whole number of pages.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::io::{PAGE_SIZE_U64, PageStore, StorageError, check_bounds};

/// A page store over a file on disk.
pub struct FileStore {
    file: File,
    path: PathBuf,
    len: u64,
}

impl FileStore {
    /// Open the file at `path`, creating it if it does not exist.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let file = Self::open_file(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
        })
    }

    fn open_file(path: &Path) -> Result<File, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(file)
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl PageStore for FileStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(offset, buf.len(), self.len)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, buf.len(), self.len)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn grow(&mut self) -> Result<u64, StorageError> {
        let offset = self.len;
        let new_len = offset + PAGE_SIZE_U64;
        self.file.set_len(new_len)?;
        self.len = new_len;
        Ok(offset)
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        self.file.sync_all()?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        std::fs::remove_file(&self.path)?;
        self.file = Self::open_file(&self.path)?;
        self.len = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_empty_file() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.idx");

        let store = FileStore::open(&path).expect("open store");
        assert!(path.exists());
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_grow_write_and_reopen() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.idx");

        {
            let mut store = FileStore::open(&path).expect("open store");
            assert_eq!(store.grow().expect("grow"), 0);
            assert_eq!(store.grow().expect("grow"), PAGE_SIZE_U64);
            store
                .write_at(PAGE_SIZE_U64 + 100, b"hello world")
                .expect("write");
            store.sync().expect("sync");
        }

        let mut store = FileStore::open(&path).expect("reopen store");
        assert_eq!(store.len(), 2 * PAGE_SIZE_U64);

        let mut buf = [0u8; 11];
        store.read_at(PAGE_SIZE_U64 + 100, &mut buf).expect("read");
        assert_eq!(&buf, b"hello world");

        // Grown pages are zeroed.
        store.read_at(0, &mut buf).expect("read");
        assert_eq!(buf, [0u8; 11]);
    }

    #[test]
    fn test_access_past_end_is_rejected() {
        let dir = tempdir().expect("create temp dir");
        let mut store = FileStore::open(&dir.path().join("test.idx")).expect("open store");

        let mut buf = [0u8; 4];
        assert!(matches!(
            store.read_at(0, &mut buf),
            Err(StorageError::OutOfBounds { .. })
        ));
        assert!(matches!(
            store.write_at(0, &buf),
            Err(StorageError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_clear_recreates_file() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.idx");

        let mut store = FileStore::open(&path).expect("open store");
        store.grow().expect("grow");
        store.clear().expect("clear");

        assert_eq!(store.len(), 0);
        assert_eq!(std::fs::metadata(&path).expect("metadata").len(), 0);
        assert_eq!(store.grow().expect("grow"), 0);
    }
}
