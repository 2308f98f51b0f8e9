//! File-based block store for persistent storage.
//!
//! Directory layout:
//!
//! ```text
//! <log_dir>/
//! ├─ LOCK                  # Advisory lock for single-process access
//! ├─ startup-metadata.0    # Metadata files (written by the log)
//! ├─ 00000000000.xd        # Block files, named by start address
//! └─ 00000000400.xd
//! ```

use crate::block::{Block, BlockStore};
use crate::error::{StorageError, StorageResult};
use crate::naming::{block_file_name, parse_block_file_name};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const LOCK_FILE: &str = "LOCK";

/// Interval between lock attempts while waiting for a lock timeout.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// A single block file.
///
/// # Durability
///
/// - `write()` pushes data to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
///
/// # Thread Safety
///
/// Reads and writes seek a shared handle, so they are serialised by an
/// internal lock. The length is tracked separately so that `length()`
/// never touches the file.
#[derive(Debug)]
pub struct FileBlock {
    address: u64,
    path: PathBuf,
    file: RwLock<File>,
    length: AtomicU64,
    read_only: AtomicBool,
}

impl FileBlock {
    fn open(address: u64, path: PathBuf, create: bool) -> StorageResult<Self> {
        let read_only = match fs::metadata(&path) {
            Ok(meta) => meta.permissions().readonly(),
            Err(e) if e.kind() == io::ErrorKind::NotFound && create => false,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::BlockNotFound { address })
            }
            Err(e) => return Err(e.into()),
        };

        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(create)
            .truncate(false)
            .open(&path)?;
        let length = file.metadata()?.len();

        Ok(Self {
            address,
            path,
            file: RwLock::new(file),
            length: AtomicU64::new(length),
            read_only: AtomicBool::new(read_only),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Block for FileBlock {
    fn address(&self) -> u64 {
        self.address
    }

    fn length(&self) -> u64 {
        self.length.load(Ordering::Acquire)
    }

    fn read(&self, position: u64, buf: &mut [u8]) -> StorageResult<usize> {
        let length = self.length();
        if position >= length || buf.is_empty() {
            return Ok(0);
        }

        let available = usize::try_from(length - position).unwrap_or(usize::MAX);
        let wanted = buf.len().min(available);

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(position))?;
        file.read_exact(&mut buf[..wanted])?;
        Ok(wanted)
    }

    fn write(&self, position: u64, data: &[u8]) -> StorageResult<()> {
        if self.is_read_only() {
            return Err(StorageError::ReadOnly {
                address: self.address,
            });
        }
        if data.is_empty() {
            return Ok(());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(position))?;
        file.write_all(data)?;
        self.length
            .fetch_max(position + data.len() as u64, Ordering::AcqRel);
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        let file = self.file.read();
        file.sync_all()?;
        Ok(())
    }

    fn truncate(&self, length: u64) -> StorageResult<()> {
        let file = self.file.write();
        let current = self.length();

        if length > current {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate block {} to {} bytes, current length is {}",
                    self.address, length, current
                ),
            )));
        }

        file.set_len(length)?;
        file.sync_all()?;
        self.length.store(length, Ordering::Release);
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    fn set_read_only(&self) -> StorageResult<()> {
        let mut permissions = fs::metadata(&self.path)?.permissions();
        permissions.set_readonly(true);
        fs::set_permissions(&self.path, permissions)?;
        self.read_only.store(true, Ordering::Release);
        Ok(())
    }

    fn set_writable(&self) -> StorageResult<()> {
        let mut file = self.file.write();
        if !self.is_read_only() {
            return Ok(());
        }
        let mut permissions = fs::metadata(&self.path)?.permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
        fs::set_permissions(&self.path, permissions)?;
        *file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.read_only.store(false, Ordering::Release);
        debug!(address = self.address, "log file writable again");
        Ok(())
    }
}

/// A directory of block files.
///
/// Holds an exclusive lock on the directory for its whole lifetime. Only
/// one `FileBlockStore` can exist per directory at a time.
///
/// # Example
///
/// ```no_run
/// use pagelog_storage::{Block, BlockStore, FileBlockStore};
/// use std::path::Path;
///
/// let store = FileBlockStore::open(Path::new("my_log")).unwrap();
/// let block = store.create_block(0).unwrap();
/// block.write(0, b"persistent data").unwrap();
/// block.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBlockStore {
    path: PathBuf,
    _lock_file: File,
}

impl FileBlockStore {
    /// Opens or creates a block store in the given directory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the lock,
    /// or an I/O error if the directory cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with_lock_timeout(path, Duration::ZERO)
    }

    /// Opens a block store, waiting up to `timeout` for the directory lock.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if the lock is still held when the
    /// timeout expires.
    pub fn open_with_lock_timeout(path: &Path, timeout: Duration) -> StorageResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path is not a directory: {}", path.display()),
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        let deadline = Instant::now() + timeout;
        while lock_file.try_lock_exclusive().is_err() {
            if Instant::now() >= deadline {
                return Err(StorageError::Locked {
                    path: path.to_path_buf(),
                });
            }
            thread::sleep(LOCK_RETRY_INTERVAL);
        }

        debug!(path = %path.display(), "opened block store");
        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory of this store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn block_path(&self, address: u64) -> StorageResult<PathBuf> {
        Ok(self.path.join(block_file_name(address)?))
    }
}

impl BlockStore for FileBlockStore {
    fn list_blocks(&self) -> StorageResult<Vec<u64>> {
        let mut addresses = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(address) = name.to_str().and_then(parse_block_file_name) {
                addresses.push(address);
            }
        }
        addresses.sort_unstable();
        Ok(addresses)
    }

    fn open_block(&self, address: u64) -> StorageResult<Arc<dyn Block>> {
        let path = self.block_path(address)?;
        Ok(Arc::new(FileBlock::open(address, path, false)?))
    }

    fn create_block(&self, address: u64) -> StorageResult<Arc<dyn Block>> {
        let path = self.block_path(address)?;
        if path.exists() {
            return Err(StorageError::BlockExists { address });
        }
        let block = FileBlock::open(address, path, true)?;
        self.sync_directory()?;
        Ok(Arc::new(block))
    }

    fn remove_block(&self, address: u64) -> StorageResult<()> {
        let path = self.block_path(address)?;
        match fs::metadata(&path) {
            Ok(meta) => {
                // Completed blocks may have been marked read-only.
                if meta.permissions().readonly() {
                    let mut permissions = meta.permissions();
                    #[allow(clippy::permissions_set_readonly_false)]
                    permissions.set_readonly(false);
                    fs::set_permissions(&path, permissions)?;
                }
                fs::remove_file(&path)?;
                self.sync_directory()
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(address, "removing a block that does not exist");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_metadata(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.path.join(name);
        match File::open(&path) {
            Ok(mut file) => {
                let mut data = Vec::new();
                file.read_to_end(&mut data)?;
                Ok(Some(data))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_metadata(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.path.join(name);
        let existed = path.exists();

        let mut file = File::create(&path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        if !existed {
            self.sync_directory()?;
        }
        Ok(())
    }

    fn remove_metadata(&self, name: &str) -> StorageResult<()> {
        match fs::remove_file(self.path.join(name)) {
            Ok(()) => self.sync_directory(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// On Windows the NTFS journal covers directory metadata, so this is a
    /// no-op there.
    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("log");

        let store = FileBlockStore::open(&path).unwrap();
        assert!(path.is_dir());
        assert!(store.list_blocks().unwrap().is_empty());
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let _store = FileBlockStore::open(temp.path()).unwrap();

        let result = FileBlockStore::open(temp.path());
        assert!(matches!(result, Err(StorageError::Locked { .. })));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        {
            let _store = FileBlockStore::open(temp.path()).unwrap();
        }
        let _again = FileBlockStore::open(temp.path()).unwrap();
    }

    #[test]
    fn block_write_and_read() {
        let temp = tempdir().unwrap();
        let store = FileBlockStore::open(temp.path()).unwrap();

        let block = store.create_block(0).unwrap();
        block.write(0, b"hello").unwrap();
        block.write(5, b" world").unwrap();
        assert_eq!(block.length(), 11);

        let mut buf = [0u8; 5];
        assert_eq!(block.read(6, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn short_read_at_block_end() {
        let temp = tempdir().unwrap();
        let store = FileBlockStore::open(temp.path()).unwrap();

        let block = store.create_block(0).unwrap();
        block.write(0, b"abc").unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(block.read(1, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"bc");
        assert_eq!(block.read(3, &mut buf).unwrap(), 0);
    }

    #[test]
    fn out_of_order_writes_extend_length() {
        let temp = tempdir().unwrap();
        let store = FileBlockStore::open(temp.path()).unwrap();

        let block = store.create_block(0).unwrap();
        block.write(8, b"tail").unwrap();
        block.write(0, b"head").unwrap();
        assert_eq!(block.length(), 12);
    }

    #[test]
    fn blocks_are_listed_in_order() {
        let temp = tempdir().unwrap();
        let store = FileBlockStore::open(temp.path()).unwrap();

        store.create_block(8192).unwrap();
        store.create_block(0).unwrap();
        store.create_block(4096).unwrap();
        store.write_metadata("startup-metadata.0", b"meta").unwrap();

        assert_eq!(store.list_blocks().unwrap(), vec![0, 4096, 8192]);
    }

    #[test]
    fn create_existing_block_fails() {
        let temp = tempdir().unwrap();
        let store = FileBlockStore::open(temp.path()).unwrap();

        store.create_block(0).unwrap();
        assert!(matches!(
            store.create_block(0),
            Err(StorageError::BlockExists { address: 0 })
        ));
    }

    #[test]
    fn open_missing_block_fails() {
        let temp = tempdir().unwrap();
        let store = FileBlockStore::open(temp.path()).unwrap();

        assert!(matches!(
            store.open_block(4096),
            Err(StorageError::BlockNotFound { address: 4096 })
        ));
    }

    #[test]
    fn block_persists_across_reopen() {
        let temp = tempdir().unwrap();
        {
            let store = FileBlockStore::open(temp.path()).unwrap();
            let block = store.create_block(0).unwrap();
            block.write(0, b"persistent data").unwrap();
            block.sync().unwrap();
        }

        let store = FileBlockStore::open(temp.path()).unwrap();
        let block = store.open_block(0).unwrap();
        assert_eq!(block.length(), 15);

        let mut buf = vec![0u8; 15];
        block.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"persistent data");
    }

    #[test]
    fn read_only_block_refuses_writes_and_can_be_removed() {
        let temp = tempdir().unwrap();
        let store = FileBlockStore::open(temp.path()).unwrap();

        let block = store.create_block(0).unwrap();
        block.write(0, b"done").unwrap();
        block.set_read_only().unwrap();

        assert!(matches!(
            block.write(4, b"more"),
            Err(StorageError::ReadOnly { address: 0 })
        ));
        drop(block);

        let reopened = store.open_block(0).unwrap();
        assert!(reopened.is_read_only());
        drop(reopened);

        let again = store.open_block(0).unwrap();
        again.set_writable().unwrap();
        again.write(4, b"more").unwrap();
        again.truncate(2).unwrap();
        assert!(!again.is_read_only());
        drop(again);
        assert!(!store.open_block(0).unwrap().is_read_only());

        store.remove_block(0).unwrap();
        assert!(store.list_blocks().unwrap().is_empty());
    }

    #[test]
    fn truncate_block() {
        let temp = tempdir().unwrap();
        let store = FileBlockStore::open(temp.path()).unwrap();

        let block = store.create_block(0).unwrap();
        block.write(0, b"hello world").unwrap();
        block.truncate(5).unwrap();
        assert_eq!(block.length(), 5);
        assert!(block.truncate(10).is_err());
    }

    #[test]
    fn metadata_round_trip() {
        let temp = tempdir().unwrap();
        let store = FileBlockStore::open(temp.path()).unwrap();

        assert!(store.read_metadata("meta").unwrap().is_none());
        store.write_metadata("meta", b"first").unwrap();
        store.write_metadata("meta", b"2nd").unwrap();
        assert_eq!(store.read_metadata("meta").unwrap().unwrap(), b"2nd");

        store.remove_metadata("meta").unwrap();
        assert!(store.read_metadata("meta").unwrap().is_none());
        store.remove_metadata("meta").unwrap();
    }
}
