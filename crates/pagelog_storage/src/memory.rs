//! In-memory block store for testing.

use crate::block::{Block, BlockStore};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// An in-memory block.
#[derive(Debug)]
pub struct InMemoryBlock {
    address: u64,
    data: RwLock<Vec<u8>>,
    read_only: AtomicBool,
    syncs: AtomicU64,
}

impl InMemoryBlock {
    fn new(address: u64, data: Vec<u8>) -> Self {
        Self {
            address,
            data: RwLock::new(data),
            read_only: AtomicBool::new(false),
            syncs: AtomicU64::new(0),
        }
    }

    /// Returns a copy of the block contents.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Returns how many times the block was synced.
    #[must_use]
    pub fn sync_count(&self) -> u64 {
        self.syncs.load(Ordering::Relaxed)
    }
}

impl Block for InMemoryBlock {
    fn address(&self) -> u64 {
        self.address
    }

    fn length(&self) -> u64 {
        self.data.read().len() as u64
    }

    fn read(&self, position: u64, buf: &mut [u8]) -> StorageResult<usize> {
        let data = self.data.read();
        let Ok(start) = usize::try_from(position) else {
            return Ok(0);
        };
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write(&self, position: u64, bytes: &[u8]) -> StorageResult<()> {
        if self.is_read_only() {
            return Err(StorageError::ReadOnly {
                address: self.address,
            });
        }
        let start = usize::try_from(position).map_err(|_| StorageError::Closed)?;
        let end = start + bytes.len();

        let mut data = self.data.write();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        // Nothing to make durable
        self.syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn truncate(&self, length: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let current = data.len() as u64;

        if length > current {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate block {} to {} bytes, current length is {}",
                    self.address, length, current
                ),
            )));
        }

        data.truncate(length as usize);
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    fn set_read_only(&self) -> StorageResult<()> {
        self.read_only.store(true, Ordering::Release);
        Ok(())
    }

    fn set_writable(&self) -> StorageResult<()> {
        self.read_only.store(false, Ordering::Release);
        Ok(())
    }
}

/// An in-memory block store.
///
/// Blocks and metadata live as long as the store, so dropping a log and
/// opening a new one over the same `Arc<InMemoryBlockStore>` behaves like
/// a process restart. Suitable for:
/// - Unit tests
/// - Crash and corruption tests that need to edit raw bytes
/// - Ephemeral logs that don't need persistence
///
/// # Example
///
/// ```rust
/// use pagelog_storage::{Block, BlockStore, InMemoryBlockStore};
///
/// let store = InMemoryBlockStore::new();
/// let block = store.create_block(0).unwrap();
/// block.write(0, b"test data").unwrap();
/// assert_eq!(block.length(), 9);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBlockStore {
    blocks: RwLock<BTreeMap<u64, Arc<InMemoryBlock>>>,
    metadata: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlockStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the bytes of a block.
    #[must_use]
    pub fn block_data(&self, address: u64) -> Option<Vec<u8>> {
        self.blocks.read().get(&address).map(|b| b.data())
    }

    /// Replaces the bytes of a block, creating it if needed.
    ///
    /// Useful for simulating torn writes and bit rot.
    pub fn set_block_data(&self, address: u64, data: Vec<u8>) {
        let mut blocks = self.blocks.write();
        match blocks.get(&address) {
            Some(block) => *block.data.write() = data,
            None => {
                blocks.insert(address, Arc::new(InMemoryBlock::new(address, data)));
            }
        }
    }

    /// Replaces a metadata file without any validation.
    pub fn set_metadata(&self, name: &str, data: Vec<u8>) {
        self.metadata.write().insert(name.to_string(), data);
    }

    /// Returns the names of all metadata files.
    #[must_use]
    pub fn metadata_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.metadata.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the typed block, if present.
    #[must_use]
    pub fn block(&self, address: u64) -> Option<Arc<InMemoryBlock>> {
        self.blocks.read().get(&address).cloned()
    }

    /// Deep copy of every block and metadata file.
    ///
    /// The copy is what a crash at this instant would leave behind: later
    /// writes to either store are not seen by the other. Read-only flags
    /// are not carried over.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        let blocks = self
            .blocks
            .read()
            .iter()
            .map(|(&address, block)| (address, Arc::new(InMemoryBlock::new(address, block.data()))))
            .collect();
        Self {
            blocks: RwLock::new(blocks),
            metadata: RwLock::new(self.metadata.read().clone()),
        }
    }
}

impl BlockStore for InMemoryBlockStore {
    fn list_blocks(&self) -> StorageResult<Vec<u64>> {
        Ok(self.blocks.read().keys().copied().collect())
    }

    fn open_block(&self, address: u64) -> StorageResult<Arc<dyn Block>> {
        self.blocks
            .read()
            .get(&address)
            .map(|b| Arc::clone(b) as Arc<dyn Block>)
            .ok_or(StorageError::BlockNotFound { address })
    }

    fn create_block(&self, address: u64) -> StorageResult<Arc<dyn Block>> {
        let mut blocks = self.blocks.write();
        if blocks.contains_key(&address) {
            return Err(StorageError::BlockExists { address });
        }
        let block = Arc::new(InMemoryBlock::new(address, Vec::new()));
        blocks.insert(address, Arc::clone(&block));
        Ok(block)
    }

    fn remove_block(&self, address: u64) -> StorageResult<()> {
        self.blocks.write().remove(&address);
        Ok(())
    }

    fn read_metadata(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.metadata.read().get(name).cloned())
    }

    fn write_metadata(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        self.metadata.write().insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn remove_metadata(&self, name: &str) -> StorageResult<()> {
        self.metadata.write().remove(name);
        Ok(())
    }

    fn sync_directory(&self) -> StorageResult<()> {
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
