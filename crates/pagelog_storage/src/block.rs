//! Block and block store trait definitions.

use crate::error::{StorageError, StorageResult};
use std::fmt;
use std::sync::Arc;

/// One physical file of the log.
///
/// Blocks are **opaque byte ranges**. They know their starting log address
/// and their current length; everything else (pages, checksums, loggables)
/// is interpreted by the log.
///
/// # Invariants
///
/// - `read` returns exactly the bytes previously written at that position
/// - `write` may target any position; the length grows to cover it
/// - `sync` makes all previous writes durable
/// - Blocks are shared between readers and asynchronous writers, so every
///   method takes `&self`
pub trait Block: Send + Sync + fmt::Debug {
    /// Returns the log address of the first byte of this block.
    fn address(&self) -> u64;

    /// Returns the current length of the block in bytes.
    fn length(&self) -> u64;

    /// Reads into `buf` starting at `position` within the block.
    ///
    /// Returns the number of bytes read, which is smaller than `buf.len()`
    /// only when the block ends before the buffer is filled.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read(&self, position: u64, buf: &mut [u8]) -> StorageResult<usize>;

    /// Writes `data` at `position` within the block.
    ///
    /// # Errors
    ///
    /// Returns an error if the block is read-only or an I/O error occurs.
    fn write(&self, position: u64, data: &[u8]) -> StorageResult<()>;

    /// Syncs all data and metadata of this block to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&self) -> StorageResult<()>;

    /// Truncates the block to `length` bytes.
    ///
    /// Used by recovery to cut a torn tail off the last block.
    ///
    /// # Errors
    ///
    /// Returns an error if `length` exceeds the current length or the
    /// truncation fails.
    fn truncate(&self, length: u64) -> StorageResult<()>;

    /// Returns `true` if the block no longer accepts writes.
    fn is_read_only(&self) -> bool;

    /// Marks the block read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying permissions cannot be changed.
    fn set_read_only(&self) -> StorageResult<()>;

    /// Lets a read-only block accept writes again.
    ///
    /// Recovery needs this when it cuts back into a completed file.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying permissions cannot be changed.
    fn set_writable(&self) -> StorageResult<()>;
}

/// A directory of blocks plus a handful of small named metadata files.
///
/// This is the pluggable I/O provider of the log. The log never touches the
/// file system directly; every byte goes through a `BlockStore`.
///
/// # Implementors
///
/// - [`super::FileBlockStore`] - For persistent storage
/// - [`super::InMemoryBlockStore`] - For testing
pub trait BlockStore: Send + Sync + fmt::Debug {
    /// Returns the addresses of all existing blocks in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    fn list_blocks(&self) -> StorageResult<Vec<u64>>;

    /// Opens an existing block.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::BlockNotFound`] if no block exists at `address`.
    fn open_block(&self, address: u64) -> StorageResult<Arc<dyn Block>>;

    /// Creates a new empty block.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::BlockExists`] if a block already exists at
    /// `address`.
    fn create_block(&self, address: u64) -> StorageResult<Arc<dyn Block>>;

    /// Removes a block.
    ///
    /// # Errors
    ///
    /// Returns an error if the block cannot be removed.
    fn remove_block(&self, address: u64) -> StorageResult<()>;

    /// Reads a named metadata file, returning `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    fn read_metadata(&self, name: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces the contents of a named metadata file and makes it durable.
    ///
    /// The write happens in place. Callers that need crash safety alternate
    /// between several names.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or sync fails.
    fn write_metadata(&self, name: &str, data: &[u8]) -> StorageResult<()>;

    /// Removes a named metadata file if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    fn remove_metadata(&self, name: &str) -> StorageResult<()>;

    /// Makes block creation and removal durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync_directory(&self) -> StorageResult<()>;

    /// Human readable location of the store, used in log messages.
    fn location(&self) -> String;
}

/// Zero-length stand-in returned for addresses with no block.
///
/// Lets range scans over sparse block sets run without branching on
/// presence: reads return nothing and writes are refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmptyBlock {
    address: u64,
}

impl EmptyBlock {
    /// Creates a placeholder for `address`.
    #[must_use]
    pub const fn new(address: u64) -> Self {
        Self { address }
    }
}

impl Block for EmptyBlock {
    fn address(&self) -> u64 {
        self.address
    }

    fn length(&self) -> u64 {
        0
    }

    fn read(&self, _position: u64, _buf: &mut [u8]) -> StorageResult<usize> {
        Ok(0)
    }

    fn write(&self, _position: u64, _data: &[u8]) -> StorageResult<()> {
        Err(StorageError::BlockNotFound {
            address: self.address,
        })
    }

    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&self, length: u64) -> StorageResult<()> {
        if length == 0 {
            Ok(())
        } else {
            Err(StorageError::BlockNotFound {
                address: self.address,
            })
        }
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn set_read_only(&self) -> StorageResult<()> {
        Ok(())
    }

    fn set_writable(&self) -> StorageResult<()> {
        Err(StorageError::BlockNotFound {
            address: self.address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_block_reads_nothing() {
        let block = EmptyBlock::new(4096);
        let mut buf = [0u8; 16];
        assert_eq!(block.address(), 4096);
        assert_eq!(block.length(), 0);
        assert_eq!(block.read(0, &mut buf).unwrap(), 0);
    }

    #[test]
    fn empty_block_refuses_writes() {
        let block = EmptyBlock::new(0);
        assert!(matches!(
            block.write(0, b"x"),
            Err(StorageError::BlockNotFound { address: 0 })
        ));
    }
}
