//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No block exists at the requested address.
    #[error("block not found at address {address}")]
    BlockNotFound {
        /// The requested block address.
        address: u64,
    },

    /// A block already exists at the requested address.
    #[error("block already exists at address {address}")]
    BlockExists {
        /// The conflicting block address.
        address: u64,
    },

    /// The block was marked read-only and cannot be modified.
    #[error("block at address {address} is read-only")]
    ReadOnly {
        /// The read-only block address.
        address: u64,
    },

    /// A file name is not a valid block file name, or an address cannot be named.
    #[error("invalid block file name: {0}")]
    InvalidFileName(String),

    /// Another process holds the directory lock.
    #[error("storage locked: another process has exclusive access to {}", path.display())]
    Locked {
        /// The locked directory.
        path: PathBuf,
    },

    /// The storage is closed.
    #[error("storage is closed")]
    Closed,
}
