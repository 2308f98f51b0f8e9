//! # PageLog Storage
//!
//! Block storage abstraction and providers for PageLog.
//!
//! This crate provides the lowest-level storage abstraction for the log.
//! Blocks are **opaque byte ranges** - they do not interpret the pages,
//! checksums or records stored in them.
//!
//! ## Design Principles
//!
//! - A block is one file of the log, addressed by its first log address
//! - A block store is a directory of blocks plus small metadata files
//! - Must be `Send + Sync`: readers and asynchronous page flushes share blocks
//! - The log owns all format interpretation
//!
//! ## Available Stores
//!
//! - [`InMemoryBlockStore`] - For testing and ephemeral logs
//! - [`FileBlockStore`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use pagelog_storage::{Block, BlockStore, InMemoryBlockStore};
//!
//! let store = InMemoryBlockStore::new();
//! let block = store.create_block(0).unwrap();
//! block.write(0, b"hello world").unwrap();
//!
//! let mut buf = [0u8; 11];
//! block.read(0, &mut buf).unwrap();
//! assert_eq!(&buf, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod block;
mod error;
mod file;
mod memory;
pub mod naming;

pub use block::{Block, BlockStore, EmptyBlock};
pub use error::{StorageError, StorageResult};
pub use file::{FileBlock, FileBlockStore};
pub use memory::{InMemoryBlock, InMemoryBlockStore};
