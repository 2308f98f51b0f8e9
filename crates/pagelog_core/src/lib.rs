//! # PageLog Core
//!
//! Append-only, page-oriented log for an embedded key-value store.
//!
//! This crate provides:
//! - Variable-length records ("loggables") at stable byte addresses
//! - Fixed-size pages with hash trailers, grouped into fixed-size files
//! - A buffered writer with bounded asynchronous page flushes
//! - Separate and shared generational page caches
//! - Crash-safe startup metadata and recovery of a torn log tail
//! - Optional position-keyed page encryption
//!
//! ## Addressing
//!
//! A log address is a byte offset into the concatenation of all files. The
//! last 8 bytes of every page hold its hash and are never addressed by a
//! loggable; [`LogGeometry::adjust_loggable_address`] steps over them.
//!
//! ## Example
//!
//! ```rust
//! use pagelog_core::{Log, LogConfig};
//!
//! let log = Log::open_in_memory(LogConfig::new().file_size(64).page_size(1024))?;
//!
//! let mut session = log.begin_write()?;
//! let first = session.write(1, 0, b"alpha")?;
//! let second = session.write(2, 42, b"beta")?;
//! session.end()?;
//!
//! let types: Vec<u8> = log
//!     .loggable_iter(first)
//!     .map(|l| l.map(|l| l.loggable_type()))
//!     .collect::<Result<_, _>>()?;
//! assert_eq!(types, vec![1, 2]);
//! assert_eq!(log.read(second)?.structure_id(), 42);
//! # Ok::<(), pagelog_core::LogError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod block_set;
mod cache;
mod config;
pub mod crypto;
mod error;
pub mod geometry;
mod iterator;
mod listener;
mod log;
pub mod loggable;
pub mod metadata;
mod page;
mod reader;
mod recovery;
mod stats;
mod tip;
pub mod varint;
mod writer;

pub use block_set::{BlockSet, MutableBlockSet};
pub use cache::{Page, SharedPageCache};
pub use config::{LogConfig, DEFAULT_CACHE_MEMORY};
pub use crypto::{CipherConfig, CipherKey};
pub use error::{BlockNotFoundKind, LogError, LogResult};
pub use geometry::LogGeometry;
pub use iterator::{DataIterator, LoggableIterator};
pub use listener::{BlockListener, ReadBytesListener};
pub use log::{Log, WriteSession};
pub use loggable::{Loggable, LoggableData, PayloadIterator, SpanningData};
pub use metadata::{read_backup_metadata, BackupMetadata, StartupMetadata};
pub use page::page_hash;
pub use reader::LogReader;
pub use stats::{LogStatistics, StatsSnapshot};
pub use writer::WriteExecutor;
