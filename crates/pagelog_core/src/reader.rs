//! Snapshot reads.
//!
//! A [`LogReader`] pairs the state shared by all readers of a log with one
//! published tip. Everything it reads is consistent with that tip, no matter
//! what the writer does meanwhile. Pages are resolved in this order: the
//! tip's partial page, the page cache, pages still being flushed, and
//! finally the block on disk.

use crate::cache::{LogPageCache, Page};
use crate::error::{BlockNotFoundKind, LogError, LogResult};
use crate::geometry::LogGeometry;
use crate::iterator::{DataIterator, LoggableIterator};
use crate::listener::Listeners;
use crate::loggable::{
    Loggable, LoggableData, SpanningData, HASH_CODE_TYPE, HASH_RECORD_SIZE, NULL_TYPE,
};
use crate::page::PagePipeline;
use crate::stats::LogStatistics;
use crate::tip::LogTip;
use bytes::Bytes;
use pagelog_storage::Block;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::error;

/// State shared by the writer and every reader of one log.
pub(crate) struct ReadContext {
    pub(crate) pipeline: PagePipeline,
    pub(crate) cache: LogPageCache,
    /// Complete pages whose flush has not finished yet.
    pub(crate) inflight: RwLock<HashMap<u64, Page>>,
    pub(crate) stats: LogStatistics,
    pub(crate) listeners: Listeners,
    read_only: AtomicBool,
}

impl ReadContext {
    pub(crate) fn new(pipeline: PagePipeline, cache: LogPageCache) -> Self {
        Self {
            pipeline,
            cache,
            inflight: RwLock::new(HashMap::new()),
            stats: LogStatistics::new(),
            listeners: Listeners::default(),
            read_only: AtomicBool::new(false),
        }
    }

    pub(crate) fn geometry(&self) -> &LogGeometry {
        self.pipeline.geometry()
    }

    pub(crate) fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// Stops all further writes after corrupted bytes were seen.
    pub(crate) fn switch_to_read_only(&self, cause: &LogError) {
        if !self.read_only.swap(true, Ordering::AcqRel) {
            error!(error = %cause, "corruption detected, log switched to read-only");
        }
    }
}

/// Reads `buf.len()` bytes unless the block ends first.
pub(crate) fn read_fully(block: &dyn Block, position: u64, buf: &mut [u8]) -> LogResult<usize> {
    let mut done = 0;
    while done < buf.len() {
        let n = block.read(position + done as u64, &mut buf[done..])?;
        if n == 0 {
            break;
        }
        done += n;
    }
    Ok(done)
}

/// A consistent, cheaply cloneable view of the log.
#[derive(Clone)]
pub struct LogReader {
    ctx: Arc<ReadContext>,
    tip: Arc<LogTip>,
}

impl LogReader {
    pub(crate) fn new(ctx: Arc<ReadContext>, tip: Arc<LogTip>) -> Self {
        Self { ctx, tip }
    }

    /// Address one past the last byte visible to this reader.
    #[must_use]
    pub fn high_address(&self) -> u64 {
        self.tip.high_address
    }

    /// Addresses of the files visible to this reader.
    #[must_use]
    pub fn file_addresses(&self) -> Vec<u64> {
        self.tip.blocks.addresses().collect()
    }

    /// Page and file layout of the log.
    #[must_use]
    pub fn geometry(&self) -> &LogGeometry {
        self.ctx.geometry()
    }

    pub(crate) fn tip(&self) -> &LogTip {
        &self.tip
    }

    /// Byte cursor starting at `address`.
    #[must_use]
    pub fn data_iterator(&self, address: u64) -> DataIterator {
        DataIterator::new(self.clone(), address)
    }

    /// Iterates data loggables from `address` to the high address.
    #[must_use]
    pub fn loggables(&self, address: u64) -> LoggableIterator {
        LoggableIterator::new(self.clone(), address, self.high_address())
    }

    /// Iterates data loggables in `[from, to)`.
    #[must_use]
    pub fn loggables_between(&self, from: u64, to: u64) -> LoggableIterator {
        LoggableIterator::new(self.clone(), from, to.min(self.high_address()))
    }

    /// Decodes the loggable at `address`.
    ///
    /// Any malformed record switches the log to read-only.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::BlockNotFound`] for addresses outside the log and
    /// [`LogError::DataCorruption`] for malformed records or bad pages.
    pub fn read(&self, address: u64) -> LogResult<Loggable> {
        self.decode(address).map_err(|err| self.checked(err))
    }

    /// Switches the log to read-only if `err` reports corrupted data.
    pub(crate) fn checked(&self, err: LogError) -> LogError {
        if err.is_corruption() {
            self.ctx.switch_to_read_only(&err);
        }
        err
    }

    fn decode(&self, address: u64) -> LogResult<Loggable> {
        let geometry = *self.geometry();
        let mut it = self.data_iterator(address);
        let address = it.address();

        let type_byte = it.next_byte()?;
        if type_byte & 0x80 == 0 {
            return Err(LogError::corruption(format!(
                "invalid type byte {type_byte:#04x} at address {address}"
            )));
        }
        let loggable_type = type_byte ^ 0x80;
        self.ctx.stats.record_loggable_read();

        match loggable_type {
            NULL_TYPE => {
                return Ok(Loggable {
                    address,
                    loggable_type,
                    structure_id: 0,
                    data: LoggableData::Page(Bytes::new()),
                    end_address: it.address(),
                })
            }
            HASH_CODE_TYPE => {
                let mut digest = vec![0u8; HASH_RECORD_SIZE - 1];
                it.read_into(&mut digest)?;
                return Ok(Loggable {
                    address,
                    loggable_type,
                    structure_id: 0,
                    data: LoggableData::Page(Bytes::from(digest)),
                    end_address: it.address(),
                });
            }
            _ => {}
        }

        let structure_id = it.next_compressed()?;
        let structure_id = u32::try_from(structure_id).map_err(|_| {
            LogError::corruption(format!(
                "structure id {structure_id} out of range at address {address}"
            ))
        })?;
        let data_length = it.next_compressed()?;
        if data_length > geometry.usable_file_size() {
            return Err(LogError::corruption(format!(
                "data length {data_length} at address {address} exceeds file size"
            )));
        }
        let data_address = it.address();
        let end_address = geometry.adjust_loggable_address(data_address, data_length);
        if end_address > self.high_address() {
            return Err(LogError::corruption(format!(
                "loggable at {address} ends at {end_address}, past high address {}",
                self.high_address()
            )));
        }
        if geometry.file_address(address) != geometry.file_address(end_address - 1) {
            return Err(LogError::corruption(format!(
                "loggable at {address} crosses a file boundary"
            )));
        }

        let data_length = data_length as usize;
        let data = match it.page_slice(data_length)? {
            Some(bytes) => LoggableData::Page(bytes),
            None => LoggableData::Spanning(SpanningData::new(
                self.clone(),
                data_address,
                data_length,
            )),
        };

        Ok(Loggable {
            address,
            loggable_type,
            structure_id,
            data,
            end_address,
        })
    }

    /// Plaintext of the page starting at `page_address`.
    pub(crate) fn page(&self, page_address: u64) -> LogResult<Page> {
        if let Some(page) = self.tip.partial_page(page_address) {
            return Ok(Arc::clone(page));
        }
        if page_address >= self.tip.high_address {
            return Err(LogError::block_not_found(
                page_address,
                BlockNotFoundKind::Overflow,
            ));
        }
        self.ctx.cache.get_page(page_address, || {
            if let Some(page) = self.ctx.inflight.read().get(&page_address) {
                return Ok(Arc::clone(page));
            }
            self.load_page(page_address)
        })
    }

    fn load_page(&self, page_address: u64) -> LogResult<Page> {
        let geometry = self.geometry();
        let file_address = geometry.file_address(page_address);
        let blocks = &self.tip.blocks;
        let Some(block) = blocks.find(file_address) else {
            let kind = match (blocks.minimum(), blocks.maximum()) {
                (Some(min), _) if file_address < min => BlockNotFoundKind::Underflow,
                (_, Some(max)) if file_address > max => BlockNotFoundKind::Overflow,
                _ => BlockNotFoundKind::Missing,
            };
            return Err(LogError::block_not_found(page_address, kind));
        };

        let page_size = geometry.page_size();
        let mut buf = vec![0u8; page_size];
        let n = read_fully(block.as_ref(), page_address - file_address, &mut buf)?;
        let opened = if n < page_size {
            Err(LogError::corruption(format!(
                "page {page_address} is truncated to {n} bytes"
            )))
        } else {
            self.ctx.pipeline.open_page(page_address, &mut buf, n)
        };
        if let Err(err) = opened {
            self.ctx.switch_to_read_only(&err);
            return Err(err);
        }

        self.ctx.stats.record_bytes_read(n as u64);
        self.ctx.listeners.bytes_read(page_address, &buf);
        Ok(Arc::from(buf))
    }
}

impl fmt::Debug for LogReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogReader")
            .field("high_address", &self.tip.high_address)
            .field("files", &self.tip.blocks.len())
            .finish_non_exhaustive()
    }
}
