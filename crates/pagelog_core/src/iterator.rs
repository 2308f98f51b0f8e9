//! Cursors over log bytes, loggables and blocks.

use crate::cache::Page;
use crate::error::{BlockNotFoundKind, LogError, LogResult};
use crate::geometry::LogGeometry;
use crate::loggable::Loggable;
use crate::page::PagePipeline;
use crate::reader::{read_fully, LogReader};
use crate::varint::read_compressed;
use bytes::Bytes;
use pagelog_storage::Block;
use std::sync::Arc;

/// Sequential reader of usable log bytes, stepping over page trailers.
pub struct DataIterator {
    reader: LogReader,
    geometry: LogGeometry,
    address: u64,
    page: Option<Page>,
    page_address: u64,
}

impl DataIterator {
    pub(crate) fn new(reader: LogReader, address: u64) -> Self {
        let geometry = *reader.geometry();
        Self {
            address: geometry.adjust_loggable_address(address, 0),
            reader,
            geometry,
            page: None,
            page_address: 0,
        }
    }

    /// Address of the next byte.
    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Returns `true` while bytes remain below the high address.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.address < self.reader.high_address()
    }

    /// Loads the page under the cursor and returns the offset into it.
    fn current(&mut self) -> LogResult<(&Page, usize)> {
        if !self.has_next() {
            return Err(LogError::block_not_found(
                self.address,
                BlockNotFoundKind::Overflow,
            ));
        }
        let page_address = self.geometry.page_address(self.address);
        if self.page.is_none() || self.page_address != page_address {
            self.page = Some(self.reader.page(page_address)?);
            self.page_address = page_address;
        }
        let offset = self.geometry.page_offset(self.address);
        match &self.page {
            Some(page) => Ok((page, offset)),
            None => Err(LogError::invalid_operation("page vanished from iterator")),
        }
    }

    fn advance(&mut self, n: u64) {
        self.address = self.geometry.adjust_loggable_address(self.address, n);
    }

    fn check_available(&self, n: u64) -> LogResult<()> {
        let end = self.geometry.adjust_loggable_address(self.address, n);
        if end > self.reader.high_address() {
            return Err(LogError::block_not_found(end, BlockNotFoundKind::Overflow));
        }
        Ok(())
    }

    /// Reads one byte.
    ///
    /// # Errors
    ///
    /// Fails at the high address and on unreadable pages.
    pub fn next_byte(&mut self) -> LogResult<u8> {
        let (page, offset) = self.current()?;
        let byte = page[offset];
        self.advance(1);
        Ok(byte)
    }

    /// Reads a big-endian integer of `width` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidArgument`] for widths above 8.
    pub fn next_long(&mut self, width: usize) -> LogResult<u64> {
        if width > 8 {
            return Err(LogError::invalid_argument(format!(
                "cannot read {width} bytes into a u64"
            )));
        }
        let mut value = 0u64;
        for _ in 0..width {
            value = (value << 8) | u64::from(self.next_byte()?);
        }
        Ok(value)
    }

    /// Reads a compressed unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::DataCorruption`] for malformed encodings, which
    /// also switches the log to read-only.
    pub fn next_compressed(&mut self) -> LogResult<u64> {
        read_compressed(|| self.next_byte()).map_err(|err| self.reader.checked(err))
    }

    /// Skips `n` usable bytes.
    ///
    /// # Errors
    ///
    /// Fails if fewer than `n` bytes remain.
    pub fn skip(&mut self, n: u64) -> LogResult<()> {
        self.check_available(n)?;
        self.advance(n);
        Ok(())
    }

    /// Fills `buf` with the next bytes.
    ///
    /// # Errors
    ///
    /// Fails if fewer than `buf.len()` bytes remain.
    pub fn read_into(&mut self, buf: &mut [u8]) -> LogResult<()> {
        self.check_available(buf.len() as u64)?;
        let usable = self.geometry.usable_page_size();
        let mut done = 0;
        while done < buf.len() {
            let (page, offset) = self.current()?;
            let n = (usable - offset).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&page[offset..offset + n]);
            done += n;
            self.advance(n as u64);
        }
        Ok(())
    }

    /// Returns the next `len` bytes without copying when they lie in the
    /// current page, advancing past them. Returns `None` and leaves the
    /// cursor in place otherwise.
    pub(crate) fn page_slice(&mut self, len: usize) -> LogResult<Option<Bytes>> {
        if len == 0 {
            return Ok(Some(Bytes::new()));
        }
        let usable = self.geometry.usable_page_size();
        let (page, offset) = self.current()?;
        if offset + len > usable {
            return Ok(None);
        }
        let bytes = Bytes::from_owner(Arc::clone(page)).slice(offset..offset + len);
        self.advance(len as u64);
        Ok(Some(bytes))
    }
}

impl std::fmt::Debug for DataIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataIterator")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Iterator over the data loggables of a snapshot.
///
/// Null and hash loggables are consumed silently. When the cursor runs into
/// a removed file, iteration resumes at the next file that still exists.
#[derive(Debug)]
pub struct LoggableIterator {
    reader: LogReader,
    address: u64,
    end: u64,
    done: bool,
}

impl LoggableIterator {
    pub(crate) fn new(reader: LogReader, address: u64, end: u64) -> Self {
        Self {
            reader,
            address,
            end,
            done: false,
        }
    }

    /// Address the next loggable will be read from.
    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }
}

impl Iterator for LoggableIterator {
    type Item = LogResult<Loggable>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done || self.address >= self.end {
                return None;
            }
            match self.reader.read(self.address) {
                Ok(loggable) => {
                    self.address = loggable.end_address();
                    if loggable.is_internal() {
                        continue;
                    }
                    return Some(Ok(loggable));
                }
                Err(LogError::BlockNotFound {
                    kind: BlockNotFoundKind::Missing | BlockNotFoundKind::Underflow,
                    ..
                }) => {
                    let geometry = self.reader.geometry();
                    let next_file = geometry.file_address(self.address) + geometry.file_length_bound();
                    let next = self.reader.tip().blocks.iter_from(next_file).next().map(|b| b.address());
                    match next {
                        Some(address) => self.address = address,
                        None => self.done = true,
                    }
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// One page of a block, decrypted and, when complete, verified.
#[derive(Debug, Clone)]
pub(crate) struct BlockPage {
    pub(crate) address: u64,
    pub(crate) data: Vec<u8>,
    pub(crate) len: usize,
}

impl BlockPage {
    pub(crate) fn is_complete(&self, page_size: usize) -> bool {
        self.len == page_size
    }
}

/// Page-by-page reader of a single block, used by recovery and warmup.
pub(crate) struct BlockDataIterator {
    block: Arc<dyn Block>,
    pipeline: PagePipeline,
    position: u64,
    length: u64,
    failed: bool,
}

impl BlockDataIterator {
    pub(crate) fn new(block: Arc<dyn Block>, pipeline: PagePipeline) -> Self {
        let length = block.length();
        Self::with_range(block, pipeline, 0, length)
    }

    /// Iterates the pages overlapping `[from, to)`, relative to the block.
    pub(crate) fn with_range(block: Arc<dyn Block>, pipeline: PagePipeline, from: u64, to: u64) -> Self {
        let page_size = pipeline.geometry().page_size() as u64;
        Self {
            length: to.min(block.length()),
            block,
            pipeline,
            position: from - from % page_size,
            failed: false,
        }
    }
}

impl Iterator for BlockDataIterator {
    type Item = LogResult<BlockPage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.position >= self.length {
            return None;
        }
        let page_size = self.pipeline.geometry().page_size();
        let address = self.block.address() + self.position;
        let want = (self.length - self.position).min(page_size as u64) as usize;
        let mut data = vec![0u8; page_size];

        let result = read_fully(self.block.as_ref(), self.position, &mut data[..want]).and_then(|len| {
            self.pipeline.open_page(address, &mut data, len)?;
            Ok(len)
        });
        match result {
            Ok(len) => {
                self.position += page_size as u64;
                Some(Ok(BlockPage { address, data, len }))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagelog_storage::{BlockStore, InMemoryBlockStore};

    fn pipeline() -> PagePipeline {
        PagePipeline::new(LogGeometry::new(1024, 4096, true).unwrap(), None)
    }

    #[test]
    fn block_pages_verify_and_stop_on_error() {
        let store = InMemoryBlockStore::new();
        let block = store.create_block(0).unwrap();
        let p = pipeline();

        block.write(0, &p.seal_page(0, &vec![0x81u8; 1024])).unwrap();
        let mut bad = p.seal_page(1024, &vec![0x82u8; 1024]);
        bad[3] ^= 1;
        block.write(1024, &bad).unwrap();
        block.write(2048, &[0x83; 100]).unwrap();

        let mut pages = BlockDataIterator::new(block, p);
        let first = pages.next().unwrap().unwrap();
        assert_eq!(first.address, 0);
        assert!(first.is_complete(1024));
        assert!(pages.next().unwrap().unwrap_err().is_corruption());
        assert!(pages.next().is_none());
    }

    #[test]
    fn partial_tail_page() {
        let store = InMemoryBlockStore::new();
        let block = store.create_block(4096).unwrap();
        block.write(0, &[0x80; 10]).unwrap();

        let pages: Vec<BlockPage> = BlockDataIterator::new(block, pipeline())
            .map(|p| p.unwrap())
            .collect();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].address, 4096);
        assert_eq!(pages[0].len, 10);
        assert!(!pages[0].is_complete(1024));
    }
}
