//! Buffered page writer.
//!
//! The writer fills one plaintext page at a time. A full page is sealed,
//! published to the page cache and the in-flight map, and handed to the
//! [`WriteExecutor`]; the partial page is written when a session ends. A
//! failed background write poisons the writer until the log is reopened.
//!
//! ## Session end
//!
//! ```text
//! session wrote anything?
//!   room <  9  -> pad with nulls, the page completes
//!   append hash loggable
//! write the new bytes of the partial page
//! sync if durable or the sync period elapsed
//! freeze the block set and publish a new tip
//! ```

mod executor;

pub use executor::WriteExecutor;
use executor::PendingWrite;

use crate::block_set::{BlockSet, MutableBlockSet};
use crate::cache::Page;
use crate::error::{LogError, LogResult};
use crate::geometry::LogGeometry;
use crate::loggable::{encode_header, encoded_length, HASH_RECORD_SIZE, NULL_BYTE};
use crate::reader::ReadContext;
use crate::tip::LogTip;
use pagelog_storage::{Block, BlockStore};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Latch for the first failed background write.
#[derive(Debug, Default)]
struct WriteFailure {
    poisoned: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl WriteFailure {
    fn record(&self, reason: String) {
        let mut slot = self.reason.lock();
        if slot.is_none() {
            error!(%reason, "page write failed, writer poisoned");
            *slot = Some(reason);
            self.poisoned.store(true, Ordering::Release);
        }
    }

    fn check(&self) -> LogResult<()> {
        if !self.poisoned.load(Ordering::Acquire) {
            return Ok(());
        }
        let reason = self.reason.lock().clone().unwrap_or_default();
        Err(LogError::writer_poisoned(reason))
    }
}

/// Writer settings taken from the log configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WriterOptions {
    pub(crate) durable_write: bool,
    pub(crate) full_file_read_only: bool,
    pub(crate) sync_period: Duration,
}

/// The single writer of a log.
pub(crate) struct BufferedWriter {
    ctx: Arc<ReadContext>,
    store: Arc<dyn BlockStore>,
    executor: WriteExecutor,
    options: WriterOptions,
    geometry: LogGeometry,

    committed: BlockSet,
    mutable: Option<MutableBlockSet>,
    block: Option<Arc<dyn Block>>,

    page: Vec<u8>,
    page_address: u64,
    page_len: usize,
    flushed_len: usize,

    pending: Vec<PendingWrite>,
    failure: Arc<WriteFailure>,
    last_sync: Instant,
    session_start: Option<u64>,
}

impl BufferedWriter {
    /// Creates a writer continuing at the high address of `tip`.
    pub(crate) fn new(
        ctx: Arc<ReadContext>,
        store: Arc<dyn BlockStore>,
        executor: WriteExecutor,
        options: WriterOptions,
        tip: &LogTip,
    ) -> Self {
        let geometry = *ctx.geometry();
        let mut page = vec![0u8; geometry.page_size()];
        page[..tip.high_page_len].copy_from_slice(&tip.high_page[..tip.high_page_len]);

        let block = if geometry.is_file_start(tip.high_address) {
            None
        } else {
            tip.blocks
                .find(geometry.file_address(tip.high_address))
                .cloned()
        };

        Self {
            ctx,
            store,
            executor,
            options,
            geometry,
            committed: tip.blocks.clone(),
            mutable: None,
            block,
            page,
            page_address: tip.high_page_address,
            page_len: tip.high_page_len,
            flushed_len: tip.high_page_len,
            pending: Vec::new(),
            failure: Arc::new(WriteFailure::default()),
            last_sync: Instant::now(),
            session_start: None,
        }
    }

    /// Address the next byte will be written to.
    pub(crate) fn high_address(&self) -> u64 {
        self.page_address + self.page_len as u64
    }

    pub(crate) fn in_session(&self) -> bool {
        self.session_start.is_some()
    }

    pub(crate) fn check_poisoned(&self) -> LogResult<()> {
        self.failure.check()
    }

    /// Starts a write session.
    pub(crate) fn begin_write(&mut self) -> LogResult<()> {
        self.check_poisoned()?;
        if self.in_session() {
            return Err(LogError::invalid_operation("write session already active"));
        }
        self.mutable = Some(self.committed.begin_write());
        self.session_start = Some(self.high_address());
        Ok(())
    }

    /// Appends a loggable, or returns `None` if it does not fit the current
    /// file.
    pub(crate) fn try_write_loggable(
        &mut self,
        loggable_type: u8,
        structure_id: u32,
        data: &[u8],
    ) -> LogResult<Option<u64>> {
        let header = encode_header(loggable_type, structure_id, data.len())?;
        let length = encoded_length(structure_id, data.len());

        let mut room_in_file = self.geometry.remaining_in_file(self.high_address());
        if length > room_in_file {
            return Ok(None);
        }
        let room_in_page = self.geometry.remaining_in_page(self.high_address()) as u64;
        if length > room_in_page && length < (self.geometry.page_size() >> 4) as u64 {
            room_in_file -= room_in_page;
            if length > room_in_file {
                return Ok(None);
            }
            self.pad_page()?;
        }

        let address = self.high_address();
        self.write_bytes(&header)?;
        self.write_bytes(data)?;
        self.ctx.stats.record_loggable_written();
        Ok(Some(address))
    }

    fn write_bytes(&mut self, mut data: &[u8]) -> LogResult<()> {
        self.check_poisoned()?;
        let usable = self.geometry.usable_page_size();
        while !data.is_empty() {
            self.ensure_block()?;
            let n = (usable - self.page_len).min(data.len());
            self.page[self.page_len..self.page_len + n].copy_from_slice(&data[..n]);
            self.page_len += n;
            data = &data[n..];
            if self.page_len == usable {
                self.complete_page()?;
            }
        }
        Ok(())
    }

    fn write_nulls(&mut self, mut count: u64) -> LogResult<()> {
        self.check_poisoned()?;
        self.ctx.stats.record_padding(count);
        let usable = self.geometry.usable_page_size();
        while count > 0 {
            self.ensure_block()?;
            let n = ((usable - self.page_len) as u64).min(count) as usize;
            self.page[self.page_len..self.page_len + n].fill(NULL_BYTE);
            self.page_len += n;
            count -= n as u64;
            if self.page_len == usable {
                self.complete_page()?;
            }
        }
        Ok(())
    }

    /// Pads the rest of a started page with nulls.
    pub(crate) fn pad_page(&mut self) -> LogResult<u64> {
        if self.page_len == 0 {
            return Ok(0);
        }
        let count = (self.geometry.usable_page_size() - self.page_len) as u64;
        self.write_nulls(count)?;
        Ok(count)
    }

    /// Pads to the next page boundary, writing a whole page of nulls when
    /// already aligned.
    pub(crate) fn pad_whole_page(&mut self) -> LogResult<u64> {
        if self.page_len > 0 {
            return self.pad_page();
        }
        let count = self.geometry.usable_page_size() as u64;
        self.write_nulls(count)?;
        Ok(count)
    }

    /// Pads to the end of the current file.
    pub(crate) fn pad_to_file_end(&mut self) -> LogResult<u64> {
        let high = self.high_address();
        if self.geometry.is_file_start(high) {
            return Ok(0);
        }
        let count = self.geometry.remaining_in_file(high);
        self.write_nulls(count)?;
        debug!(from = high, padded = count, "padded to file end");
        Ok(count)
    }

    /// Makes sure the block for the current page exists.
    fn ensure_block(&mut self) -> LogResult<()> {
        let file_address = self.geometry.file_address(self.page_address);
        if self.block.as_ref().is_some_and(|b| b.address() == file_address) {
            return Ok(());
        }
        let Some(mutable) = self.mutable.as_mut() else {
            return Err(LogError::invalid_operation("write outside of a session"));
        };
        let block = match mutable.get(file_address) {
            Some(block) => Arc::clone(block),
            None => {
                let block = self.store.create_block(file_address)?;
                mutable.add(Arc::clone(&block));
                self.ctx.listeners.block_created(block.as_ref());
                self.ctx.stats.record_file_created();
                info!(address = file_address, "created log file");
                block
            }
        };
        self.block = Some(block);
        Ok(())
    }

    fn complete_page(&mut self) -> LogResult<()> {
        let page_address = self.page_address;
        let sealed = self.ctx.pipeline.seal_page(page_address, &self.page);
        let plain: Page = Arc::from(self.page.as_slice());
        self.ctx.cache.insert(page_address, Arc::clone(&plain));
        self.ctx.inflight.write().insert(page_address, plain);

        let position = page_address - self.geometry.file_address(page_address);
        let tail = sealed[self.flushed_len..].to_vec();
        self.schedule_write(position + self.flushed_len as u64, tail, Some(page_address))?;
        self.ctx.stats.record_page_flushed();

        self.page.fill(0);
        self.page_address += self.geometry.page_size() as u64;
        self.page_len = 0;
        self.flushed_len = 0;

        if self.geometry.is_file_start(self.page_address) {
            self.finish_file()?;
        }
        Ok(())
    }

    /// Writes the unflushed bytes of the partial page.
    fn flush_partial(&mut self) -> LogResult<()> {
        if self.page_len <= self.flushed_len {
            return Ok(());
        }
        let start = self.page_address + self.flushed_len as u64;
        let data = self
            .ctx
            .pipeline
            .seal_range(start, &self.page[self.flushed_len..self.page_len]);
        let position = start - self.geometry.file_address(start);
        self.schedule_write(position, data, None)?;
        self.flushed_len = self.page_len;
        Ok(())
    }

    fn schedule_write(
        &mut self,
        position: u64,
        data: Vec<u8>,
        completes_page: Option<u64>,
    ) -> LogResult<()> {
        self.check_poisoned()?;
        let Some(block) = self.block.clone() else {
            return Err(LogError::invalid_operation("no block to write to"));
        };
        let permit = self.executor.acquire()?;
        let ctx = Arc::clone(&self.ctx);
        let failure = Arc::clone(&self.failure);

        let write = self.executor.spawn(permit, move || {
            let len = data.len() as u64;
            let result = block.write(position, &data);
            match &result {
                Ok(()) => {
                    ctx.stats.record_bytes_written(len);
                    if let Some(page_address) = completes_page {
                        ctx.inflight.write().remove(&page_address);
                    }
                }
                Err(err) => failure.record(format!(
                    "block {} at position {position}: {err}",
                    block.address()
                )),
            }
            result
        })?;

        self.pending.retain_mut(|w| !w.is_finished());
        self.pending.push(write);
        Ok(())
    }

    /// Waits for every scheduled write.
    pub(crate) fn ensure_writes_completed(&mut self) -> LogResult<()> {
        for write in std::mem::take(&mut self.pending) {
            if let Err(err) = write.wait() {
                self.failure.record(err.to_string());
            }
        }
        self.check_poisoned()
    }

    /// Syncs and closes a full file.
    fn finish_file(&mut self) -> LogResult<()> {
        let Some(block) = self.block.take() else {
            return Ok(());
        };
        self.ensure_writes_completed()?;
        block.sync()?;
        self.ctx.stats.record_sync();
        if self.options.full_file_read_only {
            block.set_read_only()?;
        }
        self.ctx.listeners.block_modified(block.as_ref());
        debug!(address = block.address(), "log file completed");
        Ok(())
    }

    /// Flushes pending writes and syncs the current file.
    pub(crate) fn sync(&mut self) -> LogResult<()> {
        self.ensure_writes_completed()?;
        if let Some(block) = &self.block {
            block.sync()?;
            self.ctx.stats.record_sync();
        }
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Writes and syncs the session's bytes without ending it.
    pub(crate) fn flush(&mut self) -> LogResult<()> {
        if !self.in_session() {
            return Err(LogError::invalid_operation("no active write session"));
        }
        self.flush_partial()?;
        self.sync()
    }

    /// Ends the session and returns the state to publish.
    pub(crate) fn end_write(&mut self) -> LogResult<Arc<LogTip>> {
        let Some(start) = self.session_start else {
            return Err(LogError::invalid_operation("no active write session"));
        };
        self.check_poisoned()?;

        if self.high_address() > start && self.geometry.has_checksums() {
            // Recovery keeps the log up to the last hash loggable.
            let room = self.geometry.usable_page_size() - self.page_len;
            if room < HASH_RECORD_SIZE {
                self.write_nulls(room as u64)?;
            }
            let record = self.ctx.pipeline.hash_record(&self.page[..self.page_len]);
            self.write_bytes(&record)?;
        }
        self.flush_partial()?;

        if self.options.durable_write || self.last_sync.elapsed() >= self.options.sync_period {
            self.sync()?;
        }

        if let Some(mutable) = self.mutable.take() {
            self.committed = mutable.end_write();
        }
        self.session_start = None;
        self.ctx.stats.record_session();
        self.check_poisoned()?;

        debug!(from = start, to = self.high_address(), "write session ended");
        Ok(Arc::new(self.tip()))
    }

    /// State as of the last ended session.
    pub(crate) fn tip(&self) -> LogTip {
        let high_page: Page = if self.page_len > 0 {
            Arc::from(self.page.as_slice())
        } else {
            Arc::from(Vec::new())
        };
        LogTip {
            blocks: self.committed.clone(),
            high_address: self.high_address(),
            high_page_address: self.page_address,
            high_page,
            high_page_len: self.page_len,
        }
    }

    /// Drops a file from the block set. The caller removes it from storage.
    pub(crate) fn remove_block(&mut self, address: u64) -> LogResult<Arc<LogTip>> {
        if self.in_session() {
            return Err(LogError::invalid_operation(
                "cannot remove files during a write session",
            ));
        }
        let mut mutable = self.committed.begin_write();
        if mutable.remove(address).is_none() {
            return Err(LogError::invalid_argument(format!(
                "no log file at address {address}"
            )));
        }
        self.committed = mutable.end_write();
        Ok(Arc::new(self.tip()))
    }

    /// Forgets every file and restarts at address zero.
    pub(crate) fn reset(&mut self) -> LogResult<Arc<LogTip>> {
        if self.in_session() {
            return Err(LogError::invalid_operation(
                "cannot clear the log during a write session",
            ));
        }
        self.ensure_writes_completed()?;
        self.ctx.inflight.write().clear();
        self.committed = BlockSet::new(self.geometry.file_length_bound());
        self.block = None;
        self.page.fill(0);
        self.page_address = 0;
        self.page_len = 0;
        self.flushed_len = 0;
        Ok(Arc::new(self.tip()))
    }

    /// Blocks known to the writer, including ones created this session.
    pub(crate) fn committed_blocks(&self) -> &BlockSet {
        &self.committed
    }
}

impl Drop for BufferedWriter {
    fn drop(&mut self) {
        for write in std::mem::take(&mut self.pending) {
            let _ = write.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LogPageCache;
    use crate::loggable::HASH_CODE_BYTE;
    use crate::page::PagePipeline;
    use pagelog_storage::InMemoryBlockStore;

    fn writer(store: Arc<InMemoryBlockStore>) -> BufferedWriter {
        let geometry = LogGeometry::new(1024, 4096, true).unwrap();
        let ctx = Arc::new(ReadContext::new(
            PagePipeline::new(geometry, None),
            LogPageCache::separate(16, 2, false, false),
        ));
        let options = WriterOptions {
            durable_write: false,
            full_file_read_only: true,
            sync_period: Duration::from_secs(3600),
        };
        BufferedWriter::new(
            ctx,
            store,
            WriteExecutor::new(4).unwrap(),
            options,
            &LogTip::empty(4096),
        )
    }

    #[test]
    fn session_end_appends_hash_record() {
        let store = Arc::new(InMemoryBlockStore::new());
        let mut w = writer(Arc::clone(&store));
        w.begin_write().unwrap();
        assert_eq!(w.try_write_loggable(1, 0, b"abc").unwrap(), Some(0));
        let tip = w.end_write().unwrap();
        w.ensure_writes_completed().unwrap();

        assert_eq!(tip.high_address, 6 + HASH_RECORD_SIZE as u64);
        let data = store.block_data(0).unwrap();
        assert_eq!(&data[..6], &[0x81, 0x80, 0x83, b'a', b'b', b'c']);
        assert_eq!(data[6], HASH_CODE_BYTE);
        assert_eq!(data.len(), 15);
    }

    #[test]
    fn writing_outside_session_fails() {
        let store = Arc::new(InMemoryBlockStore::new());
        let mut w = writer(store);
        assert!(w.try_write_loggable(1, 0, b"x").is_err());
        assert!(w.end_write().is_err());
    }

    #[test]
    fn small_record_skips_to_next_page() {
        let store = Arc::new(InMemoryBlockStore::new());
        let mut w = writer(store);
        w.begin_write().unwrap();
        w.try_write_loggable(1, 0, &[7u8; 1000]).unwrap();
        assert_eq!(w.high_address(), 1004);

        let address = w.try_write_loggable(2, 0, &[1u8; 20]).unwrap();
        assert_eq!(address, Some(1024));
        w.end_write().unwrap();
    }

    #[test]
    fn large_record_spans_pages() {
        let store = Arc::new(InMemoryBlockStore::new());
        let mut w = writer(store);
        w.begin_write().unwrap();
        w.try_write_loggable(1, 0, &[7u8; 1000]).unwrap();
        let address = w.try_write_loggable(2, 0, &[1u8; 100]).unwrap();
        assert_eq!(address, Some(1004));
        assert_eq!(w.high_address(), 1024 + 103 - 12);
        w.end_write().unwrap();
    }

    #[test]
    fn record_too_big_for_rest_of_file() {
        let store = Arc::new(InMemoryBlockStore::new());
        let mut w = writer(store);
        w.begin_write().unwrap();
        w.try_write_loggable(1, 0, &[0u8; 3000]).unwrap();
        assert_eq!(w.try_write_loggable(1, 0, &[0u8; 2000]).unwrap(), None);
        assert!(w.pad_to_file_end().unwrap() > 0);
        assert_eq!(w.high_address(), 4096);
        assert_eq!(w.try_write_loggable(1, 0, &[0u8; 2000]).unwrap(), Some(4096));
        w.end_write().unwrap();
    }

    #[test]
    fn full_files_become_read_only() {
        let store = Arc::new(InMemoryBlockStore::new());
        let mut w = writer(Arc::clone(&store));
        w.begin_write().unwrap();
        w.try_write_loggable(1, 0, &[0u8; 100]).unwrap();
        w.pad_to_file_end().unwrap();
        let tip = w.end_write().unwrap();

        w.ensure_writes_completed().unwrap();

        assert_eq!(tip.high_address, 4096 + HASH_RECORD_SIZE as u64);
        let block = store.block(0).unwrap();
        assert!(block.is_read_only());
        assert_eq!(block.length(), 4096);
        assert!(block.sync_count() > 0);
        assert_eq!(store.block_data(4096).unwrap()[0], HASH_CODE_BYTE);
    }

    #[test]
    fn whole_page_padding() {
        let store = Arc::new(InMemoryBlockStore::new());
        let mut w = writer(store);
        w.begin_write().unwrap();
        assert_eq!(w.pad_whole_page().unwrap(), 1016);
        assert_eq!(w.high_address(), 1024);
        w.try_write_loggable(1, 0, b"x").unwrap();
        assert_eq!(w.pad_whole_page().unwrap(), 1012);
        assert_eq!(w.pad_page().unwrap(), 0);
        w.end_write().unwrap();
    }

    #[test]
    fn tiny_room_moves_hash_record_to_next_page() {
        let store = Arc::new(InMemoryBlockStore::new());
        let mut w = writer(Arc::clone(&store));
        w.begin_write().unwrap();
        w.try_write_loggable(1, 0, &[0u8; 1010]).unwrap();
        let tip = w.end_write().unwrap();
        w.ensure_writes_completed().unwrap();

        assert_eq!(tip.high_address, 1024 + HASH_RECORD_SIZE as u64);
        assert_eq!(tip.high_page_len, HASH_RECORD_SIZE);
        let data = store.block_data(0).unwrap();
        assert_eq!(data[1014], NULL_BYTE);
        assert_eq!(data[1024], HASH_CODE_BYTE);
    }

    #[test]
    fn session_ending_on_page_boundary_leaves_hash_record() {
        let store = Arc::new(InMemoryBlockStore::new());
        let mut w = writer(Arc::clone(&store));
        w.begin_write().unwrap();
        w.try_write_loggable(1, 0, &[5u8; 1012]).unwrap();
        assert_eq!(w.high_address(), 1024);
        let tip = w.end_write().unwrap();
        w.ensure_writes_completed().unwrap();

        assert_eq!(tip.high_address, 1024 + HASH_RECORD_SIZE as u64);
        assert_eq!(store.block_data(0).unwrap()[1024], HASH_CODE_BYTE);
    }

    #[test]
    fn empty_session_writes_nothing() {
        let store = Arc::new(InMemoryBlockStore::new());
        let mut w = writer(Arc::clone(&store));
        w.begin_write().unwrap();
        let tip = w.end_write().unwrap();
        assert_eq!(tip.high_address, 0);
        assert!(store.block_data(0).is_none());
    }
}
