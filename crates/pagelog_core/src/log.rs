//! The log facade.

use crate::cache::{capacity_in_pages, LogPageCache, Page};
use crate::config::LogConfig;
use crate::crypto::PageCipher;
use crate::error::{LogError, LogResult};
use crate::geometry::LogGeometry;
use crate::iterator::LoggableIterator;
use crate::listener::{BlockListener, ReadBytesListener};
use crate::loggable::{encoded_length, Loggable};
use crate::metadata::{
    format_version, write_backup_metadata, BackupMetadata, StartupMetadata, StartupMetadataFiles,
};
use crate::page::PagePipeline;
use crate::reader::{read_fully, LogReader, ReadContext};
use crate::recovery::{check_log_consistency, open_clean, LogExtent};
use crate::stats::LogStatistics;
use crate::tip::LogTip;
use crate::writer::{BufferedWriter, WriteExecutor, WriterOptions};
use arc_swap::ArcSwap;
use pagelog_storage::{BlockStore, FileBlockStore, InMemoryBlockStore};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct MetadataState {
    files: StartupMetadataFiles,
    /// Last metadata written.
    current: StartupMetadata,
    /// Latest root address, persisted or not.
    root: Option<u64>,
}

/// An append-only log of loggables.
///
/// One writer at a time appends through a [`WriteSession`]; any number of
/// threads read through [`LogReader`] snapshots, which never block on the
/// writer.
///
/// # Example
///
/// ```rust
/// use pagelog_core::{Log, LogConfig};
///
/// let log = Log::open_in_memory(LogConfig::new().file_size(64).page_size(1024))?;
/// let address = log.write(1, 0, b"payload")?;
///
/// let loggable = log.read(address)?;
/// assert_eq!(loggable.data().to_bytes()?.as_ref(), b"payload");
/// log.close()?;
/// # Ok::<(), pagelog_core::LogError>(())
/// ```
pub struct Log {
    config: LogConfig,
    store: Arc<dyn BlockStore>,
    geometry: LogGeometry,
    ctx: Arc<ReadContext>,
    tip: ArcSwap<LogTip>,
    writer: Mutex<BufferedWriter>,
    metadata: Mutex<MetadataState>,
    closed: AtomicBool,
}

impl Log {
    /// Opens a log in a directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Fails if the directory lock cannot be taken within the configured
    /// lock timeout, or for any reason [`Log::open`] fails.
    pub fn open_dir(path: impl AsRef<Path>, config: LogConfig) -> LogResult<Self> {
        let store = FileBlockStore::open_with_lock_timeout(path.as_ref(), config.lock_timeout)?;
        Self::open(Arc::new(store), config)
    }

    /// Opens an empty log held in memory.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidConfig`] for an invalid configuration.
    pub fn open_in_memory(config: LogConfig) -> LogResult<Self> {
        Self::open(Arc::new(InMemoryBlockStore::new()), config)
    }

    /// Opens a log on a block store.
    ///
    /// A log that was not closed cleanly is checked page by page and its
    /// damaged tail is cut off. Persisted page and file sizes take
    /// precedence over the configured ones.
    ///
    /// # Errors
    ///
    /// - [`LogError::InvalidConfig`] for an invalid configuration
    /// - [`LogError::ConfigMismatch`] if the log format or a shared resource
    ///   disagrees with the configuration
    /// - [`LogError::DirectoryNotClean`] if a clean directory was expected
    /// - [`LogError::DataCorruption`] if the log is damaged beyond its last
    ///   file and `clear_invalid_log` is off
    pub fn open(store: Arc<dyn BlockStore>, config: LogConfig) -> LogResult<Self> {
        config.validate()?;
        let mut geometry = config.geometry()?;

        let (mut files, persisted) = StartupMetadataFiles::load(store.as_ref())?;
        let existing = store.list_blocks()?;
        if config.clean_directory_expected && (persisted.is_some() || !existing.is_empty()) {
            return Err(LogError::DirectoryNotClean {
                location: store.location(),
            });
        }

        let expected_format = format_version(config.checksums);
        let mut root = None;
        let need_check = match &persisted {
            Some(meta) => {
                if meta.format_version != expected_format {
                    return Err(LogError::config_mismatch(format!(
                        "log format version {} does not match configured version {expected_format}",
                        meta.format_version
                    )));
                }
                if meta.page_size as usize != geometry.page_size()
                    || meta.file_length_boundary != geometry.file_length_bound()
                {
                    warn!(
                        configured_page_size = geometry.page_size(),
                        configured_file_length = geometry.file_length_bound(),
                        page_size = meta.page_size,
                        file_length = meta.file_length_boundary,
                        "using page and file sizes of the existing log"
                    );
                    geometry = LogGeometry::new(
                        meta.page_size as usize,
                        meta.file_length_boundary,
                        config.checksums,
                    )?;
                }
                root = meta.root_address;
                !meta.correctly_closed
            }
            None => !existing.is_empty(),
        };

        let cache = match &config.shared_cache {
            Some(shared) => {
                shared.check_compatible(geometry.page_size(), config.cache_use_soft_references)?;
                LogPageCache::shared(Arc::clone(shared))
            }
            None => LogPageCache::separate(
                capacity_in_pages(
                    config.cache_memory(),
                    geometry.page_size(),
                    config.cache_generation_count,
                ),
                config.cache_generation_count,
                config.cache_use_soft_references,
                config.non_blocking_cache,
            ),
        };
        let cache_pages = match &config.shared_cache {
            Some(shared) => shared.capacity(),
            None => capacity_in_pages(
                config.cache_memory(),
                geometry.page_size(),
                config.cache_generation_count,
            ),
        };

        let executor = match &config.write_executor {
            Some(executor) => {
                executor.check_compatible(geometry.pages_per_file())?;
                executor.clone()
            }
            None => {
                let pages = usize::try_from(geometry.pages_per_file())
                    .map_err(|_| LogError::invalid_config("too many pages per file"))?;
                WriteExecutor::new(pages)?
            }
        };

        let cipher = config
            .cipher
            .as_ref()
            .map(|c| Arc::new(PageCipher::new(&c.key, c.basic_iv)));
        let pipeline = PagePipeline::new(geometry, cipher);

        let clean = if need_check {
            None
        } else {
            open_clean(store.as_ref(), &geometry)?
        };
        let extent = match clean {
            Some(extent) => extent,
            None => {
                info!(location = %store.location(), "log was not closed cleanly, checking consistency");
                match check_log_consistency(store.as_ref(), &pipeline) {
                    Ok(extent) => extent,
                    Err(err) if err.is_corruption() && config.clear_invalid_log => {
                        warn!(error = %err, "log is invalid, clearing it");
                        for address in store.list_blocks()? {
                            store.remove_block(address)?;
                        }
                        files.remove_all(store.as_ref())?;
                        root = None;
                        LogExtent::empty(geometry.file_length_bound())
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        let tip = load_tip(&pipeline, extent)?;
        if let Some(address) = root.filter(|&a| a >= tip.high_address) {
            warn!(root = address, high_address = tip.high_address, "root address lost with the log tail");
            root = None;
        }

        let mut current = StartupMetadata {
            file_version: 0,
            format_version: expected_format,
            environment_format_version: config.environment_format_version,
            root_address: root,
            page_size: u32::try_from(geometry.page_size())
                .map_err(|_| LogError::invalid_config("page size too large"))?,
            file_length_boundary: geometry.file_length_bound(),
            correctly_closed: false,
        };
        files.store_next(store.as_ref(), &mut current)?;

        let ctx = Arc::new(ReadContext::new(pipeline, cache));
        let options = WriterOptions {
            durable_write: config.durable_write,
            full_file_read_only: config.full_file_read_only,
            sync_period: config.sync_period,
        };
        let writer = BufferedWriter::new(
            Arc::clone(&ctx),
            Arc::clone(&store),
            executor,
            options,
            &tip,
        );

        info!(
            location = %store.location(),
            files = tip.blocks.len(),
            high_address = tip.high_address,
            page_size = geometry.page_size(),
            file_length = geometry.file_length_bound(),
            "log opened"
        );

        let log = Self {
            store,
            geometry,
            tip: ArcSwap::from_pointee(tip),
            writer: Mutex::new(writer),
            metadata: Mutex::new(MetadataState {
                files,
                current,
                root,
            }),
            ctx,
            closed: AtomicBool::new(false),
            config,
        };
        if log.config.warmup {
            log.warm_up(cache_pages);
        }
        Ok(log)
    }

    /// Loads the newest complete pages into the cache.
    fn warm_up(&self, limit: usize) {
        let reader = self.reader();
        let tip = reader.tip();
        let page_size = self.geometry.page_size() as u64;
        let flb = self.geometry.file_length_bound();
        let mut loaded = 0;

        for file in tip.blocks.addresses().rev() {
            let end = (file + flb).min(tip.high_page_address);
            let mut page = end;
            while page > file && loaded < limit {
                page -= page_size;
                if let Err(err) = reader.page(page) {
                    warn!(page, error = %err, "warmup stopped");
                    return;
                }
                loaded += 1;
            }
            if loaded >= limit {
                break;
            }
        }
        debug!(pages = loaded, "cache warmed up");
    }

    fn ensure_open(&self) -> LogResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(LogError::Closed)
        } else {
            Ok(())
        }
    }

    fn ensure_writable(&self) -> LogResult<()> {
        self.ensure_open()?;
        if self.ctx.is_read_only() {
            return Err(LogError::ReadOnly);
        }
        Ok(())
    }

    fn publish(&self, tip: Arc<LogTip>) {
        self.tip.store(tip);
    }

    /// Configuration the log was opened with.
    #[must_use]
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Page and file layout in effect.
    #[must_use]
    pub fn geometry(&self) -> &LogGeometry {
        &self.geometry
    }

    /// Identity of the log in the page cache; renewed by [`Log::clear`].
    #[must_use]
    pub fn identity(&self) -> Uuid {
        self.ctx.cache.identity()
    }

    /// Address one past the last byte of the last ended session.
    #[must_use]
    pub fn high_address(&self) -> u64 {
        self.tip.load().high_address
    }

    /// Address of the file containing `address`.
    #[must_use]
    pub fn file_address(&self, address: u64) -> u64 {
        self.geometry.file_address(address)
    }

    /// Advances `address` by `offset` usable bytes.
    #[must_use]
    pub fn adjust_loggable_address(&self, address: u64, offset: u64) -> u64 {
        self.geometry.adjust_loggable_address(address, offset)
    }

    /// Addresses of all files, ascending.
    #[must_use]
    pub fn file_addresses(&self) -> Vec<u64> {
        self.tip.load().blocks.addresses().collect()
    }

    /// Returns `true` once corruption was detected.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.ctx.is_read_only()
    }

    /// Returns `true` after [`Log::close`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Counters of this log.
    #[must_use]
    pub fn stats(&self) -> &LogStatistics {
        &self.ctx.stats
    }

    /// Fraction of page lookups served by the cache.
    #[must_use]
    pub fn cache_hit_rate(&self) -> f64 {
        self.ctx.cache.hit_rate()
    }

    /// Snapshot of the log as of the last ended session.
    #[must_use]
    pub fn reader(&self) -> LogReader {
        LogReader::new(Arc::clone(&self.ctx), self.tip.load_full())
    }

    /// Decodes the loggable at `address`.
    ///
    /// # Errors
    ///
    /// See [`LogReader::read`].
    pub fn read(&self, address: u64) -> LogResult<Loggable> {
        self.reader().read(address)
    }

    /// Iterates data loggables from `address`.
    #[must_use]
    pub fn loggable_iter(&self, address: u64) -> LoggableIterator {
        self.reader().loggables(address)
    }

    /// First loggable of `loggable_type` in the log.
    ///
    /// # Errors
    ///
    /// Fails if a loggable on the way cannot be read.
    pub fn first_loggable_of_type(&self, loggable_type: u8) -> LogResult<Option<Loggable>> {
        let reader = self.reader();
        let start = reader.tip().blocks.minimum().unwrap_or(0);
        for loggable in reader.loggables(start) {
            let loggable = loggable?;
            if loggable.loggable_type() == loggable_type {
                return Ok(Some(loggable));
            }
        }
        Ok(None)
    }

    /// Last loggable of `loggable_type` in the log.
    ///
    /// # Errors
    ///
    /// Fails if a loggable on the way cannot be read.
    pub fn last_loggable_of_type(&self, loggable_type: u8) -> LogResult<Option<Loggable>> {
        self.last_loggable_of_type_before(loggable_type, u64::MAX)
    }

    /// Last loggable of `loggable_type` starting below `before`.
    ///
    /// Files are searched newest first; each is scanned from its start.
    ///
    /// # Errors
    ///
    /// Fails if a loggable on the way cannot be read.
    pub fn last_loggable_of_type_before(
        &self,
        loggable_type: u8,
        before: u64,
    ) -> LogResult<Option<Loggable>> {
        let reader = self.reader();
        let end = before.min(reader.high_address());
        let flb = self.geometry.file_length_bound();
        let files: Vec<u64> = reader.tip().blocks.addresses().collect();

        for &file in files.iter().rev().filter(|&&f| f < end) {
            let mut found = None;
            for loggable in reader.loggables_between(file, (file + flb).min(end)) {
                let loggable = loggable?;
                if loggable.loggable_type() == loggable_type {
                    found = Some(loggable);
                }
            }
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// Starts a write session, waiting for the current one to end.
    ///
    /// # Errors
    ///
    /// Fails if the log is closed, read-only or its writer is poisoned.
    pub fn begin_write(&self) -> LogResult<WriteSession<'_>> {
        self.ensure_writable()?;
        let mut writer = self.writer.lock();
        writer.begin_write()?;
        Ok(WriteSession {
            log: self,
            writer,
            finished: false,
        })
    }

    /// Writes one loggable in its own session.
    ///
    /// # Errors
    ///
    /// See [`WriteSession::write`].
    pub fn write(&self, loggable_type: u8, structure_id: u32, data: &[u8]) -> LogResult<u64> {
        let mut session = self.begin_write()?;
        let address = session.write(loggable_type, structure_id, data)?;
        session.end()?;
        Ok(address)
    }

    /// Waits for pending page writes and syncs the current file.
    ///
    /// # Errors
    ///
    /// Returns the error of a failed page write or sync.
    pub fn sync(&self) -> LogResult<()> {
        self.ensure_open()?;
        self.writer.lock().sync()
    }

    /// Latest root address.
    #[must_use]
    pub fn root_address(&self) -> Option<u64> {
        self.metadata.lock().root
    }

    /// Records the root address of the layer above.
    ///
    /// The metadata is rewritten only when the root moved by at least one
    /// file length since it was last persisted; close always persists it.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidArgument`] for a root at or past the high
    /// address.
    pub fn set_root_address(&self, root: Option<u64>) -> LogResult<()> {
        self.ensure_open()?;
        if let Some(address) = root {
            let high = self.high_address();
            if address >= high {
                return Err(LogError::invalid_argument(format!(
                    "root address {address} is not below the high address {high}"
                )));
            }
        }

        let mut meta = self.metadata.lock();
        meta.root = root;
        let moved = match (meta.current.root_address, root) {
            (Some(old), Some(new)) => old.abs_diff(new) >= self.geometry.file_length_bound(),
            (old, new) => old != new,
        };
        if moved {
            let mut next = StartupMetadata {
                root_address: root,
                ..meta.current
            };
            meta.files.store_next(self.store.as_ref(), &mut next)?;
            meta.current = next;
        }
        Ok(())
    }

    /// Returns the current startup metadata with the latest root.
    #[must_use]
    pub fn metadata(&self) -> StartupMetadata {
        let meta = self.metadata.lock();
        StartupMetadata {
            root_address: meta.root,
            ..meta.current
        }
    }

    /// Syncs the log and writes backup metadata describing its extent.
    ///
    /// Files up to the returned high address may be copied while the log
    /// keeps running.
    ///
    /// # Errors
    ///
    /// Fails if the log cannot be synced or the metadata written.
    pub fn prepare_backup(&self) -> LogResult<BackupMetadata> {
        self.sync()?;
        let tip = self.tip.load_full();
        let last_file_address = tip.blocks.maximum().unwrap_or(0);
        let backup = BackupMetadata {
            startup: StartupMetadata {
                correctly_closed: true,
                ..self.metadata()
            },
            last_file_address,
            last_file_offset: tip.high_address - last_file_address,
        };
        write_backup_metadata(self.store.as_ref(), &backup)?;
        info!(high_address = backup.high_address(), "backup metadata written");
        Ok(backup)
    }

    /// Removes a file that the layer above no longer needs.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidArgument`] for the last file or an unknown
    /// address.
    pub fn remove_file(&self, address: u64) -> LogResult<()> {
        self.ensure_writable()?;
        let mut writer = self.writer.lock();
        if writer.committed_blocks().maximum() == Some(address) {
            return Err(LogError::invalid_argument(format!(
                "cannot remove the last log file {address}"
            )));
        }
        if !writer.committed_blocks().contains(address) {
            return Err(LogError::invalid_argument(format!(
                "no log file at address {address}"
            )));
        }

        self.ctx.listeners.before_block_deleted(address);
        let tip = writer.remove_block(address)?;
        self.publish(tip);
        drop(writer);

        let page_size = self.geometry.page_size() as u64;
        let mut page = address;
        while page < address + self.geometry.file_length_bound() {
            self.ctx.cache.remove(page);
            page += page_size;
        }
        self.store.remove_block(address)?;
        self.ctx.listeners.after_block_deleted(address);
        self.ctx.stats.record_file_removed();
        info!(address, "log file removed");
        Ok(())
    }

    /// Removes every file and restarts the log at address zero.
    ///
    /// # Errors
    ///
    /// Fails if files or metadata cannot be removed or written.
    pub fn clear(&self) -> LogResult<()> {
        self.ensure_writable()?;
        let mut writer = self.writer.lock();
        let old: Vec<u64> = writer.committed_blocks().addresses().collect();
        let tip = writer.reset()?;
        self.publish(tip);
        self.ctx.cache.clear();

        for address in old {
            self.ctx.listeners.before_block_deleted(address);
            self.store.remove_block(address)?;
            self.ctx.listeners.after_block_deleted(address);
            self.ctx.stats.record_file_removed();
        }

        let mut meta = self.metadata.lock();
        meta.root = None;
        let mut next = StartupMetadata {
            root_address: None,
            ..meta.current
        };
        meta.files.store_next(self.store.as_ref(), &mut next)?;
        meta.current = next;
        info!(location = %self.store.location(), "log cleared");
        Ok(())
    }

    /// Registers a file lifecycle listener.
    pub fn add_block_listener(&self, listener: Arc<dyn BlockListener>) {
        self.ctx.listeners.add_block_listener(listener);
    }

    /// Unregisters a file lifecycle listener.
    pub fn remove_block_listener(&self, listener: &Arc<dyn BlockListener>) {
        self.ctx.listeners.remove_block_listener(listener);
    }

    /// Registers a listener for bytes read from storage.
    pub fn add_read_bytes_listener(&self, listener: Arc<dyn ReadBytesListener>) {
        self.ctx.listeners.add_read_listener(listener);
    }

    /// Unregisters a read listener.
    pub fn remove_read_bytes_listener(&self, listener: &Arc<dyn ReadBytesListener>) {
        self.ctx.listeners.remove_read_listener(listener);
    }

    /// Flushes everything and marks the log as cleanly closed.
    ///
    /// A log that turned read-only after detecting corruption is not marked
    /// closed, so the next open checks it again. Blocks while a write
    /// session is active.
    ///
    /// # Errors
    ///
    /// Returns the error of a failed page write, sync or metadata write.
    pub fn close(&self) -> LogResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        writer.sync()?;

        if self.ctx.is_read_only() {
            warn!("read-only log closed without clean shutdown mark");
        } else {
            let mut meta = self.metadata.lock();
            let mut next = StartupMetadata {
                root_address: meta.root,
                correctly_closed: true,
                ..meta.current
            };
            meta.files.store_next(self.store.as_ref(), &mut next)?;
            meta.current = next;
        }
        self.store.sync_directory()?;
        self.closed.store(true, Ordering::Release);

        info!(
            location = %self.store.location(),
            high_address = writer.high_address(),
            "log closed"
        );
        Ok(())
    }
}

/// Reads the partial high page of a log found on storage.
fn load_tip(pipeline: &PagePipeline, extent: LogExtent) -> LogResult<LogTip> {
    let geometry = pipeline.geometry();
    let high = extent.high_address;
    let page_address = geometry.page_address(high);
    let len = geometry.page_offset(high);

    let mut high_page: Page = Arc::from(Vec::new());
    if len > 0 {
        let file_address = geometry.file_address(high);
        let block = extent.blocks.find(file_address).ok_or_else(|| {
            LogError::corruption(format!("no log file holds the high address {high}"))
        })?;
        let mut buf = vec![0u8; geometry.page_size()];
        let n = read_fully(block.as_ref(), page_address - file_address, &mut buf[..len])?;
        if n < len {
            return Err(LogError::corruption(format!(
                "high page {page_address} is shorter than {len} bytes"
            )));
        }
        pipeline.open_page(page_address, &mut buf, n)?;
        high_page = Arc::from(buf);
    }

    Ok(LogTip {
        blocks: extent.blocks,
        high_address: high,
        high_page_address: page_address,
        high_page,
        high_page_len: len,
    })
}

impl Drop for Log {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "log dropped without clean close");
        }
    }
}

impl fmt::Debug for Log {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Log")
            .field("location", &self.store.location())
            .field("high_address", &self.high_address())
            .field("read_only", &self.is_read_only())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// An open write session.
///
/// Loggables become visible to readers when the session ends. Dropping a
/// session ends it as well.
pub struct WriteSession<'a> {
    log: &'a Log,
    writer: MutexGuard<'a, BufferedWriter>,
    finished: bool,
}

impl WriteSession<'_> {
    /// Address the next loggable would be written to, barring padding.
    #[must_use]
    pub fn high_address(&self) -> u64 {
        self.writer.high_address()
    }

    /// Appends a loggable and returns its address.
    ///
    /// A loggable that does not fit the rest of the current file is written
    /// at the start of the next file.
    ///
    /// # Errors
    ///
    /// - [`LogError::InvalidArgument`] for reserved types
    /// - [`LogError::TooBigLoggable`] if it does not fit an empty file
    /// - [`LogError::ReadOnly`] after corruption was detected
    /// - [`LogError::WriterPoisoned`] after a failed page write
    pub fn write(&mut self, loggable_type: u8, structure_id: u32, data: &[u8]) -> LogResult<u64> {
        if self.log.ctx.is_read_only() {
            return Err(LogError::ReadOnly);
        }
        let length = encoded_length(structure_id, data.len());
        let max = self.log.geometry.usable_file_size();
        if length > max {
            return Err(LogError::TooBigLoggable { length, max });
        }

        if let Some(address) = self.writer.try_write_loggable(loggable_type, structure_id, data)? {
            return Ok(address);
        }
        self.writer.pad_to_file_end()?;
        match self.writer.try_write_loggable(loggable_type, structure_id, data)? {
            Some(address) => Ok(address),
            None => Err(LogError::TooBigLoggable { length, max }),
        }
    }

    /// Pads the current page with null loggables; returns the bytes written.
    ///
    /// # Errors
    ///
    /// Fails if the writer is poisoned.
    pub fn pad_page(&mut self) -> LogResult<u64> {
        self.writer.pad_page()
    }

    /// Pads to the next page, writing a whole null page if already aligned.
    ///
    /// # Errors
    ///
    /// Fails if the writer is poisoned.
    pub fn pad_whole_page(&mut self) -> LogResult<u64> {
        self.writer.pad_whole_page()
    }

    /// Pads to the start of the next file.
    ///
    /// # Errors
    ///
    /// Fails if the writer is poisoned.
    pub fn pad_to_file_end(&mut self) -> LogResult<u64> {
        self.writer.pad_to_file_end()
    }

    /// Writes and syncs everything appended so far without ending the
    /// session. The loggables stay invisible and are discarded by recovery
    /// if the session never ends.
    ///
    /// # Errors
    ///
    /// Returns the error of a failed page write or sync.
    pub fn flush(&mut self) -> LogResult<()> {
        self.writer.flush()
    }

    fn finish(&mut self) -> LogResult<u64> {
        self.finished = true;
        let tip = self.writer.end_write()?;
        let high = tip.high_address;
        self.log.publish(tip);
        Ok(high)
    }

    /// Ends the session, publishing its loggables, and returns the new high
    /// address.
    ///
    /// # Errors
    ///
    /// Fails if writing the partial page or syncing fails.
    pub fn end(mut self) -> LogResult<u64> {
        self.finish()
    }
}

impl Drop for WriteSession<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("write session dropped without end, ending it");
        if let Err(err) = self.finish() {
            warn!(error = %err, "ending dropped write session failed");
        }
    }
}

impl fmt::Debug for WriteSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteSession")
            .field("high_address", &self.writer.high_address())
            .finish_non_exhaustive()
    }
}
