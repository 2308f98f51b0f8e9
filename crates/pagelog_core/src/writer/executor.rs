//! Background page flushing.
//!
//! Nothing here enters the flush runtime with `block_on`, so a log can be
//! written, synced and dropped from a thread that drives another runtime.
//! Permits are taken with `try_acquire_owned`; a writer that finds none
//! parks until a flush releases one. Results come back over a channel.

use crate::error::{LogError, LogResult};
use pagelog_storage::StorageResult;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Upper bound on flush threads, whatever the number of pages per file.
const MAX_FLUSH_THREADS: usize = 16;

const RECHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Owns the flush runtime; shuts it down without blocking.
struct FlushRuntime(Option<Runtime>);

impl Drop for FlushRuntime {
    fn drop(&mut self) {
        // Writers wait for their flushes before letting go of the executor.
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// Permit pool with a wakeup for writers waiting on a release.
struct Boundary {
    semaphore: Arc<Semaphore>,
    released: Mutex<()>,
    wakeup: Condvar,
}

impl Boundary {
    fn release(&self, permit: OwnedSemaphorePermit) {
        drop(permit);
        let _guard = self.released.lock();
        self.wakeup.notify_all();
    }
}

/// A page write scheduled on the executor.
pub(crate) struct PendingWrite {
    receiver: mpsc::Receiver<StorageResult<()>>,
    result: Option<StorageResult<()>>,
}

impl PendingWrite {
    /// Returns `true` once the write has finished, without blocking.
    pub(crate) fn is_finished(&mut self) -> bool {
        if self.result.is_none() {
            if let Ok(result) = self.receiver.try_recv() {
                self.result = Some(result);
            }
        }
        self.result.is_some()
    }

    /// Blocks until the write has finished.
    pub(crate) fn wait(self) -> LogResult<StorageResult<()>> {
        match self.result {
            Some(result) => Ok(result),
            None => self
                .receiver
                .recv()
                .map_err(|_| LogError::runtime("page write ended without a result")),
        }
    }
}

/// Runs page writes off the writer thread.
///
/// At most `max_in_flight_pages` writes are outstanding at once; the writer
/// blocks when the bound is reached. Several logs may share one executor
/// if their files hold the same number of pages.
#[derive(Clone)]
pub struct WriteExecutor {
    runtime: Arc<FlushRuntime>,
    boundary: Arc<Boundary>,
    max_in_flight_pages: usize,
}

impl WriteExecutor {
    /// Creates an executor allowing `max_in_flight_pages` pending writes.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidConfig`] for a zero bound and
    /// [`LogError::Runtime`] if the flush threads cannot be started.
    pub fn new(max_in_flight_pages: usize) -> LogResult<Self> {
        if max_in_flight_pages == 0 {
            return Err(LogError::invalid_config(
                "at least one page must be allowed in flight",
            ));
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(max_in_flight_pages.min(MAX_FLUSH_THREADS))
            .thread_name("pagelog-flush")
            .build()
            .map_err(|e| LogError::runtime(e.to_string()))?;
        Ok(Self {
            runtime: Arc::new(FlushRuntime(Some(runtime))),
            boundary: Arc::new(Boundary {
                semaphore: Arc::new(Semaphore::new(max_in_flight_pages)),
                released: Mutex::new(()),
                wakeup: Condvar::new(),
            }),
            max_in_flight_pages,
        })
    }

    /// Maximum number of pending page writes.
    #[must_use]
    pub fn max_in_flight_pages(&self) -> usize {
        self.max_in_flight_pages
    }

    /// Number of writes that could start right now.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.boundary.semaphore.available_permits()
    }

    /// Checks that a log with `pages_per_file` pages per file may use this
    /// executor.
    pub(crate) fn check_compatible(&self, pages_per_file: u64) -> LogResult<()> {
        if self.max_in_flight_pages as u64 != pages_per_file {
            return Err(LogError::config_mismatch(format!(
                "write executor allows {} pages in flight, log files hold {pages_per_file} pages",
                self.max_in_flight_pages
            )));
        }
        Ok(())
    }

    /// Waits for a free slot.
    pub(crate) fn acquire(&self) -> LogResult<OwnedSemaphorePermit> {
        let boundary = &self.boundary;
        loop {
            match Arc::clone(&boundary.semaphore).try_acquire_owned() {
                Ok(permit) => return Ok(permit),
                Err(TryAcquireError::Closed) => {
                    return Err(LogError::runtime("write executor shut down"))
                }
                Err(TryAcquireError::NoPermits) => {
                    let mut guard = boundary.released.lock();
                    if boundary.semaphore.available_permits() == 0 {
                        // A panicking flush drops its permit without a wakeup.
                        boundary.wakeup.wait_for(&mut guard, RECHECK_INTERVAL);
                    }
                }
            }
        }
    }

    /// Runs a write on a flush thread; `permit` is released when it ends.
    pub(crate) fn spawn<F>(&self, permit: OwnedSemaphorePermit, write: F) -> LogResult<PendingWrite>
    where
        F: FnOnce() -> StorageResult<()> + Send + 'static,
    {
        let Some(runtime) = self.runtime.0.as_ref() else {
            return Err(LogError::runtime("write executor shut down"));
        };
        let (sender, receiver) = mpsc::sync_channel(1);
        let boundary = Arc::clone(&self.boundary);
        runtime.spawn_blocking(move || {
            let result = write();
            boundary.release(permit);
            let _ = sender.send(result);
        });
        Ok(PendingWrite {
            receiver,
            result: None,
        })
    }
}

impl fmt::Debug for WriteExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteExecutor")
            .field("max_in_flight_pages", &self.max_in_flight_pages)
            .field("available_permits", &self.available_permits())
            .finish()
    }
}
