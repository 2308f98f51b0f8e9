//! Callbacks for block lifecycle and read events.

use parking_lot::RwLock;
use pagelog_storage::Block;
use std::sync::Arc;

/// Observes files being created, filled and removed.
pub trait BlockListener: Send + Sync {
    /// A block was created by the writer.
    fn block_created(&self, _block: &dyn Block) {}

    /// A block was filled to its length and synced.
    fn block_modified(&self, _block: &dyn Block) {}

    /// A block is about to be removed.
    fn before_block_deleted(&self, _address: u64) {}

    /// A block was removed.
    fn after_block_deleted(&self, _address: u64) {}
}

/// Observes bytes read from blocks.
pub trait ReadBytesListener: Send + Sync {
    /// `bytes` were read from disk at log address `address`.
    fn bytes_read(&self, address: u64, bytes: &[u8]);
}

#[derive(Default)]
pub(crate) struct Listeners {
    blocks: RwLock<Vec<Arc<dyn BlockListener>>>,
    reads: RwLock<Vec<Arc<dyn ReadBytesListener>>>,
}

impl Listeners {
    pub(crate) fn add_block_listener(&self, listener: Arc<dyn BlockListener>) {
        self.blocks.write().push(listener);
    }

    pub(crate) fn remove_block_listener(&self, listener: &Arc<dyn BlockListener>) {
        self.blocks.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub(crate) fn add_read_listener(&self, listener: Arc<dyn ReadBytesListener>) {
        self.reads.write().push(listener);
    }

    pub(crate) fn remove_read_listener(&self, listener: &Arc<dyn ReadBytesListener>) {
        self.reads.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub(crate) fn block_created(&self, block: &dyn Block) {
        for listener in self.blocks.read().iter() {
            listener.block_created(block);
        }
    }

    pub(crate) fn block_modified(&self, block: &dyn Block) {
        for listener in self.blocks.read().iter() {
            listener.block_modified(block);
        }
    }

    pub(crate) fn before_block_deleted(&self, address: u64) {
        for listener in self.blocks.read().iter() {
            listener.before_block_deleted(address);
        }
    }

    pub(crate) fn after_block_deleted(&self, address: u64) {
        for listener in self.blocks.read().iter() {
            listener.after_block_deleted(address);
        }
    }

    pub(crate) fn bytes_read(&self, address: u64, bytes: &[u8]) {
        let reads = self.reads.read();
        if reads.is_empty() {
            return;
        }
        for listener in reads.iter() {
            listener.bytes_read(address, bytes);
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("blocks", &self.blocks.read().len())
            .field("reads", &self.reads.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagelog_storage::EmptyBlock;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct Counter {
        created: AtomicU64,
        deleted: AtomicU64,
    }

    impl BlockListener for Counter {
        fn block_created(&self, _block: &dyn Block) {
            self.created.fetch_add(1, Ordering::Relaxed);
        }

        fn after_block_deleted(&self, _address: u64) {
            self.deleted.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn dispatch_and_remove() {
        let listeners = Listeners::default();
        let counter = Arc::new(Counter::default());
        let handle: Arc<dyn BlockListener> = counter.clone();
        listeners.add_block_listener(Arc::clone(&handle));

        listeners.block_created(&EmptyBlock::new(0));
        listeners.after_block_deleted(0);
        listeners.before_block_deleted(0);
        assert_eq!(counter.created.load(Ordering::Relaxed), 1);
        assert_eq!(counter.deleted.load(Ordering::Relaxed), 1);

        listeners.remove_block_listener(&handle);
        listeners.block_created(&EmptyBlock::new(0));
        assert_eq!(counter.created.load(Ordering::Relaxed), 1);
    }
}
